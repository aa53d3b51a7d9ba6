//! Compiler configuration
//!
//! Builder mirroring the teacher's `CompilerConfig`/`ExternalBuiltin`
//! pattern (`config.rs`): small validated setters returning `Self` by
//! value, plus accessors the rest of the pipeline reads from.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Vertex,
    Pixel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    LegacyDesktopSm3,
    LegacyDesktopSm4,
    Glsl140,
    GlslEs100,
}

#[derive(Debug, Clone)]
pub struct CompilerConfig {
    pub entry_point_name: String,
    pub stage: Stage,
    pub output_format: OutputFormat,
    pub output_flags: u32,
    pub feature_macros: Vec<String>,
}

impl CompilerConfig {
    pub fn new(entry_point_name: impl Into<String>, stage: Stage, output_format: OutputFormat) -> Self {
        CompilerConfig {
            entry_point_name: entry_point_name.into(),
            stage,
            output_format,
            output_flags: 0,
            feature_macros: Vec::new(),
        }
    }

    pub fn with_output_flags(mut self, flags: u32) -> Self {
        self.output_flags = flags;
        self
    }

    pub fn with_feature_macro(mut self, name: impl Into<String>) -> Self {
        self.feature_macros.push(name.into());
        self
    }

    pub fn with_feature_macros<I: IntoIterator<Item = S>, S: Into<String>>(mut self, names: I) -> Self {
        self.feature_macros.extend(names.into_iter().map(Into::into));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_accumulates_feature_macros() {
        let cfg = CompilerConfig::new("main", Stage::Pixel, OutputFormat::Glsl140)
            .with_feature_macro("USE_FOG")
            .with_feature_macros(["USE_SHADOWS", "USE_IBL"]);
        assert_eq!(cfg.feature_macros, vec!["USE_FOG", "USE_SHADOWS", "USE_IBL"]);
    }
}
