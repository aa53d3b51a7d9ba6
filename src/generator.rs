//! Generator interface
//!
//! The four textual code generators (legacy desktop SM3/SM4, GLSL 140,
//! GLSL ES 100) are out of scope here; this crate only owns the boundary
//! they sit behind. `ShaderGenerator` is that boundary: one method taking
//! the validated, folded, dead-code-free `Ast` and this run's
//! `CompilerConfig`, returning the generated source text or a diagnostic.
//! `StubGenerator` is a minimal implementation so the pipeline in
//! [`crate::compile`] has something real to call and test against; a
//! production build links a generator crate per [`OutputFormat`] instead.

use crate::ast::{Ast, NodeData};
use crate::config::{CompilerConfig, OutputFormat};

pub trait ShaderGenerator {
    fn generate(&self, ast: &Ast, config: &CompilerConfig) -> Result<String, String>;
}

/// Emits a comment banner naming the entry point and target, plus one line
/// per surviving function signature. Exists to exercise the pipeline end to
/// end; not a target-language emitter.
pub struct StubGenerator;

impl ShaderGenerator for StubGenerator {
    fn generate(&self, ast: &Ast, config: &CompilerConfig) -> Result<String, String> {
        let Some(entry) = ast.entry_point else {
            return Err("no entry point to generate from".into());
        };
        let target = match config.output_format {
            OutputFormat::LegacyDesktopSm3 => "sm3",
            OutputFormat::LegacyDesktopSm4 => "sm4",
            OutputFormat::Glsl140 => "glsl140",
            OutputFormat::GlslEs100 => "glsl_es100",
        };
        let mut out = format!("// target={target} stage={:?} entry={}\n", config.stage, config.entry_point_name);
        for f in &ast.function_list {
            if let NodeData::Function(func) = &ast.node(*f).data {
                let marker = if *f == entry { " (entry)" } else { "" };
                out.push_str(&format!("// fn {}{}\n", func.mangled_name, marker));
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Stage;

    #[test]
    fn stub_generator_requires_entry_point() {
        let ast = Ast::new();
        let config = CompilerConfig::new("main", Stage::Pixel, OutputFormat::Glsl140);
        assert!(StubGenerator.generate(&ast, &config).is_err());
    }
}
