//! Front end and semantic core for a shading-language cross-compiler
//!
//! [`compile`] and [`compile_with`] run the fixed pipeline: lex, preprocess,
//! parse with integrated type-checking and overload resolution, validate
//! variable accesses, fold constants, and strip dead functions/variables.
//! Every pass buffers into one [`DiagnosticSink`] rather than bailing out on
//! the first problem, matching the rest of the crate's error-handling style.
//! Target-language text generation lives behind the [`ShaderGenerator`]
//! trait; this crate ships only [`StubGenerator`], a placeholder that proves
//! the boundary works end to end.

pub mod ast;
pub mod builtins;
pub mod config;
pub mod constprop;
pub mod dce;
pub mod diagnostics;
pub mod generator;
pub mod lexer;
pub mod parser;
pub mod preprocessor;
pub mod token;
pub mod types;
pub mod validator;

pub use ast::Ast;
pub use config::{CompilerConfig, OutputFormat, Stage};
pub use diagnostics::{Diagnostic, DiagnosticSink, Severity};
pub use generator::{ShaderGenerator, StubGenerator};
pub use preprocessor::FileLoader;

use std::path::{Path, PathBuf};
use token::TokenKind;

/// Resolves every `#include` to "not permitted", for embedders that only
/// ever compile a single in-memory translation unit.
pub struct NoIncludeLoader;

impl FileLoader for NoIncludeLoader {
    fn load(&mut self, path: &str, _from_file_index: u32) -> Result<(u32, String), String> {
        Err(format!("#include \"{path}\" is not permitted: no include loader configured"))
    }
}

/// Resolves `#include` paths against a root directory on disk. File indices
/// are assigned in load order starting at 1 (0 is reserved for the root
/// translation unit); `files()` maps an index back to a path for a caller's
/// own diagnostic formatting.
pub struct FsIncludeLoader {
    root: PathBuf,
    files: Vec<PathBuf>,
}

impl FsIncludeLoader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        FsIncludeLoader { root: root.into(), files: Vec::new() }
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }
}

impl FileLoader for FsIncludeLoader {
    fn load(&mut self, path: &str, _from_file_index: u32) -> Result<(u32, String), String> {
        let full = self.root.join(path);
        let contents = std::fs::read_to_string(&full).map_err(|e| format!("cannot read include `{path}`: {e}"))?;
        let index = self.files.len() as u32 + 1;
        self.files.push(full);
        Ok((index, contents))
    }
}

/// Everything a compile produced: the transformed AST (for a caller that
/// wants to inspect it directly), every diagnostic in emission order, and
/// the generated text if the pipeline got far enough to call the generator.
pub struct CompileOutput {
    pub ast: Ast,
    pub diagnostics: Vec<Diagnostic>,
    pub generated: Option<String>,
}

impl CompileOutput {
    pub fn has_errors(&self) -> bool {
        self.diagnostics.iter().any(|d| d.severity == Severity::Error || d.severity == Severity::Fatal)
    }
}

/// Compiles a single in-memory translation unit with no `#include` support,
/// generating through [`StubGenerator`].
pub fn compile(source: &str, config: &CompilerConfig) -> CompileOutput {
    compile_with(source, config, &mut NoIncludeLoader, &StubGenerator)
}

/// Runs the full pipeline against `source`, resolving `#include` through
/// `loader` and generating through `generator`. Later passes still run even
/// after a pass emits an `Error` diagnostic (spec.md section 6's buffering
/// contract); only a `Fatal` diagnostic skips the remaining passes.
pub fn compile_with(source: &str, config: &CompilerConfig, loader: &mut dyn FileLoader, generator: &dyn ShaderGenerator) -> CompileOutput {
    let mut pool = token::TokenPool::new();
    let mut diags = DiagnosticSink::new();

    let mut tokens = lexer::lex(source, 0, &mut pool, &mut diags);
    if matches!(tokens.last(), Some(t) if t.kind == TokenKind::Eof) {
        tokens.pop();
    }
    let mut pp = preprocessor::Preprocessor::new(&mut pool, &config.feature_macros);
    let mut expanded = pp.process(tokens, 0, loader, &mut diags);
    expanded.push(token::Token::new(TokenKind::Eof, token::SourceLocation::BAD, 0));

    let mut ast = {
        let mut parser = parser::Parser::new(expanded, &pool, config, &mut diags);
        parser.parse_program();
        parser.ast
    };

    if !diags.has_fatal_errors() {
        validator::validate(&mut ast, &mut diags);
    }
    if !diags.has_fatal_errors() {
        constprop::propagate_constants(&mut ast);
        dce::remove_unused_functions(&mut ast);
        dce::remove_unused_variables(&mut ast);
    }

    let generated = if !diags.has_errors() {
        match generator.generate(&ast, config) {
            Ok(text) => Some(text),
            Err(msg) => {
                diags.error(token::SourceLocation::BAD, msg);
                None
            }
        }
    } else {
        None
    };

    CompileOutput {
        ast,
        diagnostics: diags.into_records(),
        generated,
    }
}

/// Reads `path` from disk and compiles it, resolving `#include` relative to
/// its parent directory.
pub fn compile_file(path: &Path, config: &CompilerConfig, generator: &dyn ShaderGenerator) -> Result<CompileOutput, String> {
    let source = std::fs::read_to_string(path).map_err(|e| format!("cannot read {}: {e}", path.display()))?;
    let root = path.parent().map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from("."));
    let mut loader = FsIncludeLoader::new(root);
    Ok(compile_with(&source, config, &mut loader, generator))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compiles_clean_shader_with_no_diagnostics() {
        let config = CompilerConfig::new("main", Stage::Pixel, OutputFormat::Glsl140);
        let out = compile("float4 main() : SV_Target { return float4(1.0, 0.0, 0.0, 1.0); }", &config);
        assert!(!out.has_errors(), "{:?}", out.diagnostics);
        assert!(out.generated.is_some());
    }

    #[test]
    fn missing_entry_point_produces_no_generated_output() {
        let config = CompilerConfig::new("main", Stage::Pixel, OutputFormat::Glsl140);
        let out = compile("float4 other() : SV_Target { return float4(0,0,0,0); }", &config);
        assert!(out.has_errors());
        assert!(out.generated.is_none());
    }

    #[test]
    fn include_without_loader_is_diagnosed_not_panicked() {
        let config = CompilerConfig::new("main", Stage::Pixel, OutputFormat::Glsl140);
        let out = compile("#include \"common.hlsli\"\nfloat4 main() : SV_Target { return float4(0,0,0,0); }", &config);
        assert!(out.has_errors());
    }

    #[test]
    fn dead_code_is_stripped_before_generation() {
        let config = CompilerConfig::new("main", Stage::Pixel, OutputFormat::Glsl140);
        let out = compile(
            "float unused() { return 1.0; } float4 main() : SV_Target { return float4(0,0,0,0); }",
            &config,
        );
        assert!(!out.has_errors(), "{:?}", out.diagnostics);
        assert_eq!(out.ast.function_list.len(), 1);
    }
}
