//! shaderxc CLI
//!
//! Command-line interface over the [`shaderxc`] library: compile a shader
//! to a target dialect, or check it without writing output. Diagnostic
//! formatting here is deliberately thin (one line per record) — a real
//! deployment's pretty-printer is an external concern this binary only
//! demonstrates the plumbing for.

use clap::{CommandFactory, Parser as ClapParser, Subcommand};
use clap_complete::{Shell, generate};
use serde::Deserialize;
use shaderxc::{CompileOutput, CompilerConfig, OutputFormat, Severity, Stage, StubGenerator};
use std::io;
use std::path::PathBuf;
use std::process;

#[derive(ClapParser)]
#[command(name = "shaderxc")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Shading-language front end: lex, preprocess, type-check, and fold", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a shader source file and write the generated output
    Build {
        /// Input shader source file
        input: PathBuf,

        /// Output path (defaults to stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Optional TOML config file (entry_point/stage/format/features)
        #[arg(long)]
        config: Option<PathBuf>,

        #[command(flatten)]
        overrides: ConfigArgs,
    },

    /// Run every pass and report diagnostics without writing output
    Check {
        /// Input shader source files
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        #[arg(long)]
        config: Option<PathBuf>,

        #[command(flatten)]
        overrides: ConfigArgs,
    },

    /// Generate shell completion scripts
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(clap::Args)]
struct ConfigArgs {
    /// Entry-point function name
    #[arg(long, default_value = "main")]
    entry: String,

    /// Shader stage
    #[arg(long, value_enum, default_value_t = StageArg::Pixel)]
    stage: StageArg,

    /// Target dialect
    #[arg(long, value_enum, default_value_t = FormatArg::Glsl140)]
    format: FormatArg,

    /// Feature macro to predefine as `1` (repeatable)
    #[arg(long = "feature")]
    features: Vec<String>,
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum StageArg {
    Vertex,
    Pixel,
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum FormatArg {
    Sm3,
    Sm4,
    Glsl140,
    GlslEs100,
}

/// Mirror of [`ConfigArgs`] loadable from TOML, so a project can pin its
/// compile settings in a file instead of repeating CLI flags.
#[derive(Deserialize, Default)]
struct FileConfig {
    entry_point: Option<String>,
    stage: Option<String>,
    format: Option<String>,
    features: Option<Vec<String>>,
}

fn main() {
    let cli = Cli::parse();
    match cli.command {
        Commands::Build { input, output, config, overrides } => run_build(&input, output.as_deref(), config.as_deref(), &overrides),
        Commands::Check { inputs, config, overrides } => run_check(&inputs, config.as_deref(), &overrides),
        Commands::Completions { shell } => run_completions(shell),
    }
}

fn run_completions(shell: Shell) {
    let mut cmd = Cli::command();
    generate(shell, &mut cmd, "shaderxc", &mut io::stdout());
}

fn build_config(path: Option<&std::path::Path>, overrides: &ConfigArgs) -> CompilerConfig {
    let file_config = path
        .map(|p| {
            let text = std::fs::read_to_string(p).unwrap_or_else(|e| {
                eprintln!("error reading config {}: {e}", p.display());
                process::exit(1);
            });
            toml::from_str::<FileConfig>(&text).unwrap_or_else(|e| {
                eprintln!("error parsing config {}: {e}", p.display());
                process::exit(1);
            })
        })
        .unwrap_or_default();

    let entry = file_config.entry_point.unwrap_or_else(|| overrides.entry.clone());
    let stage = match file_config.stage.as_deref() {
        Some("vertex") => Stage::Vertex,
        Some("pixel") => Stage::Pixel,
        Some(other) => {
            eprintln!("error: unknown stage `{other}` in config file");
            process::exit(1);
        }
        None => match overrides.stage {
            StageArg::Vertex => Stage::Vertex,
            StageArg::Pixel => Stage::Pixel,
        },
    };
    let format = match file_config.format.as_deref() {
        Some("sm3") => OutputFormat::LegacyDesktopSm3,
        Some("sm4") => OutputFormat::LegacyDesktopSm4,
        Some("glsl140") => OutputFormat::Glsl140,
        Some("glsl_es100") => OutputFormat::GlslEs100,
        Some(other) => {
            eprintln!("error: unknown format `{other}` in config file");
            process::exit(1);
        }
        None => match overrides.format {
            FormatArg::Sm3 => OutputFormat::LegacyDesktopSm3,
            FormatArg::Sm4 => OutputFormat::LegacyDesktopSm4,
            FormatArg::Glsl140 => OutputFormat::Glsl140,
            FormatArg::GlslEs100 => OutputFormat::GlslEs100,
        },
    };
    let features = file_config.features.unwrap_or_else(|| overrides.features.clone());

    CompilerConfig::new(entry, stage, format).with_feature_macros(features)
}

fn report(input: &std::path::Path, output: &CompileOutput) {
    for d in &output.diagnostics {
        let tag = match d.severity {
            Severity::Error => "error",
            Severity::Fatal => "fatal error",
        };
        eprintln!("{}: {tag}: {}", input.display(), d.message);
    }
}

fn run_build(input: &std::path::Path, output: Option<&std::path::Path>, config_path: Option<&std::path::Path>, overrides: &ConfigArgs) {
    let config = build_config(config_path, overrides);
    let result = shaderxc::compile_file(input, &config, &StubGenerator);
    let compiled = match result {
        Ok(c) => c,
        Err(e) => {
            eprintln!("error: {e}");
            process::exit(1);
        }
    };

    report(input, &compiled);
    if compiled.has_errors() {
        process::exit(1);
    }

    let text = compiled.generated.unwrap_or_default();
    match output {
        Some(path) => {
            if let Err(e) = std::fs::write(path, &text) {
                eprintln!("error writing {}: {e}", path.display());
                process::exit(1);
            }
        }
        None => print!("{text}"),
    }
}

fn run_check(inputs: &[PathBuf], config_path: Option<&std::path::Path>, overrides: &ConfigArgs) {
    let config = build_config(config_path, overrides);
    let mut any_errors = false;
    for input in inputs {
        match shaderxc::compile_file(input, &config, &StubGenerator) {
            Ok(compiled) => {
                report(input, &compiled);
                any_errors |= compiled.has_errors();
            }
            Err(e) => {
                eprintln!("error: {e}");
                any_errors = true;
            }
        }
    }
    if any_errors {
        process::exit(1);
    }
}
