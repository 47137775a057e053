use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use fxconfig::CompilerChoice;

#[derive(Parser, Debug)]
#[command(
    name = "fxc",
    author,
    version,
    about = "Inspect and precompile GLSL effect files",
    arg_required_else_help = true
)]
pub struct Cli {
    /// Configuration file; defaults to `fx.toml` in the fxc config directory.
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Program cache directory. Overrides the configuration file.
    #[arg(long, global = true, value_name = "DIR")]
    pub cache_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Parse an effect and list its techniques, passes, and resources.
    Inspect(InspectArgs),
    /// Compile passes of an effect, storing the binaries in the cache.
    Compile(CompileArgs),
    /// Show or clear the program cache.
    Cache(CacheCommand),
}

#[derive(Args, Debug)]
pub struct SourceArgs {
    /// Effect file to load.
    #[arg(value_name = "FILE")]
    pub file: PathBuf,

    /// Additional include directory; searched before configured ones.
    #[arg(short = 'I', long = "include", value_name = "DIR")]
    pub include: Vec<PathBuf>,

    /// Define a macro (`NAME` or `NAME=VALUE`).
    #[arg(short = 'D', long = "define", value_name = "NAME[=VALUE]", value_parser = parse_define)]
    pub define: Vec<(String, String)>,

    /// Print machine-readable JSON instead of text.
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct InspectArgs {
    #[command(flatten)]
    pub source: SourceArgs,
}

#[derive(Args, Debug)]
pub struct CompileArgs {
    #[command(flatten)]
    pub source: SourceArgs,

    /// Only compile passes of this technique.
    #[arg(long, value_name = "NAME")]
    pub technique: Option<String>,

    /// Only compile passes with this name.
    #[arg(long, value_name = "NAME")]
    pub pass: Option<String>,

    /// Stage compiler backend: `naga` or `shaderc`.
    #[arg(long, value_name = "COMPILER", value_parser = parse_compiler)]
    pub compiler: Option<CompilerChoice>,

    /// Compile without touching the program cache.
    #[arg(long)]
    pub no_cache: bool,
}

#[derive(Args, Debug)]
pub struct CacheCommand {
    #[command(subcommand)]
    pub action: CacheAction,
}

#[derive(Subcommand, Debug)]
pub enum CacheAction {
    /// Print the resolved cache directory.
    Where,
    /// Remove every cached program.
    Clear,
}

pub fn parse() -> Cli {
    Cli::parse()
}

pub fn parse_define(value: &str) -> Result<(String, String), String> {
    let (name, value) = match value.split_once('=') {
        Some((name, value)) => (name.trim(), value),
        None => (value.trim(), ""),
    };
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) if first == '_' || first.is_ascii_alphabetic() => {
            chars.all(|ch| ch == '_' || ch.is_ascii_alphanumeric())
        }
        _ => false,
    };
    if !valid {
        return Err(format!("'{name}' is not a valid macro name"));
    }
    Ok((name.to_string(), value.to_string()))
}

pub fn parse_compiler(value: &str) -> Result<CompilerChoice, String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err("shader compiler must not be empty".to_string());
    }

    match trimmed.to_ascii_lowercase().as_str() {
        "naga" => Ok(CompilerChoice::Naga),
        "shaderc" => {
            if cfg!(feature = "shaderc") {
                Ok(CompilerChoice::Shaderc)
            } else {
                Err("shaderc support is not enabled in this build".to_string())
            }
        }
        _ => Err("unknown shader compiler (expected naga or shaderc)".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_define_variants() {
        assert_eq!(parse_define("QUALITY=2").unwrap(), ("QUALITY".into(), "2".into()));
        assert_eq!(parse_define("FAST").unwrap(), ("FAST".into(), String::new()));
        assert_eq!(parse_define("EXPR=a=b").unwrap(), ("EXPR".into(), "a=b".into()));
        assert!(parse_define("=1").is_err());
        assert!(parse_define("9LIVES").is_err());
    }

    #[test]
    fn parses_compiler_names() {
        assert_eq!(parse_compiler("NAGA").unwrap(), CompilerChoice::Naga);
        assert!(parse_compiler("glslang").is_err());
        assert_eq!(parse_compiler("shaderc").is_ok(), cfg!(feature = "shaderc"));
    }

    #[test]
    fn global_options_follow_subcommands() {
        let cli = Cli::try_parse_from([
            "fxc", "compile", "a.fx", "-I", "inc", "-D", "X=1", "--cache-dir", "/tmp/c", "--pass", "P0",
        ])
        .unwrap();
        assert_eq!(cli.cache_dir, Some(PathBuf::from("/tmp/c")));
        let Command::Compile(args) = cli.command else {
            panic!("expected compile");
        };
        assert_eq!(args.source.include, vec![PathBuf::from("inc")]);
        assert_eq!(args.source.define, vec![("X".to_string(), "1".to_string())]);
        assert_eq!(args.pass.as_deref(), Some("P0"));
    }
}
