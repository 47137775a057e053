use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use fxlang::{MacroSet, ParseOptions, PathResolver};
use serde::{Deserialize, Serialize};

pub const CONFIG_VERSION: u32 = 1;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CompilerChoice {
    #[default]
    Naga,
    Shaderc,
}

/// Settings shared by every tool that drives the effect runtime.
///
/// ```toml
/// version = 1
/// cache_dir = "$XDG_CACHE_HOME/fx"
/// include_paths = ["include", "~/shaders/common"]
/// compiler = "naga"
/// validation = true
///
/// [macros]
/// QUALITY = "2"
/// USE_SHADOWS = ""
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct FxConfig {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<String>,
    #[serde(default)]
    pub include_paths: Vec<String>,
    #[serde(default)]
    pub macros: BTreeMap<String, String>,
    #[serde(default)]
    pub compiler: CompilerChoice,
    #[serde(default = "default_validation")]
    pub validation: bool,
}

impl Default for FxConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            cache_dir: None,
            include_paths: Vec::new(),
            macros: BTreeMap::new(),
            compiler: CompilerChoice::default(),
            validation: true,
        }
    }
}

/// `FxConfig` with every path expanded and made absolute.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedConfig {
    pub cache_dir: Option<PathBuf>,
    pub include_paths: Vec<PathBuf>,
    pub macros: MacroSet,
    pub compiler: CompilerChoice,
    pub validation: bool,
}

impl ResolvedConfig {
    pub fn parse_options(&self) -> ParseOptions {
        ParseOptions {
            include_paths: self.include_paths.clone(),
            macros: self.macros.clone(),
        }
    }
}

fn default_version() -> u32 {
    CONFIG_VERSION
}

fn default_validation() -> bool {
    true
}

impl FxConfig {
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let raw: FxConfig = toml::from_str(input)?;
        raw.validate()?;
        Ok(raw)
    }

    /// Reads and validates a config file. Relative paths inside it are later
    /// resolved against the file's directory by `resolve_for`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.version != CONFIG_VERSION {
            return Err(ConfigError::Invalid(format!(
                "unsupported config version {}; expected {CONFIG_VERSION}",
                self.version
            )));
        }

        for (index, path) in self.include_paths.iter().enumerate() {
            if path.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "include_paths[{index}] may not be empty"
                )));
            }
        }

        for name in self.macros.keys() {
            if !is_macro_name(name) {
                return Err(ConfigError::Invalid(format!(
                    "macro name '{name}' is not an identifier"
                )));
            }
        }

        Ok(())
    }

    pub fn macro_set(&self) -> MacroSet {
        let mut set = MacroSet::new();
        for (name, value) in &self.macros {
            set.define(name.as_str(), value.as_str());
        }
        set
    }

    /// Expands `$VAR` and `~` in every path and anchors relative paths at
    /// `resolver`'s base. An empty `cache_dir` stays disabled.
    pub fn resolve(&self, resolver: &PathResolver) -> Result<ResolvedConfig, ConfigError> {
        let cache_dir = match self.cache_dir.as_deref() {
            Some(dir) if !dir.trim().is_empty() => Some(
                resolver
                    .resolve(dir)
                    .map_err(|err| ConfigError::Invalid(format!("cache_dir: {err:#}")))?,
            ),
            _ => None,
        };
        let include_paths = resolver
            .resolve_all(&self.include_paths)
            .map_err(|err| ConfigError::Invalid(format!("include_paths: {err:#}")))?;

        Ok(ResolvedConfig {
            cache_dir,
            include_paths,
            macros: self.macro_set(),
            compiler: self.compiler,
            validation: self.validation,
        })
    }

    /// `resolve` with paths anchored at the directory holding `config_path`.
    pub fn resolve_for(&self, config_path: &Path) -> Result<ResolvedConfig, ConfigError> {
        let base = config_path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        self.resolve(&PathResolver::with_base(base))
    }
}

fn is_macro_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first == '_' || first.is_ascii_alphabetic() => {
            chars.all(|ch| ch == '_' || ch.is_ascii_alphanumeric())
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
version = 1
cache_dir = "cache/programs"
include_paths = ["include", "/opt/fx/include"]
compiler = "shaderc"
validation = false

[macros]
QUALITY = "2"
USE_SHADOWS = ""
"#;

    #[test]
    fn parses_sample_config() {
        let config = FxConfig::from_toml_str(SAMPLE).expect("parse config");
        assert_eq!(config.version, 1);
        assert_eq!(config.cache_dir.as_deref(), Some("cache/programs"));
        assert_eq!(config.include_paths.len(), 2);
        assert_eq!(config.compiler, CompilerChoice::Shaderc);
        assert!(!config.validation);

        let macros = config.macro_set();
        assert_eq!(macros.get("QUALITY"), Some("2"));
        assert_eq!(macros.get("USE_SHADOWS"), Some(""));
    }

    #[test]
    fn empty_config_uses_defaults() {
        let config = FxConfig::from_toml_str("").unwrap();
        assert_eq!(config.version, CONFIG_VERSION);
        assert_eq!(config.compiler, CompilerChoice::Naga);
        assert!(config.validation);
        assert!(config.cache_dir.is_none());
        assert!(config.macros.is_empty());
    }

    #[test]
    fn rejects_unsupported_version() {
        let err = FxConfig::from_toml_str("version = 2").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_bad_macro_names_and_unknown_keys() {
        let err = FxConfig::from_toml_str("[macros]\n\"2FAST\" = \"1\"").unwrap_err();
        assert!(err.to_string().contains("2FAST"));

        let err = FxConfig::from_toml_str("cache = \"x\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));

        let err = FxConfig::from_toml_str("compiler = \"glslang\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn rejects_empty_include_path() {
        let err = FxConfig::from_toml_str("include_paths = [\"a\", \" \"]").unwrap_err();
        assert!(err.to_string().contains("include_paths[1]"));
    }

    #[test]
    fn resolves_paths_against_config_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fx.toml");
        fs::write(&path, SAMPLE).unwrap();

        let config = FxConfig::load(&path).unwrap();
        let resolved = config.resolve_for(&path).unwrap();
        assert_eq!(
            resolved.cache_dir.as_deref(),
            Some(dir.path().join("cache/programs").as_path())
        );
        assert_eq!(
            resolved.include_paths,
            vec![dir.path().join("include"), PathBuf::from("/opt/fx/include")]
        );

        let options = resolved.parse_options();
        assert_eq!(options.include_paths, resolved.include_paths);
        assert_eq!(options.macros.get("QUALITY"), Some("2"));
    }

    #[test]
    fn empty_cache_dir_stays_disabled() {
        let config = FxConfig::from_toml_str("cache_dir = \"\"").unwrap();
        let resolved = config.resolve(&PathResolver::with_base("/work")).unwrap();
        assert_eq!(resolved.cache_dir, None);
    }

    #[test]
    fn missing_file_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let err = FxConfig::load(&dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
        assert!(err.to_string().contains("absent.toml"));
    }
}
