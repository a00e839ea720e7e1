use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::core::domain::Language;

pub const CONFIG_ENV: &str = "CODERUNNER_CONFIG";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

#[derive(Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct Config {
    pub address: String,
    pub port: u16,
    pub workspace_root: PathBuf,
    pub toolchains: Toolchains,
    pub languages: Vec<Language>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            address: "0.0.0.0".to_string(),
            port: 3001,
            workspace_root: std::env::temp_dir().join("coderunner"),
            toolchains: Toolchains::default(),
            languages: Language::ALL.to_vec(),
        }
    }
}

#[derive(Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct Toolchains {
    pub shell: PathBuf,
    pub gcc: PathBuf,
    pub gxx: PathBuf,
    pub javac: PathBuf,
    pub java: PathBuf,
}

impl Default for Toolchains {
    fn default() -> Self {
        Toolchains {
            shell: "/bin/sh".into(),
            gcc: "gcc".into(),
            gxx: "g++".into(),
            javac: "javac".into(),
            java: "java".into(),
        }
    }
}

impl Config {
    /// Reads the file named by the first CLI argument or `CODERUNNER_CONFIG`.
    /// Without either, the defaults are used.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::args()
            .nth(1)
            .or_else(|| std::env::var(CONFIG_ENV).ok());

        match path {
            Some(path) => Self::from_file(path),
            None => Ok(Self::default()),
        }
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.into(),
            source,
        })?;
        Self::parse(&raw).map_err(|source| ConfigError::Parse {
            path: path.into(),
            source,
        })
    }

    pub fn parse(raw: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.port, 3001);
        assert_eq!(config.languages.len(), 3);
    }

    #[test]
    fn test_partial_config_overrides() {
        let config = Config::parse(
            r#"
            port = 8080
            workspace_root = "/srv/coderunner"
            languages = ["c", "c++"]

            [toolchains]
            gxx = "/usr/bin/g++-13"
            "#,
        )
        .unwrap();

        assert_eq!(config.port, 8080);
        assert_eq!(config.address, "0.0.0.0");
        assert_eq!(config.workspace_root, PathBuf::from("/srv/coderunner"));
        assert_eq!(config.languages, vec![Language::C, Language::Cpp]);
        assert_eq!(config.toolchains.gxx, PathBuf::from("/usr/bin/g++-13"));
        assert_eq!(config.toolchains.gcc, PathBuf::from("gcc"));
    }

    #[test]
    fn test_unknown_language_is_rejected() {
        assert!(Config::parse(r#"languages = ["python"]"#).is_err());
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let result = Config::from_file("/nonexistent/coderunner.toml");
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }
}
