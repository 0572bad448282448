//! Listener configuration, read from a TOML file
//!
//! Every section is optional and a missing file means "no filtering, default
//! output file".

use crate::codec::TextEncoding;
use crate::filter::FilterChain;
use crate::names::RelayNames;
use colored::Color;
use serde::Deserialize;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Default configuration file, looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "dbwin.toml";
/// Default output file
pub const DEFAULT_OUTPUT_FILE: &str = "dbwin-relay.log";
/// Default bound on joining the receive loop
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config '{}': {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to parse config '{}': {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Unknown color '{0}'")]
    Color(String),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub file: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            file: PathBuf::from(DEFAULT_OUTPUT_FILE),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    pub exclude: Vec<String>,
    pub include: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    pub foreground: Option<String>,
    pub background: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub encoding: TextEncoding,
    pub stop_timeout_secs: u64,
    /// Publish under `<prefix>_BUFFER_READY` etc. instead of the DBWIN names
    pub prefix: Option<String>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            encoding: TextEncoding::default(),
            stop_timeout_secs: DEFAULT_STOP_TIMEOUT.as_secs(),
            prefix: None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ListenerConfig {
    pub output: OutputConfig,
    pub filter: FilterConfig,
    pub display: DisplayConfig,
    pub relay: RelayConfig,
}

fn parse_color(name: Option<&str>) -> Result<Option<Color>, ConfigError> {
    match name.map(str::trim) {
        None | Some("") => Ok(None),
        Some(name) => name
            .parse::<Color>()
            .map(Some)
            .map_err(|_| ConfigError::Color(name.to_string())),
    }
}

impl ListenerConfig {
    /// Load from `path`; a missing or empty file yields the defaults
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        Self::parse(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        toml::from_str(content)
    }

    pub fn filter_chain(&self) -> FilterChain {
        FilterChain::new(
            self.filter.exclude.iter().cloned(),
            self.filter.include.iter().cloned(),
        )
    }

    pub fn relay_names(&self) -> RelayNames {
        match &self.relay.prefix {
            Some(prefix) => RelayNames::with_prefix(prefix),
            None => RelayNames::default(),
        }
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.relay.stop_timeout_secs)
    }

    pub fn foreground(&self) -> Result<Option<Color>, ConfigError> {
        parse_color(self.display.foreground.as_deref())
    }

    pub fn background(&self) -> Result<Option<Color>, ConfigError> {
        parse_color(self.display.background.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_is_default() {
        let dir = TempDir::new().unwrap();
        let config = ListenerConfig::load(&dir.path().join("nope.toml")).unwrap();
        assert_eq!(config.output.file, PathBuf::from(DEFAULT_OUTPUT_FILE));
        assert_eq!(config.filter_chain(), FilterChain::accept_all());
        assert_eq!(config.relay_names(), RelayNames::default());
        assert_eq!(config.stop_timeout(), DEFAULT_STOP_TIMEOUT);
        assert_eq!(config.relay.encoding, TextEncoding::Utf8);
    }

    #[test]
    fn test_load_full_config() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("dbwin.toml");
        std::fs::write(
            &path,
            r#"
[output]
file = "trace.log"

[filter]
exclude = ["noise", "  "]
include = ["INFO", "WARN"]

[display]
foreground = "green"
background = "black"

[relay]
encoding = "latin-1"
stop_timeout_secs = 3
prefix = "MYAPP"
"#,
        )
        .unwrap();

        let config = ListenerConfig::load(&path).unwrap();
        assert_eq!(config.output.file, PathBuf::from("trace.log"));
        assert_eq!(config.relay.encoding, TextEncoding::Latin1);
        assert_eq!(config.stop_timeout(), Duration::from_secs(3));
        assert_eq!(config.relay_names().buffer, "MYAPP_BUFFER");
        assert_eq!(config.foreground().unwrap(), Some(Color::Green));
        assert_eq!(config.background().unwrap(), Some(Color::Black));

        let chain = config.filter_chain();
        assert_eq!(chain.exclude_list(), ["noise".to_string()]);
        assert!(chain.accept("INFO: up"));
        assert!(!chain.accept("DEBUG: up"));
        assert!(!chain.accept("INFO: noise"));
    }

    #[test]
    fn test_wildcard_include() {
        let config = ListenerConfig::parse("[filter]\ninclude = [\"*\"]\n").unwrap();
        assert!(config.filter_chain().include_list().is_empty());
        assert!(config.filter_chain().accept("anything"));
    }

    #[test]
    fn test_partial_config_keeps_defaults() {
        let config = ListenerConfig::parse("[filter]\nexclude = [\"x\"]\n").unwrap();
        assert_eq!(config.output.file, PathBuf::from(DEFAULT_OUTPUT_FILE));
        assert_eq!(config.stop_timeout(), DEFAULT_STOP_TIMEOUT);
        assert_eq!(config.foreground().unwrap(), None);
    }

    #[test]
    fn test_bad_color() {
        let config = ListenerConfig::parse("[display]\nforeground = \"ultraviolet\"\n").unwrap();
        assert!(matches!(config.foreground(), Err(ConfigError::Color(_))));
    }

    #[test]
    fn test_bad_toml_reports_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.toml");
        std::fs::write(&path, "[filter\nexclude = 1").unwrap();
        let err = ListenerConfig::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("broken.toml"));
    }
}
