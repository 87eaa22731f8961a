use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Environment variable holding the model API credential.
pub const API_KEY_ENV: &str = "ANTHROPIC_API_KEY";

/// Used when no credential is set, so the failure surfaces on the first model call.
pub const PLACEHOLDER_API_KEY: &str = "your-key-here";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("could not read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("could not parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AskqlConfig {
    pub ai: AIConfig,
    pub data: DataConfig,
    /// Upper bound on tool round-trips within one turn. `0` disables the cap.
    pub max_tool_rounds: usize,
    pub mcp: Vec<McpServer>,
}

impl Default for AskqlConfig {
    fn default() -> Self {
        Self {
            ai: AIConfig::default(),
            data: DataConfig::default(),
            max_tool_rounds: 25,
            mcp: vec![],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AIConfig {
    pub model: String,
    pub url: String,
    pub max_tokens: u32,
}

impl Default for AIConfig {
    fn default() -> Self {
        Self {
            model: "claude-3-5-sonnet-20240620".to_string(),
            url: "https://api.anthropic.com".to_string(),
            max_tokens: 1024,
        }
    }
}

impl AIConfig {
    /// The API credential from the environment, or the placeholder when unset.
    #[must_use]
    pub fn api_key() -> String {
        std::env::var(API_KEY_ENV)
            .ok()
            .filter(|key| !key.trim().is_empty())
            .unwrap_or_else(|| PLACEHOLDER_API_KEY.to_string())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    pub table_name: String,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            table_name: "transactions".to_string(),
        }
    }
}

/// An external tool server spoken to over stdio.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct McpServer {
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl AskqlConfig {
    /// `~/.config/askql/config.toml`, if `HOME` is set.
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        let home_dir = std::env::var("HOME").ok()?;
        Some(PathBuf::from(format!("{home_dir}/.config/askql/config.toml")))
    }

    pub fn get_or_default() -> Self {
        let Some(path) = Self::default_path() else {
            return AskqlConfig::default();
        };

        if !path.exists() {
            return AskqlConfig::default();
        }

        Self::load(&path).unwrap_or_else(|err| {
            tracing::warn!(%err, "falling back to default configuration");
            AskqlConfig::default()
        })
    }

    /// Reads a config file, reporting missing or malformed files.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the file cannot be read or is not valid TOML.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let config_file = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&config_file).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Parses TOML text; absent keys keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns the TOML error when the text is malformed.
    pub fn parse(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let conf = AskqlConfig::parse("").unwrap();
        assert_eq!(conf.ai.max_tokens, 1024);
        assert_eq!(conf.data.table_name, "transactions");
        assert_eq!(conf.max_tool_rounds, 25);
        assert!(conf.mcp.is_empty());
    }

    #[test]
    fn partial_sections_keep_defaults() {
        let conf = AskqlConfig::parse(
            r#"
max_tool_rounds = 3

[ai]
model = "claude-sonnet-4-20250514"

[[mcp]]
name = "files"
command = "npx"
args = ["-y", "@modelcontextprotocol/server-filesystem", "/tmp"]
"#,
        )
        .unwrap();

        assert_eq!(conf.ai.model, "claude-sonnet-4-20250514");
        assert_eq!(conf.ai.url, "https://api.anthropic.com");
        assert_eq!(conf.max_tool_rounds, 3);
        assert_eq!(conf.mcp.len(), 1);
        assert_eq!(conf.mcp[0].args.len(), 3);
    }

    #[test]
    fn malformed_file_is_an_error() {
        assert!(AskqlConfig::parse("[ai\nmodel = ").is_err());
    }

    #[test]
    fn missing_file_reports_path() {
        let err = AskqlConfig::load(Path::new("/nonexistent/askql.toml")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/askql.toml"));
    }
}
