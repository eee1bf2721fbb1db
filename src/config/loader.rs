//! Configuration loading from disk.

use std::fs;
use std::path::Path;

use crate::config::schema::ProxyConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
    Validation(Vec<ValidationError>),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Parse(e) => write!(f, "Parse error: {}", e),
            ConfigError::Validation(errors) => {
                write!(f, "Validation failed: ")?;
                for (i, err) in errors.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", err)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Read and parse a TOML file without validating it.
pub fn read_config(path: &Path) -> Result<ProxyConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(ConfigError::Io)?;
    toml::from_str(&content).map_err(ConfigError::Parse)
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<ProxyConfig, ConfigError> {
    let config = read_config(path)?;
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp(name: &str, content: &str) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!("prefix-proxy-{}-{}.toml", name, std::process::id()));
        let mut file = fs::File::create(&path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        path
    }

    #[test]
    fn loads_valid_file() {
        let path = write_temp("valid", "[listener]\nbind_address = \"127.0.0.1:9999\"\n");
        let config = load_config(&path).unwrap();
        assert_eq!(config.listener.bind_address, "127.0.0.1:9999");
        fs::remove_file(path).ok();
    }

    #[test]
    fn reports_parse_and_validation_errors() {
        let bad_toml = write_temp("parse", "[listener\n");
        assert!(matches!(load_config(&bad_toml), Err(ConfigError::Parse(_))));
        fs::remove_file(bad_toml).ok();

        let invalid = write_temp("invalid", "[timeouts]\nrequest_secs = 0\n");
        assert!(matches!(load_config(&invalid), Err(ConfigError::Validation(e)) if e.len() == 1));
        fs::remove_file(invalid).ok();
    }

    #[test]
    fn missing_file_is_io_error() {
        let path = Path::new("/nonexistent/prefix-proxy.toml");
        assert!(matches!(load_config(path), Err(ConfigError::Io(_))));
    }
}
