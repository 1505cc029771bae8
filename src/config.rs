use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::PathBuf;

use log::LevelFilter;
use thiserror::Error;

/// Environment variable naming the config file read by `load_from_env`.
pub const CONFIG_ENV_VAR: &str = "TINY_SHELL_CONFIG";

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Prefix for user-visible diagnostics.
    pub shell_name: String,
    pub log_level: LevelFilter,
    pub log_file: Option<PathBuf>,
    /// Seeded into the initial execution context.
    pub env_vars: BTreeMap<String, String>,
}

impl Default for Config {
    fn default() -> Self {
        ConfigLoader::default_config()
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn default_config() -> Config {
        Config {
            shell_name: "tiny-shell".to_string(),
            log_level: LevelFilter::Warn,
            log_file: None,
            env_vars: BTreeMap::new(),
        }
    }

    /// Reads the file named by `TINY_SHELL_CONFIG`, or returns the defaults
    /// when the variable is unset.
    pub fn load_from_env() -> Result<Config, ConfigError> {
        match std::env::var_os(CONFIG_ENV_VAR) {
            Some(path) => Self::load_from_file(path),
            None => Ok(Self::default_config()),
        }
    }

    pub fn load_from_file<P: AsRef<std::path::Path>>(path: P) -> Result<Config, ConfigError> {
        let file = File::open(path).map_err(ConfigError::Io)?;
        let mut src = String::new();
        for line in BufReader::new(file).lines() {
            let line = line.map_err(ConfigError::Io)?;
            src.push_str(&line);
            src.push('\n');
        }
        Self::load_from_str(&src)
    }

    pub fn load_from_str(src: &str) -> Result<Config, ConfigError> {
        let mut config = Self::default_config();

        for (lineno, line) in src.lines().enumerate() {
            let lineno = lineno + 1;
            let trimmed = line.trim_start();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            let Some((key, value)) = trimmed.split_once('=') else {
                return Err(ConfigError::Parse { lineno, msg: format!("no '=' found: {}", line) });
            };
            let key = key.trim();

            match key {
                "shell_name" => config.shell_name = value.trim().to_string(),
                "log_level" => {
                    config.log_level = value.trim().parse::<LevelFilter>().map_err(|_| ConfigError::Parse {
                        lineno,
                        msg: format!("invalid log level: {}", value.trim()),
                    })?;
                }
                "log_file" => config.log_file = Some(PathBuf::from(value.trim())),
                k if k.starts_with("env.") => {
                    let var = k.trim_start_matches("env.");
                    if var.is_empty() {
                        return Err(ConfigError::Parse { lineno, msg: "empty variable name".to_string() });
                    }
                    // Values are taken verbatim so they may carry spaces.
                    config.env_vars.insert(var.to_string(), value.to_string());
                }
                _ => return Err(ConfigError::Parse { lineno, msg: format!("unknown key: {}", key) }),
            }
        }

        Ok(config)
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[source] io::Error),
    #[error("line {lineno}: {msg}")]
    Parse { lineno: usize, msg: String },
}
