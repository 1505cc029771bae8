use std::fs::OpenOptions;

use simplelog::{ColorChoice, TermLogger, TerminalMode, WriteLogger};

use crate::config::{Config, ConfigError};

/// Installs the global logger described by `config`. Log lines go to stderr
/// unless `log_file` is set, in which case they are appended to that file.
pub fn init(config: &Config) -> Result<(), ConfigError> {
    let log_config = simplelog::ConfigBuilder::new()
        .set_target_level(log::LevelFilter::Error)
        .build();

    let installed = match &config.log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(ConfigError::Io)?;
            WriteLogger::init(config.log_level, log_config, file)
        }
        None => TermLogger::init(config.log_level, log_config, TerminalMode::Stderr, ColorChoice::Never),
    };

    // A logger installed earlier by the embedding program wins.
    if installed.is_err() {
        log::debug!("logger already installed; keeping it");
    }
    Ok(())
}
