use anyhow::{Context, Result};
use serde::Deserialize;
use std::{fs::File, str::FromStr, sync::Mutex};
use tracing::Level;
use tracing_subscriber::{
    filter::{EnvFilter, LevelFilter},
    fmt::{self, writer::MakeWriterExt},
    prelude::*,
    Registry,
};

/// Defines the format for log messages.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum LogFormat {
    Json,
    #[default]
    Plain,
}

/// Defines the destination for log output.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum LogOutput {
    #[default]
    Stdout,
    File,
}

/// Logging configuration.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "kebab-case", default)]
pub struct LogConfig {
    /// Log level, e.g., "info", "debug", "trace".
    pub level: String,
    /// Extra per-target directives in `EnvFilter` syntax, e.g.
    /// `"vrf_oracle_broadcaster=debug,sled=warn"`.
    pub directives: Option<String>,
    pub format: LogFormat,
    pub output: LogOutput,
    /// Path to the log file, required if output is "file".
    pub file_path: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            directives: None,
            format: LogFormat::Plain,
            output: LogOutput::Stdout,
            file_path: None,
        }
    }
}

impl LogConfig {
    fn level(&self) -> Level {
        Level::from_str(&self.level).unwrap_or(Level::INFO)
    }

    /// The per-target filter; the configured level applies to every target
    /// the directives do not mention.
    fn env_filter(&self) -> Result<EnvFilter> {
        let default = LevelFilter::from_level(self.level()).to_string();
        let filter = match self.directives.as_deref() {
            Some(directives) => format!("{},{}", default, directives),
            None => default,
        };
        EnvFilter::builder()
            .parse(&filter)
            .with_context(|| format!("Invalid log directives '{}'", filter))
    }
}

/// Installs the global subscriber. Fails if one is already installed.
pub fn init(config: &LogConfig) -> Result<()> {
    let log_level = config.level();
    let subscriber = Registry::default().with(config.env_filter()?);

    match config.output {
        LogOutput::File => {
            let file_path = config
                .file_path
                .as_deref()
                .ok_or_else(|| anyhow::anyhow!("Log output is 'file' but 'file_path' is not specified"))?;
            let log_file = File::create(file_path)
                .with_context(|| format!("Failed to create log file '{}'", file_path))?;
            let file_writer = Mutex::new(log_file).with_max_level(log_level);

            match config.format {
                LogFormat::Json => subscriber
                    .with(fmt::layer().with_writer(file_writer).json())
                    .try_init()?,
                LogFormat::Plain => subscriber
                    .with(fmt::layer().with_writer(file_writer).with_ansi(false))
                    .try_init()?,
            }
        }
        LogOutput::Stdout => {
            let stdout_writer = std::io::stdout.with_max_level(log_level);
            match config.format {
                LogFormat::Json => subscriber
                    .with(fmt::layer().with_writer(stdout_writer).json())
                    .try_init()?,
                LogFormat::Plain => subscriber
                    .with(fmt::layer().with_writer(stdout_writer).pretty())
                    .try_init()?,
            }
        }
    };

    Ok(())
}
