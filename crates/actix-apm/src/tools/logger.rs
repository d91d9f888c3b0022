/*  Copyright 2022-23, Juspay India Pvt Ltd
    This program is free software: you can redistribute it and/or modify it under the terms of the GNU Affero General Public License
    as published by the Free Software Foundation, either version 3 of the License, or (at your option) any later version. This program
    is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without even the implied warranty of MERCHANTABILITY
    or FITNESS FOR A PARTICULAR PURPOSE. See the GNU Affero General Public License for more details. You should have received a copy of
    the GNU Affero General Public License along with this program. If not, see <https://www.gnu.org/licenses/>.
*/

use serde::Deserialize;
use thiserror::Error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_bunyan_formatter::{BunyanFormattingLayer, JsonStorageLayer};
use tracing_log::LogTracer;
use tracing_subscriber::{layer::SubscriberExt, EnvFilter, Registry};

#[derive(Error, Debug)]
pub enum LoggerError {
    #[error("Invalid log filter : {0}")]
    InvalidFilter(String),

    #[error("Failed to install log bridge : {0}")]
    LogTracer(String),

    #[error("Failed to set global subscriber : {0}")]
    Subscriber(String),
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggerConfig {
    pub service_name: String,
    /// `EnvFilter` directive, e.g. `info,actix_apm=debug`
    pub level: String,
    pub log_to_file: bool,
    pub log_file_dir: String,
    pub log_file_prefix: String,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        LoggerConfig {
            service_name: String::from("actix-app"),
            level: String::from("info"),
            log_to_file: false,
            log_file_dir: String::from("logs"),
            log_file_prefix: String::from("service.log"),
        }
    }
}

/// Builds the env filter, letting `RUST_LOG` override the configured level.
pub fn env_filter(config: &LoggerConfig) -> Result<EnvFilter, LoggerError> {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|err| LoggerError::InvalidFilter(err.to_string()))
}

/// Installs the global subscriber: bunyan JSON lines on stdout, or an hourly
/// rolling file when `log_to_file` is set. `log` records are bridged in.
///
/// Keep the returned guard alive for as long as logs should be flushed.
pub fn setup_tracing(config: LoggerConfig) -> Result<WorkerGuard, LoggerError> {
    let filter = env_filter(&config)?;

    let (writer, guard) = if config.log_to_file {
        tracing_appender::non_blocking(tracing_appender::rolling::hourly(
            &config.log_file_dir,
            &config.log_file_prefix,
        ))
    } else {
        tracing_appender::non_blocking(std::io::stdout())
    };

    let subscriber = Registry::default()
        .with(filter)
        .with(JsonStorageLayer)
        .with(BunyanFormattingLayer::new(config.service_name, writer));

    LogTracer::init().map_err(|err| LoggerError::LogTracer(err.to_string()))?;
    tracing::subscriber::set_global_default(subscriber)
        .map_err(|err| LoggerError::Subscriber(err.to_string()))?;

    Ok(guard)
}
