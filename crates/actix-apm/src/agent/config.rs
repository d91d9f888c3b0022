/*  Copyright 2022-23, Juspay India Pvt Ltd
    This program is free software: you can redistribute it and/or modify it under the terms of the GNU Affero General Public License
    as published by the Free Software Foundation, either version 3 of the License, or (at your option) any later version. This program
    is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without even the implied warranty of MERCHANTABILITY
    or FITNESS FOR A PARTICULAR PURPOSE. See the GNU Affero General Public License for more details. You should have received a copy of
    the GNU Affero General Public License along with this program. If not, see <https://www.gnu.org/licenses/>.
*/

use super::error::ConfigError;
use error_stack::{IntoReport, Report, Result, ResultExt};
use serde::Deserialize;
use std::{str::FromStr, time::Duration};

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct AgentConfig {
    pub app_name: String,
    pub enabled: bool,
    /// Apdex threshold in milliseconds
    pub apdex_threshold_ms: u64,
    /// Status codes that never turn a transaction into an error
    pub ignore_status_codes: Vec<u16>,
    pub max_transaction_events: usize,
    pub max_user_attributes: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        AgentConfig {
            app_name: String::from("actix-app"),
            enabled: true,
            apdex_threshold_ms: 500,
            ignore_status_codes: Vec::new(),
            max_transaction_events: 10_000,
            max_user_attributes: 64,
        }
    }
}

impl AgentConfig {
    /// Load the configuration from `APM_*` environment variables.
    ///
    /// Unset variables keep their default. Variables that are set but do not
    /// parse are reported with the variable name attached.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = AgentConfig::default();

        if let Some(app_name) = lookup("APM_APP_NAME") {
            config.app_name = app_name;
        }
        if let Some(enabled) = lookup("APM_ENABLED") {
            config.enabled = parse("APM_ENABLED", &enabled)?;
        }
        if let Some(apdex) = lookup("APM_APDEX_T_MS") {
            config.apdex_threshold_ms = parse("APM_APDEX_T_MS", &apdex)?;
        }
        if let Some(codes) = lookup("APM_IGNORE_STATUS_CODES") {
            config.ignore_status_codes = codes
                .split(',')
                .map(str::trim)
                .filter(|code| !code.is_empty())
                .map(|code| parse("APM_IGNORE_STATUS_CODES", code))
                .collect::<Result<Vec<u16>, ConfigError>>()?;
        }
        if let Some(max_events) = lookup("APM_MAX_TRANSACTION_EVENTS") {
            config.max_transaction_events = parse("APM_MAX_TRANSACTION_EVENTS", &max_events)?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.app_name.trim().is_empty() {
            return Err(Report::new(ConfigError::MissingAppName));
        }
        if self.apdex_threshold_ms == 0 {
            return Err(Report::new(ConfigError::InvalidApdexThreshold));
        }
        Ok(())
    }

    pub fn apdex_threshold(&self) -> Duration {
        Duration::from_millis(self.apdex_threshold_ms)
    }
}

fn parse<T>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .parse::<T>()
        .into_report()
        .change_context(ConfigError::InvalidValue(key.to_string()))
        .attach_printable_lazy(|| format!("{key}={value}"))
}
