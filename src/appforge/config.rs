/*
 * Copyright (C) 2024 The Appforge Authors
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 * http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

use crate::appforge::logger::{set_log_format, set_log_level, LogFormat, LogLevel};
use crate::appforge::observability::tracing;
use std::env;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Operator settings read from the process environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Config {
    LabelDomain,
    LogFormat,
    LogLevel,
    ConfigMountPath,
}

impl Config {
    /// Returns the environment variable backing the setting.
    pub fn env_var(&self) -> &'static str {
        match self {
            Config::LabelDomain => "APPFORGE_LABEL_DOMAIN",
            Config::LogFormat => "APPFORGE_LOG_FORMAT",
            Config::LogLevel => "APPFORGE_LOG_LEVEL",
            Config::ConfigMountPath => "APPFORGE_CONFIG_MOUNT_PATH",
        }
    }

    pub fn default_value(&self) -> &'static str {
        match self {
            Config::LabelDomain => "apps.appforge.io",
            Config::LogFormat => "text",
            Config::LogLevel => "info",
            Config::ConfigMountPath => "/workspace/config",
        }
    }

    /// Returns the effective value, from the environment when set and non-blank.
    pub fn get(&self) -> String {
        env::var(self.env_var())
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| self.default_value().to_string())
    }
}

#[derive(Debug)]
pub struct ConfigError {
    setting: Config,
    message: String,
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid {}: {}", self.setting.env_var(), self.message)
    }
}

impl Error for ConfigError {}

/// Resolved operator settings shared by every reconciler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperatorSettings {
    pub label_domain: String,
    pub log_format: LogFormat,
    pub log_level: LogLevel,
    pub config_mount_path: String,
}

impl Default for OperatorSettings {
    fn default() -> Self {
        Self {
            label_domain: Config::LabelDomain.default_value().to_string(),
            log_format: LogFormat::Text,
            log_level: LogLevel::Info,
            config_mount_path: Config::ConfigMountPath.default_value().to_string(),
        }
    }
}

impl OperatorSettings {
    pub fn from_env() -> Result<Self, ConfigError> {
        let label_domain = Config::LabelDomain.get();
        if !label_domain
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-'))
        {
            return Err(ConfigError {
                setting: Config::LabelDomain,
                message: format!("'{label_domain}' is not a DNS subdomain"),
            });
        }

        let log_format = Config::LogFormat
            .get()
            .parse::<LogFormat>()
            .map_err(|message| ConfigError {
                setting: Config::LogFormat,
                message,
            })?;

        let log_level = Config::LogLevel
            .get()
            .parse::<LogLevel>()
            .map_err(|message| ConfigError {
                setting: Config::LogLevel,
                message,
            })?;

        let config_mount_path = Config::ConfigMountPath.get();
        if !config_mount_path.starts_with('/') {
            return Err(ConfigError {
                setting: Config::ConfigMountPath,
                message: format!("'{config_mount_path}' must be an absolute path"),
            });
        }

        Ok(Self {
            label_domain,
            log_format,
            log_level,
            config_mount_path: config_mount_path.trim_end_matches('/').to_string(),
        })
    }

    /// Label carried by every child to point back at its owning application.
    pub fn owner_label(&self) -> String {
        format!("{}/application", self.label_domain)
    }

    pub fn config_checksum_annotation(&self) -> String {
        format!("{}/config-checksum", self.label_domain)
    }

    /// Applies the log format and level and installs the span subscriber.
    pub fn init_logging(&self) {
        set_log_format(self.log_format);
        set_log_level(self.log_level);
        tracing::init();
    }
}
