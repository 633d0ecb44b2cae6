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

//! Structured operator log lines.
//!
//! Every line names the emitting component. Lines written inside a reconcile
//! scope (see [`tracing::with_span`]) also carry the reconciled object and the
//! scope's trace and span ids. Text output is `key=value` pairs; JSON output is
//! one object per line with the same keys.

use crate::appforge::observability::tracing;
use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};
#[cfg(not(test))]
use std::io::{self, Write};
use std::str::FromStr;
use std::sync::atomic::{AtomicU8, Ordering};
#[cfg(test)]
use std::sync::{Mutex, OnceLock};

const SERVICE: &str = "appforge";

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum LogFormat {
    Text,
    Json,
}

impl LogFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            LogFormat::Text => "text",
            LogFormat::Json => "json",
        }
    }
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "" | "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unsupported log format '{other}', expected text or json")),
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => LogLevel::Debug,
            1 => LogLevel::Info,
            2 => LogLevel::Warn,
            _ => LogLevel::Error,
        }
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "debug" => Ok(LogLevel::Debug),
            "" | "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            other => Err(format!("unsupported log level '{other}'")),
        }
    }
}

static FORMAT: AtomicU8 = AtomicU8::new(0);
static MIN_LEVEL: AtomicU8 = AtomicU8::new(LogLevel::Info as u8);

pub fn set_log_format(format: LogFormat) {
    FORMAT.store(format as u8, Ordering::Relaxed);
}

pub fn current_log_format() -> LogFormat {
    if FORMAT.load(Ordering::Relaxed) == LogFormat::Json as u8 {
        LogFormat::Json
    } else {
        LogFormat::Text
    }
}

/// Lines below `level` are dropped.
pub fn set_log_level(level: LogLevel) {
    MIN_LEVEL.store(level as u8, Ordering::Relaxed);
}

pub fn current_log_level() -> LogLevel {
    LogLevel::from_u8(MIN_LEVEL.load(Ordering::Relaxed))
}

/// Builds the ordered field list of one line. Fixed fields come first and
/// cannot be overridden by caller metadata.
fn fields(
    level: LogLevel,
    component: &str,
    message: &str,
    metadata: &[(&str, &str)],
) -> Vec<(String, String)> {
    let mut fields: Vec<(String, String)> = vec![
        (
            "ts".into(),
            Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        ),
        ("level".into(), level.as_str().into()),
        ("service".into(), SERVICE.into()),
        ("component".into(), component.into()),
        ("msg".into(), message.into()),
    ];
    if let Some(scope) = tracing::current_context() {
        fields.push(("object".into(), scope.object().into()));
        fields.push(("trace_id".into(), scope.trace_id().into()));
        fields.push(("span_id".into(), scope.span_id().into()));
    }
    for (key, value) in metadata {
        if key.is_empty() || fields.iter().any(|(taken, _)| taken == key) {
            continue;
        }
        fields.push(((*key).into(), (*value).into()));
    }
    fields
}

/// Bare when the value is a single token, otherwise a JSON string literal.
fn text_value(value: &str) -> String {
    let bare = !value.is_empty()
        && !value
            .chars()
            .any(|c| c.is_whitespace() || c.is_control() || matches!(c, '"' | '\\' | '=' | ','));
    if bare {
        value.to_string()
    } else {
        Value::String(value.to_string()).to_string()
    }
}

fn render(format: LogFormat, fields: Vec<(String, String)>) -> String {
    match format {
        LogFormat::Text => fields
            .iter()
            .map(|(key, value)| format!("{key}={}", text_value(value)))
            .collect::<Vec<_>>()
            .join(" "),
        LogFormat::Json => {
            let object: Map<String, Value> = fields
                .into_iter()
                .map(|(key, value)| (key, Value::String(value)))
                .collect();
            Value::Object(object).to_string()
        }
    }
}

pub fn log_event(level: LogLevel, component: &str, message: &str, metadata: &[(&str, &str)]) {
    if level < current_log_level() {
        return;
    }
    let line = render(
        current_log_format(),
        fields(level, component, message, metadata),
    );
    emit(level, line);
}

pub fn log_debug(component: &str, message: &str, metadata: &[(&str, &str)]) {
    log_event(LogLevel::Debug, component, message, metadata);
}

pub fn log_info(component: &str, message: &str, metadata: &[(&str, &str)]) {
    log_event(LogLevel::Info, component, message, metadata);
}

pub fn log_warn(component: &str, message: &str, metadata: &[(&str, &str)]) {
    log_event(LogLevel::Warn, component, message, metadata);
}

pub fn log_error(component: &str, message: &str, metadata: &[(&str, &str)]) {
    log_event(LogLevel::Error, component, message, metadata);
}

// warnings and errors go to stderr
#[cfg(not(test))]
fn emit(level: LogLevel, line: String) {
    let result = if level >= LogLevel::Warn {
        writeln!(io::stderr().lock(), "{line}")
    } else {
        writeln!(io::stdout().lock(), "{line}")
    };
    if let Err(err) = result {
        let _ = writeln!(io::stderr().lock(), "{SERVICE}: dropped log line: {err}");
    }
}

#[cfg(test)]
fn emit(level: LogLevel, line: String) {
    captured()
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .push((level, line));
}

#[cfg(test)]
fn captured() -> &'static Mutex<Vec<(LogLevel, String)>> {
    static LINES: OnceLock<Mutex<Vec<(LogLevel, String)>>> = OnceLock::new();
    LINES.get_or_init(|| Mutex::new(Vec::new()))
}

/// Drains the lines captured so far by unit tests.
#[cfg(test)]
pub(crate) fn take_test_logs() -> Vec<(LogLevel, String)> {
    std::mem::take(
        &mut *captured()
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()),
    )
}
