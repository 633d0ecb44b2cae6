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

use std::collections::{BTreeMap, HashMap};

/// First line of every rendered properties file.
pub const PROPERTIES_HEADER: &str = "# Generated by appforge. DO NOT EDIT.";

/// Key under which the rendered file is stored in the generated ConfigMap.
pub const PROPERTIES_FILE: &str = "application.properties";

/// Application properties collected while opinions run. User declared
/// entries seed the map; opinions only fill in keys that are still absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplicationProperties {
    entries: BTreeMap<String, String>,
}

impl ApplicationProperties {
    pub fn from_declared(declared: &HashMap<String, String>) -> Self {
        Self {
            entries: declared
                .iter()
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(key.into(), value.into());
    }

    /// Inserts `value` only when `key` is absent. Returns the effective value.
    pub fn set_default(&mut self, key: &str, value: impl Into<String>) -> &str {
        self.entries
            .entry(key.to_string())
            .or_insert_with(|| value.into())
            .as_str()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_str()))
    }

    pub fn to_map(&self) -> HashMap<String, String> {
        self.entries
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }

    /// Renders a `.properties` file: the generated header, then one
    /// `key = value` line per entry in key order. Keys and values are escaped
    /// so every entry stays on its own line.
    pub fn to_properties_file(&self) -> String {
        let mut rendered = String::from(PROPERTIES_HEADER);
        rendered.push('\n');
        for (key, value) in &self.entries {
            escape_into(&mut rendered, key, true);
            rendered.push_str(" = ");
            escape_into(&mut rendered, value, false);
            rendered.push('\n');
        }
        rendered
    }

    /// Renders the entries as JVM system property flags in key order.
    pub fn java_opts(&self) -> String {
        self.entries
            .iter()
            .map(|(key, value)| format!("-D{key}={value}"))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// `.properties` escaping: separators, comment markers and control
/// characters are backslash escaped. Spaces are escaped anywhere in a key and
/// only in leading position in a value.
fn escape_into(out: &mut String, text: &str, is_key: bool) {
    for (index, ch) in text.chars().enumerate() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\x0c' => out.push_str("\\f"),
            '=' | ':' | '#' | '!' => {
                out.push('\\');
                out.push(ch);
            }
            ' ' if is_key || index == 0 => out.push_str("\\ "),
            _ => out.push(ch),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn declared(entries: &[(&str, &str)]) -> ApplicationProperties {
        let map: HashMap<String, String> = entries
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        ApplicationProperties::from_declared(&map)
    }

    #[test]
    fn properties_file_is_sorted_with_header() {
        let properties = declared(&[("foo.bar", "1"), ("alpha", "2")]);
        assert_eq!(
            properties.to_properties_file(),
            "# Generated by appforge. DO NOT EDIT.\nalpha = 2\nfoo.bar = 1\n"
        );
        assert_eq!(
            ApplicationProperties::default().to_properties_file(),
            "# Generated by appforge. DO NOT EDIT.\n"
        );
    }

    #[test]
    fn declared_entries_cannot_inject_lines() {
        let properties = declared(&[
            ("spring.datasource.url", "jdbc:mysql://db/orders"),
            ("greeting", "hi\nserver.port = 1"),
            ("odd key=x", " padded"),
        ]);
        assert_eq!(
            properties.to_properties_file(),
            "# Generated by appforge. DO NOT EDIT.\n\
             greeting = hi\\nserver.port \\= 1\n\
             odd\\ key\\=x = \\ padded\n\
             spring.datasource.url = jdbc\\:mysql\\://db/orders\n"
        );
        assert_eq!(properties.to_properties_file().lines().count(), 4);
    }

    #[test]
    fn set_default_keeps_declared_values() {
        let mut properties = declared(&[("server.port", "9090")]);
        assert_eq!(properties.set_default("server.port", "8080"), "9090");
        assert_eq!(properties.set_default("server.ssl.enabled", "false"), "false");
        assert_eq!(properties.len(), 2);
    }

    #[test]
    fn java_opts_are_sorted_flags() {
        let properties = declared(&[("server.port", "8080"), ("management.server.port", "9001")]);
        assert_eq!(
            properties.java_opts(),
            "-Dmanagement.server.port=9001 -Dserver.port=8080"
        );
        assert_eq!(ApplicationProperties::default().java_opts(), "");
    }
}
