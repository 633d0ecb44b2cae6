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

use crate::appforge::logger::log_debug;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;

/// Image config label holding the JSON encoded [`BuildMetadata`].
pub const BUILD_METADATA_LABEL: &str = "io.buildpacks.build.metadata";

/// BOM entry name contributed by the Spring Boot buildpack.
pub const SPRING_BOOT_BOM: &str = "spring-boot";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BuildMetadata {
    #[serde(default)]
    pub processes: Vec<Process>,
    #[serde(default)]
    pub buildpacks: Vec<Buildpack>,
    #[serde(default)]
    pub bom: Vec<BomEntry>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Buildpack {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub version: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Process {
    #[serde(rename = "type", default)]
    pub process_type: String,
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub direct: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BomEntry {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buildpack: Option<Buildpack>,
}

impl BuildMetadata {
    /// Returns the BOM entry called `name`, or an empty entry when the image
    /// does not carry one.
    pub fn find_bom(&self, name: &str) -> BomEntry {
        self.bom
            .iter()
            .find(|entry| entry.name == name)
            .cloned()
            .unwrap_or_default()
    }

    pub fn has_buildpack(&self, id: &str) -> bool {
        self.buildpacks.iter().any(|buildpack| buildpack.id == id)
    }

    pub fn process(&self, process_type: &str) -> Option<&Process> {
        self.processes
            .iter()
            .find(|process| process.process_type == process_type)
    }

    pub fn spring_boot(&self) -> SpringBootBomMetadata {
        SpringBootBomMetadata::decode(&self.find_bom(SPRING_BOOT_BOM))
    }
}

/// Typed view of the `spring-boot` BOM entry metadata.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SpringBootBomMetadata {
    #[serde(default)]
    pub classes: String,
    #[serde(default)]
    pub classpath: Vec<String>,
    #[serde(default)]
    pub dependencies: Vec<BomDependency>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BomDependency {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub sha256: String,
}

impl SpringBootBomMetadata {
    /// Decodes the opaque entry payload. Unknown fields are ignored; a payload
    /// of the wrong shape yields the empty view.
    pub fn decode(entry: &BomEntry) -> Self {
        match serde_json::from_value(Value::Object(entry.metadata.clone())) {
            Ok(decoded) => decoded,
            Err(err) => {
                let reason = err.to_string();
                log_debug(
                    "cnb",
                    "ignoring malformed BOM metadata",
                    &[("entry", entry.name.as_str()), ("error", reason.as_str())],
                );
                Self::default()
            }
        }
    }

    pub fn has_dependency(&self, names: &[&str]) -> bool {
        self.find_dependency(names).is_some()
    }

    /// Returns the first dependency, in BOM order, whose name is in `names`.
    pub fn find_dependency(&self, names: &[&str]) -> Option<&BomDependency> {
        let wanted: HashSet<&str> = names.iter().copied().collect();
        self.dependencies
            .iter()
            .find(|dependency| wanted.contains(dependency.name.as_str()))
    }
}
