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

//! Generated application properties ConfigMap.

use super::child::{ChildDescriptor, ChildOutcome};
use crate::appforge::api::{Application, ApplicationStatus};
use crate::appforge::config::OperatorSettings;
use crate::appforge::k8s::configmap::ConfigMap;
use crate::appforge::k8s::pod::ObjectMeta;
use crate::appforge::opinions::properties::PROPERTIES_FILE;
use crate::appforge::opinions::ApplicationProperties;
use crate::appforge::util::BoxError;
use sha2::{Digest, Sha256};
use std::collections::HashMap;

/// Suffix of the generated ConfigMap name.
pub const CONFIG_MAP_SUFFIX: &str = "-application-properties";

pub struct ConfigMapChild {
    settings: OperatorSettings,
}

impl ConfigMapChild {
    pub fn new(settings: OperatorSettings) -> Self {
        Self { settings }
    }
}

/// Hex encoded sha256 of a rendered properties file.
pub fn properties_checksum(rendered: &str) -> String {
    hex::encode(Sha256::digest(rendered.as_bytes()))
}

/// Parent labels plus the owner label.
pub(crate) fn child_labels(settings: &OperatorSettings, parent: &Application) -> HashMap<String, String> {
    let mut labels = parent.metadata.labels.clone();
    labels.insert(settings.owner_label(), parent.name().to_string());
    labels
}

impl ChildDescriptor for ConfigMapChild {
    type Child = ConfigMap;
    type Input = ApplicationProperties;

    fn child_name(&self, parent: &Application) -> String {
        format!("{}{CONFIG_MAP_SUFFIX}", parent.name())
    }

    fn desired(
        &self,
        parent: &Application,
        properties: &ApplicationProperties,
    ) -> Result<Option<ConfigMap>, BoxError> {
        if properties.is_empty() {
            return Ok(None);
        }
        let mut metadata = ObjectMeta::named(parent.namespace(), &self.child_name(parent));
        metadata.labels = child_labels(&self.settings, parent);
        let mut child = ConfigMap::new(metadata);
        child
            .data
            .insert(PROPERTIES_FILE.to_string(), properties.to_properties_file());
        Ok(Some(child))
    }

    fn semantic_equals(&self, current: &ConfigMap, desired: &ConfigMap) -> bool {
        current.data == desired.data && current.metadata.labels == desired.metadata.labels
    }

    fn merge_before_update(&self, current: &mut ConfigMap, desired: ConfigMap) {
        current.metadata.labels = desired.metadata.labels;
        current.data = desired.data;
    }

    fn sanitize(&self, child: &ConfigMap) -> serde_json::Value {
        serde_json::to_value(&child.data).unwrap_or_default()
    }

    fn reflect_status(&self, status: &mut ApplicationStatus, outcome: &ChildOutcome<ConfigMap>) {
        if let ChildOutcome::NotOwned { name } = outcome {
            status.manage().mark_config_map_not_owned(name);
        }
        status.generated_config_ref = outcome
            .child()
            .and_then(|child| child.metadata.name.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::appforge::api::ApplicationSpec;
    use crate::appforge::opinions::properties::PROPERTIES_HEADER;

    fn parent() -> Application {
        let mut parent = Application::new(Some("shop"), "orders", ApplicationSpec::default());
        parent
            .metadata
            .labels
            .insert("team".into(), "payments".into());
        parent
    }

    #[test]
    fn desired_config_map_renders_properties() {
        let child = ConfigMapChild::new(OperatorSettings::default());
        let mut properties = ApplicationProperties::default();
        properties.insert("server.port", "8080");

        let desired = child
            .desired(&parent(), &properties)
            .expect("desired")
            .expect("config map");

        assert_eq!(desired.metadata.name.as_deref(), Some("orders-application-properties"));
        assert_eq!(desired.metadata.namespace.as_deref(), Some("shop"));
        assert_eq!(
            desired.metadata.labels.get("apps.appforge.io/application").map(String::as_str),
            Some("orders")
        );
        assert_eq!(desired.metadata.labels.get("team").map(String::as_str), Some("payments"));
        assert_eq!(
            desired.data.get(PROPERTIES_FILE).map(String::as_str),
            Some(format!("{PROPERTIES_HEADER}\nserver.port = 8080\n").as_str())
        );
    }

    #[test]
    fn empty_properties_want_no_config_map() {
        let child = ConfigMapChild::new(OperatorSettings::default());
        let desired = child
            .desired(&parent(), &ApplicationProperties::default())
            .expect("desired");
        assert!(desired.is_none());
    }

    #[test]
    fn checksum_tracks_content() {
        let first = properties_checksum("a = 1\n");
        assert_eq!(first.len(), 64);
        assert_eq!(first, properties_checksum("a = 1\n"));
        assert_ne!(first, properties_checksum("a = 2\n"));
    }
}
