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

use super::conditions::{Condition, ConditionSet, ConditionType};
use crate::appforge::k8s::pod::{ObjectMeta, PodTemplateSpec};
use crate::appforge::opinions::ContainerTarget;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const API_VERSION: &str = "apps.appforge.io/v1alpha1";
pub const KIND: &str = "Application";

/// Reference to an external resource that publishes built images.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImageResourceReference {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationSpec {
    /// Partial pod template; opinions fill in the rest.
    #[serde(default)]
    pub template: PodTemplateSpec,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub application_properties: HashMap<String, String>,
    /// When set, the latest image of this resource replaces the image of
    /// the application container.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<ImageResourceReference>,
    /// Application container; defaults to the first container.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container: Option<ContainerTarget>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationStatus {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
    /// Ids of the opinions applied by the last successful pipeline run.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub applied_opinions: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest_image: Option<String>,
    /// Name of the generated application properties ConfigMap.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generated_config_ref: Option<String>,
}

impl ApplicationStatus {
    pub fn manage(&mut self) -> ConditionSet<'_> {
        ConditionSet::new(&mut self.conditions)
    }

    pub fn condition(&self, condition_type: ConditionType) -> Option<&Condition> {
        self.conditions
            .iter()
            .find(|condition| condition.condition_type == condition_type)
    }

    pub fn is_ready(&self) -> bool {
        self.condition(ConditionType::Ready)
            .is_some_and(|condition| condition.is_true())
    }
}

/// The parent resource reconciled by the application controller.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Application {
    #[serde(rename = "apiVersion")]
    pub api_version: String,
    pub kind: String,
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: ApplicationSpec,
    #[serde(default)]
    pub status: ApplicationStatus,
}

impl Application {
    pub fn new(namespace: Option<&str>, name: &str, spec: ApplicationSpec) -> Self {
        Self {
            api_version: API_VERSION.to_string(),
            kind: KIND.to_string(),
            metadata: ObjectMeta::named(namespace, name),
            spec,
            status: ApplicationStatus::default(),
        }
    }

    pub fn name(&self) -> &str {
        self.metadata.name_or_empty()
    }

    pub fn namespace(&self) -> Option<&str> {
        self.metadata.namespace.as_deref()
    }

    pub fn container_target(&self) -> ContainerTarget {
        self.spec.container.clone().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_camel_case_manifest() {
        let app: Application = serde_json::from_value(json!({
            "apiVersion": API_VERSION,
            "kind": KIND,
            "metadata": {"name": "orders", "namespace": "shop"},
            "spec": {
                "template": {"spec": {"containers": [
                    {"name": "sidecar"},
                    {"name": "app", "image": "registry.example.com/orders"}
                ]}},
                "applicationProperties": {"server.port": "9090"},
                "image": {"name": "orders-build"},
                "container": "app"
            }
        }))
        .expect("decode application");

        assert_eq!(app.name(), "orders");
        assert_eq!(app.namespace(), Some("shop"));
        assert_eq!(app.container_target(), ContainerTarget::Name("app".into()));
        assert_eq!(
            app.spec.image.as_ref().map(|image| image.name.as_str()),
            Some("orders-build")
        );
        assert!(app.status.conditions.is_empty());
        assert!(!app.status.is_ready());
    }

    #[test]
    fn container_target_defaults_to_first_container() {
        let app = Application::new(None, "orders", ApplicationSpec::default());
        assert_eq!(app.container_target(), ContainerTarget::Index(0));
    }
}
