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

//! Generated Deployment running the opinionated pod template.

use super::child::{ChildDescriptor, ChildOutcome};
use super::configmap::child_labels;
use crate::appforge::api::{Application, ApplicationStatus};
use crate::appforge::config::OperatorSettings;
use crate::appforge::k8s::deployment::{Deployment, DeploymentSpec};
use crate::appforge::k8s::pod::{
    ConfigMapVolumeSource, LabelSelector, ObjectMeta, PodTemplateSpec, VolumeMount, VolumeSpec,
};
use crate::appforge::logger::log_warn;
use crate::appforge::opinions::resource::merge_env_var;
use crate::appforge::opinions::{ApplicationProperties, ContainerTarget};
use crate::appforge::util::BoxError;

const COMPONENT: &str = "child-reconciler";

pub const JAVA_OPTS: &str = "JAVA_OPTS";
pub const CONFIG_VOLUME: &str = "application-properties";

/// Generated configuration the Deployment mounts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountedConfig {
    pub config_map: String,
    pub checksum: String,
}

/// Output of the opinion pipeline plus the state derived from other children.
#[derive(Debug, Clone, Default)]
pub struct DeploymentInput {
    pub template: PodTemplateSpec,
    pub properties: ApplicationProperties,
    pub container: ContainerTarget,
    /// Image that replaces the application container's image.
    pub image: Option<String>,
    pub config: Option<MountedConfig>,
}

pub struct DeploymentChild {
    settings: OperatorSettings,
}

impl DeploymentChild {
    pub fn new(settings: OperatorSettings) -> Self {
        Self { settings }
    }

    fn desired_template(
        &self,
        parent: &Application,
        input: &DeploymentInput,
    ) -> Result<PodTemplateSpec, BoxError> {
        let mut template = input.template.clone();
        template
            .metadata
            .labels
            .extend(child_labels(&self.settings, parent));

        let container = input.container.resolve_mut(&mut template)?;
        if let Some(image) = input.image.as_deref() {
            container.image = Some(image.to_string());
        }
        if !merge_env_var(container, JAVA_OPTS, &input.properties.java_opts()) {
            log_warn(
                COMPONENT,
                "JAVA_OPTS is sourced from valueFrom; generated flags not merged",
                &[("application", parent.name())],
            );
        }

        if let Some(config) = input.config.as_ref() {
            if !container
                .volume_mounts
                .iter()
                .any(|mount| mount.name == CONFIG_VOLUME)
            {
                container.volume_mounts.push(VolumeMount {
                    name: CONFIG_VOLUME.to_string(),
                    mount_path: self.settings.config_mount_path.clone(),
                    read_only: Some(true),
                });
            }
            template.spec.volumes.retain(|volume| volume.name != CONFIG_VOLUME);
            template.spec.volumes.push(VolumeSpec {
                name: CONFIG_VOLUME.to_string(),
                config_map: Some(ConfigMapVolumeSource {
                    name: config.config_map.clone(),
                    optional: None,
                }),
                empty_dir: None,
            });
            template.metadata.annotations.insert(
                self.settings.config_checksum_annotation(),
                config.checksum.clone(),
            );
        }
        Ok(template)
    }
}

impl ChildDescriptor for DeploymentChild {
    type Child = Deployment;
    type Input = DeploymentInput;

    fn child_name(&self, parent: &Application) -> String {
        parent.name().to_string()
    }

    fn desired(
        &self,
        parent: &Application,
        input: &DeploymentInput,
    ) -> Result<Option<Deployment>, BoxError> {
        let mut metadata = ObjectMeta::named(parent.namespace(), &self.child_name(parent));
        metadata.labels = child_labels(&self.settings, parent);
        let spec = DeploymentSpec {
            // owned by whoever scales the workload
            replicas: None,
            selector: LabelSelector::single(self.settings.owner_label(), parent.name()),
            template: self.desired_template(parent, input)?,
            revision_history_limit: None,
        };
        Ok(Some(Deployment::new(metadata, spec)))
    }

    fn harmonize(&self, current: &Deployment, desired: &mut Deployment) {
        desired.spec.replicas = current.spec.replicas;
    }

    fn semantic_equals(&self, current: &Deployment, desired: &Deployment) -> bool {
        current.spec == desired.spec && current.metadata.labels == desired.metadata.labels
    }

    fn merge_before_update(&self, current: &mut Deployment, desired: Deployment) {
        current.metadata.labels = desired.metadata.labels;
        current.spec = desired.spec;
    }

    fn sanitize(&self, child: &Deployment) -> serde_json::Value {
        serde_json::to_value(&child.spec).unwrap_or_default()
    }

    fn reflect_status(&self, status: &mut ApplicationStatus, outcome: &ChildOutcome<Deployment>) {
        match outcome {
            ChildOutcome::NotOwned { name } => status.manage().mark_deployment_not_owned(name),
            _ => {
                if let Some(child_status) = outcome.child().and_then(|child| child.status.as_ref())
                {
                    status.manage().propagate_deployment_status(child_status);
                }
            }
        }
    }
}
