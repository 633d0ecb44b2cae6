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

//! Pod template mutation helpers shared by opinions.

use super::{OpinionContext, OpinionError};
use crate::appforge::k8s::pod::{
    ContainerEnvVar, ContainerPort, ContainerProbe, ContainerSpec, PodTemplateSpec,
};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Selects the application container of a pod template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ContainerTarget {
    Index(usize),
    Name(String),
}

impl Default for ContainerTarget {
    fn default() -> Self {
        ContainerTarget::Index(0)
    }
}

impl Display for ContainerTarget {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ContainerTarget::Index(index) => write!(f, "at index {index}"),
            ContainerTarget::Name(name) => write!(f, "named '{name}'"),
        }
    }
}

impl ContainerTarget {
    pub fn resolve<'t>(
        &self,
        template: &'t PodTemplateSpec,
    ) -> Result<&'t ContainerSpec, OpinionError> {
        let containers = &template.spec.containers;
        let found = match self {
            ContainerTarget::Index(index) => containers.get(*index),
            ContainerTarget::Name(name) => containers.iter().find(|c| &c.name == name),
        };
        found.ok_or_else(|| OpinionError::ContainerNotFound(self.clone()))
    }

    pub fn resolve_mut<'t>(
        &self,
        template: &'t mut PodTemplateSpec,
    ) -> Result<&'t mut ContainerSpec, OpinionError> {
        let containers = &mut template.spec.containers;
        let found = match self {
            ContainerTarget::Index(index) => containers.get_mut(*index),
            ContainerTarget::Name(name) => containers.iter_mut().find(|c| &c.name == name),
        };
        found.ok_or_else(|| OpinionError::ContainerNotFound(self.clone()))
    }
}

/// Initial timings of a probe created by an opinion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeTiming {
    pub initial_delay_seconds: i32,
    pub period_seconds: i32,
    pub timeout_seconds: i32,
}

pub const LIVENESS_TIMING: ProbeTiming = ProbeTiming {
    initial_delay_seconds: 30,
    period_seconds: 5,
    timeout_seconds: 5,
};

pub const READINESS_TIMING: ProbeTiming = ProbeTiming {
    initial_delay_seconds: 5,
    period_seconds: 1,
    timeout_seconds: 5,
};

/// Creates the probe with `timing` when missing and installs `handler` when
/// the probe has none. Existing user settings are never overwritten.
pub fn define_probe(
    probe: &mut Option<ContainerProbe>,
    timing: ProbeTiming,
    handler: impl FnOnce(&mut ContainerProbe),
) {
    let probe = probe.get_or_insert_with(|| ContainerProbe {
        initial_delay_seconds: Some(timing.initial_delay_seconds),
        period_seconds: Some(timing.period_seconds),
        timeout_seconds: Some(timing.timeout_seconds),
        ..Default::default()
    });
    if !probe.has_handler() {
        handler(probe);
    }
}

/// Appends `port` unless the container already exposes the same port number
/// and protocol. Returns whether the port was added.
pub fn add_port_if_absent(container: &mut ContainerSpec, port: ContainerPort) -> bool {
    let protocol = port.protocol.as_deref().unwrap_or("TCP");
    let exists = container.ports.iter().any(|existing| {
        existing.container_port == port.container_port
            && existing.protocol.as_deref().unwrap_or("TCP") == protocol
    });
    if !exists {
        container.ports.push(port);
    }
    !exists
}

/// Sets `name` to `value`, or appends `value` to an existing literal value
/// separated by a single space. A variable sourced through `valueFrom` is left
/// as declared and `false` is returned.
pub fn merge_env_var(container: &mut ContainerSpec, name: &str, value: &str) -> bool {
    if value.is_empty() {
        return true;
    }
    match container.env.iter_mut().find(|var| var.name == name) {
        Some(var) if var.value_from.is_some() => false,
        Some(var) => {
            let merged = match var.value.as_deref() {
                Some(current) if !current.is_empty() => format!("{current} {value}"),
                _ => value.to_string(),
            };
            var.value = Some(merged);
            true
        }
        None => {
            container.env.push(ContainerEnvVar {
                name: name.to_string(),
                value: Some(value.to_string()),
                value_from: None,
            });
            true
        }
    }
}

/// Sets a label on the pod template and on the opinionated resource.
pub fn set_label(ctx: &mut OpinionContext<'_>, template: &mut PodTemplateSpec, key: &str, value: &str) {
    if let Some(resource) = ctx.resource.as_deref_mut() {
        resource.labels.insert(key.to_string(), value.to_string());
    }
    template
        .metadata
        .labels
        .insert(key.to_string(), value.to_string());
}

/// Sets an annotation on the pod template and on the opinionated resource.
pub fn set_annotation(
    ctx: &mut OpinionContext<'_>,
    template: &mut PodTemplateSpec,
    key: &str,
    value: &str,
) {
    if let Some(resource) = ctx.resource.as_deref_mut() {
        resource
            .annotations
            .insert(key.to_string(), value.to_string());
    }
    template
        .metadata
        .annotations
        .insert(key.to_string(), value.to_string());
}

/// Parses a port number property.
pub fn port_property(ctx: &OpinionContext<'_>, key: &str) -> Result<Option<u16>, OpinionError> {
    match ctx.properties.get(key) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse::<u16>()
            .map(Some)
            .map_err(|_| OpinionError::InvalidProperty {
                key: key.to_string(),
                value: value.to_string(),
            }),
    }
}
