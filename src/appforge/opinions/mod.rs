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

//! Opinion pipeline.
//!
//! An opinion is a named rule that inspects the build metadata of the
//! application image and mutates the pod template and the application
//! property map. Opinions run in list order and may depend on which earlier
//! opinions were applied.

pub mod properties;
pub mod resource;
pub mod spring_boot;

pub use properties::ApplicationProperties;
pub use resource::ContainerTarget;

use crate::appforge::cnb::BuildMetadata;
use crate::appforge::k8s::pod::{ObjectMeta, PodTemplateSpec};
use crate::appforge::logger::log_debug;
use std::error::Error;
use std::fmt::{Display, Formatter};

const COMPONENT: &str = "opinions";

pub type ApplicableFn = fn(&AppliedOpinions, &BuildMetadata) -> bool;
pub type ApplyFn =
    fn(&mut OpinionContext<'_>, &mut PodTemplateSpec, &BuildMetadata) -> Result<(), OpinionError>;

/// A single named rule. A missing `applicable` predicate means the opinion
/// always applies.
#[derive(Clone, Copy)]
pub struct Opinion {
    pub id: &'static str,
    pub applicable: Option<ApplicableFn>,
    pub apply: ApplyFn,
}

impl std::fmt::Debug for Opinion {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Opinion").field("id", &self.id).finish()
    }
}

/// Mutable state shared by the opinions of one pipeline run.
pub struct OpinionContext<'a> {
    pub properties: &'a mut ApplicationProperties,
    /// Metadata of the resource being opinionated. Labels and annotations
    /// set by opinions land here as well as on the pod template.
    pub resource: Option<&'a mut ObjectMeta>,
    pub container: ContainerTarget,
}

impl<'a> OpinionContext<'a> {
    pub fn new(properties: &'a mut ApplicationProperties) -> Self {
        Self {
            properties,
            resource: None,
            container: ContainerTarget::default(),
        }
    }

    pub fn with_resource(mut self, resource: &'a mut ObjectMeta) -> Self {
        self.resource = Some(resource);
        self
    }

    pub fn with_container(mut self, container: ContainerTarget) -> Self {
        self.container = container;
        self
    }
}

/// Ids of the opinions applied so far, in evaluation order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppliedOpinions(Vec<String>);

impl AppliedOpinions {
    pub fn has(&self, id: &str) -> bool {
        self.0.iter().any(|applied| applied == id)
    }

    pub fn ids(&self) -> &[String] {
        &self.0
    }

    pub fn into_vec(self) -> Vec<String> {
        self.0
    }

    fn push(&mut self, id: &str) {
        if !self.has(id) {
            self.0.push(id.to_string());
        }
    }
}

#[derive(Debug)]
pub enum OpinionError {
    ContainerNotFound(ContainerTarget),
    InvalidProperty { key: String, value: String },
    Failed {
        opinion: &'static str,
        source: Box<OpinionError>,
    },
}

impl Display for OpinionError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            OpinionError::ContainerNotFound(target) => {
                write!(f, "pod template has no container {target}")
            }
            OpinionError::InvalidProperty { key, value } => {
                write!(f, "property '{key}' has invalid value '{value}'")
            }
            OpinionError::Failed { opinion, source } => {
                write!(f, "opinion '{opinion}' failed: {source}")
            }
        }
    }
}

impl Error for OpinionError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            OpinionError::Failed { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}

/// Ordered opinion list.
#[derive(Debug, Clone, Default)]
pub struct Opinions(Vec<Opinion>);

impl Opinions {
    pub fn new(opinions: Vec<Opinion>) -> Self {
        Self(opinions)
    }

    pub fn ids(&self) -> Vec<&'static str> {
        self.0.iter().map(|opinion| opinion.id).collect()
    }

    /// Runs every applicable opinion once, left to right. The first failure
    /// aborts the run; mutations made before it are kept.
    pub fn apply(
        &self,
        ctx: &mut OpinionContext<'_>,
        template: &mut PodTemplateSpec,
        metadata: &BuildMetadata,
    ) -> Result<AppliedOpinions, OpinionError> {
        let mut applied = AppliedOpinions::default();
        for opinion in &self.0 {
            if applied.has(opinion.id) {
                continue;
            }
            let applicable = opinion
                .applicable
                .map_or(true, |predicate| predicate(&applied, metadata));
            if !applicable {
                continue;
            }
            (opinion.apply)(ctx, template, metadata).map_err(|source| OpinionError::Failed {
                opinion: opinion.id,
                source: Box::new(source),
            })?;
            log_debug(COMPONENT, "applied opinion", &[("opinion", opinion.id)]);
            applied.push(opinion.id);
        }
        Ok(applied)
    }
}
