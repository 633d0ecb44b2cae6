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

//! Application reconciler.
//!
//! One pass resolves the application image, loads its build metadata, runs
//! the opinion pipeline over a copy of the declared pod template, and then
//! converges the generated ConfigMap and Deployment. Status is updated in
//! place; persisting it is left to the caller.

use super::child::{ChildError, ChildOutcome, ChildReconciler};
use super::configmap::{properties_checksum, ConfigMapChild};
use super::deployment::{DeploymentChild, DeploymentInput, MountedConfig};
use crate::appforge::api::Application;
use crate::appforge::cnb::{load_build_metadata, ImageRegistry, ImageResolver, RegistryError};
use crate::appforge::config::OperatorSettings;
use crate::appforge::k8s::configmap::ConfigMap;
use crate::appforge::k8s::deployment::Deployment;
use crate::appforge::k8s::store::{normalize_namespace, ObjectStore};
use crate::appforge::logger::{log_error, log_info, log_warn};
use crate::appforge::observability::tracing::with_span;
use crate::appforge::opinions::{spring_boot, ApplicationProperties, OpinionContext, Opinions};
use crate::appforge::util::{with_context, BoxError};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

const COMPONENT: &str = "application-controller";

#[derive(Debug)]
pub enum ReconcileError {
    /// Collaborator failures expected to clear up on their own.
    Transient(BoxError),
    /// The application or its image needs to change before reconcile can
    /// make progress.
    Configuration(BoxError),
}

impl ReconcileError {
    /// Every failure is requeued; the classification only drives logging.
    pub fn is_retryable(&self) -> bool {
        true
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, ReconcileError::Transient(_))
    }

    fn class(&self) -> &'static str {
        match self {
            ReconcileError::Transient(_) => "transient",
            ReconcileError::Configuration(_) => "configuration",
        }
    }
}

impl Display for ReconcileError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ReconcileError::Transient(err) => write!(f, "transient reconcile error: {err}"),
            ReconcileError::Configuration(err) => {
                write!(f, "application configuration error: {err}")
            }
        }
    }
}

impl Error for ReconcileError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ReconcileError::Transient(err) | ReconcileError::Configuration(err) => {
                Some(err.as_ref())
            }
        }
    }
}

impl From<RegistryError> for ReconcileError {
    fn from(err: RegistryError) -> Self {
        if err.is_transient() {
            ReconcileError::Transient(Box::new(err))
        } else {
            ReconcileError::Configuration(Box::new(err))
        }
    }
}

impl From<ChildError> for ReconcileError {
    fn from(err: ChildError) -> Self {
        if err.is_transient() {
            ReconcileError::Transient(Box::new(err))
        } else {
            ReconcileError::Configuration(Box::new(err))
        }
    }
}

pub struct ApplicationReconciler {
    settings: OperatorSettings,
    registry: Arc<dyn ImageRegistry>,
    resolver: Option<Arc<dyn ImageResolver>>,
    opinions: Opinions,
    config_maps: ChildReconciler<ConfigMapChild>,
    deployments: ChildReconciler<DeploymentChild>,
}

impl ApplicationReconciler {
    /// Builds a reconciler running the Spring Boot opinion set.
    pub fn new(
        settings: OperatorSettings,
        registry: Arc<dyn ImageRegistry>,
        deployments: Arc<dyn ObjectStore<Deployment>>,
        config_maps: Arc<dyn ObjectStore<ConfigMap>>,
    ) -> Self {
        let owner_label = settings.owner_label();
        Self {
            config_maps: ChildReconciler::new(
                ConfigMapChild::new(settings.clone()),
                config_maps,
                owner_label.clone(),
            ),
            deployments: ChildReconciler::new(
                DeploymentChild::new(settings.clone()),
                deployments,
                owner_label,
            ),
            settings,
            registry,
            resolver: None,
            opinions: spring_boot::opinions(),
        }
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn ImageResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn with_opinions(mut self, opinions: Opinions) -> Self {
        self.opinions = opinions;
        self
    }

    pub fn settings(&self) -> &OperatorSettings {
        &self.settings
    }

    /// Reconciles inside a tracing span so every log line of the pass shares
    /// one trace id.
    pub async fn reconcile_traced(&self, app: &mut Application) -> Result<(), ReconcileError> {
        let object = format!("{}/{}", normalize_namespace(app.namespace()), app.name());
        with_span(COMPONENT, object, async move { self.reconcile(app) }).await
    }

    pub fn reconcile(&self, app: &mut Application) -> Result<(), ReconcileError> {
        let namespace = normalize_namespace(app.namespace());
        let name = app.name().to_string();
        let result = self.reconcile_inner(app);
        match &result {
            Ok(()) => log_info(
                COMPONENT,
                "reconciled application",
                &[
                    ("namespace", namespace.as_str()),
                    ("application", name.as_str()),
                    ("ready", if app.status.is_ready() { "true" } else { "false" }),
                ],
            ),
            Err(err) => {
                let message = err.to_string();
                log_error(
                    COMPONENT,
                    "reconcile failed; will retry",
                    &[
                        ("namespace", namespace.as_str()),
                        ("application", name.as_str()),
                        ("class", err.class()),
                        ("error", message.as_str()),
                    ],
                );
            }
        }
        result
    }

    fn reconcile_inner(&self, app: &mut Application) -> Result<(), ReconcileError> {
        app.status.manage().initialize();
        app.status.observed_generation = app.metadata.generation;

        let Some(image) = self.resolve_image(app)? else {
            log_info(
                COMPONENT,
                "waiting for the application image",
                &[("application", app.name())],
            );
            return Ok(());
        };
        let metadata = load_build_metadata(self.registry.as_ref(), &image)?;

        let container = app.container_target();
        let mut template = app.spec.template.clone();
        let mut properties = ApplicationProperties::from_declared(&app.spec.application_properties);
        let applied = {
            let mut ctx = OpinionContext::new(&mut properties)
                .with_resource(&mut app.metadata)
                .with_container(container.clone());
            self.opinions
                .apply(&mut ctx, &mut template, &metadata)
                .map_err(|err| ReconcileError::Configuration(Box::new(err)))?
        };
        app.status.applied_opinions = applied.into_vec();

        let mut errors: Vec<ReconcileError> = Vec::new();

        let config = match self.config_maps.reconcile(app, &properties) {
            Ok(ChildOutcome::NotOwned { .. }) => {
                log_warn(
                    COMPONENT,
                    "skipping Deployment; generated ConfigMap is not owned",
                    &[("application", app.name())],
                );
                return Ok(());
            }
            Ok(outcome) => outcome.child().and_then(|child| {
                let name = child.metadata.name.clone()?;
                Some(MountedConfig {
                    config_map: name,
                    checksum: properties_checksum(&properties.to_properties_file()),
                })
            }),
            Err(err) => {
                let message = err.to_string();
                app.status.manage().mark_config_map_unresolved(&message);
                errors.push(err.into());
                None
            }
        };

        if errors.is_empty() {
            let input = DeploymentInput {
                template,
                properties,
                container,
                image: app.spec.image.as_ref().map(|_| image.clone()),
                config,
            };
            if let Err(err) = self.deployments.reconcile(app, &input) {
                errors.push(err.into());
            }
        }

        match errors.into_iter().next() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// The image to inspect: the latest image published by the referenced
    /// image resource, otherwise the image of the application container.
    fn resolve_image(&self, app: &mut Application) -> Result<Option<String>, ReconcileError> {
        if let Some(reference) = app.spec.image.clone() {
            let Some(resolver) = self.resolver.as_ref() else {
                return Err(ReconcileError::Configuration(
                    format!(
                        "application references image resource '{}' but no image resolver is configured",
                        reference.name
                    )
                    .into(),
                ));
            };
            match resolver.latest_image(app.namespace(), &reference) {
                Ok(Some(latest)) => app.status.latest_image = Some(latest),
                Ok(None) => {}
                Err(err) => {
                    return Err(ReconcileError::Transient(with_context(
                        err,
                        format!("failed to resolve latest image of '{}'", reference.name),
                    )))
                }
            }
            return Ok(app.status.latest_image.clone());
        }

        let container = app
            .container_target()
            .resolve(&app.spec.template)
            .map_err(|err| ReconcileError::Configuration(Box::new(err)))?;
        Ok(container
            .image
            .as_deref()
            .map(str::trim)
            .filter(|image| !image.is_empty())
            .map(str::to_string))
    }
}
