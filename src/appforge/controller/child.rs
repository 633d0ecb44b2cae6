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

//! Owned-child convergence.
//!
//! A [`ChildDescriptor`] computes the desired child of a parent and knows how
//! to compare and merge it with the child already stored. [`ChildReconciler`]
//! runs the fetch, diff and apply phases against an [`ObjectStore`] and turns
//! name collisions with objects the parent does not own into a
//! [`ChildOutcome::NotOwned`] instead of an error.

use crate::appforge::api::{Application, ApplicationStatus};
use crate::appforge::k8s::pod::LabelSelector;
use crate::appforge::k8s::store::{normalize_namespace, ObjectStore, StoreError};
use crate::appforge::k8s::Resource;
use crate::appforge::logger::{log_info, log_warn};
use crate::appforge::util::BoxError;
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

const COMPONENT: &str = "child-reconciler";

/// Per-kind rules for computing and converging one owned child.
pub trait ChildDescriptor: Send + Sync {
    type Child: Resource + Clone + Send + Sync;
    type Input;

    /// Name the child is created under.
    fn child_name(&self, parent: &Application) -> String;

    /// Computes the desired child. `None` means the parent wants no child of
    /// this kind.
    fn desired(
        &self,
        parent: &Application,
        input: &Self::Input,
    ) -> Result<Option<Self::Child>, BoxError>;

    /// Copies fields owned by other controllers from `current` into
    /// `desired` before the two are compared.
    fn harmonize(&self, _current: &Self::Child, _desired: &mut Self::Child) {}

    fn semantic_equals(&self, current: &Self::Child, desired: &Self::Child) -> bool;

    fn merge_before_update(&self, current: &mut Self::Child, desired: Self::Child);

    /// The compared subset of a child, rendered for logs.
    fn sanitize(&self, child: &Self::Child) -> serde_json::Value;

    fn reflect_status(&self, status: &mut ApplicationStatus, outcome: &ChildOutcome<Self::Child>);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChildAction<T> {
    NoOp,
    Create(T),
    Update(T),
}

/// Result of the diff phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildPlan<T> {
    pub action: ChildAction<T>,
    /// The owned child currently stored, if any.
    pub current: Option<T>,
    /// Set when an owned child exists but no child is desired anymore.
    pub orphaned: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChildOutcome<T> {
    /// Nothing desired and nothing owned.
    Absent,
    Unchanged(T),
    Created(T),
    Updated(T),
    /// An object with the child's name exists and is not owned by the parent.
    NotOwned { name: String },
    /// An owned child exists that is no longer desired. It is left in place.
    Orphaned(T),
}

impl<T> ChildOutcome<T> {
    /// The owned child after convergence, when one is in use.
    pub fn child(&self) -> Option<&T> {
        match self {
            ChildOutcome::Unchanged(child)
            | ChildOutcome::Created(child)
            | ChildOutcome::Updated(child) => Some(child),
            _ => None,
        }
    }

    pub fn is_not_owned(&self) -> bool {
        matches!(self, ChildOutcome::NotOwned { .. })
    }
}

#[derive(Debug)]
pub enum ChildError {
    Desired { kind: &'static str, source: BoxError },
    Store { kind: &'static str, source: StoreError },
}

impl ChildError {
    /// Store failures, including optimistic concurrency conflicts, clear up
    /// on retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, ChildError::Store { .. })
    }
}

impl Display for ChildError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ChildError::Desired { kind, source } => {
                write!(f, "failed to compute desired {kind}: {source}")
            }
            ChildError::Store { kind, source } => {
                write!(f, "failed to converge {kind}: {source}")
            }
        }
    }
}

impl Error for ChildError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ChildError::Desired { source, .. } => Some(source.as_ref()),
            ChildError::Store { source, .. } => Some(source),
        }
    }
}

/// Desired child and the owned children observed in the store.
pub struct ChildData<T> {
    pub desired: Option<T>,
    pub observed: OwnerIndex<T>,
}

/// Owned children grouped by the owner label value.
#[derive(Debug, Clone)]
pub struct OwnerIndex<T> {
    owners: BTreeMap<String, Vec<T>>,
}

impl<T> Default for OwnerIndex<T> {
    fn default() -> Self {
        Self {
            owners: BTreeMap::new(),
        }
    }
}

impl<T: Resource + Clone> OwnerIndex<T> {
    pub fn build(owner_label: &str, children: Vec<T>) -> Self {
        let mut owners: BTreeMap<String, Vec<T>> = BTreeMap::new();
        for child in children {
            let Some(owner) = child.metadata().labels.get(owner_label).cloned() else {
                continue;
            };
            owners.entry(owner).or_default().push(child);
        }
        for children in owners.values_mut() {
            children.sort_by(|a, b| a.name().cmp(b.name()));
        }
        Self { owners }
    }

    pub fn owned_by(&self, owner: &str) -> &[T] {
        self.owners.get(owner).map(Vec::as_slice).unwrap_or_default()
    }

    /// Picks the managed child of `owner`: the one named `preferred` when
    /// present, otherwise the first by name.
    pub fn managed_child(&self, owner: &str, preferred: &str) -> Option<T> {
        let owned = self.owned_by(owner);
        if owned.len() > 1 {
            let names = owned
                .iter()
                .map(|child| child.name())
                .collect::<Vec<_>>()
                .join(",");
            log_warn(
                COMPONENT,
                "parent owns more than one child of a kind",
                &[("kind", T::KIND), ("owner", owner), ("children", names.as_str())],
            );
        }
        owned
            .iter()
            .find(|child| child.name() == preferred)
            .or_else(|| owned.first())
            .cloned()
    }
}

/// Converges one child kind for a parent.
pub struct ChildReconciler<D: ChildDescriptor> {
    descriptor: D,
    store: Arc<dyn ObjectStore<D::Child>>,
    owner_label: String,
}

impl<D: ChildDescriptor> ChildReconciler<D> {
    pub fn new(
        descriptor: D,
        store: Arc<dyn ObjectStore<D::Child>>,
        owner_label: impl Into<String>,
    ) -> Self {
        Self {
            descriptor,
            store,
            owner_label: owner_label.into(),
        }
    }

    pub fn kind(&self) -> &'static str {
        D::Child::KIND
    }

    pub fn descriptor(&self) -> &D {
        &self.descriptor
    }

    pub fn fetch(
        &self,
        parent: &Application,
        input: &D::Input,
    ) -> Result<ChildData<D::Child>, ChildError> {
        let desired = self
            .descriptor
            .desired(parent, input)
            .map_err(|source| ChildError::Desired {
                kind: self.kind(),
                source,
            })?;
        let selector = LabelSelector::single(self.owner_label.as_str(), parent.name());
        let children = self
            .store
            .list(parent.namespace(), &selector)
            .map_err(|source| ChildError::Store {
                kind: self.kind(),
                source,
            })?;
        Ok(ChildData {
            desired,
            observed: OwnerIndex::build(&self.owner_label, children),
        })
    }

    /// Pure comparison of the desired child with the owned child.
    pub fn diff(&self, parent: &Application, data: ChildData<D::Child>) -> ChildPlan<D::Child> {
        let current = data
            .observed
            .managed_child(parent.name(), &self.descriptor.child_name(parent));

        let Some(mut desired) = data.desired else {
            let orphaned = current.is_some();
            return ChildPlan {
                action: ChildAction::NoOp,
                current,
                orphaned,
            };
        };

        let Some(existing) = current else {
            return ChildPlan {
                action: ChildAction::Create(desired),
                current: None,
                orphaned: false,
            };
        };

        self.descriptor.harmonize(&existing, &mut desired);
        if self.descriptor.semantic_equals(&existing, &desired) {
            return ChildPlan {
                action: ChildAction::NoOp,
                current: Some(existing),
                orphaned: false,
            };
        }

        let diff = self.descriptor.sanitize(&desired).to_string();
        log_info(
            COMPONENT,
            "child drifted from desired state",
            &[
                ("kind", self.kind()),
                ("name", existing.name()),
                ("desired", diff.as_str()),
            ],
        );
        let mut merged = existing.clone();
        self.descriptor.merge_before_update(&mut merged, desired);
        ChildPlan {
            action: ChildAction::Update(merged),
            current: Some(existing),
            orphaned: false,
        }
    }

    pub fn apply(&self, plan: ChildPlan<D::Child>) -> Result<ChildOutcome<D::Child>, ChildError> {
        let kind = self.kind();
        match plan.action {
            ChildAction::NoOp => Ok(match (plan.current, plan.orphaned) {
                (Some(current), true) => {
                    log_info(
                        COMPONENT,
                        "owned child is no longer desired; leaving it in place",
                        &[("kind", kind), ("name", current.name())],
                    );
                    ChildOutcome::Orphaned(current)
                }
                (Some(current), false) => ChildOutcome::Unchanged(current),
                (None, _) => ChildOutcome::Absent,
            }),
            ChildAction::Create(desired) => {
                let namespace = normalize_namespace(desired.metadata().namespace.as_deref());
                match self.store.create(desired) {
                    Ok(created) => {
                        log_info(
                            COMPONENT,
                            "created child",
                            &[
                                ("kind", kind),
                                ("namespace", namespace.as_str()),
                                ("name", created.name()),
                            ],
                        );
                        Ok(ChildOutcome::Created(created))
                    }
                    Err(StoreError::AlreadyExists { name, .. }) => {
                        log_warn(
                            COMPONENT,
                            "child name is taken by an object the parent does not own",
                            &[
                                ("kind", kind),
                                ("namespace", namespace.as_str()),
                                ("name", name.as_str()),
                            ],
                        );
                        Ok(ChildOutcome::NotOwned { name })
                    }
                    Err(source) => Err(ChildError::Store { kind, source }),
                }
            }
            ChildAction::Update(merged) => {
                let updated = self
                    .store
                    .update(merged)
                    .map_err(|source| ChildError::Store { kind, source })?;
                log_info(
                    COMPONENT,
                    "updated child",
                    &[("kind", kind), ("name", updated.name())],
                );
                Ok(ChildOutcome::Updated(updated))
            }
        }
    }

    /// Runs fetch, diff and apply, then reflects the outcome on the parent
    /// status.
    pub fn reconcile(
        &self,
        parent: &mut Application,
        input: &D::Input,
    ) -> Result<ChildOutcome<D::Child>, ChildError> {
        let data = self.fetch(parent, input)?;
        let plan = self.diff(parent, data);
        let outcome = self.apply(plan)?;
        self.descriptor.reflect_status(&mut parent.status, &outcome);
        Ok(outcome)
    }
}
