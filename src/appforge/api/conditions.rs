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

//! Condition bookkeeping for application status.
//!
//! `Ready` is computed from the dependent conditions: it is `True` once every
//! dependent is `True`, `False` as soon as one dependent is `False`, and
//! `Unknown` otherwise.

use crate::appforge::k8s::deployment::{
    DeploymentStatus, CONDITION_AVAILABLE, CONDITION_PROGRESSING,
};
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

pub const REASON_INITIALIZING: &str = "Initializing";
pub const REASON_NOT_OWNED: &str = "NotOwned";
pub const REASON_CONFIG_MAP_NOT_OWNED: &str = "ConfigMapNotOwned";
pub const REASON_CONFIG_MAP_UNRESOLVED: &str = "ConfigMapUnresolved";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

impl ConditionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConditionStatus::True => "True",
            ConditionStatus::False => "False",
            ConditionStatus::Unknown => "Unknown",
        }
    }

    /// Parses a status reported by a child object. Anything other than the
    /// three known values is `None`.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "True" => Some(ConditionStatus::True),
            "False" => Some(ConditionStatus::False),
            "Unknown" => Some(ConditionStatus::Unknown),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ConditionType {
    DeploymentReady,
    Ready,
}

impl ConditionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConditionType::DeploymentReady => "DeploymentReady",
            ConditionType::Ready => "Ready",
        }
    }
}

/// Conditions that feed the computed `Ready` condition.
const DEPENDENTS: &[ConditionType] = &[ConditionType::DeploymentReady];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub condition_type: ConditionType,
    pub status: ConditionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// RFC3339 timestamp of the last status change.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<String>,
}

impl Condition {
    pub fn is_true(&self) -> bool {
        self.status == ConditionStatus::True
    }
}

/// Mutating view over a condition list.
pub struct ConditionSet<'a> {
    conditions: &'a mut Vec<Condition>,
}

impl<'a> ConditionSet<'a> {
    pub fn new(conditions: &'a mut Vec<Condition>) -> Self {
        Self { conditions }
    }

    /// Adds every missing condition as `Unknown`. Existing conditions keep
    /// their state.
    pub fn initialize(&mut self) {
        for condition_type in DEPENDENTS
            .iter()
            .copied()
            .chain(std::iter::once(ConditionType::Ready))
        {
            if self.get(condition_type).is_none() {
                self.set(
                    condition_type,
                    ConditionStatus::Unknown,
                    Some(REASON_INITIALIZING),
                    None,
                );
            }
        }
        self.recompute_ready();
    }

    pub fn get(&self, condition_type: ConditionType) -> Option<&Condition> {
        self.conditions
            .iter()
            .find(|condition| condition.condition_type == condition_type)
    }

    pub fn is_happy(&self) -> bool {
        self.get(ConditionType::Ready)
            .is_some_and(|condition| condition.is_true())
    }

    pub fn mark_true(&mut self, condition_type: ConditionType) {
        self.set(condition_type, ConditionStatus::True, None, None);
        self.recompute_ready();
    }

    pub fn mark_false(&mut self, condition_type: ConditionType, reason: &str, message: &str) {
        self.set(
            condition_type,
            ConditionStatus::False,
            non_empty(reason),
            non_empty(message),
        );
        self.recompute_ready();
    }

    pub fn mark_unknown(&mut self, condition_type: ConditionType, reason: &str, message: &str) {
        self.set(
            condition_type,
            ConditionStatus::Unknown,
            non_empty(reason),
            non_empty(message),
        );
        self.recompute_ready();
    }

    pub fn mark_deployment_not_owned(&mut self, name: &str) {
        self.mark_false(
            ConditionType::DeploymentReady,
            REASON_NOT_OWNED,
            &format!("There is an existing Deployment \"{name}\" that the Application does not own."),
        );
    }

    pub fn mark_config_map_not_owned(&mut self, name: &str) {
        self.mark_false(
            ConditionType::DeploymentReady,
            REASON_CONFIG_MAP_NOT_OWNED,
            &format!("There is an existing ConfigMap \"{name}\" that the Application does not own."),
        );
    }

    /// The Deployment was skipped because the ConfigMap it mounts could not
    /// be converged.
    pub fn mark_config_map_unresolved(&mut self, message: &str) {
        self.mark_unknown(
            ConditionType::DeploymentReady,
            REASON_CONFIG_MAP_UNRESOLVED,
            message,
        );
    }

    /// Projects the Deployment's Available/Progressing conditions onto
    /// `DeploymentReady`. Nothing changes until both are reported with a
    /// recognised status.
    pub fn propagate_deployment_status(&mut self, status: &DeploymentStatus) {
        let (Some(available), Some(progressing)) = (
            status.condition(CONDITION_AVAILABLE),
            status.condition(CONDITION_PROGRESSING),
        ) else {
            return;
        };
        let reason = |value: &Option<String>| value.clone().unwrap_or_default();

        let (Some(available_status), Some(progressing_status)) = (
            ConditionStatus::parse(&available.status),
            ConditionStatus::parse(&progressing.status),
        ) else {
            return;
        };
        if progressing_status == ConditionStatus::True
            && available_status == ConditionStatus::False
        {
            // still rolling out; not a failure yet
            self.mark_unknown(
                ConditionType::DeploymentReady,
                &reason(&progressing.reason),
                &reason(&progressing.message),
            );
            return;
        }
        match available_status {
            ConditionStatus::Unknown => self.mark_unknown(
                ConditionType::DeploymentReady,
                &reason(&available.reason),
                &reason(&available.message),
            ),
            ConditionStatus::True => self.mark_true(ConditionType::DeploymentReady),
            ConditionStatus::False => self.mark_false(
                ConditionType::DeploymentReady,
                &reason(&available.reason),
                &reason(&available.message),
            ),
        }
    }

    fn recompute_ready(&mut self) {
        let dependents: Vec<Condition> = DEPENDENTS
            .iter()
            .filter_map(|condition_type| self.get(*condition_type).cloned())
            .collect();
        let blocking = dependents
            .iter()
            .find(|condition| condition.status == ConditionStatus::False)
            .or_else(|| {
                dependents
                    .iter()
                    .find(|condition| condition.status != ConditionStatus::True)
            });

        match blocking {
            Some(condition) if dependents.len() == DEPENDENTS.len() => self.set(
                ConditionType::Ready,
                condition.status,
                condition.reason.as_deref(),
                condition.message.as_deref(),
            ),
            None if dependents.len() == DEPENDENTS.len() => {
                self.set(ConditionType::Ready, ConditionStatus::True, None, None)
            }
            _ => {}
        }
    }

    /// Writes a condition, stamping `lastTransitionTime` only when the status
    /// value changes.
    fn set(
        &mut self,
        condition_type: ConditionType,
        status: ConditionStatus,
        reason: Option<&str>,
        message: Option<&str>,
    ) {
        let reason = reason.map(str::to_string);
        let message = message.map(str::to_string);
        if let Some(existing) = self
            .conditions
            .iter_mut()
            .find(|condition| condition.condition_type == condition_type)
        {
            if existing.status != status {
                existing.status = status;
                existing.last_transition_time = Some(now());
            }
            existing.reason = reason;
            existing.message = message;
            return;
        }

        self.conditions.push(Condition {
            condition_type,
            status,
            reason,
            message,
            last_transition_time: Some(now()),
        });
        self.conditions.sort_by_key(|condition| condition.condition_type);
    }
}

fn non_empty(value: &str) -> Option<&str> {
    (!value.is_empty()).then_some(value)
}

fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::appforge::k8s::deployment::DeploymentCondition;

    fn deployment_status(available: &str, progressing: &str) -> DeploymentStatus {
        let condition = |condition_type: &str, status: &str, reason: &str| DeploymentCondition {
            condition_type: condition_type.to_string(),
            status: status.to_string(),
            reason: Some(reason.to_string()),
            message: Some(format!("{condition_type} is {status}")),
        };
        DeploymentStatus {
            conditions: vec![
                condition(CONDITION_AVAILABLE, available, "MinimumReplicas"),
                condition(CONDITION_PROGRESSING, progressing, "ReplicaSetUpdated"),
            ],
            ..Default::default()
        }
    }

    fn status_of(conditions: &[Condition], condition_type: ConditionType) -> ConditionStatus {
        conditions
            .iter()
            .find(|condition| condition.condition_type == condition_type)
            .map(|condition| condition.status)
            .unwrap_or(ConditionStatus::Unknown)
    }

    #[test]
    fn initialize_marks_everything_unknown() {
        let mut conditions = Vec::new();
        ConditionSet::new(&mut conditions).initialize();

        assert_eq!(conditions.len(), 2);
        assert!(conditions.iter().all(|condition| {
            condition.status == ConditionStatus::Unknown
                && condition.reason.as_deref() == Some(REASON_INITIALIZING)
        }));
        assert_eq!(conditions[0].condition_type, ConditionType::DeploymentReady);
    }

    #[test]
    fn progressing_rollout_is_unknown_not_false() {
        let mut conditions = Vec::new();
        let mut set = ConditionSet::new(&mut conditions);
        set.initialize();
        set.propagate_deployment_status(&deployment_status("False", "True"));

        let ready = set.get(ConditionType::DeploymentReady).expect("condition");
        assert_eq!(ready.status, ConditionStatus::Unknown);
        assert_eq!(ready.reason.as_deref(), Some("ReplicaSetUpdated"));
        assert_eq!(status_of(&conditions, ConditionType::Ready), ConditionStatus::Unknown);
    }

    #[test]
    fn available_status_is_mirrored() {
        let mut conditions = Vec::new();
        let mut set = ConditionSet::new(&mut conditions);
        set.initialize();

        set.propagate_deployment_status(&deployment_status("True", "True"));
        assert!(set.is_happy());

        set.propagate_deployment_status(&deployment_status("False", "False"));
        let ready = set.get(ConditionType::Ready).expect("ready");
        assert_eq!(ready.status, ConditionStatus::False);
        assert_eq!(ready.reason.as_deref(), Some("MinimumReplicas"));
        assert_eq!(ready.message.as_deref(), Some("Available is False"));

        set.propagate_deployment_status(&deployment_status("Unknown", "False"));
        assert_eq!(
            set.get(ConditionType::DeploymentReady).map(|c| c.status),
            Some(ConditionStatus::Unknown)
        );
    }

    #[test]
    fn incomplete_child_status_leaves_conditions_alone() {
        let mut conditions = Vec::new();
        let mut set = ConditionSet::new(&mut conditions);
        set.initialize();
        set.mark_true(ConditionType::DeploymentReady);
        let mut status = deployment_status("False", "False");
        status.conditions.truncate(1);

        set.propagate_deployment_status(&status);
        assert!(set.is_happy());
    }

    #[test]
    fn unrecognised_child_status_leaves_conditions_alone() {
        let mut conditions = Vec::new();
        let mut set = ConditionSet::new(&mut conditions);
        set.initialize();
        set.mark_true(ConditionType::DeploymentReady);

        set.propagate_deployment_status(&deployment_status("garbage", "False"));
        set.propagate_deployment_status(&deployment_status("True", "maybe"));

        let ready = set.get(ConditionType::DeploymentReady).expect("condition");
        assert_eq!(ready.status, ConditionStatus::True);
        assert!(set.is_happy());
    }

    #[test]
    fn child_status_parsing_is_strict() {
        assert_eq!(ConditionStatus::parse("True"), Some(ConditionStatus::True));
        assert_eq!(ConditionStatus::parse("Unknown"), Some(ConditionStatus::Unknown));
        assert_eq!(ConditionStatus::parse("true"), None);
        assert_eq!(ConditionStatus::parse(""), None);
    }

    #[test]
    fn not_owned_names_the_conflicting_object() {
        let mut conditions = Vec::new();
        let mut set = ConditionSet::new(&mut conditions);
        set.initialize();
        set.mark_deployment_not_owned("orders");

        let ready = set.get(ConditionType::Ready).expect("ready");
        assert_eq!(ready.status, ConditionStatus::False);
        assert_eq!(ready.reason.as_deref(), Some(REASON_NOT_OWNED));
        assert_eq!(
            ready.message.as_deref(),
            Some("There is an existing Deployment \"orders\" that the Application does not own.")
        );
    }

    #[test]
    fn transition_time_only_moves_on_status_change() {
        let mut conditions = Vec::new();
        let mut set = ConditionSet::new(&mut conditions);
        set.initialize();
        set.mark_false(ConditionType::DeploymentReady, "NotOwned", "first");
        let stamp = "2020-01-01T00:00:00Z".to_string();
        set.conditions[0].last_transition_time = Some(stamp.clone());

        set.mark_false(ConditionType::DeploymentReady, "NotOwned", "second");
        let condition = set.get(ConditionType::DeploymentReady).expect("condition");
        assert_eq!(condition.last_transition_time.as_deref(), Some(stamp.as_str()));
        assert_eq!(condition.message.as_deref(), Some("second"));

        set.mark_true(ConditionType::DeploymentReady);
        let condition = set.get(ConditionType::DeploymentReady).expect("condition");
        assert_ne!(condition.last_transition_time.as_deref(), Some(stamp.as_str()));
        assert!(condition.reason.is_none());
    }
}
