use chrono::Utc;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const READY: &str = "Ready";
pub const FAILED: &str = "Failed";

pub const REASON_ALL_READY: &str = "AllDependenciesReady";
pub const REASON_NOT_READY: &str = "DependenciesNotReady";

/// Dependency key → the full condition list last observed on that resource.
pub type DependencyConditions = BTreeMap<String, Vec<Condition>>;

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq, Eq)]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: ConditionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(
        default,
        rename = "lastTransitionTime",
        skip_serializing_if = "Option::is_none"
    )]
    pub last_transition_time: Option<String>,
}

#[derive(
    Deserialize, Serialize, Clone, Copy, Debug, JsonSchema, PartialEq, Eq,
)]
#[serde(rename_all = "PascalCase")]
pub enum ConditionStatus {
    True,
    False,
    #[serde(other)]
    Unknown,
}

impl Condition {
    pub fn new(
        type_: &str,
        status: ConditionStatus,
        reason: &str,
        message: &str,
    ) -> Self {
        Self {
            type_: type_.to_string(),
            status,
            reason: Some(reason.to_string()),
            message: Some(message.to_string()),
            last_transition_time: Some(Utc::now().to_rfc3339()),
        }
    }
}

pub fn find<'a>(list: &'a [Condition], type_: &str) -> Option<&'a Condition> {
    list.iter().find(|c| c.type_ == type_)
}

pub fn is_true(list: &[Condition], type_: &str) -> bool {
    list.iter()
        .any(|c| c.type_ == type_ && c.status == ConditionStatus::True)
}

/// True when the list carries `Ready=True`. Empty lists are never ready.
pub fn has_ready(list: &[Condition]) -> bool {
    is_true(list, READY)
}

/// True only for a non-empty map whose every entry has-ready.
pub fn all_ready(map: &DependencyConditions) -> bool {
    !map.is_empty() && map.values().all(|l| has_ready(l))
}

/// Aggregate readiness: every recorded dependency is ready and all of the
/// expected dependencies have reported.
pub fn all_dependencies_ready(
    map: &DependencyConditions,
    expected: usize,
) -> bool {
    all_ready(map) && map.len() == expected
}

pub fn not_ready_keys(map: &DependencyConditions) -> Vec<String> {
    map.iter()
        .filter(|(_, l)| !has_ready(l))
        .map(|(k, _)| k.clone())
        .collect()
}

/// Build the aggregated `Ready` condition for a Request. The previous
/// `lastTransitionTime` is kept while the status does not flip.
pub fn ready_condition(
    ready: bool,
    not_ready: &[String],
    previous: Option<&Condition>,
) -> Condition {
    let status = if ready {
        ConditionStatus::True
    } else {
        ConditionStatus::False
    };
    let (reason, message) = if ready {
        (REASON_ALL_READY, "All dependencies report Ready".to_string())
    } else if not_ready.is_empty() {
        (
            REASON_NOT_READY,
            "Waiting for dependencies to report status".to_string(),
        )
    } else {
        (REASON_NOT_READY, format!("Not ready: {}", not_ready.join(", ")))
    };
    let last_transition_time = match previous {
        Some(p) if p.status == status => p.last_transition_time.clone(),
        _ => Some(Utc::now().to_rfc3339()),
    };
    Condition {
        type_: READY.to_string(),
        status,
        reason: Some(reason.to_string()),
        message: Some(message),
        last_transition_time,
    }
}

/// Replace conditions of the same type, keep the rest in place.
pub fn upsert(existing: &[Condition], incoming: Condition) -> Vec<Condition> {
    let mut out = existing.to_vec();
    match out.iter().position(|c| c.type_ == incoming.type_) {
        Some(idx) => out[idx] = incoming,
        None => out.push(incoming),
    }
    out
}
