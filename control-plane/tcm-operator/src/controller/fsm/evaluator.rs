use std::fmt;

use crate::conditions::{self, DependencyConditions};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Pending,
    Provisioning,
    Ready,
    Running,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Pending => "Pending",
            Phase::Provisioning => "Provisioning",
            Phase::Ready => "Ready",
            Phase::Running => "Running",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Pending" => Some(Phase::Pending),
            "Provisioning" => Some(Phase::Provisioning),
            "Ready" => Some(Phase::Ready),
            "Running" => Some(Phase::Running),
            _ => None,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub struct EvalInput<'a> {
    pub generated_name: Option<&'a str>,
    pub dependencies: &'a DependencyConditions,
    pub expected_dependencies: usize,
    pub workload_name: Option<&'a str>,
}

#[derive(Debug, PartialEq, Eq)]
pub struct EvalOutput {
    pub phase: Phase,
    pub ready: bool,
    pub not_ready: Vec<String>,
}

/// Derive the informational phase and aggregate readiness from status.
pub fn evaluate(input: EvalInput) -> EvalOutput {
    let ready = conditions::all_dependencies_ready(
        input.dependencies,
        input.expected_dependencies,
    );
    let not_ready = conditions::not_ready_keys(input.dependencies);

    let phase = if input.generated_name.is_none() || input.dependencies.is_empty()
    {
        Phase::Pending
    } else if input.workload_name.is_some() {
        Phase::Running
    } else if ready {
        Phase::Ready
    } else {
        Phase::Provisioning
    };

    EvalOutput {
        phase,
        ready,
        not_ready,
    }
}
