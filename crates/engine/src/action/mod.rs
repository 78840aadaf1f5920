mod executor;

pub use executor::{spawn_executor, ExecutorDeps};

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use vigil_common::identity::TargetProcess;

use crate::config::Rule;
use crate::status::InstanceKey;

/// Most specific failure cause for one action invocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ErrorKind {
    Timeout,
    Channel { message: String },
    Subscription { message: String },
    Egress { message: String },
    Failed { message: String },
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Timeout => write!(f, "timed out"),
            Self::Channel { message } => write!(f, "channel: {message}"),
            Self::Subscription { message } => write!(f, "subscription: {message}"),
            Self::Egress { message } => write!(f, "egress: {message}"),
            Self::Failed { message } => write!(f, "failed: {message}"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActionResult {
    pub action: String,
    pub success: bool,
    pub artifact_ref: Option<String>,
    pub error: Option<ErrorKind>,
    pub duration_ms: i64,
}

impl ActionResult {
    pub fn success(action: &str, artifact_ref: Option<String>, duration_ms: i64) -> Self {
        Self {
            action: action.to_string(),
            success: true,
            artifact_ref,
            error: None,
            duration_ms,
        }
    }

    pub fn failure(action: &str, error: ErrorKind, duration_ms: i64) -> Self {
        Self {
            action: action.to_string(),
            success: false,
            artifact_ref: None,
            error: Some(error),
            duration_ms,
        }
    }
}

/// An admitted fire event, queued for action execution. Carries the teardown
/// flag so a queued-but-unstarted execution can be cancelled and an in-flight
/// one can have its result discarded.
#[derive(Clone)]
pub struct FireEvent {
    pub key: InstanceKey,
    pub rule: Arc<Rule>,
    pub process: TargetProcess,
    pub timestamp_ms: i64,
    pub torn_down: Arc<AtomicBool>,
}
