use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use uuid::Uuid;

use vigil_common::wire::CaptureKind;

use super::{ActionResult, ErrorKind, FireEvent};
use crate::channel::{CaptureClient, SessionTable};
use crate::config::ActionSpec;
use crate::egress::{Artifact, EgressTable};
use crate::hub::SignalHub;
use crate::status::{InstanceKey, StatusStore};

pub struct ExecutorDeps {
    pub sessions: Arc<SessionTable>,
    pub egress: Arc<EgressTable>,
    pub hub: Arc<SignalHub>,
    pub status: Arc<StatusStore>,
    pub action_timeout: Duration,
    in_flight: DashMap<InstanceKey, ()>,
}

impl ExecutorDeps {
    pub fn new(
        sessions: Arc<SessionTable>,
        egress: Arc<EgressTable>,
        hub: Arc<SignalHub>,
        status: Arc<StatusStore>,
        action_timeout: Duration,
    ) -> Self {
        Self {
            sessions,
            egress,
            hub,
            status,
            action_timeout,
            in_flight: DashMap::new(),
        }
    }
}

/// Drains admitted fire events. Each execution runs on its own task so one
/// slow capture never delays other instances; the per-instance in-flight
/// gate keeps executions for a single instance mutually exclusive.
pub fn spawn_executor(
    mut fire_rx: mpsc::Receiver<FireEvent>,
    deps: Arc<ExecutorDeps>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(fire) = fire_rx.recv().await {
            // Queued but torn down in the meantime: cancelled, never started.
            if fire.torn_down.load(Ordering::SeqCst) {
                tracing::debug!(instance = %fire.key, "dropping queued fire for torn-down instance");
                continue;
            }

            use dashmap::mapref::entry::Entry;
            match deps.in_flight.entry(fire.key.clone()) {
                Entry::Occupied(_) => {
                    tracing::warn!(instance = %fire.key, "execution already in flight, dropping fire");
                    deps.status.record_missed(&fire.key);
                    continue;
                }
                Entry::Vacant(slot) => {
                    slot.insert(());
                }
            }

            let deps = deps.clone();
            tokio::spawn(async move {
                let results = run_actions(&fire, &deps).await;
                deps.in_flight.remove(&fire.key);

                if fire.torn_down.load(Ordering::SeqCst) {
                    tracing::debug!(instance = %fire.key, "instance torn down, discarding results");
                    return;
                }
                let failed = results.iter().filter(|r| !r.success).count();
                if failed > 0 {
                    tracing::warn!(instance = %fire.key, failed, "action pipeline finished with failures");
                } else {
                    tracing::info!(instance = %fire.key, actions = results.len(), "action pipeline complete");
                }
                deps.status.record_results(&fire.key, results);
            });
        }
    })
}

/// Runs the rule's ordered action list under one shared deadline. Once the
/// deadline elapses, remaining actions are reported as timed out and skipped.
async fn run_actions(fire: &FireEvent, deps: &ExecutorDeps) -> Vec<ActionResult> {
    let deadline = Instant::now() + deps.action_timeout;
    let mut results = Vec::with_capacity(fire.rule.actions.len());

    for spec in &fire.rule.actions {
        let started = Instant::now();
        let remaining = deadline.saturating_duration_since(started);
        if remaining.is_zero() {
            results.push(ActionResult::failure(spec.name(), ErrorKind::Timeout, 0));
            continue;
        }

        let outcome = tokio::time::timeout(remaining, run_one(spec, fire, deps)).await;
        let duration_ms = started.elapsed().as_millis() as i64;
        results.push(match outcome {
            Ok(Ok(artifact_ref)) => ActionResult::success(spec.name(), artifact_ref, duration_ms),
            Ok(Err(error)) => ActionResult::failure(spec.name(), error, duration_ms),
            Err(_) => ActionResult::failure(spec.name(), ErrorKind::Timeout, duration_ms),
        });
    }

    results
}

async fn run_one(
    spec: &ActionSpec,
    fire: &FireEvent,
    deps: &ExecutorDeps,
) -> Result<Option<String>, ErrorKind> {
    match spec {
        ActionSpec::CollectDump { egress } => {
            let bytes = capture(fire, deps, CaptureKind::Dump).await?;
            let name = artifact_name(fire, "dump", "bin");
            persist(deps, egress.as_deref(), Artifact { name, bytes })
                .await
                .map(Some)
        }
        ActionSpec::CollectTrace {
            duration_ms,
            egress,
        } => {
            let bytes = capture(
                fire,
                deps,
                CaptureKind::Trace {
                    duration_ms: *duration_ms,
                },
            )
            .await?;
            let name = artifact_name(fire, "trace", "bin");
            persist(deps, egress.as_deref(), Artifact { name, bytes })
                .await
                .map(Some)
        }
        ActionSpec::CollectMetrics { egress } => {
            let samples = deps.hub.recent(fire.process.pid);
            let bytes = serde_json::to_vec_pretty(&samples)
                .map_err(|e| ErrorKind::Failed {
                    message: format!("serialize metrics: {e}"),
                })?;
            let name = artifact_name(fire, "metrics", "json");
            persist(deps, egress.as_deref(), Artifact { name, bytes })
                .await
                .map(Some)
        }
        ActionSpec::Execute { program, args } => {
            let status = tokio::process::Command::new(program)
                .args(args)
                .status()
                .await
                .map_err(|e| ErrorKind::Failed {
                    message: format!("spawn {program}: {e}"),
                })?;
            if status.success() {
                Ok(None)
            } else {
                Err(ErrorKind::Failed {
                    message: format!("{program} exited with {status}"),
                })
            }
        }
    }
}

async fn capture(
    fire: &FireEvent,
    deps: &ExecutorDeps,
    kind: CaptureKind,
) -> Result<Vec<u8>, ErrorKind> {
    let client: CaptureClient =
        deps.sessions
            .get(fire.process.pid)
            .ok_or_else(|| ErrorKind::Channel {
                message: format!("pid {} is no longer attached", fire.process.pid),
            })?;
    client.capture(kind).await.map_err(|e| ErrorKind::Channel {
        message: e.to_string(),
    })
}

async fn persist(
    deps: &ExecutorDeps,
    egress: Option<&str>,
    artifact: Artifact,
) -> Result<String, ErrorKind> {
    // Rule loading already rejected artifact actions without a sink; hitting
    // either arm here means the egress table changed underneath a live rule.
    let name = egress.ok_or_else(|| ErrorKind::Egress {
        message: "no egress sink configured".into(),
    })?;
    let sink = deps.egress.get(name).ok_or_else(|| ErrorKind::Egress {
        message: format!("unknown egress sink '{name}'"),
    })?;
    sink.persist(&artifact).await.map_err(|e| ErrorKind::Egress {
        message: e.to_string(),
    })
}

fn artifact_name(fire: &FireEvent, kind: &str, ext: &str) -> String {
    format!(
        "{}-{}-{}-{}.{}",
        fire.rule.name,
        fire.process.pid,
        kind,
        Uuid::new_v4().simple(),
        ext
    )
}
