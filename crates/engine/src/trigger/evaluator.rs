use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use vigil_common::identity::TargetProcess;
use vigil_common::time::epoch_ms;

use super::eval::TriggerEval;
use super::state::InstanceState;
use crate::action::FireEvent;
use crate::config::Rule;
use crate::hub::SignalHub;
use crate::status::{InstanceKey, StatusStore};
use crate::throttle::{Admission, Throttle};

/// Shared dependencies handed to every instance task.
#[derive(Clone)]
pub struct InstanceDeps {
    pub hub: Arc<SignalHub>,
    pub status: Arc<StatusStore>,
    pub fire_tx: mpsc::Sender<FireEvent>,
}

/// Handle owned by the matcher for one live instance.
pub struct InstanceHandle {
    pub key: InstanceKey,
    torn_down: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl InstanceHandle {
    /// Stops the evaluator task and marks the instance so queued or in-flight
    /// action executions are cancelled or discarded. Aborting the task drops
    /// its signal subscription guard.
    pub fn teardown(&self) {
        self.torn_down.store(true, Ordering::SeqCst);
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

pub fn spawn_instance(
    rule: Arc<Rule>,
    process: TargetProcess,
    deps: InstanceDeps,
) -> InstanceHandle {
    let key = InstanceKey::new(&rule.name, process.pid);
    let torn_down = Arc::new(AtomicBool::new(false));
    deps.status.insert_starting(key.clone(), &process, epoch_ms());

    let task = tokio::spawn(run_instance(
        rule,
        process,
        deps,
        key.clone(),
        torn_down.clone(),
    ));

    InstanceHandle {
        key,
        torn_down,
        task,
    }
}

async fn run_instance(
    rule: Arc<Rule>,
    process: TargetProcess,
    deps: InstanceDeps,
    key: InstanceKey,
    torn_down: Arc<AtomicBool>,
) {
    // The subscription guard must be held for the whole task; dropping it on
    // any exit path (including abort) releases the stream and the gauge.
    let mut subscription = match deps.hub.subscribe(process.pid) {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!(instance = %key, error = %e, "signal subscription failed");
            deps.status.fault(&key, e.to_string());
            return;
        }
    };

    let started_at_ms = epoch_ms();
    let mut throttle = Throttle::new(rule.limits.clone(), started_at_ms);
    let mut eval = TriggerEval::new(&rule.trigger);

    deps.status.set_state(&key, InstanceState::Running);
    tracing::info!(instance = %key, trigger = ?rule.trigger, "rule instance running");

    if eval.on_start()
        && !handle_fire(&rule, &process, &deps, &key, &torn_down, &mut throttle, epoch_ms())
    {
        return;
    }

    let expiry = rule
        .limits
        .rule_duration_ms
        .map(|d| tokio::time::Instant::now() + Duration::from_millis(d.max(0) as u64));

    loop {
        let expiry_elapsed = async {
            match expiry {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            _ = expiry_elapsed => {
                deps.status.set_state(&key, InstanceState::Expired);
                tracing::info!(instance = %key, "rule duration elapsed, instance expired");
                return;
            }
            sample = subscription.recv() => {
                let Some(sample) = sample else {
                    tracing::debug!(instance = %key, "signal stream closed");
                    return;
                };
                if eval.on_sample(&sample) {
                    let fired_at = sample.timestamp_ms();
                    if !handle_fire(&rule, &process, &deps, &key, &torn_down, &mut throttle, fired_at) {
                        return;
                    }
                }
            }
        }
    }
}

/// Runs one fire event through admission. Returns `false` when the instance
/// has expired and the task should stop.
fn handle_fire(
    rule: &Arc<Rule>,
    process: &TargetProcess,
    deps: &InstanceDeps,
    key: &InstanceKey,
    torn_down: &Arc<AtomicBool>,
    throttle: &mut Throttle,
    timestamp_ms: i64,
) -> bool {
    deps.status.record_fired(key);

    match throttle.admit(timestamp_ms) {
        Admission::Admitted => {
            deps.status.record_admitted(key);
            deps.status.set_state(key, InstanceState::Running);
            let fire = FireEvent {
                key: key.clone(),
                rule: rule.clone(),
                process: process.clone(),
                timestamp_ms,
                torn_down: torn_down.clone(),
            };
            // Dispatch must not block trigger evaluation.
            if deps.fire_tx.try_send(fire).is_err() {
                tracing::warn!(instance = %key, "action queue full, dropping admitted fire");
                deps.status.record_missed(key);
            }
            true
        }
        Admission::Throttled => {
            deps.status.record_throttled(key);
            deps.status.set_state(key, InstanceState::Throttled);
            tracing::debug!(instance = %key, "fire throttled");
            true
        }
        Admission::Expired => {
            deps.status.set_state(key, InstanceState::Expired);
            tracing::info!(instance = %key, "fire after rule duration, instance expired");
            false
        }
    }
}
