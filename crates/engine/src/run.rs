use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};

use crate::action::{spawn_executor, ExecutorDeps};
use crate::channel::{
    spawn_connect_loop, spawn_listen_loop, ConnectorConfig, SessionDeps, SessionTable,
};
use crate::config::{ChannelMode, EngineConfig, RuleSet, RulesDocError};
use crate::egress::EgressTable;
use crate::hub::SignalHub;
use crate::matcher::{spawn_matcher, Matcher};
use crate::registry::ProcessRegistry;
use crate::shutdown;
use crate::status::server::{self as status_server, ApiState};
use crate::status::StatusStore;
use crate::trigger::InstanceDeps;

const FIRE_QUEUE_CAPACITY: usize = 256;

pub async fn run(config: EngineConfig) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let egress = Arc::new(EgressTable::from_config(&config.egress));

    // An unreadable rules document at startup is fatal; after that, reloads
    // that fail keep the running generation.
    let rule_set = Arc::new(load_rule_set(&config.rules_path, &egress, 1)?);
    tracing::info!(
        rules = rule_set.rules.len(),
        inert = rule_set.inert.len(),
        "rules loaded"
    );

    let hub = Arc::new(SignalHub::new());
    let registry = Arc::new(ProcessRegistry::new());
    let sessions = Arc::new(SessionTable::new());
    let status = Arc::new(StatusStore::new());

    let (fire_tx, fire_rx) = mpsc::channel(FIRE_QUEUE_CAPACITY);
    let executor_deps = Arc::new(ExecutorDeps::new(
        sessions.clone(),
        egress.clone(),
        hub.clone(),
        status.clone(),
        Duration::from_secs(config.action_timeout_seconds),
    ));
    let _executor = spawn_executor(fire_rx, executor_deps);

    let (rules_tx, rules_rx) = watch::channel(rule_set.clone());

    let instance_deps = InstanceDeps {
        hub: hub.clone(),
        status: status.clone(),
        fire_tx,
    };
    let matcher = Matcher::new(
        rule_set,
        registry.clone(),
        status.clone(),
        instance_deps,
    );
    let _matcher = spawn_matcher(matcher, registry.watch(), rules_rx.clone());

    let session_deps = SessionDeps {
        hub,
        registry,
        sessions,
    };
    let connector_config = ConnectorConfig {
        poll_interval: Duration::from_secs(config.poll_interval_seconds),
        connect_timeout: Duration::from_millis(config.connect_timeout_ms),
        handshake_timeout: Duration::from_millis(config.handshake_timeout_ms),
    };
    let _connector = match config.mode {
        ChannelMode::Connect => spawn_connect_loop(
            PathBuf::from(&config.socket_dir),
            connector_config,
            session_deps,
        ),
        // Failing to bind our own endpoint is fatal.
        ChannelMode::Listen => {
            spawn_listen_loop(config.listen_socket_path(), connector_config, session_deps)?
        }
    };

    let api_state = ApiState {
        status,
        rules_rx,
    };
    let listener = TcpListener::bind(("127.0.0.1", config.api_port)).await?;
    tracing::info!(port = config.api_port, "status API listening");
    tokio::spawn(async move {
        if let Err(e) = status_server::serve(listener, api_state).await {
            tracing::error!(error = %e, "status API error");
        }
    });

    spawn_reload_loop(config.rules_path.clone(), egress, rules_tx);

    tracing::info!(mode = ?config.mode, "engine running");
    shutdown::wait_for_shutdown().await;
    tracing::info!("shutting down");
    Ok(())
}

fn load_rule_set(
    path: &str,
    egress: &EgressTable,
    generation: u64,
) -> Result<RuleSet, RulesDocError> {
    let doc = std::fs::read_to_string(path)?;
    RuleSet::parse(generation, &doc, &egress.names())
}

#[cfg(not(unix))]
fn spawn_reload_loop(
    _rules_path: String,
    _egress: Arc<EgressTable>,
    _rules_tx: watch::Sender<Arc<RuleSet>>,
) {
}

/// SIGHUP re-reads the rules file and publishes a new generation. A failed
/// reload leaves the current generation untouched; the matcher only ever
/// sees complete rule sets.
#[cfg(unix)]
fn spawn_reload_loop(
    rules_path: String,
    egress: Arc<EgressTable>,
    rules_tx: watch::Sender<Arc<RuleSet>>,
) {
    tokio::spawn(async move {
        let Some(mut hup) = shutdown::reload_signal() else {
            return;
        };
        let mut generation = 1u64;
        while hup.recv().await.is_some() {
            generation += 1;
            match load_rule_set(&rules_path, &egress, generation) {
                Ok(new_set) => {
                    tracing::info!(
                        generation,
                        rules = new_set.rules.len(),
                        inert = new_set.inert.len(),
                        "rules reloaded"
                    );
                    let _ = rules_tx.send(Arc::new(new_set));
                }
                Err(e) => {
                    tracing::error!(error = %e, "rules reload failed, keeping current generation");
                }
            }
        }
    });
}
