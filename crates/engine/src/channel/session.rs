use std::sync::Arc;

use dashmap::DashMap;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use vigil_common::identity::TargetProcess;
use vigil_common::wire::{self, CaptureKind, EngineMessage, ProcessMessage};

use super::ChannelError;
use crate::hub::SignalHub;
use crate::registry::ProcessRegistry;

const OUTBOUND_CAPACITY: usize = 64;

/// Everything a session needs to wire an attached process into the engine.
#[derive(Clone)]
pub struct SessionDeps {
    pub hub: Arc<SignalHub>,
    pub registry: Arc<ProcessRegistry>,
    pub sessions: Arc<SessionTable>,
}

/// Capture clients for currently attached processes, keyed by pid.
#[derive(Default)]
pub struct SessionTable {
    inner: DashMap<u32, CaptureClient>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, pid: u32) -> Option<CaptureClient> {
        self.inner.get(&pid).map(|c| c.value().clone())
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    fn insert(&self, pid: u32, client: CaptureClient) {
        self.inner.insert(pid, client);
    }

    fn remove(&self, pid: u32) {
        self.inner.remove(&pid);
    }

    #[cfg(test)]
    pub fn insert_for_test(&self, pid: u32, client: CaptureClient) {
        self.insert(pid, client);
    }
}

type PendingCaptures = Arc<DashMap<Uuid, oneshot::Sender<Result<Vec<u8>, ChannelError>>>>;

/// Handle for requesting dump/trace captures over a process's channel. The
/// reply is matched back to the caller by request id; if the session dies
/// first, the caller sees `ChannelError::Closed`.
#[derive(Clone)]
pub struct CaptureClient {
    outbound: mpsc::Sender<EngineMessage>,
    pending: PendingCaptures,
}

impl CaptureClient {
    pub async fn capture(&self, kind: CaptureKind) -> Result<Vec<u8>, ChannelError> {
        let request_id = Uuid::new_v4();
        let (tx, rx) = oneshot::channel();
        self.pending.insert(request_id, tx);

        let request = EngineMessage::CaptureRequest { request_id, kind };
        if self.outbound.send(request).await.is_err() {
            self.pending.remove(&request_id);
            return Err(ChannelError::Closed);
        }

        match rx.await {
            Ok(result) => result,
            Err(_) => Err(ChannelError::Closed),
        }
    }

    #[cfg(test)]
    pub fn for_test() -> (Self, mpsc::Receiver<EngineMessage>, PendingCaptures) {
        let (outbound, rx) = mpsc::channel(OUTBOUND_CAPACITY);
        let pending: PendingCaptures = Arc::new(DashMap::new());
        (
            Self {
                outbound,
                pending: pending.clone(),
            },
            rx,
            pending,
        )
    }
}

/// Takes over an attached (post-handshake) channel: registers the process
/// everywhere, then pumps the socket until it closes, at which point all of
/// that is unwound and only this process detaches.
pub fn spawn_session(
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    process: TargetProcess,
    deps: SessionDeps,
) {
    let pid = process.pid;
    let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_CAPACITY);
    let pending: PendingCaptures = Arc::new(DashMap::new());

    let client = CaptureClient {
        outbound: outbound_tx,
        pending: pending.clone(),
    };

    deps.hub.register(pid);
    deps.sessions.insert(pid, client);
    deps.registry.upsert(process.clone());
    tracing::info!(pid, name = %process.process_name, "process attached");

    tokio::spawn(async move {
        let writer_task = tokio::spawn(write_loop(writer, outbound_rx));
        read_loop(reader, pid, &deps, &pending).await;

        writer_task.abort();
        deps.sessions.remove(pid);
        deps.hub.unregister(pid);
        deps.registry.remove(pid);
        // Wakes any capture waiter with Closed.
        pending.clear();
        tracing::info!(pid, "process detached");
    });
}

async fn read_loop(
    mut reader: BufReader<OwnedReadHalf>,
    pid: u32,
    deps: &SessionDeps,
    pending: &PendingCaptures,
) {
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => return,
            Ok(_) => {
                if line.trim().is_empty() {
                    continue;
                }
                match wire::decode_line::<ProcessMessage>(&line) {
                    Ok(ProcessMessage::Sample(sample)) => deps.hub.publish(pid, sample),
                    Ok(ProcessMessage::CaptureReply {
                        request_id,
                        payload_b64,
                        error,
                    }) => resolve_capture(pending, request_id, payload_b64, error),
                    Ok(ProcessMessage::Hello { .. }) => {
                        tracing::warn!(pid, "unexpected hello after handshake, detaching");
                        return;
                    }
                    Err(e) => {
                        tracing::warn!(pid, error = %e, "malformed channel message, detaching");
                        return;
                    }
                }
            }
            Err(e) => {
                tracing::warn!(pid, error = %e, "channel read failed, detaching");
                return;
            }
        }
    }
}

fn resolve_capture(
    pending: &PendingCaptures,
    request_id: Uuid,
    payload_b64: Option<String>,
    error: Option<String>,
) {
    let Some((_, tx)) = pending.remove(&request_id) else {
        tracing::warn!(%request_id, "capture reply for unknown request");
        return;
    };
    let result = match (payload_b64, error) {
        (Some(b64), None) => wire::decode_payload(&b64)
            .map_err(|e| ChannelError::Protocol(format!("bad capture payload: {e}"))),
        (_, Some(message)) => Err(ChannelError::Protocol(message)),
        (None, None) => Err(ChannelError::Protocol(
            "capture reply with neither payload nor error".into(),
        )),
    };
    let _ = tx.send(result);
}

async fn write_loop(mut writer: OwnedWriteHalf, mut rx: mpsc::Receiver<EngineMessage>) {
    while let Some(msg) = rx.recv().await {
        match wire::encode_line(&msg) {
            Ok(line) => {
                if writer.write_all(line.as_bytes()).await.is_err() {
                    return;
                }
            }
            Err(e) => tracing::warn!(error = %e, "failed to encode outbound message"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::UnixStream;
    use vigil_common::signal::SignalSample;

    fn deps() -> SessionDeps {
        SessionDeps {
            hub: Arc::new(SignalHub::new()),
            registry: Arc::new(ProcessRegistry::new()),
            sessions: Arc::new(SessionTable::new()),
        }
    }

    fn attach(process_pid: u32, deps: &SessionDeps) -> UnixStream {
        let (engine_side, process_side) = UnixStream::pair().unwrap();
        let (read_half, write_half) = engine_side.into_split();
        let process = TargetProcess::new(
            process_pid,
            "worker".into(),
            "worker --serve".into(),
            1000,
        );
        spawn_session(
            BufReader::new(read_half),
            write_half,
            process,
            deps.clone(),
        );
        process_side
    }

    #[tokio::test]
    async fn samples_flow_to_hub_subscribers() {
        let deps = deps();
        let process_side = attach(7, &deps);
        let mut sub = deps.hub.subscribe(7).unwrap();

        let (_r, mut w) = process_side.into_split();
        let line =
            wire::encode_line(&ProcessMessage::Sample(SignalSample::counter(
                "runtime", "heap", 15.0, 1000,
            )))
            .unwrap();
        w.write_all(line.as_bytes()).await.unwrap();

        let sample = tokio::time::timeout(std::time::Duration::from_secs(2), sub.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(sample.timestamp_ms(), 1000);
    }

    #[tokio::test]
    async fn capture_round_trip() {
        let deps = deps();
        let process_side = attach(7, &deps);
        let client = deps.sessions.get(7).unwrap();

        // Fake process: answer the capture request with a payload.
        let peer = tokio::spawn(async move {
            let (r, mut w) = process_side.into_split();
            let mut reader = BufReader::new(r);
            let mut line = String::new();
            reader.read_line(&mut line).await.unwrap();
            let EngineMessage::CaptureRequest { request_id, kind } =
                wire::decode_line(&line).unwrap()
            else {
                panic!("expected capture request");
            };
            assert_eq!(kind.label(), "dump");
            let reply = wire::encode_line(&ProcessMessage::CaptureReply {
                request_id,
                payload_b64: Some(wire::encode_payload(b"dump-bytes")),
                error: None,
            })
            .unwrap();
            w.write_all(reply.as_bytes()).await.unwrap();
            // Keep the socket open until the capture resolves.
            tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        });

        let bytes = client.capture(CaptureKind::Dump).await.unwrap();
        assert_eq!(bytes, b"dump-bytes");
        peer.await.unwrap();
    }

    #[tokio::test]
    async fn disconnect_unwinds_everything() {
        let deps = deps();
        let process_side = attach(7, &deps);
        // Attachment happens before the session task starts.
        assert!(deps.registry.get(7).is_some());
        assert!(deps.sessions.get(7).is_some());

        drop(process_side);
        loop {
            if deps.registry.get(7).is_none()
                && deps.sessions.get(7).is_none()
                && deps.hub.subscribe(7).is_err()
            {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn capture_error_reply_propagates() {
        let deps = deps();
        let process_side = attach(7, &deps);
        let client = deps.sessions.get(7).unwrap();

        let peer = tokio::spawn(async move {
            let (r, mut w) = process_side.into_split();
            let mut reader = BufReader::new(r);
            let mut line = String::new();
            reader.read_line(&mut line).await.unwrap();
            let EngineMessage::CaptureRequest { request_id, .. } =
                wire::decode_line(&line).unwrap()
            else {
                panic!("expected capture request");
            };
            let reply = wire::encode_line(&ProcessMessage::CaptureReply {
                request_id,
                payload_b64: None,
                error: Some("dump not supported".into()),
            })
            .unwrap();
            w.write_all(reply.as_bytes()).await.unwrap();
            tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        });

        let err = client.capture(CaptureKind::Dump).await.unwrap_err();
        assert!(matches!(err, ChannelError::Protocol(_)));
        peer.await.unwrap();
    }
}
