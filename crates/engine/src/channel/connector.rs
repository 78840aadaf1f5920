use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::io::BufReader;
use tokio::net::{UnixListener, UnixStream};
use tokio::task::JoinHandle;

use vigil_common::retry::{retry_async, RetryConfig};

use super::handshake::perform_handshake;
use super::session::{spawn_session, SessionDeps};
use super::ChannelError;

#[derive(Debug, Clone, Copy)]
pub struct ConnectorConfig {
    pub poll_interval: Duration,
    pub connect_timeout: Duration,
    pub handshake_timeout: Duration,
}

/// Connect mode: poll the socket directory for per-process endpoints named
/// `vigil-<pid>.sock` and dial any pid not already attached. A failed dial is
/// logged and retried on the next poll; nothing here is fatal.
pub fn spawn_connect_loop(
    socket_dir: PathBuf,
    config: ConnectorConfig,
    deps: SessionDeps,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            poll_once(&socket_dir, &config, &deps).await;
            tokio::time::sleep(config.poll_interval).await;
        }
    })
}

async fn poll_once(socket_dir: &Path, config: &ConnectorConfig, deps: &SessionDeps) {
    let mut entries = match tokio::fs::read_dir(socket_dir).await {
        Ok(entries) => entries,
        Err(e) => {
            tracing::debug!(dir = %socket_dir.display(), error = %e, "socket directory unreadable");
            return;
        }
    };

    while let Ok(Some(entry)) = entries.next_entry().await {
        let name = entry.file_name();
        let Some(pid) = name.to_str().and_then(pid_from_socket_name) else {
            continue;
        };
        if deps.registry.contains(pid) {
            continue;
        }
        let path = entry.path();
        if let Err(e) = dial(&path, config, deps).await {
            tracing::warn!(pid, socket = %path.display(), error = %e, "dial failed, will retry");
        }
    }
}

async fn dial(
    path: &Path,
    config: &ConnectorConfig,
    deps: &SessionDeps,
) -> Result<(), ChannelError> {
    let retry = RetryConfig {
        max_attempts: 2,
        initial_delay: Duration::from_millis(50),
        ..RetryConfig::default()
    };
    let stream = retry_async(&retry, || async {
        tokio::time::timeout(config.connect_timeout, UnixStream::connect(path))
            .await
            .map_err(|_| ChannelError::Timeout)?
            .map_err(ChannelError::Io)
    })
    .await?;

    attach(stream, config.handshake_timeout, deps.clone()).await
}

/// Listen mode: one well-known socket, processes dial in at their own
/// startup. Binding failure is fatal and reported to the caller; everything
/// after that only ever detaches the process it concerns.
pub fn spawn_listen_loop(
    socket_path: PathBuf,
    config: ConnectorConfig,
    deps: SessionDeps,
) -> Result<JoinHandle<()>, ChannelError> {
    if let Some(parent) = socket_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    // A stale socket file from a previous run would make bind fail.
    if socket_path.exists() {
        std::fs::remove_file(&socket_path)?;
    }
    let listener = UnixListener::bind(&socket_path)?;
    tracing::info!(socket = %socket_path.display(), "listening for process connections");

    Ok(tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((stream, _addr)) => {
                    let deps = deps.clone();
                    let handshake_timeout = config.handshake_timeout;
                    tokio::spawn(async move {
                        if let Err(e) = attach(stream, handshake_timeout, deps).await {
                            tracing::warn!(error = %e, "inbound connection failed handshake");
                        }
                    });
                }
                Err(e) => {
                    tracing::warn!(error = %e, "accept failed");
                }
            }
        }
    }))
}

async fn attach(
    stream: UnixStream,
    handshake_timeout: Duration,
    deps: SessionDeps,
) -> Result<(), ChannelError> {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let process = perform_handshake(&mut reader, &mut write_half, handshake_timeout).await?;
    spawn_session(reader, write_half, process, deps);
    Ok(())
}

pub fn pid_from_socket_name(name: &str) -> Option<u32> {
    name.strip_prefix("vigil-")?
        .strip_suffix(".sock")?
        .parse()
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt};
    use vigil_common::wire::{self, EngineMessage, ProcessMessage};

    use crate::hub::SignalHub;
    use crate::registry::ProcessRegistry;
    use crate::channel::session::SessionTable;

    fn deps() -> SessionDeps {
        SessionDeps {
            hub: Arc::new(SignalHub::new()),
            registry: Arc::new(ProcessRegistry::new()),
            sessions: Arc::new(SessionTable::new()),
        }
    }

    fn config() -> ConnectorConfig {
        ConnectorConfig {
            poll_interval: Duration::from_millis(20),
            connect_timeout: Duration::from_millis(500),
            handshake_timeout: Duration::from_millis(500),
        }
    }

    #[test]
    fn socket_name_parsing() {
        assert_eq!(pid_from_socket_name("vigil-1234.sock"), Some(1234));
        assert_eq!(pid_from_socket_name("vigil.sock"), None);
        assert_eq!(pid_from_socket_name("vigil-abc.sock"), None);
        assert_eq!(pid_from_socket_name("other-12.sock"), None);
        assert_eq!(pid_from_socket_name("vigil-12.txt"), None);
    }

    async fn fake_process_hello(stream: UnixStream, pid: u32) {
        let (read, mut write) = stream.into_split();
        let hello = wire::encode_line(&ProcessMessage::Hello {
            pid,
            process_name: "worker".into(),
            command_line: "worker --serve".into(),
        })
        .unwrap();
        write.write_all(hello.as_bytes()).await.unwrap();

        let mut reader = BufReader::new(read);
        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        assert!(matches!(
            wire::decode_line::<EngineMessage>(&line).unwrap(),
            EngineMessage::HelloAck { .. }
        ));
        // Stay attached long enough for assertions.
        tokio::time::sleep(Duration::from_millis(500)).await;
    }

    #[tokio::test]
    async fn listen_mode_attaches_inbound_process() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("vigil.sock");
        let deps = deps();
        let loop_handle = spawn_listen_loop(socket.clone(), config(), deps.clone()).unwrap();

        let stream = UnixStream::connect(&socket).await.unwrap();
        let peer = tokio::spawn(fake_process_hello(stream, 42));

        loop {
            if deps.registry.contains(42) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(deps.sessions.get(42).is_some());

        peer.abort();
        loop_handle.abort();
    }

    #[tokio::test]
    async fn listen_loop_survives_bad_handshake() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("vigil.sock");
        let deps = deps();
        let loop_handle = spawn_listen_loop(socket.clone(), config(), deps.clone()).unwrap();

        // First connection says something that is not a hello.
        let bad = UnixStream::connect(&socket).await.unwrap();
        let (_r, mut w) = bad.into_split();
        w.write_all(b"{\"msg\":\"nonsense\"}\n").await.unwrap();

        // A well-behaved process still attaches afterwards.
        let good = UnixStream::connect(&socket).await.unwrap();
        let peer = tokio::spawn(fake_process_hello(good, 7));
        loop {
            if deps.registry.contains(7) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        peer.abort();
        loop_handle.abort();
    }

    #[tokio::test]
    async fn connect_mode_dials_discovered_sockets() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("vigil-42.sock");
        let listener = UnixListener::bind(&socket).unwrap();

        // Fake process side: accept the engine's dial, then speak hello.
        let accept_task = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            fake_process_hello(stream, 42).await;
        });

        let deps = deps();
        let loop_handle = spawn_connect_loop(dir.path().to_path_buf(), config(), deps.clone());

        loop {
            if deps.registry.contains(42) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        accept_task.abort();
        loop_handle.abort();
    }

    #[tokio::test]
    async fn bind_to_bad_path_is_fatal() {
        let err = spawn_listen_loop(
            PathBuf::from("/dev/null/impossible/vigil.sock"),
            config(),
            deps(),
        );
        assert!(err.is_err());
    }
}
