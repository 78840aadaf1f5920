use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};

use vigil_common::identity::TargetProcess;
use vigil_common::time::epoch_ms;
use vigil_common::wire::{self, EngineMessage, ProcessMessage};

use super::ChannelError;

/// Two-phase attach, awaiting-hello then attached: the peer speaks first. A
/// process may suspend its own startup until the ack arrives, so the engine
/// never closes the connection mid-handshake; the only aborts are the bounded
/// timeout and a protocol violation.
pub async fn perform_handshake(
    reader: &mut BufReader<OwnedReadHalf>,
    writer: &mut OwnedWriteHalf,
    timeout: Duration,
) -> Result<TargetProcess, ChannelError> {
    // Phase 1: awaiting hello.
    let mut line = String::new();
    let n = tokio::time::timeout(timeout, reader.read_line(&mut line))
        .await
        .map_err(|_| ChannelError::Timeout)??;
    if n == 0 {
        return Err(ChannelError::Closed);
    }

    let hello: ProcessMessage =
        wire::decode_line(&line).map_err(|e| ChannelError::Protocol(e.to_string()))?;
    let ProcessMessage::Hello {
        pid,
        process_name,
        command_line,
    } = hello
    else {
        return Err(ChannelError::Protocol(
            "expected hello as first message".into(),
        ));
    };

    let process = TargetProcess::new(pid, process_name, command_line, epoch_ms());
    let ack = wire::encode_line(&EngineMessage::HelloAck {
        session_token: process.session_token,
    })
    .map_err(|e| ChannelError::Protocol(e.to_string()))?;
    writer.write_all(ack.as_bytes()).await?;

    // Phase 2: attached.
    tracing::debug!(pid, name = %process.process_name, "handshake complete");
    Ok(process)
}
