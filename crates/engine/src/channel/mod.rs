mod connector;
mod handshake;
mod session;

pub use connector::{pid_from_socket_name, spawn_connect_loop, spawn_listen_loop, ConnectorConfig};
pub use handshake::perform_handshake;
pub use session::{CaptureClient, SessionDeps, SessionTable};

/// Transport failure on one process's channel. Always local to that process;
/// the discovery loops survive any of these.
#[derive(Debug)]
pub enum ChannelError {
    Io(std::io::Error),
    Timeout,
    Closed,
    Protocol(String),
}

impl std::fmt::Display for ChannelError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "io: {e}"),
            Self::Timeout => write!(f, "timed out"),
            Self::Closed => write!(f, "channel closed"),
            Self::Protocol(msg) => write!(f, "protocol: {msg}"),
        }
    }
}

impl std::error::Error for ChannelError {}

impl From<std::io::Error> for ChannelError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}
