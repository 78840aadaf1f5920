use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identity of a managed process attached over the diagnostic channel.
///
/// Built when the handshake completes; the session token distinguishes
/// re-attachments of a recycled pid.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TargetProcess {
    pub pid: u32,
    pub process_name: String,
    pub command_line: String,
    pub session_token: Uuid,
    pub attached_at_ms: i64,
}

impl TargetProcess {
    pub fn new(pid: u32, process_name: String, command_line: String, attached_at_ms: i64) -> Self {
        Self {
            pid,
            process_name,
            command_line,
            session_token: Uuid::new_v4(),
            attached_at_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reattachment_gets_fresh_session_token() {
        let a = TargetProcess::new(42, "worker".into(), "worker --serve".into(), 1000);
        let b = TargetProcess::new(42, "worker".into(), "worker --serve".into(), 2000);
        assert_ne!(a.session_token, b.session_token);
    }
}
