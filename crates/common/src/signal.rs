use serde::{Deserialize, Serialize};

/// A raw runtime signal sample emitted by a managed process.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SignalSample {
    Counter {
        provider: String,
        name: String,
        value: f64,
        timestamp_ms: i64,
    },
    Request {
        duration_ms: f64,
        status: u16,
        timestamp_ms: i64,
    },
}

impl SignalSample {
    pub fn timestamp_ms(&self) -> i64 {
        match self {
            Self::Counter { timestamp_ms, .. } | Self::Request { timestamp_ms, .. } => {
                *timestamp_ms
            }
        }
    }

    pub fn counter(provider: &str, name: &str, value: f64, timestamp_ms: i64) -> Self {
        Self::Counter {
            provider: provider.to_string(),
            name: name.to_string(),
            value,
            timestamp_ms,
        }
    }

    pub fn request(duration_ms: f64, status: u16, timestamp_ms: i64) -> Self {
        Self::Request {
            duration_ms,
            status,
            timestamp_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_accessor_covers_both_kinds() {
        assert_eq!(SignalSample::counter("rt", "heap", 1.0, 42).timestamp_ms(), 42);
        assert_eq!(SignalSample::request(12.5, 200, 99).timestamp_ms(), 99);
    }

    #[test]
    fn counter_wire_shape() {
        let s = SignalSample::counter("runtime", "heap", 15.0, 1000);
        let json = serde_json::to_string(&s).unwrap();
        assert!(json.contains(r#""kind":"counter""#));
        assert!(json.contains(r#""provider":"runtime""#));
    }
}
