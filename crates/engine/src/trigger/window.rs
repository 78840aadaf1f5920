use std::collections::VecDeque;

/// Rolling window over request samples, evicted by sample timestamp.
pub struct RequestWindow {
    window_ms: i64,
    samples: VecDeque<RequestSample>,
}

#[derive(Debug, Clone, Copy)]
struct RequestSample {
    timestamp_ms: i64,
    duration_ms: f64,
    status: u16,
}

impl RequestWindow {
    pub fn new(window_ms: i64) -> Self {
        Self {
            window_ms,
            samples: VecDeque::new(),
        }
    }

    pub fn push(&mut self, timestamp_ms: i64, duration_ms: f64, status: u16) {
        self.samples.push_back(RequestSample {
            timestamp_ms,
            duration_ms,
            status,
        });
        self.evict(timestamp_ms);
    }

    pub fn count(&self) -> u64 {
        self.samples.len() as u64
    }

    /// Nearest-rank percentile of request durations; `None` when empty.
    pub fn percentile_duration(&self, percentile: f64) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        let mut durations: Vec<f64> = self.samples.iter().map(|s| s.duration_ms).collect();
        durations.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let rank = ((percentile / 100.0) * durations.len() as f64).ceil() as usize;
        let idx = rank.clamp(1, durations.len()) - 1;
        Some(durations[idx])
    }

    pub fn status_count(&self, status_min: u16, status_max: u16) -> u64 {
        self.samples
            .iter()
            .filter(|s| s.status >= status_min && s.status <= status_max)
            .count() as u64
    }

    fn evict(&mut self, now_ms: i64) {
        let cutoff = now_ms - self.window_ms;
        while let Some(front) = self.samples.front() {
            if front.timestamp_ms < cutoff {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }
}
