use std::collections::VecDeque;

use crate::config::Limits;

/// Outcome of admitting one fire event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admitted,
    Throttled,
    Expired,
}

/// Per-instance admission gate. Only admitted fires are recorded, so a steady
/// stream of rejected fires cannot pad the window and starve later admission;
/// the count of admitted fires inside any trailing window stays at or below
/// `action_count`. With no window configured, counting spans the instance
/// lifetime. `Expired` is terminal.
pub struct Throttle {
    limits: Limits,
    started_at_ms: i64,
    admitted: VecDeque<i64>,
    expired: bool,
}

impl Throttle {
    pub fn new(limits: Limits, started_at_ms: i64) -> Self {
        Self {
            limits,
            started_at_ms,
            admitted: VecDeque::new(),
            expired: false,
        }
    }

    pub fn admit(&mut self, now_ms: i64) -> Admission {
        if self.expired {
            return Admission::Expired;
        }
        if let Some(duration) = self.limits.rule_duration_ms {
            if now_ms - self.started_at_ms > duration {
                self.expired = true;
                return Admission::Expired;
            }
        }

        if let Some(window) = self.limits.action_count_window_ms {
            let cutoff = now_ms - window;
            while let Some(&ts) = self.admitted.front() {
                if ts <= cutoff {
                    self.admitted.pop_front();
                } else {
                    break;
                }
            }
        }

        if (self.admitted.len() as u32) < self.limits.action_count {
            self.admitted.push_back(now_ms);
            Admission::Admitted
        } else {
            Admission::Throttled
        }
    }

    pub fn is_expired(&self) -> bool {
        self.expired
    }

    pub fn admitted_count(&self) -> usize {
        self.admitted.len()
    }
}
