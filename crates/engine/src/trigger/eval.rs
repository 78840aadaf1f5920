use vigil_common::signal::SignalSample;

use super::window::RequestWindow;
use crate::config::TriggerSpec;

/// Per-instance trigger evaluation state. Fires on *every* satisfying sample;
/// there is deliberately no edge detection, the throttle controller is the
/// sole rate limiter.
pub struct TriggerEval {
    trigger: TriggerSpec,
    window: Option<RequestWindow>,
    startup_fired: bool,
}

impl TriggerEval {
    pub fn new(trigger: &TriggerSpec) -> Self {
        let window = match trigger {
            TriggerSpec::RequestCount { window_ms, .. }
            | TriggerSpec::RequestDuration { window_ms, .. }
            | TriggerSpec::ResponseStatus { window_ms, .. } => {
                Some(RequestWindow::new(*window_ms))
            }
            _ => None,
        };
        Self {
            trigger: trigger.clone(),
            window,
            startup_fired: false,
        }
    }

    /// Called once when the instance enters Running. Only `Startup` fires
    /// here, and only the first time.
    pub fn on_start(&mut self) -> bool {
        if matches!(self.trigger, TriggerSpec::Startup) && !self.startup_fired {
            self.startup_fired = true;
            return true;
        }
        false
    }

    pub fn on_sample(&mut self, sample: &SignalSample) -> bool {
        match (&self.trigger, sample) {
            (
                TriggerSpec::CounterThreshold {
                    provider,
                    counter,
                    comparator,
                    value,
                },
                SignalSample::Counter {
                    provider: sample_provider,
                    name,
                    value: sample_value,
                    ..
                },
            ) => {
                provider == sample_provider
                    && counter == name
                    && comparator.holds(*sample_value, *value)
            }
            (
                TriggerSpec::RequestCount { threshold, .. },
                SignalSample::Request {
                    duration_ms,
                    status,
                    timestamp_ms,
                },
            ) => {
                let window = self.window.as_mut().expect("request trigger has a window");
                window.push(*timestamp_ms, *duration_ms, *status);
                window.count() >= *threshold
            }
            (
                TriggerSpec::RequestDuration {
                    percentile,
                    threshold_ms,
                    ..
                },
                SignalSample::Request {
                    duration_ms,
                    status,
                    timestamp_ms,
                },
            ) => {
                let window = self.window.as_mut().expect("request trigger has a window");
                window.push(*timestamp_ms, *duration_ms, *status);
                window
                    .percentile_duration(*percentile)
                    .is_some_and(|p| p > *threshold_ms)
            }
            (
                TriggerSpec::ResponseStatus {
                    status_min,
                    status_max,
                    threshold,
                    ..
                },
                SignalSample::Request {
                    duration_ms,
                    status,
                    timestamp_ms,
                },
            ) => {
                let window = self.window.as_mut().expect("request trigger has a window");
                window.push(*timestamp_ms, *duration_ms, *status);
                window.status_count(*status_min, *status_max) >= *threshold
            }
            _ => false,
        }
    }
}
