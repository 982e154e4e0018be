use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Counters of one chat run.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct RunReport {
    pub duration: Duration,
    pub tool_calls: usize,
    pub failures: usize,
    pub success: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSummary {
    pub runs: usize,
    pub success_rate: f32,
    pub tool_calls: usize,
    pub tool_failures: usize,
    pub mean_duration_ms: u64,
}

/// Reports kept for inspection; older runs only survive in the totals.
pub const DEFAULT_REPORT_HISTORY: usize = 256;

#[derive(Debug, Default)]
struct MetricsState {
    recent: VecDeque<RunReport>,
    runs: usize,
    successes: usize,
    tool_calls: usize,
    failures: usize,
    total_duration: Duration,
}

#[derive(Debug, Clone)]
pub struct MetricsTracker {
    state: Arc<Mutex<MetricsState>>,
    history: usize,
}

impl Default for MetricsTracker {
    fn default() -> Self {
        Self::with_history(DEFAULT_REPORT_HISTORY)
    }
}

impl MetricsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_history(history: usize) -> Self {
        Self {
            state: Arc::default(),
            history: history.max(1),
        }
    }

    pub fn start_run(&self) -> RunGuard {
        RunGuard {
            start: Instant::now(),
            tool_calls: 0,
            failures: 0,
            metrics: self.clone(),
        }
    }

    /// Most recent reports, oldest first.
    pub fn reports(&self) -> Vec<RunReport> {
        self.lock().recent.iter().cloned().collect()
    }

    pub fn summary(&self) -> MetricsSummary {
        let state = self.lock();
        MetricsSummary {
            runs: state.runs,
            success_rate: if state.runs == 0 {
                0.0
            } else {
                state.successes as f32 / state.runs as f32
            },
            tool_calls: state.tool_calls,
            tool_failures: state.failures,
            mean_duration_ms: if state.runs == 0 {
                0
            } else {
                (state.total_duration.as_millis() / state.runs as u128) as u64
            },
        }
    }

    fn record(&self, report: RunReport) {
        let mut state = self.lock();
        state.runs += 1;
        state.successes += usize::from(report.success);
        state.tool_calls += report.tool_calls;
        state.failures += report.failures;
        state.total_duration += report.duration;
        if state.recent.len() == self.history {
            state.recent.pop_front();
        }
        state.recent.push_back(report);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MetricsState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

pub struct RunGuard {
    start: Instant,
    tool_calls: usize,
    failures: usize,
    metrics: MetricsTracker,
}

impl RunGuard {
    pub fn record_tool_call(&mut self) {
        self.tool_calls += 1;
    }

    pub fn record_failure(&mut self) {
        self.failures += 1;
    }

    pub fn finish(self, success: bool) -> RunReport {
        let report = RunReport {
            duration: self.start.elapsed(),
            tool_calls: self.tool_calls,
            failures: self.failures,
            success,
        };
        self.metrics.record(report.clone());
        report
    }
}
