//! Bounded, fixed-interval readiness polling.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::harness_log;
use crate::probe::{Probe, ProbeResult};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ReadinessPolicy {
    pub max_attempts: u32,
    pub interval_ms: u64,
    pub probe_timeout_ms: u64,
}

impl Default for ReadinessPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 11,
            interval_ms: 6_000,
            probe_timeout_ms: 500,
        }
    }
}

impl ReadinessPolicy {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    /// Total delay spent between attempts when every attempt fails.
    pub fn budget(&self) -> Duration {
        self.interval()
            .saturating_mul(self.max_attempts.saturating_sub(1))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadinessState {
    Polling,
    Ready,
    TimedOut,
}

/// What the caller should do after recording a probe result.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Step {
    Wait(Duration),
    Done(ReadinessState),
}

/// Attempt counter driving the Polling → Ready | TimedOut transitions.
#[derive(Clone, Debug)]
pub struct RetryScheduler {
    policy: ReadinessPolicy,
    attempts: u32,
    state: ReadinessState,
}

impl RetryScheduler {
    pub fn new(policy: ReadinessPolicy) -> Self {
        Self {
            policy,
            attempts: 0,
            state: ReadinessState::Polling,
        }
    }

    pub fn state(&self) -> ReadinessState {
        self.state
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn record(&mut self, result: &ProbeResult) -> Step {
        if self.state != ReadinessState::Polling {
            return Step::Done(self.state);
        }
        self.attempts = self.attempts.saturating_add(1);
        if result.is_ready() {
            self.state = ReadinessState::Ready;
            return Step::Done(self.state);
        }
        if self.attempts >= self.policy.max_attempts {
            self.state = ReadinessState::TimedOut;
            return Step::Done(self.state);
        }
        Step::Wait(self.policy.interval())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReadinessReport {
    pub state: ReadinessState,
    pub attempts: u32,
    pub last_result: Option<ProbeResult>,
}

/// Probes `url` until it answers 200 or the attempt budget is spent.
pub async fn wait_until_ready(
    probe: &dyn Probe,
    url: &str,
    policy: &ReadinessPolicy,
) -> ReadinessReport {
    let mut scheduler = RetryScheduler::new(policy.clone());
    let mut last_result = None;
    while scheduler.state() == ReadinessState::Polling {
        harness_log::info(module_path!(), "Checking endpoint...");
        let result = probe.probe(url).await;
        harness_log::info(
            module_path!(),
            format!("... got {}", result.status_code()),
        );
        if let ProbeResult::TransportError(reason) = &result {
            harness_log::debug(module_path!(), format!("probe {url} failed: {reason}"));
        }
        let step = scheduler.record(&result);
        last_result = Some(result);
        if let Step::Wait(delay) = step {
            tokio::time::sleep(delay).await;
        }
    }
    ReadinessReport {
        state: scheduler.state(),
        attempts: scheduler.attempts(),
        last_result,
    }
}
