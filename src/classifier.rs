//! The classification loop: read frames until one decides the case.
//!
//! The loop runs against a single [`Budget`] per case. Every `receive` gets
//! only what is left of it, so a server trickling harmless frames (PING,
//! WINDOW_UPDATE, SETTINGS ACK) cannot keep a case alive past its timeout.

use std::time::Duration;

use tokio::time::Instant;

use crate::error::HarnessError;
use crate::harness::FrameSource;
use crate::protocol::Frame;
use crate::testcase::{Expectation, FailReason, Polarity, Verdict};

/// A fixed time allowance measured from creation.
#[derive(Debug, Clone, Copy)]
pub struct Budget {
    total: Duration,
    deadline: Instant,
}

impl Budget {
    pub fn start(total: Duration) -> Self {
        Self {
            total,
            deadline: Instant::now() + total,
        }
    }

    /// Time left, or `None` once the deadline has passed.
    pub fn remaining(&self) -> Option<Duration> {
        let left = self.deadline.saturating_duration_since(Instant::now());
        (!left.is_zero()).then_some(left)
    }

    pub fn total(&self) -> Duration {
        self.total
    }
}

/// Observable classifier state. `Matched` and `Exhausted` are terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClassifierState {
    Waiting,
    /// Index of the accepting expectation.
    Matched(usize),
    Exhausted(FailReason),
}

/// Matches inbound frames against a case's expectations.
pub struct Classifier<'a> {
    expectations: &'a [Expectation],
    state: ClassifierState,
}

impl<'a> Classifier<'a> {
    pub fn new(expectations: &'a [Expectation]) -> Self {
        Self {
            expectations,
            state: ClassifierState::Waiting,
        }
    }

    pub fn state(&self) -> &ClassifierState {
        &self.state
    }

    pub fn is_terminal(&self) -> bool {
        self.state != ClassifierState::Waiting
    }

    /// Feed one frame. Expectations are checked in registration order and
    /// the first that matches decides. Frames matching nothing are ignored.
    pub fn observe(&mut self, frame: &Frame) -> &ClassifierState {
        if self.is_terminal() {
            return &self.state;
        }

        let hit = self
            .expectations
            .iter()
            .enumerate()
            .find(|(_, e)| e.matches(frame));

        match hit {
            Some((index, e)) if e.polarity == Polarity::Accept => {
                self.state = ClassifierState::Matched(index);
            }
            Some((_, e)) => {
                self.state = ClassifierState::Exhausted(FailReason::Forbidden {
                    expectation: e.to_string(),
                    frame: frame.to_string(),
                });
            }
            None => tracing::trace!(frame = %frame, "ignoring frame"),
        }
        &self.state
    }

    /// Stop waiting. No effect on a terminal classifier.
    pub fn exhaust(&mut self, reason: FailReason) -> &ClassifierState {
        if !self.is_terminal() {
            self.state = ClassifierState::Exhausted(reason);
        }
        &self.state
    }

    /// Convert a terminal state into a verdict.
    pub fn verdict(&self) -> Option<Verdict> {
        match &self.state {
            ClassifierState::Waiting => None,
            ClassifierState::Matched(index) => Some(Verdict::Pass {
                matched: self.expectations[*index].to_string(),
            }),
            ClassifierState::Exhausted(reason) => Some(Verdict::Fail(reason.clone())),
        }
    }
}

/// Read from `source` until a frame satisfies one of `expectations`, a
/// negative expectation trips, or `budget` runs out.
///
/// Transport errors end the loop at once. A read error is not retried: the
/// connection state after a failed read is unknown.
pub async fn classify<F>(source: &mut F, expectations: &[Expectation], budget: Budget) -> Verdict
where
    F: FrameSource,
{
    let mut classifier = Classifier::new(expectations);

    loop {
        if let Some(verdict) = classifier.verdict() {
            return verdict;
        }

        let Some(remaining) = budget.remaining() else {
            classifier.exhaust(FailReason::Timeout(budget.total()));
            continue;
        };

        match source.receive(remaining).await {
            Ok(frame) => {
                tracing::debug!(frame = %frame, "received");
                classifier.observe(&frame);
            }
            Err(HarnessError::Timeout(_)) => {
                classifier.exhaust(FailReason::Timeout(budget.total()));
            }
            Err(HarnessError::Closed) => {
                classifier.exhaust(FailReason::ConnectionClosed);
            }
            Err(e) => {
                classifier.exhaust(FailReason::Transport(e.to_string()));
            }
        }
    }
}
