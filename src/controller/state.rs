//! Capture run state machine.
//!
//! The controller performs the work of each state and reports what happened
//! as a [`CaptureEvent`]; [`CaptureState::next`] alone decides where the run
//! goes from there. Retry and fallback policy therefore lives in one table
//! that is testable without any browser.

use std::fmt;

/// How many times `GET_METRICS` is tried before the agent counts as
/// unresponsive
pub const MAX_METRICS_ATTEMPTS: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    Init,
    Measuring { attempt: u8 },
    Hiding,
    Scrolling { index: usize, of: usize },
    Restoring,
    Done,
    Fallback,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureEvent {
    /// Tab resolved, capturable, agent injected
    TargetReady,
    /// Tab gone or showing a restricted URL
    TargetRejected,
    MetricsReceived,
    MetricsFailed,
    /// Hiding ran (or failed harmlessly) and the plan has `segments` offsets
    HideFinished { segments: usize },
    /// One planned offset was captured or skipped
    SegmentFinished,
    /// Page restored; `captured` segments were collected
    Restored { captured: usize },
    FallbackCaptured,
    FallbackFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidTransition {
    pub state: CaptureState,
    pub event: CaptureEvent,
}

impl fmt::Display for InvalidTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid capture transition: {:?} on {:?}", self.event, self.state)
    }
}

impl std::error::Error for InvalidTransition {}

impl CaptureState {
    pub fn is_terminal(self) -> bool {
        matches!(self, CaptureState::Done | CaptureState::Failed)
    }

    pub fn next(self, event: CaptureEvent) -> Result<CaptureState, InvalidTransition> {
        use CaptureEvent as E;
        use CaptureState as S;

        let next = match (self, event) {
            (S::Init, E::TargetReady) => S::Measuring { attempt: 1 },
            (S::Init, E::TargetRejected) => S::Fallback,

            (S::Measuring { .. }, E::MetricsReceived) => S::Hiding,
            (S::Measuring { attempt }, E::MetricsFailed) if attempt < MAX_METRICS_ATTEMPTS => {
                S::Measuring { attempt: attempt + 1 }
            }
            (S::Measuring { .. }, E::MetricsFailed) => S::Fallback,

            (S::Hiding, E::HideFinished { segments: 0 }) => S::Restoring,
            (S::Hiding, E::HideFinished { segments }) => S::Scrolling { index: 0, of: segments },

            (S::Scrolling { index, of }, E::SegmentFinished) if index + 1 < of => S::Scrolling {
                index: index + 1,
                of,
            },
            (S::Scrolling { .. }, E::SegmentFinished) => S::Restoring,

            (S::Restoring, E::Restored { captured: 0 }) => S::Fallback,
            (S::Restoring, E::Restored { .. }) => S::Done,

            (S::Fallback, E::FallbackCaptured) => S::Done,
            (S::Fallback, E::FallbackFailed) => S::Failed,

            (state, event) => return Err(InvalidTransition { state, event }),
        };
        Ok(next)
    }
}
