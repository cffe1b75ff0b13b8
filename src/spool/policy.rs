//! Flush limits and per-pass termination policy.

use std::time::Duration;

/// Limits applied to a flush. Zero means unlimited.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushLimits {
    pub message_limit: usize,
    pub time_limit: Duration,
}

impl FlushLimits {
    pub fn unlimited() -> Self {
        Self::default()
    }

    pub fn with_message_limit(mut self, limit: usize) -> Self {
        self.message_limit = limit;
        self
    }

    pub fn with_time_limit(mut self, limit: Duration) -> Self {
        self.time_limit = limit;
        self
    }
}

/// Why a pass stopped before exhausting its records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    MessageLimit,
    TimeLimit,
}

/// Stop predicate evaluated after each record of a pass.
///
/// The generic pass honors both limits; the SMS pass only the message
/// limit, counted against its own sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TerminationPolicy {
    message_limit: Option<usize>,
    time_limit: Option<Duration>,
}

impl TerminationPolicy {
    pub fn for_generic_pass(limits: FlushLimits) -> Self {
        Self {
            message_limit: (limits.message_limit > 0).then_some(limits.message_limit),
            time_limit: (!limits.time_limit.is_zero()).then_some(limits.time_limit),
        }
    }

    pub fn for_sms_pass(limits: FlushLimits) -> Self {
        Self {
            message_limit: (limits.message_limit > 0).then_some(limits.message_limit),
            time_limit: None,
        }
    }

    /// `sent` is the pass's own count; `elapsed` is measured from flush start.
    pub fn should_stop(&self, sent: usize, elapsed: Duration) -> Option<StopReason> {
        if self.message_limit.is_some_and(|limit| sent >= limit) {
            return Some(StopReason::MessageLimit);
        }
        if self.time_limit.is_some_and(|limit| elapsed >= limit) {
            return Some(StopReason::TimeLimit);
        }
        None
    }
}
