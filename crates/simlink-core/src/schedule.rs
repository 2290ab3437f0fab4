//! Communication schedules and the cursor that walks them.
//!
//! A schedule is a cyclic list of [`ScheduleOp`]s. The effective sequence is
//! the explicit list followed by `trailing_yields` extra [`ScheduleOp::Yield`]
//! entries; all positions are taken modulo its length.

use serde::{Deserialize, Serialize};

use crate::ScheduleOp;

/// Cyclic sequence of communication operations for one endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Schedule {
    #[serde(default)]
    pub ops: Vec<ScheduleOp>,

    #[serde(default)]
    pub trailing_yields: usize,
}

impl Default for Schedule {
    /// One document in, one document out, then hand the step back.
    fn default() -> Self {
        Self::new(vec![ScheduleOp::Receive, ScheduleOp::Send], 1)
    }
}

impl Schedule {
    #[must_use]
    pub fn new(ops: Vec<ScheduleOp>, trailing_yields: usize) -> Self {
        Self {
            ops,
            trailing_yields,
        }
    }

    /// Length of the explicit operations plus the trailing yields.
    #[must_use]
    pub fn effective_len(&self) -> usize {
        self.ops.len() + self.trailing_yields
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.effective_len() == 0
    }

    /// Operation at `position` of the effective sequence, wrapping around.
    ///
    /// Returns `None` only for an empty schedule.
    #[must_use]
    pub fn op_at(&self, position: usize) -> Option<ScheduleOp> {
        let len = self.effective_len();
        if len == 0 {
            return None;
        }
        Some(
            self.ops
                .get(position % len)
                .copied()
                .unwrap_or(ScheduleOp::Yield),
        )
    }

    /// Whether the effective sequence contains a yield-class operation.
    ///
    /// Without one, a single `advance` call would cycle forever.
    #[must_use]
    pub fn has_yield(&self) -> bool {
        self.trailing_yields > 0 || self.ops.iter().any(|op| op.is_yield_class())
    }

    /// Iterate over the effective sequence once.
    pub fn iter(&self) -> impl Iterator<Item = ScheduleOp> + '_ {
        self.ops
            .iter()
            .copied()
            .chain(std::iter::repeat_n(ScheduleOp::Yield, self.trailing_yields))
    }
}

impl std::fmt::Display for Schedule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.ops.iter().map(|op| op.as_str()).collect();
        write!(f, "[{}] + {} trailing yield(s)", names.join(", "), self.trailing_yields)
    }
}

/// Position in a schedule's effective sequence.
///
/// The cursor only stores an index; the length is passed in so a cursor
/// stays valid when the schedule is replaced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScheduleCursor {
    position: usize,
}

impl ScheduleCursor {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn position(self) -> usize {
        self.position
    }

    /// Current operation without moving.
    #[must_use]
    pub fn current(self, schedule: &Schedule) -> Option<ScheduleOp> {
        schedule.op_at(self.position)
    }

    /// Move one step forward, wrapping to zero past the end.
    pub fn advance(&mut self, schedule: &Schedule) {
        let len = schedule.effective_len();
        if len == 0 {
            self.position = 0;
            return;
        }
        self.position = (self.position + 1) % len;
    }

    /// Move one step back, wrapping to the last position before zero.
    pub fn step_back(&mut self, schedule: &Schedule) {
        let len = schedule.effective_len();
        if len == 0 {
            self.position = 0;
            return;
        }
        self.position = (self.position % len + len - 1) % len;
    }

    pub fn reset(&mut self) {
        self.position = 0;
    }
}
