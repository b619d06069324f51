//! Slice budgets for incremental collection
//!
//! A `SliceBudget` bounds how much work a single collector slice may do. The
//! budget is either unlimited, a wall-clock quota or a plain work quota. Callers
//! report progress with [`SliceBudget::step`] and poll
//! [`SliceBudget::is_over_budget`] as often as they like: time budgets only
//! consult the clock once every [`STEPS_PER_TIME_CHECK`] steps.

use std::time::{Duration, Instant};

/// Number of steps between two clock reads of a time budget
pub const STEPS_PER_TIME_CHECK: i64 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Quota {
    Unlimited,
    Time { deadline: Instant },
    Work,
}

/// A time-or-work quota for one collector slice
#[derive(Debug, Clone)]
pub struct SliceBudget {
    quota: Quota,
    counter: i64,
}

impl SliceBudget {
    /// A budget that never runs out
    pub fn unlimited() -> Self {
        Self {
            quota: Quota::Unlimited,
            counter: i64::MAX,
        }
    }

    /// A budget that runs out once `duration` has elapsed from now
    pub fn time(duration: Duration) -> Self {
        Self {
            quota: Quota::Time {
                deadline: Instant::now() + duration,
            },
            counter: STEPS_PER_TIME_CHECK,
        }
    }

    /// A budget that runs out after `steps` units of work
    pub fn work(steps: u64) -> Self {
        Self {
            quota: Quota::Work,
            counter: i64::try_from(steps).unwrap_or(i64::MAX),
        }
    }

    /// Record `steps` units of work
    #[inline]
    pub fn step(&mut self, steps: u64) {
        if self.quota == Quota::Unlimited {
            return;
        }
        let steps = i64::try_from(steps).unwrap_or(i64::MAX);
        self.counter = self.counter.saturating_sub(steps);
    }

    /// Check whether the budget has been used up
    ///
    /// Cheap while the step counter is positive. When it drops to zero a time
    /// budget reads the clock once and, if the deadline has not passed yet,
    /// refills the counter.
    #[inline]
    pub fn is_over_budget(&mut self) -> bool {
        if self.counter > 0 {
            return false;
        }
        self.check_over_budget()
    }

    fn check_over_budget(&mut self) -> bool {
        match self.quota {
            Quota::Unlimited => false,
            Quota::Work => true,
            Quota::Time { deadline } => {
                if Instant::now() >= deadline {
                    // stays exhausted
                    self.counter = 0;
                    true
                } else {
                    self.counter = STEPS_PER_TIME_CHECK;
                    false
                }
            }
        }
    }

    pub fn is_unlimited(&self) -> bool {
        self.quota == Quota::Unlimited
    }

    /// Remaining steps before the next over-budget check does real work
    pub fn remaining_steps(&self) -> i64 {
        self.counter.max(0)
    }
}

impl Default for SliceBudget {
    fn default() -> Self {
        Self::unlimited()
    }
}
