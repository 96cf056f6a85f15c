//! The reusable fan-in counting barrier.
//!
//! The fan-out + counting barrier pattern recurs throughout the step
//! protocol: agent creation, migration, update routing, step profiles, and
//! store flushes all fan commands out to a set of participants and then
//! wait for every expected acknowledgment. This module implements the
//! fan-in side once, parameterized by the sender key type.
//!
//! A barrier closes only when every expected sender has arrived the
//! expected number of times -- never on a timeout or a partial count. A
//! missing arrival stalls the step; an unexpected or surplus arrival is a
//! protocol violation.

use std::collections::BTreeMap;

use crate::error::BarrierError;

/// A counting barrier over a fixed expected-sender set.
///
/// Created when the corresponding fan-out is issued, fed one [`arrive`]
/// call per acknowledgment, and queried with [`is_closed`].
///
/// [`arrive`]: Barrier::arrive
/// [`is_closed`]: Barrier::is_closed
#[derive(Debug, Clone)]
pub struct Barrier<S> {
    /// Arrivals expected per sender, fixed at construction.
    expected: BTreeMap<S, usize>,
    /// Arrivals recorded so far per sender.
    arrived: BTreeMap<S, usize>,
    /// Total arrivals still outstanding across all senders.
    outstanding: usize,
}

impl<S: Ord + Clone + core::fmt::Debug> Barrier<S> {
    /// Create a barrier from an explicit per-sender arrival count.
    ///
    /// Senders with a zero count are dropped up front, so a fan-out that
    /// addressed nobody yields an immediately closed barrier.
    pub fn new(expected: BTreeMap<S, usize>) -> Self {
        let expected: BTreeMap<S, usize> =
            expected.into_iter().filter(|&(_, n)| n > 0).collect();
        let outstanding = expected.values().fold(0usize, |acc, n| acc.saturating_add(*n));
        Self {
            expected,
            arrived: BTreeMap::new(),
            outstanding,
        }
    }

    /// Create a barrier expecting exactly one arrival from each sender.
    pub fn expecting(senders: impl IntoIterator<Item = S>) -> Self {
        Self::new(senders.into_iter().map(|s| (s, 1)).collect())
    }

    /// Record an arrival from `sender`.
    ///
    /// Returns `true` if this arrival closed the barrier.
    ///
    /// # Errors
    ///
    /// Returns [`BarrierError::UnexpectedSender`] if `sender` is not in
    /// the expected set, or [`BarrierError::SurplusArrival`] if it has
    /// already arrived as often as expected. Both are protocol violations.
    pub fn arrive(&mut self, sender: &S) -> Result<bool, BarrierError> {
        let Some(&expected) = self.expected.get(sender) else {
            return Err(BarrierError::UnexpectedSender {
                sender: format!("{sender:?}"),
            });
        };

        let arrived = self.arrived.entry(sender.clone()).or_insert(0);
        if *arrived >= expected {
            return Err(BarrierError::SurplusArrival {
                sender: format!("{sender:?}"),
                expected,
            });
        }

        *arrived = arrived.saturating_add(1);
        self.outstanding = self.outstanding.saturating_sub(1);
        Ok(self.outstanding == 0)
    }

    /// True once every expected arrival has been recorded.
    pub const fn is_closed(&self) -> bool {
        self.outstanding == 0
    }

    /// The senders still outstanding, with their remaining counts.
    ///
    /// Used to report which participants a stalled step is waiting on.
    pub fn pending(&self) -> impl Iterator<Item = (&S, usize)> {
        self.expected.iter().filter_map(|(s, &n)| {
            let done = self.arrived.get(s).copied().unwrap_or(0);
            let left = n.saturating_sub(done);
            (left > 0).then_some((s, left))
        })
    }
}

impl<S: Ord + Clone + core::fmt::Debug> Default for Barrier<S> {
    fn default() -> Self {
        Self::new(BTreeMap::new())
    }
}
