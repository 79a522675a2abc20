//! Reordering of adjacent received segments.

use super::{Effect, Handler, Result, SegmentHandler};
use crate::segment::Segment;

/// Default number of ticks a segment may be held back.
pub const DEFAULT_HOLD_TICKS: u32 = 2;

/// Swaps consecutive received segments.
///
/// At most one segment is held. When another arrives it is delivered first
/// and the held one immediately after, inverting each adjacent pair. A held
/// segment with no successor is released unchanged once its tick budget
/// runs out.
///
/// Events are serialised by the owning stack, so an arrival and a budget
/// expiry are never simultaneous: an arrival handled before the expiring
/// tick swaps the pair, a tick handled first releases the held segment in
/// order.
pub struct ReorderReceived {
    inner: Handler,
    held: Option<Segment>,
    ticks_left: u32,
    max_holding_ticks: u32,
}

impl ReorderReceived {
    /// Creates a reorderer with the default hold budget.
    pub fn new(inner: Handler) -> Self {
        Self::with_hold_ticks(inner, DEFAULT_HOLD_TICKS)
    }

    /// Creates a reorderer that holds a lone segment for `ticks` ticks.
    pub fn with_hold_ticks(inner: Handler, ticks: u32) -> Self {
        Self {
            inner,
            held: None,
            ticks_left: 0,
            max_holding_ticks: ticks,
        }
    }

    fn release_held(&mut self) -> Result<()> {
        match self.held.take() {
            Some(segment) => {
                tracing::debug!("releasing held segment {segment}");
                self.inner.segment_received(segment)
            }
            None => Ok(()),
        }
    }
}

impl SegmentHandler for ReorderReceived {
    fn send_segment(&mut self, segment: Segment) -> Result<()> {
        self.inner.send_segment(segment)
    }

    fn segment_received(&mut self, segment: Segment) -> Result<()> {
        if self.held.is_some() {
            self.inner.segment_received(segment)?;
            self.release_held()
        } else {
            tracing::debug!("holding segment {segment}");
            self.held = Some(segment);
            self.ticks_left = self.max_holding_ticks;
            Ok(())
        }
    }

    fn tick(&mut self) -> Result<()> {
        self.inner.tick()?;
        if self.held.is_none() {
            return Ok(());
        }
        self.ticks_left = self.ticks_left.saturating_sub(1);
        if self.ticks_left == 0 {
            self.release_held()?;
        }
        Ok(())
    }

    fn into_inner(mut self: Box<Self>) -> Option<Handler> {
        if let Err(e) = self.release_held() {
            tracing::warn!("held segment lost while deactivating reorder effect: {e}");
        }
        Some(self.inner)
    }
}

impl Effect for ReorderReceived {
    type Control = ();

    fn control(&self) -> Self::Control {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effects::test_support::data;
    use crate::effects::{Probe, ProbeEvent};

    fn seqs(segments: &[Segment]) -> Vec<u16> {
        segments.iter().map(Segment::seq_num).collect()
    }

    #[test]
    fn test_adjacent_pairs_inverted() {
        let (probe, log) = Probe::new();
        let mut reorder = ReorderReceived::new(Box::new(probe));

        for seq in 1..=4 {
            reorder.segment_received(data(seq, b"x")).unwrap();
        }

        assert_eq!(seqs(&log.received()), vec![2, 1, 4, 3]);
    }

    #[test]
    fn test_lone_segment_released_after_budget() {
        let (probe, log) = Probe::new();
        let mut reorder = ReorderReceived::new(Box::new(probe));

        let lone = data(7, b"last");
        reorder.segment_received(lone.clone()).unwrap();
        reorder.tick().unwrap();
        assert!(log.received().is_empty());
        reorder.tick().unwrap();

        assert_eq!(log.received(), vec![lone]);
        // The tick reaches the protocol before the release.
        assert_eq!(log.events()[1], ProbeEvent::Tick);
    }

    #[test]
    fn test_trailing_segment_after_pairs() {
        let (probe, log) = Probe::new();
        let mut reorder = ReorderReceived::new(Box::new(probe));

        for seq in 1..=3 {
            reorder.segment_received(data(seq, b"x")).unwrap();
        }
        assert_eq!(seqs(&log.received()), vec![2, 1]);

        reorder.tick().unwrap();
        reorder.tick().unwrap();
        assert_eq!(seqs(&log.received()), vec![2, 1, 3]);
    }

    #[test]
    fn test_arrival_before_expiring_tick_swaps() {
        let (probe, log) = Probe::new();
        let mut reorder = ReorderReceived::new(Box::new(probe));

        reorder.segment_received(data(1, b"x")).unwrap();
        reorder.tick().unwrap();
        // Arrival handled just before the tick that would expire the budget.
        reorder.segment_received(data(2, b"x")).unwrap();
        reorder.tick().unwrap();

        assert_eq!(seqs(&log.received()), vec![2, 1]);
    }

    #[test]
    fn test_expiring_tick_before_arrival_keeps_order() {
        let (probe, log) = Probe::new();
        let mut reorder = ReorderReceived::new(Box::new(probe));

        reorder.segment_received(data(1, b"x")).unwrap();
        reorder.tick().unwrap();
        reorder.tick().unwrap();
        reorder.segment_received(data(2, b"x")).unwrap();

        // Segment 2 is now the held one.
        assert_eq!(seqs(&log.received()), vec![1]);
        reorder.tick().unwrap();
        reorder.tick().unwrap();
        assert_eq!(seqs(&log.received()), vec![1, 2]);
    }

    #[test]
    fn test_held_segment_flushed_on_deactivation() {
        let (probe, log) = Probe::new();
        let mut reorder = Box::new(ReorderReceived::new(Box::new(probe)));
        reorder.segment_received(data(4, b"x")).unwrap();

        let _inner = reorder.into_inner().unwrap();
        assert_eq!(seqs(&log.received()), vec![4]);
    }
}
