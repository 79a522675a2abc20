//! Alternating loss of received segments per sequence number.

use std::collections::HashSet;

use super::{Effect, Handler, Result, SegmentHandler};
use crate::segment::Segment;

/// Drops every other appearance of the same sequence number in received segments.
///
/// The first occurrence of a sequence number is suppressed and remembered;
/// the next occurrence is delivered and forgotten, so a number seen three
/// times is delivered only on its second appearance.
pub struct DropEveryOther {
    inner: Handler,
    pending: HashSet<u16>,
}

impl DropEveryOther {
    /// Creates the effect with no pending sequence numbers.
    pub fn new(inner: Handler) -> Self {
        Self {
            inner,
            pending: HashSet::new(),
        }
    }
}

impl SegmentHandler for DropEveryOther {
    fn send_segment(&mut self, segment: Segment) -> Result<()> {
        self.inner.send_segment(segment)
    }

    fn segment_received(&mut self, segment: Segment) -> Result<()> {
        let seq = segment.seq_num();
        if self.pending.remove(&seq) {
            tracing::debug!("not dropping segment {segment}");
            self.inner.segment_received(segment)
        } else {
            tracing::debug!("dropping segment {segment}");
            self.pending.insert(seq);
            Ok(())
        }
    }

    fn tick(&mut self) -> Result<()> {
        self.inner.tick()
    }

    fn into_inner(self: Box<Self>) -> Option<Handler> {
        Some(self.inner)
    }
}

impl Effect for DropEveryOther {
    type Control = ();

    fn control(&self) -> Self::Control {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effects::Probe;
    use crate::effects::test_support::data;

    #[test]
    fn test_every_other_instance_dropped() {
        let (probe, log) = Probe::new();
        let mut drop_every_other = DropEveryOther::new(Box::new(probe));

        let first = data(42, b"try 1");
        let second = data(42, b"try 2");
        let third = data(42, b"try 3");
        drop_every_other.segment_received(first).unwrap();
        drop_every_other.segment_received(second.clone()).unwrap();
        drop_every_other.segment_received(third).unwrap();

        assert_eq!(log.received(), vec![second]);
    }

    #[test]
    fn test_sequence_numbers_tracked_independently() {
        let (probe, log) = Probe::new();
        let mut drop_every_other = DropEveryOther::new(Box::new(probe));

        for seq in [1, 2, 1, 3, 2, 3, 3] {
            drop_every_other.segment_received(data(seq, b"x")).unwrap();
        }

        let delivered: Vec<u16> = log.received().iter().map(Segment::seq_num).collect();
        assert_eq!(delivered, vec![1, 2, 3]);
    }

    #[test]
    fn test_outbound_and_ticks_untouched() {
        let (probe, log) = Probe::new();
        let mut drop_every_other = DropEveryOther::new(Box::new(probe));

        drop_every_other.send_segment(data(1, b"x")).unwrap();
        drop_every_other.send_segment(data(1, b"x")).unwrap();
        drop_every_other.tick().unwrap();

        assert_eq!(log.sent().len(), 2);
        assert_eq!(log.ticks(), 1);
    }
}
