//! Segment size invariant.

use super::{Direction, Effect, Handler, Result, SegmentHandler};
use crate::errors::InvariantViolation;
use crate::segment::{SEGMENT_SIZE, Segment};

/// Fails whenever a sent or received segment does not have the fixed size.
pub struct SegmentLengthGuard {
    inner: Handler,
    expected: usize,
}

impl SegmentLengthGuard {
    /// Creates a guard for the reference segment size.
    pub fn new(inner: Handler) -> Self {
        Self::with_size(inner, SEGMENT_SIZE)
    }

    /// Creates a guard for a custom segment size.
    pub fn with_size(inner: Handler, expected: usize) -> Self {
        Self { inner, expected }
    }

    fn check(&self, direction: Direction, segment: &Segment) -> Result<()> {
        if segment.len() != self.expected {
            return Err(InvariantViolation::SegmentLength {
                direction,
                actual: segment.len(),
                expected: self.expected,
            }
            .into());
        }
        Ok(())
    }
}

impl SegmentHandler for SegmentLengthGuard {
    fn send_segment(&mut self, segment: Segment) -> Result<()> {
        self.check(Direction::Outbound, &segment)?;
        self.inner.send_segment(segment)
    }

    fn segment_received(&mut self, segment: Segment) -> Result<()> {
        self.check(Direction::Inbound, &segment)?;
        self.inner.segment_received(segment)
    }

    fn tick(&mut self) -> Result<()> {
        self.inner.tick()
    }

    fn into_inner(self: Box<Self>) -> Option<Handler> {
        Some(self.inner)
    }
}

impl Effect for SegmentLengthGuard {
    type Control = ();

    fn control(&self) -> Self::Control {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effects::Probe;
    use crate::effects::test_support::data;

    #[test]
    fn test_reference_size_forwarded() {
        let (probe, log) = Probe::new();
        let mut guard = SegmentLengthGuard::new(Box::new(probe));

        guard.send_segment(data(1, b"Hello world!")).unwrap();
        guard.segment_received(data(2, b"")).unwrap();

        assert_eq!(log.sent().len(), 1);
        assert_eq!(log.received().len(), 1);
    }

    #[test]
    fn test_wrong_size_rejected_both_ways() {
        let (probe, log) = Probe::new();
        let mut guard = SegmentLengthGuard::new(Box::new(probe));

        let err = guard.send_segment(Segment::from(vec![0u8; 22])).unwrap_err();
        assert_eq!(
            err.as_violation(),
            Some(&InvariantViolation::SegmentLength {
                direction: Direction::Outbound,
                actual: 22,
                expected: SEGMENT_SIZE,
            })
        );
        assert_eq!(
            err.to_string(),
            "Invariant violated: sent segment length, 22, is not 1018!"
        );

        let err = guard
            .segment_received(Segment::from(vec![0u8; SEGMENT_SIZE + 1]))
            .unwrap_err();
        assert!(matches!(
            err.as_violation(),
            Some(InvariantViolation::SegmentLength {
                direction: Direction::Inbound,
                ..
            })
        ));
        assert!(log.events().is_empty());
    }
}
