//! Payload corruption of received segments.

use super::{Effect, Handler, Result, SegmentHandler};
use crate::segment::Segment;

/// Marker repeated over the payload region of corrupted segments.
pub const CORRUPTION_MARKER: &[u8] = b"check checksum! ";

/// Replaces the payload region of every received segment with the marker.
///
/// The header is left untouched, so only a working checksum can tell the
/// segment apart from a genuine one.
pub struct CorruptPayload {
    inner: Handler,
}

impl CorruptPayload {
    /// Corrupts every segment delivered to `inner`.
    pub fn new(inner: Handler) -> Self {
        Self { inner }
    }
}

impl SegmentHandler for CorruptPayload {
    fn send_segment(&mut self, segment: Segment) -> Result<()> {
        self.inner.send_segment(segment)
    }

    fn segment_received(&mut self, segment: Segment) -> Result<()> {
        let corrupted = segment.with_payload_pattern(CORRUPTION_MARKER);
        tracing::debug!("corrupting received segment {segment}");
        self.inner.segment_received(corrupted)
    }

    fn tick(&mut self) -> Result<()> {
        self.inner.tick()
    }

    fn into_inner(self: Box<Self>) -> Option<Handler> {
        Some(self.inner)
    }
}

impl Effect for CorruptPayload {
    type Control = ();

    fn control(&self) -> Self::Control {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effects::Probe;
    use crate::effects::test_support::data;
    use crate::segment::{HEADER_SIZE, SEGMENT_SIZE};

    #[test]
    fn test_payload_replaced_regardless_of_content() {
        let (probe, log) = Probe::new();
        let mut corrupt = CorruptPayload::new(Box::new(probe));

        corrupt.segment_received(data(1, b"Hello world!")).unwrap();
        corrupt.segment_received(data(2, &[0xff; 1008])).unwrap();

        for segment in log.received() {
            for (i, byte) in segment.as_bytes().iter().enumerate().skip(HEADER_SIZE) {
                assert_eq!(*byte, CORRUPTION_MARKER[i % CORRUPTION_MARKER.len()]);
            }
            assert_eq!(segment.len(), SEGMENT_SIZE);
        }
    }

    #[test]
    fn test_outbound_untouched() {
        let (probe, log) = Probe::new();
        let mut corrupt = CorruptPayload::new(Box::new(probe));

        let segment = data(3, b"outgoing");
        corrupt.send_segment(segment.clone()).unwrap();
        assert_eq!(log.sent(), vec![segment]);
    }
}
