//! Duplication of every segment through two independent branches.

use std::sync::Arc;

use parking_lot::Mutex;

use super::{Effect, Handler, Passthrough, Result, SegmentHandler};
use crate::segment::Segment;

/// Branch endpoint that forwards into the inner handler shared by both branches.
struct Junction {
    inner: Arc<Mutex<Handler>>,
}

impl SegmentHandler for Junction {
    fn send_segment(&mut self, segment: Segment) -> Result<()> {
        self.inner.lock().send_segment(segment)
    }

    fn segment_received(&mut self, segment: Segment) -> Result<()> {
        self.inner.lock().segment_received(segment)
    }

    fn tick(&mut self) -> Result<()> {
        self.inner.lock().tick()
    }
}

/// Duplicates every outgoing and incoming segment.
///
/// Each segment travels independently through a first and a second branch,
/// each of which may itself be an effect, so only one instance can be
/// corrupted while the other stays intact. Ticks go through the first branch
/// only, so a shared downstream timer is never ticked twice.
pub struct Duplication {
    first: Handler,
    second: Handler,
    inner: Arc<Mutex<Handler>>,
}

impl Duplication {
    /// Duplicates every segment without altering either instance.
    pub fn new(inner: Handler) -> Self {
        Self::with_branches(inner, Passthrough::new, Passthrough::new)
    }

    /// Duplicates every segment, applying `first` and `second` to the
    /// respective instances.
    pub fn with_branches<A, B>(
        inner: Handler,
        first: impl FnOnce(Handler) -> A,
        second: impl FnOnce(Handler) -> B,
    ) -> Self
    where
        A: SegmentHandler + 'static,
        B: SegmentHandler + 'static,
    {
        let inner = Arc::new(Mutex::new(inner));
        let junction = |inner: &Arc<Mutex<Handler>>| -> Handler {
            Box::new(Junction {
                inner: Arc::clone(inner),
            })
        };
        Self {
            first: Box::new(first(junction(&inner))),
            second: Box::new(second(junction(&inner))),
            inner,
        }
    }
}

impl SegmentHandler for Duplication {
    fn send_segment(&mut self, segment: Segment) -> Result<()> {
        self.first.send_segment(segment.clone())?;
        self.second.send_segment(segment)
    }

    fn segment_received(&mut self, segment: Segment) -> Result<()> {
        self.first.segment_received(segment.clone())?;
        self.second.segment_received(segment)
    }

    fn tick(&mut self) -> Result<()> {
        self.first.tick()
    }

    fn into_inner(self: Box<Self>) -> Option<Handler> {
        let Duplication {
            first,
            second,
            inner,
        } = *self;
        // Branches hold the only other references to the inner handler.
        drop(first);
        drop(second);
        match Arc::try_unwrap(inner) {
            Ok(inner) => Some(inner.into_inner()),
            Err(_) => {
                tracing::error!("duplication branch kept a reference to the inner handler");
                None
            }
        }
    }
}

impl Effect for Duplication {
    type Control = ();

    fn control(&self) -> Self::Control {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effects::test_support::data;
    use crate::effects::{CORRUPTION_MARKER, CorruptPayload, EffectStack, Probe};
    use crate::segment::HEADER_SIZE;

    #[test]
    fn test_every_segment_delivered_twice() {
        let (probe, log) = Probe::new();
        let mut dup = Duplication::new(Box::new(probe));

        let segment = data(5, b"Hello world!");
        dup.send_segment(segment.clone()).unwrap();
        dup.segment_received(segment.clone()).unwrap();

        assert_eq!(log.sent(), vec![segment.clone(), segment.clone()]);
        assert_eq!(log.received(), vec![segment.clone(), segment]);
    }

    #[test]
    fn test_ticks_only_through_first_branch() {
        let (probe, log) = Probe::new();
        let mut dup = Duplication::new(Box::new(probe));

        dup.tick().unwrap();
        dup.tick().unwrap();

        assert_eq!(log.ticks(), 2);
    }

    #[test]
    fn test_only_second_instance_corrupted() {
        let (probe, log) = Probe::new();
        let mut dup = Duplication::with_branches(
            Box::new(probe),
            Passthrough::new,
            CorruptPayload::new,
        );

        let segment = data(9, b"Hello world!");
        dup.segment_received(segment.clone()).unwrap();

        let received = log.received();
        assert_eq!(received.len(), 2);
        assert_eq!(received[0], segment);
        assert_eq!(received[0].payload(), b"Hello world!");

        let corrupted = &received[1];
        assert_eq!(
            &corrupted.as_bytes()[..HEADER_SIZE],
            &segment.as_bytes()[..HEADER_SIZE]
        );
        assert_eq!(corrupted, &segment.with_payload_pattern(CORRUPTION_MARKER));
    }

    #[test]
    fn test_inner_handler_restored_after_deactivation() {
        let (probe, log) = Probe::new();
        let stack = EffectStack::new(Box::new(probe));

        let guard = stack.activate(|inner| {
            Duplication::with_branches(inner, CorruptPayload::new, Passthrough::new)
        });
        stack.segment_received(data(1, b"a")).unwrap();
        guard.deactivate().unwrap();
        stack.segment_received(data(2, b"b")).unwrap();

        assert_eq!(log.received().len(), 3);
        assert_eq!(stack.depth(), 0);
    }
}
