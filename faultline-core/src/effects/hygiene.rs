//! SYN and FIN hygiene monitors for outbound segments.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use super::{Effect, Handler, Result, SegmentHandler};
use crate::errors::InvariantViolation;
use crate::segment::Segment;

/// Fails when the first segment sent has no SYN, or when a later segment
/// that is not a retransmission of that first one carries SYN.
pub struct SynHygiene {
    inner: Handler,
    syn_segment: Option<Segment>,
}

impl SynHygiene {
    /// Creates the monitor before any segment has been sent.
    pub fn new(inner: Handler) -> Self {
        Self {
            inner,
            syn_segment: None,
        }
    }
}

impl SegmentHandler for SynHygiene {
    fn send_segment(&mut self, segment: Segment) -> Result<()> {
        match &self.syn_segment {
            None if segment.is_syn() => self.syn_segment = Some(segment.clone()),
            None => return Err(InvariantViolation::MissingInitialSyn { segment }.into()),
            Some(original) if segment.is_syn() && *original != segment => {
                return Err(InvariantViolation::UnexpectedSyn {
                    segment,
                    original: original.clone(),
                }
                .into());
            }
            Some(_) => {}
        }
        self.inner.send_segment(segment)
    }

    fn segment_received(&mut self, segment: Segment) -> Result<()> {
        self.inner.segment_received(segment)
    }

    fn tick(&mut self) -> Result<()> {
        self.inner.tick()
    }

    fn into_inner(self: Box<Self>) -> Option<Handler> {
        Some(self.inner)
    }
}

impl Effect for SynHygiene {
    type Control = ();

    fn control(&self) -> Self::Control {}
}

/// Reports whether a [`FinHygiene`] monitor has seen a FIN go out.
#[derive(Debug, Clone, Default)]
pub struct FinWatch(Arc<AtomicBool>);

impl FinWatch {
    /// Returns true once any FIN-bearing segment was sent.
    pub fn fin_sent(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Fails when a data-bearing segment sent after a FIN is not a
/// retransmission of a segment sent before it.
pub struct FinHygiene {
    inner: Handler,
    had_fin: FinWatch,
    seen: HashSet<Segment>,
}

impl FinHygiene {
    /// Creates the monitor before any FIN has been sent.
    pub fn new(inner: Handler) -> Self {
        Self {
            inner,
            had_fin: FinWatch::default(),
            seen: HashSet::new(),
        }
    }
}

impl SegmentHandler for FinHygiene {
    fn send_segment(&mut self, segment: Segment) -> Result<()> {
        if self.had_fin.fin_sent() {
            if segment.has_data() && !self.seen.contains(&segment) {
                return Err(InvariantViolation::DataAfterFin { segment }.into());
            }
        } else {
            if segment.is_fin() {
                tracing::debug!("FIN sent: {segment}");
                self.had_fin.0.store(true, Ordering::SeqCst);
            }
            self.seen.insert(segment.clone());
        }
        self.inner.send_segment(segment)
    }

    fn segment_received(&mut self, segment: Segment) -> Result<()> {
        self.inner.segment_received(segment)
    }

    fn tick(&mut self) -> Result<()> {
        self.inner.tick()
    }

    fn into_inner(self: Box<Self>) -> Option<Handler> {
        Some(self.inner)
    }
}

impl Effect for FinHygiene {
    type Control = FinWatch;

    fn control(&self) -> FinWatch {
        self.had_fin.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effects::test_support::{control, data};
    use crate::effects::{EffectStack, Probe};
    use crate::segment::{ACK, FIN, SYN};

    #[test]
    fn test_first_segment_must_carry_syn() {
        let (probe, log) = Probe::new();
        let mut syn = SynHygiene::new(Box::new(probe));

        let err = syn.send_segment(data(1, b"early data")).unwrap_err();
        assert!(matches!(
            err.as_violation(),
            Some(InvariantViolation::MissingInitialSyn { .. })
        ));
        assert!(log.sent().is_empty());
    }

    #[test]
    fn test_syn_retransmission_allowed() {
        let (probe, log) = Probe::new();
        let mut syn = SynHygiene::new(Box::new(probe));

        let handshake = control(100, SYN);
        syn.send_segment(handshake.clone()).unwrap();
        syn.send_segment(handshake.clone()).unwrap();
        syn.send_segment(data(101, b"Hello world!")).unwrap();

        assert_eq!(log.sent().len(), 3);
    }

    #[test]
    fn test_distinct_later_syn_rejected() {
        let (probe, _log) = Probe::new();
        let mut syn = SynHygiene::new(Box::new(probe));

        syn.send_segment(control(100, SYN)).unwrap();
        let err = syn.send_segment(control(200, SYN | ACK)).unwrap_err();
        match err.as_violation() {
            Some(InvariantViolation::UnexpectedSyn { segment, original }) => {
                assert_eq!(segment.seq_num(), 200);
                assert_eq!(original.seq_num(), 100);
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_retransmission_after_fin_allowed() {
        let (probe, log) = Probe::new();
        let mut fin = FinHygiene::new(Box::new(probe));
        let watch = fin.control();

        let payload = data(1, b"Hello world!");
        fin.send_segment(payload.clone()).unwrap();
        assert!(!watch.fin_sent());
        fin.send_segment(control(2, FIN)).unwrap();
        assert!(watch.fin_sent());

        fin.send_segment(payload).unwrap();
        fin.send_segment(control(2, FIN)).unwrap();
        fin.send_segment(control(3, ACK)).unwrap();
        assert_eq!(log.sent().len(), 5);
    }

    #[test]
    fn test_new_data_after_fin_rejected() {
        let (probe, _log) = Probe::new();
        let stack = EffectStack::new(Box::new(probe));
        let watch = stack.activate(FinHygiene::new);

        stack.send_segment(control(1, FIN)).unwrap();
        let err = stack.send_segment(data(2, b"late")).unwrap_err();

        assert!(watch.fin_sent());
        assert!(matches!(
            err.as_violation(),
            Some(InvariantViolation::DataAfterFin { .. })
        ));
    }
}
