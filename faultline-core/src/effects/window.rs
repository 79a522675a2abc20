//! Monitors for the advertised window on outbound data segments.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use super::{Effect, Handler, Result, SegmentHandler};
use crate::errors::InvariantViolation;
use crate::segment::Segment;

/// Counts distinct data-bearing segments against a window size.
///
/// Retransmissions are byte-identical, so they are recognised by exact
/// segment identity and counted once.
#[derive(Debug)]
struct DistinctDataCounter {
    window: usize,
    seen: HashSet<Segment>,
}

impl DistinctDataCounter {
    fn new(window: usize) -> Self {
        Self {
            window,
            seen: HashSet::new(),
        }
    }

    fn observe(&mut self, segment: &Segment) -> std::result::Result<(), InvariantViolation> {
        if !segment.has_data() || self.seen.contains(segment) {
            return Ok(());
        }
        tracing::debug!("window monitor: counting data segment {segment}");
        self.seen.insert(segment.clone());
        if self.seen.len() > self.window {
            return Err(InvariantViolation::WindowExceeded {
                window: self.window,
                segment: segment.clone(),
            });
        }
        Ok(())
    }
}

/// Releases the segments an [`InFlightWindow`] holds back.
#[derive(Debug, Clone, Default)]
pub struct WindowRelease(Arc<AtomicBool>);

impl WindowRelease {
    /// Lets held segments through on the next send or tick.
    pub fn release(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Returns true once [`release`](Self::release) was called.
    pub fn is_released(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Holds every outbound segment in flight until released.
///
/// Nothing reaches the peer while held, so the sender never receives an
/// acknowledgement and must stop after filling its window. A sender that
/// keeps producing new data segments beyond the window fails with
/// [`InvariantViolation::WindowExceeded`]. After release the held segments
/// are flushed in their original order and later segments pass through.
pub struct InFlightWindow {
    inner: Handler,
    counter: DistinctDataCounter,
    held: Vec<Segment>,
    released: WindowRelease,
}

impl InFlightWindow {
    /// Creates a monitor allowing `window` distinct data segments in flight.
    pub fn new(inner: Handler, window: usize) -> Self {
        Self {
            inner,
            counter: DistinctDataCounter::new(window),
            held: Vec::new(),
            released: WindowRelease::default(),
        }
    }

    fn flush(&mut self) -> Result<()> {
        if !self.held.is_empty() {
            tracing::debug!(count = self.held.len(), "flushing held segments");
        }
        for segment in std::mem::take(&mut self.held) {
            self.inner.send_segment(segment)?;
        }
        Ok(())
    }
}

impl SegmentHandler for InFlightWindow {
    fn send_segment(&mut self, segment: Segment) -> Result<()> {
        if self.released.is_released() {
            self.flush()?;
            return self.inner.send_segment(segment);
        }
        self.counter.observe(&segment)?;
        self.held.push(segment);
        Ok(())
    }

    fn segment_received(&mut self, segment: Segment) -> Result<()> {
        self.inner.segment_received(segment)
    }

    fn tick(&mut self) -> Result<()> {
        if self.released.is_released() {
            self.flush()?;
        }
        self.inner.tick()
    }

    fn into_inner(mut self: Box<Self>) -> Option<Handler> {
        if let Err(e) = self.flush() {
            tracing::warn!("held segments lost while deactivating window monitor: {e}");
        }
        Some(self.inner)
    }
}

impl Effect for InFlightWindow {
    type Control = WindowRelease;

    fn control(&self) -> WindowRelease {
        self.released.clone()
    }
}

/// Ends the counting of a [`SteadyWindow`].
#[derive(Debug, Clone, Default)]
pub struct WindowStop(Arc<AtomicBool>);

impl WindowStop {
    /// Stops counting; later segments are never checked.
    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Forwards every outbound segment immediately while counting distinct
/// data-bearing segments until stopped.
///
/// Meant for a receiver whose application does not read until the check
/// is stopped, so the sender's window cannot legitimately reopen.
pub struct SteadyWindow {
    inner: Handler,
    counter: DistinctDataCounter,
    stopped: WindowStop,
}

impl SteadyWindow {
    /// Creates a monitor allowing `window` distinct data segments.
    pub fn new(inner: Handler, window: usize) -> Self {
        Self {
            inner,
            counter: DistinctDataCounter::new(window),
            stopped: WindowStop::default(),
        }
    }
}

impl SegmentHandler for SteadyWindow {
    fn send_segment(&mut self, segment: Segment) -> Result<()> {
        let check = if self.stopped.is_stopped() {
            Ok(())
        } else {
            self.counter.observe(&segment)
        };
        self.inner.send_segment(segment)?;
        check.map_err(Into::into)
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

impl Effect for SteadyWindow {
    type Control = WindowStop;

    fn control(&self) -> WindowStop {
        self.stopped.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effects::test_support::{control, data};
    use crate::effects::{EffectStack, Probe};
    use crate::segment::SYN;

    #[test]
    fn test_full_window_then_release() {
        let (probe, log) = Probe::new();
        let mut window = InFlightWindow::new(Box::new(probe), 3);
        let release = window.control();

        window.send_segment(control(0, SYN)).unwrap();
        for seq in 1..=3 {
            window.send_segment(data(seq, b"payload")).unwrap();
        }
        assert!(log.sent().is_empty());

        release.release();
        window.tick().unwrap();
        let flushed: Vec<u16> = log.sent().iter().map(Segment::seq_num).collect();
        assert_eq!(flushed, vec![0, 1, 2, 3]);

        window.send_segment(data(4, b"after")).unwrap();
        assert_eq!(log.sent().len(), 5);
    }

    #[test]
    fn test_one_beyond_window_fails() {
        let (probe, _log) = Probe::new();
        let mut window = InFlightWindow::new(Box::new(probe), 3);

        for seq in 1..=3 {
            window.send_segment(data(seq, b"payload")).unwrap();
        }
        let err = window.send_segment(data(4, b"payload")).unwrap_err();
        assert!(matches!(
            err.as_violation(),
            Some(InvariantViolation::WindowExceeded { window: 3, .. })
        ));
    }

    #[test]
    fn test_retransmissions_not_counted() {
        let (probe, _log) = Probe::new();
        let mut window = InFlightWindow::new(Box::new(probe), 2);

        let first = data(1, b"payload");
        window.send_segment(first.clone()).unwrap();
        window.send_segment(first.clone()).unwrap();
        window.send_segment(first).unwrap();
        window.send_segment(data(2, b"payload")).unwrap();
    }

    #[test]
    fn test_flush_on_send_after_release_keeps_order() {
        let (probe, log) = Probe::new();
        let mut window = InFlightWindow::new(Box::new(probe), 2);
        let release = window.control();

        window.send_segment(data(1, b"a")).unwrap();
        window.send_segment(data(2, b"b")).unwrap();
        release.release();
        window.send_segment(data(3, b"c")).unwrap();

        let sent: Vec<u16> = log.sent().iter().map(Segment::seq_num).collect();
        assert_eq!(sent, vec![1, 2, 3]);
    }

    #[test]
    fn test_held_segments_flushed_on_deactivation() {
        let (probe, log) = Probe::new();
        let stack = EffectStack::new(Box::new(probe));

        let guard = stack.activate(|inner| InFlightWindow::new(inner, 4));
        stack.send_segment(data(1, b"a")).unwrap();
        assert!(log.sent().is_empty());
        guard.deactivate().unwrap();

        assert_eq!(log.sent().len(), 1);
    }

    #[test]
    fn test_steady_window_forwards_and_counts() {
        let (probe, log) = Probe::new();
        let mut window = SteadyWindow::new(Box::new(probe), 2);

        window.send_segment(data(1, b"a")).unwrap();
        window.send_segment(data(1, b"a")).unwrap();
        window.send_segment(data(2, b"b")).unwrap();
        assert_eq!(log.sent().len(), 3);

        let err = window.send_segment(data(3, b"c")).unwrap_err();
        assert!(err.as_violation().is_some());
        // Forwarded before the check fails.
        assert_eq!(log.sent().len(), 4);
    }

    #[test]
    fn test_steady_window_stop_disables_check() {
        let (probe, log) = Probe::new();
        let mut window = SteadyWindow::new(Box::new(probe), 1);
        let stop = window.control();

        window.send_segment(data(1, b"a")).unwrap();
        stop.stop();
        for seq in 2..10 {
            window.send_segment(data(seq, b"more")).unwrap();
        }
        assert_eq!(log.sent().len(), 9);
    }
}
