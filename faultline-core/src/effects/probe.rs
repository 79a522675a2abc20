//! Base handler that records what reaches the bottom of a chain.

use std::sync::Arc;

use parking_lot::Mutex;

use super::{Result, SegmentHandler};
use crate::segment::Segment;

/// Event observed by a [`Probe`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeEvent {
    /// Segment forwarded for transmission
    Sent(Segment),
    /// Segment delivered to the protocol
    Received(Segment),
    /// Timer tick
    Tick,
}

/// Shared view of the events a probe observed.
#[derive(Debug, Clone, Default)]
pub struct ProbeLog(Arc<Mutex<Vec<ProbeEvent>>>);

impl ProbeLog {
    /// Returns every event observed so far, in order.
    pub fn events(&self) -> Vec<ProbeEvent> {
        self.0.lock().clone()
    }

    /// Returns the segments that were sent, in order.
    pub fn sent(&self) -> Vec<Segment> {
        self.0
            .lock()
            .iter()
            .filter_map(|event| match event {
                ProbeEvent::Sent(segment) => Some(segment.clone()),
                _ => None,
            })
            .collect()
    }

    /// Returns the segments that were delivered, in order.
    pub fn received(&self) -> Vec<Segment> {
        self.0
            .lock()
            .iter()
            .filter_map(|event| match event {
                ProbeEvent::Received(segment) => Some(segment.clone()),
                _ => None,
            })
            .collect()
    }

    /// Returns the number of ticks observed.
    pub fn ticks(&self) -> usize {
        self.0
            .lock()
            .iter()
            .filter(|event| matches!(event, ProbeEvent::Tick))
            .count()
    }

    /// Forgets every observed event.
    pub fn clear(&self) {
        self.0.lock().clear();
    }
}

/// Innermost handler standing in for a transport's lossy layer in tests.
pub struct Probe {
    log: ProbeLog,
}

impl Probe {
    /// Creates a probe and the log it writes to.
    pub fn new() -> (Self, ProbeLog) {
        let log = ProbeLog::default();
        (Self { log: log.clone() }, log)
    }
}

impl SegmentHandler for Probe {
    fn send_segment(&mut self, segment: Segment) -> Result<()> {
        self.log.0.lock().push(ProbeEvent::Sent(segment));
        Ok(())
    }

    fn segment_received(&mut self, segment: Segment) -> Result<()> {
        self.log.0.lock().push(ProbeEvent::Received(segment));
        Ok(())
    }

    fn tick(&mut self) -> Result<()> {
        self.log.0.lock().push(ProbeEvent::Tick);
        Ok(())
    }
}
