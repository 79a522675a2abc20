//! Composable interceptors for protocol segments and timer ticks.
//!
//! An effect chain is a singly linked ownership structure: every effect
//! exclusively owns the next-inner handler and forwards to it unless it
//! deliberately drops, delays, duplicates or mutates a segment. The
//! innermost handler belongs to the transport's lossy layer and actually
//! moves segments over the datagram channel.

mod corrupt;
mod duplication;
mod guard;
mod hygiene;
mod loss;
pub mod record;
mod reorder;
mod stack;
mod window;

#[cfg(any(test, feature = "test-utils"))]
mod probe;

use std::fmt;

pub use corrupt::{CORRUPTION_MARKER, CorruptPayload};
pub use duplication::Duplication;
pub use guard::SegmentLengthGuard;
pub use hygiene::{FinHygiene, FinWatch, SynHygiene};
pub use loss::DropEveryOther;
#[cfg(any(test, feature = "test-utils"))]
pub use probe::{Probe, ProbeEvent, ProbeLog};
pub use record::{
    Clock, ManualClock, RecordedSegment, Recorder, Recording, RecordingHandle, ReplayProgress,
    Replayer, WallClock,
};
pub use reorder::ReorderReceived;
pub use stack::{Activation, EffectStack};
pub use window::{InFlightWindow, SteadyWindow, WindowRelease, WindowStop};

use crate::errors::EffectError;
use crate::segment::Segment;

/// Result type for effect chain operations.
pub type Result<T> = std::result::Result<T, EffectError>;

/// Boxed handler, the unit of ownership within a chain.
pub type Handler = Box<dyn SegmentHandler>;

/// Direction a segment travels relative to the local role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Handed to the lossy layer for transmission
    Outbound,
    /// Delivered from the lossy layer to the protocol
    Inbound,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Outbound => write!(f, "sent"),
            Direction::Inbound => write!(f, "received"),
        }
    }
}

/// Capability set every node of an effect chain exposes.
///
/// Calls are serialised by the owning [`EffectStack`], so implementations
/// never see two events concurrently.
pub trait SegmentHandler: Send {
    /// Handles a segment the protocol wants to transmit.
    ///
    /// # Errors
    /// Returns `EffectError` if a monitor rejects the segment or the link fails.
    fn send_segment(&mut self, segment: Segment) -> Result<()>;

    /// Handles a segment arriving from the peer.
    ///
    /// # Errors
    /// Returns `EffectError` if a monitor rejects the segment or delivery fails.
    fn segment_received(&mut self, segment: Segment) -> Result<()>;

    /// Handles one tick of the protocol's timer loop.
    ///
    /// # Errors
    /// Returns `EffectError` if a delayed segment cannot be released.
    fn tick(&mut self) -> Result<()>;

    /// Gives back the exclusively owned inner handler.
    ///
    /// Base handlers own nothing and return `None`. Effects that hold
    /// segments release them into the inner handler before returning it.
    fn into_inner(self: Box<Self>) -> Option<Handler> {
        None
    }
}

/// Installable effect with a handle the scenario keeps while it is active.
pub trait Effect: SegmentHandler + 'static {
    /// Handle returned by [`EffectStack::activate`]
    type Control: Send + 'static;

    /// Creates the control handle shared with this effect.
    fn control(&self) -> Self::Control;
}

/// Effect that forwards everything unchanged.
pub struct Passthrough {
    inner: Handler,
}

impl Passthrough {
    /// Wraps `inner` without altering any traffic.
    pub fn new(inner: Handler) -> Self {
        Self { inner }
    }
}

impl SegmentHandler for Passthrough {
    fn send_segment(&mut self, segment: Segment) -> Result<()> {
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

impl Effect for Passthrough {
    type Control = ();

    fn control(&self) -> Self::Control {}
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::segment::{ACK, SegmentHeader};

    pub(crate) fn data(seq: u16, payload: &[u8]) -> Segment {
        Segment::new(
            SegmentHeader {
                seq_num: seq,
                ack_num: 0,
                flags: ACK,
                window: 10,
            },
            payload,
        )
    }

    pub(crate) fn control(seq: u16, flags: u8) -> Segment {
        Segment::new(
            SegmentHeader {
                seq_num: seq,
                ack_num: 0,
                flags,
                window: 10,
            },
            b"",
        )
    }
}
