//! Error types shared by the effect chain and the byte helpers.

use bytes::Bytes;

use crate::effects::Direction;
use crate::segment::Segment;
use crate::transport::TransportError;

/// Protocol contract breach detected by an effect monitor or byte helper.
///
/// Raised synchronously inside the role that owns the monitor. The
/// orchestrator only ever sees the role failing; the specific violation is
/// visible through that role's own diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvariantViolation {
    /// A segment did not have the fixed reference size
    #[error("{direction} segment length, {actual}, is not {expected}!")]
    SegmentLength {
        /// Whether the segment was being sent or received
        direction: Direction,
        /// Observed length
        actual: usize,
        /// Required length
        expected: usize,
    },

    /// The very first segment sent did not carry SYN
    #[error("The first segment sent has no SYN set: {segment}")]
    MissingInitialSyn {
        /// Offending segment
        segment: Segment,
    },

    /// A later, byte-distinct segment carried SYN
    #[error(
        "Segment has SYN set, but is not (a retransmission of) the first segment. new segment: {segment}, old segment: {original}"
    )]
    UnexpectedSyn {
        /// Offending segment
        segment: Segment,
        /// First SYN-bearing segment
        original: Segment,
    },

    /// New data was sent after a FIN
    #[error("Segment after FIN has data but is not a retransmission: {segment}")]
    DataAfterFin {
        /// Offending segment
        segment: Segment,
    },

    /// More distinct data-bearing segments were in flight than permitted
    #[error("Window size {window} not respected: {segment}")]
    WindowExceeded {
        /// Configured window size
        window: usize,
        /// Segment that overflowed the window
        segment: Segment,
    },

    /// A peer never sent FIN during a scenario that requires one
    #[error("{role} did not send FIN")]
    MissingFin {
        /// Role that should have sent FIN
        role: String,
    },

    /// Received bytes differ from the expected literal
    #[error("expected to receive {expected:?}, but got {received:?}")]
    UnexpectedData {
        /// Expected bytes
        expected: Bytes,
        /// Bytes actually received (possibly short)
        received: Bytes,
    },

    /// The connection delivered data where closure was expected
    #[error("expected the connection to be closed, but recv() returned {received:?} instead of b\"\"")]
    NotClosed {
        /// Bytes returned instead of the closing empty read
        received: Bytes,
    },
}

/// Failure raised while a segment or tick travels through the effect chain.
#[derive(Debug, thiserror::Error)]
pub enum EffectError {
    /// An effect monitor detected a contract breach
    #[error("Invariant violated: {0}")]
    Invariant(#[from] InvariantViolation),

    /// The base handler failed to move the segment
    #[error("Link error: {0}")]
    Link(#[from] std::io::Error),
}

impl EffectError {
    /// Returns the invariant violation, if that is what this error is.
    pub fn as_violation(&self) -> Option<&InvariantViolation> {
        match self {
            EffectError::Invariant(violation) => Some(violation),
            EffectError::Link(_) => None,
        }
    }
}

/// Errors that can bubble up from any Faultline core operation.
#[derive(Debug, thiserror::Error)]
pub enum FaultlineError {
    #[error(transparent)]
    Invariant(#[from] InvariantViolation),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Recording error: {reason}")]
    Recording { reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl FaultlineError {
    /// Checks if this error is a protocol contract breach.
    pub fn is_invariant_violation(&self) -> bool {
        match self {
            FaultlineError::Invariant(_) => true,
            FaultlineError::Transport(TransportError::Effect(e)) => e.as_violation().is_some(),
            _ => false,
        }
    }
}

/// Result alias for Faultline core operations.
pub type Result<T> = std::result::Result<T, FaultlineError>;
