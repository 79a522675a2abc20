//! Capture of a segment trace and its later replay on the tick cadence.
//!
//! A [`Recorder`] timestamps every segment crossing it against its own
//! clock. The resulting [`Recording`] can be saved as JSON and handed to a
//! [`Replayer`] in another run, which releases each entry on the first tick
//! after its timestamp has elapsed. Replay timing fidelity is therefore
//! bounded by the protocol's tick interval.

use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};

use super::{Effect, Handler, Result, SegmentHandler};
use crate::errors::FaultlineError;
use crate::segment::Segment;

/// Source of elapsed time for recording and replay.
pub trait Clock: Send + 'static {
    /// Returns the time elapsed since the clock's origin.
    fn elapsed(&self) -> Duration;
}

/// Monotonic wall clock whose origin is its creation.
#[derive(Debug, Clone, Copy)]
pub struct WallClock {
    origin: Instant,
}

impl WallClock {
    /// Starts a clock at the current instant.
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for WallClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for WallClock {
    fn elapsed(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// Clock that only moves when advanced; clones share the same time.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    nanos: Arc<AtomicU64>,
}

impl ManualClock {
    /// Creates a clock at time zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Moves the clock forward by `by`.
    pub fn advance(&self, by: Duration) {
        let nanos = u64::try_from(by.as_nanos()).unwrap_or(u64::MAX);
        self.nanos.fetch_add(nanos, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn elapsed(&self) -> Duration {
        Duration::from_nanos(self.nanos.load(Ordering::SeqCst))
    }
}

/// Segment captured together with the time it crossed the recorder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordedSegment {
    /// Elapsed time since the recorder was installed
    pub at: Duration,
    /// Captured segment
    pub segment: Segment,
}

/// Outbound and inbound segment logs, each in capture order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recording {
    /// Segments the protocol sent
    pub sent: Vec<RecordedSegment>,
    /// Segments delivered to the protocol
    pub received: Vec<RecordedSegment>,
}

impl Recording {
    /// Returns true if neither log holds an entry.
    pub fn is_empty(&self) -> bool {
        self.sent.is_empty() && self.received.is_empty()
    }

    /// Writes the recording to `path` as JSON.
    ///
    /// # Errors
    ///
    /// - `FaultlineError::Io` - If the file cannot be created or flushed
    /// - `FaultlineError::Recording` - If serialization fails
    pub fn save(&self, path: impl AsRef<Path>) -> crate::errors::Result<()> {
        let mut writer = BufWriter::new(File::create(path.as_ref())?);
        serde_json::to_writer_pretty(&mut writer, self).map_err(|e| {
            FaultlineError::Recording {
                reason: format!("failed to write {}: {e}", path.as_ref().display()),
            }
        })?;
        writer.flush()?;
        Ok(())
    }

    /// Reads a recording previously written by [`save`](Self::save).
    ///
    /// # Errors
    ///
    /// - `FaultlineError::Io` - If the file cannot be opened
    /// - `FaultlineError::Recording` - If the content is not a valid recording
    pub fn load(path: impl AsRef<Path>) -> crate::errors::Result<Self> {
        let reader = BufReader::new(File::open(path.as_ref())?);
        serde_json::from_reader(reader).map_err(|e| FaultlineError::Recording {
            reason: format!("failed to read {}: {e}", path.as_ref().display()),
        })
    }
}

/// Shared view of the trace a [`Recorder`] is capturing.
#[derive(Debug, Clone, Default)]
pub struct RecordingHandle(Arc<Mutex<Recording>>);

impl RecordingHandle {
    /// Returns a copy of everything captured so far.
    pub fn snapshot(&self) -> Recording {
        self.0.lock().clone()
    }
}

/// Appends every sent and received segment to a [`Recording`] without
/// altering forwarding.
pub struct Recorder {
    inner: Handler,
    clock: Box<dyn Clock>,
    recording: RecordingHandle,
}

impl Recorder {
    /// Records against a wall clock started now.
    pub fn new(inner: Handler) -> Self {
        Self::with_clock(inner, WallClock::new())
    }

    /// Records against `clock`.
    pub fn with_clock(inner: Handler, clock: impl Clock) -> Self {
        Self {
            inner,
            clock: Box::new(clock),
            recording: RecordingHandle::default(),
        }
    }

    fn stamp(&self, segment: &Segment) -> RecordedSegment {
        RecordedSegment {
            at: self.clock.elapsed(),
            segment: segment.clone(),
        }
    }
}

impl SegmentHandler for Recorder {
    fn send_segment(&mut self, segment: Segment) -> Result<()> {
        let entry = self.stamp(&segment);
        tracing::debug!("recorded sent segment {segment}");
        self.recording.0.lock().sent.push(entry);
        self.inner.send_segment(segment)
    }

    fn segment_received(&mut self, segment: Segment) -> Result<()> {
        let entry = self.stamp(&segment);
        tracing::debug!("recorded received segment {segment}");
        self.recording.0.lock().received.push(entry);
        self.inner.segment_received(segment)
    }

    fn tick(&mut self) -> Result<()> {
        self.inner.tick()
    }

    fn into_inner(self: Box<Self>) -> Option<Handler> {
        Some(self.inner)
    }
}

impl Effect for Recorder {
    type Control = RecordingHandle;

    fn control(&self) -> RecordingHandle {
        self.recording.clone()
    }
}

#[derive(Debug, Default)]
struct ReplayState {
    done: Mutex<bool>,
    finished: Condvar,
}

/// Completion signal of a [`Replayer`].
#[derive(Debug, Clone, Default)]
pub struct ReplayProgress(Arc<ReplayState>);

impl ReplayProgress {
    /// Blocks until every recorded segment was replayed.
    pub fn wait(&self) {
        let mut done = self.0.done.lock();
        while !*done {
            self.0.finished.wait(&mut done);
        }
    }

    /// Blocks until the replay finished or `timeout` elapsed.
    ///
    /// Returns true if the replay finished.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut done = self.0.done.lock();
        while !*done {
            if self.0.finished.wait_until(&mut done, deadline).timed_out() {
                break;
            }
        }
        *done
    }

    /// Returns true once every recorded segment was replayed.
    pub fn is_done(&self) -> bool {
        *self.0.done.lock()
    }

    fn finish(&self) {
        let mut done = self.0.done.lock();
        if !*done {
            *done = true;
            self.0.finished.notify_all();
        }
    }
}

/// Feeds a [`Recording`] back into the chain on the tick cadence.
///
/// On every tick, inbound entries whose timestamp has elapsed are delivered
/// to the protocol, then due outbound entries are transmitted, each log in
/// its recorded order. Live traffic passes through untouched.
pub struct Replayer {
    inner: Handler,
    clock: Box<dyn Clock>,
    sent: VecDeque<RecordedSegment>,
    received: VecDeque<RecordedSegment>,
    progress: ReplayProgress,
}

impl Replayer {
    /// Replays against a wall clock started now.
    pub fn new(inner: Handler, recording: Recording) -> Self {
        Self::with_clock(inner, recording, WallClock::new())
    }

    /// Replays against `clock`.
    pub fn with_clock(inner: Handler, recording: Recording, clock: impl Clock) -> Self {
        tracing::debug!(
            sent = recording.sent.len(),
            received = recording.received.len(),
            "replaying recording"
        );
        Self {
            inner,
            clock: Box::new(clock),
            sent: recording.sent.into(),
            received: recording.received.into(),
            progress: ReplayProgress::default(),
        }
    }

    fn due(log: &mut VecDeque<RecordedSegment>, now: Duration) -> Option<Segment> {
        match log.front() {
            Some(entry) if entry.at < now => log.pop_front().map(|entry| entry.segment),
            _ => None,
        }
    }
}

impl SegmentHandler for Replayer {
    fn send_segment(&mut self, segment: Segment) -> Result<()> {
        self.inner.send_segment(segment)
    }

    fn segment_received(&mut self, segment: Segment) -> Result<()> {
        self.inner.segment_received(segment)
    }

    fn tick(&mut self) -> Result<()> {
        let now = self.clock.elapsed();
        while let Some(segment) = Self::due(&mut self.received, now) {
            tracing::debug!("replaying received segment {segment}");
            self.inner.segment_received(segment)?;
        }
        while let Some(segment) = Self::due(&mut self.sent, now) {
            tracing::debug!("replaying sent segment {segment}");
            self.inner.send_segment(segment)?;
        }
        if self.sent.is_empty() && self.received.is_empty() {
            self.progress.finish();
        }
        self.inner.tick()
    }

    fn into_inner(self: Box<Self>) -> Option<Handler> {
        Some(self.inner)
    }
}

impl Effect for Replayer {
    type Control = ReplayProgress;

    fn control(&self) -> ReplayProgress {
        self.progress.clone()
    }
}
