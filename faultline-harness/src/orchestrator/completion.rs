//! Completion channel from workers to the orchestrator.
//!
//! Every worker writes one fixed-size record when its role body returns.
//! Records are far smaller than `PIPE_BUF`, so concurrent writers never
//! interleave. The orchestrator drops its own write end once all workers
//! are spawned; end-of-file then means every worker has exited.

use std::fs::File;
use std::io::{self, ErrorKind, Read, Write};
use std::os::fd::{AsRawFd, FromRawFd};
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::poll::{PollFd, PollFlags, poll};

/// Size of one completion record: big-endian role index plus status byte.
pub const RECORD_LEN: usize = 5;

/// Creates an anonymous pipe as a pair of owned files.
pub(crate) fn pipe() -> io::Result<(File, File)> {
    let (read_fd, write_fd) = nix::unistd::pipe()?;
    // SAFETY: both descriptors were just created by pipe(2) and are owned by
    // nothing else, so each File becomes their single owner.
    let files = unsafe { (File::from_raw_fd(read_fd), File::from_raw_fd(write_fd)) };
    Ok(files)
}

/// Outcome a worker reports for its role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Completion {
    /// Index of the role in the job
    pub index: usize,
    /// Whether the role body returned without error
    pub success: bool,
}

impl Completion {
    fn encode(self) -> [u8; RECORD_LEN] {
        let index = u32::try_from(self.index).unwrap_or(u32::MAX).to_be_bytes();
        [index[0], index[1], index[2], index[3], u8::from(self.success)]
    }

    fn decode(record: [u8; RECORD_LEN]) -> Self {
        let index = u32::from_be_bytes([record[0], record[1], record[2], record[3]]);
        Self {
            index: index as usize,
            success: record[4] == 1,
        }
    }
}

/// What waiting on the channel produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Received {
    /// A worker reported
    Completion(Completion),
    /// The deadline passed without a report
    TimedOut,
    /// Every write end is closed, no further report can arrive
    Closed,
}

/// Pipe shared by all workers of a job.
#[derive(Debug)]
pub struct CompletionChannel {
    reader: File,
    writer: Option<File>,
}

impl CompletionChannel {
    /// Creates the channel before any worker is spawned.
    ///
    /// # Errors
    ///
    /// - `io::Error` - If the pipe cannot be created
    pub fn new() -> io::Result<Self> {
        let (reader, writer) = pipe()?;
        Ok(Self {
            reader,
            writer: Some(writer),
        })
    }

    /// Writes one completion record; called from inside a worker.
    ///
    /// # Errors
    ///
    /// - `io::Error` - If the write end is closed or the write fails
    pub fn report(&self, completion: Completion) -> io::Result<()> {
        let mut writer = self.writer.as_ref().ok_or_else(|| {
            io::Error::new(ErrorKind::BrokenPipe, "completion channel write end closed")
        })?;
        writer.write_all(&completion.encode())
    }

    /// Drops the orchestrator's copy of the write end.
    pub fn close_writer(&mut self) {
        self.writer = None;
    }

    /// Waits for the next record until `deadline`.
    ///
    /// The poll budget is recomputed from the deadline on every attempt, so
    /// interrupted waits never extend the overall deadline.
    ///
    /// # Errors
    ///
    /// - `io::Error` - If polling or reading the pipe fails
    pub fn recv_until(&mut self, deadline: Instant) -> io::Result<Received> {
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(Received::TimedOut);
            }

            let mut fds = [PollFd::new(self.reader.as_raw_fd(), PollFlags::POLLIN)];
            match poll(&mut fds, poll_timeout(remaining)) {
                Ok(0) => continue,
                Ok(_) => return self.read_record(),
                Err(Errno::EINTR) => {
                    tracing::debug!("completion wait interrupted, retrying");
                    continue;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn read_record(&mut self) -> io::Result<Received> {
        let mut record = [0u8; RECORD_LEN];
        match self.reader.read_exact(&mut record) {
            Ok(()) => Ok(Received::Completion(Completion::decode(record))),
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => Ok(Received::Closed),
            Err(e) if e.kind() == ErrorKind::Interrupted => self.read_record(),
            Err(e) => Err(e),
        }
    }
}

/// Converts a remaining budget to a poll(2) timeout, rounding up.
fn poll_timeout(remaining: Duration) -> i32 {
    let millis = remaining.as_micros().div_ceil(1000);
    i32::try_from(millis).unwrap_or(i32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_layout() {
        let completion = Completion {
            index: 0x0102_0304,
            success: true,
        };
        assert_eq!(completion.encode(), [1, 2, 3, 4, 1]);
        assert_eq!(Completion::decode(completion.encode()), completion);

        let failed = Completion {
            index: 1,
            success: false,
        };
        assert_eq!(failed.encode(), [0, 0, 0, 1, 0]);
    }

    #[test]
    fn test_reports_arrive_in_order() {
        let mut channel = CompletionChannel::new().unwrap();
        let deadline = Instant::now() + Duration::from_secs(1);

        channel.report(Completion { index: 1, success: true }).unwrap();
        channel.report(Completion { index: 0, success: false }).unwrap();

        assert_eq!(
            channel.recv_until(deadline).unwrap(),
            Received::Completion(Completion { index: 1, success: true })
        );
        assert_eq!(
            channel.recv_until(deadline).unwrap(),
            Received::Completion(Completion { index: 0, success: false })
        );
    }

    #[test]
    fn test_deadline_without_report() {
        let mut channel = CompletionChannel::new().unwrap();
        let started = Instant::now();

        let received = channel
            .recv_until(started + Duration::from_millis(50))
            .unwrap();

        assert_eq!(received, Received::TimedOut);
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn test_closed_after_writer_dropped() {
        let mut channel = CompletionChannel::new().unwrap();
        channel.close_writer();

        let received = channel
            .recv_until(Instant::now() + Duration::from_secs(1))
            .unwrap();
        assert_eq!(received, Received::Closed);
        assert!(channel.report(Completion { index: 0, success: true }).is_err());
    }

    #[test]
    fn test_poll_timeout_rounds_up() {
        assert_eq!(poll_timeout(Duration::from_micros(1)), 1);
        assert_eq!(poll_timeout(Duration::from_millis(20)), 20);
        assert_eq!(poll_timeout(Duration::from_secs(u64::MAX)), i32::MAX);
    }
}
