//! Byte-stream helpers over a Transport Socket.
//!
//! A socket's `recv` returns whatever happens to be available and its
//! `send` may accept only a prefix, so scenarios go through these helpers
//! to read exact lengths and to push whole buffers.

use std::time::Duration;

use bytes::{Bytes, BytesMut};

use crate::errors::{InvariantViolation, Result};
use crate::transport::{TransportError, TransportSocket};

/// Back-off applied when a send accepts zero bytes.
pub const DEFAULT_SEND_BACKOFF: Duration = Duration::from_millis(50);

/// Exact-length reader that keeps surplus bytes for the next call.
#[derive(Debug, Default)]
pub struct StreamReader {
    buffered: BytesMut,
}

impl StreamReader {
    /// Creates a reader with an empty leftover buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the bytes received but not yet consumed.
    pub fn buffered(&self) -> &[u8] {
        &self.buffered
    }

    /// Blocks until `length` bytes were received and returns exactly those.
    ///
    /// Bytes beyond `length` are kept for the next call. Returns fewer bytes
    /// only when the socket signals closure with an empty read.
    ///
    /// # Errors
    ///
    /// - `TransportError` - If the socket's receive fails
    pub fn recv_exactly<S>(
        &mut self,
        socket: &mut S,
        length: usize,
    ) -> std::result::Result<Bytes, TransportError>
    where
        S: TransportSocket + ?Sized,
    {
        while self.buffered.len() < length {
            let extra = socket.recv()?;
            if extra.is_empty() {
                tracing::debug!(
                    wanted = length,
                    got = self.buffered.len(),
                    "connection closed before enough bytes arrived"
                );
                return Ok(self.buffered.split().freeze());
            }
            self.buffered.extend_from_slice(&extra);
        }
        Ok(self.buffered.split_to(length).freeze())
    }

    /// Receives `data.len()` bytes and checks they equal `data`.
    ///
    /// # Errors
    ///
    /// - `FaultlineError::Invariant` - If the bytes differ or the connection closed early
    /// - `FaultlineError::Transport` - If the socket's receive fails
    pub fn expect<S>(&mut self, socket: &mut S, data: &[u8]) -> Result<()>
    where
        S: TransportSocket + ?Sized,
    {
        let received = self.recv_exactly(socket, data.len())?;
        if received != data {
            return Err(InvariantViolation::UnexpectedData {
                expected: Bytes::copy_from_slice(data),
                received,
            }
            .into());
        }
        Ok(())
    }

    /// Optionally expects `data`, then asserts the connection is closed.
    ///
    /// Closed means nothing is left in the buffer and the next receive
    /// returns an empty read.
    ///
    /// # Errors
    ///
    /// - `FaultlineError::Invariant` - If data differs or more bytes arrive
    /// - `FaultlineError::Transport` - If the socket's receive fails
    pub fn expect_closed<S>(&mut self, socket: &mut S, data: Option<&[u8]>) -> Result<()>
    where
        S: TransportSocket + ?Sized,
    {
        if let Some(data) = data {
            self.expect(socket, data)?;
        }
        if !self.buffered.is_empty() {
            return Err(InvariantViolation::NotClosed {
                received: self.buffered.split().freeze(),
            }
            .into());
        }
        let received = socket.recv()?;
        if !received.is_empty() {
            return Err(InvariantViolation::NotClosed { received }.into());
        }
        Ok(())
    }
}

/// Writer that pushes whole buffers through a partially accepting send.
#[derive(Debug, Clone, Copy)]
pub struct StreamWriter {
    backoff: Duration,
}

impl Default for StreamWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamWriter {
    /// Creates a writer with the default back-off.
    pub fn new() -> Self {
        Self::with_backoff(DEFAULT_SEND_BACKOFF)
    }

    /// Creates a writer sleeping `backoff` whenever a send accepts nothing.
    pub fn with_backoff(backoff: Duration) -> Self {
        Self { backoff }
    }

    /// Blocks until every byte of `data` was accepted by the socket.
    ///
    /// # Errors
    ///
    /// - `TransportError` - If the socket's send fails
    pub fn send_all<S>(
        &self,
        socket: &mut S,
        mut data: &[u8],
    ) -> std::result::Result<(), TransportError>
    where
        S: TransportSocket + ?Sized,
    {
        while !data.is_empty() {
            let accepted = socket.send(data)?.min(data.len());
            data = &data[accepted..];
            if accepted == 0 {
                tracing::trace!(remaining = data.len(), "send window full, backing off");
                std::thread::sleep(self.backoff);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use super::*;
    use crate::effects::{EffectStack, Probe};
    use crate::errors::FaultlineError;

    /// Socket that replays scripted reads and accepts at most `chunk` bytes per send.
    struct ScriptedSocket {
        reads: VecDeque<&'static str>,
        sends: Vec<usize>,
        accepted: Vec<u8>,
        chunk: VecDeque<usize>,
        effects: EffectStack,
    }

    impl ScriptedSocket {
        fn new(reads: &[&'static str]) -> Self {
            let (probe, _log) = Probe::new();
            Self {
                reads: reads.iter().copied().collect(),
                sends: Vec::new(),
                accepted: Vec::new(),
                chunk: VecDeque::new(),
                effects: EffectStack::new(Box::new(probe)),
            }
        }
    }

    impl TransportSocket for ScriptedSocket {
        fn send(&mut self, data: &[u8]) -> std::result::Result<usize, TransportError> {
            let n = self.chunk.pop_front().unwrap_or(data.len()).min(data.len());
            self.sends.push(n);
            self.accepted.extend_from_slice(&data[..n]);
            Ok(n)
        }

        fn recv(&mut self) -> std::result::Result<Bytes, TransportError> {
            Ok(self
                .reads
                .pop_front()
                .map(|read| Bytes::from_static(read.as_bytes()))
                .unwrap_or_default())
        }

        fn shutdown(&mut self) -> std::result::Result<(), TransportError> {
            Ok(())
        }

        fn close(&mut self) -> std::result::Result<(), TransportError> {
            Ok(())
        }

        fn effects(&self) -> &EffectStack {
            &self.effects
        }
    }

    #[test]
    fn test_recv_exactly_spans_reads_and_buffers_surplus() {
        let mut socket = ScriptedSocket::new(&["hello", " world!"]);
        let mut reader = StreamReader::new();

        let first = reader.recv_exactly(&mut socket, 10).unwrap();
        assert_eq!(&first[..], b"hello worl");
        assert_eq!(reader.buffered(), b"d!");

        let second = reader.recv_exactly(&mut socket, 2).unwrap();
        assert_eq!(&second[..], b"d!");
        assert!(reader.buffered().is_empty());
    }

    #[test]
    fn test_recv_exactly_short_on_close() {
        let mut socket = ScriptedSocket::new(&["abc"]);
        let mut reader = StreamReader::new();

        let got = reader.recv_exactly(&mut socket, 8).unwrap();
        assert_eq!(&got[..], b"abc");
    }

    #[test]
    fn test_expect_mismatch_reports_both_sides() {
        let mut socket = ScriptedSocket::new(&["Hello world?"]);
        let mut reader = StreamReader::new();

        let err = reader.expect(&mut socket, b"Hello world!").unwrap_err();
        match err {
            FaultlineError::Invariant(InvariantViolation::UnexpectedData {
                expected,
                received,
            }) => {
                assert_eq!(&expected[..], b"Hello world!");
                assert_eq!(&received[..], b"Hello world?");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_expect_closed_after_data() {
        let mut socket = ScriptedSocket::new(&["bye"]);
        let mut reader = StreamReader::new();

        reader.expect_closed(&mut socket, Some(&b"bye"[..])).unwrap();
    }

    #[test]
    fn test_expect_closed_rejects_further_data() {
        let mut socket = ScriptedSocket::new(&["bye", "more"]);
        let mut reader = StreamReader::new();

        let err = reader.expect_closed(&mut socket, Some(&b"bye"[..])).unwrap_err();
        assert!(err.is_invariant_violation());
    }

    #[test]
    fn test_expect_closed_rejects_buffered_leftover() {
        let mut socket = ScriptedSocket::new(&["byebye"]);
        let mut reader = StreamReader::new();

        let err = reader.expect_closed(&mut socket, Some(&b"bye"[..])).unwrap_err();
        assert!(matches!(
            err,
            FaultlineError::Invariant(InvariantViolation::NotClosed { .. })
        ));
    }

    #[test]
    fn test_send_all_retries_partial_and_zero_sends() {
        let mut socket = ScriptedSocket::new(&[]);
        socket.chunk = VecDeque::from([4, 0, 3]);
        let writer = StreamWriter::with_backoff(Duration::from_millis(1));

        writer.send_all(&mut socket, b"Hello world!").unwrap();

        assert_eq!(socket.accepted, b"Hello world!");
        assert_eq!(socket.sends, vec![4, 0, 3, 5]);
    }
}
