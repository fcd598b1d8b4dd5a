//! Outstanding requests keyed by sequence number.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use bytes::Bytes;
use crossbeam_channel::Sender;
use nfdbg_frame::Frame;

use crate::error::{Result, SessionError};

/// One-shot slot a waiting caller blocks on.
pub(crate) type Completion = Sender<Result<Bytes>>;

pub(crate) struct PendingRequest {
    pub(crate) command: u32,
    pub(crate) deadline: Instant,
    pub(crate) timeout: Duration,
    completion: Completion,
}

/// Sequence allocator plus the table of requests awaiting replies.
pub(crate) struct PendingTable {
    next_sequence: u16,
    entries: HashMap<u16, PendingRequest>,
}

impl PendingTable {
    pub(crate) fn new() -> Self {
        Self {
            next_sequence: 0,
            entries: HashMap::new(),
        }
    }

    /// Record a request under a fresh sequence number.
    ///
    /// Numbers wrap at `u16::MAX` and skip any still outstanding. Returns
    /// `None` only when every sequence number is in use.
    pub(crate) fn register(
        &mut self,
        command: u32,
        timeout: Duration,
        completion: Completion,
    ) -> Option<u16> {
        let deadline = Instant::now() + timeout;
        if self.entries.len() > u16::MAX as usize {
            return None;
        }
        let mut sequence = self.next_sequence;
        while self.entries.contains_key(&sequence) {
            sequence = sequence.wrapping_add(1);
        }
        self.next_sequence = sequence.wrapping_add(1);
        self.entries.insert(
            sequence,
            PendingRequest {
                command,
                deadline,
                timeout,
                completion,
            },
        );
        Some(sequence)
    }

    /// Hand a reply to its waiter.
    ///
    /// A frame matches only if both sequence and command agree with an
    /// outstanding request; anything else is given back to the caller.
    pub(crate) fn complete(&mut self, frame: Frame) -> Option<Frame> {
        match self.entries.get(&frame.sequence) {
            Some(entry) if entry.command == frame.command => {}
            _ => return Some(frame),
        }
        if let Some(entry) = self.entries.remove(&frame.sequence) {
            // The waiter may have given up between its deadline and now.
            let _ = entry.completion.send(Ok(frame.payload));
        }
        None
    }

    pub(crate) fn remove(&mut self, sequence: u16) -> Option<PendingRequest> {
        self.entries.remove(&sequence)
    }

    /// Fail every outstanding request with [`SessionError::Disconnected`].
    pub(crate) fn drain_disconnected(&mut self) -> usize {
        let count = self.entries.len();
        for (_, entry) in self.entries.drain() {
            let _ = entry.completion.send(Err(SessionError::Disconnected));
        }
        count
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Fail every request whose deadline has passed with a timeout.
    pub(crate) fn expire(&mut self, now: Instant) -> usize {
        let overdue: Vec<u16> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.deadline <= now)
            .map(|(sequence, _)| *sequence)
            .collect();
        for sequence in &overdue {
            if let Some(entry) = self.entries.remove(sequence) {
                let _ = entry.completion.send(Err(SessionError::Timeout {
                    command: entry.command,
                    sequence: *sequence,
                    after: entry.timeout,
                }));
            }
        }
        overdue.len()
    }
}

#[cfg(test)]
mod tests {
    use crossbeam_channel::bounded;

    use super::*;

    fn slot() -> (Completion, crossbeam_channel::Receiver<Result<Bytes>>) {
        bounded(1)
    }

    #[test]
    fn sequence_numbers_increase_and_wrap() {
        let mut table = PendingTable::new();
        table.next_sequence = u16::MAX;
        let timeout = Duration::from_secs(60);

        let (tx, _rx) = slot();
        assert_eq!(table.register(1, timeout, tx), Some(u16::MAX));
        let (tx, _rx2) = slot();
        assert_eq!(table.register(1, timeout, tx), Some(0));
    }

    #[test]
    fn outstanding_numbers_are_skipped() {
        let mut table = PendingTable::new();
        let timeout = Duration::from_secs(60);
        let mut keep = Vec::new();
        for _ in 0..3 {
            let (tx, rx) = slot();
            keep.push(rx);
            table.register(1, timeout, tx);
        }
        // Wrap around onto the still-pending 0..=2.
        table.next_sequence = 0;
        let (tx, _rx) = slot();
        assert_eq!(table.register(1, timeout, tx), Some(3));
    }

    #[test]
    fn reply_needs_matching_command() {
        let mut table = PendingTable::new();
        let (tx, rx) = slot();
        let seq = table.register(0x20, Duration::from_secs(60), tx).unwrap();

        let stray = Frame::new(0x21, seq, &b"x"[..]);
        assert_eq!(table.complete(stray.clone()), Some(stray));
        assert_eq!(table.len(), 1);

        assert_eq!(table.complete(Frame::new(0x20, seq, &b"ok"[..])), None);
        assert_eq!(rx.try_recv().unwrap().unwrap().as_ref(), b"ok");
        assert_eq!(table.len(), 0);
    }

    #[test]
    fn drain_fails_everyone() {
        let mut table = PendingTable::new();
        let receivers: Vec<_> = (0..4)
            .map(|_| {
                let (tx, rx) = slot();
                table.register(7, Duration::from_secs(60), tx);
                rx
            })
            .collect();

        assert_eq!(table.drain_disconnected(), 4);
        for rx in receivers {
            assert!(matches!(rx.try_recv().unwrap(), Err(SessionError::Disconnected)));
        }
    }

    #[test]
    fn expire_times_out_overdue_only() {
        let mut table = PendingTable::new();
        let (tx, expired) = slot();
        let old = table.register(1, Duration::ZERO, tx).unwrap();
        let (tx, live) = slot();
        table.register(1, Duration::from_secs(60), tx);

        assert_eq!(table.expire(Instant::now()), 1);
        assert_eq!(table.len(), 1);
        match expired.try_recv().unwrap() {
            Err(SessionError::Timeout { sequence, .. }) => assert_eq!(sequence, old),
            other => panic!("expected timeout, got {other:?}"),
        }
        assert!(live.try_recv().is_err());
    }
}
