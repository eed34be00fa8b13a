//! Bounded TX job queue, inbound payload queue, and the dedup table
//! (`spec.md` §3 Dedup record, §4.I).

use crate::config::capacity::{DEDUP_TABLE, RX_QUEUE, TX_QUEUE};
use crate::config::wire::MTU;
use heapless::{Deque, Vec};

/// An outbound job awaiting transmission or ACK.
#[derive(Debug, Clone)]
pub struct TxJob {
    pub dst: u16,
    pub seq: u16,
    pub payload: Vec<u8, MTU>,
    pub retries: u8,
    pub deadline_ms: u32,
    pub awaiting_ack: bool,
}

/// A payload delivered to the application, with its origin.
#[derive(Debug, Clone)]
pub struct RxRecord {
    pub src: u16,
    pub seq: u16,
    pub payload: Vec<u8, MTU>,
}

/// Bounded FIFO of outbound jobs. Overflow returns the job back to the
/// caller (surfaced as `QueueFull`).
pub struct TxQueue {
    jobs: Deque<TxJob, TX_QUEUE>,
}

impl TxQueue {
    pub fn new() -> Self {
        TxQueue { jobs: Deque::new() }
    }

    pub fn push(&mut self, job: TxJob) -> Result<(), TxJob> {
        self.jobs.push_back(job)
    }

    pub fn pop_front(&mut self) -> Option<TxJob> {
        self.jobs.pop_front()
    }

    pub fn push_front(&mut self, job: TxJob) -> Result<(), TxJob> {
        self.jobs.push_front(job)
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn clear(&mut self) {
        self.jobs.clear();
    }
}

impl Default for TxQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Bounded FIFO of delivered payloads. Drops the oldest entry on overflow
/// (see DESIGN.md for why oldest rather than newest).
pub struct RxQueue {
    records: Deque<RxRecord, RX_QUEUE>,
}

impl RxQueue {
    pub fn new() -> Self {
        RxQueue {
            records: Deque::new(),
        }
    }

    /// Enqueues `record`, dropping the oldest entry first if full. Returns
    /// `true` if an entry had to be dropped to make room.
    pub fn push(&mut self, record: RxRecord) -> bool {
        let overflowed = if self.records.is_full() {
            self.records.pop_front();
            true
        } else {
            false
        };
        let _ = self.records.push_back(record);
        overflowed
    }

    pub fn pop_front(&mut self) -> Option<RxRecord> {
        self.records.pop_front()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }
}

impl Default for RxQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy)]
struct DedupEntry {
    src: u16,
    seq: u16,
    first_seen_ms: u32,
}

/// Bounded most-recent-sequences-per-peer table with TTL-based expiry.
pub struct DedupTable {
    entries: Vec<DedupEntry, DEDUP_TABLE>,
    ttl_ms: u32,
}

impl DedupTable {
    pub fn new(ttl_ms: u32) -> Self {
        DedupTable {
            entries: Vec::new(),
            ttl_ms,
        }
    }

    /// Returns `true` if `(src, seq)` is a live (non-expired) duplicate.
    pub fn contains(&self, src: u16, seq: u16, now_ms: u32) -> bool {
        self.entries.iter().any(|e| {
            e.src == src && e.seq == seq && !crate::osal::deadline_elapsed(now_ms, e.first_seen_ms.wrapping_add(self.ttl_ms))
        })
    }

    /// Inserts `(src, seq)`, evicting the oldest record if the table is
    /// full.
    pub fn insert(&mut self, src: u16, seq: u16, now_ms: u32) {
        if self.entries.is_full() {
            // Evict the record with the smallest first_seen_ms (oldest).
            if let Some((idx, _)) = self
                .entries
                .iter()
                .enumerate()
                .min_by_key(|(_, e)| now_ms.wrapping_sub(e.first_seen_ms))
                .map(|(i, e)| (i, *e))
            {
                self.entries.swap_remove(idx);
            }
        }
        let _ = self.entries.push(DedupEntry {
            src,
            seq,
            first_seen_ms: now_ms,
        });
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
