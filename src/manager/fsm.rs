//! The Manager's TX/RX state machine: framing, addressing, stop-and-wait
//! ARQ, and receive-side deduplication (`spec.md` §4.H).
//!
//! Grounded on the stop-and-wait retry shape in
//! `examples/mapfumo-wk6-async-gateway/node1-firmware/src/main.rs`'s
//! `TxState`, adapted from RTIC timer interrupts to this Stack's
//! synchronous `tick()` model.

use crate::config::timing::*;
use crate::config::wire::{BROADCAST_ADDR, MTU};
use crate::driver::Driver;
use crate::error::Error;
use crate::manager::buffers::{DedupTable, RxQueue, RxRecord, TxJob, TxQueue};
use crate::osal::{deadline_elapsed, Clock};
use crate::port::Port;
use crate::protocol::{pack, Frame, FrameKind, Scanner};
use heapless::Vec;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Idle,
    TxSending,
    TxWaitAck,
    RxDispatch,
}

/// Why a TX job was given up on (`spec.md` §4.H/§8's `TX_FAIL(seq, reason)`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxFailReason {
    /// Retries exhausted without an ACK.
    NotAcked,
}

/// Outcome of a `tick()` the Service surfaces to its caller as an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsmEvent {
    TxOk { seq: u16 },
    TxFail { seq: u16, reason: TxFailReason },
    RxOverflow,
}

/// Result of [`Fsm::send`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Ok(u16),
    Busy,
    TooLarge,
    QueueFull,
}

const EVENT_CAPACITY: usize = 4;

/// The link-layer state machine. Owns the TX/RX queues, the dedup table,
/// and the sequence counter; drives a [`Driver`]/[`Port`] pair each tick.
pub struct Fsm {
    state: State,
    local_addr: u16,
    seq_counter: u16,
    tx_queue: TxQueue,
    rx_queue: RxQueue,
    dedup: DedupTable,
    scanner: Scanner,
    in_flight: Option<TxJob>,
    pending_ack: Option<(u16, u16)>, // (dst, seq) to ACK before any queued TX
}

impl Fsm {
    pub fn new(local_addr: u16) -> Self {
        Fsm {
            state: State::Idle,
            local_addr,
            seq_counter: 0,
            tx_queue: TxQueue::new(),
            rx_queue: RxQueue::new(),
            dedup: DedupTable::new(DEDUP_TTL_MS),
            scanner: Scanner::new(),
            in_flight: None,
            pending_ack: None,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Resets to `IDLE` with all queues cleared (`spec.md` §4.H Terminal
    /// states).
    pub fn reset(&mut self) {
        self.state = State::Idle;
        self.tx_queue.clear();
        self.rx_queue.clear();
        self.dedup.clear();
        self.in_flight = None;
        self.pending_ack = None;
    }

    /// Enqueues a new outbound payload. Broadcast destinations are sent
    /// without awaiting an ACK.
    pub fn send(&mut self, dst: u16, data: &[u8]) -> SendOutcome {
        if data.len() > MTU {
            return SendOutcome::TooLarge;
        }
        let mut payload: Vec<u8, MTU> = Vec::new();
        if payload.extend_from_slice(data).is_err() {
            return SendOutcome::TooLarge;
        }
        let seq = self.seq_counter;
        self.seq_counter = self.seq_counter.wrapping_add(1);
        let job = TxJob {
            dst,
            seq,
            payload,
            retries: 0,
            deadline_ms: 0,
            awaiting_ack: dst != BROADCAST_ADDR,
        };
        match self.tx_queue.push(job) {
            Ok(()) => SendOutcome::Ok(seq),
            Err(_) => SendOutcome::QueueFull,
        }
    }

    /// Pops the next delivered payload, if any.
    pub fn receive(&mut self) -> Option<RxRecord> {
        self.rx_queue.pop_front()
    }

    /// Drains newly arrived bytes from `port` through the frame scanner
    /// and the TX scheduler. Wait-free: bounded by bytes drained, one
    /// pending-ACK check, and one retry-deadline check.
    pub fn tick<P: Port>(
        &mut self,
        port: &mut P,
        driver: &Driver,
        now_ms: u32,
        events: &mut Vec<FsmEvent, EVENT_CAPACITY>,
    ) {
        self.drain_ingress(port, driver, now_ms, events);
        self.drive_egress(port, driver, now_ms, events);
    }

    fn drain_ingress<P: Port>(
        &mut self,
        port: &mut P,
        driver: &Driver,
        now_ms: u32,
        events: &mut Vec<FsmEvent, EVENT_CAPACITY>,
    ) {
        let mut byte = [0u8; 1];
        loop {
            let n = driver.read(port, &mut byte);
            if n == 0 {
                break;
            }
            if let Some(frame) = self.scanner.push(byte[0]) {
                self.handle_frame(frame, now_ms, events);
            }
        }
    }

    fn handle_frame(
        &mut self,
        frame: Frame,
        now_ms: u32,
        events: &mut Vec<FsmEvent, EVENT_CAPACITY>,
    ) {
        if frame.dst != self.local_addr && frame.dst != BROADCAST_ADDR {
            return; // not for us
        }
        match frame.kind {
            FrameKind::Ack => {
                if self.state == State::TxWaitAck {
                    if let Some(job) = &self.in_flight {
                        if job.seq == frame.seq {
                            let _ = events.push(FsmEvent::TxOk { seq: frame.seq });
                            self.in_flight = None;
                            self.state = State::Idle;
                        }
                    }
                }
            }
            FrameKind::Nak => {
                // Optional per spec; treated as a protocol-level no-op
                // here since no NAK-driven behavior is specified.
            }
            FrameKind::Data => {
                if self.dedup.contains(frame.src, frame.seq, now_ms) {
                    // Re-ACK but do not redeliver.
                    self.pending_ack = Some((frame.src, frame.seq));
                    return;
                }
                self.dedup.insert(frame.src, frame.seq, now_ms);
                let overflowed = self.rx_queue.push(RxRecord {
                    src: frame.src,
                    seq: frame.seq,
                    payload: frame.payload,
                });
                if overflowed {
                    let _ = events.push(FsmEvent::RxOverflow);
                }
                self.pending_ack = Some((frame.src, frame.seq));
            }
        }
    }

    fn drive_egress<P: Port>(
        &mut self,
        port: &mut P,
        driver: &Driver,
        now_ms: u32,
        events: &mut Vec<FsmEvent, EVENT_CAPACITY>,
    ) {
        // ACK-before-data: a pending ACK is checked before the normal queue.
        if let Some((dst, seq)) = self.pending_ack {
            if let Some(bytes) = pack(FrameKind::Ack, self.local_addr, dst, seq, &[]) {
                if driver.async_send(port, &bytes) {
                    self.pending_ack = None;
                }
            }
            return;
        }

        match self.state {
            State::Idle => {
                if let Some(job) = self.tx_queue.pop_front() {
                    self.start_send(port, driver, job, now_ms);
                }
            }
            State::TxWaitAck => {
                self.check_retry(port, driver, now_ms, events);
            }
            State::TxSending | State::RxDispatch => {
                // Transient states collapse back to Idle the same tick
                // they are entered in this synchronous model.
                self.state = State::Idle;
            }
        }
    }

    fn start_send<P: Port>(&mut self, port: &mut P, driver: &Driver, job: TxJob, now_ms: u32) {
        self.state = State::TxSending;
        let Some(bytes) = pack(FrameKind::Data, self.local_addr, job.dst, job.seq, &job.payload)
        else {
            self.state = State::Idle;
            return;
        };
        if !driver.async_send(port, &bytes) {
            // Busy: put the job back at the head and retry next tick.
            let _ = self.tx_queue.push_front(job);
            self.state = State::Idle;
            return;
        }
        if !job.awaiting_ack {
            self.state = State::Idle;
            return;
        }
        let mut job = job;
        job.deadline_ms = now_ms.wrapping_add(T_ACK_MS);
        self.in_flight = Some(job);
        self.state = State::TxWaitAck;
    }

    fn check_retry<P: Port>(
        &mut self,
        port: &mut P,
        driver: &Driver,
        now_ms: u32,
        events: &mut Vec<FsmEvent, EVENT_CAPACITY>,
    ) {
        let Some(job) = self.in_flight.clone() else {
            self.state = State::Idle;
            return;
        };
        if !deadline_elapsed(now_ms, job.deadline_ms) {
            return;
        }
        // `retries` counts retransmissions sent so far (the initial send
        // does not increment it), so giving up at `MAX_RETRIES - 1` caps
        // the total on-air transmissions (initial + retries) at
        // `MAX_RETRIES`, matching spec.md §8 Scenario 3 exactly.
        if job.retries >= MAX_RETRIES - 1 {
            let _ = events.push(FsmEvent::TxFail {
                seq: job.seq,
                reason: TxFailReason::NotAcked,
            });
            self.in_flight = None;
            self.state = State::Idle;
            return;
        }
        let Some(bytes) = pack(FrameKind::Data, self.local_addr, job.dst, job.seq, &job.payload)
        else {
            self.in_flight = None;
            self.state = State::Idle;
            return;
        };
        if driver.async_send(port, &bytes) {
            let mut job = job;
            job.retries += 1;
            job.deadline_ms = now_ms.wrapping_add(T_ACK_MS);
            self.in_flight = Some(job);
        }
        // else: still busy, retry is attempted again next tick without
        // consuming a retry count.
    }

    /// Surfaces `Error::Busy`/`Error::QueueFull` synchronously; used by
    /// `Service::send` to translate [`SendOutcome`] into the crate error
    /// type where a `Result` API is more idiomatic than a bespoke enum.
    pub fn send_result(&mut self, dst: u16, data: &[u8]) -> Result<u16, Error> {
        match self.send(dst, data) {
            SendOutcome::Ok(seq) => Ok(seq),
            SendOutcome::Busy => Err(Error::Busy),
            SendOutcome::TooLarge => Err(Error::InvalidArgument),
            SendOutcome::QueueFull => Err(Error::QueueFull),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::mock::MockPort;

    fn ack_for(local: u16, peer: u16, seq: u16) -> heapless::Vec<u8, { MTU + 16 }> {
        pack(FrameKind::Ack, peer, local, seq, &[]).unwrap()
    }

    #[test]
    fn round_trip_send_produces_single_on_air_frame() {
        let mut fsm = Fsm::new(0x0001);
        let driver = Driver::new(115_200);
        let mut port = MockPort::new();
        assert_eq!(fsm.send(0x0002, b"ping"), SendOutcome::Ok(0));
        let mut events = Vec::new();
        fsm.tick(&mut port, &driver, 0, &mut events);
        assert_eq!(fsm.state(), State::TxWaitAck);
        assert_eq!(port.sent_frames().len(), 1);
    }

    #[test]
    fn ack_clears_in_flight_job_and_emits_tx_ok() {
        let mut fsm = Fsm::new(0x0001);
        let driver = Driver::new(115_200);
        let mut port = MockPort::new();
        fsm.send(0x0002, b"ping");
        let mut events = Vec::new();
        fsm.tick(&mut port, &driver, 0, &mut events);
        port.complete_tx();
        port.inject_rx(&ack_for(0x0001, 0x0002, 0));
        let mut events = Vec::new();
        fsm.tick(&mut port, &driver, 10, &mut events);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0], FsmEvent::TxOk { seq: 0 });
        assert_eq!(fsm.state(), State::Idle);
    }

    #[test]
    fn retries_up_to_max_then_fails() {
        // spec.md §8 Scenario 3: exactly MAX_RETRIES on-air transmissions
        // total (1 initial + MAX_RETRIES-1 retransmissions), at t=0, 500,
        // 1000 ms, then TX_FAIL on the 3rd missed deadline at t=1500 ms.
        let mut fsm = Fsm::new(0x0001);
        let driver = Driver::new(115_200);
        let mut port = MockPort::new();
        fsm.send(0x0002, b"ping");
        let mut t = 0u32;
        let mut events = Vec::new();
        fsm.tick(&mut port, &driver, t, &mut events); // initial send
        for _ in 0..(MAX_RETRIES - 1) {
            port.complete_tx();
            t += T_ACK_MS;
            let mut ev = Vec::new();
            fsm.tick(&mut port, &driver, t, &mut ev);
        }
        port.complete_tx();
        t += T_ACK_MS;
        let mut ev: Vec<FsmEvent, EVENT_CAPACITY> = Vec::new();
        fsm.tick(&mut port, &driver, t, &mut ev);
        assert_eq!(ev.len(), 1);
        assert_eq!(
            ev[0],
            FsmEvent::TxFail {
                seq: 0,
                reason: TxFailReason::NotAcked
            }
        );
        assert_eq!(t, 1_500);
        // exactly MAX_RETRIES total on-air transmissions, no 4th retry.
        assert_eq!(port.sent_frames().len() as u8, MAX_RETRIES);
    }

    #[test]
    fn duplicate_data_frame_delivered_once_but_acked_each_time() {
        let mut fsm = Fsm::new(0x0002);
        let driver = Driver::new(115_200);
        let mut port = MockPort::new();
        let frame = pack(FrameKind::Data, 0x0001, 0x0002, 0, b"ping").unwrap();
        port.inject_rx(&frame);
        let mut events = Vec::new();
        fsm.tick(&mut port, &driver, 0, &mut events);
        assert!(fsm.receive().is_some());
        assert!(fsm.receive().is_none());
        port.complete_tx(); // ACK for the first delivery went out
        port.inject_rx(&frame);
        let mut events = Vec::new();
        fsm.tick(&mut port, &driver, 1, &mut events);
        assert!(fsm.receive().is_none(), "duplicate must not be redelivered");
        assert_eq!(port.sent_frames().len(), 2, "both deliveries are ACKed");
    }

    #[test]
    fn dropped_frame_to_other_address_is_ignored() {
        let mut fsm = Fsm::new(0x0002);
        let driver = Driver::new(115_200);
        let mut port = MockPort::new();
        let frame = pack(FrameKind::Data, 0x0001, 0x0009, 0, b"ping").unwrap();
        port.inject_rx(&frame);
        let mut events = Vec::new();
        fsm.tick(&mut port, &driver, 0, &mut events);
        assert!(fsm.receive().is_none());
    }
}
