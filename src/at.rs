//! Blocking AT command engine (`spec.md` §4.E).
//!
//! Confined to `Driver::init` and explicit reconfiguration; never called
//! from the steady-state `tick()` path (`spec.md` §5, §9).

use crate::config::at::{SCRATCH_LEN, SETTLE_MS, TX_BUSY_WAIT_MS};
use crate::osal::{Clock, Delay};
use crate::port::Port;
use heapless::String;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AtStatus {
    Ok,
    Timeout,
    Error,
}

/// Executes a single blocking AT transaction. The scratch buffer is
/// reused across calls (a single `AtEngine` instance lives for the
/// lifetime of `Driver::init`).
pub struct AtEngine {
    scratch: String<SCRATCH_LEN>,
}

impl AtEngine {
    pub fn new() -> Self {
        AtEngine {
            scratch: String::new(),
        }
    }

    /// Clears RX, waits up to 100 ms for TX to stop being busy, transmits
    /// `cmd` verbatim, then polls byte-by-byte for `expected` to appear in
    /// the response, settling 20 ms once it does.
    pub fn execute<P: Port, C: Clock, D: Delay>(
        &mut self,
        port: &mut P,
        clock: &C,
        delay: &mut D,
        cmd: &str,
        expected: &str,
        timeout_ms: u32,
    ) -> AtStatus {
        port.clear_rx();
        self.scratch.clear();

        let busy_deadline = clock.now_ms().wrapping_add(TX_BUSY_WAIT_MS);
        while port.is_tx_busy() {
            if crate::osal::deadline_elapsed(clock.now_ms(), busy_deadline) {
                return AtStatus::Error;
            }
            delay.delay_ms(1);
        }

        if port.write(cmd.as_bytes()) != cmd.len() {
            return AtStatus::Error;
        }

        let deadline = clock.now_ms().wrapping_add(timeout_ms);
        let mut byte = [0u8; 1];
        loop {
            if port.read(&mut byte) == 1 {
                if self.scratch.push(byte[0] as char).is_err() {
                    // Scratch is full; drop the oldest half to keep scanning.
                    let tail: String<SCRATCH_LEN> = self
                        .scratch
                        .chars()
                        .skip(SCRATCH_LEN / 2)
                        .collect();
                    self.scratch = tail;
                }
                if self.scratch.as_str().contains(expected) {
                    delay.delay_ms(SETTLE_MS);
                    return AtStatus::Ok;
                }
            }
            if crate::osal::deadline_elapsed(clock.now_ms(), deadline) {
                return AtStatus::Timeout;
            }
        }
    }
}

impl Default for AtEngine {
    fn default() -> Self {
        Self::new()
    }
}
