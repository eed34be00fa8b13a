//! Non-blocking UART transport with a DMA-style RX ring and a single
//! in-flight TX, plus the radio's AUX busy line and mode pin
//! (`spec.md` §4.D).
//!
//! Every operation is non-blocking and returns partial counts rather than
//! erroring; a write attempted while busy returns `0`.

/// Radio bring-up mode selected by the mode pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// AT command configuration mode.
    Config,
    /// Transparent data mode.
    Transparent,
}

pub trait Port {
    /// Drains up to `buf.len()` newly arrived bytes. Returns the count
    /// read; `0` means nothing new is available.
    fn read(&mut self, buf: &mut [u8]) -> usize;

    /// Copies `data` into the TX buffer and starts a one-shot transfer.
    /// Returns `0` if TX is currently busy or `data` exceeds the device's
    /// TX buffer, otherwise returns `data.len()`.
    fn write(&mut self, data: &[u8]) -> usize;

    /// `true` until the in-flight TX transfer completes.
    fn is_tx_busy(&self) -> bool;

    /// The radio's AUX busy line: `true` means the radio cannot transmit.
    fn get_aux(&self) -> bool;

    /// Selects AT-configuration vs. transparent-data mode.
    fn set_mode(&mut self, mode: Mode);

    /// Re-initializes the UART at a new baud without losing the RX ring.
    fn reinit_uart(&mut self, baud: u32);

    /// Fast-forwards the read cursor to the write cursor, discarding
    /// whatever is currently queued for read.
    fn clear_rx(&mut self);

    /// Pulses the reset line. A no-op on modules without one.
    fn reset(&mut self) {}
}
