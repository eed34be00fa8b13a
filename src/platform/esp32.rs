//! ESP32-S3 platform adapter: a UART-backed [`Port`] plus the mode pin and
//! AUX busy line, and the OSAL primitives the core crate needs.
//!
//! Peripheral setup (GPIO `Input`/`Output` configuration) generalized from
//! SPI SX1262 wiring to the UART+two-GPIO wiring an ATK-LORA-01-class
//! module uses. The ring buffer behind `read` plays the role the DMA circular
//! buffer plays in `original_source/LoRa_Plat/1_Port/lora_port.c`: bytes
//! arriving on the UART RX interrupt are pushed in, and `Port::read`
//! drains them without blocking.

use crate::osal::{Clock, CriticalSection, Delay, Entropy};
use crate::port::{Mode, Port};
use crate::ring_buffer::RingBuffer;
use esp_hal::gpio::{Input, Output};
use esp_hal::uart::Uart;

const RX_RING_CAPACITY: usize = 1024;

/// UART-backed `Port` for an ATK-LORA-01-class module wired to a
/// mode-select GPIO and an AUX busy GPIO.
pub struct Esp32Port<'d> {
    uart: Uart<'d, esp_hal::Blocking>,
    mode_pin: Output<'d>,
    aux_pin: Input<'d>,
    rx_ring: RingBuffer<RX_RING_CAPACITY>,
    tx_busy: bool,
}

impl<'d> Esp32Port<'d> {
    pub fn new(uart: Uart<'d, esp_hal::Blocking>, mode_pin: Output<'d>, aux_pin: Input<'d>) -> Self {
        Esp32Port {
            uart,
            mode_pin,
            aux_pin,
            rx_ring: RingBuffer::new(),
            tx_busy: false,
        }
    }

    /// Drains whatever the UART's RX FIFO has available into the ring
    /// buffer. A platform binary calls this once per main-loop iteration,
    /// ahead of `Service::tick`, standing in for the hardware DMA cursor
    /// advance described in `spec.md` §4.D.
    pub fn poll_rx(&mut self) {
        let mut scratch = [0u8; 64];
        loop {
            match self.uart.read_buffered(&mut scratch) {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    self.rx_ring.push(&scratch[..n]);
                }
            }
        }
    }
}

impl<'d> Port for Esp32Port<'d> {
    fn read(&mut self, buf: &mut [u8]) -> usize {
        self.rx_ring.pop(buf)
    }

    fn write(&mut self, data: &[u8]) -> usize {
        if self.tx_busy {
            return 0;
        }
        match self.uart.write(data) {
            Ok(n) => {
                self.tx_busy = true;
                n
            }
            Err(_) => 0,
        }
    }

    fn is_tx_busy(&self) -> bool {
        self.tx_busy
    }

    fn get_aux(&self) -> bool {
        self.aux_pin.is_high()
    }

    fn set_mode(&mut self, mode: Mode) {
        match mode {
            Mode::Config => self.mode_pin.set_high(),
            Mode::Transparent => self.mode_pin.set_low(),
        }
    }

    fn reinit_uart(&mut self, baud: u32) {
        let _ = self.uart.apply_config(
            &esp_hal::uart::Config::default().with_baudrate(baud).with_rx_fifo_full_threshold(1),
        );
    }

    fn clear_rx(&mut self) {
        self.rx_ring.clear();
    }

    fn reset(&mut self) {
        // ATK-LORA-01 has no dedicated reset line on this wiring; no-op,
        // matching `original_source`'s `Port_SetRST` stub.
    }
}

/// Marks the TX-complete event. Call from the UART TX-done interrupt
/// handler.
pub fn on_tx_complete(port: &mut Esp32Port) {
    port.tx_busy = false;
}

/// Monotonic millisecond clock backed by `esp_hal`'s system timer.
pub struct Esp32Clock;

impl Clock for Esp32Clock {
    fn now_ms(&self) -> u32 {
        (esp_hal::time::Instant::now().duration_since_epoch().as_millis()) as u32
    }
}

/// Busy-wait delay via `esp_hal`'s blocking delay driver.
pub struct Esp32Delay(pub esp_hal::delay::Delay);

impl Delay for Esp32Delay {
    fn delay_ms(&mut self, ms: u32) {
        self.0.delay_millis(ms);
    }
}

/// Single-core critical section: disables interrupts for the closure's
/// duration via `esp-hal`'s own interrupt-mask guard (no extra crate
/// needed on a single-core target).
pub struct Esp32CriticalSection;

impl CriticalSection for Esp32CriticalSection {
    fn with<R>(&self, f: impl FnOnce() -> R) -> R {
        let guard = esp_hal::interrupt::disable_all();
        let result = f();
        esp_hal::interrupt::restore(guard);
        result
    }
}

/// ADC-noise-derived entropy, falling back to `tick ^ 0x5A5A_5A5A` when the
/// sample reads zero, matching
/// `original_source/LoRa_Plat/1_Port/lora_port.c`'s `Port_GetRandomSeed`.
pub struct Esp32Entropy<'d> {
    adc_noise_pin: esp_hal::analog::adc::AdcPin<'d>,
    clock: Esp32Clock,
}

impl<'d> Esp32Entropy<'d> {
    pub fn new(adc_noise_pin: esp_hal::analog::adc::AdcPin<'d>) -> Self {
        Esp32Entropy {
            adc_noise_pin,
            clock: Esp32Clock,
        }
    }
}

impl<'d> Entropy for Esp32Entropy<'d> {
    fn random_u32(&mut self) -> u32 {
        let sample = self.adc_noise_pin.read_sample() as u32;
        crate::osal::entropy_or_fallback(sample, self.clock.now_ms())
    }
}
