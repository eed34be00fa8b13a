//! Bring-up and reconfiguration protocol for an ATK-LORA-01-class module
//! (`spec.md` §4.F).
//!
//! The literal AT command strings and their argument encoding are taken
//! from `original_source/LoRa_Plat/Driver/lora_driver_config.c`; the
//! overall bring-up choreography (mode pin settle, handshake, AUX pulse
//! wait, UART re-init) is taken from
//! `original_source/LoRa_Plat/Layer2_Module/mod_lora.c`.

use crate::at::{AtEngine, AtStatus};
use crate::config::at::*;
use crate::config::Config;
use crate::osal::{Clock, Delay};
use crate::port::{Mode, Port};
use heapless::String;

const CMD_LEN: usize = 32;

fn cmd_at() -> String<CMD_LEN> {
    let mut s = String::new();
    let _ = core::fmt::write(&mut s, format_args!("AT\r\n"));
    s
}

fn cmd_addr(address: u16) -> String<CMD_LEN> {
    let mut s = String::new();
    let _ = core::fmt::write(
        &mut s,
        format_args!(
            "AT+ADDR={:02X},{:02X}\r\n",
            (address >> 8) as u8,
            address as u8
        ),
    );
    s
}

fn cmd_rate(channel: u8, air_rate: u8) -> String<CMD_LEN> {
    let mut s = String::new();
    let _ = core::fmt::write(&mut s, format_args!("AT+WLRATE={},{}\r\n", channel, air_rate));
    s
}

fn cmd_power(power: u8) -> String<CMD_LEN> {
    let mut s = String::new();
    let _ = core::fmt::write(&mut s, format_args!("AT+TPOWER={}\r\n", power));
    s
}

fn cmd_mode(tmode: u8) -> String<CMD_LEN> {
    let mut s = String::new();
    let _ = core::fmt::write(&mut s, format_args!("AT+TMODE={}\r\n", tmode));
    s
}

fn cmd_uart(baud_code: u8) -> String<CMD_LEN> {
    let mut s = String::new();
    let _ = core::fmt::write(&mut s, format_args!("AT+UART={},0\r\n", baud_code));
    s
}

/// Maps a concrete baud rate to the `AT+UART=` code, per `spec.md` §6.
pub fn baud_to_code(baud: u32) -> Option<u8> {
    BAUD_TABLE
        .iter()
        .position(|&b| b == baud)
        .map(|i| i as u8)
}

/// Drives a [`Port`] through the radio's bring-up sequence and exposes the
/// thin `async_send`/`read`/`is_busy` delegations the Manager uses during
/// steady-state operation.
pub struct Driver {
    at: AtEngine,
    target_baud: u32,
}

impl Driver {
    pub fn new(target_baud: u32) -> Self {
        Driver {
            at: AtEngine::new(),
            target_baud,
        }
    }

    /// Ten-step bring-up: config-mode baud, mode pin, handshake, parameter
    /// programming, AUX pulse wait, and target-baud re-init.
    ///
    /// Returns `true` on overall success. On handshake failure the UART is
    /// reverted to the target baud and `false` is returned without
    /// attempting to program any parameter.
    pub fn init<P: Port, C: Clock, D: Delay>(
        &mut self,
        port: &mut P,
        clock: &C,
        delay: &mut D,
        cfg: &Config,
    ) -> bool {
        // 1. Bring up Port at the device's hard-coded config-mode baud.
        port.reinit_uart(CONFIG_MODE_BAUD);
        // 2. Assert mode-pin = config and wait >= 600 ms.
        port.set_mode(Mode::Config);
        delay.delay_ms(MODE_SETTLE_MS);

        // 3. Three-attempt AT/OK handshake.
        let mut handshake_ok = false;
        for _ in 0..HANDSHAKE_ATTEMPTS {
            let status = self.at.execute(
                port,
                clock,
                delay,
                cmd_at().as_str(),
                "OK",
                HANDSHAKE_TIMEOUT_MS,
            );
            if status == AtStatus::Ok {
                handshake_ok = true;
                break;
            }
        }
        // 4. On failure, revert UART to target baud and return false.
        if !handshake_ok {
            port.reinit_uart(self.target_baud);
            log::warn!("lora driver: AT handshake failed, aborting init");
            return false;
        }

        // 5. Program address, rate, power, mode, target UART baud.
        let Some(baud_code) = baud_to_code(self.target_baud) else {
            log::error!("lora driver: unsupported target baud {}", self.target_baud);
            port.reinit_uart(self.target_baud);
            return false;
        };
        let steps: [String<CMD_LEN>; 5] = [
            cmd_addr(cfg.address),
            cmd_rate(cfg.channel, cfg.air_rate),
            cmd_power(cfg.power),
            cmd_mode(cfg.tmode),
            cmd_uart(baud_code),
        ];
        for step in &steps {
            let status = self
                .at
                .execute(port, clock, delay, step.as_str(), "OK", PARAM_TIMEOUT_MS);
            if status != AtStatus::Ok {
                port.reinit_uart(self.target_baud);
                log::warn!("lora driver: parameter programming failed");
                return false;
            }
        }

        // 6. Deassert mode-pin.
        port.set_mode(Mode::Transparent);

        // 7. Wait for AUX to pulse (busy then idle) up to 2s combined.
        let deadline = clock.now_ms().wrapping_add(AUX_PULSE_TIMEOUT_MS);
        let mut saw_busy = false;
        loop {
            if port.get_aux() {
                saw_busy = true;
            } else if saw_busy {
                break;
            }
            if crate::osal::deadline_elapsed(clock.now_ms(), deadline) {
                break;
            }
            delay.delay_ms(1);
        }

        // 8. Re-init UART to the target baud.
        port.reinit_uart(self.target_baud);

        // 9. Clear RX and sync busy state.
        port.clear_rx();

        // 10. Return overall success.
        true
    }

    /// Refuses when AUX is busy or TX is already in flight, else delegates
    /// to `Port::write`.
    pub fn async_send<P: Port>(&self, port: &mut P, data: &[u8]) -> bool {
        if port.get_aux() || port.is_tx_busy() {
            return false;
        }
        port.write(data) == data.len()
    }

    pub fn read<P: Port>(&self, port: &mut P, buf: &mut [u8]) -> usize {
        port.read(buf)
    }

    pub fn is_busy<P: Port>(&self, port: &P) -> bool {
        port.get_aux() || port.is_tx_busy()
    }
}
