//! Orchestration layer: config persistence, hot-apply, send/receive API,
//! command dispatch, and the self-healing monitor (`spec.md` §4.J).
//!
//! Collaborators are injected at construction, dispatch is a plain method,
//! tests run against mocks. Generalized from an async COBS command
//! protocol to this Stack's synchronous two-phase config edit and text
//! command line.

use crate::config::timing::{CONFIG_EDIT_TIMEOUT_MS, DRIVER_RETRY_BACKOFF_MS, T_STUCK_MS};
use crate::config::{Config, CONFIG_RECORD_LEN};
use crate::driver::Driver;
use crate::error::{Error, Result};
use crate::manager::{Fsm, FsmEvent, SendOutcome, TxFailReason};
use crate::osal::{deadline_elapsed, Clock, Delay};
use crate::port::Port;
use heapless::Vec;

/// Loads the persisted config record. Returns `None` if no valid record
/// is present (bad magic/CRC), in which case `Service::init` falls back to
/// `Config::default()` and rewrites the page.
pub trait ConfigLoader {
    fn load(&mut self) -> Option<[u8; CONFIG_RECORD_LEN]>;
}

/// Persists a config record.
pub trait ConfigSaver {
    fn save(&mut self, bytes: &[u8; CONFIG_RECORD_LEN]);
}

/// Events surfaced to the application (`spec.md` §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    TxOk { seq: u16 },
    TxFail { seq: u16, reason: TxFailReason },
    RxOverflow,
    DriverDown,
    DriverUp,
    ConfigCommitted,
}

struct PendingEdit {
    pending: Config,
    token_presented: u32,
    last_touched_ms: u32,
}

/// The top-level orchestration object a platform binary owns one of.
///
/// Generic over the concrete [`Port`], so Driver, Manager and Service are
/// all monomorphized against it with no vtable indirection, matching
/// `spec.md` §5's wait-free `tick()` requirement.
pub struct Service<P: Port> {
    driver: Driver,
    fsm: Fsm,
    current: Config,
    edit: Option<PendingEdit>,
    last_not_busy_ms: u32,
    driver_up: bool,
    next_retry_ms: u32,
    /// Events raised outside of `tick()` (config commit, on-demand
    /// factory reset) and drained into `tick()`'s output on the next call.
    pending_events: Vec<Event, EVENT_CAPACITY>,
    _port: core::marker::PhantomData<P>,
}

const EVENT_CAPACITY: usize = 8;

impl<P: Port> Service<P> {
    /// Loads config (falling back to defaults on a bad record), runs
    /// `Driver::init`, and returns the constructed Service plus whether
    /// the initial bring-up succeeded.
    pub fn init<L: ConfigLoader, S: ConfigSaver, C: Clock, D: Delay>(
        loader: &mut L,
        saver: &mut S,
        port: &mut P,
        clock: &C,
        delay: &mut D,
        target_baud: u32,
    ) -> (Self, bool) {
        let current = match loader.load().and_then(|b| Config::from_bytes(&b)) {
            Some(cfg) => cfg,
            None => {
                let defaults = Config::default();
                saver.save(&defaults.to_bytes());
                defaults
            }
        };
        let mut driver = Driver::new(target_baud);
        let ok = driver.init(port, clock, delay, &current);
        let fsm = Fsm::new(current.address);
        let now = clock.now_ms();
        let service = Service {
            driver,
            fsm,
            current,
            edit: None,
            last_not_busy_ms: now,
            driver_up: ok,
            next_retry_ms: now,
            pending_events: Vec::new(),
            _port: core::marker::PhantomData,
        };
        (service, ok)
    }

    pub fn get_config(&self) -> Config {
        self.current
    }

    /// Pops the next delivered payload, if any (`on_rx` in `spec.md`'s
    /// callback-oriented API, exposed here as a poll since this crate has
    /// no owned callback registration).
    pub fn receive(&mut self) -> Option<crate::manager::buffers::RxRecord> {
        self.fsm.receive()
    }

    /// Forwards to the Manager; translates [`SendOutcome`] into a
    /// `Result`.
    pub fn send(&mut self, dst: u16, data: &[u8]) -> Result<u16> {
        match self.fsm.send(dst, data) {
            SendOutcome::Ok(seq) => Ok(seq),
            SendOutcome::Busy => Err(Error::Busy),
            SendOutcome::TooLarge => Err(Error::InvalidArgument),
            SendOutcome::QueueFull => Err(Error::QueueFull),
        }
    }

    /// Pumps the Manager and the self-healing monitor. Collects surfaced
    /// events into `out`.
    pub fn tick<C: Clock, D: Delay>(
        &mut self,
        port: &mut P,
        clock: &C,
        delay: &mut D,
        out: &mut Vec<Event, EVENT_CAPACITY>,
    ) {
        let now = clock.now_ms();

        for ev in core::mem::take(&mut self.pending_events) {
            let _ = out.push(ev);
        }

        let mut fsm_events: Vec<FsmEvent, 4> = Vec::new();
        self.fsm.tick(port, &self.driver, now, &mut fsm_events);
        for ev in fsm_events {
            let mapped = match ev {
                FsmEvent::TxOk { seq } => Event::TxOk { seq },
                FsmEvent::TxFail { seq, reason } => Event::TxFail { seq, reason },
                FsmEvent::RxOverflow => Event::RxOverflow,
            };
            let _ = out.push(mapped);
        }

        if !self.driver.is_busy(port) {
            self.last_not_busy_ms = now;
        } else if deadline_elapsed(now, self.last_not_busy_ms.wrapping_add(T_STUCK_MS))
            && deadline_elapsed(now, self.next_retry_ms)
        {
            log::warn!("service: driver stuck, forcing re-init");
            let ok = self.driver.init(port, clock, delay, &self.current);
            self.next_retry_ms = now.wrapping_add(DRIVER_RETRY_BACKOFF_MS);
            if ok {
                self.last_not_busy_ms = now;
                if !self.driver_up {
                    let _ = out.push(Event::DriverUp);
                }
                self.driver_up = true;
            } else if self.driver_up {
                self.driver_up = false;
                let _ = out.push(Event::DriverDown);
            }
        }

        if let Some(edit) = &self.edit {
            if deadline_elapsed(now, edit.last_touched_ms.wrapping_add(CONFIG_EDIT_TIMEOUT_MS)) {
                self.edit = None;
            }
        }
    }

    /// Begins a two-phase config edit. The caller must present the
    /// currently stored token; mismatches are rejected without side
    /// effects.
    pub fn begin<C: Clock>(&mut self, token: u32, clock: &C) -> Result<()> {
        if token != self.current.token {
            return Err(Error::ConfigRejected);
        }
        self.edit = Some(PendingEdit {
            pending: self.current,
            token_presented: token,
            last_touched_ms: clock.now_ms(),
        });
        Ok(())
    }

    /// Mutates only the pending copy.
    pub fn set_field<C: Clock>(&mut self, field: ConfigField, value: u32, clock: &C) -> Result<()> {
        let now = clock.now_ms();
        let edit = self.edit.as_mut().ok_or(Error::ConfigRejected)?;
        match field {
            ConfigField::Channel => edit.pending.channel = value as u8,
            ConfigField::Power => edit.pending.power = value as u8,
            ConfigField::AirRate => edit.pending.air_rate = value as u8,
            ConfigField::Tmode => edit.pending.tmode = value as u8,
            ConfigField::Address => edit.pending.address = value as u16,
        }
        edit.last_touched_ms = now;
        Ok(())
    }

    /// Persists the pending config, re-applies it via `Driver::init`, and
    /// overwrites the current config.
    pub fn commit<S: ConfigSaver, C: Clock, D: Delay>(
        &mut self,
        saver: &mut S,
        port: &mut P,
        clock: &C,
        delay: &mut D,
    ) -> Result<()> {
        let edit = self.edit.take().ok_or(Error::ConfigRejected)?;
        // Constant-time-ish comparison: the token was already checked at
        // `begin`, but a stale edit whose stored token rotated underneath
        // it must still be rejected.
        if !tokens_match(edit.token_presented, self.current.token) {
            return Err(Error::ConfigRejected);
        }
        saver.save(&edit.pending.to_bytes());
        let ok = self.driver.init(port, clock, delay, &edit.pending);
        self.current = edit.pending;
        self.fsm = Fsm::new(self.current.address);
        if !ok {
            return Err(Error::HardwareError);
        }
        let _ = self.pending_events.push(Event::ConfigCommitted);
        Ok(())
    }

    /// Discards the pending edit.
    pub fn abort(&mut self) {
        self.edit = None;
    }

    /// Restores the built-in default config, persists it, and re-applies it.
    /// The caller is expected to reboot afterwards.
    pub fn factory_reset<S: ConfigSaver, C: Clock, D: Delay>(
        &mut self,
        saver: &mut S,
        port: &mut P,
        clock: &C,
        delay: &mut D,
    ) {
        let defaults = Config::default();
        saver.save(&defaults.to_bytes());
        let _ = self.driver.init(port, clock, delay, &defaults);
        self.current = defaults;
        self.edit = None;
        self.fsm = Fsm::new(self.current.address);
    }

    /// Parses and executes `CMD:<token>:<op>=<params>`. Returns `false`
    /// without side effects on an unknown op, missing token, or mismatched
    /// token.
    pub fn process_command_line<S: ConfigSaver, C: Clock, D: Delay>(
        &mut self,
        line: &str,
        saver: &mut S,
        port: &mut P,
        clock: &C,
        delay: &mut D,
    ) -> bool {
        let Some(rest) = line.strip_prefix("CMD:") else {
            return false;
        };
        let mut parts = rest.splitn(2, ':');
        let Some(token_str) = parts.next() else {
            return false;
        };
        let Some(op_str) = parts.next() else {
            return false;
        };
        let Ok(token) = parse_token(token_str) else {
            return false;
        };

        let mut op_parts = op_str.splitn(2, '=');
        let Some(op) = op_parts.next() else {
            return false;
        };

        if op == "commit" {
            return token == self.current.token && self.commit(saver, port, clock, delay).is_ok();
        }
        if op == "abort" {
            if token != self.current.token {
                return false;
            }
            self.abort();
            return true;
        }
        if op == "reset" {
            if token != self.current.token {
                return false;
            }
            self.factory_reset(saver, port, clock, delay);
            return true;
        }

        let Some(param_str) = op_parts.next() else {
            return false;
        };
        let Ok(value) = param_str.trim().parse::<u32>() else {
            return false;
        };
        let field = match op {
            "chan" => ConfigField::Channel,
            "pwr" => ConfigField::Power,
            "rate" => ConfigField::AirRate,
            "mode" => ConfigField::Tmode,
            _ => return false,
        };
        if self.edit.is_none() && self.begin(token, clock).is_err() {
            return false;
        }
        self.set_field(field, value, clock).is_ok()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigField {
    Address,
    Channel,
    Power,
    AirRate,
    Tmode,
}

fn tokens_match(a: u32, b: u32) -> bool {
    // Constant-time comparison over the bytes, per spec.md §4.J.
    let (ab, bb) = (a.to_be_bytes(), b.to_be_bytes());
    let mut diff = 0u8;
    for i in 0..4 {
        diff |= ab[i] ^ bb[i];
    }
    diff == 0
}

fn parse_token(s: &str) -> core::result::Result<u32, ()> {
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16).map_err(|_| ())
    } else {
        s.parse::<u32>().map_err(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::osal::mock::{FakeClock, FakeDelay};
    use crate::port::mock::MockPort;

    struct MemLoader(Option<[u8; CONFIG_RECORD_LEN]>);
    impl ConfigLoader for MemLoader {
        fn load(&mut self) -> Option<[u8; CONFIG_RECORD_LEN]> {
            self.0
        }
    }

    struct MemSaver(Vec<[u8; CONFIG_RECORD_LEN], 4>);
    impl ConfigSaver for MemSaver {
        fn save(&mut self, bytes: &[u8; CONFIG_RECORD_LEN]) {
            let _ = self.0.push(*bytes);
        }
    }

    fn ok_rx() -> heapless::Vec<u8, 4096> {
        let mut v = heapless::Vec::new();
        for _ in 0..8 {
            let _ = v.extend_from_slice(b"OK\r\n");
        }
        v
    }

    #[test]
    fn init_falls_back_to_defaults_on_bad_record() {
        let clock = FakeClock::new();
        let mut delay = FakeDelay { clock: &clock };
        let mut port = MockPort::new();
        port.inject_rx(&ok_rx());
        let mut loader = MemLoader(None);
        let mut saver = MemSaver(Vec::new());
        let (service, ok) =
            Service::init(&mut loader, &mut saver, &mut port, &clock, &mut delay, 115_200);
        assert!(ok);
        assert_eq!(service.get_config(), Config::default());
        assert_eq!(saver.0.len(), 1);
    }

    #[test]
    fn commit_persists_and_reapplies_pending_config() {
        let clock = FakeClock::new();
        let mut delay = FakeDelay { clock: &clock };
        let mut port = MockPort::new();
        port.inject_rx(&ok_rx());
        let mut loader = MemLoader(None);
        let mut saver = MemSaver(Vec::new());
        let (mut service, _) =
            Service::init(&mut loader, &mut saver, &mut port, &clock, &mut delay, 115_200);
        let token = service.get_config().token;

        service.begin(token, &clock).unwrap();
        service.set_field(ConfigField::Channel, 23, &clock).unwrap();
        service.set_field(ConfigField::Power, 2, &clock).unwrap();
        port.inject_rx(&ok_rx());
        service.commit(&mut saver, &mut port, &clock, &mut delay).unwrap();

        assert_eq!(service.get_config().channel, 23);
        assert_eq!(service.get_config().power, 2);
        let last_saved = Config::from_bytes(saver.0.last().unwrap()).unwrap();
        assert_eq!(last_saved.channel, 23);
    }

    #[test]
    fn abort_discards_pending_edit() {
        let clock = FakeClock::new();
        let mut delay = FakeDelay { clock: &clock };
        let mut port = MockPort::new();
        port.inject_rx(&ok_rx());
        let mut loader = MemLoader(None);
        let mut saver = MemSaver(Vec::new());
        let (mut service, _) =
            Service::init(&mut loader, &mut saver, &mut port, &clock, &mut delay, 115_200);
        let token = service.get_config().token;
        let before = service.get_config();

        service.begin(token, &clock).unwrap();
        service.set_field(ConfigField::Channel, 30, &clock).unwrap();
        service.abort();

        assert_eq!(service.get_config(), before);
    }

    #[test]
    fn wrong_token_is_rejected_without_side_effects() {
        let clock = FakeClock::new();
        let mut delay = FakeDelay { clock: &clock };
        let mut port = MockPort::new();
        port.inject_rx(&ok_rx());
        let mut loader = MemLoader(None);
        let mut saver = MemSaver(Vec::new());
        let (mut service, _) =
            Service::init(&mut loader, &mut saver, &mut port, &clock, &mut delay, 115_200);

        assert_eq!(service.begin(0xBAD, &clock), Err(Error::ConfigRejected));
    }

    #[test]
    fn command_line_config_edit_round_trip() {
        let clock = FakeClock::new();
        let mut delay = FakeDelay { clock: &clock };
        let mut port = MockPort::new();
        port.inject_rx(&ok_rx());
        let mut loader = MemLoader(None);
        let mut saver = MemSaver(Vec::new());
        let (mut service, _) =
            Service::init(&mut loader, &mut saver, &mut port, &clock, &mut delay, 115_200);
        let token = service.get_config().token;
        let line = format_token_cmd(token, "chan=23");

        assert!(service.process_command_line(&line, &mut saver, &mut port, &clock, &mut delay));
        port.inject_rx(&ok_rx());
        let commit_line = format_token_cmd(token, "commit");
        assert!(service.process_command_line(
            &commit_line,
            &mut saver,
            &mut port,
            &clock,
            &mut delay
        ));
        assert_eq!(service.get_config().channel, 23);
    }

    fn format_token_cmd(token: u32, op: &str) -> heapless::String<64> {
        let mut s = heapless::String::new();
        let _ = core::fmt::write(&mut s, format_args!("CMD:{}:{}", token, op));
        s
    }

    #[test]
    fn unknown_op_returns_false() {
        let clock = FakeClock::new();
        let mut delay = FakeDelay { clock: &clock };
        let mut port = MockPort::new();
        port.inject_rx(&ok_rx());
        let mut loader = MemLoader(None);
        let mut saver = MemSaver(Vec::new());
        let (mut service, _) =
            Service::init(&mut loader, &mut saver, &mut port, &clock, &mut delay, 115_200);
        let token = service.get_config().token;
        let line = format_token_cmd(token, "bogus=1");
        assert!(!service.process_command_line(&line, &mut saver, &mut port, &clock, &mut delay));
    }

    #[test]
    fn stuck_driver_triggers_monitor_reinit_and_surfaces_driver_down() {
        // spec.md §8 Scenario 6: freeze AUX busy past `T_stuck`; the
        // monitor forces a `Driver::init`. No further "OK" bytes are
        // queued, so the forced handshake times out and fails, and since
        // the driver was previously up this must surface `DriverDown`.
        let clock = FakeClock::new();
        let mut delay = FakeDelay { clock: &clock };
        let mut port = MockPort::new();
        port.inject_rx(&ok_rx());
        let mut loader = MemLoader(None);
        let mut saver = MemSaver(Vec::new());
        let (mut service, ok) =
            Service::init(&mut loader, &mut saver, &mut port, &clock, &mut delay, 115_200);
        assert!(ok);
        port.complete_tx(); // the TX-complete ISR fires after bring-up settles

        port.set_aux_busy(true);
        clock.advance(T_STUCK_MS + 1);
        let sent_before = port.sent_frames().len();

        let mut events: Vec<Event, EVENT_CAPACITY> = Vec::new();
        service.tick(&mut port, &clock, &mut delay, &mut events);

        assert!(
            port.sent_frames().len() > sent_before,
            "monitor should have attempted a re-init AT handshake"
        );
        assert!(events.iter().any(|e| *e == Event::DriverDown));
    }
}
