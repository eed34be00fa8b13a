#![no_std]
#![no_main]

// Required for ESP-IDF bootloader compatibility
// Use explicit parameters to ensure correct efuse block revision values
esp_bootloader_esp_idf::esp_app_desc!(
    env!("CARGO_PKG_VERSION"),  // version
    env!("CARGO_PKG_NAME"),     // project_name
    "00:00:00",                 // build_time
    "2025-01-01",               // build_date
    "0.0.0",                    // idf_ver (not using IDF)
    0x10000,                    // mmu_page_size (64KB)
    0,                          // min_efuse_blk_rev_full (accept all)
    u16::MAX                    // max_efuse_blk_rev_full (accept all)
);

use esp_backtrace as _;
use esp_hal::gpio::{Input, InputConfig, Level, Output, OutputConfig, Pull};
use esp_hal::uart::{Config as UartConfig, Uart};

use lora_stack::config::at::CONFIG_MODE_BAUD;
use lora_stack::platform::esp32::{Esp32Clock, Esp32Delay, Esp32Port};
use lora_stack::service::{ConfigLoader, ConfigSaver, Event, Service};

const TARGET_BAUD: u32 = 9600;

/// Flash-backed config loader/saver stub. A real binary wires this to the
/// board's NVS/flash page; kept minimal here since flash formats outside
/// this Stack's own config record are out of scope.
struct FlashConfig;

impl ConfigLoader for FlashConfig {
    fn load(&mut self) -> Option<[u8; lora_stack::config::CONFIG_RECORD_LEN]> {
        None
    }
}

impl ConfigSaver for FlashConfig {
    fn save(&mut self, _bytes: &[u8; lora_stack::config::CONFIG_RECORD_LEN]) {}
}

#[esp_hal::main]
fn main() -> ! {
    let peripherals = esp_hal::init(esp_hal::Config::default());

    esp_println::logger::init_logger_from_env();

    let mode_pin = Output::new(peripherals.GPIO4, Level::Low, OutputConfig::default());
    let aux_pin = Input::new(peripherals.GPIO5, InputConfig::default().with_pull(Pull::None));
    let uart = Uart::new(
        peripherals.UART1,
        UartConfig::default().with_baudrate(CONFIG_MODE_BAUD),
    )
    .unwrap()
    .with_rx(peripherals.GPIO6)
    .with_tx(peripherals.GPIO7);

    let mut port = Esp32Port::new(uart, mode_pin, aux_pin);
    let clock = Esp32Clock;
    let mut delay = Esp32Delay(esp_hal::delay::Delay::new());
    let mut loader = FlashConfig;
    let mut saver = FlashConfig;

    let (mut service, driver_up) =
        Service::init(&mut loader, &mut saver, &mut port, &clock, &mut delay, TARGET_BAUD);
    if !driver_up {
        log::error!("lora-stack: initial driver bring-up failed, monitor will retry");
    }

    loop {
        port.poll_rx();
        let mut events = heapless::Vec::new();
        service.tick(&mut port, &clock, &mut delay, &mut events);
        for event in events {
            match event {
                Event::TxOk { seq } => log::debug!("tx ok seq={}", seq),
                Event::TxFail { seq, reason } => log::warn!("tx failed seq={} reason={:?}", seq, reason),
                Event::RxOverflow => log::warn!("rx queue overflow"),
                Event::DriverDown => log::error!("driver down"),
                Event::DriverUp => log::info!("driver back up"),
                Event::ConfigCommitted => log::info!("config committed"),
            }
        }
        while let Some(record) = service.receive() {
            log::debug!(
                "rx src={:#06x} seq={} len={}",
                record.src,
                record.seq,
                record.payload.len()
            );
        }
    }
}
