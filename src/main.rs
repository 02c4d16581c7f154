#![no_std]
#![no_main]

use esp_hal::clock::CpuClock;
use esp_hal::gpio::{Level, Output, OutputConfig};
use esp_hal::i2c::master::I2c;
use esp_hal::rng::Rng;
use esp_hal::spi::master::Spi;
use esp_hal::time::Rate;
use esp_hal::timer::timg::TimerGroup;
use esp_hal::Blocking;
use esp_println::println;

extern crate alloc;

use embassy_time::{Delay, Duration, Timer};
use embedded_hal_bus::spi::ExclusiveDevice;
use embedded_sdmmc::{SdCard, VolumeManager};
use esp_hal_embassy::Executor;
use static_cell::StaticCell;

use lux_node::clock::{Clock, EmbassyClock};
use lux_node::config;
use lux_node::control::{ControlLoop, PinRelay, Settings};
use lux_node::diagnostic::SerialMirror;
use lux_node::light_sensor::Bh1750;
use lux_node::log_store::{LogStore, LogStoreConfig};
use lux_node::sd_medium::{SdMedium, UptimeTimeSource};
use lux_node::state_machine::{AcquisitionConfig, SensorStateMachine};

// Add app descriptor for espflash compatibility
esp_bootloader_esp_idf::esp_app_desc!();

type SdSpiDevice = ExclusiveDevice<Spi<'static, Blocking>, Output<'static>, Delay>;
type NodeMedium = SdMedium<SdCard<SdSpiDevice, Delay>, UptimeTimeSource>;
type NodeLog = LogStore<NodeMedium, EmbassyClock, SerialMirror>;
type NodeSensor = SensorStateMachine<Bh1750<I2c<'static, Blocking>>, EmbassyClock, Delay, HardwareRng>;
type NodeControl = ControlLoop<PinRelay<Output<'static>>>;

static LOG_CELL: StaticCell<NodeLog> = StaticCell::new();
static SENSOR_CELL: StaticCell<NodeSensor> = StaticCell::new();
static CONTROL_CELL: StaticCell<NodeControl> = StaticCell::new();

// Static executor for embassy tasks
static EXECUTOR: StaticCell<Executor> = StaticCell::new();

#[panic_handler]
fn panic(_: &core::panic::PanicInfo) -> ! {
    loop {}
}

/// On-chip generator feeding the simulated light signal
struct HardwareRng(Rng);

impl rand_core::RngCore for HardwareRng {
    fn next_u32(&mut self) -> u32 {
        self.0.random()
    }

    fn next_u64(&mut self) -> u64 {
        ((self.0.random() as u64) << 32) | self.0.random() as u64
    }

    fn fill_bytes(&mut self, dst: &mut [u8]) {
        for chunk in dst.chunks_mut(4) {
            let word = self.0.random().to_le_bytes();
            chunk.copy_from_slice(&word[..chunk.len()]);
        }
    }
}

/// Bring up the SD card. `None` leaves the log store in serial-only mode.
fn mount_sd(spi: Spi<'static, Blocking>, cs: Output<'static>) -> Option<NodeMedium> {
    let spi_device = match ExclusiveDevice::new(spi, cs, Delay) {
        Ok(dev) => dev,
        Err(_) => {
            println!("[SD] Failed to create SPI device");
            return None;
        }
    };

    let sd_card = SdCard::new(spi_device, Delay);
    match sd_card.num_bytes() {
        Ok(bytes) => println!("[SD] Card size: {} MB", bytes / (1024 * 1024)),
        Err(e) => {
            println!("[SD] Card init failed: {:?}", e);
            return None;
        }
    }

    let volume_mgr = VolumeManager::new(sd_card, UptimeTimeSource);
    match SdMedium::mount(volume_mgr) {
        Ok(medium) => {
            println!("[SD] ✅ Volume mounted");
            Some(medium)
        }
        Err(e) => {
            println!("[SD] ❌ {}", e);
            None
        }
    }
}

// Single control loop task
#[embassy_executor::task]
async fn control_task(
    log: &'static mut NodeLog,
    sensor: &'static mut NodeSensor,
    control: &'static mut NodeControl,
) -> ! {
    println!("[CTRL] Starting control loop");
    let clock = EmbassyClock;

    loop {
        control.tick(clock.now_ms(), sensor, log);

        // Small delay to prevent busy loop
        Timer::after(Duration::from_millis(config::CONTROL_TICK_MS)).await;
    }
}

#[esp_hal::main]
fn main() -> ! {
    let hal_config = esp_hal::Config::default().with_cpu_clock(CpuClock::max());
    let peripherals = esp_hal::init(hal_config);

    // Log reads and rotation buffers live on the heap
    esp_alloc::heap_allocator!(size: 48 * 1024);

    // Initialize embassy time system
    let timer_group0 = TimerGroup::new(peripherals.TIMG0);
    esp_hal_embassy::init(timer_group0.timer0);

    println!("[MAIN] lux-node {}", lux_node::VERSION);

    let settings = Settings::default();

    // Storage
    println!("[SD] Initializing SD card...");
    let sd_medium = match Spi::new(
        peripherals.SPI2,
        esp_hal::spi::master::Config::default()
            .with_frequency(Rate::from_khz(config::SD_SPI_INIT_FREQ_KHZ))
            .with_mode(esp_hal::spi::Mode::_0),
    ) {
        Ok(spi) => {
            let spi = spi
                .with_sck(peripherals.GPIO10)
                .with_mosi(peripherals.GPIO7)
                .with_miso(peripherals.GPIO2);
            let cs = Output::new(peripherals.GPIO3, Level::High, OutputConfig::default());
            mount_sd(spi, cs)
        }
        Err(e) => {
            println!("[SD] ❌ Failed to configure SPI: {:?}", e);
            None
        }
    };

    let log = LOG_CELL.init(LogStore::new(
        sd_medium,
        EmbassyClock,
        SerialMirror,
        LogStoreConfig {
            debug_enabled: settings.debug_enabled,
            ..LogStoreConfig::default()
        },
    ));
    log.begin();

    // Light sensor
    println!(
        "[SENSOR] Initializing I2C (SDA GPIO{}, SCL GPIO{})...",
        config::I2C_SDA_PIN,
        config::I2C_SCL_PIN
    );
    let i2c = match I2c::new(
        peripherals.I2C0,
        esp_hal::i2c::master::Config::default()
            .with_frequency(Rate::from_khz(config::I2C_FREQUENCY_KHZ)),
    ) {
        Ok(i2c) => i2c
            .with_sda(peripherals.GPIO5)
            .with_scl(peripherals.GPIO6),
        Err(e) => {
            println!("[SENSOR] ❌ Failed to configure I2C: {:?}", e);
            panic!("I2C initialization failed");
        }
    };

    let sensor = SENSOR_CELL.init(SensorStateMachine::new(
        Bh1750::new(i2c, Bh1750::<I2c<'static, Blocking>>::ADDRESS_LOW),
        EmbassyClock,
        Delay,
        HardwareRng(Rng::new(peripherals.RNG)),
        AcquisitionConfig::default(),
    ));
    if sensor.begin(log) {
        println!("[SENSOR] ✅ {}", sensor.get_sensor_info());
    } else {
        println!("[SENSOR] ⚠️ No sensor found, using simulated signal");
    }

    // Relay
    println!("[CTRL] Relay on GPIO{}", config::RELAY_PIN);
    let relay_pin = Output::new(peripherals.GPIO4, Level::Low, OutputConfig::default());
    let control = CONTROL_CELL.init(ControlLoop::new(settings, PinRelay::new(relay_pin)));
    control.begin(log);

    // Initialize embassy executor and run tasks
    let executor = EXECUTOR.init(Executor::new());
    executor.run(|spawner| {
        println!("[MAIN] Spawning control task...");
        match spawner.spawn(control_task(log, sensor, control)) {
            Ok(_) => println!("[MAIN] ✅ Control task spawned"),
            Err(e) => println!("[MAIN] ❌ Failed to spawn control task: {:?}", e),
        }
    });
}
