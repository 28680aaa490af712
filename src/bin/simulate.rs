//! Runs every manager on the host against a simulated heater, a display
//! printed to stdout and a scripted host.
//!
//! Usage: `simulate [config.json] [seconds]`

use std::{cell::RefCell, convert::Infallible, io::Write as _, rc::Rc};

use embassy_futures::{
    block_on,
    join::{join, join4},
    select::select,
};
use embassy_time::{Duration, Instant, Timer};
use embedded_io_async::{ErrorKind, ErrorType, Read, Write};
use ratatui_core::buffer::Buffer;
use thermostat_core::{
    Error,
    config::ThermostatConfig,
    hal::{Actuator, DisplayPanel, FrameBufferDisplay, TemperatureSensor},
    memlog::{self, Level},
    notify::control,
    registry::{self, MailboxId, TaskId},
    task::{self, ControlManager, DisplayManager, PacketManager, SystemManager},
    timer,
};

const MOTD: &str = const_format::formatcp!(
    "{} {} simulation\n",
    env!("CARGO_PKG_NAME"),
    env!("CARGO_PKG_VERSION")
);

const DEFAULT_RUN_TIME: Duration = Duration::from_secs(20);
const LOG_CAPACITY: usize = 16 * 1024;

const AMBIENT: f32 = 20.0;
/// Heating rate at full drive, in degrees per second.
const HEATER_RATE: f32 = 4.0;
/// Fraction of the excess over ambient lost per second.
const HEAT_LOSS: f32 = 0.05;
const PLANT_STEP: Duration = Duration::from_millis(100);

/// Host lines, sent at a fixed offset from start.
const HOST_SCRIPT: &[(u64, &[u8])] = &[
    (
        2_000,
        b"{\"packet_type\":0,\"packet_payload\":{\"temperature\":45.0,\"sampling_time\":0.5}}\n",
    ),
    (
        9_000,
        b"{\"packet_type\":0,\"packet_payload\":{\"temperature\":60.0,\"sampling_time\":0.25}}\n",
    ),
    // Repeated, the system task drops it.
    (
        9_500,
        b"{\"packet_type\":0,\"packet_payload\":{\"temperature\":60.0,\"sampling_time\":0.25}}\n",
    ),
];

struct Plant {
    temperature: f32,
    drive: u32,
    powered: bool,
}

type SharedPlant = Rc<RefCell<Plant>>;

struct PlantSensor(SharedPlant);

impl TemperatureSensor for PlantSensor {
    fn initialize(&mut self) -> Result<(), Error> {
        Ok(())
    }

    fn read_scaled_temperature(&mut self) -> Result<f32, Error> {
        Ok(self.0.borrow().temperature)
    }
}

struct Heater(SharedPlant);

impl Actuator for Heater {
    fn start(&mut self) -> Result<(), Error> {
        self.0.borrow_mut().powered = true;
        Ok(())
    }

    fn stop(&mut self) -> Result<(), Error> {
        self.0.borrow_mut().powered = false;
        Ok(())
    }

    fn set_drive_level(&mut self, level: u32) -> Result<(), Error> {
        self.0.borrow_mut().drive = level;
        Ok(())
    }
}

async fn plant_model(plant: SharedPlant, max_drive: f32) {
    let dt = PLANT_STEP.as_millis() as f32 / 1000.0;
    loop {
        Timer::after(PLANT_STEP).await;
        let mut plant = plant.borrow_mut();
        let heating = if plant.powered {
            plant.drive as f32 / max_drive * HEATER_RATE
        } else {
            0.0
        };
        let loss = (plant.temperature - AMBIENT) * HEAT_LOSS;
        plant.temperature += (heating - loss) * dt;
    }
}

/// Prints every non-blank framebuffer row on one line.
struct StdoutPanel;

impl DisplayPanel for StdoutPanel {
    fn flush(&mut self, frame: &Buffer) -> Result<(), Error> {
        let mut rows = Vec::new();
        for y in 0..frame.area.height {
            let row: String = (0..frame.area.width)
                .filter_map(|x| frame.cell((x, y)).map(|cell| cell.symbol()))
                .collect();
            let row = row.trim_end();
            if !row.is_empty() {
                rows.push(row.split_whitespace().collect::<Vec<_>>().join(" "));
            }
        }
        if !rows.is_empty() {
            println!("[{:>9}] display | {}", Instant::now().as_millis(), rows.join(" | "));
        }
        Ok(())
    }
}

struct ScriptedHost {
    start: Instant,
    line: usize,
    position: usize,
}

impl ErrorType for ScriptedHost {
    type Error = Infallible;
}

impl Read for ScriptedHost {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        let Some(&(at_ms, bytes)) = HOST_SCRIPT.get(self.line) else {
            return core::future::pending().await;
        };
        // Absolute, so a cancelled read resumes the same wait.
        Timer::at(self.start + Duration::from_millis(at_ms)).await;

        let count = buf.len().min(bytes.len() - self.position);
        buf[..count].copy_from_slice(&bytes[self.position..self.position + count]);
        self.position += count;
        if self.position == bytes.len() {
            self.line += 1;
            self.position = 0;
        }
        Ok(count)
    }
}

struct StdoutHost;

impl ErrorType for StdoutHost {
    type Error = ErrorKind;
}

impl Write for StdoutHost {
    async fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        let mut stdout = std::io::stdout().lock();
        write!(
            stdout,
            "[{:>9}] host    | {}",
            Instant::now().as_millis(),
            String::from_utf8_lossy(buf)
        )
        .map_err(|_| ErrorKind::Other)?;
        Ok(buf.len())
    }
}

fn load_config(path: Option<String>) -> Result<ThermostatConfig, String> {
    let Some(path) = path else {
        return Ok(ThermostatConfig::default());
    };
    let json = std::fs::read(&path).map_err(|error| format!("{path}: {error}"))?;
    ThermostatConfig::from_json(&json).map_err(|error| format!("{path}: {error}"))
}

fn main() {
    let mut args = std::env::args().skip(1);
    let config = match load_config(args.next()) {
        Ok(config) => config,
        Err(error) => {
            eprintln!("config: {error}");
            std::process::exit(1);
        }
    };
    let run_time = args
        .next()
        .and_then(|seconds| seconds.parse().ok())
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_RUN_TIME);

    print!("{MOTD}");

    let resources = registry::init(LOG_CAPACITY, Level::Debug);
    resources.log.log_now(Level::Info, "simulation starting");

    let plant = Rc::new(RefCell::new(Plant {
        temperature: AMBIENT,
        drive: 0,
        powered: false,
    }));

    let sampling_timer = timer::init(Duration::from_secs(1));
    let control_timer = timer::init(config.control.control_period());
    let control_notifier = resources.notifier(TaskId::Control);

    let system = SystemManager::new(resources, config.timing);
    let control = ControlManager::new(
        resources,
        config.timing,
        config.control,
        PlantSensor(plant.clone()),
        Heater(plant.clone()),
        sampling_timer,
        control_timer,
    );
    let display = DisplayManager::new(
        resources,
        config.timing,
        config.display,
        FrameBufferDisplay::new(StdoutPanel),
    );
    let packet = PacketManager::new(resources, config.timing, config.packet, StdoutHost);
    let host_link = ScriptedHost {
        start: Instant::now(),
        line: 0,
        position: 0,
    };

    let log = &resources.log;
    let pass_delay = config.timing.pass_delay();
    let managers = join4(
        task::run(system, log, pass_delay),
        task::run(control, log, pass_delay),
        task::run(display, log, pass_delay),
        task::run(packet, log, pass_delay),
    );
    let drivers = join4(
        sampling_timer.run(control_notifier.isr_handle(), control::MEASUREMENT_READY),
        control_timer.run(control_notifier.isr_handle(), control::CONTROL_TICK),
        task::host_receiver(host_link, resources, config.packet),
        plant_model(plant.clone(), config.control.max_drive),
    );

    block_on(async {
        select(join(managers, drivers), Timer::after(run_time)).await;

        println!("\nlog, oldest first:");
        for record in resources.log.records().await.iter().rev() {
            println!("{}", memlog::format_record(record));
        }
    });

    println!("\nfinal temperature {:.2} C", plant.borrow().temperature);
    for mailbox in [
        MailboxId::System,
        MailboxId::Control,
        MailboxId::Display,
        MailboxId::Packet,
        MailboxId::HostRx,
    ] {
        println!("{mailbox:?}: {} dropped", resources.dropped(mailbox));
    }
    println!("log: {} records lost to contention", resources.log.dropped());
}
