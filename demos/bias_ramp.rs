use std::env;
use std::sync::Arc;
use std::time::Duration;

use inquire::Select;
use keithley_bias::{
    BiasController, BiasSettings, Keithley237, Settings, ThreadSafeSource,
    transport::SerialTransport,
};

// Configuration constants - adjust these for your setup
const BAUD_RATE: u32 = 9600;
// Readings with long integration times take a while to come back.
const SERIAL_TIMEOUT_MS: u64 = 3000;
const DEFAULT_SETTINGS: &str = r#"
[device]
readings_to_average = 4
integration_time_us = 16667
max_compliance = 1e-4

[bias]
voltage = -50.0
compliance = 1e-5
ramp_step = 5.0
ramp_delay_ms = 500
poll_interval_ms = 1000
"#;

const ACTIONS: [&str; 6] = [
    "Enable bias",
    "Disable bias",
    "Measure",
    "Toggle compliance monitor",
    "Show status",
    "Quit",
];

fn main() {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    // Get serial port from command line arg or interactive selection
    let port_name = env::args().nth(1).unwrap_or_else(|| {
        let ports = serialport::available_ports().expect("Failed to enumerate serial ports");

        if ports.is_empty() {
            eprintln!("No serial ports found!");
            std::process::exit(1);
        }

        let port_names: Vec<String> = ports.iter().map(|p| p.port_name.clone()).collect();

        Select::new("Select a serial port:", port_names)
            .prompt()
            .expect("Failed to select port")
    });

    // Optional settings file as the second argument.
    let mut settings = match env::args().nth(2) {
        Some(path) => Settings::load(&path).expect("Failed to load settings"),
        None => Settings::from_toml_str(DEFAULT_SETTINGS).expect("Bad built-in settings"),
    };
    if settings.device.address.is_empty() {
        settings.device.address = port_name.clone();
    }
    let configuration = settings.configuration().expect("Unsupported settings");

    println!("Using port: {}", port_name);

    let transport = SerialTransport::open(
        &port_name,
        BAUD_RATE,
        Duration::from_millis(SERIAL_TIMEOUT_MS),
    )
    .expect("Failed to open serial port");

    let smu: Keithley237<SerialTransport> =
        Keithley237::new(transport, configuration).expect("Instrument did not accept setup");
    let source = Arc::new(ThreadSafeSource::new(smu));
    print_settings(&settings.bias);

    let mut controller = BiasController::new(
        Arc::clone(&source),
        settings.bias.clone(),
        |m| println!("!! Compliance: {} at {}", m.current, m.voltage),
        |e| eprintln!("!! Monitor stopped: {e}"),
    );
    controller.start().expect("Failed to start monitor");

    loop {
        let Ok(action) = Select::new("Action:", ACTIONS.to_vec()).prompt() else {
            break;
        };
        match action {
            "Enable bias" => match controller.enable_bias() {
                Ok(()) => println!("Bias at {}", source.value()),
                Err(e) => println!("Enable failed: {e}"),
            },
            "Disable bias" => {
                if let Err(e) = controller.disable_bias() {
                    println!("Disable failed: {e}");
                }
            }
            "Measure" => match source.measure() {
                Ok(m) => println!(
                    "{}  {}  {}{}",
                    m.timestamp.format("%H:%M:%S%.3f"),
                    m.voltage,
                    m.current,
                    if m.in_compliance { "  (compliance)" } else { "" }
                ),
                Err(e) => println!("Measure failed: {e}"),
            },
            "Toggle compliance monitor" => {
                if controller.state().control_enabled {
                    controller.disable_control();
                } else {
                    controller.enable_control();
                }
            }
            "Show status" => {
                println!("{:#?}", controller.state());
                let mut guard = source.lock();
                match guard.driver().machine_status() {
                    Ok(status) => println!("{:#?}", status),
                    Err(e) => println!("Status query failed: {e}"),
                }
            }
            _ => break,
        }
    }

    // Also covers a ramp that tripped compliance part way up.
    if source.is_on() {
        if let Err(e) = controller.disable_bias() {
            eprintln!("Ramp down failed: {e}");
        }
    }
    controller.stop();
    controller.join();
}

fn print_settings(bias: &BiasSettings) {
    println!(
        "Target {} (compliance {}), steps of {} every {} ms",
        bias.voltage, bias.compliance, bias.ramp_step, bias.ramp_delay_ms
    );
}
