pub mod serial;
pub mod device;
pub mod config;
pub mod console;
pub mod logging;

use std::sync::Arc;
use config::RuntimeSettings;
use device::{ArduinoDriver, DeviceManager};
use serial::SerialInterface;

pub const ARDUINO_DEVICE: &str = "arduino";

/// Options for [`run`], usually built from the command line
pub struct RunOptions {
    pub settings: RuntimeSettings,
    /// Overrides the port from settings and discovery
    pub port: Option<String>,
    pub console: bool,
}

/// Bring up the device link and serve until Ctrl-C
pub async fn run(options: RunOptions) -> anyhow::Result<()> {
    let RunOptions { settings, port, console } = options;

    let device_manager = Arc::new(DeviceManager::new());
    let driver = Arc::new(ArduinoDriver::new(settings.driver_config(ARDUINO_DEVICE)));
    device_manager.add_driver(driver.clone()).await?;

    match port.or_else(|| settings.arduino_port.clone()).or_else(discover_port) {
        Some(port_name) => {
            if let Err(e) = driver.connect(&port_name, settings.arduino_baud_rate).await {
                log::error!("Failed to connect to arduino: {}", e);
            }
        }
        None => log::warn!("No arduino port configured or discovered, running without device"),
    }

    let probe_task = driver.spawn_probe();
    let console_task = console.then(|| {
        let lines = console::spawn_stdin_reader();
        tokio::spawn(console::run_console(driver.clone(), lines))
    });

    log::info!("Skreen device link started");
    tokio::signal::ctrl_c().await?;
    log::info!("Shutting down");

    if let Err(e) = driver.send_command("status", Some("Exiting")).await {
        log::warn!("Failed to notify device of shutdown: {}", e);
    }
    probe_task.abort();
    if let Some(task) = console_task {
        task.abort();
    }
    device_manager.shutdown_all().await;
    Ok(())
}

fn discover_port() -> Option<String> {
    match SerialInterface::find_arduino() {
        Ok(device) => {
            log::info!("Found arduino candidate on {} ({:04x}:{:04x})", device.port_name, device.vid, device.pid);
            Some(device.port_name)
        }
        Err(e) => {
            log::warn!("Serial port discovery failed: {}", e);
            None
        }
    }
}
