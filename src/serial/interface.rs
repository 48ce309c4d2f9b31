use std::time::Duration;
use serialport::SerialPortType;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::timeout;
use tokio_serial::{SerialPortBuilderExt, SerialStream};

use super::{Result, SerialError, SerialDeviceInfo};

// USB vendor ids of boards and USB-serial bridges an Arduino shows up behind
pub const ARDUINO_VIDS: &[u16] = &[
    0x2341, // Arduino LLC
    0x2A03, // Arduino SRL
    0x1A86, // QinHeng CH340
    0x0403, // FTDI
    0x10C4, // Silicon Labs CP210x
];
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// Byte link to a line-oriented device.
///
/// `read_data` returns `SerialError::Timeout` when nothing arrived within
/// `timeout_ms`; any other error is treated as fatal for the link.
#[async_trait::async_trait]
pub trait Transport: Send {
    async fn send_data(&mut self, data: &[u8]) -> Result<usize>;

    async fn read_data(&mut self, buffer: &mut [u8], timeout_ms: u64) -> Result<usize>;

    /// False for the stand-in used while no hardware is attached.
    fn is_attached(&self) -> bool {
        true
    }

    fn describe(&self) -> String;
}

/// Serial port link backed by tokio-serial
pub struct SerialInterface {
    port: SerialStream,
    port_name: String,
}

impl SerialInterface {
    /// Discover serial ports that look like an Arduino
    pub fn discover_devices() -> Result<Vec<SerialDeviceInfo>> {
        let ports = serialport::available_ports()?;
        let mut devices = Vec::new();

        for port in ports {
            if let SerialPortType::UsbPort(usb_info) = port.port_type {
                if ARDUINO_VIDS.contains(&usb_info.vid) {
                    devices.push(SerialDeviceInfo {
                        port_name: port.port_name.clone(),
                        vid: usb_info.vid,
                        pid: usb_info.pid,
                        serial_number: usb_info.serial_number.clone(),
                        manufacturer: usb_info.manufacturer.clone(),
                        product: usb_info.product.clone(),
                    });
                }
            }
        }

        Ok(devices)
    }

    /// First discovered port that looks like an Arduino
    pub fn find_arduino() -> Result<SerialDeviceInfo> {
        Self::discover_devices()?
            .into_iter()
            .next()
            .ok_or_else(|| SerialError::PortNotFound("no USB serial port with a known Arduino vendor id".to_string()))
    }

    /// Open `port_name` at `baud_rate`
    pub fn open(port_name: &str, baud_rate: u32) -> Result<Self> {
        let port = tokio_serial::new(port_name, baud_rate)
            .timeout(Duration::from_millis(1000))
            .open_native_async()
            .map_err(|e| match e.kind {
                serialport::ErrorKind::NoDevice | serialport::ErrorKind::Io(std::io::ErrorKind::NotFound) => {
                    SerialError::PortNotFound(port_name.to_string())
                }
                _ => SerialError::ConnectionFailed(format!("{}: {}", port_name, e)),
            })?;

        log::info!("Opened serial port {} at {} baud", port_name, baud_rate);
        Ok(Self { port, port_name: port_name.to_string() })
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }
}

#[async_trait::async_trait]
impl Transport for SerialInterface {
    async fn send_data(&mut self, data: &[u8]) -> Result<usize> {
        self.port.write_all(data).await?;
        self.port.flush().await?;
        Ok(data.len())
    }

    async fn read_data(&mut self, buffer: &mut [u8], timeout_ms: u64) -> Result<usize> {
        match timeout(Duration::from_millis(timeout_ms), self.port.read(buffer)).await {
            Ok(Ok(0)) => Err(SerialError::ConnectionFailed(format!("{} closed", self.port_name))),
            Ok(Ok(n)) => Ok(n),
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::TimedOut => Err(SerialError::Timeout),
            Ok(Err(e)) => Err(SerialError::IoError(e)),
            Err(_) => Err(SerialError::Timeout),
        }
    }

    fn describe(&self) -> String {
        self.port_name.clone()
    }
}

/// Stand-in used while no device is attached: writes go nowhere.
#[derive(Debug, Default)]
pub struct NullTransport;

#[async_trait::async_trait]
impl Transport for NullTransport {
    async fn send_data(&mut self, data: &[u8]) -> Result<usize> {
        log::warn!(
            "Write of {} bytes with no device attached, data is going nowhere",
            data.len()
        );
        Ok(0)
    }

    async fn read_data(&mut self, _buffer: &mut [u8], timeout_ms: u64) -> Result<usize> {
        tokio::time::sleep(Duration::from_millis(timeout_ms)).await;
        Err(SerialError::Timeout)
    }

    fn is_attached(&self) -> bool {
        false
    }

    fn describe(&self) -> String {
        "<none>".to_string()
    }
}
