//! Serial Port
//!
//! Opens a serial device as a `FrameSource`. Lines are read as they
//! arrive; the default wait is a short poll interval so a caller can
//! service other duties between reads.

use super::stream::StreamSource;
use std::io;
use std::time::Duration;

/// Serial `FrameSource`.
pub type Port = StreamSource<mio_serial::SerialStream>;

/// Default data rate on the serial port.
pub static DEFAULT_RATE: u32 = 57600;

/// How long a read waits for readiness when the caller has no deadline.
pub static POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Splits `serial_port[:rate]` into its parts.
fn parse_url(url: &str) -> Result<(&str, u32), io::Error> {
    let url_tokens: Vec<&str> = url.split(':').collect();
    match url_tokens[..] {
        [port_name] if !port_name.is_empty() => Ok((port_name, DEFAULT_RATE)),
        [port_name, rate] if !port_name.is_empty() => match rate.parse::<u32>() {
            Ok(rate) => Ok((port_name, rate)),
            Err(_) => Err(io::Error::from(io::ErrorKind::InvalidInput)),
        },
        _ => Err(io::Error::from(io::ErrorKind::InvalidInput)),
    }
}

/// Opens the serial port described by `url`, which should look like
/// `serial_port[:rate]`. It must start with a serial port, like
/// `/dev/tty??` or `COMn`. The rate defaults to 57600.
pub fn open(url: &str) -> Result<Port, io::Error> {
    use mio_serial::SerialPortBuilderExt;
    let (port_name, rate) = parse_url(url)?;
    let port = mio_serial::new(port_name, rate).open_native_async()?;
    log::info!("Opened {} at {} baud", port_name, rate);
    StreamSource::new(port, POLL_INTERVAL, format!("serial {}", port_name))
}
