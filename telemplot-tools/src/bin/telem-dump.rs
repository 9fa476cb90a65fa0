//! telem-dump
//!
//! Prints the records arriving on a telemetry source, or lists the serial
//! ports present on the system.

use clap::Parser;
use std::io::{self, Write};
use std::process::ExitCode;
use telemplot::record::{DiscoveryPolicy, RecordStream};
use telemplot::source::SourceError;
use telemplot::{Record, Session};
use telemplot_tools::LinkOpts;

#[derive(Parser, Debug)]
#[command(
    name = "telem-dump",
    version,
    about = "Dump line framed telemetry, or enumerate serial ports"
)]
struct Cli {
    #[command(flatten)]
    link: LinkOpts,

    /// Print lines exactly as framed, without decoding
    #[arg(long)]
    raw: bool,

    /// Run channel discovery, print what was found, then quit
    #[arg(long)]
    discover: bool,

    /// Stop after this many records
    #[arg(short = 'c', long = "count")]
    count: Option<usize>,

    /// Enumerate serial ports, then quit
    #[arg(long = "enum", exclusive = true)]
    enumerate: bool,
}

fn enum_ports() -> ExitCode {
    let ports = match serialport::available_ports() {
        Ok(ports) => ports,
        Err(e) => {
            eprintln!("ERROR: cannot list serial ports: {}", e);
            return ExitCode::FAILURE;
        }
    };
    if ports.is_empty() {
        println!("No serial ports found");
        return ExitCode::SUCCESS;
    }
    println!("Serial ports:");
    for p in ports {
        let detail = match &p.port_type {
            serialport::SerialPortType::UsbPort(info) => format!(
                "usb vid:{:04x} pid:{:04x}{}",
                info.vid,
                info.pid,
                info.product
                    .as_deref()
                    .map(|s| format!(" {}", s))
                    .unwrap_or_default()
            ),
            serialport::SerialPortType::BluetoothPort => "bluetooth".to_string(),
            serialport::SerialPortType::PciPort => "pci".to_string(),
            _ => "unknown".to_string(),
        };
        println!(" * serial://{}  ({})", p.port_name, detail);
    }
    ExitCode::SUCCESS
}

/// One line of output for a decoded record. Numeric records come out in
/// wire form, so the output can be fed back to another tool.
fn describe(record: &Record) -> Option<String> {
    match record {
        Record::Numeric { .. } => Some(record.to_line()),
        Record::Malformed { reason, .. } => Some(format!("! {}  ({})", record, reason)),
        Record::Command { payload } => Some(format!("> {}", payload)),
        Record::Text { line } => Some(format!("# {}", line)),
        Record::Empty => None,
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if cli.enumerate {
        return enum_ports();
    }

    macro_rules! die{
        ($f:expr,$($a:tt)*)=>{
        {
            die!(format!($f, $($a)*));
        }
        };
        ($msg:expr)=>{
        {
            eprintln!("ERROR: {}", $msg);
            return ExitCode::FAILURE;
        }
        };
    }

    telemplot_tools::init_logging(cli.link.log_level(), &cli.link.timestamp_format);

    let mut reader = match cli.link.open(cli.link.checksum.unwrap_or_default()) {
        Ok(reader) => reader,
        Err(e) => die!("cannot open '{}': {}", cli.link.url, e),
    };

    if cli.discover {
        return match Session::discover(&mut reader, &DiscoveryPolicy::default(), 1, None) {
            Ok(session) => {
                for spec in session.specs() {
                    println!("{}: {} fields", spec.label, spec.width);
                }
                ExitCode::SUCCESS
            }
            Err(e) => die!(e),
        };
    }

    let stdout = io::stdout();
    let mut out = stdout.lock();
    let mut printed = 0;
    loop {
        if cli.count.is_some_and(|n| printed >= n) {
            break;
        }
        let line = if cli.raw {
            match reader.next_raw() {
                Ok(line) => line,
                Err(SourceError::Closed) => break,
                Err(e) => die!(e),
            }
        } else {
            match reader.next_record() {
                Ok(record) => describe(&record),
                Err(SourceError::Closed) => break,
                Err(e) => die!(e),
            }
        };
        if let Some(line) = line {
            if writeln!(out, "{}", line).is_err() {
                // Downstream went away, e.g. `| head`.
                break;
            }
            printed += 1;
        }
    }
    ExitCode::SUCCESS
}
