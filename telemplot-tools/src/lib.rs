pub mod config;

use clap::Parser;
use crossbeam::channel::Sender;
use std::io::{self, Write};
use telemplot::source::{self, FrameSource, SourceError};
use telemplot::{Decoder, Integrity, RecordReader};

/// Boxed source as returned by `telemplot::source::open`.
pub type DynSource = Box<dyn FrameSource + Send>;

#[derive(Parser, Debug, Clone)]
pub struct LinkOpts {
    /// Telemetry source: -, pipe://, serial://port[:baud], /dev/..., COMn or tcp://host[:port]
    #[arg(value_name = "URL", default_value = "-")]
    pub url: String,

    /// Line integrity check
    #[arg(
        long = "checksum",
        value_name = "CHECK",
        help = "Line integrity check: none or xor (last byte is XOR of the rest)"
    )]
    pub checksum: Option<Integrity>,

    /// Timestamp format for log lines
    #[arg(
        short = 't',
        long = "timestamp-format",
        value_name = "FMT",
        default_value = "%T%.3f "
    )]
    pub timestamp_format: String,

    /// More log output (repeat for more)
    #[arg(short = 'v', action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl LinkOpts {
    pub fn log_level(&self) -> log::LevelFilter {
        match self.verbose {
            0 => log::LevelFilter::Info,
            1 => log::LevelFilter::Debug,
            _ => log::LevelFilter::Trace,
        }
    }

    /// Opens the source and wraps it in a reader.
    pub fn open(&self, integrity: Integrity) -> Result<RecordReader<DynSource>, SourceError> {
        let source = source::open(&self.url)?;
        let reader = RecordReader::new(source, Decoder::new(integrity));
        log::debug!(
            "{}: integrity check {:?}",
            self.url,
            reader.decoder().integrity()
        );
        Ok(reader)
    }
}

fn logger(level: log::LevelFilter, timestamp_format: &str) -> env_logger::Builder {
    let tf = timestamp_format.to_string();
    let mut builder = env_logger::Builder::new();
    builder
        .filter_level(level)
        .parse_default_env()
        .format(move |buf, record| {
            writeln!(
                buf,
                "{}{:<5} {}",
                chrono::Local::now().format(&tf),
                record.level(),
                record.args()
            )
        });
    builder
}

/// Logs to stderr with a local timestamp in front of each line.
pub fn init_logging(level: log::LevelFilter, timestamp_format: &str) {
    logger(level, timestamp_format).init();
}

/// Logs into `lines`, one message per item, for tools that own the terminal.
pub fn init_logging_to(level: log::LevelFilter, timestamp_format: &str, lines: Sender<String>) {
    logger(level, timestamp_format)
        .target(env_logger::Target::Pipe(Box::new(LineSink::new(lines))))
        .init();
}

/// Splits written bytes into lines and forwards them on a channel.
pub struct LineSink {
    tx: Sender<String>,
    partial: Vec<u8>,
}

impl LineSink {
    pub fn new(tx: Sender<String>) -> LineSink {
        LineSink {
            tx,
            partial: Vec::new(),
        }
    }
}

impl Write for LineSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        for &b in buf {
            if b == b'\n' {
                let line = String::from_utf8_lossy(&self.partial).into_owned();
                self.partial.clear();
                // A gone receiver just means nobody is watching any more.
                let _ = self.tx.send(line);
            } else {
                self.partial.push(b);
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
