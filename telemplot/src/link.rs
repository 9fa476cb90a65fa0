//! Link
//!
//! Runs a `RecordReader` on a dedicated thread so that reading the
//! transport never stalls rendering. Decoded records are handed over a
//! bounded crossbeam channel. When the consumer falls behind, records are
//! dropped and counted: there is no guaranteed delivery. Text to write to
//! the transport goes the other way on an unbounded channel and is written
//! between reads.
//!
//! Closure of the source is reported once, as `Err(SourceError::Closed)`.
//! After that the record channel disconnects.

use crate::record::{Record, RecordReader, RecordStream};
use crate::source::{FrameSource, SendError, SourceError};
use crossbeam::channel::{
    self, Receiver, RecvTimeoutError, SendTimeoutError, Sender, TryRecvError, TrySendError,
};
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Default number of records buffered between the link thread and the consumer.
pub static DEFAULT_CHANNEL_SIZE: usize = 1024;

/// How long `RecordStream::next_record` waits on the channel before
/// reporting `Record::Empty`.
pub static RECV_WAIT: Duration = Duration::from_millis(20);

/// What travels from the link thread to the consumer.
pub type LinkItem = Result<Record, SourceError>;

/// Handle to a running link thread.
pub struct Link {
    rx: Receiver<LinkItem>,
    tx: Option<Sender<String>>,
    stop: Arc<AtomicBool>,
    dropped: Arc<AtomicU64>,
}

impl Link {
    fn thread_main<S: FrameSource>(
        mut reader: RecordReader<S>,
        rx: Sender<LinkItem>,
        tx: Receiver<String>,
        stop: Arc<AtomicBool>,
        dropped: Arc<AtomicU64>,
    ) {
        'ioloop: while !stop.load(Ordering::Relaxed) {
            loop {
                match tx.try_recv() {
                    Ok(text) => {
                        if let Err(e) = reader.write(&text) {
                            log::warn!("failed to send '{}': {}", text.trim_end(), e);
                        }
                    }
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => break 'ioloop,
                }
            }

            match reader.next_record() {
                Ok(Record::Empty) => {}
                Ok(record) => match rx.try_send(Ok(record)) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        let n = dropped.fetch_add(1, Ordering::Relaxed) + 1;
                        if n.is_power_of_two() {
                            log::warn!("consumer is behind, {} records dropped so far", n);
                        }
                    }
                    Err(TrySendError::Disconnected(_)) => break 'ioloop,
                },
                Err(e) => {
                    // Closure must not be dropped, wait for room.
                    let mut item = Err(e);
                    loop {
                        match rx.send_timeout(item, RECV_WAIT) {
                            Ok(()) => break 'ioloop,
                            Err(SendTimeoutError::Timeout(back)) => {
                                if stop.load(Ordering::Relaxed) {
                                    break 'ioloop;
                                }
                                item = back;
                            }
                            Err(SendTimeoutError::Disconnected(_)) => break 'ioloop,
                        }
                    }
                }
            }
        }
        reader.close();
        log::debug!("link thread done");
    }

    /// Starts a link thread reading from `reader`, buffering at most
    /// `capacity` records.
    pub fn spawn<S: FrameSource + Send + 'static>(
        reader: RecordReader<S>,
        capacity: usize,
    ) -> io::Result<Link> {
        let (rx_send, rx) = channel::bounded::<LinkItem>(capacity.max(1));
        let (tx, tx_recv) = channel::unbounded::<String>();
        let stop = Arc::new(AtomicBool::new(false));
        let dropped = Arc::new(AtomicU64::new(0));
        let (thread_stop, thread_dropped) = (stop.clone(), dropped.clone());
        thread::Builder::new()
            .name("telemplot-link".to_string())
            .spawn(move || {
                Link::thread_main(reader, rx_send, tx_recv, thread_stop, thread_dropped)
            })?;
        Ok(Link {
            rx,
            tx: Some(tx),
            stop,
            dropped,
        })
    }

    /// The record channel, for use in `crossbeam::select!`.
    pub fn receiver(&self) -> &Receiver<LinkItem> {
        &self.rx
    }

    /// Queues `text` to be written to the transport.
    pub fn write(&self, text: &str) -> Result<(), SendError> {
        match &self.tx {
            Some(tx) => tx
                .send(text.to_string())
                .map_err(|_| SendError::Disconnected),
            None => Err(SendError::Disconnected),
        }
    }

    /// Records dropped because the consumer was not keeping up.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Asks the link thread to close the source and exit.
    pub fn close(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        self.tx = None;
    }
}

impl Drop for Link {
    fn drop(&mut self) {
        self.close();
    }
}

impl RecordStream for Receiver<LinkItem> {
    fn next_record(&mut self) -> Result<Record, SourceError> {
        match self.recv_timeout(RECV_WAIT) {
            Ok(item) => item,
            Err(RecvTimeoutError::Timeout) => Ok(Record::Empty),
            Err(RecvTimeoutError::Disconnected) => Err(SourceError::Closed),
        }
    }
}

impl RecordStream for Link {
    fn next_record(&mut self) -> Result<Record, SourceError> {
        self.rx.next_record()
    }
}
