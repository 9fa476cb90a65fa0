pub mod control;
pub mod data;
pub mod link;
pub mod record;
pub mod source;

pub use data::{ChannelSpec, ChannelWindow, Session};
pub use link::Link;
pub use record::{Decoder, Integrity, Record, RecordReader};
pub use source::{FrameSource, LineEvent};
