mod session;
mod window;

pub use session::{ChannelSpec, Ingest, Session};
pub use window::{ChannelWindow, RenderView, ShapeMismatch, Snapshot, WindowState};
