//! Run events and the sinks that consume them

mod event;
mod sink;

pub use event::{StreamEvent, now_timestamp};
pub use sink::{ChannelSink, EventSink, MemorySink};
