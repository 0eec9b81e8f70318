//! CLI process supervision
//!
//! Spawns `q chat`, streams its output as events, keeps one live process per
//! session and tears it down on abort.

mod attachments;
mod command;
mod core;
mod decoder;
mod registry;
mod wrapped_child;

pub use attachments::{
    StagedAttachments, extension_for_mime, load_image_file, mime_for_extension, parse_data_url,
};
pub use command::CliInvocation;
pub use core::Supervisor;
pub use registry::{ProcessInfo, RegisteredProcess, SessionRegistry};
pub use wrapped_child::WrappedChild;
