//! Core SMTP types.

mod address;
mod extension;
mod reply;

pub use address::{Address, Mailbox, is_valid as is_valid_address};
pub use extension::{Capabilities, Extension};
pub use reply::{Reply, ReplyCode};
