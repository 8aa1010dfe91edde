//! Core IMAP types.

mod capability;
mod flags;
mod mailbox;
mod response_code;

pub use capability::{Capabilities, Capability, ResponseStatus};
pub use flags::{Flag, Flags};
pub use mailbox::{ListEntry, MailboxAttribute, MailboxInfo};
pub use response_code::ResponseCode;
