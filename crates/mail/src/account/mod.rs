//! The object model: servers, mailboxes and messages
//!
//! A [`Server`] owns one connection. [`Mailbox`] handles borrow it through
//! the shared connection guard, and every [`Message`] remembers the mailbox
//! it was resolved from.

mod mailbox;
mod message;
mod server;

pub(crate) use mailbox::MailboxRef;
pub use mailbox::Mailbox;
pub use message::Message;
pub use server::{BadAuthMechanismError, ProtocolMismatchError, Server};
