//! Agent messaging, threads, file reservations, and cross-project contacts.

#![forbid(unsafe_code)]

pub mod agents;
pub mod contacts;
pub mod messaging;
pub mod rate_limit;
pub mod reservation_index;
pub mod reservations;

pub use agents::{register, touch, NewAgent};
pub use contacts::{accepted_links_for, request_link, respond_link};
pub use messaging::{
    ack, inbox, read, search, send, summarize_thread, InboxOptions, MessageView, SendRequest, ThreadSummary,
};
pub use reservations::{conflicts_for, release, reserve, sweep_expired};
