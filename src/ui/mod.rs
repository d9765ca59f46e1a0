//! # UI Module
//!
//! Plain-text replies shown to chat users: now-playing cards, queue
//! listings, outcome and error lines, and the operator session table.

pub mod messages;
