//! Parley: terminal chat client library.
//!
//! Sends appear immediately as pending entries and are reconciled with the
//! server's sequenced message log, whether the confirmation arrives through
//! the send's own response or through periodic polling.

pub mod api;
pub mod config;
pub mod session;
pub mod sync;
pub mod ui;
