//! Parley server library.
//!
//! Exposes the message log, sequence assignment, reply generation, and the
//! HTTP router for use in tests and embedding.

pub mod config;
pub mod generator;
pub mod http;
pub mod sequence;
pub mod service;
pub mod store;
