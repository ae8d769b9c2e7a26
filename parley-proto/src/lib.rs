//! Shared wire types for the Parley chat protocol.

pub mod codec;
pub mod conversation;
pub mod message;
pub mod sync;
