//! Recognition Stream Client runtime.
//!
//! This library wires the core components to real collaborators: the HTTP
//! backend, the Socket.IO push channel, a system speech synthesizer and a
//! terminal view. The `viewer` binary is a thin wrapper around it.

pub mod channel;
pub mod client;
pub mod config;
pub mod greetings;
pub mod speech;
pub mod view;
