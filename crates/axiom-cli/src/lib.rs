//! Axiom CLI - operator front end for ceremony coordination
//!
//! Every command loads the ceremony snapshot from the state directory,
//! drives a coordinator, waits for notifications and saves the snapshot
//! back.

pub mod commands;

pub use commands::{run, Cli, Commands};
