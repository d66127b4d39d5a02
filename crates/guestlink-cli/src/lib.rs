//! guestlink CLI Library
//!
//! Subcommands of the `guestlink` binary: running commands and searches
//! inside guest workers, and inspecting the configured workers.

pub mod exec_cmd;
pub mod settings;
pub mod workers_cmd;
