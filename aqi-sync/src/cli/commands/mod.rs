//! Subcommand arguments and handlers

pub mod schema;
pub mod status;
pub mod sync;
