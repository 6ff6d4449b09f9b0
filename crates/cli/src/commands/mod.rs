//! CLI subcommands

pub mod detect;
pub mod sample;
