//! `ob-cli` subcommands.

pub mod migrate;
pub mod produce;
