//! # kiln
//!
//! Command line front end of the Kiln rebuild engine: configuration, graph
//! listings and the CLI commands. The engine itself lives in `kiln-core`.

pub mod cli;
pub mod config;
pub mod listing;
