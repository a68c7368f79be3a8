//! The `scrawl` command line front end.

pub mod app;
pub mod cli;
pub mod error;
