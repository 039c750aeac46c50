//! Library target for the `jupiter` package.
//!
//! The deliverable is the `jupiter` binary (`src/main.rs`); its building blocks
//! live here so they can be tested in isolation.

pub mod cli;
pub mod config;
pub mod discovery;
pub mod error;
pub mod logging;
pub mod summary;

#[doc(hidden)]
pub use jupiter_engine;
