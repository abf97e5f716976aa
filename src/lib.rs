#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod action_log;
pub mod agent;
pub mod cli;
pub mod config;
pub mod controller;
pub mod error;
pub mod provider;
pub mod repl;
pub mod runtime;
pub mod store;
pub mod turn;

#[cfg(test)]
mod testing;

pub use error::{Error, Result};
