//! Shared domain types for the roundtable runtime.
//!
//! Everything here is plain data: the error enum, chat messages and tool
//! records, streaming events, the state-tree path resolver, the work-module
//! model, and configuration. No IO, no async.

pub mod config;
pub mod error;
pub mod state;
pub mod stream;
pub mod tool;
pub mod work;

pub use error::{Error, Result};
