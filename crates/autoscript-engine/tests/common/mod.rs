//! Common test utilities for the script engine
//!
//! Provides an isolated host driven by a mock clock, a swappable script
//! loader and log capture for asserting on reported errors.

#![allow(dead_code)]

mod loader;
mod logs;
mod test_host;

pub use loader::*;
pub use logs::*;
pub use test_host::*;
