//! Common utilities for the HID bridge
//!
//! This crate provides functionality shared by the protocol consumers:
//! the workspace error type, logging setup, and test fixtures that speak the
//! provider protocol.

pub mod error;
pub mod logging;
pub mod test_utils;

pub use error::{Error, Result};
pub use logging::setup_logging;
