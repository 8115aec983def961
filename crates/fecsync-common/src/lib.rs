//! fecsync Common Library
//!
//! Shared error taxonomy and logging bootstrap for the fecsync workspace.
//!
//! # Overview
//!
//! This crate provides the pieces every workspace member needs:
//!
//! - **Error Handling**: the `SyncError` taxonomy and `Result` alias
//! - **Logging**: `tracing` subscriber initialization from environment config
//!
//! # Example
//!
//! ```no_run
//! use fecsync_common::{Result, SyncError};
//!
//! fn check_cursor(present: bool) -> Result<()> {
//!     if !present {
//!         return Err(SyncError::protocol("page missing pagination cursor"));
//!     }
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod logging;

// Re-export commonly used types
pub use error::{Result, SyncError};
