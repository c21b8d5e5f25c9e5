//! EMS Common Library
//!
//! Shared constants, channel metadata types and configuration loading
//! utilities for all EMS workspace crates.
//!
//! # Module Structure
//!
//! - [`config`] - Configuration loading traits and types
//! - [`consts`] - Workspace-wide limits and defaults
//! - [`types`] - Channel metadata shared between runtime and collaborators
//! - [`watchdog`] - Supervisor liveness contract
//! - [`prelude`] - Common re-exports for convenience
//!
//! # Usage
//!
//! ```rust
//! use ems_common::config::{ConfigLoader, SharedConfig};
//! use ems_common::types::{AccessMode, Unit};
//! ```

pub mod config;
pub mod consts;
pub mod prelude;
pub mod types;
pub mod watchdog;
