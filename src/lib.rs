//! # dk-installer
//!
//! An engine for provisioning and tearing down multi-service platforms by
//! driving external command-line tools through ordered, recoverable
//! workflows.
//!
//! ## Modules
//!
//! - `subprocess` - Process launching, live no-loss output draining and retries
//! - `session` - Per-run log folder, command artifacts and archives
//! - `workflow` - Steps, requirements and reverse-order compensation
//! - `console` - Operator-facing output, mirrored into the session log
//! - `installer` - Top-level driver mapping outcomes to exit statuses
//! - `definition` - YAML workflow definitions made of command steps
//! - `error` - Error taxonomy and causal-chain helpers
//! - `app` - Configuration and process-wide logging
pub mod app;
pub mod console;
pub mod definition;
pub mod error;
pub mod installer;
pub mod session;
pub mod subprocess;
pub mod workflow;

pub use error::{InstallerError, Result};
