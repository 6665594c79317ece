//! # Yiba Verified Common Library
//!
//! Shared code for the Yiba Verified services including:
//! - Error taxonomy and crate-wide Result alias
//! - Database schema, migrations, and row models
//! - Roles, capability table, and actor resolution
//! - The audited-mutation protocol (the only sanctioned write path)
//! - Shared API request/response types
//! - Configuration loading

pub mod actor;
pub mod api;
pub mod audit;
pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod mutate;
pub mod roles;

pub use error::{Error, Result};
pub use roles::{Capability, Role};
