//! Tollgate Shared Types and Utilities
//!
//! This crate contains types and database utilities shared across the
//! Tollgate gateway, billing, and worker crates.

pub mod db;
pub mod types;

pub use db::*;
pub use types::*;
