//! # burrow-common
//!
//! Shared types for the burrow container networking manager.
//!
//! This crate provides the error type used across the burrow crates.

#![warn(missing_docs)]

pub mod error;

pub use error::{BurrowError, BurrowResult};
