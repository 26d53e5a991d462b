//! # MTC Common Library
//!
//! Shared code for the MeSH-tagged corpus builder:
//! - Error type and result alias
//! - Configuration loading (CLI → ENV → TOML → defaults)

pub mod config;
pub mod error;

pub use error::{Error, Result};
