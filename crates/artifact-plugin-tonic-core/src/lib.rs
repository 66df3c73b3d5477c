#![doc = include_str!("../README.md")]

mod common;
pub use common::*;
// Public re-export so downstream crates can reach the domain types via
// `artifact_plugin_tonic_core::artifact_plugin`
pub use artifact_plugin;
