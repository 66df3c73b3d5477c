//! gRPC service implementation and request validation.
//!
//! ## Structure
//!
//! - [`handler`] - gRPC service entry point (`PluginService`).
//! - [`validator`] - Structural request checks run before any resolution.

pub mod handler;
pub mod validator;
