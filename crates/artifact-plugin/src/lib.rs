#![doc = include_str!("../README.md")]

pub mod artifact;
pub mod config;
pub mod driver;
mod error;
pub mod secret;

pub use crate::artifact::*;
pub use crate::config::resolve::{Credentials, ResolvedStorageConfig, Resolver};
pub use crate::config::{PluginConfig, SecretKeySelector, parse_plugin_configuration};
pub use crate::driver::{ByteSource, Driver, DriverFactory, StorageError, StorageResult};
pub use crate::error::*;
pub use crate::secret::{NamespaceSource, SecretError, SecretStore, SecretStoreError};
