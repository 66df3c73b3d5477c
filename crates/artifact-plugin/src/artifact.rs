//! The artifact a single request operates on.
//!
//! An [`Artifact`] is built fresh from each request's wire form and is never
//! mutated or persisted. It always carries a [`StorageLocation`]; requests
//! without one are rejected before an `Artifact` exists.

/// One logical file or object plus its storage location.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Artifact {
    pub name: String,
    /// Local path inside the workflow container.
    pub path: String,
    /// When set, a missing source is not an error.
    pub optional: bool,
    pub sub_path: String,
    pub deleted: bool,
    pub location: StorageLocation,
}

/// Where the artifact lives. Plugin-delegated storage is the only variant
/// the orchestrator hands to this process.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StorageLocation {
    Plugin(PluginLocation),
}

/// Generic envelope the orchestrator uses when it delegates an artifact to
/// an external plugin.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PluginLocation {
    /// Orchestrator-side plugin name. Informational only.
    pub name: String,
    /// Opaque configuration blob, parsed by [`crate::config`].
    pub configuration: String,
    /// Storage key of the artifact.
    pub key: String,
}

impl Artifact {
    pub const fn plugin_location(&self) -> &PluginLocation {
        match &self.location {
            StorageLocation::Plugin(location) => location,
        }
    }

    /// The key the artifact occupies in storage: the location key with the
    /// sub-path appended.
    pub fn object_key(&self) -> String {
        join_key(&self.plugin_location().key, &self.sub_path)
    }
}

/// Joins two key fragments with exactly one `/`.
pub fn join_key(base: &str, child: &str) -> String {
    let child = child.trim_start_matches('/');
    if child.is_empty() {
        return base.to_string();
    }
    if base.is_empty() {
        return child.to_string();
    }
    format!("{}/{}", base.trim_end_matches('/'), child)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn artifact(key: &str, sub_path: &str) -> Artifact {
        Artifact {
            name: "out".to_string(),
            path: "/tmp/out".to_string(),
            optional: false,
            sub_path: sub_path.to_string(),
            deleted: false,
            location: StorageLocation::Plugin(PluginLocation {
                key: key.to_string(),
                ..Default::default()
            }),
        }
    }

    #[test]
    fn object_key_appends_sub_path() {
        assert_eq!(artifact("runs/1", "").object_key(), "runs/1");
        assert_eq!(artifact("runs/1", "logs").object_key(), "runs/1/logs");
        assert_eq!(artifact("runs/1/", "/logs").object_key(), "runs/1/logs");
    }

    #[test]
    fn join_key_handles_empty_base() {
        assert_eq!(join_key("", "a.txt"), "a.txt");
        assert_eq!(join_key("dir", ""), "dir");
    }
}
