//! Domain to wire conversions, used by clients building requests.
//!
//! The opposite direction is the server's request validator, since a wire
//! artifact may be structurally incomplete.

use crate::proto;
use artifact_plugin::{Artifact, PluginLocation, StorageLocation};

impl From<PluginLocation> for proto::PluginArtifact {
    fn from(location: PluginLocation) -> Self {
        Self {
            name: location.name,
            configuration: location.configuration,
            key: location.key,
        }
    }
}

impl From<StorageLocation> for proto::ArtifactLocation {
    fn from(location: StorageLocation) -> Self {
        match location {
            StorageLocation::Plugin(plugin) => Self {
                archive_logs: None,
                location: Some(proto::artifact_location::Location::Plugin(plugin.into())),
            },
        }
    }
}

impl From<Artifact> for proto::Artifact {
    fn from(artifact: Artifact) -> Self {
        Self {
            name: artifact.name,
            path: artifact.path,
            optional: artifact.optional,
            sub_path: artifact.sub_path,
            deleted: artifact.deleted,
            artifact_location: Some(artifact.location.into()),
        }
    }
}
