//! Structural checks on incoming requests.
//!
//! This is the only place a request is rejected before any resolution work.
//! Everything it rejects becomes a transport-level `InvalidArgument`.

use artifact_plugin_tonic_core::{
    artifact_plugin::{Artifact, Error, PluginLocation, Result, StorageLocation},
    proto::{self, artifact_location::Location},
};

/// Turns the wire artifact carried in request field `field` into a domain
/// [`Artifact`].
///
/// # Errors
///
/// [`Error::InvalidRequest`] when the artifact is absent, carries no plugin
/// location, or its configuration blob is empty.
pub fn validate_artifact(artifact: Option<proto::Artifact>, field: &str) -> Result<Artifact> {
    let artifact = artifact.ok_or_else(|| Error::invalid_request(format!("{field} is required")))?;

    let plugin = match artifact.artifact_location.and_then(|l| l.location) {
        Some(Location::Plugin(plugin)) => plugin,
        None => {
            return Err(Error::invalid_request(
                "plugin artifact location is required",
            ));
        }
    };

    if plugin.configuration.is_empty() {
        return Err(Error::invalid_request(
            "plugin artifact configuration is required",
        ));
    }

    Ok(Artifact {
        name: artifact.name,
        path: artifact.path,
        optional: artifact.optional,
        sub_path: artifact.sub_path,
        deleted: artifact.deleted,
        location: StorageLocation::Plugin(PluginLocation {
            name: plugin.name,
            configuration: plugin.configuration,
            key: plugin.key,
        }),
    })
}
