//! Strict per-request storage configuration.
//!
//! Every request carries a YAML blob (JSON is accepted as a YAML subset)
//! describing the bucket, endpoint, and where the credentials live. The blob
//! is parsed under strict field checking: any field outside the schema, at
//! any nesting level, fails the parse so that typos in caller-supplied
//! configuration are never silently ignored.
//!
//! ```yaml
//! bucket: my-bucket
//! endpoint: minio:9000
//! insecure: true
//! accessKeySecret:
//!   name: my-minio-cred
//!   key: accesskey
//! secretKeySecret:
//!   name: my-minio-cred
//!   key: secretkey
//! ```
//!
//! Resolution of the parsed configuration into credentials lives in
//! [`resolve`].

pub mod resolve;

use crate::Result;
use serde::{Deserialize, Serialize};

/// The configuration schema accepted in a plugin location's blob.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct PluginConfig {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub bucket: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub endpoint: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub region: String,

    /// Absence means secure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub insecure: Option<bool>,

    /// Use credentials supplied by the execution environment.
    #[serde(default, rename = "useSDKCreds", skip_serializing_if = "is_false")]
    pub use_sdk_creds: bool,

    #[serde(default, rename = "roleARN", skip_serializing_if = "String::is_empty")]
    pub role_arn: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_key_secret: Option<SecretKeySelector>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_key_secret: Option<SecretKeySelector>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_token_secret: Option<SecretKeySelector>,
}

impl PluginConfig {
    /// The wire `insecure` flag inverted; unset means secure.
    pub fn secure(&self) -> bool {
        !self.insecure.unwrap_or(false)
    }
}

/// Points at one scalar value inside a named secret.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SecretKeySelector {
    pub name: String,
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub optional: Option<bool>,
}

impl SecretKeySelector {
    pub fn is_optional(&self) -> bool {
        self.optional.unwrap_or(false)
    }

    /// A selector missing either its secret name or its key points nowhere.
    pub fn is_complete(&self) -> bool {
        !self.name.is_empty() && !self.key.is_empty()
    }
}

#[allow(clippy::trivially_copy_pass_by_ref)]
const fn is_false(value: &bool) -> bool {
    !*value
}

/// Parses a configuration blob under strict field checking.
///
/// A blob that is empty or only whitespace yields the default
/// configuration.
///
/// # Errors
///
/// Returns [`crate::Error::ConfigParse`] if the blob is not valid YAML, a
/// field has the wrong shape, or any unknown field is present.
pub fn parse_plugin_configuration(blob: &str) -> Result<PluginConfig> {
    if blob.trim().is_empty() {
        return Ok(PluginConfig::default());
    }
    Ok(serde_yaml::from_str(blob)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    #[test]
    fn parses_basic_configuration() {
        let config = parse_plugin_configuration(
            r"
bucket: my-bucket
endpoint: minio:9000
region: us-east-1
insecure: true
useSDKCreds: false
",
        )
        .unwrap();

        assert_eq!(config.bucket, "my-bucket");
        assert_eq!(config.endpoint, "minio:9000");
        assert_eq!(config.region, "us-east-1");
        assert_eq!(config.insecure, Some(true));
        assert!(!config.secure());
        assert!(!config.use_sdk_creds);
    }

    #[test]
    fn parses_all_three_secret_references() {
        let config = parse_plugin_configuration(
            r"
bucket: my-bucket
endpoint: minio:9000
roleARN: arn:aws:iam::123456789012:role/artifacts
accessKeySecret:
  name: my-minio-cred
  key: accesskey
secretKeySecret:
  name: my-minio-cred
  key: secretkey
sessionTokenSecret:
  name: my-minio-cred
  key: sessiontoken
  optional: true
",
        )
        .unwrap();

        let access = config.access_key_secret.as_ref().unwrap();
        assert_eq!(access.name, "my-minio-cred");
        assert_eq!(access.key, "accesskey");
        assert!(!access.is_optional());

        let secret = config.secret_key_secret.as_ref().unwrap();
        assert_eq!(secret.key, "secretkey");

        let session = config.session_token_secret.as_ref().unwrap();
        assert_eq!(session.key, "sessiontoken");
        assert!(session.is_optional());

        assert_eq!(config.role_arn, "arn:aws:iam::123456789012:role/artifacts");
        assert!(config.secure());
    }

    #[test]
    fn empty_blob_is_default() {
        assert_eq!(parse_plugin_configuration("").unwrap(), PluginConfig::default());
        assert_eq!(
            parse_plugin_configuration("  \n\t").unwrap(),
            PluginConfig::default()
        );
    }

    #[test]
    fn json_blob_is_accepted() {
        let config =
            parse_plugin_configuration(r#"{"bucket": "b", "useSDKCreds": true}"#).unwrap();
        assert_eq!(config.bucket, "b");
        assert!(config.use_sdk_creds);
    }

    #[test]
    fn unknown_fields_fail_at_every_level() {
        let blobs = [
            "bucket: my-bucket\nunknownField: value\n",
            "unknownField: value\nbucket: my-bucket\n",
            "bucket: b\naccessKeySecret:\n  name: n\n  key: k\n  extra: 1\n",
            "bucket: b\nsessionTokenSecret:\n  name: n\n  key: k\n  Optional: true\n",
            // Field names are case sensitive.
            "Bucket: b\n",
            "useSdkCreds: true\n",
        ];

        for blob in blobs {
            let err = parse_plugin_configuration(blob).unwrap_err();
            assert!(matches!(err, Error::ConfigParse(_)), "{blob:?} parsed");
            assert!(
                err.to_string()
                    .starts_with("failed to parse plugin configuration")
            );
        }
    }

    #[test]
    fn malformed_blobs_fail() {
        for blob in [
            "bucket: my-bucket\n  invalid: [",
            "bucket: b\naccessKeySecret: \"invalid-string-instead-of-object\"\n",
            "insecure: maybe\n",
        ] {
            assert!(matches!(
                parse_plugin_configuration(blob),
                Err(Error::ConfigParse(_))
            ));
        }
    }

    #[test]
    fn serialize_then_parse_keeps_known_fields() {
        let configs = [
            PluginConfig::default(),
            PluginConfig {
                bucket: "b".to_string(),
                endpoint: "e:9000".to_string(),
                insecure: Some(true),
                ..Default::default()
            },
            PluginConfig {
                bucket: "b".to_string(),
                region: "eu-west-1".to_string(),
                insecure: Some(false),
                use_sdk_creds: true,
                role_arn: "arn".to_string(),
                ..Default::default()
            },
            PluginConfig {
                access_key_secret: Some(SecretKeySelector {
                    name: "cred".to_string(),
                    key: "ak".to_string(),
                    optional: None,
                }),
                secret_key_secret: Some(SecretKeySelector {
                    name: "cred".to_string(),
                    key: "sk".to_string(),
                    optional: Some(false),
                }),
                session_token_secret: Some(SecretKeySelector {
                    name: "cred".to_string(),
                    key: "st".to_string(),
                    optional: Some(true),
                }),
                ..Default::default()
            },
        ];

        for config in configs {
            let yaml = serde_yaml::to_string(&config).unwrap();
            assert_eq!(parse_plugin_configuration(&yaml).unwrap(), config);
        }
    }

    #[test]
    fn serialization_uses_wire_field_names() {
        let config = PluginConfig {
            use_sdk_creds: true,
            role_arn: "arn".to_string(),
            access_key_secret: Some(SecretKeySelector::default()),
            ..Default::default()
        };
        let yaml = serde_yaml::to_string(&config).unwrap();
        assert!(yaml.contains("useSDKCreds: true"));
        assert!(yaml.contains("roleARN: arn"));
        assert!(yaml.contains("accessKeySecret:"));
        assert!(!yaml.contains("bucket"));
    }
}
