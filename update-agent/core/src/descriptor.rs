//! The version descriptor published next to (and inside) a bundle.
//!
//! Two encodings exist in the wild: a structured JSON object with a required
//! `version` field, and a plain text body whose entire trimmed content is the
//! version string. Remote version-check endpoints may serve either.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("descriptor body is empty")]
    Empty,
    #[error("failed deserializing descriptor JSON")]
    Json(#[source] serde_path_to_error::Error<serde_json::Error>),
    #[error("descriptor JSON carries an empty `version` field")]
    EmptyVersion,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VersionDescriptor {
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_semver: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_notes: Option<String>,
    /// Installed-app versions this bundle is built for, keyed by platform.
    /// Absent means every app version is targeted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_versions: Option<HashMap<String, Vec<String>>>,
}

impl VersionDescriptor {
    /// Parses a structured JSON descriptor.
    pub fn from_json(body: &str) -> Result<Self, Error> {
        let de = &mut serde_json::Deserializer::from_str(body);
        let descriptor: Self =
            serde_path_to_error::deserialize(de).map_err(Error::Json)?;
        if descriptor.version.trim().is_empty() {
            return Err(Error::EmptyVersion);
        }
        Ok(descriptor)
    }

    /// Treats the entire trimmed body as the version string.
    pub fn from_plain_text(body: &str) -> Result<Self, Error> {
        let version = body.trim();
        if version.is_empty() {
            return Err(Error::Empty);
        }
        Ok(Self {
            version: version.to_owned(),
            ..Self::default()
        })
    }

    /// Parses a descriptor body of unknown encoding, preferring JSON.
    pub fn parse(body: &str) -> Result<Self, Error> {
        if body.trim_start().starts_with('{') {
            Self::from_json(body)
        } else {
            Self::from_plain_text(body)
        }
    }
}
