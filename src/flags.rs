//! Flag-schema file loading.
//!
//! Each application type ships a `<appType>Flags.json` document next to the
//! executable describing the launch flags a UI can offer. Loading is a thin
//! deserialization wrapper; a missing or malformed document degrades to an
//! empty schema with a logged warning.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// One configurable launch flag.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct Flag {
    pub help: String,
    pub default: serde_json::Value,
    pub nargs: serde_json::Value,
    #[serde(rename = "const")]
    pub const_value: serde_json::Value,
    #[serde(rename = "type")]
    pub flag_type: String,
    pub group: serde_json::Value,
    pub argument: String,
    pub metavar: serde_json::Value,
}

/// A named group of flags.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct Group {
    pub description: String,
}

/// The full flag schema for one application type.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct FlagsAndGroups {
    pub flags: HashMap<String, Flag>,
    pub groups: HashMap<String, Group>,
}

/// Loads the flag schema for `app_type` from `dir/<appType>Flags.json`.
///
/// Missing and malformed documents both yield the empty schema: flag files
/// are optional UI metadata, never a reason to fail an operation.
pub fn read_flags(dir: &Path, app_type: &str) -> FlagsAndGroups {
    let path = dir.join(format!("{app_type}Flags.json"));
    match fs::read_to_string(&path) {
        Ok(content) => match serde_json::from_str(&content) {
            Ok(schema) => schema,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "flags document invalid");
                FlagsAndGroups::default()
            }
        },
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "flags document unreadable");
            FlagsAndGroups::default()
        }
    }
}
