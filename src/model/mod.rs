//! Declarative data model owned by the provider side.
//!
//! Everything here is plain value data. Handles are assigned only when a
//! value crosses the wire (see [`crate::protocol`]); the provider holds
//! resource states as unadorned arrays and re-declares them wholesale on
//! every change.

use serde::{Deserialize, Serialize};
use url::Url;

pub mod order;

/// A command attached to a resource, an accept-input hook, or a status bar
/// entry. Arguments are arbitrary JSON, forwarded opaquely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandDescriptor {
    pub id: String,
    pub title: String,
    pub tooltip: Option<String>,
    #[serde(default)]
    pub arguments: Vec<serde_json::Value>,
}

impl CommandDescriptor {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            tooltip: None,
            arguments: Vec::new(),
        }
    }
}

/// Render hints for one resource state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Decorations {
    pub icon_light: Option<Url>,
    pub icon_dark: Option<Url>,
    pub tooltip: Option<String>,
    pub strike_through: bool,
    pub faded: bool,
}

/// One entry in a source control's change list (e.g. one modified file).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceState {
    pub uri: Url,
    #[serde(default)]
    pub decorations: Decorations,
    pub context_value: Option<String>,
    pub command: Option<CommandDescriptor>,
}

impl ResourceState {
    pub fn new(uri: Url) -> Self {
        Self {
            uri,
            decorations: Decorations::default(),
            context_value: None,
            command: None,
        }
    }
}

/// Mutable presentation features of a source control.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceControlFeatures {
    pub count: Option<u64>,
    pub quick_diff: bool,
    pub commit_template: Option<String>,
    pub accept_input_command: Option<CommandDescriptor>,
    pub status_bar_commands: Vec<CommandDescriptor>,
}

/// Merge-patch for [`SourceControlFeatures`]. A `Some` field always wins over
/// the current value; `None` leaves the field untouched. Optional target
/// fields are cleared by sending `Some(None)`.
///
/// The double-option fields encode as absent-vs-null so a clear survives the
/// frame codec.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceControlFeaturesPatch {
    #[serde(default, skip_serializing_if = "Option::is_none", with = "double_option")]
    pub count: Option<Option<u64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quick_diff: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "double_option")]
    pub commit_template: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "double_option")]
    pub accept_input_command: Option<Option<CommandDescriptor>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_bar_commands: Option<Vec<CommandDescriptor>>,
}

/// Field codec for `Option<Option<T>>` patch fields: an absent field means
/// "leave untouched", an explicit `null` means "clear". The plain derive
/// flattens `Some(None)` to bare `null`, which reads back as absent.
mod double_option {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<T, S>(field: &Option<Option<T>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        T: Serialize,
        S: Serializer,
    {
        // The outer `None` is filtered by `skip_serializing_if`.
        field.as_ref().unwrap_or(&None).serialize(serializer)
    }

    pub fn deserialize<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
    where
        T: Deserialize<'de>,
        D: Deserializer<'de>,
    {
        Option::<T>::deserialize(deserializer).map(Some)
    }
}

impl SourceControlFeatures {
    pub fn apply(&mut self, patch: &SourceControlFeaturesPatch) {
        if let Some(count) = &patch.count {
            self.count = *count;
        }
        if let Some(quick_diff) = patch.quick_diff {
            self.quick_diff = quick_diff;
        }
        if let Some(template) = &patch.commit_template {
            self.commit_template = template.clone();
        }
        if let Some(accept) = &patch.accept_input_command {
            self.accept_input_command = accept.clone();
        }
        if let Some(commands) = &patch.status_bar_commands {
            self.status_bar_commands = commands.clone();
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupFeatures {
    pub hide_when_empty: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupFeaturesPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hide_when_empty: Option<bool>,
}

impl GroupFeatures {
    pub fn apply(&mut self, patch: &GroupFeaturesPatch) {
        if let Some(hide) = patch.hide_when_empty {
            self.hide_when_empty = hide;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationSeverity {
    Error,
    Warning,
    Information,
}

/// Result of running the user-supplied input validator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputValidation {
    pub message: String,
    pub severity: ValidationSeverity,
}
