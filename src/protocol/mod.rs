//! Wire frames exchanged between the provider and mirror sides.
//!
//! Provider→mirror traffic is fire-and-forget: frames apply in the order
//! they were sent. Mirror→provider traffic mixes notifications with
//! request/response calls; replies are [`ProviderReply`] values correlated by
//! the transport layer.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::diff::Splice;
use crate::handle::{GroupHandle, ProxyToken, ResourceHandle, SourceControlHandle};
use crate::model::{
    GroupFeatures, GroupFeaturesPatch, InputValidation, SourceControlFeaturesPatch,
};

pub mod wire;

/// Command identifiers the mirror may invoke directly. Anything else is
/// hidden behind a [`ProxyToken`] so the mirror can never inject arguments
/// into arbitrary commands.
pub static TRUSTED_COMMANDS: Lazy<HashSet<&'static str>> =
    Lazy::new(|| HashSet::from(["editor.open", "editor.diff", "editor.changes"]));

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SafeCommand {
    Trusted {
        id: String,
        title: String,
        #[serde(default)]
        arguments: Vec<serde_json::Value>,
    },
    Proxied {
        token: ProxyToken,
    },
}

/// Flat encoding of one resource state at the moment it crosses the
/// boundary. `icons` holds zero to two entries: light/default first, dark
/// second only when it differs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireResourceState {
    pub handle: ResourceHandle,
    pub uri: Url,
    pub icons: Vec<Url>,
    pub tooltip: String,
    pub strike_through: bool,
    pub faded: bool,
    pub context_value: String,
    pub command: Option<SafeCommand>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupSpec {
    pub handle: GroupHandle,
    pub id: String,
    pub label: String,
    pub features: GroupFeatures,
}

/// All splices for one group within a single batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupSplices {
    pub group: GroupHandle,
    pub splices: Vec<Splice<WireResourceState>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProviderFrame {
    RegisterSourceControl {
        handle: SourceControlHandle,
        id: String,
        label: String,
        root_uri: Option<Url>,
    },
    UpdateSourceControl {
        handle: SourceControlHandle,
        patch: SourceControlFeaturesPatch,
    },
    UnregisterSourceControl {
        handle: SourceControlHandle,
    },
    /// Atomic group registration: metadata together with the first resource
    /// splice, so the mirror never sees a group without a resource list.
    RegisterGroups {
        source_control: SourceControlHandle,
        groups: Vec<GroupSpec>,
        splices: Vec<GroupSplices>,
    },
    UpdateGroup {
        source_control: SourceControlHandle,
        group: GroupHandle,
        patch: GroupFeaturesPatch,
    },
    UpdateGroupLabel {
        source_control: SourceControlHandle,
        group: GroupHandle,
        label: String,
    },
    SpliceResourceStates {
        source_control: SourceControlHandle,
        splices: Vec<GroupSplices>,
    },
    UnregisterGroup {
        source_control: SourceControlHandle,
        group: GroupHandle,
    },
    SetInputBoxValue {
        source_control: SourceControlHandle,
        value: String,
    },
    SetInputBoxPlaceholder {
        source_control: SourceControlHandle,
        placeholder: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MirrorFrame {
    ExecuteResourceCommand {
        source_control: SourceControlHandle,
        group: GroupHandle,
        resource: ResourceHandle,
        preserve_focus: bool,
    },
    ValidateInput {
        source_control: SourceControlHandle,
        value: String,
        cursor: usize,
    },
    ProvideOriginalResource {
        source_control: SourceControlHandle,
        uri: Url,
    },
    InputBoxValueChanged {
        source_control: SourceControlHandle,
        value: String,
    },
    SetSelectedSourceControl {
        source_control: Option<SourceControlHandle>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProviderReply {
    Ack,
    Validation {
        result: Result<Option<InputValidation>, String>,
    },
    OriginalResource {
        uri: Option<Url>,
    },
}
