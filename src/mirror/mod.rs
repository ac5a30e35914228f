//! Mirror-side reconstruction.
//!
//! The mirror never computes diffs; it replays the provider's frames in the
//! order received and keeps a read-mostly copy of every source control for
//! rendering. User interaction flows back to the provider as calls on the
//! same endpoint. Observers subscribe through a channel; one aggregate
//! "resources changed" event fires per splice batch, not one per splice.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tracing::{error, warn};
use url::Url;

use crate::diff::{Splice, apply_splices};
use crate::handle::{GroupHandle, ResourceHandle, SourceControlHandle};
use crate::model::{GroupFeatures, InputValidation, SourceControlFeatures};
use crate::protocol::wire::{
    WireError, decode_provider_frame, decode_reply, encode_mirror_frame,
};
use crate::protocol::{
    GroupSpec, GroupSplices, MirrorFrame, ProviderFrame, ProviderReply, SafeCommand,
    WireResourceState,
};
use crate::transport::{Endpoint, FrameHandler, Transport, TransportError};

#[derive(Debug, Error)]
pub enum MirrorError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Wire(#[from] WireError),
    #[error("input validation failed remotely: {0}")]
    Validation(String),
    #[error("unexpected reply from provider")]
    UnexpectedReply,
}

/// Decoded view of one synchronized resource.
#[derive(Debug, Clone, PartialEq)]
pub struct MirrorResource {
    pub handle: ResourceHandle,
    pub uri: Url,
    pub icon_light: Option<Url>,
    pub icon_dark: Option<Url>,
    pub tooltip: String,
    pub strike_through: bool,
    pub faded: bool,
    pub context_value: String,
    pub command: Option<SafeCommand>,
}

impl MirrorResource {
    fn decode(wire: WireResourceState) -> Self {
        let mut icons = wire.icons.into_iter();
        let icon_light = icons.next();
        // A single entry serves both themes.
        let icon_dark = icons.next().or_else(|| icon_light.clone());
        Self {
            handle: wire.handle,
            uri: wire.uri,
            icon_light,
            icon_dark,
            tooltip: wire.tooltip,
            strike_through: wire.strike_through,
            faded: wire.faded,
            context_value: wire.context_value,
            command: wire.command,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MirrorGroup {
    pub handle: GroupHandle,
    pub id: String,
    pub label: String,
    pub features: GroupFeatures,
    pub resources: Vec<MirrorResource>,
}

#[derive(Debug, Clone)]
pub struct MirrorSourceControl {
    pub handle: SourceControlHandle,
    pub id: String,
    pub label: String,
    pub root_uri: Option<Url>,
    pub features: SourceControlFeatures,
    pub groups: Vec<MirrorGroup>,
    pub input_value: String,
    pub input_placeholder: String,
}

impl MirrorSourceControl {
    pub fn group(&self, handle: GroupHandle) -> Option<&MirrorGroup> {
        self.groups.iter().find(|group| group.handle == handle)
    }

    fn group_mut(&mut self, handle: GroupHandle) -> Option<&mut MirrorGroup> {
        self.groups.iter_mut().find(|group| group.handle == handle)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MirrorEvent {
    SourceControlRegistered {
        source_control: SourceControlHandle,
    },
    SourceControlUpdated {
        source_control: SourceControlHandle,
    },
    SourceControlUnregistered {
        source_control: SourceControlHandle,
    },
    GroupsRegistered {
        source_control: SourceControlHandle,
        groups: Vec<GroupHandle>,
    },
    GroupUpdated {
        source_control: SourceControlHandle,
        group: GroupHandle,
    },
    GroupUnregistered {
        source_control: SourceControlHandle,
        group: GroupHandle,
    },
    /// Aggregate notification: one per applied splice batch.
    ResourcesChanged {
        source_control: SourceControlHandle,
        groups: Vec<GroupHandle>,
    },
    InputBoxValueChanged {
        source_control: SourceControlHandle,
        value: String,
    },
    InputBoxPlaceholderChanged {
        source_control: SourceControlHandle,
        placeholder: String,
    },
}

struct MirrorShared {
    controls: Mutex<HashMap<SourceControlHandle, MirrorSourceControl>>,
    selected: Mutex<Option<SourceControlHandle>>,
    subscribers: Mutex<Vec<UnboundedSender<MirrorEvent>>>,
}

impl MirrorShared {
    fn emit(&self, event: MirrorEvent) {
        self.subscribers
            .lock()
            .expect("subscribers lock")
            .retain(|subscriber| subscriber.send(event.clone()).is_ok());
    }

    fn apply(&self, frame: ProviderFrame) {
        match frame {
            ProviderFrame::RegisterSourceControl {
                handle,
                id,
                label,
                root_uri,
            } => {
                self.controls.lock().expect("controls lock").insert(
                    handle,
                    MirrorSourceControl {
                        handle,
                        id,
                        label,
                        root_uri,
                        features: SourceControlFeatures::default(),
                        groups: Vec::new(),
                        input_value: String::new(),
                        input_placeholder: String::new(),
                    },
                );
                self.emit(MirrorEvent::SourceControlRegistered {
                    source_control: handle,
                });
            }
            ProviderFrame::UpdateSourceControl { handle, patch } => {
                let mut controls = self.controls.lock().expect("controls lock");
                let Some(control) = controls.get_mut(&handle) else {
                    warn!(handle = handle.0, "features patch for stale source control");
                    return;
                };
                control.features.apply(&patch);
                drop(controls);
                self.emit(MirrorEvent::SourceControlUpdated {
                    source_control: handle,
                });
            }
            ProviderFrame::UnregisterSourceControl { handle } => {
                let removed = self
                    .controls
                    .lock()
                    .expect("controls lock")
                    .remove(&handle);
                if removed.is_none() {
                    warn!(handle = handle.0, "unregister for stale source control");
                    return;
                }
                let mut selected = self.selected.lock().expect("selected lock");
                if *selected == Some(handle) {
                    *selected = None;
                }
                drop(selected);
                self.emit(MirrorEvent::SourceControlUnregistered {
                    source_control: handle,
                });
            }
            ProviderFrame::RegisterGroups {
                source_control,
                groups,
                splices,
            } => self.register_groups(source_control, groups, splices),
            ProviderFrame::UpdateGroup {
                source_control,
                group,
                patch,
            } => {
                let mut controls = self.controls.lock().expect("controls lock");
                let Some(target) = controls
                    .get_mut(&source_control)
                    .and_then(|control| control.group_mut(group))
                else {
                    warn!(group = group.0, "features patch for stale group");
                    return;
                };
                target.features.apply(&patch);
                drop(controls);
                self.emit(MirrorEvent::GroupUpdated {
                    source_control,
                    group,
                });
            }
            ProviderFrame::UpdateGroupLabel {
                source_control,
                group,
                label,
            } => {
                let mut controls = self.controls.lock().expect("controls lock");
                let Some(target) = controls
                    .get_mut(&source_control)
                    .and_then(|control| control.group_mut(group))
                else {
                    warn!(group = group.0, "label update for stale group");
                    return;
                };
                target.label = label;
                drop(controls);
                self.emit(MirrorEvent::GroupUpdated {
                    source_control,
                    group,
                });
            }
            ProviderFrame::SpliceResourceStates {
                source_control,
                splices,
            } => {
                let changed = self.apply_group_splices(source_control, splices);
                if !changed.is_empty() {
                    self.emit(MirrorEvent::ResourcesChanged {
                        source_control,
                        groups: changed,
                    });
                }
            }
            ProviderFrame::UnregisterGroup {
                source_control,
                group,
            } => {
                let mut controls = self.controls.lock().expect("controls lock");
                let Some(control) = controls.get_mut(&source_control) else {
                    warn!(handle = source_control.0, "group removal for stale source control");
                    return;
                };
                let before = control.groups.len();
                control.groups.retain(|existing| existing.handle != group);
                let removed = control.groups.len() < before;
                drop(controls);
                if removed {
                    self.emit(MirrorEvent::GroupUnregistered {
                        source_control,
                        group,
                    });
                }
            }
            ProviderFrame::SetInputBoxValue {
                source_control,
                value,
            } => {
                let mut controls = self.controls.lock().expect("controls lock");
                let Some(control) = controls.get_mut(&source_control) else {
                    warn!(handle = source_control.0, "input value for stale source control");
                    return;
                };
                control.input_value = value.clone();
                drop(controls);
                self.emit(MirrorEvent::InputBoxValueChanged {
                    source_control,
                    value,
                });
            }
            ProviderFrame::SetInputBoxPlaceholder {
                source_control,
                placeholder,
            } => {
                let mut controls = self.controls.lock().expect("controls lock");
                let Some(control) = controls.get_mut(&source_control) else {
                    warn!(handle = source_control.0, "placeholder for stale source control");
                    return;
                };
                control.input_placeholder = placeholder.clone();
                drop(controls);
                self.emit(MirrorEvent::InputBoxPlaceholderChanged {
                    source_control,
                    placeholder,
                });
            }
        }
    }

    fn register_groups(
        &self,
        source_control: SourceControlHandle,
        groups: Vec<GroupSpec>,
        splices: Vec<GroupSplices>,
    ) {
        let registered: Vec<GroupHandle> = groups.iter().map(|spec| spec.handle).collect();
        {
            let mut controls = self.controls.lock().expect("controls lock");
            let Some(control) = controls.get_mut(&source_control) else {
                warn!(
                    handle = source_control.0,
                    "group registration for stale source control"
                );
                return;
            };
            for spec in groups {
                control.groups.push(MirrorGroup {
                    handle: spec.handle,
                    id: spec.id,
                    label: spec.label,
                    features: spec.features,
                    resources: Vec::new(),
                });
            }
        }
        self.emit(MirrorEvent::GroupsRegistered {
            source_control,
            groups: registered,
        });
        let changed = self.apply_group_splices(source_control, splices);
        if !changed.is_empty() {
            self.emit(MirrorEvent::ResourcesChanged {
                source_control,
                groups: changed,
            });
        }
    }

    /// Apply one batch of splices, sequentially per group and in the order
    /// received. A malformed splice is a protocol bug: the remainder of the
    /// batch is abandoned, already-applied splices stay.
    fn apply_group_splices(
        &self,
        source_control: SourceControlHandle,
        batch: Vec<GroupSplices>,
    ) -> Vec<GroupHandle> {
        let mut controls = self.controls.lock().expect("controls lock");
        let Some(control) = controls.get_mut(&source_control) else {
            warn!(handle = source_control.0, "splices for stale source control");
            return Vec::new();
        };
        let mut changed = Vec::new();
        for group_splices in batch {
            let Some(group) = control.group_mut(group_splices.group) else {
                warn!(group = group_splices.group.0, "splices for stale group");
                continue;
            };
            let splices: Vec<Splice<MirrorResource>> = group_splices
                .splices
                .into_iter()
                .map(|splice| Splice {
                    start: splice.start,
                    delete_count: splice.delete_count,
                    items: splice.items.into_iter().map(MirrorResource::decode).collect(),
                })
                .collect();
            match apply_splices(&mut group.resources, &splices) {
                Ok(()) => changed.push(group_splices.group),
                Err(err) => {
                    error!(
                        group = group_splices.group.0,
                        %err,
                        "malformed splice; abandoning batch"
                    );
                    // Splices applied before the failure stay visible.
                    changed.push(group_splices.group);
                    break;
                }
            }
        }
        changed
    }
}

#[async_trait]
impl FrameHandler for MirrorShared {
    async fn on_event(&self, body: Vec<u8>) {
        match decode_provider_frame(&body) {
            Ok(frame) => self.apply(frame),
            Err(err) => error!(%err, "undecodable provider frame"),
        }
    }

    async fn on_request(&self, _body: Vec<u8>) -> Vec<u8> {
        warn!("provider issued an unexpected request");
        Vec::new()
    }
}

/// Mirror-side service: owns the reconstructed model and forwards user
/// actions to the provider.
pub struct ScmMirror {
    shared: Arc<MirrorShared>,
    endpoint: Endpoint,
}

impl ScmMirror {
    /// Attach the mirror side to its half of a transport pair. Must be
    /// called within a tokio runtime.
    pub fn start(transport: Transport) -> Self {
        let shared = Arc::new(MirrorShared {
            controls: Mutex::new(HashMap::new()),
            selected: Mutex::new(None),
            subscribers: Mutex::new(Vec::new()),
        });
        let endpoint = Endpoint::start(transport, shared.clone());
        Self { shared, endpoint }
    }

    /// Subscribe to model-change events. Dropping the receiver unsubscribes.
    pub fn subscribe(&self) -> UnboundedReceiver<MirrorEvent> {
        let (tx, rx) = unbounded_channel();
        self.shared
            .subscribers
            .lock()
            .expect("subscribers lock")
            .push(tx);
        rx
    }

    pub fn source_controls(&self) -> Vec<SourceControlHandle> {
        let mut handles: Vec<SourceControlHandle> = self
            .shared
            .controls
            .lock()
            .expect("controls lock")
            .keys()
            .copied()
            .collect();
        handles.sort();
        handles
    }

    /// Cloned snapshot of one source control, for rendering or assertions.
    pub fn snapshot(&self, handle: SourceControlHandle) -> Option<MirrorSourceControl> {
        self.shared
            .controls
            .lock()
            .expect("controls lock")
            .get(&handle)
            .cloned()
    }

    pub fn selected(&self) -> Option<SourceControlHandle> {
        *self.shared.selected.lock().expect("selected lock")
    }

    /// User activation of a resource. Resolves to `Ok` even when the handle
    /// went stale on the provider side.
    pub async fn execute_resource_command(
        &self,
        source_control: SourceControlHandle,
        group: GroupHandle,
        resource: ResourceHandle,
        preserve_focus: bool,
    ) -> Result<(), MirrorError> {
        let reply = self
            .call(&MirrorFrame::ExecuteResourceCommand {
                source_control,
                group,
                resource,
                preserve_focus,
            })
            .await?;
        match reply {
            ProviderReply::Ack => Ok(()),
            _ => Err(MirrorError::UnexpectedReply),
        }
    }

    /// Live input validation round trip. A stale handle yields `Ok(None)`.
    pub async fn validate_input(
        &self,
        source_control: SourceControlHandle,
        value: impl Into<String>,
        cursor: usize,
    ) -> Result<Option<InputValidation>, MirrorError> {
        let reply = self
            .call(&MirrorFrame::ValidateInput {
                source_control,
                value: value.into(),
                cursor,
            })
            .await?;
        match reply {
            ProviderReply::Validation { result } => result.map_err(MirrorError::Validation),
            _ => Err(MirrorError::UnexpectedReply),
        }
    }

    /// Quick-diff base lookup for a resource location.
    pub async fn original_resource(
        &self,
        source_control: SourceControlHandle,
        uri: Url,
    ) -> Result<Option<Url>, MirrorError> {
        let reply = self
            .call(&MirrorFrame::ProvideOriginalResource {
                source_control,
                uri,
            })
            .await?;
        match reply {
            ProviderReply::OriginalResource { uri } => Ok(uri),
            _ => Err(MirrorError::UnexpectedReply),
        }
    }

    /// User edit of the commit input; forwarded to the provider without an
    /// echo back.
    pub fn set_input_value(
        &self,
        source_control: SourceControlHandle,
        value: impl Into<String>,
    ) -> Result<(), MirrorError> {
        let value = value.into();
        {
            let mut controls = self.shared.controls.lock().expect("controls lock");
            if let Some(control) = controls.get_mut(&source_control) {
                control.input_value = value.clone();
            }
        }
        self.notify(&MirrorFrame::InputBoxValueChanged {
            source_control,
            value,
        })
    }

    /// User selection of the active source control (or none).
    pub fn set_selected(
        &self,
        source_control: Option<SourceControlHandle>,
    ) -> Result<(), MirrorError> {
        *self.shared.selected.lock().expect("selected lock") = source_control;
        self.notify(&MirrorFrame::SetSelectedSourceControl { source_control })
    }

    fn notify(&self, frame: &MirrorFrame) -> Result<(), MirrorError> {
        let body = encode_mirror_frame(frame)?;
        self.endpoint.send_event(body)?;
        Ok(())
    }

    async fn call(&self, frame: &MirrorFrame) -> Result<ProviderReply, MirrorError> {
        let body = encode_mirror_frame(frame)?;
        let reply = self.endpoint.call(body).await?;
        Ok(decode_reply(&reply)?)
    }
}
