//! Provider-side model.
//!
//! Application code declares source controls, resource groups and resource
//! states through the builder API here; the provider converts those
//! declarations into diff-based wire updates for the mirror. Mutations are
//! cheap synchronous calls that mark state dirty; a per-source-control flush
//! task coalesces everything declared within one scheduling tick into a
//! single round of frames.
//!
//! All registry mutation and diff computation for one source control is
//! serialized behind its own locks, so the ordering invariants hold even on
//! a multi-threaded runtime.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tracing::{debug, error, warn};
use url::Url;

use crate::diff::{Splice, sorted_diff};
use crate::handle::{
    GroupHandle, HandleAllocator, ProxyToken, ResourceHandle, SourceControlHandle,
};
use crate::model::order::compare_resource_states;
use crate::model::{
    CommandDescriptor, GroupFeatures, GroupFeaturesPatch, InputValidation, ResourceState,
    SourceControlFeatures, SourceControlFeaturesPatch,
};
use crate::protocol::wire::{decode_mirror_frame, encode_provider_frame, encode_reply};
use crate::protocol::{
    GroupSpec, GroupSplices, MirrorFrame, ProviderFrame, ProviderReply, SafeCommand,
    TRUSTED_COMMANDS, WireResourceState,
};
use crate::transport::{Endpoint, FrameHandler, Transport};

/// User-supplied commit-input validator: `(text, cursor) -> validation?`.
pub type InputValidator =
    Arc<dyn Fn(&str, usize) -> anyhow::Result<Option<InputValidation>> + Send + Sync>;

/// Quick-diff base lookup: maps a resource location to its original.
pub type OriginalResourceProvider = Arc<dyn Fn(&Url) -> Option<Url> + Send + Sync>;

/// Seam to whatever executes commands on the provider side. The sync layer
/// resolves handles and hands over the descriptor it stored itself; nothing
/// supplied by the mirror reaches the dispatcher.
#[async_trait]
pub trait CommandDispatcher: Send + Sync {
    async fn execute(&self, command: &CommandDescriptor, preserve_focus: bool)
    -> anyhow::Result<()>;
}

struct InputState {
    value: String,
    placeholder: String,
    validator: Option<InputValidator>,
}

#[derive(Default)]
struct PendingBatch {
    created: Vec<GroupHandle>,
    updated: Vec<GroupHandle>,
}

#[derive(Clone)]
struct SentEntry {
    handle: ResourceHandle,
    proxy: Option<ProxyToken>,
}

/// What the mirror currently believes this group contains.
#[derive(Default)]
struct SentSnapshot {
    states: Vec<ResourceState>,
    entries: Vec<SentEntry>,
}

struct GroupState {
    handle: GroupHandle,
    id: String,
    label: Mutex<String>,
    features: Mutex<GroupFeatures>,
    declared: Mutex<Vec<ResourceState>>,
    sent: Mutex<SentSnapshot>,
    disposed: AtomicBool,
}

struct ControlState {
    handle: SourceControlHandle,
    id: String,
    label: String,
    root_uri: Option<Url>,
    endpoint: Endpoint,
    features: Mutex<SourceControlFeatures>,
    groups: Mutex<HashMap<GroupHandle, Arc<GroupState>>>,
    group_handles: HandleAllocator,
    resource_handles: HandleAllocator,
    proxy_tokens: HandleAllocator,
    proxies: Mutex<HashMap<ProxyToken, CommandDescriptor>>,
    input: Mutex<InputState>,
    quick_diff: Mutex<Option<OriginalResourceProvider>>,
    selected: AtomicBool,
    selection_watchers: Mutex<Vec<UnboundedSender<bool>>>,
    pending: Mutex<PendingBatch>,
    flush_notify: Notify,
    disposed: AtomicBool,
}

impl ControlState {
    fn send(&self, frame: &ProviderFrame) {
        if self.disposed.load(Ordering::SeqCst) {
            return;
        }
        match encode_provider_frame(frame) {
            Ok(body) => {
                if self.endpoint.send_event(body).is_err() {
                    debug!(handle = self.handle.0, "mirror endpoint gone");
                }
            }
            Err(err) => error!(%err, "failed to encode provider frame"),
        }
    }

    fn schedule_created(&self, group: GroupHandle) {
        self.pending
            .lock()
            .expect("pending batch lock")
            .created
            .push(group);
        self.flush_notify.notify_one();
    }

    fn schedule_update(&self, group: GroupHandle) {
        {
            let mut pending = self.pending.lock().expect("pending batch lock");
            // A group awaiting registration carries its latest declaration in
            // the registration splice already.
            if pending.created.contains(&group) || pending.updated.contains(&group) {
                return;
            }
            pending.updated.push(group);
        }
        self.flush_notify.notify_one();
    }

    fn group_pending_registration(&self, group: GroupHandle) -> bool {
        self.pending
            .lock()
            .expect("pending batch lock")
            .created
            .contains(&group)
    }

    fn send_features_patch(&self, patch: SourceControlFeaturesPatch) {
        self.features
            .lock()
            .expect("features lock")
            .apply(&patch);
        self.send(&ProviderFrame::UpdateSourceControl {
            handle: self.handle,
            patch,
        });
    }

    fn notify_selection(&self, selected: bool) {
        self.selected.store(selected, Ordering::SeqCst);
        self.selection_watchers
            .lock()
            .expect("selection watchers lock")
            .retain(|watcher| watcher.send(selected).is_ok());
    }

    /// Encode one freshly inserted resource state, assigning its wire handle
    /// and, for non-trusted commands, a capability token.
    fn encode_resource(&self, state: &ResourceState) -> (WireResourceState, SentEntry) {
        let handle = ResourceHandle(self.resource_handles.next());
        let (command, proxy) = match &state.command {
            None => (None, None),
            Some(cmd) if TRUSTED_COMMANDS.contains(cmd.id.as_str()) => (
                Some(SafeCommand::Trusted {
                    id: cmd.id.clone(),
                    title: cmd.title.clone(),
                    arguments: cmd.arguments.clone(),
                }),
                None,
            ),
            Some(cmd) => {
                let token = ProxyToken(self.proxy_tokens.next());
                self.proxies
                    .lock()
                    .expect("proxy table lock")
                    .insert(token, cmd.clone());
                (Some(SafeCommand::Proxied { token }), Some(token))
            }
        };
        let decorations = &state.decorations;
        let icons = match (&decorations.icon_light, &decorations.icon_dark) {
            (None, None) => Vec::new(),
            (Some(light), None) => vec![light.clone()],
            (None, Some(dark)) => vec![dark.clone()],
            (Some(light), Some(dark)) if light == dark => vec![light.clone()],
            (Some(light), Some(dark)) => vec![light.clone(), dark.clone()],
        };
        let wire = WireResourceState {
            handle,
            uri: state.uri.clone(),
            icons,
            tooltip: decorations.tooltip.clone().unwrap_or_default(),
            strike_through: decorations.strike_through,
            faded: decorations.faded,
            context_value: state.context_value.clone().unwrap_or_default(),
            command,
        };
        (wire, SentEntry { handle, proxy })
    }

    fn retire_entry(&self, entry: &SentEntry) {
        if let Some(token) = entry.proxy {
            self.proxies
                .lock()
                .expect("proxy table lock")
                .remove(&token);
        }
    }

    /// Diff the group's declared states against the last-sent snapshot and
    /// produce the wire splices, keeping the aligned handle list in step.
    fn flush_group(&self, group: &GroupState) -> Vec<Splice<WireResourceState>> {
        let mut next = group.declared.lock().expect("declared lock").clone();
        next.sort_by(compare_resource_states);

        let mut sent = group.sent.lock().expect("sent snapshot lock");
        let splices = sorted_diff(&sent.states, &next, compare_resource_states);
        if splices.is_empty() {
            return Vec::new();
        }

        let mut wire = Vec::with_capacity(splices.len());
        for splice in &splices {
            let mut items = Vec::with_capacity(splice.items.len());
            let mut entries = Vec::with_capacity(splice.items.len());
            for state in &splice.items {
                let (wire_state, entry) = self.encode_resource(state);
                items.push(wire_state);
                entries.push(entry);
            }
            let removed = splice.start..splice.start + splice.delete_count;
            for entry in &sent.entries[removed.clone()] {
                self.retire_entry(entry);
            }
            sent.entries.splice(removed, entries);
            wire.push(Splice {
                start: splice.start,
                delete_count: splice.delete_count,
                items,
            });
        }
        sent.states = next;
        wire
    }
}

async fn flush_loop(control: Arc<ControlState>) {
    loop {
        control.flush_notify.notified().await;
        if control.disposed.load(Ordering::SeqCst) {
            break;
        }
        flush_once(&control);
    }
}

fn flush_once(control: &ControlState) {
    let PendingBatch { created, updated } = {
        let mut pending = control.pending.lock().expect("pending batch lock");
        std::mem::take(&mut *pending)
    };
    if created.is_empty() && updated.is_empty() {
        return;
    }

    let groups: HashMap<GroupHandle, Arc<GroupState>> = control
        .groups
        .lock()
        .expect("groups lock")
        .clone();

    let mut specs = Vec::new();
    let mut initial_splices = Vec::new();
    for handle in &created {
        let Some(group) = groups.get(handle) else {
            // Disposed before it was ever registered; never mention it.
            continue;
        };
        if group.disposed.load(Ordering::SeqCst) {
            continue;
        }
        specs.push(GroupSpec {
            handle: *handle,
            id: group.id.clone(),
            label: group.label.lock().expect("label lock").clone(),
            features: group.features.lock().expect("features lock").clone(),
        });
        let splices = control.flush_group(group);
        if !splices.is_empty() {
            initial_splices.push(GroupSplices {
                group: *handle,
                splices,
            });
        }
    }
    if !specs.is_empty() {
        debug!(
            source_control = control.handle.0,
            groups = specs.len(),
            "registering groups"
        );
        control.send(&ProviderFrame::RegisterGroups {
            source_control: control.handle,
            groups: specs,
            splices: initial_splices,
        });
    }

    let mut updates = Vec::new();
    for handle in &updated {
        if created.contains(handle) {
            continue;
        }
        let Some(group) = groups.get(handle) else {
            continue;
        };
        if group.disposed.load(Ordering::SeqCst) {
            continue;
        }
        let splices = control.flush_group(group);
        if !splices.is_empty() {
            updates.push(GroupSplices {
                group: *handle,
                splices,
            });
        }
    }
    // A flush with no net change sends nothing.
    if !updates.is_empty() {
        debug!(
            source_control = control.handle.0,
            groups = updates.len(),
            "splicing resource states"
        );
        control.send(&ProviderFrame::SpliceResourceStates {
            source_control: control.handle,
            splices: updates,
        });
    }
}

struct ProviderShared {
    sc_handles: HandleAllocator,
    controls: Mutex<HashMap<SourceControlHandle, Arc<ControlState>>>,
    selected: Mutex<Option<SourceControlHandle>>,
    dispatcher: Arc<dyn CommandDispatcher>,
}

impl ProviderShared {
    fn control(&self, handle: SourceControlHandle) -> Option<Arc<ControlState>> {
        self.controls
            .lock()
            .expect("controls lock")
            .get(&handle)
            .cloned()
    }

    fn handle_event(&self, frame: MirrorFrame) {
        match frame {
            MirrorFrame::InputBoxValueChanged {
                source_control,
                value,
            } => {
                let Some(control) = self.control(source_control) else {
                    debug!(handle = source_control.0, "input edit for stale handle");
                    return;
                };
                // A user edit; do not echo back to the mirror.
                control.input.lock().expect("input lock").value = value;
            }
            MirrorFrame::SetSelectedSourceControl { source_control } => {
                self.set_selected(source_control);
            }
            other => warn!(?other, "request frame received as event"),
        }
    }

    fn set_selected(&self, handle: Option<SourceControlHandle>) {
        let previous = {
            let mut slot = self.selected.lock().expect("selected slot lock");
            let previous = *slot;
            if previous == handle {
                return;
            }
            *slot = handle;
            previous
        };
        // Select the new control before deselecting the old one so observers
        // never see zero active controls during a switch.
        if let Some(new) = handle {
            if let Some(control) = self.control(new) {
                control.notify_selection(true);
            }
        }
        if let Some(old) = previous {
            if let Some(control) = self.control(old) {
                control.notify_selection(false);
            }
        }
    }

    async fn handle_request(&self, frame: MirrorFrame) -> ProviderReply {
        match frame {
            MirrorFrame::ExecuteResourceCommand {
                source_control,
                group,
                resource,
                preserve_focus,
            } => {
                self.execute_resource_command(source_control, group, resource, preserve_focus)
                    .await;
                ProviderReply::Ack
            }
            MirrorFrame::ValidateInput {
                source_control,
                value,
                cursor,
            } => {
                let result = self.validate_input(source_control, &value, cursor);
                ProviderReply::Validation { result }
            }
            MirrorFrame::ProvideOriginalResource {
                source_control,
                uri,
            } => {
                let uri = self
                    .control(source_control)
                    .and_then(|control| {
                        control
                            .quick_diff
                            .lock()
                            .expect("quick diff lock")
                            .clone()
                    })
                    .and_then(|provider| provider(&uri));
                ProviderReply::OriginalResource { uri }
            }
            other => {
                self.handle_event(other);
                ProviderReply::Ack
            }
        }
    }

    async fn execute_resource_command(
        &self,
        source_control: SourceControlHandle,
        group: GroupHandle,
        resource: ResourceHandle,
        preserve_focus: bool,
    ) {
        // Stale handles at any level are a silent no-op; the mirror may
        // legitimately lag a disposal.
        let Some(control) = self.control(source_control) else {
            debug!(handle = source_control.0, "execute on stale source control");
            return;
        };
        let group_state = control
            .groups
            .lock()
            .expect("groups lock")
            .get(&group)
            .cloned();
        let Some(group_state) = group_state else {
            debug!(group = group.0, "execute on stale group");
            return;
        };
        let command = {
            let sent = group_state.sent.lock().expect("sent snapshot lock");
            sent.entries
                .iter()
                .position(|entry| entry.handle == resource)
                .and_then(|index| sent.states.get(index))
                .and_then(|state| state.command.clone())
        };
        let Some(command) = command else {
            debug!(resource = resource.0, "no command for resource");
            return;
        };
        if let Err(err) = self
            .dispatcher
            .execute(&command, preserve_focus)
            .await
        {
            warn!(command = %command.id, %err, "resource command failed");
        }
    }

    fn validate_input(
        &self,
        source_control: SourceControlHandle,
        value: &str,
        cursor: usize,
    ) -> Result<Option<InputValidation>, String> {
        let Some(control) = self.control(source_control) else {
            return Ok(None);
        };
        let validator = control
            .input
            .lock()
            .expect("input lock")
            .validator
            .clone();
        match validator {
            Some(validator) => validator(value, cursor).map_err(|err| err.to_string()),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl FrameHandler for ProviderShared {
    async fn on_event(&self, body: Vec<u8>) {
        match decode_mirror_frame(&body) {
            Ok(frame) => self.handle_event(frame),
            Err(err) => error!(%err, "undecodable mirror frame"),
        }
    }

    async fn on_request(&self, body: Vec<u8>) -> Vec<u8> {
        let reply = match decode_mirror_frame(&body) {
            Ok(frame) => self.handle_request(frame).await,
            Err(err) => {
                error!(%err, "undecodable mirror request");
                ProviderReply::Ack
            }
        };
        encode_reply(&reply).unwrap_or_default()
    }
}

/// Top-level provider service. Owns the process-wide "selected source
/// control" slot and every registered source control.
pub struct ScmProvider {
    shared: Arc<ProviderShared>,
    endpoint: Endpoint,
}

impl ScmProvider {
    /// Attach the provider side to its half of a transport pair. Must be
    /// called within a tokio runtime; flush tasks are spawned per source
    /// control.
    pub fn start(transport: Transport, dispatcher: Arc<dyn CommandDispatcher>) -> Self {
        let shared = Arc::new(ProviderShared {
            sc_handles: HandleAllocator::new(),
            controls: Mutex::new(HashMap::new()),
            selected: Mutex::new(None),
            dispatcher,
        });
        let endpoint = Endpoint::start(transport, shared.clone());
        Self { shared, endpoint }
    }

    pub fn create_source_control(
        &self,
        id: impl Into<String>,
        label: impl Into<String>,
        root_uri: Option<Url>,
    ) -> SourceControl {
        let id = id.into();
        let label = label.into();
        let handle = SourceControlHandle(self.shared.sc_handles.next());
        let control = Arc::new(ControlState {
            handle,
            id: id.clone(),
            label: label.clone(),
            root_uri: root_uri.clone(),
            endpoint: self.endpoint.clone(),
            features: Mutex::new(SourceControlFeatures::default()),
            groups: Mutex::new(HashMap::new()),
            group_handles: HandleAllocator::new(),
            resource_handles: HandleAllocator::new(),
            proxy_tokens: HandleAllocator::new(),
            proxies: Mutex::new(HashMap::new()),
            input: Mutex::new(InputState {
                value: String::new(),
                placeholder: String::new(),
                validator: None,
            }),
            quick_diff: Mutex::new(None),
            selected: AtomicBool::new(false),
            selection_watchers: Mutex::new(Vec::new()),
            pending: Mutex::new(PendingBatch::default()),
            flush_notify: Notify::new(),
            disposed: AtomicBool::new(false),
        });
        self.shared
            .controls
            .lock()
            .expect("controls lock")
            .insert(handle, control.clone());
        control.send(&ProviderFrame::RegisterSourceControl {
            handle,
            id,
            label,
            root_uri,
        });
        tokio::spawn(flush_loop(control.clone()));
        SourceControl {
            shared: self.shared.clone(),
            control,
        }
    }

    pub fn selected(&self) -> Option<SourceControlHandle> {
        *self.shared.selected.lock().expect("selected slot lock")
    }
}

/// One registered source control. Cheap to clone via its internal `Arc`s;
/// disposal is explicit and idempotent.
#[derive(Clone)]
pub struct SourceControl {
    shared: Arc<ProviderShared>,
    control: Arc<ControlState>,
}

impl SourceControl {
    pub fn handle(&self) -> SourceControlHandle {
        self.control.handle
    }

    pub fn id(&self) -> &str {
        &self.control.id
    }

    pub fn label(&self) -> &str {
        &self.control.label
    }

    pub fn root_uri(&self) -> Option<&Url> {
        self.control.root_uri.as_ref()
    }

    pub fn is_selected(&self) -> bool {
        self.control.selected.load(Ordering::SeqCst)
    }

    /// Observe selection flips for this source control. The subscription
    /// ends when the receiver is dropped.
    pub fn watch_selection(&self) -> UnboundedReceiver<bool> {
        let (tx, rx) = unbounded_channel();
        self.control
            .selection_watchers
            .lock()
            .expect("selection watchers lock")
            .push(tx);
        rx
    }

    pub fn set_count(&self, count: Option<u64>) {
        self.control.send_features_patch(SourceControlFeaturesPatch {
            count: Some(count),
            ..Default::default()
        });
    }

    pub fn set_commit_template(&self, template: Option<String>) {
        self.control.send_features_patch(SourceControlFeaturesPatch {
            commit_template: Some(template),
            ..Default::default()
        });
    }

    pub fn set_accept_input_command(&self, command: Option<CommandDescriptor>) {
        self.control.send_features_patch(SourceControlFeaturesPatch {
            accept_input_command: Some(command),
            ..Default::default()
        });
    }

    pub fn set_status_bar_commands(&self, commands: Vec<CommandDescriptor>) {
        self.control.send_features_patch(SourceControlFeaturesPatch {
            status_bar_commands: Some(commands),
            ..Default::default()
        });
    }

    /// Install or clear the quick-diff original-resource lookup. Enabling it
    /// flips the `quick_diff` feature flag on the mirror.
    pub fn set_quick_diff_provider(&self, provider: Option<OriginalResourceProvider>) {
        let enabled = provider.is_some();
        *self.control.quick_diff.lock().expect("quick diff lock") = provider;
        self.control.send_features_patch(SourceControlFeaturesPatch {
            quick_diff: Some(enabled),
            ..Default::default()
        });
    }

    pub fn input(&self) -> InputBox {
        InputBox {
            control: self.control.clone(),
        }
    }

    pub fn create_resource_group(
        &self,
        id: impl Into<String>,
        label: impl Into<String>,
    ) -> ResourceGroup {
        let handle = GroupHandle(self.control.group_handles.next());
        let group = Arc::new(GroupState {
            handle,
            id: id.into(),
            label: Mutex::new(label.into()),
            features: Mutex::new(GroupFeatures::default()),
            declared: Mutex::new(Vec::new()),
            sent: Mutex::new(SentSnapshot::default()),
            disposed: AtomicBool::new(false),
        });
        self.control
            .groups
            .lock()
            .expect("groups lock")
            .insert(handle, group.clone());
        self.control.schedule_created(handle);
        ResourceGroup {
            control: self.control.clone(),
            group,
        }
    }

    /// Dispose this source control: groups first, then the input box, then
    /// local listeners, then the unregister notification to the mirror. The
    /// mirror drops the contained groups as part of the top-level
    /// unregistration.
    pub fn dispose(&self) {
        if self.control.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        let groups: Vec<Arc<GroupState>> = self
            .control
            .groups
            .lock()
            .expect("groups lock")
            .drain()
            .map(|(_, group)| group)
            .collect();
        for group in groups {
            group.disposed.store(true, Ordering::SeqCst);
            let mut sent = group.sent.lock().expect("sent snapshot lock");
            for entry in sent.entries.drain(..) {
                self.control.retire_entry(&entry);
            }
            sent.states.clear();
        }
        {
            let mut input = self.control.input.lock().expect("input lock");
            input.validator = None;
        }
        self.control
            .selection_watchers
            .lock()
            .expect("selection watchers lock")
            .clear();
        {
            let mut selected = self.shared.selected.lock().expect("selected slot lock");
            if *selected == Some(self.control.handle) {
                *selected = None;
            }
        }
        self.shared
            .controls
            .lock()
            .expect("controls lock")
            .remove(&self.control.handle);
        // Wake the flush task so it observes the disposed flag and exits.
        self.control.flush_notify.notify_one();
        // Sent directly: ControlState::send refuses traffic once disposed.
        match encode_provider_frame(&ProviderFrame::UnregisterSourceControl {
            handle: self.control.handle,
        }) {
            Ok(body) => {
                let _ = self.control.endpoint.send_event(body);
            }
            Err(err) => error!(%err, "failed to encode unregister frame"),
        }
    }
}

/// The commit-message input owned by a source control.
pub struct InputBox {
    control: Arc<ControlState>,
}

impl InputBox {
    pub fn value(&self) -> String {
        self.control.input.lock().expect("input lock").value.clone()
    }

    /// Programmatic write; propagated to the mirror.
    pub fn set_value(&self, value: impl Into<String>) {
        let value = value.into();
        self.control.input.lock().expect("input lock").value = value.clone();
        self.control.send(&ProviderFrame::SetInputBoxValue {
            source_control: self.control.handle,
            value,
        });
    }

    pub fn placeholder(&self) -> String {
        self.control
            .input
            .lock()
            .expect("input lock")
            .placeholder
            .clone()
    }

    pub fn set_placeholder(&self, placeholder: impl Into<String>) {
        let placeholder = placeholder.into();
        self.control.input.lock().expect("input lock").placeholder = placeholder.clone();
        self.control.send(&ProviderFrame::SetInputBoxPlaceholder {
            source_control: self.control.handle,
            placeholder,
        });
    }

    pub fn set_validator(&self, validator: Option<InputValidator>) {
        self.control.input.lock().expect("input lock").validator = validator;
    }
}

/// One resource group within a source control.
pub struct ResourceGroup {
    control: Arc<ControlState>,
    group: Arc<GroupState>,
}

impl ResourceGroup {
    pub fn handle(&self) -> GroupHandle {
        self.group.handle
    }

    pub fn id(&self) -> &str {
        &self.group.id
    }

    pub fn label(&self) -> String {
        self.group.label.lock().expect("label lock").clone()
    }

    pub fn set_label(&self, label: impl Into<String>) {
        let label = label.into();
        *self.group.label.lock().expect("label lock") = label.clone();
        // A group still awaiting registration carries the new label there.
        if !self.control.group_pending_registration(self.group.handle) {
            self.control.send(&ProviderFrame::UpdateGroupLabel {
                source_control: self.control.handle,
                group: self.group.handle,
                label,
            });
        }
    }

    pub fn set_hide_when_empty(&self, hide_when_empty: bool) {
        let patch = GroupFeaturesPatch {
            hide_when_empty: Some(hide_when_empty),
        };
        self.group
            .features
            .lock()
            .expect("features lock")
            .apply(&patch);
        if !self.control.group_pending_registration(self.group.handle) {
            self.control.send(&ProviderFrame::UpdateGroup {
                source_control: self.control.handle,
                group: self.group.handle,
                patch,
            });
        }
    }

    /// Declare the group's full resource list. Declared order is irrelevant;
    /// both sides sort before diffing. Schedules a coalesced flush.
    pub fn set_resource_states(&self, states: Vec<ResourceState>) {
        if self.group.disposed.load(Ordering::SeqCst) {
            return;
        }
        *self.group.declared.lock().expect("declared lock") = states;
        self.control.schedule_update(self.group.handle);
    }

    /// Dispose this group: cancel any queued splices, retire every
    /// outstanding resource handle, then tell the mirror.
    pub fn dispose(&self) {
        if self.group.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        let was_unregistered = {
            let mut pending = self.control.pending.lock().expect("pending batch lock");
            let was_pending = pending.created.contains(&self.group.handle);
            pending.created.retain(|handle| *handle != self.group.handle);
            pending.updated.retain(|handle| *handle != self.group.handle);
            was_pending
        };
        {
            let mut sent = self.group.sent.lock().expect("sent snapshot lock");
            for entry in sent.entries.drain(..) {
                self.control.retire_entry(&entry);
            }
            sent.states.clear();
        }
        self.control
            .groups
            .lock()
            .expect("groups lock")
            .remove(&self.group.handle);
        if !was_unregistered {
            self.control.send(&ProviderFrame::UnregisterGroup {
                source_control: self.control.handle,
                group: self.group.handle,
            });
        }
    }
}
