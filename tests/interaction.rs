//! User-interaction round trips: input edits, validation, selection,
//! resource activation and quick-diff lookups, plus protocol-error handling
//! on the mirror side.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tokio::time::{sleep, timeout};
use url::Url;

use scm_sync::diff::Splice;
use scm_sync::handle::{GroupHandle, ResourceHandle, SourceControlHandle};
use scm_sync::mirror::{MirrorError, MirrorEvent, ScmMirror};
use scm_sync::model::{
    CommandDescriptor, GroupFeatures, InputValidation, ResourceState, ValidationSeverity,
};
use scm_sync::protocol::wire::encode_provider_frame;
use scm_sync::protocol::{GroupSpec, GroupSplices, ProviderFrame, WireResourceState};
use scm_sync::provider::{CommandDispatcher, ScmProvider, SourceControl};
use scm_sync::transport::{Endpoint, FrameHandler, pair};

struct NullDispatcher;

#[async_trait]
impl CommandDispatcher for NullDispatcher {
    async fn execute(
        &self,
        _command: &CommandDescriptor,
        _preserve_focus: bool,
    ) -> anyhow::Result<()> {
        Ok(())
    }
}

struct RecordingDispatcher {
    executed: UnboundedSender<(CommandDescriptor, bool)>,
}

#[async_trait]
impl CommandDispatcher for RecordingDispatcher {
    async fn execute(
        &self,
        command: &CommandDescriptor,
        preserve_focus: bool,
    ) -> anyhow::Result<()> {
        let _ = self.executed.send((command.clone(), preserve_focus));
        Ok(())
    }
}

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

async fn wait_until(mut probe: impl FnMut() -> bool) {
    for _ in 0..200 {
        if probe() {
            return;
        }
        sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached within deadline");
}

async fn next_event(rx: &mut UnboundedReceiver<MirrorEvent>) -> MirrorEvent {
    timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("event within deadline")
        .expect("event channel open")
}

async fn wait_for_resources(
    mirror: &ScmMirror,
    events: &mut UnboundedReceiver<MirrorEvent>,
    sc: &SourceControl,
    count: usize,
) {
    loop {
        if let MirrorEvent::ResourcesChanged { .. } = next_event(events).await {
            let snapshot = mirror.snapshot(sc.handle()).expect("snapshot");
            let total: usize = snapshot.groups.iter().map(|g| g.resources.len()).sum();
            if total == count {
                return;
            }
        }
    }
}

fn state(uri: &str) -> ResourceState {
    ResourceState::new(Url::parse(uri).unwrap())
}

#[tokio::test]
async fn input_value_flows_both_ways_without_echo() {
    let pair = pair();
    let provider = ScmProvider::start(pair.provider, Arc::new(NullDispatcher));
    let mirror = ScmMirror::start(pair.mirror);
    let mut events = mirror.subscribe();

    let sc = provider.create_source_control("git", "Git", None);
    loop {
        if let MirrorEvent::SourceControlRegistered { .. } = next_event(&mut events).await {
            break;
        }
    }

    // Programmatic provider write reaches the mirror.
    sc.input().set_value("feat: add parser");
    sc.input().set_placeholder("Commit message");
    loop {
        if let MirrorEvent::InputBoxPlaceholderChanged { .. } = next_event(&mut events).await {
            break;
        }
    }
    let snapshot = mirror.snapshot(sc.handle()).unwrap();
    assert_eq!(snapshot.input_value, "feat: add parser");
    assert_eq!(snapshot.input_placeholder, "Commit message");

    // User edit reaches the provider without bouncing back as a frame.
    mirror.set_input_value(sc.handle(), "feat: add parser!").unwrap();
    wait_until(|| sc.input().value() == "feat: add parser!").await;
    let outcome = timeout(Duration::from_millis(100), events.recv()).await;
    assert!(outcome.is_err(), "user edit must not echo, got {outcome:?}");
}

#[tokio::test]
async fn validation_round_trip_and_failure_propagation() {
    let pair = pair();
    let provider = ScmProvider::start(pair.provider, Arc::new(NullDispatcher));
    let mirror = ScmMirror::start(pair.mirror);

    let sc = provider.create_source_control("git", "Git", None);

    // No validator installed: no result.
    assert_eq!(mirror.validate_input(sc.handle(), "x", 0).await.unwrap(), None);

    sc.input().set_validator(Some(Arc::new(|value: &str, _cursor: usize| {
        if value.is_empty() {
            anyhow::bail!("validator exploded");
        }
        if value.len() > 10 {
            Ok(Some(InputValidation {
                message: "too long".into(),
                severity: ValidationSeverity::Warning,
            }))
        } else {
            Ok(None)
        }
    })));

    assert_eq!(mirror.validate_input(sc.handle(), "short", 5).await.unwrap(), None);
    assert_eq!(
        mirror
            .validate_input(sc.handle(), "quite a long subject", 0)
            .await
            .unwrap(),
        Some(InputValidation {
            message: "too long".into(),
            severity: ValidationSeverity::Warning,
        })
    );
    match mirror.validate_input(sc.handle(), "", 0).await {
        Err(MirrorError::Validation(message)) => assert!(message.contains("exploded")),
        other => panic!("expected propagated failure, got {other:?}"),
    }

    // Stale handle resolves successfully with no result.
    let stale = SourceControlHandle(999);
    assert_eq!(mirror.validate_input(stale, "x", 0).await.unwrap(), None);
}

#[tokio::test]
async fn selection_is_exclusive_and_ordered() {
    let pair = pair();
    let provider = ScmProvider::start(pair.provider, Arc::new(NullDispatcher));
    let mirror = ScmMirror::start(pair.mirror);

    let x = provider.create_source_control("git", "Git", None);
    let y = provider.create_source_control("hg", "Mercurial", None);
    let mut x_watch = x.watch_selection();
    let mut y_watch = y.watch_selection();

    mirror.set_selected(Some(x.handle())).unwrap();
    assert_eq!(
        timeout(Duration::from_secs(5), x_watch.recv()).await.unwrap(),
        Some(true)
    );
    wait_until(|| x.is_selected()).await;
    assert_eq!(provider.selected(), Some(x.handle()));

    mirror.set_selected(Some(y.handle())).unwrap();
    // Exactly one notification each: Y selected, X deselected.
    assert_eq!(
        timeout(Duration::from_secs(5), y_watch.recv()).await.unwrap(),
        Some(true)
    );
    assert_eq!(
        timeout(Duration::from_secs(5), x_watch.recv()).await.unwrap(),
        Some(false)
    );
    assert_eq!(provider.selected(), Some(y.handle()));
    assert!(!x.is_selected());
    assert!(y.is_selected());

    // Re-selecting the already-selected control is a no-op.
    mirror.set_selected(Some(y.handle())).unwrap();
    mirror.set_selected(None).unwrap();
    assert_eq!(
        timeout(Duration::from_secs(5), y_watch.recv()).await.unwrap(),
        Some(false)
    );
    let extra = timeout(Duration::from_millis(100), x_watch.recv()).await;
    assert!(extra.is_err(), "X must not hear about Y's no-op");
}

#[tokio::test]
async fn resource_activation_reaches_the_dispatcher() {
    let pair = pair();
    let (executed_tx, mut executed_rx) = unbounded_channel();
    let provider = ScmProvider::start(
        pair.provider,
        Arc::new(RecordingDispatcher {
            executed: executed_tx,
        }),
    );
    let mirror = ScmMirror::start(pair.mirror);
    let mut events = mirror.subscribe();

    let sc = provider.create_source_control("git", "Git", None);
    let group = sc.create_resource_group("changes", "Changes");
    let mut resource = state("file:///repo/a.txt");
    resource.command = Some(CommandDescriptor {
        id: "git.stage".into(),
        title: "Stage".into(),
        tooltip: None,
        arguments: vec![serde_json::json!({"path": "a.txt"})],
    });
    group.set_resource_states(vec![resource]);
    wait_for_resources(&mirror, &mut events, &sc, 1).await;

    let snapshot = mirror.snapshot(sc.handle()).unwrap();
    let mirrored = snapshot.group(group.handle()).unwrap();
    mirror
        .execute_resource_command(sc.handle(), group.handle(), mirrored.resources[0].handle, true)
        .await
        .unwrap();

    let (command, preserve_focus) = timeout(Duration::from_secs(5), executed_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(command.id, "git.stage");
    assert_eq!(command.arguments, vec![serde_json::json!({"path": "a.txt"})]);
    assert!(preserve_focus);

    // Stale resource handle: resolved success, nothing dispatched.
    mirror
        .execute_resource_command(sc.handle(), group.handle(), ResourceHandle(12345), false)
        .await
        .unwrap();
    let extra = timeout(Duration::from_millis(100), executed_rx.recv()).await;
    assert!(extra.is_err());
}

#[tokio::test]
async fn quick_diff_lookup_round_trip() {
    let pair = pair();
    let provider = ScmProvider::start(pair.provider, Arc::new(NullDispatcher));
    let mirror = ScmMirror::start(pair.mirror);

    let sc = provider.create_source_control("git", "Git", None);
    let modified = Url::parse("file:///repo/a.txt").unwrap();

    // No provider installed yet.
    assert_eq!(
        mirror
            .original_resource(sc.handle(), modified.clone())
            .await
            .unwrap(),
        None
    );

    sc.set_quick_diff_provider(Some(Arc::new(|uri: &Url| {
        Url::parse(&format!("git-original://{}", uri.path())).ok()
    })));
    assert_eq!(
        mirror
            .original_resource(sc.handle(), modified)
            .await
            .unwrap(),
        Some(Url::parse("git-original:///repo/a.txt").unwrap())
    );
}

#[tokio::test]
async fn feature_patches_and_clears_converge_on_the_mirror() {
    let pair = pair();
    let provider = ScmProvider::start(pair.provider, Arc::new(NullDispatcher));
    let mirror = ScmMirror::start(pair.mirror);
    let mut events = mirror.subscribe();

    let sc = provider.create_source_control("git", "Git", None);
    loop {
        if let MirrorEvent::SourceControlRegistered { .. } = next_event(&mut events).await {
            break;
        }
    }

    sc.set_count(Some(4));
    sc.set_commit_template(Some("wip".into()));
    sc.set_quick_diff_provider(Some(Arc::new(|_uri: &Url| -> Option<Url> { None })));
    wait_until(|| {
        let features = mirror.snapshot(sc.handle()).unwrap().features;
        features.count == Some(4)
            && features.commit_template.as_deref() == Some("wip")
            && features.quick_diff
    })
    .await;

    // Clearing must cross the wire too, not just apply on the provider copy.
    sc.set_count(None);
    sc.set_commit_template(None);
    wait_until(|| {
        let features = mirror.snapshot(sc.handle()).unwrap().features;
        features.count.is_none() && features.commit_template.is_none() && features.quick_diff
    })
    .await;

    // Post-registration group metadata updates.
    let group = sc.create_resource_group("changes", "Changes");
    loop {
        if let MirrorEvent::GroupsRegistered { .. } = next_event(&mut events).await {
            break;
        }
    }
    group.set_label("Tracked Changes");
    group.set_hide_when_empty(true);
    wait_until(|| {
        mirror
            .snapshot(sc.handle())
            .unwrap()
            .group(group.handle())
            .is_some_and(|mirrored| {
                mirrored.label == "Tracked Changes" && mirrored.features.hide_when_empty
            })
    })
    .await;
}

struct Quiet;

#[async_trait]
impl FrameHandler for Quiet {
    async fn on_event(&self, _body: Vec<u8>) {}
    async fn on_request(&self, _body: Vec<u8>) -> Vec<u8> {
        Vec::new()
    }
}

fn wire_state(handle: u64, uri: &str) -> WireResourceState {
    WireResourceState {
        handle: ResourceHandle(handle),
        uri: Url::parse(uri).unwrap(),
        icons: Vec::new(),
        tooltip: String::new(),
        strike_through: false,
        faded: false,
        context_value: String::new(),
        command: None,
    }
}

/// Drive the mirror with hand-crafted frames: a malformed splice must abandon
/// the remainder of its batch but keep everything applied before it.
#[tokio::test]
async fn malformed_splice_aborts_the_batch() {
    init_logging();
    let pair = pair();
    let endpoint = Endpoint::start(pair.provider, Arc::new(Quiet));
    let mirror = ScmMirror::start(pair.mirror);
    let mut events = mirror.subscribe();

    let sc = SourceControlHandle(0);
    let good = GroupHandle(0);
    let bad = GroupHandle(1);
    let send = |frame: &ProviderFrame| {
        endpoint
            .send_event(encode_provider_frame(frame).unwrap())
            .unwrap();
    };

    send(&ProviderFrame::RegisterSourceControl {
        handle: sc,
        id: "git".into(),
        label: "Git".into(),
        root_uri: None,
    });
    send(&ProviderFrame::RegisterGroups {
        source_control: sc,
        groups: vec![
            GroupSpec {
                handle: good,
                id: "good".into(),
                label: "Good".into(),
                features: GroupFeatures::default(),
            },
            GroupSpec {
                handle: bad,
                id: "bad".into(),
                label: "Bad".into(),
                features: GroupFeatures::default(),
            },
        ],
        splices: Vec::new(),
    });
    loop {
        if let MirrorEvent::GroupsRegistered { .. } = next_event(&mut events).await {
            break;
        }
    }

    send(&ProviderFrame::SpliceResourceStates {
        source_control: sc,
        splices: vec![
            GroupSplices {
                group: bad,
                splices: vec![
                    // Applies cleanly ...
                    Splice {
                        start: 0,
                        delete_count: 0,
                        items: vec![wire_state(0, "file:///repo/kept.txt")],
                    },
                    // ... then deletes past the end.
                    Splice {
                        start: 0,
                        delete_count: 5,
                        items: Vec::new(),
                    },
                ],
            },
            // Never reached: the batch is abandoned at the error.
            GroupSplices {
                group: good,
                splices: vec![Splice {
                    start: 0,
                    delete_count: 0,
                    items: vec![wire_state(1, "file:///repo/skipped.txt")],
                }],
            },
        ],
    });
    loop {
        if let MirrorEvent::ResourcesChanged { .. } = next_event(&mut events).await {
            break;
        }
    }

    let snapshot = mirror.snapshot(sc).unwrap();
    let bad_group = snapshot.group(bad).unwrap();
    assert_eq!(bad_group.resources.len(), 1, "prior splice stays applied");
    assert_eq!(
        bad_group.resources[0].uri.as_str(),
        "file:///repo/kept.txt"
    );
    let good_group = snapshot.group(good).unwrap();
    assert!(
        good_group.resources.is_empty(),
        "later groups in the batch are not applied"
    );
}
