use lazy_media::geometry::Rect;
use lazy_media::viewport::ScrollViewport;
use lazy_media::{
    CapabilityProbe, Environment, FormatId, LazyLoader, LoadCompletion, LoadRequest, LoadState,
    ResourceDescriptor, ResourceLoadController, ResourceLoader, Subscription, WatchOptions,
};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

struct FakeEnv {
    observation: bool,
    supported: &'static [&'static str],
}

impl Environment for FakeEnv {
    fn supports_observation(&self) -> bool {
        self.observation
    }

    fn decodes(&self, format: &FormatId) -> bool {
        self.supported.iter().any(|s| *s == format.as_str())
    }
}

/// Holds every load until the test settles it.
#[derive(Default)]
struct ManualLoader {
    pending: Mutex<Vec<(LoadRequest, LoadCompletion)>>,
    issued: AtomicUsize,
}

impl ManualLoader {
    fn take(&self) -> (LoadRequest, LoadCompletion) {
        self.pending.lock().remove(0)
    }

    fn issued(&self) -> usize {
        self.issued.load(Ordering::SeqCst)
    }
}

impl ResourceLoader for ManualLoader {
    fn load(&self, request: LoadRequest, completion: LoadCompletion) {
        self.issued.fetch_add(1, Ordering::SeqCst);
        self.pending.lock().push((request, completion));
    }
}

struct Page {
    viewport: Arc<ScrollViewport>,
    loader: Arc<ManualLoader>,
    engine: LazyLoader,
}

fn page(env: FakeEnv) -> Page {
    let viewport = Arc::new(ScrollViewport::new(100.0, 100.0));
    let loader = Arc::new(ManualLoader::default());
    let engine = LazyLoader::new(
        Arc::new(CapabilityProbe::new(env)),
        viewport.clone(),
        loader.clone(),
    );
    Page {
        viewport,
        loader,
        engine,
    }
}

fn observing_env() -> FakeEnv {
    FakeEnv {
        observation: true,
        supported: &["fmta"],
    }
}

fn record(controller: &ResourceLoadController) -> Arc<Mutex<Vec<LoadState>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    controller.on_state_change(move |state| sink.lock().push(state));
    seen
}

async fn eventually(mut check: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

const BELOW_FOLD: Rect = Rect::new(0.0, 500.0, 100.0, 100.0);

#[tokio::test]
async fn disposing_while_observing_issues_no_load() {
    let p = page(observing_env());
    let target = p.viewport.insert(BELOW_FOLD);
    let controller = p
        .engine
        .register(target, ResourceDescriptor::image("a.jpg"), WatchOptions::default());
    let seen = record(&controller);

    controller.start();
    assert_eq!(controller.state(), LoadState::Observing);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(controller.state(), LoadState::Observing);

    controller.dispose();
    controller.dispose();
    p.viewport.scroll_to(500.0);
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(controller.state(), LoadState::Observing);
    assert_eq!(p.loader.issued(), 0);
    assert_eq!(*seen.lock(), vec![LoadState::Observing]);
    eventually(|| p.viewport.observer_count(target) == 0).await;
}

#[tokio::test]
async fn successful_load_reports_three_transitions() {
    let p = page(observing_env());
    let target = p.viewport.insert(BELOW_FOLD);
    let controller = p
        .engine
        .register(target, ResourceDescriptor::image("a.jpg"), WatchOptions::default());
    let seen = record(&controller);
    assert_eq!(controller.state(), LoadState::Idle);

    controller.start();
    p.viewport.scroll_to(450.0);
    eventually(|| controller.state() == LoadState::Loading).await;

    let (request, completion) = p.loader.take();
    assert_eq!(request.url, "a.jpg");
    assert_eq!(request.target, target);
    completion.succeed();

    assert_eq!(controller.state(), LoadState::Loaded);
    assert_eq!(
        *seen.lock(),
        vec![LoadState::Observing, LoadState::Loading, LoadState::Loaded]
    );
    assert_eq!(p.viewport.observer_count(target), 0);
}

#[tokio::test]
async fn failed_load_is_terminal_and_a_new_controller_can_retry() {
    let p = page(observing_env());
    let descriptor = ResourceDescriptor::image("flaky.jpg");
    let first = p
        .engine
        .register(p.viewport.insert(Rect::new(0.0, 0.0, 50.0, 50.0)), descriptor.clone(), WatchOptions::default());
    let seen = record(&first);
    first.start();
    eventually(|| first.state() == LoadState::Loading).await;

    let (_, completion) = p.loader.take();
    completion.fail("connection reset");
    assert_eq!(first.state(), LoadState::Failed);
    assert_eq!(first.failure().as_deref(), Some("connection reset"));
    assert_eq!(
        *seen.lock(),
        vec![LoadState::Observing, LoadState::Loading, LoadState::Failed]
    );

    // No automatic retry.
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(p.loader.issued(), 1);

    let second = p
        .engine
        .register(p.viewport.insert(Rect::new(0.0, 50.0, 50.0, 50.0)), descriptor, WatchOptions::default());
    second.start();
    eventually(|| second.state() == LoadState::Loading).await;
    let (request, completion) = p.loader.take();
    assert_eq!(request.url, "flaky.jpg");
    completion.succeed();
    assert_eq!(second.state(), LoadState::Loaded);
    assert_eq!(first.state(), LoadState::Failed);
}

#[tokio::test]
async fn preferred_format_used_when_supported() {
    let p = page(observing_env());
    let controller = p.engine.register(
        p.viewport.insert(Rect::new(0.0, 0.0, 10.0, 10.0)),
        ResourceDescriptor::image("x.fmtB").with_preferred("x.fmtA"),
        WatchOptions::default(),
    );
    controller.start();
    eventually(|| controller.state() == LoadState::Loading).await;
    assert_eq!(p.loader.take().0.url, "x.fmtA");
}

#[tokio::test]
async fn primary_used_when_preferred_format_unsupported() {
    let p = page(FakeEnv {
        observation: true,
        supported: &[],
    });
    let controller = p.engine.register(
        p.viewport.insert(Rect::new(0.0, 0.0, 10.0, 10.0)),
        ResourceDescriptor::image("x.fmtB").with_preferred("x.fmtA"),
        WatchOptions::default(),
    );
    controller.start();
    eventually(|| controller.state() == LoadState::Loading).await;
    assert_eq!(p.loader.take().0.url, "x.fmtB");
}

#[tokio::test]
async fn alternates_and_sizes_are_forwarded_verbatim() {
    let p = page(observing_env());
    let controller = p.engine.register(
        p.viewport.insert(Rect::new(0.0, 0.0, 10.0, 10.0)),
        ResourceDescriptor::background("bg.jpg")
            .with_alternate("bg-480.jpg", "480w")
            .with_alternate("bg-960.jpg", "960w")
            .with_size_hints("100vw"),
        WatchOptions::default(),
    );
    controller.start();
    eventually(|| controller.state() == LoadState::Loading).await;
    let (request, _) = p.loader.take();
    assert_eq!(request.kind, lazy_media::ResourceKind::Background);
    assert_eq!(request.srcset.as_deref(), Some("bg-480.jpg 480w, bg-960.jpg 960w"));
    assert_eq!(request.sizes.as_deref(), Some("100vw"));
}

#[tokio::test]
async fn degraded_mode_loads_without_any_intersection() {
    let p = page(FakeEnv {
        observation: false,
        supported: &[],
    });
    let target = p.viewport.insert(Rect::new(0.0, 10_000.0, 10.0, 10.0));
    let controller = p
        .engine
        .register(target, ResourceDescriptor::image("far.jpg"), WatchOptions::default());
    let seen = record(&controller);

    controller.start();
    // Issued synchronously: the target never reports an intersection.
    assert_eq!(controller.state(), LoadState::Loading);
    assert_eq!(p.loader.issued(), 1);
    assert_eq!(p.viewport.observer_count(target), 0);
    assert_eq!(*seen.lock(), vec![LoadState::Observing, LoadState::Loading]);
}

#[tokio::test]
async fn start_is_idempotent() {
    let p = page(observing_env());
    let target = p.viewport.insert(Rect::new(0.0, 0.0, 10.0, 10.0));
    let controller = p
        .engine
        .register(target, ResourceDescriptor::image("a.jpg"), WatchOptions::default());
    controller.start();
    controller.start();
    eventually(|| controller.state() == LoadState::Loading).await;
    controller.start();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(p.loader.issued(), 1);
}

#[tokio::test]
async fn late_completion_after_dispose_is_ignored() {
    let p = page(observing_env());
    let controller = p.engine.register(
        p.viewport.insert(Rect::new(0.0, 0.0, 10.0, 10.0)),
        ResourceDescriptor::image("a.jpg"),
        WatchOptions::default(),
    );
    let seen = record(&controller);
    controller.start();
    eventually(|| controller.state() == LoadState::Loading).await;

    controller.dispose();
    let (_, completion) = p.loader.take();
    completion.succeed();

    assert_eq!(controller.state(), LoadState::Loading);
    assert_eq!(*seen.lock(), vec![LoadState::Observing, LoadState::Loading]);
}

#[tokio::test]
async fn completion_for_dropped_controller_is_harmless() {
    let p = page(observing_env());
    let controller = p.engine.register(
        p.viewport.insert(Rect::new(0.0, 0.0, 10.0, 10.0)),
        ResourceDescriptor::image("a.jpg"),
        WatchOptions::default(),
    );
    controller.start();
    eventually(|| controller.state() == LoadState::Loading).await;
    drop(controller);
    let (_, completion) = p.loader.take();
    completion.fail("too late");
}

#[tokio::test]
async fn subscribing_after_dispose_yields_inert_subscription() {
    let p = page(observing_env());
    let controller = p.engine.register(
        p.viewport.insert(BELOW_FOLD),
        ResourceDescriptor::image("a.jpg"),
        WatchOptions::default(),
    );
    controller.dispose();
    let sub = controller.on_state_change(|_| panic!("must not be called"));
    assert!(!sub.is_active());
    sub.unsubscribe();
    controller.start();
    assert_eq!(controller.state(), LoadState::Idle);
}

#[tokio::test]
async fn unsubscribed_listener_stops_receiving() {
    let p = page(observing_env());
    let controller = p.engine.register(
        p.viewport.insert(Rect::new(0.0, 0.0, 10.0, 10.0)),
        ResourceDescriptor::image("a.jpg"),
        WatchOptions::default(),
    );
    let count = Arc::new(AtomicUsize::new(0));
    let counter = count.clone();
    let sub = controller.on_state_change(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    assert!(sub.is_active());
    controller.start();
    sub.unsubscribe();
    sub.unsubscribe();
    assert!(!sub.is_active());
    eventually(|| controller.state() == LoadState::Loading).await;
    assert_eq!(count.load(Ordering::SeqCst), 1);
}

fn degraded_env() -> FakeEnv {
    FakeEnv {
        observation: false,
        supported: &[],
    }
}

#[tokio::test]
async fn listener_disposing_silences_later_listeners() {
    let p = page(degraded_env());
    let controller = Arc::new(p.engine.register(
        p.viewport.insert(Rect::new(0.0, 0.0, 10.0, 10.0)),
        ResourceDescriptor::image("a.jpg"),
        WatchOptions::default(),
    ));

    let weak: Weak<ResourceLoadController> = Arc::downgrade(&controller);
    controller.on_state_change(move |state| {
        if state == LoadState::Loaded {
            if let Some(c) = weak.upgrade() {
                c.dispose();
            }
        }
    });
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let weak = Arc::downgrade(&controller);
    controller.on_state_change(move |state| {
        let disposed = weak.upgrade().is_none_or(|c| c.is_disposed());
        sink.lock().push((state, disposed));
    });

    controller.start();
    let (_, completion) = p.loader.take();
    completion.succeed();

    assert!(controller.is_disposed());
    assert_eq!(controller.state(), LoadState::Loaded);
    assert_eq!(
        *seen.lock(),
        vec![(LoadState::Observing, false), (LoadState::Loading, false)]
    );
}

#[tokio::test]
async fn listener_unsubscribing_a_peer_skips_it_immediately() {
    let p = page(degraded_env());
    let controller = p.engine.register(
        p.viewport.insert(Rect::new(0.0, 0.0, 10.0, 10.0)),
        ResourceDescriptor::image("a.jpg"),
        WatchOptions::default(),
    );

    let peer: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));
    let slot = peer.clone();
    controller.on_state_change(move |state| {
        if state == LoadState::Loading {
            if let Some(sub) = slot.lock().as_ref() {
                sub.unsubscribe();
            }
        }
    });
    let seen = record(&controller);
    let twin = Arc::new(Mutex::new(Vec::new()));
    let sink = twin.clone();
    *peer.lock() = Some(controller.on_state_change(move |state| sink.lock().push(state)));

    controller.start();
    assert_eq!(controller.state(), LoadState::Loading);
    assert_eq!(*seen.lock(), vec![LoadState::Observing, LoadState::Loading]);
    assert_eq!(*twin.lock(), vec![LoadState::Observing]);
}

struct GatedEnv {
    gate: Mutex<Option<std::sync::mpsc::Receiver<bool>>>,
}

impl Environment for GatedEnv {
    fn supports_observation(&self) -> bool {
        true
    }

    fn decodes(&self, _format: &FormatId) -> bool {
        let rx = self.gate.lock().take();
        rx.and_then(|rx| rx.recv().ok()).unwrap_or(false)
    }
}

fn gated_page() -> (Page, std::sync::mpsc::Sender<bool>) {
    let (tx, rx) = std::sync::mpsc::channel();
    let viewport = Arc::new(ScrollViewport::new(100.0, 100.0));
    let loader = Arc::new(ManualLoader::default());
    let env = GatedEnv {
        gate: Mutex::new(Some(rx)),
    };
    let engine = LazyLoader::new(
        Arc::new(CapabilityProbe::new(env)),
        viewport.clone(),
        loader.clone(),
    );
    (
        Page {
            viewport,
            loader,
            engine,
        },
        tx,
    )
}

#[tokio::test]
async fn resolution_waits_for_pending_format_probe() {
    let (p, gate) = gated_page();
    let controller = p.engine.register(
        p.viewport.insert(Rect::new(0.0, 0.0, 10.0, 10.0)),
        ResourceDescriptor::image("x.jpg").with_preferred("x.webp"),
        WatchOptions::default(),
    );
    controller.start();
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(controller.state(), LoadState::Observing);
    assert_eq!(p.loader.issued(), 0);

    gate.send(true).unwrap();
    eventually(|| controller.state() == LoadState::Loading).await;
    assert_eq!(p.loader.take().0.url, "x.webp");
    assert_eq!(
        p.engine.probe().cached_format_support(&FormatId::webp()),
        Some(true)
    );
}

#[tokio::test]
async fn dispose_during_pending_probe_issues_nothing() {
    let (p, gate) = gated_page();
    let controller = p.engine.register(
        p.viewport.insert(Rect::new(0.0, 0.0, 10.0, 10.0)),
        ResourceDescriptor::image("x.jpg").with_preferred("x.webp"),
        WatchOptions::default(),
    );
    controller.start();
    tokio::time::sleep(Duration::from_millis(20)).await;
    controller.dispose();

    gate.send(true).unwrap();
    eventually(|| p.engine.probe().cached_format_support(&FormatId::webp()).is_some()).await;
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(p.loader.issued(), 0);
    assert_eq!(controller.state(), LoadState::Observing);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn loads_completed_on_other_threads_notify_in_order() {
    struct ThreadLoader;

    impl ResourceLoader for ThreadLoader {
        fn load(&self, _request: LoadRequest, completion: LoadCompletion) {
            std::thread::spawn(move || completion.succeed());
        }
    }

    let viewport = Arc::new(ScrollViewport::new(100.0, 100.0));
    let engine = LazyLoader::new(
        Arc::new(CapabilityProbe::new(observing_env())),
        viewport.clone(),
        Arc::new(ThreadLoader),
    );
    let mut controllers = Vec::new();
    let mut logs = Vec::new();
    for i in 0..16 {
        let target = viewport.insert(Rect::new(0.0, i as f32 * 5.0, 5.0, 5.0));
        let c = engine.register(target, ResourceDescriptor::image(format!("{i}.jpg")), WatchOptions::default());
        logs.push(record(&c));
        c.start();
        controllers.push(c);
    }
    eventually(|| controllers.iter().all(|c| c.state() == LoadState::Loaded)).await;
    for log in logs {
        assert_eq!(
            *log.lock(),
            vec![LoadState::Observing, LoadState::Loading, LoadState::Loaded]
        );
    }
}

#[tokio::test]
async fn format_probe_starts_before_target_is_visible() {
    let (p, gate) = gated_page();
    let target = p.viewport.insert(BELOW_FOLD);
    let controller = p.engine.register(
        target,
        ResourceDescriptor::image("x.jpg").with_preferred("x.webp"),
        WatchOptions::default(),
    );
    controller.start();
    gate.send(true).unwrap();

    eventually(|| p.engine.probe().cached_format_support(&FormatId::webp()).is_some()).await;
    assert_eq!(controller.state(), LoadState::Observing);
    assert_eq!(p.loader.issued(), 0);

    p.viewport.scroll_to(500.0);
    eventually(|| controller.state() == LoadState::Loading).await;
    assert_eq!(p.loader.take().0.url, "x.webp");
}
