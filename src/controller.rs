//! Per-target load state machine.
//!
//! A [`ResourceLoadController`] moves strictly forward through
//! `Idle -> Observing -> Loading -> Loaded | Failed`. Every transition is
//! checked against the expected source state under one lock, and subscribers
//! are notified while a re-entrant dispatch lock is held so they always see
//! transitions in order. After [`ResourceLoadController::dispose`] nothing
//! mutates the state and nobody is notified.

use std::sync::{Arc, Weak};

use parking_lot::{Mutex, ReentrantMutex};
use tracing::{debug, info};

use crate::capability::CapabilityProbe;
use crate::descriptor::ResourceDescriptor;
use crate::events::{LoadState, Target, Visibility};
use crate::loader::{LoadRequest, ResourceLoader};
use crate::watcher::{ObservationPlatform, VisibilityWatcher, WatchHandle, WatchOptions};

type Listener = Arc<dyn Fn(LoadState) + Send + Sync>;

struct Inner {
    state: LoadState,
    disposed: bool,
    /// Bumped on disposal so completions from older attempts are ignored.
    generation: u64,
    watch: Option<WatchHandle>,
    subscribers: Vec<(u64, Listener)>,
    next_subscriber: u64,
    failure: Option<String>,
}

struct Shared {
    target: Target,
    descriptor: ResourceDescriptor,
    probe: Arc<CapabilityProbe>,
    loader: Arc<dyn ResourceLoader>,
    dispatch: ReentrantMutex<()>,
    inner: Mutex<Inner>,
}

impl Shared {
    /// Move `from -> to` if the controller is live, in `from`, and (when given)
    /// still on `generation`. Notifies subscribers on success.
    fn transition(&self, from: LoadState, to: LoadState, generation: Option<u64>) -> bool {
        let _dispatch = self.dispatch.lock();
        let listeners: Vec<(u64, Listener)> = {
            let mut inner = self.inner.lock();
            if inner.disposed || inner.state != from {
                return false;
            }
            if generation.is_some_and(|g| g != inner.generation) {
                return false;
            }
            inner.state = to;
            inner.subscribers.clone()
        };
        debug!(region = %self.target, from = %from, to = %to, "state change");
        for (id, listener) in listeners {
            // An earlier listener may have disposed or unsubscribed this one.
            if !self.is_subscribed(id) {
                continue;
            }
            listener(to);
        }
        true
    }

    fn is_subscribed(&self, id: u64) -> bool {
        let inner = self.inner.lock();
        !inner.disposed && inner.subscribers.iter().any(|(sid, _)| *sid == id)
    }

    fn on_visible(self: Arc<Self>, visibility: Visibility) {
        if self.current_generation().is_none() {
            return;
        }
        debug!(region = %self.target, ?visibility, "visibility signal");
        let Some(format) = self.descriptor.preferred_format().cloned() else {
            self.issue(false);
            return;
        };
        match self.probe.cached_format_support(&format) {
            Some(supported) => self.issue(supported),
            None => {
                // Format probe still pending; resolve once it settles.
                tokio::spawn(async move {
                    let supported = self.probe.format_support(&format).await;
                    self.issue(supported);
                });
            }
        }
    }

    fn issue(self: &Arc<Self>, preferred_supported: bool) {
        let Some(generation) = self.current_generation() else {
            return;
        };
        if !self.transition(LoadState::Observing, LoadState::Loading, Some(generation)) {
            return;
        }
        let url = self.descriptor.resolve(preferred_supported).to_string();
        info!(region = %self.target, url = %url, kind = %self.descriptor.kind, "issuing load");
        let request = LoadRequest {
            target: self.target,
            kind: self.descriptor.kind,
            url,
            srcset: self.descriptor.srcset(),
            sizes: self.descriptor.size_hints.clone(),
        };
        let completion = LoadCompletion {
            shared: Arc::downgrade(self),
            generation,
        };
        self.loader.load(request, completion);
    }

    fn current_generation(&self) -> Option<u64> {
        let inner = self.inner.lock();
        (!inner.disposed).then_some(inner.generation)
    }

    fn settle(&self, generation: u64, outcome: Result<(), String>) {
        let to = match outcome {
            Ok(()) => LoadState::Loaded,
            Err(reason) => {
                {
                    let mut inner = self.inner.lock();
                    if inner.disposed || inner.generation != generation {
                        debug!(region = %self.target, "ignoring stale load failure");
                        return;
                    }
                    inner.failure = Some(reason);
                }
                LoadState::Failed
            }
        };
        if !self.transition(LoadState::Loading, to, Some(generation)) {
            debug!(region = %self.target, outcome = %to, "ignoring stale load completion");
        }
    }
}

/// One-shot completion for a single load attempt.
///
/// Settling consumes the completion. Completions whose controller was
/// disposed or dropped are ignored.
pub struct LoadCompletion {
    shared: Weak<Shared>,
    generation: u64,
}

impl LoadCompletion {
    pub fn succeed(self) {
        if let Some(shared) = self.shared.upgrade() {
            shared.settle(self.generation, Ok(()));
        }
    }

    pub fn fail(self, reason: impl Into<String>) {
        if let Some(shared) = self.shared.upgrade() {
            shared.settle(self.generation, Err(reason.into()));
        }
    }
}

impl std::fmt::Debug for LoadCompletion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadCompletion")
            .field("generation", &self.generation)
            .field("live", &(self.shared.strong_count() > 0))
            .finish()
    }
}

/// Handle returned by [`ResourceLoadController::on_state_change`].
#[derive(Debug)]
pub struct Subscription {
    shared: Weak<Shared>,
    id: Option<u64>,
}

impl Subscription {
    /// Stop receiving notifications. Idempotent.
    pub fn unsubscribe(&self) {
        let (Some(id), Some(shared)) = (self.id, self.shared.upgrade()) else {
            return;
        };
        shared.inner.lock().subscribers.retain(|(sid, _)| *sid != id);
    }

    pub fn is_active(&self) -> bool {
        let (Some(id), Some(shared)) = (self.id, self.shared.upgrade()) else {
            return false;
        };
        let inner = shared.inner.lock();
        inner.subscribers.iter().any(|(sid, _)| *sid == id)
    }
}

/// Drives one target from `Idle` to a terminal load state.
pub struct ResourceLoadController {
    shared: Arc<Shared>,
    watcher: VisibilityWatcher,
}

impl ResourceLoadController {
    pub fn new(
        target: Target,
        descriptor: ResourceDescriptor,
        options: WatchOptions,
        probe: Arc<CapabilityProbe>,
        platform: Arc<dyn ObservationPlatform>,
        loader: Arc<dyn ResourceLoader>,
    ) -> Self {
        let watcher = VisibilityWatcher::new(target, options, platform, probe.clone());
        let shared = Arc::new(Shared {
            target,
            descriptor,
            probe,
            loader,
            dispatch: ReentrantMutex::new(()),
            inner: Mutex::new(Inner {
                state: LoadState::Idle,
                disposed: false,
                generation: 0,
                watch: None,
                subscribers: Vec::new(),
                next_subscriber: 0,
                failure: None,
            }),
        });
        Self { shared, watcher }
    }

    pub fn target(&self) -> Target {
        self.shared.target
    }

    pub fn descriptor(&self) -> &ResourceDescriptor {
        &self.shared.descriptor
    }

    /// Arm the watcher. No-op unless the controller is live and `Idle`.
    ///
    /// Must be called inside a Tokio runtime. In degraded mode the load may be
    /// issued before this returns.
    pub fn start(&self) {
        if !self
            .shared
            .transition(LoadState::Idle, LoadState::Observing, None)
        {
            return;
        }
        self.prefetch_format();
        let weak = Arc::downgrade(&self.shared);
        let handle = self.watcher.watch(move |visibility| {
            if let Some(shared) = weak.upgrade() {
                shared.on_visible(visibility);
            }
        });
        let mut inner = self.shared.inner.lock();
        if inner.disposed {
            drop(inner);
            handle.dispose();
        } else {
            inner.watch = Some(handle);
        }
    }

    /// Kick off the preferred-format probe so its result is usually cached by
    /// the time the target becomes visible.
    fn prefetch_format(&self) {
        let Some(format) = self.shared.descriptor.preferred_format() else {
            return;
        };
        if self.shared.probe.cached_format_support(format).is_some() {
            return;
        }
        let probe = self.shared.probe.clone();
        let format = format.clone();
        tokio::spawn(async move {
            probe.format_support(&format).await;
        });
    }

    pub fn state(&self) -> LoadState {
        self.shared.inner.lock().state
    }

    /// Reason reported by the loader when the state is `Failed`.
    pub fn failure(&self) -> Option<String> {
        self.shared.inner.lock().failure.clone()
    }

    pub fn is_disposed(&self) -> bool {
        self.shared.inner.lock().disposed
    }

    /// Subscribe to transitions. Listeners run synchronously on the thread
    /// that computes the transition. After disposal the returned subscription
    /// is already inactive.
    pub fn on_state_change<F>(&self, listener: F) -> Subscription
    where
        F: Fn(LoadState) + Send + Sync + 'static,
    {
        let mut inner = self.shared.inner.lock();
        if inner.disposed {
            return Subscription {
                shared: Weak::new(),
                id: None,
            };
        }
        let id = inner.next_subscriber;
        inner.next_subscriber += 1;
        inner.subscribers.push((id, Arc::new(listener)));
        Subscription {
            shared: Arc::downgrade(&self.shared),
            id: Some(id),
        }
    }

    /// Release the watcher and drop all subscribers. Idempotent. An in-flight
    /// load is not aborted, but its completion is ignored.
    pub fn dispose(&self) {
        // Waits out a notification in progress on another thread.
        let _dispatch = self.shared.dispatch.lock();
        let handle = {
            let mut inner = self.shared.inner.lock();
            if inner.disposed {
                return;
            }
            inner.disposed = true;
            inner.generation += 1;
            inner.subscribers.clear();
            inner.watch.take()
        };
        if let Some(handle) = handle {
            handle.dispose();
        }
        debug!(region = %self.shared.target, state = %self.state(), "disposed");
    }
}

impl Drop for ResourceLoadController {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for ResourceLoadController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceLoadController")
            .field("target", &self.shared.target)
            .field("state", &self.state())
            .finish()
    }
}
