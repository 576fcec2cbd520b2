use std::sync::Arc;

use serde::Deserialize;
use tokio::select;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::capability::CapabilityProbe;
use crate::error::{Error, Result};
use crate::events::{Intersection, Target, Visibility};
use crate::geometry::RootMargin;

/// Intersection reports for one observation. Dropping it releases the
/// observation; the platform closing it means the target was detached.
pub type IntersectionStream = UnboundedReceiver<Intersection>;

/// Host primitive that reports how much of a target is in view.
pub trait ObservationPlatform: Send + Sync {
    fn observe(&self, target: Target, margin: &RootMargin) -> IntersectionStream;
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct WatchOptions {
    /// Grows the trigger region outward so loads start before the target
    /// scrolls into view.
    pub proximity_margin: RootMargin,
    /// Fraction of the target that must be visible, in `[0, 1]`.
    pub visibility_threshold: f32,
}

impl WatchOptions {
    const fn default_visibility_threshold() -> f32 {
        0.1
    }

    pub fn with_margin(mut self, margin: RootMargin) -> Self {
        self.proximity_margin = margin;
        self
    }

    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.visibility_threshold = threshold;
        self
    }

    pub fn validated(self) -> Result<Self> {
        if !(0.0..=1.0).contains(&self.visibility_threshold) {
            return Err(Error::InvalidThreshold(self.visibility_threshold));
        }
        Ok(self)
    }

    /// Pull the threshold back into `[0, 1]`. `NaN` falls back to the default.
    pub fn clamped(self) -> Self {
        let threshold = if self.visibility_threshold.is_nan() {
            Self::default_visibility_threshold()
        } else {
            self.visibility_threshold.clamp(0.0, 1.0)
        };
        self.with_threshold(threshold)
    }
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            proximity_margin: RootMargin::ZERO,
            visibility_threshold: Self::default_visibility_threshold(),
        }
    }
}

/// Releases a watch. Idempotent, and a no-op once the callback has fired.
#[derive(Debug, Clone)]
pub struct WatchHandle {
    cancel: CancellationToken,
}

impl WatchHandle {
    pub fn dispose(&self) {
        self.cancel.cancel();
    }

    pub fn is_released(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Watches a single target and reports, at most once, that it became visible.
pub struct VisibilityWatcher {
    target: Target,
    options: WatchOptions,
    platform: Arc<dyn ObservationPlatform>,
    probe: Arc<CapabilityProbe>,
}

impl VisibilityWatcher {
    pub fn new(
        target: Target,
        options: WatchOptions,
        platform: Arc<dyn ObservationPlatform>,
        probe: Arc<CapabilityProbe>,
    ) -> Self {
        let clamped = options.clamped();
        if clamped.visibility_threshold.to_bits() != options.visibility_threshold.to_bits() {
            warn!(
                region = %target,
                requested = options.visibility_threshold,
                using = clamped.visibility_threshold,
                "visibility threshold out of range"
            );
        }
        Self {
            target,
            options: clamped,
            platform,
            probe,
        }
    }

    pub fn target(&self) -> Target {
        self.target
    }

    /// Start watching. `on_visible` runs at most once.
    ///
    /// Without observation support it runs synchronously, before this returns,
    /// with [`Visibility::Degraded`]. Otherwise the observation is consumed by a
    /// spawned task, so this must be called inside a Tokio runtime.
    pub fn watch<F>(&self, on_visible: F) -> WatchHandle
    where
        F: FnOnce(Visibility) + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let handle = WatchHandle {
            cancel: cancel.clone(),
        };

        if !self.probe.observation_supported() {
            debug!(region = %self.target, "observation unsupported; treating target as visible");
            cancel.cancel();
            on_visible(Visibility::Degraded);
            return handle;
        }

        let stream = self
            .platform
            .observe(self.target, &self.options.proximity_margin);
        tokio::spawn(run(
            self.target,
            self.options.visibility_threshold,
            stream,
            on_visible,
            cancel,
        ));
        handle
    }
}

async fn run<F>(
    target: Target,
    threshold: f32,
    mut stream: IntersectionStream,
    on_visible: F,
    cancel: CancellationToken,
) where
    F: FnOnce(Visibility) + Send + 'static,
{
    loop {
        let report = select! {
            biased;

            _ = cancel.cancelled() => {
                debug!(region = %target, "watch disposed before target became visible");
                return;
            }

            report = stream.recv() => report,
        };

        match report {
            Some(report) if report.reaches(threshold) => {
                // Release the observation before the callback starts any work.
                drop(stream);
                cancel.cancel();
                debug!(region = %target, ratio = report.ratio, "target became visible");
                on_visible(Visibility::Intersecting);
                return;
            }
            Some(report) => {
                trace!(region = %target, ratio = report.ratio, "below threshold");
            }
            None => {
                debug!(region = %target, "target detached before becoming visible");
                cancel.cancel();
                return;
            }
        }
    }
}
