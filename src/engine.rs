use std::sync::Arc;

use crate::capability::CapabilityProbe;
use crate::controller::ResourceLoadController;
use crate::descriptor::ResourceDescriptor;
use crate::events::Target;
use crate::loader::ResourceLoader;
use crate::watcher::{ObservationPlatform, WatchOptions};

/// Registration surface for presentation adapters.
///
/// Holds the collaborators every controller shares and hands out one
/// controller per registered target.
#[derive(Clone)]
pub struct LazyLoader {
    probe: Arc<CapabilityProbe>,
    platform: Arc<dyn ObservationPlatform>,
    loader: Arc<dyn ResourceLoader>,
}

impl LazyLoader {
    pub fn new(
        probe: Arc<CapabilityProbe>,
        platform: Arc<dyn ObservationPlatform>,
        loader: Arc<dyn ResourceLoader>,
    ) -> Self {
        Self {
            probe,
            platform,
            loader,
        }
    }

    /// Uses the process-wide capability probe.
    pub fn with_shared_probe(
        platform: Arc<dyn ObservationPlatform>,
        loader: Arc<dyn ResourceLoader>,
    ) -> Self {
        Self::new(CapabilityProbe::shared(), platform, loader)
    }

    pub fn probe(&self) -> &Arc<CapabilityProbe> {
        &self.probe
    }

    /// Create an `Idle` controller for `target`. Call `start()` to arm it;
    /// dropping it disposes it. An out-of-range threshold is clamped into
    /// `[0, 1]`.
    pub fn register(
        &self,
        target: Target,
        descriptor: ResourceDescriptor,
        options: WatchOptions,
    ) -> ResourceLoadController {
        ResourceLoadController::new(
            target,
            descriptor,
            options,
            self.probe.clone(),
            self.platform.clone(),
            self.loader.clone(),
        )
    }
}
