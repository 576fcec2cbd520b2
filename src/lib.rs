pub mod capability;
pub mod config;
pub mod controller;
pub mod descriptor;
pub mod engine;
pub mod error;
pub mod events;
pub mod geometry;
pub mod loader;
pub mod presentation;
pub mod viewport;
pub mod watcher;
pub mod tasks {
    pub mod scroll;
}

pub use capability::{CapabilityProbe, Environment, NativeEnvironment};
pub use controller::{ResourceLoadController, Subscription};
pub use descriptor::{FormatId, ResourceDescriptor, ResourceKind};
pub use engine::LazyLoader;
pub use error::{Error, Result};
pub use events::{LoadState, Target, Visibility};
pub use loader::{LoadCompletion, LoadRequest, ResourceLoader};
pub use watcher::{ObservationPlatform, VisibilityWatcher, WatchHandle, WatchOptions};
