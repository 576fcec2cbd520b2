//! One-shot, memoized detection of environment capabilities.
//!
//! Two capabilities matter to the engine: whether the host can observe
//! target visibility at all, and whether it can decode a given image format.
//! Each is probed at most once per [`CapabilityProbe`]; the process-wide probe
//! returned by [`CapabilityProbe::shared`] therefore probes at most once per
//! process. A probe never fails: anything that goes wrong resolves to `false`.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use base64::Engine;
use parking_lot::Mutex;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use crate::descriptor::FormatId;
use crate::error::{Error, Result};

/// Runtime checks the probe delegates to. Swap in a fake for tests.
pub trait Environment: Send + Sync + 'static {
    fn supports_observation(&self) -> bool;

    /// Whether `format` can be decoded. May block; the probe runs it on a
    /// blocking thread.
    fn decodes(&self, format: &FormatId) -> bool;
}

// Lossless 1x1 WebP.
const WEBP_1X1: &str = "UklGRhoAAABXRUJQVlA4TA0AAAAvAAAAEAcQERGIiP4HAA==";
// 1x1 RGBA PNG.
const PNG_1X1: &str =
    "iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAYAAAAfFcSJAAAADUlEQVR42mNkYPhfDwAChwGA60e6kgAAAABJRU5ErkJggg==";
// 1x1 transparent GIF.
const GIF_1X1: &str = "R0lGODlhAQABAIAAAAAAAP///yH5BAEAAAAALAAAAAABAAEAAAIBRAA7";
// 2x1 baseline JPEG.
const JPEG_2X1: &str = concat!(
    "/9j/4AAQSkZJRgABAQAAAQABAAD/4QAiRXhpZgAATU0AKgAAAAgAAQESAAMAAAABAAYAAAAAAAD/2wBDAAgGBgcGBQgHBwcJCQgKDBQNDAsLDBkSEw8UHRofHh0aHBwgJC4nICIsIxwcKDcpLDAxNDQ0Hyc5PTgyPC4zNDL/",
    "2wBDAQkJCQwLDBgNDRgyIRwhMjIyMjIyMjIyMjIyMjIyMjIyMjIyMjIyMjIyMjIyMjIyMjIyMjIyMjIyMjIyMjIyMjL/wAARCAABAAIDASIAAhEBAxEB/8QAHwAAAQUBAQEBAQEAAAAAAAAAAAECAwQFBgcICQoL/8QAtRAAAgEDAwIEAwUFBAQAAAF9AQIDAAQRBRIhMUEGE1FhByJxFDKBkaEII0KxwRVS0fAkM2JyggkKFhcYGRolJicoKSo0NTY3ODk6Q0RFRkdISUpTVFVWV1hZWmNkZWZnaGlqc3R1dnd4eXqDhIWGh4iJipKTlJWWl5iZmqKjpKWmp6ipqrKztLW2t7i5usLDxMXGx8jJytLT1NXW19jZ2uHi4+Tl5ufo6erx8vP09fb3+Pn6/8QAHwEAAwEBAQEBAQEBAQAAAAAAAAECAwQFBgcICQoL/8QAtREAAgECBAQDBAcFBAQAAQJ3AAECAxEEBSExBhJBUQdhcRMiMoEIFEKRobHBCSMzUvAVYnLRChYkNOEl8RcYGRomJygpKjU2Nzg5OkNERUZHSElKU1RVVldYWVpjZGVmZ2hpanN0dXZ3eHl6goOEhYaHiImKkpOUlZaXmJmaoqOkpaanqKmqsrO0tba3uLm6wsPExcbHyMnK0tPU1dbX2Nna4uPk5ebn6Onq8vP09fb3+Pn6/9oADAMBAAIRAxEAPwDi6KKK+ZP3E//Z"
);

/// Probes by decoding a tiny embedded reference image with the `image` crate.
#[derive(Debug, Clone)]
pub struct NativeEnvironment {
    observation: bool,
}

impl NativeEnvironment {
    pub fn new(observation: bool) -> Self {
        Self { observation }
    }

    fn reference_payload(format: image::ImageFormat) -> Option<&'static str> {
        match format {
            image::ImageFormat::WebP => Some(WEBP_1X1),
            image::ImageFormat::Png => Some(PNG_1X1),
            image::ImageFormat::Gif => Some(GIF_1X1),
            image::ImageFormat::Jpeg => Some(JPEG_2X1),
            _ => None,
        }
    }
}

impl Default for NativeEnvironment {
    fn default() -> Self {
        Self::new(true)
    }
}

impl Environment for NativeEnvironment {
    fn supports_observation(&self) -> bool {
        self.observation
    }

    fn decodes(&self, format: &FormatId) -> bool {
        let Some(image_format) = format.image_format() else {
            return false;
        };
        let Some(payload) = Self::reference_payload(image_format) else {
            return false;
        };
        let Ok(bytes) = base64::engine::general_purpose::STANDARD.decode(payload) else {
            return false;
        };
        match image::load_from_memory_with_format(&bytes, image_format) {
            Ok(img) => img.width() > 0 && img.height() > 0,
            Err(err) => {
                debug!(format = %format, error = %err, "reference payload did not decode");
                false
            }
        }
    }
}

/// Memoized capability results backed by an [`Environment`].
pub struct CapabilityProbe {
    env: Arc<dyn Environment>,
    observation: OnceLock<bool>,
    formats: Mutex<HashMap<FormatId, Arc<OnceCell<bool>>>>,
}

static SHARED: OnceLock<Arc<CapabilityProbe>> = OnceLock::new();

impl CapabilityProbe {
    pub fn new(env: impl Environment) -> Self {
        Self::from_arc(Arc::new(env))
    }

    pub fn from_arc(env: Arc<dyn Environment>) -> Self {
        Self {
            env,
            observation: OnceLock::new(),
            formats: Mutex::new(HashMap::new()),
        }
    }

    /// Process-wide probe, created with [`NativeEnvironment`] on first use
    /// unless [`CapabilityProbe::install`] ran earlier.
    pub fn shared() -> Arc<Self> {
        SHARED
            .get_or_init(|| Arc::new(Self::new(NativeEnvironment::default())))
            .clone()
    }

    /// Install the process-wide probe. Must run before anything calls
    /// [`CapabilityProbe::shared`].
    pub fn install(env: impl Environment) -> Result<Arc<Self>> {
        let probe = Arc::new(Self::new(env));
        SHARED
            .set(probe.clone())
            .map_err(|_| Error::ProbeAlreadyInstalled)?;
        Ok(probe)
    }

    pub fn observation_supported(&self) -> bool {
        *self.observation.get_or_init(|| {
            let supported = self.env.supports_observation();
            debug!(supported, "probed visibility observation");
            supported
        })
    }

    /// Resolve support for `format`, probing at most once. Concurrent callers
    /// wait for the same probe.
    pub async fn format_support(&self, format: &FormatId) -> bool {
        let cell = self.formats.lock().entry(format.clone()).or_default().clone();
        *cell
            .get_or_init(|| async {
                let env = self.env.clone();
                let id = format.clone();
                match tokio::task::spawn_blocking(move || env.decodes(&id)).await {
                    Ok(supported) => {
                        debug!(format = %format, supported, "probed image format");
                        supported
                    }
                    Err(err) => {
                        warn!(format = %format, error = %err, "format probe aborted; assuming unsupported");
                        false
                    }
                }
            })
            .await
    }

    /// Already-resolved result for `format`, if any.
    pub fn cached_format_support(&self, format: &FormatId) -> Option<bool> {
        self.formats
            .lock()
            .get(format)
            .and_then(|cell| cell.get().copied())
    }
}

impl std::fmt::Debug for CapabilityProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapabilityProbe")
            .field("observation", &self.observation.get())
            .field("formats", &self.formats.lock().len())
            .finish()
    }
}
