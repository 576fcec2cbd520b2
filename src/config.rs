use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, ensure};
use serde::Deserialize;

use crate::descriptor::{FormatId, ResourceDescriptor, ResourceKind, SourceCandidate};
use crate::geometry::Rect;
use crate::presentation::AspectRatio;
use crate::watcher::WatchOptions;

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ViewportSize {
    pub width: f32,
    pub height: f32,
}

impl Default for ViewportSize {
    fn default() -> Self {
        Self {
            width: 1280.0,
            height: 720.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ScrollOptions {
    /// Pixels moved per scroll tick.
    pub step: f32,
    /// Pause between scroll ticks.
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    /// How long to wait for outstanding loads after the last tick.
    #[serde(with = "humantime_serde")]
    pub settle: Duration,
}

impl ScrollOptions {
    const fn default_step() -> f32 {
        240.0
    }

    const fn default_interval() -> Duration {
        Duration::from_millis(150)
    }

    const fn default_settle() -> Duration {
        Duration::from_secs(2)
    }
}

impl Default for ScrollOptions {
    fn default() -> Self {
        Self {
            step: Self::default_step(),
            interval: Self::default_interval(),
            settle: Self::default_settle(),
        }
    }
}

/// One lazily loaded region on the simulated page.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TargetConfig {
    pub id: String,
    #[serde(default)]
    pub kind: ResourceKind,
    /// `[x, y, width, height]` in page coordinates.
    pub rect: Rect,
    pub src: String,
    /// Same resource in a modern format.
    #[serde(default)]
    pub preferred: Option<String>,
    /// Explicit format of `preferred`; inferred from its extension otherwise.
    #[serde(default)]
    pub preferred_format: Option<FormatId>,
    #[serde(default)]
    pub srcset: Vec<SourceCandidate>,
    #[serde(default)]
    pub sizes: Option<String>,
    #[serde(default)]
    pub aspect_ratio: Option<AspectRatio>,
    /// A blurred preview exists for this target.
    #[serde(default)]
    pub blur_placeholder: bool,
}

impl TargetConfig {
    pub fn descriptor(&self) -> ResourceDescriptor {
        let mut descriptor = ResourceDescriptor::new(self.kind, self.src.clone());
        for candidate in &self.srcset {
            descriptor = descriptor.with_alternate(candidate.url.clone(), candidate.descriptor.clone());
        }
        if let Some(sizes) = &self.sizes {
            descriptor = descriptor.with_size_hints(sizes.clone());
        }
        match (&self.preferred, &self.preferred_format) {
            (Some(url), Some(format)) => descriptor.with_preferred_format(url.clone(), format.clone()),
            (Some(url), None) => descriptor.with_preferred(url.clone()),
            (None, _) => descriptor,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct Configuration {
    pub viewport: ViewportSize,
    pub watch: WatchOptions,
    /// Whether the host supports visibility observation. `false` runs every
    /// target in degraded mode.
    pub observation: bool,
    /// Directory that target URLs resolve against. Relative paths are taken
    /// relative to the config file.
    pub asset_root: PathBuf,
    pub scroll: ScrollOptions,
    pub targets: Vec<TargetConfig>,
}

impl Configuration {
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let s = std::fs::read_to_string(path)?;
        let mut cfg: Self = serde_yaml::from_str(&s)?;
        if cfg.asset_root.is_relative() {
            let base = path.parent().unwrap_or_else(|| Path::new("."));
            cfg.asset_root = base.join(&cfg.asset_root);
        }
        Ok(cfg)
    }

    /// Validate runtime invariants that cannot be expressed via serde defaults alone.
    pub fn validated(self) -> Result<Self> {
        ensure!(
            self.viewport.width > 0.0 && self.viewport.height > 0.0,
            "viewport must have a positive width and height"
        );
        ensure!(self.scroll.step > 0.0, "scroll.step must be positive");
        let watch = self
            .watch
            .validated()
            .context("invalid watch options")?;
        let mut seen = HashSet::new();
        for target in &self.targets {
            ensure!(
                seen.insert(target.id.as_str()),
                "duplicate target id {:?}",
                target.id
            );
            ensure!(
                target.rect.width >= 0.0 && target.rect.height >= 0.0,
                "target {:?} has a negative size",
                target.id
            );
            ensure!(!target.src.is_empty(), "target {:?} has no src", target.id);
        }
        Ok(Self { watch, ..self })
    }
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            viewport: ViewportSize::default(),
            watch: WatchOptions::default(),
            observation: true,
            asset_root: PathBuf::from("."),
            scroll: ScrollOptions::default(),
            targets: Vec::new(),
        }
    }
}
