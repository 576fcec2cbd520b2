use std::path::{Path, PathBuf};

use anyhow::Result;
use tracing::debug;

pub use crate::controller::LoadCompletion;
use crate::descriptor::ResourceKind;
use crate::events::Target;

/// What the platform is asked to fetch once a target becomes visible.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadRequest {
    pub target: Target,
    pub kind: ResourceKind,
    /// URL chosen by format negotiation.
    pub url: String,
    /// Responsive candidates, left to the platform to choose among.
    pub srcset: Option<String>,
    pub sizes: Option<String>,
}

/// Platform primitive that performs the actual fetch.
///
/// Fire and forget: the loader settles `completion` exactly once, from any
/// thread, whenever the fetch finishes.
pub trait ResourceLoader: Send + Sync {
    fn load(&self, request: LoadRequest, completion: LoadCompletion);
}

/// Loads resources from the local filesystem.
///
/// URLs resolve relative to `root`. Images and backgrounds must decode;
/// frames only need to be readable.
#[derive(Debug, Clone)]
pub struct FileLoader {
    root: PathBuf,
}

impl FileLoader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn resolve(&self, url: &str) -> PathBuf {
        let trimmed = url.strip_prefix("file://").unwrap_or(url);
        let path = Path::new(trimmed);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }
}

fn decode_dimensions(path: &Path) -> Result<(u32, u32)> {
    let img = image::ImageReader::open(path)?
        .with_guessed_format()? // sniff based on content, not extension
        .decode()?;
    Ok((img.width(), img.height()))
}

fn fetch(kind: ResourceKind, path: &Path) -> Result<()> {
    match kind {
        ResourceKind::Image | ResourceKind::Background => {
            let (width, height) = decode_dimensions(path)?;
            debug!(path = %path.display(), width, height, "decoded");
        }
        ResourceKind::Frame => {
            let bytes = std::fs::read(path)?;
            debug!(path = %path.display(), len = bytes.len(), "read frame document");
        }
    }
    Ok(())
}

impl ResourceLoader for FileLoader {
    fn load(&self, request: LoadRequest, completion: LoadCompletion) {
        let path = self.resolve(&request.url);
        let kind = request.kind;
        tokio::task::spawn_blocking(move || match fetch(kind, &path) {
            Ok(()) => completion.succeed(),
            Err(err) => {
                debug!(path = %path.display(), error = %err, "load failed");
                completion.fail(format!("{}: {err}", path.display()));
            }
        });
    }
}
