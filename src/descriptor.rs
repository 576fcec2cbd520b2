use std::fmt;

use serde::Deserialize;

/// Lower-case image format identifier such as `webp` or `png`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize)]
#[serde(from = "String")]
pub struct FormatId(String);

impl From<String> for FormatId {
    fn from(raw: String) -> Self {
        Self::new(&raw)
    }
}

impl FormatId {
    pub fn new(raw: &str) -> Self {
        Self(raw.trim().trim_start_matches('.').to_ascii_lowercase())
    }

    pub fn webp() -> Self {
        Self::new("webp")
    }

    /// Infer the format from a URL's extension, ignoring query and fragment.
    pub fn from_url(url: &str) -> Option<Self> {
        let path = url.split(['?', '#']).next().unwrap_or(url);
        let file = path.rsplit('/').next().unwrap_or(path);
        let (stem, ext) = file.rsplit_once('.')?;
        if stem.is_empty() || ext.is_empty() {
            return None;
        }
        Some(Self::new(ext))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Matching `image` crate format, if the crate knows the name at all.
    pub fn image_format(&self) -> Option<image::ImageFormat> {
        image::ImageFormat::from_extension(&self.0)
    }
}

impl fmt::Display for FormatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Which presentation adapter a descriptor belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceKind {
    #[default]
    Image,
    Frame,
    Background,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Image => "image",
            Self::Frame => "frame",
            Self::Background => "background",
        })
    }
}

/// One responsive candidate, e.g. `hero-800.jpg 800w`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SourceCandidate {
    pub url: String,
    #[serde(default)]
    pub descriptor: String,
}

/// URL in a modern format, used when the environment can decode it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreferredSource {
    pub url: String,
    pub format: FormatId,
}

/// Immutable description of what a controller loads.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceDescriptor {
    pub kind: ResourceKind,
    pub primary_url: String,
    pub alternate_urls: Vec<SourceCandidate>,
    pub size_hints: Option<String>,
    pub preferred: Option<PreferredSource>,
}

impl ResourceDescriptor {
    pub fn new(kind: ResourceKind, primary_url: impl Into<String>) -> Self {
        Self {
            kind,
            primary_url: primary_url.into(),
            alternate_urls: Vec::new(),
            size_hints: None,
            preferred: None,
        }
    }

    pub fn image(primary_url: impl Into<String>) -> Self {
        Self::new(ResourceKind::Image, primary_url)
    }

    pub fn frame(primary_url: impl Into<String>) -> Self {
        Self::new(ResourceKind::Frame, primary_url)
    }

    pub fn background(primary_url: impl Into<String>) -> Self {
        Self::new(ResourceKind::Background, primary_url)
    }

    pub fn with_alternate(mut self, url: impl Into<String>, descriptor: impl Into<String>) -> Self {
        self.alternate_urls.push(SourceCandidate {
            url: url.into(),
            descriptor: descriptor.into(),
        });
        self
    }

    pub fn with_size_hints(mut self, sizes: impl Into<String>) -> Self {
        self.size_hints = Some(sizes.into());
        self
    }

    /// Set the preferred-format URL. The format comes from the URL extension;
    /// URLs without one are ignored.
    pub fn with_preferred(self, url: impl Into<String>) -> Self {
        let url = url.into();
        match FormatId::from_url(&url) {
            Some(format) => self.with_preferred_format(url, format),
            None => self,
        }
    }

    pub fn with_preferred_format(mut self, url: impl Into<String>, format: FormatId) -> Self {
        self.preferred = Some(PreferredSource {
            url: url.into(),
            format,
        });
        self
    }

    pub fn preferred_format(&self) -> Option<&FormatId> {
        self.preferred.as_ref().map(|p| &p.format)
    }

    /// Pick the URL to request given whether the preferred format decodes.
    pub fn resolve(&self, preferred_supported: bool) -> &str {
        match &self.preferred {
            Some(preferred) if preferred_supported => &preferred.url,
            _ => &self.primary_url,
        }
    }

    /// Alternates in `srcset` syntax, handed verbatim to the platform.
    pub fn srcset(&self) -> Option<String> {
        if self.alternate_urls.is_empty() {
            return None;
        }
        let joined = self
            .alternate_urls
            .iter()
            .map(|c| {
                if c.descriptor.is_empty() {
                    c.url.clone()
                } else {
                    format!("{} {}", c.url, c.descriptor)
                }
            })
            .collect::<Vec<_>>()
            .join(", ");
        Some(joined)
    }
}
