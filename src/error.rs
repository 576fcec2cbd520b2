use thiserror::Error;

/// Library error type for lazy-media operations.
///
/// The load state machine itself never fails; these errors come from parsing
/// options and configuring the process-wide capability probe.
#[derive(Debug, Error)]
pub enum Error {
    /// A proximity margin string could not be parsed.
    #[error("invalid proximity margin {0:?}")]
    InvalidMargin(String),

    /// A visibility threshold outside `[0, 1]`.
    #[error("visibility threshold must be within [0, 1], got {0}")]
    InvalidThreshold(f32),

    /// An aspect ratio string could not be parsed.
    #[error("invalid aspect ratio {0:?}")]
    InvalidAspectRatio(String),

    /// The shared capability probe was already created.
    #[error("capability probe already initialized")]
    ProbeAlreadyInstalled,

    /// Underlying IO error.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// YAML/serde configuration error.
    #[error(transparent)]
    Config(#[from] serde_yaml::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
