//! Error types for the KMS framebuffer backend

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("no usable DRM device found under {0}")]
    NoDevice(String),

    #[error("no connected display connector found")]
    NoConnector,

    #[error("no CRTC can drive connector {0}")]
    NoCrtc(u32),

    #[error("CRTC {crtc} needs {needed} planes, only {found} available")]
    NotEnoughPlanes { crtc: u32, needed: usize, found: usize },

    #[error("property {name} not found on object {object}")]
    PropertyNotFound { object: u32, name: String },

    #[error("invalid atomic property: object {object} property {property}")]
    InvalidProperty { object: u32, property: u32 },

    #[error("buffer allocation failed: {0}")]
    BufferAlloc(String),

    #[error("mode setting failed: {0}")]
    ModeSetting(String),

    #[error("atomic commit failed: {0}")]
    AtomicCommit(#[source] std::io::Error),

    #[error("output {0} does not exist")]
    InvalidOutput(usize),

    #[error("client capability not supported: {0}")]
    Capability(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("DRM error: {0}")]
    Drm(String),
}
