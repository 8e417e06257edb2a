//! Double-buffered DRM/KMS framebuffer backend
//!
//! Presents CPU-drawn pixels on a display through atomic kernel mode
//! setting. Built for minimal on-device UIs (recovery consoles, boot
//! splash) that render into a plain memory buffer and need it on the panel.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │              Renderer (Rust, or C via c_api)                │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                   init / flip / blank
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Backend facade                         │
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────────────┐ │
//! │  │ Discovery + │  │  Surfaces   │  │ Pipeline            │ │
//! │  │ Topology    │  │ (dumb bufs) │  │ (atomic requests)   │ │
//! │  └─────────────┘  └─────────────┘  └─────────────────────┘ │
//! │                 Property tables per object                  │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                     KmsDevice (drm-rs)
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 /dev/dri/cardN (kernel KMS)                 │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use kms_framebuffer::Backend;
//!
//! # fn main() -> kms_framebuffer::Result<()> {
//! let mut backend = Backend::init()?;
//! backend.surface().data().fill(0xff);
//! let next = backend.flip();
//! next.data().fill(0x00);
//! backend.blank(true)?;
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod c_api;
pub mod card;
pub mod config;
pub mod discovery;
pub mod error;
pub mod kms;
pub mod pipeline;
pub mod property;
pub mod surface;
pub mod topology;

#[cfg(test)]
pub(crate) mod mock;

pub use backend::Backend;
pub use card::DrmCard;
pub use config::Config;
pub use error::Error;
pub use kms::KmsDevice;
pub use surface::{PixelFormat, Surface};

/// Result type for this crate
pub type Result<T> = std::result::Result<T, Error>;
