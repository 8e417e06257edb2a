//! Kernel mode-setting seam
//!
//! Everything the backend asks of the kernel goes through [`KmsDevice`].
//! Object IDs are the raw 32-bit ids the kernel hands out; 0 never names
//! a live object.

use crate::{Error, Result};
use drm::buffer::DrmFourcc;
use std::io;
use std::ptr::NonNull;

/// Kind of mode object a property table belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Connector,
    Crtc,
    Plane,
}

/// Connector class, only the embedded panel types are told apart
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectorKind {
    Lvds,
    EmbeddedDisplayPort,
    Dsi,
    Other,
}

/// A display mode as reported on a connector
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModeInfo {
    pub name: String,
    pub hdisplay: u16,
    pub vdisplay: u16,
    pub vrefresh: u32,
    pub preferred: bool,
}

/// DRM connector info
#[derive(Debug, Clone)]
pub struct ConnectorInfo {
    pub id: u32,
    pub kind: ConnectorKind,
    pub connected: bool,
    pub modes: Vec<ModeInfo>,
    /// Encoder currently attached, if any
    pub current_encoder: Option<u32>,
    /// Encoders this connector can be driven by
    pub encoders: Vec<u32>,
}

impl ConnectorInfo {
    /// Connected and able to show at least one mode
    pub fn is_usable(&self) -> bool {
        self.connected && !self.modes.is_empty()
    }
}

/// DRM encoder info
#[derive(Debug, Clone)]
pub struct EncoderInfo {
    pub id: u32,
    /// CRTC the encoder is currently bound to
    pub crtc: Option<u32>,
    /// Bitmask over the resource CRTC list
    pub possible_crtcs: u32,
}

/// DRM plane info
#[derive(Debug, Clone)]
pub struct PlaneInfo {
    pub id: u32,
    /// Bitmask over the resource CRTC list
    pub possible_crtcs: u32,
}

/// DRM resources enumeration
#[derive(Debug, Clone, Default)]
pub struct Resources {
    pub connectors: Vec<u32>,
    pub encoders: Vec<u32>,
    pub crtcs: Vec<u32>,
}

impl Resources {
    /// Position of a CRTC in the resource list, i.e. its bit in possible-CRTC masks
    pub fn crtc_index(&self, crtc: u32) -> Option<usize> {
        self.crtcs.iter().position(|&c| c == crtc)
    }
}

/// One property attached to a mode object
#[derive(Debug, Clone)]
pub struct Property {
    pub name: String,
    pub id: u32,
    pub value: u64,
}

/// A kernel dumb buffer
#[derive(Debug, Clone, Copy)]
pub struct DumbBuffer {
    pub handle: u32,
    pub width: u32,
    pub height: u32,
    pub format: DrmFourcc,
    /// Bytes per scanline, may exceed width * bpp / 8
    pub pitch: u32,
    /// Total size in bytes
    pub size: u64,
    pub bpp: u32,
}

/// A CPU mapping of a dumb buffer
#[derive(Debug)]
pub struct Mapping {
    ptr: NonNull<u8>,
    len: usize,
}

impl Mapping {
    /// # Safety
    /// `ptr` must point to `len` writable bytes that stay valid until the
    /// mapping is handed back to [`KmsDevice::unmap`].
    pub unsafe fn from_raw_parts(ptr: NonNull<u8>, len: usize) -> Self {
        Self { ptr, len }
    }

    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// One (object, property, value) triple of an atomic request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AtomicEntry {
    pub object: u32,
    pub property: u32,
    pub value: u64,
}

/// An atomic mode-setting request under construction
#[derive(Debug, Clone, Default)]
pub struct AtomicRequest {
    entries: Vec<AtomicEntry>,
}

impl AtomicRequest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a property write; zero ids never name a kernel object
    pub fn add(&mut self, object: u32, property: u32, value: u64) -> Result<()> {
        if object == 0 || property == 0 {
            return Err(Error::InvalidProperty { object, property });
        }
        self.entries.push(AtomicEntry {
            object,
            property,
            value,
        });
        Ok(())
    }

    pub fn entries(&self) -> &[AtomicEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Last value queued for a property on an object
    pub fn value_of(&self, object: u32, property: u32) -> Option<u64> {
        self.entries
            .iter()
            .rev()
            .find(|e| e.object == object && e.property == property)
            .map(|e| e.value)
    }
}

/// Access to a kernel display device
///
/// All calls are blocking and complete before returning. Implementations
/// are used from a single thread.
pub trait KmsDevice {
    /// Whether the driver can allocate dumb buffers
    fn supports_dumb_buffers(&self) -> io::Result<bool>;

    /// Enable universal planes and atomic mode setting for this client
    fn enable_atomic(&self) -> io::Result<()>;

    fn resources(&self) -> io::Result<Resources>;
    fn connector(&self, id: u32) -> io::Result<ConnectorInfo>;
    fn encoder(&self, id: u32) -> io::Result<EncoderInfo>;
    fn plane_ids(&self) -> io::Result<Vec<u32>>;
    fn plane(&self, id: u32) -> io::Result<PlaneInfo>;

    /// Properties of a mode object with their current values
    fn properties(&self, object: u32, kind: ObjectKind) -> io::Result<Vec<Property>>;

    fn property_blob(&self, blob: u64) -> io::Result<Vec<u8>>;

    /// Serialize the connector's mode at `mode_index` into a property blob
    fn create_mode_blob(&self, connector: u32, mode_index: usize) -> io::Result<u32>;
    fn destroy_blob(&self, blob: u32) -> io::Result<()>;

    /// Allocate a `width` x `height` dumb buffer that will be scanned out as `format`
    fn create_dumb_buffer(
        &self,
        width: u32,
        height: u32,
        format: DrmFourcc,
        bpp: u32,
    ) -> io::Result<DumbBuffer>;
    fn map_dumb_buffer(&self, buffer: &DumbBuffer) -> io::Result<Mapping>;
    fn unmap(&self, mapping: Mapping) -> io::Result<()>;
    fn destroy_dumb_buffer(&self, handle: u32) -> io::Result<()>;

    /// Wrap a dumb buffer in a single-plane framebuffer object of its format
    fn add_framebuffer(&self, buffer: &DumbBuffer) -> io::Result<u32>;
    fn remove_framebuffer(&self, fb: u32) -> io::Result<()>;

    fn atomic_commit(&self, request: &AtomicRequest, allow_modeset: bool) -> io::Result<()>;
}
