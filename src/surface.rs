//! Dumb-buffer surfaces and the front/back ring
//!
//! A [`Surface`] is a kernel dumb buffer wrapped in a framebuffer object and
//! mapped for CPU writes. Dropping it releases all three.

use crate::kms::{DumbBuffer, KmsDevice, Mapping};
use crate::{Error, Result};
use drm::buffer::DrmFourcc;
use std::rc::Rc;
use tracing::{error, info, warn};

/// Renderer pixel layout, in memory byte order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    Abgr,
    Bgra,
    Rgbx,
    Argb,
    Rgb565,
}

impl PixelFormat {
    /// Format selected by cargo features; the first enabled of
    /// abgr, bgra, rgbx, argb wins, RGB565 when none is.
    pub const fn compiled() -> Self {
        if cfg!(feature = "abgr") {
            PixelFormat::Abgr
        } else if cfg!(feature = "bgra") {
            PixelFormat::Bgra
        } else if cfg!(feature = "rgbx") {
            PixelFormat::Rgbx
        } else if cfg!(feature = "argb") {
            PixelFormat::Argb
        } else {
            PixelFormat::Rgb565
        }
    }

    /// DRM fourcc with the same memory layout. DRM codes are little-endian
    /// so byte order reads reversed.
    pub fn fourcc(self) -> DrmFourcc {
        match self {
            PixelFormat::Abgr => DrmFourcc::Rgba8888,
            PixelFormat::Bgra => DrmFourcc::Argb8888,
            PixelFormat::Rgbx => DrmFourcc::Xbgr8888,
            PixelFormat::Argb => DrmFourcc::Bgra8888,
            PixelFormat::Rgb565 => DrmFourcc::Rgb565,
        }
    }

    pub fn bpp(self) -> u32 {
        match self {
            PixelFormat::Rgb565 => 16,
            _ => 32,
        }
    }

    pub fn pixel_bytes(self) -> u32 {
        self.bpp() / 8
    }
}

/// A CPU-writable scanout buffer
pub struct Surface<D: KmsDevice> {
    device: Rc<D>,
    width: u32,
    height: u32,
    format: PixelFormat,
    buffer: DumbBuffer,
    fb_id: u32,
    mapping: Option<Mapping>,
}

impl<D: KmsDevice> std::fmt::Debug for Surface<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Surface")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("format", &self.format)
            .field("fb_id", &self.fb_id)
            .field("handle", &self.buffer.handle)
            .finish()
    }
}

impl<D: KmsDevice> Surface<D> {
    /// Allocate, wrap and map a `width` x `height` buffer. Whatever was
    /// acquired before a failing step is released again.
    pub fn create(device: &Rc<D>, width: u32, height: u32, format: PixelFormat) -> Result<Self> {
        let buffer = device
            .create_dumb_buffer(width, height, format.fourcc(), format.bpp())
            .map_err(|e| {
                error!("Failed to create dumb buffer: errno {:?}", e.raw_os_error());
                Error::BufferAlloc(format!("create dumb buffer: {}", e))
            })?;
        info!(
            "Allocating buffer with resolution {}x{} pitch: {} bpp: {}, size: {}",
            width, height, buffer.pitch, buffer.bpp, buffer.size
        );

        let fb_id = match device.add_framebuffer(&buffer) {
            Ok(fb_id) => fb_id,
            Err(e) => {
                error!("Failed to add framebuffer: errno {:?}", e.raw_os_error());
                release_dumb(&**device, buffer.handle);
                return Err(Error::BufferAlloc(format!("add framebuffer: {}", e)));
            }
        };

        let mapping = match device.map_dumb_buffer(&buffer) {
            Ok(mapping) => mapping,
            Err(e) => {
                error!("Failed to map dumb buffer: errno {:?}", e.raw_os_error());
                release_fb(&**device, fb_id);
                release_dumb(&**device, buffer.handle);
                return Err(Error::BufferAlloc(format!("map dumb buffer: {}", e)));
            }
        };
        info!("Framebuffer of size {} allocated @ {:p}", buffer.size, mapping.as_ptr());

        Ok(Self {
            device: Rc::clone(device),
            width,
            height,
            format,
            buffer,
            fb_id,
            mapping: Some(mapping),
        })
    }

    /// Release the buffer now; same as dropping it
    pub fn destroy(self) {}

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Stride in bytes, may be larger than width * pixel_bytes
    pub fn row_bytes(&self) -> u32 {
        self.buffer.pitch
    }

    pub fn pixel_bytes(&self) -> u32 {
        self.format.pixel_bytes()
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn fb_id(&self) -> u32 {
        self.fb_id
    }

    /// Pixel memory, `height * row_bytes` bytes
    pub fn data(&mut self) -> &mut [u8] {
        match &self.mapping {
            // SAFETY: the mapping stays valid until drop and `&mut self`
            // keeps the slice unique
            Some(m) => unsafe { std::slice::from_raw_parts_mut(m.as_ptr(), m.len()) },
            None => &mut [],
        }
    }

    /// Raw pointer to the pixel memory, for C callers
    pub fn as_mut_ptr(&self) -> *mut u8 {
        self.mapping
            .as_ref()
            .map_or(std::ptr::null_mut(), |m| m.as_ptr())
    }
}

fn release_fb<D: KmsDevice>(device: &D, fb_id: u32) {
    if let Err(e) = device.remove_framebuffer(fb_id) {
        warn!("Failed to remove framebuffer {}: {}", fb_id, e);
    }
}

fn release_dumb<D: KmsDevice>(device: &D, handle: u32) {
    if let Err(e) = device.destroy_dumb_buffer(handle) {
        warn!("Failed to destroy dumb buffer {}: {}", handle, e);
    }
}

impl<D: KmsDevice> Drop for Surface<D> {
    fn drop(&mut self) {
        // Best effort, keep going after each failed step
        if let Some(mapping) = self.mapping.take() {
            if let Err(e) = self.device.unmap(mapping) {
                warn!("Failed to unmap framebuffer {}: {}", self.fb_id, e);
            }
        }
        release_fb(&*self.device, self.fb_id);
        release_dumb(&*self.device, self.buffer.handle);
    }
}

/// Two surfaces used in strict alternation
#[derive(Debug)]
pub struct SurfaceRing<D: KmsDevice> {
    surfaces: [Surface<D>; 2],
    current: usize,
}

impl<D: KmsDevice> SurfaceRing<D> {
    /// Allocate both buffers of identical size and format
    pub fn create(device: &Rc<D>, width: u32, height: u32, format: PixelFormat) -> Result<Self> {
        let front = Surface::create(device, width, height, format)?;
        let back = Surface::create(device, width, height, format)?;
        Ok(Self {
            surfaces: [front, back],
            current: 0,
        })
    }

    pub fn current_index(&self) -> usize {
        self.current
    }

    pub fn current(&self) -> &Surface<D> {
        &self.surfaces[self.current]
    }

    pub fn current_mut(&mut self) -> &mut Surface<D> {
        &mut self.surfaces[self.current]
    }

    /// Swap front and back, returning the new current surface
    pub fn toggle(&mut self) -> &mut Surface<D> {
        self.current = 1 - self.current;
        &mut self.surfaces[self.current]
    }
}
