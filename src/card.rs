//! A real DRM device node
//!
//! Everything goes through drm-rs. Dumb buffers stay registered on the
//! card by handle so the trait can hand out plain ids.

use crate::kms::{
    AtomicRequest, ConnectorInfo, ConnectorKind, DumbBuffer, EncoderInfo, KmsDevice, Mapping,
    ModeInfo, ObjectKind, PlaneInfo, Property, Resources,
};
use drm::buffer::{self as drm_buffer, Buffer, DrmFourcc, DrmModifier, PlanarBuffer};
use drm::control::{
    self, atomic::AtomicModeReq, connector, crtc, dumbbuffer, encoder, framebuffer, plane,
    property, AtomicCommitFlags, Device as ControlDevice, FbCmd2Flags, ModeTypeFlags,
    RawResourceHandle, ResourceHandle,
};
use drm::{ClientCapability, Device, DriverCapability};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io;
use std::mem::ManuallyDrop;
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::{AsFd, BorrowedFd};
use std::path::{Path, PathBuf};
use std::ptr::NonNull;
use tracing::{debug, info};

/// An open `/dev/dri/cardN` node
pub struct DrmCard {
    file: File,
    path: PathBuf,
    buffers: RefCell<HashMap<u32, dumbbuffer::DumbBuffer>>,
}

impl fmt::Debug for DrmCard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DrmCard")
            .field("path", &self.path)
            .field("dumb_buffers", &self.buffers.borrow().len())
            .finish()
    }
}

impl AsFd for DrmCard {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.file.as_fd()
    }
}

impl Device for DrmCard {}
impl ControlDevice for DrmCard {}

/// Single-plane view of a dumb buffer for AddFB2
struct SinglePlane<'a>(&'a dumbbuffer::DumbBuffer);

impl PlanarBuffer for SinglePlane<'_> {
    fn size(&self) -> (u32, u32) {
        Buffer::size(self.0)
    }

    fn format(&self) -> DrmFourcc {
        Buffer::format(self.0)
    }

    fn modifier(&self) -> Option<DrmModifier> {
        None
    }

    fn pitches(&self) -> [u32; 4] {
        [Buffer::pitch(self.0), 0, 0, 0]
    }

    fn handles(&self) -> [Option<drm_buffer::Handle>; 4] {
        [Some(Buffer::handle(self.0)), None, None, None]
    }

    fn offsets(&self) -> [u32; 4] {
        [0; 4]
    }
}

fn einval(what: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, what.to_string())
}

fn handle<T: From<RawResourceHandle>>(id: u32) -> io::Result<T> {
    control::from_u32(id).ok_or_else(|| einval("object id 0"))
}

/// Bitmask of `candidates` over the resource CRTC order
fn crtc_mask(all: &[crtc::Handle], candidates: &[crtc::Handle]) -> u32 {
    all.iter()
        .enumerate()
        .filter(|&(i, c)| i < 32 && candidates.contains(c))
        .fold(0, |mask, (i, _)| mask | (1 << i))
}

fn mode_info(mode: &control::Mode) -> ModeInfo {
    let (hdisplay, vdisplay) = mode.size();
    ModeInfo {
        name: mode.name().to_string_lossy().into_owned(),
        hdisplay,
        vdisplay,
        vrefresh: mode.vrefresh(),
        preferred: mode.mode_type().contains(ModeTypeFlags::PREFERRED),
    }
}

impl DrmCard {
    /// Open a device node read/write
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_CLOEXEC)
            .open(path)?;
        debug!("Opened DRM node {}", path.display());
        Ok(Self {
            file,
            path: path.to_path_buf(),
            buffers: RefCell::new(HashMap::new()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn crtc_mask_for(&self, filter: control::CrtcListFilter) -> io::Result<u32> {
        let res = self.resource_handles()?;
        Ok(crtc_mask(res.crtcs(), &res.filter_crtcs(filter)))
    }

    fn raw_properties<H: ResourceHandle>(&self, object: H) -> io::Result<Vec<Property>> {
        let set = self.get_properties(object)?;
        let (ids, values) = set.as_props_and_values();
        let mut props = Vec::with_capacity(ids.len());
        for (&id, &value) in ids.iter().zip(values.iter()) {
            let info = self.get_property(id)?;
            props.push(Property {
                name: info.name().to_string_lossy().into_owned(),
                id: id.into(),
                value,
            });
        }
        Ok(props)
    }
}

impl KmsDevice for DrmCard {
    fn supports_dumb_buffers(&self) -> io::Result<bool> {
        Ok(self.get_driver_capability(DriverCapability::DumbBuffer)? != 0)
    }

    fn enable_atomic(&self) -> io::Result<()> {
        self.set_client_capability(ClientCapability::UniversalPlanes, true)?;
        self.set_client_capability(ClientCapability::Atomic, true)?;
        info!("Enabled universal planes and atomic mode setting");
        Ok(())
    }

    fn resources(&self) -> io::Result<Resources> {
        let res = self.resource_handles()?;
        Ok(Resources {
            connectors: res.connectors().iter().map(|&h| h.into()).collect(),
            encoders: res.encoders().iter().map(|&h| h.into()).collect(),
            crtcs: res.crtcs().iter().map(|&h| h.into()).collect(),
        })
    }

    fn connector(&self, id: u32) -> io::Result<ConnectorInfo> {
        let info = self.get_connector(handle::<connector::Handle>(id)?, false)?;
        let kind = match info.interface() {
            connector::Interface::LVDS => ConnectorKind::Lvds,
            connector::Interface::EmbeddedDisplayPort => ConnectorKind::EmbeddedDisplayPort,
            connector::Interface::DSI => ConnectorKind::Dsi,
            _ => ConnectorKind::Other,
        };
        Ok(ConnectorInfo {
            id,
            kind,
            connected: info.state() == connector::State::Connected,
            modes: info.modes().iter().map(mode_info).collect(),
            current_encoder: info.current_encoder().map(Into::into),
            encoders: info.encoders().iter().map(|&h| h.into()).collect(),
        })
    }

    fn encoder(&self, id: u32) -> io::Result<EncoderInfo> {
        let info = self.get_encoder(handle::<encoder::Handle>(id)?)?;
        Ok(EncoderInfo {
            id,
            crtc: info.crtc().map(Into::into),
            possible_crtcs: self.crtc_mask_for(info.possible_crtcs())?,
        })
    }

    fn plane_ids(&self) -> io::Result<Vec<u32>> {
        Ok(self.plane_handles()?.into_iter().map(Into::into).collect())
    }

    fn plane(&self, id: u32) -> io::Result<PlaneInfo> {
        let info = self.get_plane(handle::<plane::Handle>(id)?)?;
        Ok(PlaneInfo {
            id,
            possible_crtcs: self.crtc_mask_for(info.possible_crtcs())?,
        })
    }

    fn properties(&self, object: u32, kind: ObjectKind) -> io::Result<Vec<Property>> {
        match kind {
            ObjectKind::Connector => self.raw_properties(handle::<connector::Handle>(object)?),
            ObjectKind::Crtc => self.raw_properties(handle::<crtc::Handle>(object)?),
            ObjectKind::Plane => self.raw_properties(handle::<plane::Handle>(object)?),
        }
    }

    fn property_blob(&self, blob: u64) -> io::Result<Vec<u8>> {
        self.get_property_blob(blob)
    }

    fn create_mode_blob(&self, connector: u32, mode_index: usize) -> io::Result<u32> {
        let info = self.get_connector(handle::<connector::Handle>(connector)?, false)?;
        let mode = info
            .modes()
            .get(mode_index)
            .ok_or_else(|| einval("mode index out of range"))?;
        match self.create_property_blob(mode)? {
            property::Value::Blob(id) => Ok(id as u32),
            _ => Err(einval("kernel returned a non-blob value")),
        }
    }

    fn destroy_blob(&self, blob: u32) -> io::Result<()> {
        self.destroy_property_blob(blob as u64)
    }

    fn create_dumb_buffer(
        &self,
        width: u32,
        height: u32,
        format: DrmFourcc,
        bpp: u32,
    ) -> io::Result<DumbBuffer> {
        let db = ControlDevice::create_dumb_buffer(self, (width, height), format, bpp)?;
        let buffer = DumbBuffer {
            handle: Buffer::handle(&db).into(),
            width,
            height,
            format,
            pitch: Buffer::pitch(&db),
            size: Buffer::pitch(&db) as u64 * height as u64,
            bpp,
        };
        self.buffers.borrow_mut().insert(buffer.handle, db);
        Ok(buffer)
    }

    fn map_dumb_buffer(&self, buffer: &DumbBuffer) -> io::Result<Mapping> {
        let mut buffers = self.buffers.borrow_mut();
        let db = buffers
            .get_mut(&buffer.handle)
            .ok_or_else(|| einval("unknown dumb buffer"))?;
        // Unmapped explicitly through `unmap`, not when the guard drops
        let mut mapping = ManuallyDrop::new(ControlDevice::map_dumb_buffer(self, db)?);
        let bytes: &mut [u8] = mapping.as_mut();
        let len = bytes.len();
        let ptr = NonNull::new(bytes.as_mut_ptr()).ok_or_else(|| einval("mmap returned null"))?;
        // SAFETY: the kernel mapping outlives the borrow of `db`; it stays
        // until munmap in `unmap`
        Ok(unsafe { Mapping::from_raw_parts(ptr, len) })
    }

    fn unmap(&self, mapping: Mapping) -> io::Result<()> {
        // SAFETY: the mapping came from map_dumb_buffer and is unmapped once
        let ret = unsafe { libc::munmap(mapping.as_ptr() as *mut libc::c_void, mapping.len()) };
        if ret != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn destroy_dumb_buffer(&self, handle: u32) -> io::Result<()> {
        let db = self
            .buffers
            .borrow_mut()
            .remove(&handle)
            .ok_or_else(|| einval("unknown dumb buffer"))?;
        ControlDevice::destroy_dumb_buffer(self, db)
    }

    fn add_framebuffer(&self, buffer: &DumbBuffer) -> io::Result<u32> {
        let buffers = self.buffers.borrow();
        let db = buffers
            .get(&buffer.handle)
            .ok_or_else(|| einval("unknown dumb buffer"))?;
        let fb = self.add_planar_framebuffer(&SinglePlane(db), FbCmd2Flags::empty())?;
        Ok(fb.into())
    }

    fn remove_framebuffer(&self, fb: u32) -> io::Result<()> {
        self.destroy_framebuffer(handle::<framebuffer::Handle>(fb)?)
    }

    fn atomic_commit(&self, request: &AtomicRequest, allow_modeset: bool) -> io::Result<()> {
        let mut req = AtomicModeReq::new();
        for entry in request.entries() {
            let object = RawResourceHandle::new(entry.object).ok_or_else(|| einval("object id 0"))?;
            req.add_raw_property(object, handle::<property::Handle>(entry.property)?, entry.value);
        }
        let flags = if allow_modeset {
            AtomicCommitFlags::ALLOW_MODESET
        } else {
            AtomicCommitFlags::empty()
        };
        ControlDevice::atomic_commit(self, flags, req)
    }
}
