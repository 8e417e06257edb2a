//! In-memory KMS device for tests
//!
//! Records every atomic commit and counts every acquire/release so tests
//! can check that nothing leaks.

use crate::kms::{
    AtomicRequest, ConnectorInfo, ConnectorKind, DumbBuffer, EncoderInfo, KmsDevice, Mapping,
    ModeInfo, ObjectKind, PlaneInfo, Property, Resources,
};
use drm::buffer::DrmFourcc;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::io;
use std::ptr::NonNull;
use std::rc::Rc;

pub const CONNECTOR_PROPS: &[&str] = &["CRTC_ID", "DPMS"];
pub const CRTC_PROPS: &[&str] = &["ACTIVE", "MODE_ID"];
pub const PLANE_PROPS: &[&str] = &[
    "FB_ID", "CRTC_ID", "SRC_X", "SRC_Y", "SRC_W", "SRC_H", "CRTC_X", "CRTC_Y", "CRTC_W",
    "CRTC_H",
];

/// Acquire/release call counts
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Counters {
    pub dumb_created: usize,
    pub dumb_destroyed: usize,
    pub fb_added: usize,
    pub fb_removed: usize,
    pub mapped: usize,
    pub unmapped: usize,
    pub blobs_created: usize,
    pub blobs_destroyed: usize,
}

impl Counters {
    /// Every acquisition has a matching release
    pub fn balanced(&self) -> bool {
        self.dumb_created == self.dumb_destroyed
            && self.fb_added == self.fb_removed
            && self.mapped == self.unmapped
            && self.blobs_created == self.blobs_destroyed
    }
}

/// Calls that can be made to fail
#[derive(Debug, Default, Clone, Copy)]
pub struct Failures {
    pub dumb_cap: bool,
    pub atomic_cap: bool,
    pub create_dumb: bool,
    pub add_fb: bool,
    pub map: bool,
    pub commit: bool,
    /// Fail only the Nth dumb-buffer creation (0-based)
    pub create_dumb_at: Option<usize>,
}

#[derive(Default)]
struct State {
    resources: Resources,
    connectors: HashMap<u32, ConnectorInfo>,
    encoders: HashMap<u32, EncoderInfo>,
    planes: Vec<PlaneInfo>,
    properties: HashMap<u32, Vec<Property>>,
    blobs: HashMap<u64, Vec<u8>>,
    memory: HashMap<u32, Box<[u8]>>,
    framebuffers: HashMap<u32, DrmFourcc>,
    commits: Vec<(AtomicRequest, bool)>,
    counters: Counters,
    failures: Failures,
}

pub struct MockDevice {
    state: RefCell<State>,
    next_id: Cell<u32>,
    atomic_enabled: Cell<bool>,
}

fn fail(what: &str) -> io::Error {
    io::Error::from_raw_os_error(match what {
        "map" => libc::ENOMEM,
        _ => libc::EINVAL,
    })
}

pub fn mode(w: u16, h: u16, preferred: bool) -> ModeInfo {
    ModeInfo {
        name: format!("{}x{}", w, h),
        hdisplay: w,
        vdisplay: h,
        vrefresh: 60,
        preferred,
    }
}

impl MockDevice {
    pub fn new() -> Self {
        Self {
            state: RefCell::new(State::default()),
            next_id: Cell::new(1),
            atomic_enabled: Cell::new(false),
        }
    }

    fn alloc_id(&self) -> u32 {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        id
    }

    fn add_props(&self, object: u32, names: &[&str]) {
        let props = names
            .iter()
            .map(|name| Property {
                name: name.to_string(),
                id: self.alloc_id(),
                value: 0,
            })
            .collect();
        self.state.borrow_mut().properties.insert(object, props);
    }

    pub fn add_crtc(&self) -> u32 {
        let id = self.alloc_id();
        self.state.borrow_mut().resources.crtcs.push(id);
        self.add_props(id, CRTC_PROPS);
        id
    }

    pub fn add_encoder(&self, crtc: Option<u32>, possible_crtcs: u32) -> u32 {
        let id = self.alloc_id();
        let mut state = self.state.borrow_mut();
        state.resources.encoders.push(id);
        state.encoders.insert(
            id,
            EncoderInfo {
                id,
                crtc,
                possible_crtcs,
            },
        );
        id
    }

    pub fn add_connector(
        &self,
        kind: ConnectorKind,
        connected: bool,
        modes: Vec<ModeInfo>,
        current_encoder: Option<u32>,
        encoders: Vec<u32>,
    ) -> u32 {
        let id = self.alloc_id();
        {
            let mut state = self.state.borrow_mut();
            state.resources.connectors.push(id);
            state.connectors.insert(
                id,
                ConnectorInfo {
                    id,
                    kind,
                    connected,
                    modes,
                    current_encoder,
                    encoders,
                },
            );
        }
        self.add_props(id, CONNECTOR_PROPS);
        id
    }

    pub fn add_plane(&self, possible_crtcs: u32) -> u32 {
        let id = self.alloc_id();
        self.state
            .borrow_mut()
            .planes
            .push(PlaneInfo { id, possible_crtcs });
        self.add_props(id, PLANE_PROPS);
        id
    }

    /// Attach a blob property (e.g. the topology text) to an object
    pub fn set_blob_property(&self, object: u32, name: &str, data: &[u8]) {
        let blob = self.alloc_id() as u64;
        let prop = self.alloc_id();
        let mut state = self.state.borrow_mut();
        state.blobs.insert(blob, data.to_vec());
        state.properties.entry(object).or_default().push(Property {
            name: name.to_string(),
            id: prop,
            value: blob,
        });
    }

    /// Drop a property from an object's table
    pub fn remove_property(&self, object: u32, name: &str) {
        if let Some(props) = self.state.borrow_mut().properties.get_mut(&object) {
            props.retain(|p| p.name != name);
        }
    }

    pub fn prop_id(&self, object: u32, name: &str) -> u32 {
        self.state.borrow().properties[&object]
            .iter()
            .find(|p| p.name == name)
            .map(|p| p.id)
            .unwrap_or(0)
    }

    pub fn set_failures(&self, failures: Failures) {
        self.state.borrow_mut().failures = failures;
    }

    pub fn counters(&self) -> Counters {
        self.state.borrow().counters
    }

    pub fn commits(&self) -> Vec<(AtomicRequest, bool)> {
        self.state.borrow().commits.clone()
    }

    pub fn commit_count(&self) -> usize {
        self.state.borrow().commits.len()
    }

    pub fn last_commit(&self) -> Option<AtomicRequest> {
        self.state.borrow().commits.last().map(|(r, _)| r.clone())
    }

    pub fn atomic_enabled(&self) -> bool {
        self.atomic_enabled.get()
    }

    /// Pixel format of a live framebuffer
    pub fn fb_format(&self, fb: u32) -> Option<DrmFourcc> {
        self.state.borrow().framebuffers.get(&fb).copied()
    }

    pub fn live_blobs(&self) -> usize {
        self.state.borrow().blobs.len()
    }

    /// An eDP panel (preferred mode at index 1) on CRTC A plus an HDMI
    /// monitor already driving CRTC B, with a dual-pipe topology blob
    /// and three planes usable on both CRTCs.
    pub fn edp_with_hdmi() -> Fixture {
        let dev = MockDevice::new();
        let crtc_a = dev.add_crtc();
        let crtc_b = dev.add_crtc();
        let enc_a = dev.add_encoder(Some(crtc_a), 0b11);
        let enc_b = dev.add_encoder(Some(crtc_b), 0b11);
        let hdmi = dev.add_connector(
            ConnectorKind::Other,
            true,
            vec![mode(1920, 1080, true)],
            Some(enc_b),
            vec![enc_b],
        );
        let edp = dev.add_connector(
            ConnectorKind::EmbeddedDisplayPort,
            true,
            vec![mode(720, 1280, false), mode(1080, 2340, true)],
            Some(enc_a),
            vec![enc_a],
        );
        dev.set_blob_property(edp, "mode_properties", b"foo\ntopology=sde_dualpipe_dsc\nbar\0");
        let planes = (0..3).map(|_| dev.add_plane(0b11)).collect();
        Fixture {
            dev,
            crtcs: vec![crtc_a, crtc_b],
            connectors: vec![edp, hdmi],
            planes,
        }
    }

    /// Two DSI panels with no encoder bound yet, single-pipe topology each
    pub fn dual_dsi() -> Fixture {
        let dev = MockDevice::new();
        let crtc_a = dev.add_crtc();
        let crtc_b = dev.add_crtc();
        let enc_a = dev.add_encoder(None, 0b11);
        let enc_b = dev.add_encoder(None, 0b11);
        let dsi0 = dev.add_connector(
            ConnectorKind::Dsi,
            true,
            vec![mode(1080, 1920, true)],
            None,
            vec![enc_a],
        );
        let dsi1 = dev.add_connector(
            ConnectorKind::Dsi,
            true,
            vec![mode(480, 640, false)],
            None,
            vec![enc_b],
        );
        dev.set_blob_property(dsi0, "mode_properties", b"topology=sde_singlepipe\n");
        dev.set_blob_property(dsi1, "mode_properties", b"topology=sde_singlepipe\n");
        let planes = vec![dev.add_plane(0b01), dev.add_plane(0b10)];
        Fixture {
            dev,
            crtcs: vec![crtc_a, crtc_b],
            connectors: vec![dsi0, dsi1],
            planes,
        }
    }
}

/// A mock device plus the ids of the objects it was built with
pub struct Fixture {
    pub dev: MockDevice,
    pub crtcs: Vec<u32>,
    pub connectors: Vec<u32>,
    pub planes: Vec<u32>,
}

impl Fixture {
    /// Move the device behind an `Rc`, leaving an empty one in its place
    pub fn share(&mut self) -> Rc<MockDevice> {
        Rc::new(std::mem::replace(&mut self.dev, MockDevice::new()))
    }
}

impl KmsDevice for MockDevice {
    fn supports_dumb_buffers(&self) -> io::Result<bool> {
        Ok(!self.state.borrow().failures.dumb_cap)
    }

    fn enable_atomic(&self) -> io::Result<()> {
        if self.state.borrow().failures.atomic_cap {
            return Err(fail("cap"));
        }
        self.atomic_enabled.set(true);
        Ok(())
    }

    fn resources(&self) -> io::Result<Resources> {
        Ok(self.state.borrow().resources.clone())
    }

    fn connector(&self, id: u32) -> io::Result<ConnectorInfo> {
        self.state
            .borrow()
            .connectors
            .get(&id)
            .cloned()
            .ok_or_else(|| fail("connector"))
    }

    fn encoder(&self, id: u32) -> io::Result<EncoderInfo> {
        self.state
            .borrow()
            .encoders
            .get(&id)
            .cloned()
            .ok_or_else(|| fail("encoder"))
    }

    fn plane_ids(&self) -> io::Result<Vec<u32>> {
        Ok(self.state.borrow().planes.iter().map(|p| p.id).collect())
    }

    fn plane(&self, id: u32) -> io::Result<PlaneInfo> {
        self.state
            .borrow()
            .planes
            .iter()
            .find(|p| p.id == id)
            .cloned()
            .ok_or_else(|| fail("plane"))
    }

    fn properties(&self, object: u32, _kind: ObjectKind) -> io::Result<Vec<Property>> {
        self.state
            .borrow()
            .properties
            .get(&object)
            .cloned()
            .ok_or_else(|| fail("object"))
    }

    fn property_blob(&self, blob: u64) -> io::Result<Vec<u8>> {
        self.state
            .borrow()
            .blobs
            .get(&blob)
            .cloned()
            .ok_or_else(|| fail("blob"))
    }

    fn create_mode_blob(&self, connector: u32, mode_index: usize) -> io::Result<u32> {
        let name = {
            let state = self.state.borrow();
            let info = state.connectors.get(&connector).ok_or_else(|| fail("connector"))?;
            info.modes.get(mode_index).ok_or_else(|| fail("mode"))?.name.clone()
        };
        let id = self.alloc_id();
        let mut state = self.state.borrow_mut();
        state.blobs.insert(id as u64, name.into_bytes());
        state.counters.blobs_created += 1;
        Ok(id)
    }

    fn destroy_blob(&self, blob: u32) -> io::Result<()> {
        let mut state = self.state.borrow_mut();
        state.blobs.remove(&(blob as u64)).ok_or_else(|| fail("blob"))?;
        state.counters.blobs_destroyed += 1;
        Ok(())
    }

    fn create_dumb_buffer(
        &self,
        width: u32,
        height: u32,
        format: DrmFourcc,
        bpp: u32,
    ) -> io::Result<DumbBuffer> {
        let attempt = self.state.borrow().counters.dumb_created;
        let failures = self.state.borrow().failures;
        if failures.create_dumb || failures.create_dumb_at == Some(attempt) {
            return Err(fail("create"));
        }
        let handle = self.alloc_id();
        let pitch = width * bpp / 8;
        let size = pitch as u64 * height as u64;
        let mut state = self.state.borrow_mut();
        state
            .memory
            .insert(handle, vec![0u8; size as usize].into_boxed_slice());
        state.counters.dumb_created += 1;
        Ok(DumbBuffer {
            handle,
            width,
            height,
            format,
            pitch,
            size,
            bpp,
        })
    }

    fn map_dumb_buffer(&self, buffer: &DumbBuffer) -> io::Result<Mapping> {
        let mut state = self.state.borrow_mut();
        if state.failures.map {
            return Err(fail("map"));
        }
        let memory = state
            .memory
            .get_mut(&buffer.handle)
            .ok_or_else(|| fail("handle"))?;
        let len = memory.len();
        let ptr = NonNull::new(memory.as_mut_ptr()).ok_or_else(|| fail("map"))?;
        state.counters.mapped += 1;
        // SAFETY: the boxed slice lives until destroy_dumb_buffer, which
        // callers only issue after unmapping
        Ok(unsafe { Mapping::from_raw_parts(ptr, len) })
    }

    fn unmap(&self, _mapping: Mapping) -> io::Result<()> {
        self.state.borrow_mut().counters.unmapped += 1;
        Ok(())
    }

    fn destroy_dumb_buffer(&self, handle: u32) -> io::Result<()> {
        let mut state = self.state.borrow_mut();
        state.memory.remove(&handle).ok_or_else(|| fail("handle"))?;
        state.counters.dumb_destroyed += 1;
        Ok(())
    }

    fn add_framebuffer(&self, buffer: &DumbBuffer) -> io::Result<u32> {
        if self.state.borrow().failures.add_fb {
            return Err(fail("addfb"));
        }
        if !self.state.borrow().memory.contains_key(&buffer.handle) {
            return Err(fail("handle"));
        }
        let id = self.alloc_id();
        let mut state = self.state.borrow_mut();
        state.framebuffers.insert(id, buffer.format);
        state.counters.fb_added += 1;
        Ok(id)
    }

    fn remove_framebuffer(&self, fb: u32) -> io::Result<()> {
        let mut state = self.state.borrow_mut();
        state.framebuffers.remove(&fb).ok_or_else(|| fail("fb"))?;
        state.counters.fb_removed += 1;
        Ok(())
    }

    fn atomic_commit(&self, request: &AtomicRequest, allow_modeset: bool) -> io::Result<()> {
        let mut state = self.state.borrow_mut();
        if state.failures.commit {
            return Err(fail("commit"));
        }
        state.commits.push((request.clone(), allow_modeset));
        Ok(())
    }
}
