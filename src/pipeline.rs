//! Atomic pipeline for one output
//!
//! A [`Pipeline`] wires framebuffers through the output's planes to its
//! CRTC and connector. It is either `Active` (scanning out) or `Blanked`
//! (torn down), and every transition is one atomic commit.
//!
//! When a panel needs more than one layer mixer, each plane scans out a
//! vertical strip of the framebuffer:
//!
//! ```text
//!   0            W/N           2W/N          W
//!   ┌─────────────┬─────────────┬─ ─ ─ ─ ─ ─┐
//!   │   plane 0   │   plane 1   │    ...     │  full height
//!   └─────────────┴─────────────┴─ ─ ─ ─ ─ ─┘
//! ```

use crate::kms::{AtomicRequest, KmsDevice, ModeInfo};
use crate::property::{Connector, Crtc, HasProperties, Plane};
use crate::{Error, Result};
use std::rc::Rc;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlankState {
    Blanked,
    Active,
}

/// A rectangle in CRTC pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

/// Split a `width` x `height` area into `count` equal strips, left to right
pub fn partition_planes(width: u32, height: u32, count: usize) -> Vec<Rect> {
    let count = count.max(1) as u32;
    let strip = width / count;
    (0..count)
        .map(|i| Rect {
            x: strip * i,
            y: 0,
            w: strip,
            h: height,
        })
        .collect()
}

/// Source coordinates are 16.16 fixed point
fn fixed(v: u32) -> u64 {
    (v as u64) << 16
}

pub struct Pipeline<D: KmsDevice> {
    device: Rc<D>,
    connector: Connector,
    crtc: Crtc,
    planes: Vec<Plane>,
    /// FB_ID property id per plane, resolved once
    fb_props: Vec<u32>,
    mode: ModeInfo,
    mode_blob: u32,
    state: BlankState,
}

impl<D: KmsDevice> Pipeline<D> {
    /// Build the pipeline and create its mode blob. Starts out blanked.
    pub fn new(
        device: &Rc<D>,
        connector: Connector,
        crtc: Crtc,
        planes: Vec<Plane>,
        mode_index: usize,
        mode: ModeInfo,
    ) -> Result<Self> {
        let fb_props = planes
            .iter()
            .map(|plane| {
                plane.resolve("FB_ID").ok_or_else(|| Error::PropertyNotFound {
                    object: plane.id,
                    name: "FB_ID".to_string(),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let mode_blob = device
            .create_mode_blob(connector.id, mode_index)
            .map_err(|e| Error::ModeSetting(format!("failed to create mode blob: {}", e)))?;
        debug!("Created mode blob {} for CRTC {}", mode_blob, crtc.id);

        Ok(Self {
            device: Rc::clone(device),
            connector,
            crtc,
            planes,
            fb_props,
            mode,
            mode_blob,
            state: BlankState::Blanked,
        })
    }

    pub fn connector_id(&self) -> u32 {
        self.connector.id
    }

    pub fn crtc_id(&self) -> u32 {
        self.crtc.id
    }

    pub fn plane_ids(&self) -> Vec<u32> {
        self.planes.iter().map(|p| p.id).collect()
    }

    pub fn mode(&self) -> &ModeInfo {
        &self.mode
    }

    pub fn mode_blob(&self) -> u32 {
        self.mode_blob
    }

    pub fn state(&self) -> BlankState {
        self.state
    }

    pub fn is_blanked(&self) -> bool {
        self.state == BlankState::Blanked
    }

    /// Request that lights the output up scanning out `fb_id`
    pub fn build_enable(&self, fb_id: u32) -> Result<AtomicRequest> {
        let mut req = AtomicRequest::new();

        self.connector.add_optional(&mut req, "CRTC_ID", self.crtc.id as u64)?;
        self.crtc.add_optional(&mut req, "MODE_ID", self.mode_blob as u64)?;
        self.crtc.add_optional(&mut req, "ACTIVE", 1)?;

        let rects = partition_planes(
            self.mode.hdisplay as u32,
            self.mode.vdisplay as u32,
            self.planes.len(),
        );
        for ((plane, &fb_prop), rect) in self.planes.iter().zip(&self.fb_props).zip(rects) {
            self.populate_plane(&mut req, plane, fb_prop, fb_id, rect)
                .map_err(|e| {
                    error!("Error populating plane {}: {}", plane.id, e);
                    e
                })?;
        }
        Ok(req)
    }

    fn populate_plane(
        &self,
        req: &mut AtomicRequest,
        plane: &Plane,
        fb_prop: u32,
        fb_id: u32,
        rect: Rect,
    ) -> Result<()> {
        plane.add_optional(req, "zpos", 0)?;
        req.add(plane.id, fb_prop, fb_id as u64)?;
        plane.add_required(req, "SRC_X", fixed(rect.x))?;
        plane.add_required(req, "SRC_Y", fixed(rect.y))?;
        plane.add_required(req, "SRC_W", fixed(rect.w))?;
        plane.add_required(req, "SRC_H", fixed(rect.h))?;
        plane.add_required(req, "CRTC_X", rect.x as u64)?;
        plane.add_required(req, "CRTC_Y", rect.y as u64)?;
        plane.add_required(req, "CRTC_W", rect.w as u64)?;
        plane.add_required(req, "CRTC_H", rect.h as u64)?;
        plane.add_required(req, "CRTC_ID", self.crtc.id as u64)
    }

    /// Request that detaches everything from the CRTC and switches it off
    pub fn build_teardown(&self) -> Result<AtomicRequest> {
        let mut req = AtomicRequest::new();

        self.connector.add_optional(&mut req, "CRTC_ID", 0)?;
        self.crtc.add_optional(&mut req, "MODE_ID", 0)?;
        self.crtc.add_optional(&mut req, "ACTIVE", 0)?;

        for (plane, &fb_prop) in self.planes.iter().zip(&self.fb_props) {
            plane.add_required(&mut req, "CRTC_ID", 0).map_err(|e| {
                error!("Failed to tear down plane {}: {}", plane.id, e);
                e
            })?;
            req.add(plane.id, fb_prop, 0)?;
        }
        Ok(req)
    }

    /// Request that points every plane at `fb_id`
    pub fn build_plane_update(&self, fb_id: u32) -> Result<AtomicRequest> {
        let mut req = AtomicRequest::new();
        for (plane, &fb_prop) in self.planes.iter().zip(&self.fb_props) {
            req.add(plane.id, fb_prop, fb_id as u64)?;
        }
        Ok(req)
    }

    fn commit(&self, req: &AtomicRequest) -> Result<()> {
        self.device.atomic_commit(req, true).map_err(|e| {
            error!(
                "Atomic commit failed on CRTC {}, errno {:?}: {}",
                self.crtc.id,
                e.raw_os_error(),
                e
            );
            Error::AtomicCommit(e)
        })
    }

    /// Blank or unblank, showing `fb_id` when unblanking. Returns whether a
    /// commit was made; asking for the current state is a no-op. A failed
    /// commit leaves the state as it was.
    pub fn set_blank(&mut self, blank: bool, fb_id: u32) -> Result<bool> {
        let target = if blank {
            BlankState::Blanked
        } else {
            BlankState::Active
        };
        if target == self.state {
            return Ok(false);
        }

        let req = if blank {
            self.build_teardown()?
        } else {
            self.build_enable(fb_id)?
        };
        self.commit(&req)?;

        self.state = target;
        info!("CRTC {} is now {:?}", self.crtc.id, target);
        Ok(true)
    }

    /// Swap the planes over to `fb_id`, leaving CRTC and connector alone
    pub fn update_plane_fb(&self, fb_id: u32) -> Result<()> {
        let req = self.build_plane_update(fb_id)?;
        self.commit(&req)
    }
}

impl<D: KmsDevice> Drop for Pipeline<D> {
    fn drop(&mut self) {
        if let Err(e) = self.device.destroy_blob(self.mode_blob) {
            warn!("Failed to destroy mode blob {}: {}", self.mode_blob, e);
        }
    }
}
