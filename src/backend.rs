//! Backend facade: init, flip, blank
//!
//! A [`Backend`] owns the device and one [`Output`] per driven panel.
//! Output 0 is the main panel and is lit up by `init`; further outputs
//! start blanked.

use crate::card::DrmCard;
use crate::config::Config;
use crate::discovery;
use crate::kms::{KmsDevice, ModeInfo, Resources};
use crate::pipeline::{BlankState, Pipeline};
use crate::property::{Connector, Crtc, Plane};
use crate::surface::{PixelFormat, Surface, SurfaceRing};
use crate::topology::{self, SelectedConnector};
use crate::{Error, Result};
use std::rc::Rc;
use tracing::{debug, info, warn};

/// One panel: its atomic pipeline and its front/back buffers
pub struct Output<D: KmsDevice> {
    // Field order is drop order: the mode blob goes before the surfaces
    pipeline: Pipeline<D>,
    ring: SurfaceRing<D>,
}

impl<D: KmsDevice> Output<D> {
    pub fn pipeline(&self) -> &Pipeline<D> {
        &self.pipeline
    }

    pub fn surface(&mut self) -> &mut Surface<D> {
        self.ring.current_mut()
    }

    fn set_blank(&mut self, blank: bool) -> Result<bool> {
        let fb_id = self.ring.current().fb_id();
        self.pipeline.set_blank(blank, fb_id)
    }

    fn flip(&mut self) -> &mut Surface<D> {
        if self.pipeline.is_blanked() {
            debug!("CRTC {} is blanked, skipping plane update", self.pipeline.crtc_id());
        } else if let Err(e) = self.pipeline.update_plane_fb(self.ring.current().fb_id()) {
            warn!("Plane update failed: {}", e);
        }
        self.ring.toggle()
    }
}

/// Double-buffered KMS display backend
pub struct Backend<D: KmsDevice = DrmCard> {
    outputs: Vec<Output<D>>,
    active: usize,
    // Dropped last, after every object that references it
    device: Rc<D>,
}

impl Backend<DrmCard> {
    /// Discover a card with the environment's configuration and light up
    /// its main panel
    pub fn init() -> Result<Self> {
        Self::init_with(&Config::from_env()?)
    }

    pub fn init_with(config: &Config) -> Result<Self> {
        let (card, res) = discovery::discover_card(config)?;
        Self::from_device(card, res, config)
    }
}

impl<D: KmsDevice> Backend<D> {
    pub fn from_device(device: D, res: Resources, config: &Config) -> Result<Self> {
        Self::from_shared(Rc::new(device), res, config)
    }

    /// Full init sequence on an already discovered device. Anything
    /// acquired before a failing step is released again.
    pub fn from_shared(device: Rc<D>, res: Resources, config: &Config) -> Result<Self> {
        device
            .enable_atomic()
            .map_err(|e| Error::Capability(format!("atomic mode setting: {}", e)))?;

        let selected = topology::select_connectors(&*device, &res, config.max_outputs)?;

        let mut crtcs: Vec<u32> = Vec::with_capacity(selected.len());
        for conn in &selected {
            let crtc = topology::find_crtc_for_connector(&*device, &res, &conn.info, &crtcs)
                .ok_or(Error::NoCrtc(conn.id()))?;
            info!("Connector {} driven by CRTC {}", conn.id(), crtc);
            crtcs.push(crtc);
        }

        // Secondary outputs start blanked, so their CRTCs are switched off too
        topology::disable_non_main_crtcs(&*device, &res, &crtcs[..1]);

        let mut outputs = Vec::with_capacity(selected.len());
        let mut claimed_planes: Vec<u32> = Vec::new();
        for (conn, &crtc) in selected.iter().zip(&crtcs) {
            let output = Self::build_output(&device, &res, config, conn, crtc, &claimed_planes)?;
            claimed_planes.extend(output.pipeline.plane_ids());
            outputs.push(output);
        }

        let mut backend = Self {
            outputs,
            active: 0,
            device,
        };
        // On failure `backend` drops here and releases everything
        backend.blank_output(0, false)?;
        info!("KMS backend ready with {} output(s)", backend.outputs.len());
        Ok(backend)
    }

    fn build_output(
        device: &Rc<D>,
        res: &Resources,
        config: &Config,
        conn: &SelectedConnector,
        crtc_id: u32,
        claimed_planes: &[u32],
    ) -> Result<Output<D>> {
        let mode = conn.mode().clone();
        let ring = SurfaceRing::create(
            device,
            mode.hdisplay as u32,
            mode.vdisplay as u32,
            PixelFormat::compiled(),
        )?;

        let connector = Connector::fetch(&**device, conn.id())?;
        let crtc = Crtc::fetch(&**device, crtc_id)?;

        let layer_mixers =
            topology::resolve_layer_mixers(&**device, &connector, &config.topology_property);
        let plane_ids = topology::select_planes(
            &**device,
            res,
            crtc_id,
            layer_mixers as usize,
            claimed_planes,
        )?;
        let planes = plane_ids
            .into_iter()
            .map(|id| Plane::fetch(&**device, id))
            .collect::<Result<Vec<_>>>()?;

        let pipeline = Pipeline::new(device, connector, crtc, planes, conn.mode_index, mode)?;
        Ok(Output { pipeline, ring })
    }

    fn output_mut(&mut self, index: usize) -> Result<&mut Output<D>> {
        self.outputs.get_mut(index).ok_or(Error::InvalidOutput(index))
    }

    /// Surface to draw the next frame into
    pub fn surface(&mut self) -> &mut Surface<D> {
        let active = self.active;
        self.outputs[active].surface()
    }

    /// Show the current surface and hand back the other one
    pub fn flip(&mut self) -> &mut Surface<D> {
        let active = self.active;
        self.outputs[active].flip()
    }

    /// Blank or unblank the active output
    pub fn blank(&mut self, blank: bool) -> Result<()> {
        self.blank_output(self.active, blank)
    }

    pub fn blank_output(&mut self, index: usize, blank: bool) -> Result<()> {
        self.output_mut(index)?.set_blank(blank).map(|_| ())
    }

    /// Select the output `surface` and `flip` act on
    pub fn set_active_output(&mut self, index: usize) -> Result<()> {
        self.output_mut(index)?;
        self.active = index;
        Ok(())
    }

    pub fn active_output(&self) -> usize {
        self.active
    }

    pub fn has_multiple_outputs(&self) -> bool {
        self.outputs.len() > 1
    }

    pub fn output_count(&self) -> usize {
        self.outputs.len()
    }

    pub fn output(&self, index: usize) -> Result<&Output<D>> {
        self.outputs.get(index).ok_or(Error::InvalidOutput(index))
    }

    pub fn mode(&self, index: usize) -> Result<&ModeInfo> {
        Ok(self.output(index)?.pipeline.mode())
    }

    pub fn blank_state(&self, index: usize) -> Result<BlankState> {
        Ok(self.output(index)?.pipeline.state())
    }

    pub fn device(&self) -> &D {
        &self.device
    }
}

impl<D: KmsDevice> Drop for Backend<D> {
    fn drop(&mut self) {
        for output in &mut self.outputs {
            if let Err(e) = output.set_blank(true) {
                warn!(
                    "Failed to blank CRTC {} during teardown: {}",
                    output.pipeline.crtc_id(),
                    e
                );
            }
        }
        debug!("KMS backend torn down");
    }
}
