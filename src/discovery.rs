//! Display device discovery
//!
//! Card nodes are probed in minor order. The first one that can allocate
//! dumb buffers and has a connected display wins.

use crate::card::DrmCard;
use crate::config::Config;
use crate::kms::{KmsDevice, Resources};
use crate::topology::first_connected_connector;
use crate::{Error, Result};
use std::io;
use std::path::Path;
use tracing::{debug, info};

/// Why a node was passed over
fn probe<D: KmsDevice>(device: &D) -> std::result::Result<Resources, String> {
    match device.supports_dumb_buffers() {
        Ok(true) => {}
        Ok(false) => return Err("no dumb buffer support".into()),
        Err(e) => return Err(format!("capability query failed: {}", e)),
    }

    let res = device
        .resources()
        .map_err(|e| format!("cannot enumerate resources: {}", e))?;
    if res.crtcs.is_empty() || res.connectors.is_empty() {
        return Err("no CRTCs or connectors".into());
    }
    if first_connected_connector(device, &res).is_none() {
        return Err("no connected display".into());
    }
    Ok(res)
}

/// Probe `card0..cardN` under the configured directory, opening each with
/// `open`, and return the first usable device with its resources.
pub fn discover<D, F>(config: &Config, mut open: F) -> Result<(D, Resources)>
where
    D: KmsDevice,
    F: FnMut(&Path) -> io::Result<D>,
{
    for minor in 0..config.max_minor {
        let path = config.card_path(minor);
        let device = match open(path.as_path()) {
            Ok(device) => device,
            Err(_) => continue,
        };

        match probe(&device) {
            Ok(res) => {
                info!("Using DRM device {}", path.display());
                return Ok((device, res));
            }
            Err(reason) => debug!("Skipping {}: {}", path.display(), reason),
        }
    }

    Err(Error::NoDevice(config.device_dir.display().to_string()))
}

/// Find a real card node
pub fn discover_card(config: &Config) -> Result<(DrmCard, Resources)> {
    discover(config, DrmCard::open)
}
