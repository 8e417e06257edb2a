//! Display topology: which connectors, CRTCs and planes drive the panel
//!
//! Panel-class connectors (LVDS, eDP, DSI) are the main screens. Each
//! selected connector gets its own CRTC and as many planes as the panel's
//! layer-mixer topology needs.

use crate::kms::{AtomicRequest, ConnectorInfo, ConnectorKind, KmsDevice, ModeInfo, Resources};
use crate::property::{Connector, Crtc, HasProperties};
use crate::{Error, Result};
use tracing::{debug, info, warn};

/// Panel connector types, highest priority first
pub const CONNECTOR_PRIORITY: [ConnectorKind; 3] = [
    ConnectorKind::Lvds,
    ConnectorKind::EmbeddedDisplayPort,
    ConnectorKind::Dsi,
];

/// Layer mixers assumed when the panel does not say
pub const DEFAULT_LAYER_MIXERS: u32 = 2;

const TOPOLOGY_KEY: &str = "topology=";

/// A connector picked for output together with its chosen mode
#[derive(Debug, Clone)]
pub struct SelectedConnector {
    pub info: ConnectorInfo,
    pub mode_index: usize,
}

impl SelectedConnector {
    pub fn id(&self) -> u32 {
        self.info.id
    }

    pub fn mode(&self) -> &ModeInfo {
        &self.info.modes[self.mode_index]
    }
}

/// Query every connector, skipping ones the kernel refuses to describe
fn connectors<D: KmsDevice>(device: &D, res: &Resources) -> Vec<ConnectorInfo> {
    res.connectors
        .iter()
        .filter_map(|&id| match device.connector(id) {
            Ok(info) => Some(info),
            Err(e) => {
                debug!("Skipping connector {}: {}", id, e);
                None
            }
        })
        .collect()
}

/// First connector that is connected and has modes, any type
pub fn first_connected_connector<D: KmsDevice>(
    device: &D,
    res: &Resources,
) -> Option<ConnectorInfo> {
    connectors(device, res).into_iter().find(|c| c.is_usable())
}

/// Index of the preferred mode, or 0 when none is flagged
pub fn select_mode(modes: &[ModeInfo]) -> usize {
    for (i, mode) in modes.iter().enumerate() {
        debug!(
            "Display mode {} resolution: {}x{} @ {} Hz",
            i, mode.hdisplay, mode.vdisplay, mode.vrefresh
        );
        if mode.preferred {
            info!("Choosing display mode #{}", i);
            return i;
        }
    }
    0
}

/// Pick up to `max` panel connectors in priority order, falling back to
/// the first connected connector of any type.
pub fn select_connectors<D: KmsDevice>(
    device: &D,
    res: &Resources,
    max: usize,
) -> Result<Vec<SelectedConnector>> {
    let all = connectors(device, res);

    let mut chosen: Vec<ConnectorInfo> = Vec::new();
    for kind in CONNECTOR_PRIORITY {
        for conn in all.iter().filter(|c| c.kind == kind && c.is_usable()) {
            if chosen.len() >= max {
                break;
            }
            chosen.push(conn.clone());
        }
    }

    if chosen.is_empty() {
        if let Some(conn) = all.into_iter().find(|c| c.is_usable()) {
            debug!("No panel connector, falling back to connector {}", conn.id);
            chosen.push(conn);
        }
    }

    if chosen.is_empty() {
        return Err(Error::NoConnector);
    }

    Ok(chosen
        .into_iter()
        .map(|info| {
            let mode_index = select_mode(&info.modes);
            info!(
                "Selected {:?} connector {} mode {}",
                info.kind, info.id, info.modes[mode_index].name
            );
            SelectedConnector { info, mode_index }
        })
        .collect())
}

/// CRTC for a connector: its bound encoder's CRTC when there is one,
/// otherwise the first free CRTC any of its encoders can drive.
pub fn find_crtc_for_connector<D: KmsDevice>(
    device: &D,
    res: &Resources,
    conn: &ConnectorInfo,
    claimed: &[u32],
) -> Option<u32> {
    if let Some(encoder) = conn.current_encoder.and_then(|id| device.encoder(id).ok()) {
        if let Some(crtc) = encoder.crtc.filter(|&c| c != 0 && !claimed.contains(&c)) {
            return Some(crtc);
        }
    }

    for &encoder_id in &conn.encoders {
        let encoder = match device.encoder(encoder_id) {
            Ok(encoder) => encoder,
            Err(e) => {
                debug!("Skipping encoder {}: {}", encoder_id, e);
                continue;
            }
        };
        let found = res.crtcs.iter().enumerate().find(|&(i, crtc)| {
            i < 32 && encoder.possible_crtcs & (1 << i) != 0 && !claimed.contains(crtc)
        });
        if let Some((_, &crtc)) = found {
            return Some(crtc);
        }
    }

    None
}

/// Set ACTIVE=0 on every CRTC driving a connector that is not one of
/// ours. Returns the number of CRTCs switched off.
pub fn disable_non_main_crtcs<D: KmsDevice>(
    device: &D,
    res: &Resources,
    main_crtcs: &[u32],
) -> usize {
    let mut req = AtomicRequest::new();
    let mut seen: Vec<u32> = Vec::new();

    for conn in connectors(device, res) {
        let crtc_id = match find_crtc_for_connector(device, res, &conn, &[]) {
            Some(crtc) => crtc,
            None => {
                debug!("Connector {} has no CRTC, nothing to disable", conn.id);
                continue;
            }
        };
        if main_crtcs.contains(&crtc_id) || seen.contains(&crtc_id) {
            continue;
        }
        seen.push(crtc_id);

        let crtc = match Crtc::fetch(device, crtc_id) {
            Ok(crtc) => crtc,
            Err(e) => {
                warn!("Cannot read properties of CRTC {}: {}", crtc_id, e);
                continue;
            }
        };
        match crtc.add_optional(&mut req, "ACTIVE", 0) {
            Ok(true) => debug!("Disabling non-main CRTC {}", crtc_id),
            Ok(false) => {}
            Err(e) => warn!("Cannot queue ACTIVE=0 for CRTC {}: {}", crtc_id, e),
        }
    }

    if req.is_empty() {
        return 0;
    }

    match device.atomic_commit(&req, true) {
        Ok(()) => {
            info!("Disabled {} non-main CRTC(s)", req.len());
            req.len()
        }
        Err(e) => {
            warn!("Atomic commit failed while disabling non-main CRTCs: {}", e);
            0
        }
    }
}

/// Layer mixers used by a known topology name
pub fn layer_mixers_for_topology(name: &str) -> Option<u32> {
    match name {
        "sde_singlepipe" | "sde_singlepipe_dsc" | "sde_singlepipe_vdc" | "sde_ppsplit" => Some(1),
        "sde_dualpipe"
        | "sde_dualpipe_dsc"
        | "sde_dualpipe_vdc"
        | "sde_dualpipemerge"
        | "sde_dualpipemerge_dsc"
        | "sde_dualpipemerge_vdc"
        | "sde_dualpipe_dscmerge" => Some(2),
        _ => None,
    }
}

/// Layer-mixer count from the `key=value` lines of a topology blob
pub fn parse_topology_blob(data: &[u8]) -> u32 {
    // C string: nothing after the first NUL counts
    let end = data.iter().position(|&b| b == 0).unwrap_or(data.len());
    let text = String::from_utf8_lossy(&data[..end]);

    let name = text.lines().find_map(|line| {
        line.find(TOPOLOGY_KEY).map(|pos| line[pos + TOPOLOGY_KEY.len()..].trim())
    });

    match name {
        Some(name) => layer_mixers_for_topology(name).unwrap_or_else(|| {
            debug!("Unknown topology {:?}, assuming {} layer mixers", name, DEFAULT_LAYER_MIXERS);
            DEFAULT_LAYER_MIXERS
        }),
        None => DEFAULT_LAYER_MIXERS,
    }
}

/// Read the connector's topology blob and resolve its layer-mixer count
pub fn resolve_layer_mixers<D: KmsDevice>(
    device: &D,
    connector: &Connector,
    property: &str,
) -> u32 {
    let blob = match connector.property_table().value(property) {
        Some(blob) if blob != 0 => blob,
        _ => {
            debug!("Connector {} has no {} blob", connector.id, property);
            return DEFAULT_LAYER_MIXERS;
        }
    };

    let lms = match device.property_blob(blob) {
        Ok(data) => parse_topology_blob(&data),
        Err(e) => {
            warn!("Cannot read topology blob {}: {}", blob, e);
            DEFAULT_LAYER_MIXERS
        }
    };
    info!("Number of layer mixers in topology: {}", lms);
    lms
}

/// Take `count` planes that can scan out on `crtc_id` and are not claimed
pub fn select_planes<D: KmsDevice>(
    device: &D,
    res: &Resources,
    crtc_id: u32,
    count: usize,
    claimed: &[u32],
) -> Result<Vec<u32>> {
    let crtc_index = res.crtc_index(crtc_id).ok_or(Error::NoCrtc(crtc_id))?;
    let bit = if crtc_index < 32 { 1u32 << crtc_index } else { 0 };

    let mut planes = Vec::with_capacity(count);
    for id in device.plane_ids()? {
        if planes.len() == count {
            break;
        }
        if claimed.contains(&id) {
            continue;
        }
        match device.plane(id) {
            Ok(plane) if plane.possible_crtcs & bit != 0 => planes.push(id),
            Ok(_) => {}
            Err(e) => debug!("Skipping plane {}: {}", id, e),
        }
    }

    if planes.len() < count {
        return Err(Error::NotEnoughPlanes {
            crtc: crtc_id,
            needed: count,
            found: planes.len(),
        });
    }
    debug!("CRTC {} uses planes {:?}", crtc_id, planes);
    Ok(planes)
}
