//! Property name resolution for connectors, CRTCs and planes
//!
//! Property ids are assigned by the kernel and differ between drivers and
//! driver versions, so every object carries a table fetched once at init.

use crate::kms::{AtomicRequest, KmsDevice, ObjectKind, Property};
use crate::{Error, Result};
use std::collections::HashMap;
use tracing::debug;

/// Property name -> (id, value at fetch time) for one mode object
#[derive(Debug, Clone, Default)]
pub struct PropertyTable {
    entries: HashMap<String, (u32, u64)>,
}

impl PropertyTable {
    /// Read the object's properties from the kernel
    pub fn fetch<D: KmsDevice>(device: &D, object: u32, kind: ObjectKind) -> Result<Self> {
        let props = device.properties(object, kind).map_err(|e| {
            Error::Drm(format!("reading properties of {:?} {}: {}", kind, object, e))
        })?;
        debug!("Fetched {} properties for {:?} {}", props.len(), kind, object);
        Ok(Self::from_properties(props))
    }

    pub fn from_properties(props: impl IntoIterator<Item = Property>) -> Self {
        Self {
            entries: props
                .into_iter()
                .map(|p| (p.name, (p.id, p.value)))
                .collect(),
        }
    }

    /// Exact-name lookup of a property id
    pub fn id(&self, name: &str) -> Option<u32> {
        self.entries.get(name).map(|&(id, _)| id)
    }

    /// Value of a property when the table was fetched
    pub fn value(&self, name: &str) -> Option<u64> {
        self.entries.get(name).map(|&(_, value)| value)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A mode object that can resolve its properties by name
pub trait HasProperties {
    fn object_id(&self) -> u32;
    fn property_table(&self) -> &PropertyTable;

    /// `None` means the driver does not expose the property
    fn resolve(&self, name: &str) -> Option<u32> {
        self.property_table().id(name)
    }

    /// Queue `name = value` if the property exists, skip it otherwise.
    /// Returns whether it was queued.
    fn add_optional(&self, req: &mut AtomicRequest, name: &str, value: u64) -> Result<bool> {
        match self.resolve(name) {
            Some(prop) => {
                req.add(self.object_id(), prop, value)?;
                Ok(true)
            }
            None => {
                debug!("Object {} has no {} property, skipping", self.object_id(), name);
                Ok(false)
            }
        }
    }

    /// Queue `name = value`, a missing property is an error
    fn add_required(&self, req: &mut AtomicRequest, name: &str, value: u64) -> Result<()> {
        let prop = self.resolve(name).ok_or_else(|| Error::PropertyNotFound {
            object: self.object_id(),
            name: name.to_string(),
        })?;
        req.add(self.object_id(), prop, value)
    }
}

#[derive(Debug, Clone)]
pub struct Connector {
    pub id: u32,
    props: PropertyTable,
}

impl Connector {
    pub fn fetch<D: KmsDevice>(device: &D, id: u32) -> Result<Self> {
        let props = PropertyTable::fetch(device, id, ObjectKind::Connector)?;
        Ok(Self { id, props })
    }
}

impl HasProperties for Connector {
    fn object_id(&self) -> u32 {
        self.id
    }

    fn property_table(&self) -> &PropertyTable {
        &self.props
    }
}

#[derive(Debug, Clone)]
pub struct Crtc {
    pub id: u32,
    props: PropertyTable,
}

impl Crtc {
    pub fn fetch<D: KmsDevice>(device: &D, id: u32) -> Result<Self> {
        let props = PropertyTable::fetch(device, id, ObjectKind::Crtc)?;
        Ok(Self { id, props })
    }
}

impl HasProperties for Crtc {
    fn object_id(&self) -> u32 {
        self.id
    }

    fn property_table(&self) -> &PropertyTable {
        &self.props
    }
}

#[derive(Debug, Clone)]
pub struct Plane {
    pub id: u32,
    props: PropertyTable,
}

impl Plane {
    pub fn fetch<D: KmsDevice>(device: &D, id: u32) -> Result<Self> {
        let props = PropertyTable::fetch(device, id, ObjectKind::Plane)?;
        Ok(Self { id, props })
    }
}

impl HasProperties for Plane {
    fn object_id(&self) -> u32 {
        self.id
    }

    fn property_table(&self) -> &PropertyTable {
        &self.props
    }
}
