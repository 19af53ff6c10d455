/*!
    record of the discovered devices and selection among them.

    The [Registry] is filled exactly once per session by the scan, keeps the
    devices in chain position order, and answers [SelectionFilter] queries the
    way the documented client applications select their axis.
*/

use crate::{
    error::{Error, Result},
    registers::{AlState, DeviceIdentity},
    };

/// one discovered device of the chain
#[derive(Clone, Debug)]
pub struct Device {
    /// ordinal position in the chain, stable for the whole session
    pub position: u16,
    /// configured station address assigned during the scan
    pub address: u16,
    /// non-volatile station alias, 0 when unset
    pub alias: u16,
    /// identification block read during the scan
    pub identity: DeviceIdentity,
    /// human readable description, absent when the device carries none
    pub description: Option<String>,
    /// last state acknowledged by the device
    pub state: AlState,
}

/**
    selection criteria for [Registry::find]

    The device number (ordinal position) is decisive when given: all other
    criteria are ignored. Otherwise the supplied criteria are combined as a
    conjunction and the first device satisfying all of them wins. With nothing
    supplied the first device of the chain is returned.
*/
#[derive(Clone, Debug, Default)]
pub struct SelectionFilter {
    /// ordinal position in the chain
    pub number: Option<usize>,
    /// station alias to match exactly
    pub alias: Option<u16>,
    /// configured station address to match exactly
    pub address: Option<u16>,
    /// substring of the device description
    pub description: Option<String>,
}

impl SelectionFilter {
    /// true when no criterion is supplied
    pub fn is_empty(&self) -> bool {
        self.number.is_none()
            && self.alias.is_none()
            && self.address.is_none()
            && self.description.is_none()
    }

    fn matches(&self, device: &Device) -> bool {
        fn none_or_equal<T: PartialEq>(filter: &Option<T>, value: &T) -> bool {
            filter.as_ref().map_or(true, |wanted| wanted == value)
        }
        none_or_equal(&self.alias, &device.alias)
            && none_or_equal(&self.address, &device.address)
            && self.description.as_ref().map_or(true, |wanted|
                // a device without description never matches a description criterion
                device.description.as_ref()
                    .map_or(false, |text| text.contains(wanted.as_str())))
    }
}

/// holds the scan result of one session, in chain position order
#[derive(Default)]
pub struct Registry {
    devices: Vec<Device>,
    registered: bool,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// store the scan result, allowed exactly once per session
    pub fn register(&mut self, devices: Vec<Device>) -> Result<()> {
        if self.registered {
            return Err(Error::AlreadyScanned);
        }
        self.devices = devices;
        self.registered = true;
        Ok(())
    }

    /// true once a scan result (possibly empty) was stored
    pub fn registered(&self) -> bool {self.registered}

    pub fn len(&self) -> usize {self.devices.len()}
    pub fn is_empty(&self) -> bool {self.devices.is_empty()}

    pub fn get(&self, position: u16) -> Option<&Device> {
        self.devices.get(usize::from(position))
    }
    pub(crate) fn get_mut(&mut self, position: u16) -> Option<&mut Device> {
        self.devices.get_mut(usize::from(position))
    }

    /// iterate the devices in chain position order
    pub fn iter(&self) -> impl Iterator<Item = &Device> {
        self.devices.iter()
    }

    /// first device satisfying the filter, see [SelectionFilter] for the precedence
    pub fn find(&self, filter: &SelectionFilter) -> Result<&Device> {
        if let Some(number) = filter.number {
            return self.devices.get(number).ok_or(Error::NotFound);
        }
        self.devices.iter()
            .find(|device| filter.matches(device))
            .ok_or(Error::NotFound)
    }
}
