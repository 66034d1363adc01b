//! Device cache keyed by platform identifier.

use crate::domain::models::DeviceSummary;
use crate::infrastructure::bluetooth::device::SampleDevice;
use crate::infrastructure::bluetooth::provider::BleDevice;
use tracing::error;

/// Devices seen during enumeration, in first-sighting order.
///
/// Holds at most one entry per identifier.
pub struct DeviceCache<D: BleDevice> {
    devices: Vec<SampleDevice<D>>,
}

impl<D: BleDevice> Default for DeviceCache<D> {
    fn default() -> Self {
        Self {
            devices: Vec::new(),
        }
    }
}

impl<D: BleDevice> DeviceCache<D> {
    pub fn new() -> Self {
        Self::default()
    }

    fn position(&self, id: &str) -> Option<usize> {
        let mut matches = self
            .devices
            .iter()
            .enumerate()
            .filter(|(_, device)| device.id() == id)
            .map(|(index, _)| index);
        let first = matches.next();
        if matches.next().is_some() {
            error!("Device cache holds more than one entry for {}", id);
            debug_assert!(false, "duplicate cache entry for {}", id);
        }
        first
    }

    pub fn contains(&self, id: &str) -> bool {
        self.position(id).is_some()
    }

    /// Insert unless the identifier is already cached. Returns whether the
    /// device was inserted; an existing entry is left untouched.
    pub fn insert(&mut self, device: SampleDevice<D>) -> bool {
        if self.contains(device.id()) {
            return false;
        }
        self.devices.push(device);
        true
    }

    pub fn remove(&mut self, id: &str) -> Option<SampleDevice<D>> {
        self.position(id).map(|index| self.devices.remove(index))
    }

    pub fn get(&self, id: &str) -> Option<&SampleDevice<D>> {
        self.position(id).map(|index| &self.devices[index])
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut SampleDevice<D>> {
        self.position(id).map(move |index| &mut self.devices[index])
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn ids(&self) -> Vec<String> {
        self.devices.iter().map(|d| d.id().to_string()).collect()
    }

    pub fn summaries(&self) -> Vec<DeviceSummary> {
        self.devices.iter().map(|d| d.summary()).collect()
    }
}
