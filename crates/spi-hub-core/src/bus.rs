//! One SPI bus: its ordered device chain, hand-off hint, and detection
//! state.

use std::collections::{HashMap, HashSet};

use crate::device::Device;
use crate::transceiver::SpiTransceiver;

/// Optional GPIO interrupt pin wired to a bus, used only to decide edge
/// direction; the GPIO wiring itself lives in `spi-hub-linux-gpio` and is
/// outside this crate's concern.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IrqDescriptor {
    pub pin: u32,
    pub active_low: bool,
}

/// An ordered collection of devices sharing one chip-select-multiplexed
/// SPI channel, plus the scheduler state the service loop needs between
/// passes.
pub struct Bus {
    pub id: u8,
    pub transceiver: Box<dyn SpiTransceiver>,
    pub irq: Option<IrqDescriptor>,
    /// 0 means "no device is primed"; otherwise the id of the device
    /// expected to respond to the next transaction on this bus.
    pub next_device_id: u8,
    pub service_pending: bool,
    devices_array: Vec<Device>,
    devices_map: HashMap<u8, usize>,
}

impl Bus {
    pub fn new(
        id: u8,
        transceiver: Box<dyn SpiTransceiver>,
        irq: Option<IrqDescriptor>,
        devices: Vec<Device>,
    ) -> Self {
        let devices_map = devices.iter().enumerate().map(|(i, d)| (d.id, i)).collect();
        Self {
            id,
            transceiver,
            irq,
            next_device_id: 0,
            service_pending: false,
            devices_array: devices,
            devices_map,
        }
    }

    pub fn devices(&self) -> &[Device] {
        &self.devices_array
    }

    pub fn device(&self, id: u8) -> Option<&Device> {
        self.devices_map.get(&id).map(|&i| &self.devices_array[i])
    }

    pub fn device_mut(&mut self, id: u8) -> Option<&mut Device> {
        let i = *self.devices_map.get(&id)?;
        Some(&mut self.devices_array[i])
    }

    /// The id of the device following `id` in chain order, wrapping around
    /// to the first device. `None` only if the chain is empty.
    pub fn next_in_chain(&self, id: u8) -> Option<u8> {
        let i = *self.devices_map.get(&id)?;
        let next_index = (i + 1) % self.devices_array.len();
        Some(self.devices_array[next_index].id)
    }

    /// `true` once `next_device_id` is 0 (nothing primed yet) or equals a
    /// device still present in the chain — the invariant the service loop
    /// must never break.
    pub fn next_device_is_valid(&self) -> bool {
        self.next_device_id == 0 || self.devices_map.contains_key(&self.next_device_id)
    }

    pub fn mark_service_needed(&mut self) {
        self.service_pending = true;
    }

    /// Replace `devices_array`/`devices_map` with only the devices whose id
    /// is in `seen`, preserving chain order.
    pub fn retain_seen(&mut self, seen: &HashSet<u8>) {
        self.devices_array.retain(|d| seen.contains(&d.id));
        self.devices_map = self
            .devices_array
            .iter()
            .enumerate()
            .map(|(i, d)| (d.id, i))
            .collect();
    }
}
