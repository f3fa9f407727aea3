//! Encapsulated former-globals (`bus_map`, `devices_list_message`,
//! per-bus service flags) collected into one value constructed at startup
//! and passed by reference, instead of module-level statics.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Notify;

use spi_hub_core::bus::Bus;

/// All broker state that isn't transport plumbing: the buses this process
/// owns and the most recently built devices-list frame.
pub struct Broker {
    pub buses: HashMap<u8, Bus>,
    /// One wake signal per bus, shared between the IPC ingress path, the
    /// GPIO interrupt thread, and that bus's service loop task.
    pub notifies: HashMap<u8, Arc<Notify>>,
    /// Cached devices-list IPC frame, built once after the detection pass
    /// and identity read complete; `None` until then.
    pub devices_list_frame: Option<Vec<u8>>,
}

impl Broker {
    pub fn new() -> Self {
        Self {
            buses: HashMap::new(),
            notifies: HashMap::new(),
            devices_list_frame: None,
        }
    }

    pub fn add_bus(&mut self, bus: Bus) {
        let notify = Arc::new(Notify::new());
        self.notifies.insert(bus.id, notify);
        self.buses.insert(bus.id, bus);
    }

    /// Resolve `(bus_id, device_id)` and enqueue the message. Returns
    /// `false` if either is unknown ("fail the sub-record if
    /// either is unknown"). On success, marks the bus as needing service
    /// and wakes its service loop task.
    pub fn enqueue(&mut self, bus_id: u8, device_id: u8, channel_id: u8, dedupe_id: u16, payload: Vec<u8>) -> bool {
        let Some(bus) = self.buses.get_mut(&bus_id) else {
            return false;
        };
        let Some(device) = bus.device_mut(device_id) else {
            return false;
        };
        device.queue.enqueue(dedupe_id, channel_id, payload);
        bus.mark_service_needed();
        self.notify_bus(bus_id);
        true
    }

    pub fn notify_bus(&self, bus_id: u8) {
        if let Some(notify) = self.notifies.get(&bus_id) {
            notify.notify_one();
        }
    }
}

impl Default for Broker {
    fn default() -> Self {
        Self::new()
    }
}
