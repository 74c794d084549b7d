use crate::devices::probe::DeviceProbe;
use crate::{Device, DeviceStatus, WipeError, WipeResult};
use std::collections::HashMap;
use std::sync::RwLock;
use tokio::sync::watch;

/// Tracks discovered devices and owns their lifecycle state.
///
/// Discovery is a fresh scan per call: known serials keep their identity,
/// devices that vanish are dropped, and a device owned by an active session
/// (status `Wiping`) is never touched except to mark it `Error` when it
/// disappears mid-wipe.
pub struct DeviceRegistry {
    probe: Box<dyn DeviceProbe>,
    devices: RwLock<HashMap<String, Device>>,
    progress_tx: watch::Sender<usize>,
    progress_rx: watch::Receiver<usize>,
}

impl DeviceRegistry {
    pub fn new(probe: Box<dyn DeviceProbe>) -> Self {
        let (progress_tx, progress_rx) = watch::channel(0);
        Self {
            probe,
            devices: RwLock::new(HashMap::new()),
            progress_tx,
            progress_rx,
        }
    }

    /// Run a fresh scan and merge the results into the registry.
    ///
    /// Returns the post-merge snapshot. The count of devices seen so far is
    /// streamed on the discovery-progress channel while the scan runs.
    pub fn discover(&self) -> WipeResult<Vec<Device>> {
        let _ = self.progress_tx.send(0);

        let scanned = self.probe.scan()?;

        let mut devices = self.devices.write().unwrap();
        let mut seen_serials = Vec::with_capacity(scanned.len());

        for (found, device) in scanned.into_iter().enumerate() {
            let _ = self.progress_tx.send(found + 1);
            seen_serials.push(device.serial.clone());

            let known_id = devices
                .values()
                .find(|d| d.serial == device.serial)
                .map(|d| d.id.clone());
            match known_id {
                Some(id) => {
                    let known = devices.get_mut(&id).expect("indexed by id");
                    // A device owned by an active session is left alone;
                    // otherwise keep identity and status, refresh what the
                    // probe can change.
                    if known.status != DeviceStatus::Wiping {
                        known.name = device.name;
                        known.capacity_bytes = device.capacity_bytes;
                        known.files_detected = device.files_detected;
                        known.platform = device.platform;
                    }
                }
                None => {
                    tracing::debug!(serial = %device.serial, name = %device.name, "device discovered");
                    devices.insert(device.id.clone(), device);
                }
            }
        }

        // Devices absent from this scan have been disconnected.
        devices.retain(|_, d| {
            if seen_serials.contains(&d.serial) {
                return true;
            }
            if d.status == DeviceStatus::Wiping {
                tracing::warn!(serial = %d.serial, "device disconnected during wipe");
                d.status = DeviceStatus::Error;
                return true;
            }
            false
        });

        let mut snapshot: Vec<Device> = devices.values().cloned().collect();
        snapshot.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(snapshot)
    }

    pub fn get(&self, device_id: &str) -> WipeResult<Device> {
        self.devices
            .read()
            .unwrap()
            .get(device_id)
            .cloned()
            .ok_or_else(|| WipeError::DeviceNotFound(device_id.to_string()))
    }

    pub fn set_status(&self, device_id: &str, status: DeviceStatus) -> WipeResult<()> {
        let mut devices = self.devices.write().unwrap();
        let device = devices
            .get_mut(device_id)
            .ok_or_else(|| WipeError::DeviceNotFound(device_id.to_string()))?;
        tracing::debug!(serial = %device.serial, ?status, "device status change");
        device.status = status;
        Ok(())
    }

    /// Current registry contents without rescanning.
    pub fn snapshot(&self) -> Vec<Device> {
        let mut devices: Vec<Device> = self.devices.read().unwrap().values().cloned().collect();
        devices.sort_by(|a, b| a.name.cmp(&b.name));
        devices
    }

    /// True while at least one device is attached.
    pub fn connection_present(&self) -> bool {
        !self.devices.read().unwrap().is_empty()
    }

    /// Subscribe to the running count of devices found by the current scan.
    pub fn discovery_progress(&self) -> watch::Receiver<usize> {
        self.progress_rx.clone()
    }
}
