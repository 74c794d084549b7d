use crate::{Device, DeviceType, Platform, WipeResult};
use std::fs;
use std::path::Path;

/// Enumeration of attached storage. Each `scan` is a fresh pass over the
/// hardware; the registry owns dedup and lifecycle on top of it.
pub trait DeviceProbe: Send + Sync {
    fn scan(&self) -> WipeResult<Vec<Device>>;
}

/// Block-device probe reading the Linux sysfs tree.
pub struct SysBlockProbe {
    root: String,
}

impl Default for SysBlockProbe {
    fn default() -> Self {
        Self::new("/sys/block")
    }
}

impl SysBlockProbe {
    pub fn new(root: impl Into<String>) -> Self {
        Self { root: root.into() }
    }

    /// Skip loop devices, ram disks, device mapper, optical drives, zram
    pub(crate) fn should_skip_device(device_name: &str) -> bool {
        device_name.starts_with("loop")
            || device_name.starts_with("ram")
            || device_name.starts_with("dm-")
            || device_name.starts_with("sr")
            || device_name.starts_with("zram")
    }

    fn read_sysfs_field(dir: &Path, field: &str) -> Option<String> {
        let value = fs::read_to_string(dir.join(field)).ok()?;
        let value = value.trim();
        if value.is_empty() {
            None
        } else {
            Some(value.to_string())
        }
    }

    fn classify(device_name: &str, device_dir: &Path) -> DeviceType {
        // USB-attached devices resolve through a usb segment in their sysfs link
        if let Ok(real) = fs::read_link(device_dir.join("device")) {
            if real.to_string_lossy().contains("usb") {
                return DeviceType::UsbDrive;
            }
        }
        if device_name.starts_with("mmcblk") {
            return DeviceType::Phone;
        }
        DeviceType::ExternalDrive
    }

    fn analyze(&self, device_name: &str) -> WipeResult<Option<Device>> {
        let device_dir = Path::new(&self.root).join(device_name);
        if !device_dir.exists() {
            return Ok(None);
        }

        // sysfs reports size in 512-byte sectors
        let capacity_bytes = Self::read_sysfs_field(&device_dir, "size")
            .and_then(|s| s.parse::<u64>().ok())
            .map(|sectors| sectors * 512)
            .unwrap_or(0);

        let model = Self::read_sysfs_field(&device_dir.join("device"), "model")
            .unwrap_or_else(|| device_name.to_string());
        let serial = Self::read_sysfs_field(&device_dir.join("device"), "serial")
            .unwrap_or_else(|| format!("UNKNOWN-{}", device_name));

        let device_type = Self::classify(device_name, &device_dir);
        let device =
            Device::new(model, serial, device_type, capacity_bytes).with_platform(Platform::Linux);

        Ok(Some(device))
    }
}

impl DeviceProbe for SysBlockProbe {
    fn scan(&self) -> WipeResult<Vec<Device>> {
        let mut devices = Vec::new();

        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(root = %self.root, error = %e, "block device scan unavailable");
                return Ok(devices);
            }
        };

        for entry in entries {
            let entry = entry?;
            let device_name = entry.file_name();
            let device_name = device_name.to_string_lossy();

            if Self::should_skip_device(&device_name) {
                continue;
            }

            match self.analyze(&device_name) {
                Ok(Some(device)) => devices.push(device),
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(device = %device_name, error = %e, "failed to analyze device");
                }
            }
        }

        Ok(devices)
    }
}

/// Fixed-catalog probe for demos and tests. Devices can be attached and
/// detached between scans to exercise discovery and disconnect handling.
pub struct SimulatedProbe {
    catalog: std::sync::Mutex<Vec<Device>>,
}

impl SimulatedProbe {
    pub fn new(catalog: Vec<Device>) -> Self {
        Self {
            catalog: std::sync::Mutex::new(catalog),
        }
    }

    /// The demo catalog the presentation layer shows out of the box.
    pub fn demo_catalog() -> Vec<Device> {
        vec![
            Device::new("Samsung Galaxy S23", "SM-S911U1-ABC123", DeviceType::Phone, 256 * GB)
                .with_platform(Platform::Android)
                .with_files_detected(45_782),
            Device::new("iPhone 15 Pro", "A3102-XYZ789", DeviceType::Phone, 512 * GB)
                .with_platform(Platform::Ios)
                .with_files_detected(23_456),
            Device::new(
                "SanDisk Ultra USB 3.0",
                "SDCZ48-064G-789",
                DeviceType::UsbDrive,
                64 * GB,
            )
            .with_files_detected(234),
            Device::new("MacBook Pro 16\"", "MVVM2LL/A-456", DeviceType::Laptop, 1024 * GB)
                .with_platform(Platform::Macos)
                .with_files_detected(156_789),
            Device::new(
                "Samsung T7 Portable SSD",
                "MU-PC2T0T-DEF456",
                DeviceType::ExternalDrive,
                2048 * GB,
            )
            .with_files_detected(89_234),
        ]
    }

    pub fn demo() -> Self {
        Self::new(Self::demo_catalog())
    }

    /// Attach a device; it shows up on the next scan.
    pub fn attach(&self, device: Device) {
        self.catalog.lock().unwrap().push(device);
    }

    /// Detach by serial; the device vanishes from subsequent scans.
    pub fn detach(&self, serial: &str) {
        self.catalog.lock().unwrap().retain(|d| d.serial != serial);
    }
}

const GB: u64 = 1024 * 1024 * 1024;

impl DeviceProbe for SimulatedProbe {
    fn scan(&self) -> WipeResult<Vec<Device>> {
        Ok(self.catalog.lock().unwrap().clone())
    }
}
