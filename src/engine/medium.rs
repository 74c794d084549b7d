use crate::{Device, WipeError, WipeResult};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Byte-level access to the storage being sanitized.
///
/// The engine never touches hardware directly; everything destructive goes
/// through this seam so real device I/O and simulation are interchangeable.
/// Chunked operations back complete-mode wipes, item operations back
/// selective-mode wipes and pre-wipe backups.
pub trait WipeMedium: Send + Sync {
    fn capacity(&self) -> u64;

    /// False once the underlying device has gone away mid-operation.
    fn is_connected(&self) -> bool;

    fn write_chunk(&mut self, offset: u64, data: &[u8]) -> WipeResult<()>;

    fn read_chunk(&mut self, offset: u64, len: usize) -> WipeResult<Vec<u8>>;

    fn sync(&mut self) -> WipeResult<()>;

    fn item_paths(&self) -> WipeResult<Vec<String>>;

    fn item_size(&self, path: &str) -> WipeResult<u64>;

    fn read_item(&self, path: &str) -> WipeResult<Vec<u8>>;

    fn overwrite_item(&mut self, path: &str, data: &[u8]) -> WipeResult<()>;

    fn unlink_item(&mut self, path: &str) -> WipeResult<()>;
}

/// Opens a medium for a registered device.
pub trait MediumProvider: Send + Sync {
    fn open(&self, device: &Device) -> WipeResult<Box<dyn WipeMedium>>;
}

#[derive(Debug)]
struct SimInner {
    capacity: u64,
    surface: Vec<u8>,
    items: BTreeMap<String, Vec<u8>>,
    connected: bool,
    fail_write_at: Option<u64>,
}

/// In-memory medium with fault injection, shared across clones so tests can
/// inspect the surface after a run completes.
#[derive(Debug, Clone)]
pub struct SimulatedMedium {
    inner: Arc<Mutex<SimInner>>,
}

impl SimulatedMedium {
    pub fn new(capacity: u64) -> Self {
        Self {
            inner: Arc::new(Mutex::new(SimInner {
                capacity,
                surface: vec![0u8; capacity as usize],
                items: BTreeMap::new(),
                connected: true,
                fail_write_at: None,
            })),
        }
    }

    pub fn with_item(self, path: impl Into<String>, contents: Vec<u8>) -> Self {
        self.inner.lock().unwrap().items.insert(path.into(), contents);
        self
    }

    /// Simulate the device being yanked; subsequent operations fail.
    pub fn disconnect(&self) {
        self.inner.lock().unwrap().connected = false;
    }

    /// Inject a write failure at the given byte offset.
    pub fn fail_write_at(&self, offset: u64) {
        self.inner.lock().unwrap().fail_write_at = Some(offset);
    }

    pub fn item_exists(&self, path: &str) -> bool {
        self.inner.lock().unwrap().items.contains_key(path)
    }

    pub fn surface_snapshot(&self) -> Vec<u8> {
        self.inner.lock().unwrap().surface.clone()
    }
}

impl WipeMedium for SimulatedMedium {
    fn capacity(&self) -> u64 {
        self.inner.lock().unwrap().capacity
    }

    fn is_connected(&self) -> bool {
        self.inner.lock().unwrap().connected
    }

    fn write_chunk(&mut self, offset: u64, data: &[u8]) -> WipeResult<()> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.connected {
            return Err(WipeError::DeviceDisconnected("simulated medium".into()));
        }
        if let Some(fail_at) = inner.fail_write_at {
            if offset <= fail_at && fail_at < offset + data.len() as u64 {
                return Err(WipeError::Io(std::io::Error::other(
                    "injected write failure",
                )));
            }
        }
        let end = offset as usize + data.len();
        if end > inner.surface.len() {
            return Err(WipeError::Io(std::io::Error::other(
                "write past end of medium",
            )));
        }
        inner.surface[offset as usize..end].copy_from_slice(data);
        Ok(())
    }

    fn read_chunk(&mut self, offset: u64, len: usize) -> WipeResult<Vec<u8>> {
        let inner = self.inner.lock().unwrap();
        if !inner.connected {
            return Err(WipeError::DeviceDisconnected("simulated medium".into()));
        }
        let end = offset as usize + len;
        if end > inner.surface.len() {
            return Err(WipeError::Io(std::io::Error::other(
                "read past end of medium",
            )));
        }
        Ok(inner.surface[offset as usize..end].to_vec())
    }

    fn sync(&mut self) -> WipeResult<()> {
        Ok(())
    }

    fn item_paths(&self) -> WipeResult<Vec<String>> {
        Ok(self.inner.lock().unwrap().items.keys().cloned().collect())
    }

    fn item_size(&self, path: &str) -> WipeResult<u64> {
        self.inner
            .lock()
            .unwrap()
            .items
            .get(path)
            .map(|c| c.len() as u64)
            .ok_or_else(|| WipeError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no such item: {}", path),
            )))
    }

    fn read_item(&self, path: &str) -> WipeResult<Vec<u8>> {
        let inner = self.inner.lock().unwrap();
        if !inner.connected {
            return Err(WipeError::DeviceDisconnected("simulated medium".into()));
        }
        inner.items.get(path).cloned().ok_or_else(|| {
            WipeError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no such item: {}", path),
            ))
        })
    }

    fn overwrite_item(&mut self, path: &str, data: &[u8]) -> WipeResult<()> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.connected {
            return Err(WipeError::DeviceDisconnected("simulated medium".into()));
        }
        match inner.items.get_mut(path) {
            Some(contents) => {
                *contents = data.to_vec();
                Ok(())
            }
            None => Err(WipeError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no such item: {}", path),
            ))),
        }
    }

    fn unlink_item(&mut self, path: &str) -> WipeResult<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.items.remove(path).is_some() {
            Ok(())
        } else {
            Err(WipeError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no such item: {}", path),
            )))
        }
    }
}

/// Provider handing out clones of per-serial simulated media, so the same
/// surface survives across opens and stays inspectable.
pub struct SimulatedMediumProvider {
    media: Mutex<BTreeMap<String, SimulatedMedium>>,
    default_capacity: u64,
}

impl SimulatedMediumProvider {
    pub fn new(default_capacity: u64) -> Self {
        Self {
            media: Mutex::new(BTreeMap::new()),
            default_capacity,
        }
    }

    pub fn insert(&self, serial: impl Into<String>, medium: SimulatedMedium) {
        self.media.lock().unwrap().insert(serial.into(), medium);
    }

    pub fn medium_for(&self, serial: &str) -> Option<SimulatedMedium> {
        self.media.lock().unwrap().get(serial).cloned()
    }
}

impl MediumProvider for SimulatedMediumProvider {
    fn open(&self, device: &Device) -> WipeResult<Box<dyn WipeMedium>> {
        let mut media = self.media.lock().unwrap();
        let medium = media
            .entry(device.serial.clone())
            .or_insert_with(|| SimulatedMedium::new(self.default_capacity))
            .clone();
        Ok(Box::new(medium))
    }
}

/// File-backed medium: a flat image file is the chunk-addressable surface and
/// an optional items root holds the selectable files.
pub struct FileMedium {
    image_path: PathBuf,
    image: File,
    capacity: u64,
    items_root: Option<PathBuf>,
}

impl FileMedium {
    pub fn open(image_path: impl Into<PathBuf>) -> WipeResult<Self> {
        let image_path = image_path.into();
        let image = OpenOptions::new().read(true).write(true).open(&image_path)?;
        let capacity = image.metadata()?.len();
        Ok(Self {
            image_path,
            image,
            capacity,
            items_root: None,
        })
    }

    pub fn with_items_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.items_root = Some(root.into());
        self
    }

    fn resolve_item(&self, path: &str) -> WipeResult<PathBuf> {
        let root = self.items_root.as_ref().ok_or_else(|| {
            WipeError::InvalidSetup("medium has no selectable items".to_string())
        })?;
        let rel = Path::new(path);
        if rel.is_absolute() || rel.components().any(|c| matches!(c, std::path::Component::ParentDir))
        {
            return Err(WipeError::InvalidSetup(format!(
                "selection path escapes the medium: {}",
                path
            )));
        }
        Ok(root.join(rel))
    }

    fn collect_items(root: &Path, prefix: &Path, out: &mut Vec<String>) -> std::io::Result<()> {
        for entry in fs::read_dir(root)? {
            let entry = entry?;
            let rel = prefix.join(entry.file_name());
            if entry.file_type()?.is_dir() {
                Self::collect_items(&entry.path(), &rel, out)?;
            } else {
                out.push(rel.to_string_lossy().into_owned());
            }
        }
        Ok(())
    }
}

/// Opens a `FileMedium` over a fixed image file and optional items root,
/// regardless of which registered device is being wiped.
pub struct FileMediumProvider {
    image_path: PathBuf,
    items_root: Option<PathBuf>,
}

impl FileMediumProvider {
    pub fn new(image_path: impl Into<PathBuf>) -> Self {
        Self {
            image_path: image_path.into(),
            items_root: None,
        }
    }

    pub fn with_items_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.items_root = Some(root.into());
        self
    }
}

impl MediumProvider for FileMediumProvider {
    fn open(&self, _device: &Device) -> WipeResult<Box<dyn WipeMedium>> {
        let mut medium = FileMedium::open(&self.image_path)?;
        if let Some(root) = &self.items_root {
            medium = medium.with_items_root(root);
        }
        Ok(Box::new(medium))
    }
}

impl WipeMedium for FileMedium {
    fn capacity(&self) -> u64 {
        self.capacity
    }

    fn is_connected(&self) -> bool {
        self.image_path.exists()
    }

    fn write_chunk(&mut self, offset: u64, data: &[u8]) -> WipeResult<()> {
        self.image.seek(SeekFrom::Start(offset))?;
        self.image.write_all(data)?;
        Ok(())
    }

    fn read_chunk(&mut self, offset: u64, len: usize) -> WipeResult<Vec<u8>> {
        self.image.seek(SeekFrom::Start(offset))?;
        let mut buffer = vec![0u8; len];
        self.image.read_exact(&mut buffer)?;
        Ok(buffer)
    }

    fn sync(&mut self) -> WipeResult<()> {
        self.image.sync_all()?;
        Ok(())
    }

    fn item_paths(&self) -> WipeResult<Vec<String>> {
        let root = match &self.items_root {
            Some(root) => root,
            None => return Ok(Vec::new()),
        };
        let mut items = Vec::new();
        Self::collect_items(root, Path::new(""), &mut items)?;
        items.sort();
        Ok(items)
    }

    fn item_size(&self, path: &str) -> WipeResult<u64> {
        let path = self.resolve_item(path)?;
        Ok(fs::metadata(path)?.len())
    }

    fn read_item(&self, path: &str) -> WipeResult<Vec<u8>> {
        let path = self.resolve_item(path)?;
        Ok(fs::read(path)?)
    }

    fn overwrite_item(&mut self, path: &str, data: &[u8]) -> WipeResult<()> {
        let path = self.resolve_item(path)?;
        let mut file = OpenOptions::new().write(true).truncate(false).open(&path)?;
        file.seek(SeekFrom::Start(0))?;
        file.write_all(data)?;
        file.sync_all()?;
        Ok(())
    }

    fn unlink_item(&mut self, path: &str) -> WipeResult<()> {
        let path = self.resolve_item(path)?;
        fs::remove_file(path)?;
        Ok(())
    }
}
