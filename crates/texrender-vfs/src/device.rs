//! Character devices.
//!
//! A device node stores only a [`DeviceId`]; the behaviour lives in the
//! registry, which maps ids to [`DeviceOps`] implementations.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};

use crate::error::VfsResult;
use crate::types::DeviceId;

/// Well-known device numbers.
pub mod ids {
    use crate::types::DeviceId;

    pub const NULL: DeviceId = DeviceId::new(1, 3);
    pub const RANDOM: DeviceId = DeviceId::new(1, 8);
    pub const URANDOM: DeviceId = DeviceId::new(1, 9);
    pub const TTY: DeviceId = DeviceId::new(5, 0);
    pub const STDIN: DeviceId = DeviceId::new(7, 0);
    pub const STDOUT: DeviceId = DeviceId::new(7, 1);
    pub const STDERR: DeviceId = DeviceId::new(7, 2);
}

/// Read/write operations of a character device.
///
/// `pos` is the stream position; most devices ignore it.
pub trait DeviceOps: Send {
    fn read(&mut self, buf: &mut [u8], pos: u64) -> VfsResult<usize>;
    fn write(&mut self, data: &[u8], pos: u64) -> VfsResult<usize>;
}

/// Discards writes, reads as empty.
#[derive(Debug, Default)]
pub struct NullDevice;

impl DeviceOps for NullDevice {
    fn read(&mut self, _buf: &mut [u8], _pos: u64) -> VfsResult<usize> {
        Ok(0)
    }

    fn write(&mut self, data: &[u8], _pos: u64) -> VfsResult<usize> {
        Ok(data.len())
    }
}

/// Serves a fixed byte string, then EOF. Writes are discarded.
#[derive(Debug, Default)]
pub struct InputDevice {
    data: Vec<u8>,
    cursor: usize,
}

impl InputDevice {
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: data.into(),
            cursor: 0,
        }
    }
}

impl DeviceOps for InputDevice {
    fn read(&mut self, buf: &mut [u8], _pos: u64) -> VfsResult<usize> {
        let remaining = &self.data[self.cursor..];
        let n = remaining.len().min(buf.len());
        buf[..n].copy_from_slice(&remaining[..n]);
        self.cursor += n;
        Ok(n)
    }

    fn write(&mut self, data: &[u8], _pos: u64) -> VfsResult<usize> {
        Ok(data.len())
    }
}

/// Shared byte sink that captured output accumulates in.
#[derive(Debug, Clone, Default)]
pub struct OutputBuffer(Arc<Mutex<Vec<u8>>>);

impl OutputBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, data: &[u8]) {
        self.0.lock().extend_from_slice(data);
    }

    /// Copy of everything captured so far.
    pub fn contents(&self) -> Vec<u8> {
        self.0.lock().clone()
    }

    /// Captured bytes as lossy UTF-8.
    pub fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(&self.0.lock()).into_owned()
    }

    /// Remove and return everything captured so far.
    pub fn take(&self) -> Vec<u8> {
        std::mem::take(&mut *self.0.lock())
    }

    pub fn clear(&self) {
        self.0.lock().clear();
    }

    pub fn is_empty(&self) -> bool {
        self.0.lock().is_empty()
    }
}

/// Write-only device that appends to an [`OutputBuffer`].
#[derive(Debug, Clone)]
pub struct CaptureDevice {
    sink: OutputBuffer,
}

impl CaptureDevice {
    pub fn new(sink: OutputBuffer) -> Self {
        Self { sink }
    }
}

impl DeviceOps for CaptureDevice {
    fn read(&mut self, _buf: &mut [u8], _pos: u64) -> VfsResult<usize> {
        Ok(0)
    }

    fn write(&mut self, data: &[u8], _pos: u64) -> VfsResult<usize> {
        self.sink.append(data);
        Ok(data.len())
    }
}

/// Random byte source backing `/dev/random` and `/dev/urandom`.
pub struct RandomDevice {
    rng: StdRng,
}

impl RandomDevice {
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    /// Deterministic source, for tests.
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl Default for RandomDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceOps for RandomDevice {
    fn read(&mut self, buf: &mut [u8], _pos: u64) -> VfsResult<usize> {
        self.rng.fill_bytes(buf);
        Ok(buf.len())
    }

    fn write(&mut self, data: &[u8], _pos: u64) -> VfsResult<usize> {
        Ok(data.len())
    }
}

/// Maps device numbers to their operations.
#[derive(Default)]
pub(crate) struct DeviceRegistry {
    devices: HashMap<DeviceId, Box<dyn DeviceOps>>,
}

impl DeviceRegistry {
    pub fn register(&mut self, id: DeviceId, ops: Box<dyn DeviceOps>) {
        self.devices.insert(id, ops);
    }

    pub fn get_mut(&mut self, id: DeviceId) -> Option<&mut (dyn DeviceOps + 'static)> {
        self.devices.get_mut(&id).map(|ops| ops.as_mut())
    }

    pub fn contains(&self, id: DeviceId) -> bool {
        self.devices.contains_key(&id)
    }

    pub fn clear(&mut self) {
        self.devices.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_device() {
        let mut dev = NullDevice;
        let mut buf = [0u8; 4];
        assert_eq!(dev.read(&mut buf, 0).ok(), Some(0));
        assert_eq!(dev.write(b"gone", 0).ok(), Some(4));
    }

    #[test]
    fn test_input_device_drains() {
        let mut dev = InputDevice::new("abc");
        let mut buf = [0u8; 2];
        assert_eq!(dev.read(&mut buf, 0).ok(), Some(2));
        assert_eq!(&buf, b"ab");
        assert_eq!(dev.read(&mut buf, 0).ok(), Some(1));
        assert_eq!(dev.read(&mut buf, 0).ok(), Some(0));
    }

    #[test]
    fn test_capture_shares_buffer() {
        let sink = OutputBuffer::new();
        let mut dev = CaptureDevice::new(sink.clone());
        dev.write(b"This is pdfTeX\n", 0).ok();
        dev.write(b"Output written", 0).ok();
        assert_eq!(sink.to_string_lossy(), "This is pdfTeX\nOutput written");
        assert_eq!(sink.take().len(), 29);
        assert!(sink.is_empty());
    }

    #[test]
    fn test_random_device_fills() {
        let mut a = RandomDevice::seeded(7);
        let mut b = RandomDevice::seeded(7);
        let mut x = [0u8; 32];
        let mut y = [0u8; 32];
        a.read(&mut x, 0).ok();
        b.read(&mut y, 0).ok();
        assert_eq!(x, y);
        assert_ne!(x, [0u8; 32]);
    }

    #[test]
    fn test_registry() {
        let mut registry = DeviceRegistry::default();
        registry.register(ids::NULL, Box::new(NullDevice));
        assert!(registry.contains(ids::NULL));
        assert!(registry.get_mut(ids::TTY).is_none());
    }
}
