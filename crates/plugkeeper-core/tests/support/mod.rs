// In-memory devices and discovery with call counters.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use plugkeeper_core::{DeviceError, DeviceHandle, Discovery};

pub struct FakeDevice {
    label: String,
    address: String,
    on: AtomicBool,
    online: AtomicBool,
    label_broken: AtomicBool,
    writes_fail: AtomicBool,
    hang: AtomicBool,
    label_hang: AtomicBool,
    read_delay: Mutex<Duration>,
    reads: AtomicUsize,
    label_reads: AtomicUsize,
    writes: Mutex<Vec<bool>>,
}

impl FakeDevice {
    pub fn new(label: &str, address: &str, on: bool) -> Arc<Self> {
        Arc::new(Self {
            label: label.into(),
            address: address.into(),
            on: AtomicBool::new(on),
            online: AtomicBool::new(true),
            label_broken: AtomicBool::new(false),
            writes_fail: AtomicBool::new(false),
            hang: AtomicBool::new(false),
            label_hang: AtomicBool::new(false),
            read_delay: Mutex::new(Duration::ZERO),
            reads: AtomicUsize::new(0),
            label_reads: AtomicUsize::new(0),
            writes: Mutex::new(Vec::new()),
        })
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    pub fn break_label(&self) {
        self.label_broken.store(true, Ordering::SeqCst);
    }

    pub fn fail_writes(&self) {
        self.writes_fail.store(true, Ordering::SeqCst);
    }

    pub fn hang(&self) {
        self.hang.store(true, Ordering::SeqCst);
    }

    pub fn hang_label(&self) {
        self.label_hang.store(true, Ordering::SeqCst);
    }

    pub fn delay_reads(&self, delay: Duration) {
        *self.read_delay.lock().unwrap() = delay;
    }

    /// Flip the relay behind the manager's back.
    pub fn force(&self, on: bool) {
        self.on.store(on, Ordering::SeqCst);
    }

    pub fn relay(&self) -> bool {
        self.on.load(Ordering::SeqCst)
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn label_reads(&self) -> usize {
        self.label_reads.load(Ordering::SeqCst)
    }

    pub fn writes(&self) -> Vec<bool> {
        self.writes.lock().unwrap().clone()
    }

    fn check_online(&self) -> Result<(), DeviceError> {
        if self.online.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(DeviceError::Unreachable {
                address: self.address.clone(),
            })
        }
    }
}

#[async_trait]
impl DeviceHandle for FakeDevice {
    async fn label(&self) -> Result<String, DeviceError> {
        self.label_reads.fetch_add(1, Ordering::SeqCst);
        if self.label_hang.load(Ordering::SeqCst) {
            return std::future::pending().await;
        }
        self.check_online()?;
        if self.label_broken.load(Ordering::SeqCst) {
            return Err(DeviceError::protocol("malformed sysinfo reply"));
        }
        Ok(self.label.clone())
    }

    async fn is_on(&self) -> Result<bool, DeviceError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if self.hang.load(Ordering::SeqCst) {
            return std::future::pending().await;
        }
        let delay = *self.read_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.check_online()?;
        Ok(self.on.load(Ordering::SeqCst))
    }

    async fn set_on(&self, on: bool) -> Result<(), DeviceError> {
        self.writes.lock().unwrap().push(on);
        self.check_online()?;
        if self.writes_fail.load(Ordering::SeqCst) {
            return Err(DeviceError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "connection reset by peer",
            )));
        }
        self.on.store(on, Ordering::SeqCst);
        Ok(())
    }

    fn address(&self) -> Option<String> {
        Some(self.address.clone())
    }
}

/// Discovery over a mutable list of fake devices.
#[derive(Default)]
pub struct FakeFleet {
    devices: Mutex<Vec<Arc<FakeDevice>>>,
    failing: AtomicBool,
    hanging: AtomicBool,
    calls: AtomicUsize,
}

impl FakeFleet {
    pub fn new(devices: &[&Arc<FakeDevice>]) -> Arc<Self> {
        let fleet = Self::default();
        fleet
            .devices
            .lock()
            .unwrap()
            .extend(devices.iter().map(|d| Arc::clone(d)));
        Arc::new(fleet)
    }

    pub fn add(&self, device: &Arc<FakeDevice>) {
        self.devices.lock().unwrap().push(Arc::clone(device));
    }

    pub fn clear(&self) {
        self.devices.lock().unwrap().clear();
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn set_hanging(&self, hanging: bool) {
        self.hanging.store(hanging, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Discovery for FakeFleet {
    async fn discover(&self) -> Result<Vec<Arc<dyn DeviceHandle>>, DeviceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.hanging.load(Ordering::SeqCst) {
            return std::future::pending().await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(DeviceError::Io(std::io::Error::new(
                std::io::ErrorKind::AddrNotAvailable,
                "broadcast socket unavailable",
            )));
        }
        Ok(self
            .devices
            .lock()
            .unwrap()
            .iter()
            .map(|d| Arc::clone(d) as Arc<dyn DeviceHandle>)
            .collect())
    }
}
