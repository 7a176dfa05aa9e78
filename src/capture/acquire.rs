//! Camera discovery and the owning handle for the selected device.

use std::io;

use tracing::{debug, info, warn};

use super::frame::RawFrame;
use crate::error::{CaptureError, SenderError};

/// An opened (or half-opened) camera device.
pub trait CameraDevice: Send {
    /// Whether the device is ready to stream frames.
    fn is_open(&self) -> bool;

    /// Block until the next frame is available.
    fn read(&mut self) -> Result<RawFrame, CaptureError>;

    /// Stop streaming and close the device. Must tolerate repeated calls.
    fn release(&mut self);
}

/// Opens a camera device by index.
pub trait DeviceProbe {
    fn open(&mut self, index: u32) -> io::Result<Box<dyn CameraDevice>>;
}

/// Scans device indices `0..max_attempts` for the first usable camera.
#[derive(Debug, Clone, Copy)]
pub struct DeviceAcquirer {
    max_attempts: u32,
}

impl Default for DeviceAcquirer {
    fn default() -> Self {
        Self { max_attempts: 5 }
    }
}

impl DeviceAcquirer {
    pub fn new(max_attempts: u32) -> Self {
        Self { max_attempts }
    }

    /// Return a handle to the lowest-indexed device that reports itself open.
    pub fn acquire(&self, probe: &mut dyn DeviceProbe) -> Result<CameraHandle, SenderError> {
        info!("Probing up to {} camera devices...", self.max_attempts);

        for index in 0..self.max_attempts {
            match probe.open(index) {
                Ok(device) if device.is_open() => {
                    info!(index, "Camera device opened");
                    return Ok(CameraHandle::new(index, device));
                }
                Ok(mut device) => {
                    debug!(index, "Device present but not open, releasing");
                    device.release();
                }
                Err(e) => debug!(index, "Device open failed: {}", e),
            }
        }

        warn!("No camera device found");
        Err(SenderError::DeviceNotFound {
            attempts: self.max_attempts,
        })
    }
}

/// Exclusive owner of the selected camera. Releases the device exactly once,
/// either through [`CameraHandle::release`] or on drop.
pub struct CameraHandle {
    index: u32,
    device: Box<dyn CameraDevice>,
    released: bool,
}

impl CameraHandle {
    pub fn new(index: u32, device: Box<dyn CameraDevice>) -> Self {
        Self {
            index,
            device,
            released: false,
        }
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn read(&mut self) -> Result<RawFrame, CaptureError> {
        if self.released {
            return Err(CaptureError::Disconnected);
        }
        self.device.read()
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    pub fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.device.release();
            info!(index = self.index, "Camera released");
        }
    }
}

impl Drop for CameraHandle {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for CameraHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CameraHandle")
            .field("index", &self.index)
            .field("released", &self.released)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    struct StubDevice {
        open: bool,
        releases: Arc<AtomicUsize>,
    }

    impl CameraDevice for StubDevice {
        fn is_open(&self) -> bool {
            self.open
        }

        fn read(&mut self) -> Result<RawFrame, CaptureError> {
            RawFrame::from_rgb(vec![0; 12], 2, 2, 1)
        }

        fn release(&mut self) {
            self.releases.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Index `open_at` opens; indices in `closed` exist but are not open;
    /// everything else fails to open.
    struct ScriptedProbe {
        open_at: Option<u32>,
        closed: Vec<u32>,
        probed: Arc<Mutex<Vec<u32>>>,
        releases: Arc<AtomicUsize>,
    }

    impl ScriptedProbe {
        fn new(open_at: Option<u32>) -> Self {
            Self {
                open_at,
                closed: Vec::new(),
                probed: Arc::default(),
                releases: Arc::default(),
            }
        }
    }

    impl DeviceProbe for ScriptedProbe {
        fn open(&mut self, index: u32) -> io::Result<Box<dyn CameraDevice>> {
            self.probed.lock().unwrap().push(index);
            let open = self.open_at == Some(index);
            if open || self.closed.contains(&index) {
                Ok(Box::new(StubDevice {
                    open,
                    releases: self.releases.clone(),
                }))
            } else {
                Err(io::Error::new(io::ErrorKind::NotFound, "no such device"))
            }
        }
    }

    #[test]
    fn device_at_k_takes_k_plus_one_probes() {
        for k in 0..5 {
            let mut probe = ScriptedProbe::new(Some(k));
            let handle = DeviceAcquirer::new(5).acquire(&mut probe).unwrap();
            assert_eq!(handle.index(), k);
            let probed = probe.probed.lock().unwrap().clone();
            assert_eq!(probed, (0..=k).collect::<Vec<_>>());
        }
    }

    #[test]
    fn not_found_after_all_attempts() {
        let mut probe = ScriptedProbe::new(None);
        let err = DeviceAcquirer::new(3).acquire(&mut probe).unwrap_err();
        assert!(matches!(err, SenderError::DeviceNotFound { attempts: 3 }));
        assert_eq!(*probe.probed.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn device_beyond_budget_is_not_found() {
        let mut probe = ScriptedProbe::new(Some(5));
        assert!(DeviceAcquirer::default().acquire(&mut probe).is_err());
    }

    #[test]
    fn unopened_handles_are_released() {
        let mut probe = ScriptedProbe::new(Some(2));
        probe.closed = vec![0, 1];
        let handle = DeviceAcquirer::default().acquire(&mut probe).unwrap();
        assert_eq!(probe.releases.load(Ordering::SeqCst), 2);

        drop(handle);
        assert_eq!(probe.releases.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn handle_releases_once() {
        let releases = Arc::new(AtomicUsize::new(0));
        let mut handle = CameraHandle::new(
            0,
            Box::new(StubDevice {
                open: true,
                releases: releases.clone(),
            }),
        );
        handle.release();
        handle.release();
        assert!(handle.is_released());
        assert!(matches!(handle.read(), Err(CaptureError::Disconnected)));
        drop(handle);
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }
}
