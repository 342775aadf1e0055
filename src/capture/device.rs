//! Capture-device capability.
//!
//! The pipeline only sees these traits; [`super::v4l2::V4l2Backend`] is the
//! production implementation and tests plug in their own.

use serde::{Deserialize, Serialize};

use super::convert::RawFrame;
use crate::error::{GrabError, ScanError};

/// Enumerated capture device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    pub index: usize,
    pub name: String,
    pub path: String,
}

/// Factory for capture handles.
pub trait CaptureBackend: Send + Sync {
    fn list_devices(&self) -> Vec<DeviceDescriptor>;

    /// Open the device at `index` in [`Self::list_devices`] order.
    fn open(&self, index: usize) -> Result<Box<dyn CaptureHandle>, ScanError>;
}

/// An open device. Dropping the handle closes it.
pub trait CaptureHandle: Send {
    fn resolution(&self) -> (u32, u32);

    /// Best-effort resize; `false` when the device kept its previous mode.
    fn negotiate_resolution(&mut self, width: u32, height: u32) -> bool;

    /// Dequeue the next payload. Transient failures skip the tick.
    fn grab(&mut self) -> Result<RawFrame<'_>, GrabError>;
}
