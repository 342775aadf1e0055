pub mod convert;
pub mod device;
pub mod frame;
pub mod source;
pub mod still;
pub mod v4l2;

pub use convert::RawFrame;
pub use device::{CaptureBackend, CaptureHandle, DeviceDescriptor};
pub use frame::Frame;
pub use frame::PixelFormat;
pub use source::{CaptureSource, CaptureStats, FrameFeed};
pub use still::load_image_file;
pub use v4l2::V4l2Backend;
