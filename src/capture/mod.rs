pub mod convert;
pub mod device;
pub mod frame;
pub mod v4l2;

pub use convert::{BgrConverter, ColorProcessing, ConvertError, ConvertedFrame, PixelConverter};
pub use device::{Camera, CameraError, CameraList, CameraSystem, DeviceInfo};
pub use frame::{FrameMetadata, FrameStatus, PixelFormat, RawFrame};
pub use v4l2::{V4l2Camera, V4l2System};
