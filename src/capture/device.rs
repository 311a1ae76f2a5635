//! Camera system and per-device session contracts

use std::fmt;
use std::io;
use std::marker::PhantomData;

use thiserror::Error;

use super::frame::RawFrame;
use crate::pipeline::error::ErrorKind;

#[derive(Debug, Error)]
pub enum CameraError {
    #[error("device rejected initialization: {0}")]
    Init(String),

    #[error("unable to set acquisition mode to continuous: {0}")]
    AcquisitionMode(String),

    #[error("camera is not initialized")]
    NotInitialized,

    #[error("camera is not streaming")]
    NotStreaming,

    #[error("stream error: {0}")]
    Stream(#[source] io::Error),

    #[error("device error: {0}")]
    Device(#[from] io::Error),
}

impl CameraError {
    /// Errors raised before streaming starts are fatal for the camera, the
    /// rest concern a single frame.
    pub fn kind(&self) -> ErrorKind {
        match self {
            CameraError::Init(_)
            | CameraError::AcquisitionMode(_)
            | CameraError::NotInitialized
            | CameraError::Device(_) => ErrorKind::SetupFailed,
            CameraError::NotStreaming | CameraError::Stream(_) => ErrorKind::FrameIncomplete,
        }
    }
}

/// Ordered name/value features describing a device.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceInfo {
    pub features: Vec<(String, Option<String>)>,
}

impl DeviceInfo {
    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.features.push((name.into(), Some(value.into())));
    }

    /// Records a feature that exists but cannot be read.
    pub fn push_unreadable(&mut self, name: impl Into<String>) {
        self.features.push((name.into(), None));
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.features
            .iter()
            .find(|(n, _)| n == name)
            .and_then(|(_, v)| v.as_deref())
    }
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, value) in &self.features {
            writeln!(
                f,
                "{} : {}",
                name,
                value.as_deref().unwrap_or("Node not readable")
            )?;
        }
        Ok(())
    }
}

/// Top-level driver handle.
///
/// Owned by whoever opened it and released exactly once through
/// [`CameraSystem::release`]. The device list borrows the system, so the
/// list must be cleared (dropped) before the system can be released.
pub trait CameraSystem {
    type Camera: Camera;

    fn cameras(&mut self) -> Result<CameraList<'_, Self::Camera>, CameraError>;

    fn release(self) -> Result<(), CameraError>
    where
        Self: Sized;
}

/// Devices enumerated from a [`CameraSystem`], alive no longer than it.
pub struct CameraList<'sys, C> {
    cameras: Vec<C>,
    _system: PhantomData<&'sys mut ()>,
}

impl<'sys, C> CameraList<'sys, C> {
    pub fn new(cameras: Vec<C>) -> Self {
        Self {
            cameras,
            _system: PhantomData,
        }
    }

    pub fn len(&self) -> usize {
        self.cameras.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cameras.is_empty()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, C> {
        self.cameras.iter_mut()
    }

    /// Drops every camera handle, then the list itself.
    pub fn clear(mut self) {
        self.cameras.clear();
    }
}

/// One physical device between initialization and deinitialization.
pub trait Camera {
    /// Human readable identifier for logs.
    fn label(&self) -> String;

    /// Transport-layer device information, readable before `init`.
    fn device_info(&self) -> Result<DeviceInfo, CameraError>;

    fn init(&mut self) -> Result<(), CameraError>;

    /// Fails if the device has no writable acquisition mode selector.
    fn set_continuous_acquisition(&mut self) -> Result<(), CameraError>;

    fn begin_acquisition(&mut self) -> Result<(), CameraError>;

    /// Blocks until the next frame is available.
    fn next_frame(&mut self) -> Result<RawFrame, CameraError>;

    /// Returns the frame's buffer to the device pool.
    fn release_frame(&mut self, frame: RawFrame);

    fn end_acquisition(&mut self) -> Result<(), CameraError>;

    fn deinit(&mut self) -> Result<(), CameraError>;
}

impl<C: Camera + ?Sized> Camera for Box<C> {
    fn label(&self) -> String {
        (**self).label()
    }

    fn device_info(&self) -> Result<DeviceInfo, CameraError> {
        (**self).device_info()
    }

    fn init(&mut self) -> Result<(), CameraError> {
        (**self).init()
    }

    fn set_continuous_acquisition(&mut self) -> Result<(), CameraError> {
        (**self).set_continuous_acquisition()
    }

    fn begin_acquisition(&mut self) -> Result<(), CameraError> {
        (**self).begin_acquisition()
    }

    fn next_frame(&mut self) -> Result<RawFrame, CameraError> {
        (**self).next_frame()
    }

    fn release_frame(&mut self, frame: RawFrame) {
        (**self).release_frame(frame)
    }

    fn end_acquisition(&mut self) -> Result<(), CameraError> {
        (**self).end_acquisition()
    }

    fn deinit(&mut self) -> Result<(), CameraError> {
        (**self).deinit()
    }
}
