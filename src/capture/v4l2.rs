//! V4L2 camera backend with memory-mapped streaming

use std::path::{Path, PathBuf};
use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, info, instrument, warn};
use v4l::buffer::{Flags as BufferFlags, Type};
use v4l::capability::Flags as CapFlags;
use v4l::io::traits::CaptureStream;
use v4l::prelude::MmapStream;
use v4l::video::Capture;
use v4l::{Device, Format, FourCC};

use crate::capture::device::{Camera, CameraError, CameraList, CameraSystem, DeviceInfo};
use crate::capture::frame::{FrameMetadata, FrameStatus, PixelFormat, RawFrame};
use crate::CaptureConfig;

/// Driver-level handle over the V4L2 device nodes of this machine
pub struct V4l2System {
    config: CaptureConfig,
}

impl V4l2System {
    pub fn open(config: CaptureConfig) -> Result<Self, CameraError> {
        info!("Opening V4L2 camera system");
        Ok(Self { config })
    }
}

impl CameraSystem for V4l2System {
    type Camera = V4l2Camera;

    #[instrument(skip(self))]
    fn cameras(&mut self) -> Result<CameraList<'_, V4l2Camera>, CameraError> {
        let mut nodes = v4l::context::enum_devices();
        nodes.sort_by_key(|node| node.index());

        let mut cameras = Vec::new();
        for node in nodes {
            let path = node.path().to_path_buf();
            if let Some(wanted) = &self.config.device {
                if Path::new(wanted) != path.as_path() {
                    continue;
                }
            }

            // Metadata nodes share the driver but cannot capture
            let caps = match Device::with_path(&path).and_then(|dev| dev.query_caps()) {
                Ok(caps) => caps,
                Err(e) => {
                    warn!("Skipping {}: {}", path.display(), e);
                    continue;
                }
            };
            if !caps.capabilities.contains(CapFlags::VIDEO_CAPTURE) {
                debug!("Skipping {}: no video capture capability", path.display());
                continue;
            }

            info!("Found capture device: {} - {}", path.display(), caps.card);
            cameras.push(V4l2Camera::new(path, self.config.clone()));
        }

        Ok(CameraList::new(cameras))
    }

    fn release(self) -> Result<(), CameraError> {
        info!("V4L2 camera system released");
        Ok(())
    }
}

/// Single V4L2 capture device
pub struct V4l2Camera {
    path: PathBuf,
    config: CaptureConfig,
    device: Option<Box<Device>>,
    format: Option<Format>,
    stream: Option<MmapStream<'static>>,
    sequence: u64,
    outstanding: usize,
}

impl V4l2Camera {
    fn new(path: PathBuf, config: CaptureConfig) -> Self {
        Self {
            path,
            config,
            device: None,
            format: None,
            stream: None,
            sequence: 0,
            outstanding: 0,
        }
    }

    fn negotiated(&self) -> Result<(&Device, &Format), CameraError> {
        match (self.device.as_deref(), self.format.as_ref()) {
            (Some(device), Some(format)) => Ok((device, format)),
            _ => Err(CameraError::NotInitialized),
        }
    }

    fn frame_metadata(&self, format: &Format, pixel_format: PixelFormat) -> FrameMetadata {
        let mut meta =
            FrameMetadata::packed(self.sequence, format.width, format.height, pixel_format);
        if let Some(bpp) = pixel_format.bytes_per_pixel() {
            let stride = format.stride.max(format.width * bpp as u32);
            meta.stride = stride;
            meta.x_padding = stride / bpp as u32 - format.width;
        }
        meta
    }
}

impl Camera for V4l2Camera {
    fn label(&self) -> String {
        self.path.display().to_string()
    }

    fn device_info(&self) -> Result<DeviceInfo, CameraError> {
        let device = Device::with_path(&self.path)?;
        let caps = device.query_caps()?;

        let mut info = DeviceInfo::default();
        info.push("DeviceDriver", caps.driver.clone());
        info.push("DeviceModelName", caps.card.clone());
        info.push("DeviceBusInfo", caps.bus.clone());
        let (major, minor, patch) = caps.version;
        info.push("DeviceDriverVersion", format!("{major}.{minor}.{patch}"));
        info.push("DeviceCapabilities", format!("{:?}", caps.capabilities));

        match device.enum_formats() {
            Ok(formats) => {
                for (i, desc) in formats.iter().enumerate() {
                    let fourcc = desc.fourcc.str().unwrap_or("????");
                    info.push(
                        format!("PixelFormat[{i}]"),
                        format!("{} ({})", fourcc, desc.description),
                    );
                }
            }
            Err(e) => {
                debug!("Format enumeration failed on {}: {}", self.path.display(), e);
                info.push_unreadable("PixelFormat");
            }
        }

        Ok(info)
    }

    #[instrument(skip(self), fields(device = %self.path.display()))]
    fn init(&mut self) -> Result<(), CameraError> {
        let device = Device::with_path(&self.path).map_err(|e| CameraError::Init(e.to_string()))?;

        let mut fmt = device
            .format()
            .map_err(|e| CameraError::Init(e.to_string()))?;
        fmt.width = self.config.width;
        fmt.height = self.config.height;
        fmt.fourcc = FourCC::new(&self.config.format.fourcc());

        let negotiated = device
            .set_format(&fmt)
            .map_err(|e| CameraError::Init(e.to_string()))?;
        if PixelFormat::from_fourcc(negotiated.fourcc.repr).is_none() {
            return Err(CameraError::Init(format!(
                "device negotiated unsupported format {}",
                negotiated.fourcc
            )));
        }
        if negotiated.width != self.config.width || negotiated.height != self.config.height {
            warn!(
                "Requested {}x{}, device chose {}x{}",
                self.config.width, self.config.height, negotiated.width, negotiated.height
            );
        }

        info!(
            "Initialized {}x{} {} (stride {})",
            negotiated.width, negotiated.height, negotiated.fourcc, negotiated.stride
        );
        self.device = Some(Box::new(device));
        self.format = Some(negotiated);
        Ok(())
    }

    fn set_continuous_acquisition(&mut self) -> Result<(), CameraError> {
        let (device, _) = self.negotiated()?;
        let caps = device
            .query_caps()
            .map_err(|e| CameraError::AcquisitionMode(e.to_string()))?;
        if !caps.capabilities.contains(CapFlags::STREAMING) {
            return Err(CameraError::AcquisitionMode(
                "device does not support streaming I/O".into(),
            ));
        }
        Ok(())
    }

    fn begin_acquisition(&mut self) -> Result<(), CameraError> {
        let (device, _) = self.negotiated()?;
        let stream =
            MmapStream::with_buffers(device, Type::VideoCapture, self.config.buffer_count)?;
        self.stream = Some(stream);
        info!(
            "Capture stream started with {} buffers",
            self.config.buffer_count
        );
        Ok(())
    }

    fn next_frame(&mut self) -> Result<RawFrame, CameraError> {
        let format = self.format.clone().ok_or(CameraError::NotInitialized)?;
        let pixel_format =
            PixelFormat::from_fourcc(format.fourcc.repr).ok_or(CameraError::NotInitialized)?;

        let stream = self.stream.as_mut().ok_or(CameraError::NotStreaming)?;
        let (buf, buf_meta) = stream.next().map_err(CameraError::Stream)?;

        let used = (buf_meta.bytesused as usize).min(buf.len());
        let data = Bytes::copy_from_slice(&buf[..used]);
        let flagged = buf_meta.flags.contains(BufferFlags::ERROR);
        let device_timestamp = Duration::from_secs(buf_meta.timestamp.sec as u64)
            + Duration::from_micros(buf_meta.timestamp.usec as u64);

        self.sequence += 1;
        let mut meta = self.frame_metadata(&format, pixel_format);
        meta.device_timestamp = Some(device_timestamp);

        let status = if flagged {
            FrameStatus::Incomplete("buffer flagged with error by driver".into())
        } else {
            match pixel_format.required_len(&meta) {
                Some(required) if data.len() < required => FrameStatus::Incomplete(format!(
                    "short buffer: {} of {} bytes",
                    data.len(),
                    required
                )),
                _ => FrameStatus::Complete,
            }
        };

        self.outstanding += 1;
        Ok(RawFrame::new(data, meta, status))
    }

    fn release_frame(&mut self, frame: RawFrame) {
        self.outstanding = self.outstanding.saturating_sub(1);
        debug!(
            "Released frame {} ({} outstanding)",
            frame.meta.sequence, self.outstanding
        );
    }

    fn end_acquisition(&mut self) -> Result<(), CameraError> {
        if self.stream.take().is_none() {
            return Err(CameraError::NotStreaming);
        }
        if self.outstanding > 0 {
            warn!("{} frames still held at end of acquisition", self.outstanding);
        }
        info!("Capture stream stopped");
        Ok(())
    }

    fn deinit(&mut self) -> Result<(), CameraError> {
        self.stream = None;
        self.format = None;
        self.device.take().ok_or(CameraError::NotInitialized)?;
        Ok(())
    }
}
