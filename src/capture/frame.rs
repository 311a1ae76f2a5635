use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// One raw capture in the sensor's native encoding.
///
/// Deliberately not `Clone`: the frame is handed back to the camera through
/// [`Camera::release_frame`](crate::capture::Camera::release_frame), which
/// consumes it, so a frame can never be released twice.
#[derive(Debug)]
pub struct RawFrame {
    /// Frame payload, rows addressed through `meta.stride`
    pub data: Bytes,

    /// Frame metadata
    pub meta: FrameMetadata,

    /// Whether the device delivered the whole image
    pub status: FrameStatus,
}

impl RawFrame {
    pub fn new(data: impl Into<Bytes>, meta: FrameMetadata, status: FrameStatus) -> Self {
        Self {
            data: data.into(),
            meta,
            status,
        }
    }
}

/// Frame metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameMetadata {
    pub sequence: u64,
    /// Nominal width in pixels
    pub width: u32,
    /// Nominal height in pixels
    pub height: u32,
    /// Bytes per row, padding included
    pub stride: u32,
    /// Extra pixels per row beyond `width`
    pub x_padding: u32,
    /// Extra rows beyond `height`
    pub y_padding: u32,
    pub format: PixelFormat,
    pub device_timestamp: Option<Duration>, // Hardware timestamp if available
}

impl FrameMetadata {
    /// Tightly packed metadata for a frame without padding.
    pub fn packed(sequence: u64, width: u32, height: u32, format: PixelFormat) -> Self {
        let stride = format
            .bytes_per_pixel()
            .map(|bpp| width * bpp as u32)
            .unwrap_or(width);
        Self {
            sequence,
            width,
            height,
            stride,
            x_padding: 0,
            y_padding: 0,
            format,
            device_timestamp: None,
        }
    }

    /// Addressable width: nominal width plus horizontal padding.
    pub fn buffer_width(&self) -> u32 {
        self.width + self.x_padding
    }

    /// Addressable height: nominal height plus vertical padding.
    pub fn buffer_height(&self) -> u32 {
        self.height + self.y_padding
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameStatus {
    Complete,
    Incomplete(String),
}

/// Pixel formats we support
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    Mono8,
    Rgb24,
    Bgr24,
    Yuyv4,
    Nv12,
    Mjpeg,
    BayerRg8,
    BayerBg8,
    BayerGb8,
    BayerGr8,
}

impl PixelFormat {
    /// Bytes per pixel in the first plane, `None` for compressed formats.
    pub fn bytes_per_pixel(self) -> Option<usize> {
        match self {
            PixelFormat::Mono8
            | PixelFormat::Nv12
            | PixelFormat::BayerRg8
            | PixelFormat::BayerBg8
            | PixelFormat::BayerGb8
            | PixelFormat::BayerGr8 => Some(1),
            PixelFormat::Yuyv4 => Some(2),
            PixelFormat::Rgb24 | PixelFormat::Bgr24 => Some(3),
            PixelFormat::Mjpeg => None,
        }
    }

    pub fn fourcc(self) -> [u8; 4] {
        match self {
            PixelFormat::Mono8 => *b"GREY",
            PixelFormat::Rgb24 => *b"RGB3",
            PixelFormat::Bgr24 => *b"BGR3",
            PixelFormat::Yuyv4 => *b"YUYV",
            PixelFormat::Nv12 => *b"NV12",
            PixelFormat::Mjpeg => *b"MJPG",
            PixelFormat::BayerRg8 => *b"RGGB",
            PixelFormat::BayerBg8 => *b"BA81",
            PixelFormat::BayerGb8 => *b"GBRG",
            PixelFormat::BayerGr8 => *b"GRBG",
        }
    }

    pub fn from_fourcc(repr: [u8; 4]) -> Option<Self> {
        let format = match &repr {
            b"GREY" => PixelFormat::Mono8,
            b"RGB3" => PixelFormat::Rgb24,
            b"BGR3" => PixelFormat::Bgr24,
            b"YUYV" => PixelFormat::Yuyv4,
            b"NV12" => PixelFormat::Nv12,
            b"MJPG" => PixelFormat::Mjpeg,
            b"RGGB" => PixelFormat::BayerRg8,
            b"BA81" => PixelFormat::BayerBg8,
            b"GBRG" => PixelFormat::BayerGb8,
            b"GRBG" => PixelFormat::BayerGr8,
            _ => return None,
        };
        Some(format)
    }

    /// Minimum payload for a frame with this layout.
    pub fn required_len(self, meta: &FrameMetadata) -> Option<usize> {
        let bpp = self.bytes_per_pixel()?;
        let rows = meta.buffer_height() as usize;
        if rows == 0 {
            return Some(0);
        }
        let stride = meta.stride as usize;
        let last_row = meta.buffer_width() as usize * bpp;
        let luma = stride * (rows - 1) + last_row;
        Some(match self {
            PixelFormat::Nv12 => stride * rows + stride * (rows.div_ceil(2) - 1) + last_row,
            _ => luma,
        })
    }
}
