//! Conversion of sensor-native frames into 3-channel BGR buffers

use std::path::Path;

use image::{ImageBuffer, ImageFormat, Rgb, RgbImage};
use jpeg_decoder::{Decoder, PixelFormat as JpegPixelFormat};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::frame::{FrameMetadata, PixelFormat, RawFrame};

#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("frame buffer too small: need {expected} bytes, got {actual}")]
    BufferTooSmall { expected: usize, actual: usize },

    #[error("jpeg decode failed: {0}")]
    Decode(#[from] jpeg_decoder::Error),

    #[error("unsupported layout: {0}")]
    UnsupportedLayout(String),
}

/// Speed/quality trade-off used when demosaicing Bayer data
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColorProcessing {
    NearestNeighbor,
    #[default]
    Bilinear,
}

/// Converts raw frames into a fixed BGR8 layout.
pub trait PixelConverter {
    fn convert(&self, frame: &RawFrame) -> Result<ConvertedFrame, ConvertError>;
}

/// BGR8 image owned by the caller, independent of the source frame.
///
/// The buffer covers `(width + x_padding) x (height + y_padding)` pixels so
/// that padded sensor rows land where the device put them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvertedFrame {
    data: Vec<u8>,
    width: u32,
    height: u32,
    x_padding: u32,
    y_padding: u32,
    stride: usize,
}

impl ConvertedFrame {
    /// Black frame with the given nominal size and padding.
    pub fn new(width: u32, height: u32, x_padding: u32, y_padding: u32) -> Self {
        let stride = (width + x_padding) as usize * 3;
        let rows = (height + y_padding) as usize;
        Self {
            data: vec![0; stride * rows],
            width,
            height,
            x_padding,
            y_padding,
            stride,
        }
    }

    fn for_frame(meta: &FrameMetadata) -> Self {
        Self::new(meta.width, meta.height, meta.x_padding, meta.y_padding)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn x_padding(&self) -> u32 {
        self.x_padding
    }

    pub fn y_padding(&self) -> u32 {
        self.y_padding
    }

    /// Bytes per row of the BGR buffer.
    pub fn stride(&self) -> usize {
        self.stride
    }

    /// Addressable dimensions, padding included.
    pub fn buffer_dims(&self) -> (u32, u32) {
        (self.width + self.x_padding, self.height + self.y_padding)
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        let offset = self.offset(x, y)?;
        Some([
            self.data[offset],
            self.data[offset + 1],
            self.data[offset + 2],
        ])
    }

    /// Writes a BGR pixel, ignoring coordinates outside the buffer.
    pub fn put_pixel(&mut self, x: u32, y: u32, bgr: [u8; 3]) {
        if let Some(offset) = self.offset(x, y) {
            self.data[offset..offset + 3].copy_from_slice(&bgr);
        }
    }

    fn offset(&self, x: u32, y: u32) -> Option<usize> {
        let (w, h) = self.buffer_dims();
        if x >= w || y >= h {
            return None;
        }
        Some(y as usize * self.stride + x as usize * 3)
    }

    pub fn to_rgb_image(&self) -> RgbImage {
        let (w, h) = self.buffer_dims();
        ImageBuffer::from_fn(w, h, |x, y| {
            let [b, g, r] = self.pixel(x, y).unwrap_or_default();
            Rgb([r, g, b])
        })
    }

    pub fn save_png(&self, path: impl AsRef<Path>) -> Result<(), image::ImageError> {
        self.to_rgb_image()
            .save_with_format(path.as_ref(), ImageFormat::Png)
    }
}

/// Converter producing BGR8 with a fixed demosaic profile
#[derive(Debug, Clone, Copy, Default)]
pub struct BgrConverter {
    processing: ColorProcessing,
}

impl BgrConverter {
    pub fn new(processing: ColorProcessing) -> Self {
        Self { processing }
    }
}

impl PixelConverter for BgrConverter {
    fn convert(&self, frame: &RawFrame) -> Result<ConvertedFrame, ConvertError> {
        let meta = &frame.meta;
        let src = &frame.data[..];

        if let Some(expected) = meta.format.required_len(meta) {
            if src.len() < expected {
                return Err(ConvertError::BufferTooSmall {
                    expected,
                    actual: src.len(),
                });
            }
        }

        if meta.format == PixelFormat::Mjpeg {
            return decode_jpeg(src);
        }

        let mut out = ConvertedFrame::for_frame(meta);
        let (w, h) = out.buffer_dims();
        let stride = meta.stride as usize;

        match meta.format {
            PixelFormat::Mono8 => {
                for y in 0..h {
                    let row = &src[y as usize * stride..];
                    for x in 0..w {
                        let v = row[x as usize];
                        out.put_pixel(x, y, [v, v, v]);
                    }
                }
            }
            PixelFormat::Rgb24 | PixelFormat::Bgr24 => {
                let swap = meta.format == PixelFormat::Rgb24;
                for y in 0..h {
                    let row = &src[y as usize * stride..];
                    for x in 0..w {
                        let p = &row[x as usize * 3..x as usize * 3 + 3];
                        let bgr = if swap {
                            [p[2], p[1], p[0]]
                        } else {
                            [p[0], p[1], p[2]]
                        };
                        out.put_pixel(x, y, bgr);
                    }
                }
            }
            PixelFormat::Yuyv4 => {
                if w % 2 != 0 {
                    return Err(ConvertError::UnsupportedLayout(format!(
                        "YUYV needs an even row width, got {w}"
                    )));
                }
                for y in 0..h {
                    let row = &src[y as usize * stride..];
                    for pair in 0..w / 2 {
                        let p = &row[pair as usize * 4..pair as usize * 4 + 4];
                        let (y0, u, y1, v) = (p[0], p[1], p[2], p[3]);
                        out.put_pixel(pair * 2, y, yuv_to_bgr(y0, u, v));
                        out.put_pixel(pair * 2 + 1, y, yuv_to_bgr(y1, u, v));
                    }
                }
            }
            PixelFormat::Nv12 => {
                if w % 2 != 0 {
                    return Err(ConvertError::UnsupportedLayout(format!(
                        "NV12 needs an even row width, got {w}"
                    )));
                }
                let chroma = &src[stride * h as usize..];
                for y in 0..h {
                    let luma_row = &src[y as usize * stride..];
                    let chroma_row = &chroma[(y / 2) as usize * stride..];
                    for x in 0..w {
                        let c = (x & !1) as usize;
                        let (u, v) = (chroma_row[c], chroma_row[c + 1]);
                        out.put_pixel(x, y, yuv_to_bgr(luma_row[x as usize], u, v));
                    }
                }
            }
            PixelFormat::BayerRg8
            | PixelFormat::BayerBg8
            | PixelFormat::BayerGb8
            | PixelFormat::BayerGr8 => {
                let cfa = Cfa::for_format(meta.format);
                demosaic(src, w, h, stride, cfa, self.processing, &mut out)?;
            }
            PixelFormat::Mjpeg => {}
        }

        Ok(out)
    }
}

fn decode_jpeg(data: &[u8]) -> Result<ConvertedFrame, ConvertError> {
    let mut decoder = Decoder::new(data);
    let pixels = decoder.decode()?;
    let info = decoder
        .info()
        .ok_or_else(|| ConvertError::UnsupportedLayout("jpeg without header".into()))?;

    let (w, h) = (info.width as u32, info.height as u32);
    let mut out = ConvertedFrame::new(w, h, 0, 0);
    match info.pixel_format {
        JpegPixelFormat::RGB24 => {
            for (i, p) in pixels.chunks_exact(3).enumerate() {
                let i = i as u32;
                out.put_pixel(i % w, i / w, [p[2], p[1], p[0]]);
            }
        }
        JpegPixelFormat::L8 => {
            for (i, &v) in pixels.iter().enumerate() {
                let i = i as u32;
                out.put_pixel(i % w, i / w, [v, v, v]);
            }
        }
        other => {
            return Err(ConvertError::UnsupportedLayout(format!(
                "jpeg pixel format {other:?}"
            )))
        }
    }
    Ok(out)
}

/// BT.601 limited range YCbCr to BGR
fn yuv_to_bgr(y: u8, u: u8, v: u8) -> [u8; 3] {
    let c = y as i32 - 16;
    let d = u as i32 - 128;
    let e = v as i32 - 128;
    let clamp = |x: i32| ((x + 128) >> 8).clamp(0, 255) as u8;
    let r = clamp(298 * c + 409 * e);
    let g = clamp(298 * c - 100 * d - 208 * e);
    let b = clamp(298 * c + 516 * d);
    [b, g, r]
}

const BLUE: usize = 0;
const GREEN: usize = 1;
const RED: usize = 2;

/// Colour filter array: BGR channel index at `(y % 2) * 2 + x % 2`
#[derive(Debug, Clone, Copy)]
struct Cfa([usize; 4]);

impl Cfa {
    fn for_format(format: PixelFormat) -> Self {
        match format {
            PixelFormat::BayerRg8 => Cfa([RED, GREEN, GREEN, BLUE]),
            PixelFormat::BayerBg8 => Cfa([BLUE, GREEN, GREEN, RED]),
            PixelFormat::BayerGb8 => Cfa([GREEN, BLUE, RED, GREEN]),
            _ => Cfa([GREEN, RED, BLUE, GREEN]),
        }
    }

    fn channel(self, x: u32, y: u32) -> usize {
        self.0[((y % 2) * 2 + x % 2) as usize]
    }
}

fn demosaic(
    src: &[u8],
    w: u32,
    h: u32,
    stride: usize,
    cfa: Cfa,
    processing: ColorProcessing,
    out: &mut ConvertedFrame,
) -> Result<(), ConvertError> {
    if w < 2 || h < 2 {
        return Err(ConvertError::UnsupportedLayout(format!(
            "bayer frame {w}x{h} is smaller than one filter tile"
        )));
    }
    let at = |x: u32, y: u32| src[y as usize * stride + x as usize] as u32;

    for y in 0..h {
        for x in 0..w {
            let mut sums = [0u32; 3];
            let mut counts = [0u32; 3];
            match processing {
                ColorProcessing::NearestNeighbor => {
                    let bx = (x & !1).min(w - 2);
                    let by = (y & !1).min(h - 2);
                    for (tx, ty) in [(bx, by), (bx + 1, by), (bx, by + 1), (bx + 1, by + 1)] {
                        let c = cfa.channel(tx, ty);
                        sums[c] += at(tx, ty);
                        counts[c] += 1;
                    }
                }
                ColorProcessing::Bilinear => {
                    let own = cfa.channel(x, y);
                    sums[own] = at(x, y);
                    counts[own] = 1;
                    for ny in y.saturating_sub(1)..=(y + 1).min(h - 1) {
                        for nx in x.saturating_sub(1)..=(x + 1).min(w - 1) {
                            let c = cfa.channel(nx, ny);
                            if c != own {
                                sums[c] += at(nx, ny);
                                counts[c] += 1;
                            }
                        }
                    }
                }
            }
            let mut bgr = [0u8; 3];
            for c in 0..3 {
                if counts[c] > 0 {
                    bgr[c] = ((sums[c] + counts[c] / 2) / counts[c]) as u8;
                }
            }
            out.put_pixel(x, y, bgr);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::frame::FrameStatus;

    fn frame(data: Vec<u8>, meta: FrameMetadata) -> RawFrame {
        RawFrame::new(data, meta, FrameStatus::Complete)
    }

    #[test]
    fn mono_with_padding_fills_padded_buffer() {
        let mut meta = FrameMetadata::packed(1, 6, 4, PixelFormat::Mono8);
        meta.x_padding = 2;
        meta.y_padding = 1;
        meta.stride = 10;
        let data: Vec<u8> = (0..10 * 5).map(|i| i as u8).collect();

        let out = BgrConverter::default().convert(&frame(data, meta)).unwrap();
        assert_eq!(out.buffer_dims(), (8, 5));
        assert_eq!(out.stride(), 24);
        assert_eq!(out.data().len(), 24 * 5);
        // Row 2, column 7 sits at 2 * stride + 7 in the source.
        assert_eq!(out.pixel(7, 2), Some([27, 27, 27]));
        assert_eq!(out.pixel(8, 0), None);
    }

    #[test]
    fn short_buffer_is_rejected() {
        let meta = FrameMetadata::packed(1, 4, 4, PixelFormat::Rgb24);
        let err = BgrConverter::default()
            .convert(&frame(vec![0; 10], meta))
            .unwrap_err();
        assert!(matches!(
            err,
            ConvertError::BufferTooSmall {
                expected: 48,
                actual: 10
            }
        ));
    }

    #[test]
    fn rgb_is_swapped_to_bgr() {
        let meta = FrameMetadata::packed(1, 1, 1, PixelFormat::Rgb24);
        let out = BgrConverter::default()
            .convert(&frame(vec![10, 20, 30], meta))
            .unwrap();
        assert_eq!(out.pixel(0, 0), Some([30, 20, 10]));
        assert_eq!(out.to_rgb_image().get_pixel(0, 0), &Rgb([10, 20, 30]));
    }

    #[test]
    fn yuyv_grey_stays_grey() {
        let meta = FrameMetadata::packed(1, 2, 1, PixelFormat::Yuyv4);
        let out = BgrConverter::default()
            .convert(&frame(vec![126, 128, 126, 128], meta))
            .unwrap();
        let [b, g, r] = out.pixel(1, 0).unwrap();
        assert_eq!(b, g);
        assert_eq!(g, r);
    }

    #[test]
    fn yuyv_odd_width_is_unsupported() {
        let meta = FrameMetadata::packed(1, 3, 1, PixelFormat::Yuyv4);
        let err = BgrConverter::default()
            .convert(&frame(vec![0; 6], meta))
            .unwrap_err();
        assert!(matches!(err, ConvertError::UnsupportedLayout(_)));
    }

    #[test]
    fn nv12_odd_width_is_unsupported() {
        let meta = FrameMetadata::packed(1, 3, 2, PixelFormat::Nv12);
        let err = BgrConverter::default()
            .convert(&frame(vec![128; 9], meta))
            .unwrap_err();
        assert!(matches!(err, ConvertError::UnsupportedLayout(_)));
    }

    #[test]
    fn nv12_shares_chroma_across_pixel_pairs() {
        // 4x2 luma, one chroma row: (U, V) = (128, 128) then (90, 240)
        let meta = FrameMetadata::packed(1, 4, 2, PixelFormat::Nv12);
        let mut data = vec![128; 8];
        data.extend_from_slice(&[128, 128, 90, 240]);

        let out = BgrConverter::default().convert(&frame(data, meta)).unwrap();
        assert_eq!(out.pixel(0, 1), Some([130, 130, 130]));
        assert_eq!(out.pixel(2, 0), out.pixel(3, 1));
        let [b, _, r] = out.pixel(3, 0).unwrap();
        assert!(r > b, "strong V should push the last column towards red");
    }

    #[test]
    fn bayer_uniform_tiles_demosaic_to_flat_colour() {
        // RGGB tile repeated over a 4x4 frame: R=200, G=100, B=50
        let tile = |x: usize, y: usize| match (x % 2, y % 2) {
            (0, 0) => 200u8,
            (1, 1) => 50,
            _ => 100,
        };
        let data: Vec<u8> = (0..16).map(|i| tile(i % 4, i / 4)).collect();
        let meta = FrameMetadata::packed(1, 4, 4, PixelFormat::BayerRg8);

        for processing in [ColorProcessing::NearestNeighbor, ColorProcessing::Bilinear] {
            let out = BgrConverter::new(processing)
                .convert(&frame(data.clone(), meta.clone()))
                .unwrap();
            for y in 0..4 {
                for x in 0..4 {
                    assert_eq!(out.pixel(x, y), Some([50, 100, 200]), "{processing:?}");
                }
            }
        }
    }

    #[test]
    fn clone_is_independent() {
        let mut a = ConvertedFrame::new(2, 2, 0, 0);
        let b = a.clone();
        a.put_pixel(0, 0, [1, 2, 3]);
        assert_eq!(b.pixel(0, 0), Some([0, 0, 0]));
    }
}
