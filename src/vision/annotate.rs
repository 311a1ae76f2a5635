//! Marker outline drawing on BGR frames

use crate::capture::ConvertedFrame;
use crate::vision::MarkerDetection;

pub const OUTLINE_BGR: [u8; 3] = [0, 255, 0];
pub const FIRST_CORNER_BGR: [u8; 3] = [0, 0, 255];

/// Outlines each marker and boxes its first corner.
pub fn draw_detected_markers(frame: &mut ConvertedFrame, detections: &[MarkerDetection]) {
    for detection in detections {
        let c = &detection.corners;
        for i in 0..4 {
            draw_line(frame, c[i], c[(i + 1) % 4], OUTLINE_BGR);
        }
        let [x, y] = c[0];
        draw_rect(frame, [x - 3.0, y - 3.0, x + 3.0, y + 3.0], FIRST_CORNER_BGR);
    }
}

/// Draw a rectangle border given `[x0, y0, x1, y1]` in pixels.
pub fn draw_rect(frame: &mut ConvertedFrame, rect: [f32; 4], bgr: [u8; 3]) {
    let [x0, y0, x1, y1] = rect;
    draw_line(frame, [x0, y0], [x1, y0], bgr);
    draw_line(frame, [x1, y0], [x1, y1], bgr);
    draw_line(frame, [x1, y1], [x0, y1], bgr);
    draw_line(frame, [x0, y1], [x0, y0], bgr);
}

/// DDA line, clipped to the frame buffer.
pub fn draw_line(frame: &mut ConvertedFrame, from: [f32; 2], to: [f32; 2], bgr: [u8; 3]) {
    let (dx, dy) = (to[0] - from[0], to[1] - from[1]);
    let steps = dx.abs().max(dy.abs()).ceil().max(1.0) as u32;
    for s in 0..=steps {
        let t = s as f32 / steps as f32;
        let x = (from[0] + dx * t).round();
        let y = (from[1] + dy * t).round();
        if x >= 0.0 && y >= 0.0 {
            frame.put_pixel(x as u32, y as u32, bgr);
        }
    }
}
