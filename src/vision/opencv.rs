//! OpenCV-backed ArUco detection, pose estimation and marker rendering

use image::GrayImage;
use opencv::core::{Mat, Point2f, Point3f, Scalar, Vector};
use opencv::calib3d;
use opencv::objdetect::{self, PredefinedDictionaryType};
use opencv::prelude::*;

use crate::capture::ConvertedFrame;
use crate::vision::{
    Calibration, MarkerDetection, MarkerDetector, MarkerDictionary, MarkerPose, PoseEstimator,
    VisionError,
};

fn predefined(dictionary: MarkerDictionary) -> PredefinedDictionaryType {
    match dictionary {
        MarkerDictionary::Dict4x4_50 => PredefinedDictionaryType::DICT_4X4_50,
        MarkerDictionary::Dict4x4_250 => PredefinedDictionaryType::DICT_4X4_250,
        MarkerDictionary::Dict5x5_250 => PredefinedDictionaryType::DICT_5X5_250,
        MarkerDictionary::Dict6x6_250 => PredefinedDictionaryType::DICT_6X6_250,
        MarkerDictionary::Dict6x6_1000 => PredefinedDictionaryType::DICT_6X6_1000,
        MarkerDictionary::Dict7x7_1000 => PredefinedDictionaryType::DICT_7X7_1000,
        MarkerDictionary::ArucoOriginal => PredefinedDictionaryType::DICT_ARUCO_ORIGINAL,
    }
}

/// Owned `CV_8UC3` copy of the padded buffer.
fn to_mat(frame: &ConvertedFrame) -> opencv::Result<Mat> {
    let (w, h) = frame.buffer_dims();
    let flat = Mat::new_rows_cols_with_data(h as i32, w as i32 * 3, frame.data())?;
    flat.reshape(3, h as i32)?.try_clone()
}

pub struct OpenCvDetector {
    detector: objdetect::ArucoDetector,
}

impl OpenCvDetector {
    pub fn new(dictionary: MarkerDictionary) -> Result<Self, VisionError> {
        let build = || -> opencv::Result<objdetect::ArucoDetector> {
            let dict = objdetect::get_predefined_dictionary(predefined(dictionary))?;
            let params = objdetect::DetectorParameters::default()?;
            let refine = objdetect::RefineParameters::new(10.0, 3.0, true)?;
            objdetect::ArucoDetector::new(&dict, &params, refine)
        };
        let detector = build().map_err(|e| VisionError::Detection(e.to_string()))?;
        Ok(Self { detector })
    }
}

impl MarkerDetector for OpenCvDetector {
    fn detect(&self, frame: &ConvertedFrame) -> Result<Vec<MarkerDetection>, VisionError> {
        let run = || -> opencv::Result<Vec<MarkerDetection>> {
            let mat = to_mat(frame)?;
            let mut corners = Vector::<Vector<Point2f>>::new();
            let mut ids = Vector::<i32>::new();
            let mut rejected = Vector::<Vector<Point2f>>::new();
            self.detector
                .detect_markers(&mat, &mut corners, &mut ids, &mut rejected)?;

            let mut detections = Vec::with_capacity(ids.len());
            for (id, quad) in ids.iter().zip(corners.iter()) {
                let mut pts = [[0.0f32; 2]; 4];
                for (slot, p) in pts.iter_mut().zip(quad.iter()) {
                    *slot = [p.x, p.y];
                }
                detections.push(MarkerDetection { id, corners: pts });
            }
            Ok(detections)
        };
        run().map_err(|e| VisionError::Detection(e.to_string()))
    }

    fn annotate(
        &self,
        frame: &mut ConvertedFrame,
        detections: &[MarkerDetection],
    ) -> Result<(), VisionError> {
        let mut run = || -> opencv::Result<()> {
            let mut mat = to_mat(frame)?;
            let ids: Vector<i32> = detections.iter().map(|d| d.id).collect();
            let corners: Vector<Vector<Point2f>> = detections
                .iter()
                .map(|d| d.corners.iter().map(|c| Point2f::new(c[0], c[1])).collect())
                .collect();
            objdetect::draw_detected_markers(
                &mut mat,
                &corners,
                &ids,
                Scalar::new(0.0, 255.0, 0.0, 0.0),
            )?;
            frame.data_mut().copy_from_slice(mat.data_bytes()?);
            Ok(())
        };
        run().map_err(|e| VisionError::Detection(e.to_string()))
    }
}

/// Per-marker PnP on the square's four corners.
pub struct OpenCvPoseEstimator;

impl PoseEstimator for OpenCvPoseEstimator {
    fn estimate(
        &self,
        detections: &[MarkerDetection],
        marker_length: f64,
        calibration: &Calibration,
    ) -> Result<Vec<MarkerPose>, VisionError> {
        calibration.validate()?;
        let run = || -> opencv::Result<Vec<MarkerPose>> {
            let m = &calibration.camera_matrix;
            let camera = Mat::from_slice_2d(&[
                [m[0], m[1], m[2]],
                [m[3], m[4], m[5]],
                [m[6], m[7], m[8]],
            ])?;
            let dist = if calibration.dist_coeffs.is_empty() {
                Mat::default()
            } else {
                Mat::from_slice(calibration.dist_coeffs.as_slice())?.try_clone()?
            };

            let half = (marker_length / 2.0) as f32;
            let object: Vector<Point3f> = Vector::from_iter([
                Point3f::new(-half, half, 0.0),
                Point3f::new(half, half, 0.0),
                Point3f::new(half, -half, 0.0),
                Point3f::new(-half, -half, 0.0),
            ]);

            let mut poses = Vec::with_capacity(detections.len());
            for detection in detections {
                let image: Vector<Point2f> = detection
                    .corners
                    .iter()
                    .map(|c| Point2f::new(c[0], c[1]))
                    .collect();
                let mut rvec = Mat::default();
                let mut tvec = Mat::default();
                calib3d::solve_pnp(
                    &object,
                    &image,
                    &camera,
                    &dist,
                    &mut rvec,
                    &mut tvec,
                    false,
                    calib3d::SOLVEPNP_IPPE_SQUARE,
                )?;
                let mut pose = MarkerPose {
                    id: detection.id,
                    rvec: [0.0; 3],
                    tvec: [0.0; 3],
                };
                for i in 0..3 {
                    pose.rvec[i] = *rvec.at::<f64>(i as i32)?;
                    pose.tvec[i] = *tvec.at::<f64>(i as i32)?;
                }
                poses.push(pose);
            }
            Ok(poses)
        };
        run().map_err(|e| VisionError::Pose(e.to_string()))
    }
}

/// Renders marker `id` as a `side`-pixel square with a one-bit border.
pub fn render_marker(
    dictionary: MarkerDictionary,
    id: i32,
    side: u32,
) -> Result<GrayImage, VisionError> {
    let run = || -> opencv::Result<Vec<u8>> {
        let dict = objdetect::get_predefined_dictionary(predefined(dictionary))?;
        let mut img = Mat::default();
        objdetect::generate_image_marker(&dict, id, side as i32, &mut img, 1)?;
        Ok(img.data_bytes()?.to_vec())
    };
    let pixels = run().map_err(|e| VisionError::Detection(e.to_string()))?;
    GrayImage::from_raw(side, side, pixels)
        .ok_or_else(|| VisionError::Detection("marker image has unexpected size".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const ID: i32 = 23;
    const SIDE: u32 = 120;
    const ORIGIN: (u32, u32) = (100, 60);

    /// White 320x240 frame with 8x4 padding and marker 23 pasted at ORIGIN.
    fn scene() -> ConvertedFrame {
        let marker = render_marker(MarkerDictionary::Dict6x6_250, ID, SIDE).unwrap();
        let mut frame = ConvertedFrame::new(320, 240, 8, 4);
        frame.data_mut().fill(255);
        for (x, y, p) in marker.enumerate_pixels() {
            frame.put_pixel(ORIGIN.0 + x, ORIGIN.1 + y, [p[0]; 3]);
        }
        frame
    }

    fn assert_near(actual: [f32; 2], expected: (u32, u32)) {
        let dx = actual[0] - expected.0 as f32;
        let dy = actual[1] - expected.1 as f32;
        assert!(
            dx.abs() <= 2.0 && dy.abs() <= 2.0,
            "corner {actual:?} not near {expected:?}"
        );
    }

    #[test]
    fn rendered_marker_has_black_border() {
        let marker = render_marker(MarkerDictionary::Dict6x6_250, ID, SIDE).unwrap();
        assert_eq!(marker.dimensions(), (SIDE, SIDE));
        assert_eq!(marker.get_pixel(0, 0)[0], 0);
        assert_eq!(marker.get_pixel(SIDE - 1, SIDE / 2)[0], 0);
    }

    #[test]
    fn detects_pasted_marker_in_padded_frame() {
        let detector = OpenCvDetector::new(MarkerDictionary::Dict6x6_250).unwrap();
        let detections = detector.detect(&scene()).unwrap();

        assert_eq!(detections.len(), 1);
        let marker = &detections[0];
        assert_eq!(marker.id, ID);
        let (x0, y0) = ORIGIN;
        let (x1, y1) = (x0 + SIDE, y0 + SIDE);
        assert_near(marker.corners[0], (x0, y0));
        assert_near(marker.corners[1], (x1, y0));
        assert_near(marker.corners[2], (x1, y1));
        assert_near(marker.corners[3], (x0, y1));
    }

    #[test]
    fn annotate_draws_outline() {
        let detector = OpenCvDetector::new(MarkerDictionary::Dict6x6_250).unwrap();
        let frame = scene();
        let detections = detector.detect(&frame).unwrap();

        let mut annotated = frame.clone();
        detector.annotate(&mut annotated, &detections).unwrap();

        assert_eq!(annotated.buffer_dims(), frame.buffer_dims());
        assert_ne!(annotated.data(), frame.data());
        // Top edge midpoint
        let x = ORIGIN.0 + SIDE / 2;
        let outlined = (ORIGIN.1 - 4..=ORIGIN.1 + 4)
            .any(|y| annotated.pixel(x, y) == Some([0, 255, 0]));
        assert!(outlined, "no outline pixel near the top edge");
    }

    #[test]
    fn pose_of_fronto_parallel_marker_is_in_front_of_camera() {
        let detector = OpenCvDetector::new(MarkerDictionary::Dict6x6_250).unwrap();
        let detections = detector.detect(&scene()).unwrap();
        let calibration = Calibration {
            camera_matrix: [400.0, 0.0, 164.0, 0.0, 400.0, 122.0, 0.0, 0.0, 1.0],
            dist_coeffs: vec![],
        };

        let poses = OpenCvPoseEstimator
            .estimate(&detections, 0.05, &calibration)
            .unwrap();

        assert_eq!(poses.len(), 1);
        assert_eq!(poses[0].id, ID);
        // 0.05 m imaged over 120 px at f = 400 px
        let z = poses[0].tvec[2];
        assert!(z > 0.1 && z < 0.3, "unexpected depth {z}");
    }

    #[test]
    fn invalid_calibration_is_rejected() {
        let calibration = Calibration {
            camera_matrix: [0.0; 9],
            dist_coeffs: vec![],
        };
        let err = OpenCvPoseEstimator
            .estimate(&[], 0.05, &calibration)
            .unwrap_err();
        assert!(matches!(err, VisionError::Calibration(_)));
    }
}
