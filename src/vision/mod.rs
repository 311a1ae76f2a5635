//! Fiducial marker detection and pose estimation seams

pub mod annotate;
#[cfg(feature = "opencv")]
pub mod opencv;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::capture::ConvertedFrame;

#[derive(Debug, Error)]
pub enum VisionError {
    #[error("marker detection failed: {0}")]
    Detection(String),

    #[error("pose estimation failed: {0}")]
    Pose(String),

    #[error("calibration is invalid: {0}")]
    Calibration(String),
}

/// Predefined ArUco dictionaries
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum MarkerDictionary {
    Dict4x4_50,
    Dict4x4_250,
    Dict5x5_250,
    #[default]
    Dict6x6_250,
    Dict6x6_1000,
    Dict7x7_1000,
    ArucoOriginal,
}

/// One marker found in one frame. Detections carry no identity across frames.
#[derive(Debug, Clone, PartialEq)]
pub struct MarkerDetection {
    pub id: i32,
    /// Pixel-space corners, clockwise from the marker's top-left
    pub corners: [[f32; 2]; 4],
}

/// Rotation (Rodrigues vector) and translation of one marker, camera frame
#[derive(Debug, Clone, PartialEq)]
pub struct MarkerPose {
    pub id: i32,
    pub rvec: [f64; 3],
    pub tvec: [f64; 3],
}

/// Pinhole intrinsics and distortion coefficients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    /// Row-major 3x3 camera matrix
    pub camera_matrix: [f64; 9],
    #[serde(default)]
    pub dist_coeffs: Vec<f64>,
}

impl Calibration {
    pub fn validate(&self) -> Result<(), VisionError> {
        let m = &self.camera_matrix;
        if m[0] <= 0.0 || m[4] <= 0.0 {
            return Err(VisionError::Calibration(
                "focal lengths must be positive".into(),
            ));
        }
        if !matches!(self.dist_coeffs.len(), 0 | 4 | 5 | 8 | 12 | 14) {
            return Err(VisionError::Calibration(format!(
                "unexpected number of distortion coefficients: {}",
                self.dist_coeffs.len()
            )));
        }
        Ok(())
    }
}

/// Locates markers of a fixed dictionary in a converted frame.
pub trait MarkerDetector {
    fn detect(&self, frame: &ConvertedFrame) -> Result<Vec<MarkerDetection>, VisionError>;

    /// Draws every detection onto `frame`.
    fn annotate(
        &self,
        frame: &mut ConvertedFrame,
        detections: &[MarkerDetection],
    ) -> Result<(), VisionError> {
        annotate::draw_detected_markers(frame, detections);
        Ok(())
    }
}

/// Estimates per-marker poses from detected corners.
pub trait PoseEstimator {
    fn estimate(
        &self,
        detections: &[MarkerDetection],
        marker_length: f64,
        calibration: &Calibration,
    ) -> Result<Vec<MarkerPose>, VisionError>;
}

/// Detector and pose estimator of the compiled-in backend.
///
/// Fails when the crate is built without a marker backend, so a run can
/// never report success without having looked for markers.
pub fn default_backend(
    dictionary: MarkerDictionary,
) -> Result<(Box<dyn MarkerDetector>, Box<dyn PoseEstimator>), VisionError> {
    #[cfg(feature = "opencv")]
    {
        Ok((
            Box::new(opencv::OpenCvDetector::new(dictionary)?),
            Box::new(opencv::OpenCvPoseEstimator),
        ))
    }
    #[cfg(not(feature = "opencv"))]
    {
        Err(VisionError::Detection(format!(
            "no marker backend for {dictionary:?}, rebuild with the `opencv` feature"
        )))
    }
}
