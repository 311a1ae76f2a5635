//! Per-camera acquire → convert → detect → annotate → persist loop

use std::path::PathBuf;
use std::time::Instant;

use tracing::{debug, error, info, instrument, warn};

use crate::capture::{Camera, FrameStatus, PixelConverter, RawFrame};
use crate::pipeline::error::{ErrorKind, PipelineError, ResultCode};
use crate::pipeline::gate::ContinueGate;
use crate::vision::{Calibration, MarkerDetection, MarkerDetector, PoseEstimator};
use crate::{
    last_frame_index, Config, METRIC_FRAMES_ACQUIRED, METRIC_FRAMES_INCOMPLETE,
    METRIC_FRAMES_PERSISTED, METRIC_FRAME_PROCESSING_MS,
};

/// Loop parameters resolved from [`Config`]
#[derive(Debug, Clone)]
pub struct AcquisitionSettings {
    pub iterations: u32,
    pub first_index: u32,
    pub output_dir: PathBuf,
    /// Physical marker side in metres
    pub marker_length: f64,
    pub calibration: Option<Calibration>,
}

impl AcquisitionSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            iterations: config.acquisition.iterations,
            first_index: config.acquisition.first_index,
            output_dir: config.output.directory.clone(),
            marker_length: config.detection.marker_length_m,
            calibration: config.detection.calibration.clone(),
        }
    }
}

/// The collaborators one camera's frames flow through.
pub struct FramePipeline {
    settings: AcquisitionSettings,
    converter: Box<dyn PixelConverter>,
    detector: Box<dyn MarkerDetector>,
    pose: Box<dyn PoseEstimator>,
    gate: Box<dyn ContinueGate>,
}

impl FramePipeline {
    pub fn new(
        settings: AcquisitionSettings,
        converter: Box<dyn PixelConverter>,
        detector: Box<dyn MarkerDetector>,
        pose: Box<dyn PoseEstimator>,
        gate: Box<dyn ContinueGate>,
    ) -> Self {
        Self {
            settings,
            converter,
            detector,
            pose,
            gate,
        }
    }

    pub fn gate_mut(&mut self) -> &mut dyn ContinueGate {
        self.gate.as_mut()
    }

    /// Initializes the camera, runs the configured number of iterations and
    /// deinitializes it. Failures stay local to this camera.
    #[instrument(skip_all, fields(camera = %camera.label()))]
    pub fn run_camera(&mut self, camera: &mut dyn Camera) -> ResultCode {
        if last_frame_index(self.settings.first_index, self.settings.iterations).is_none() {
            error!(
                "Frame indices from {} over {} iterations overflow, camera not started",
                self.settings.first_index, self.settings.iterations
            );
            return ErrorKind::SetupFailed.into();
        }

        if let Err(e) = camera.init() {
            error!("Initialization failed: {}", e);
            println!("Error: {e}");
            return e.kind().into();
        }

        if self.settings.calibration.is_none() {
            warn!("No camera calibration configured, pose estimation is skipped");
        }

        let mut code = self.acquire(camera);

        if let Err(e) = camera.deinit() {
            error!("Deinitialization failed: {}", e);
            code |= ErrorKind::SetupFailed;
        }
        code
    }

    fn acquire(&mut self, camera: &mut dyn Camera) -> ResultCode {
        if let Err(e) = camera.set_continuous_acquisition() {
            println!("Unable to set acquisition mode to continuous ({e}). Aborting...");
            return e.kind().into();
        }
        println!("Acquisition mode set to continuous...");

        if let Err(e) = camera.begin_acquisition() {
            error!("Could not start acquisition: {}", e);
            println!("Error: {e}");
            return ErrorKind::SetupFailed.into();
        }
        info!("Acquiring {} images", self.settings.iterations);

        let mut code = ResultCode::SUCCESS;
        for n in 0..self.settings.iterations {
            code |= self.iteration(camera, self.settings.first_index + n);
        }

        if let Err(e) = camera.end_acquisition() {
            error!("Could not stop acquisition: {}", e);
            code |= ErrorKind::SetupFailed;
        }
        code
    }

    fn iteration(&mut self, camera: &mut dyn Camera, index: u32) -> ResultCode {
        let frame = match camera.next_frame() {
            Ok(frame) => frame,
            Err(e) => {
                error!("Frame {} could not be acquired: {}", index, e);
                println!("Error: {e}");
                return e.kind().into();
            }
        };
        metrics::counter!(METRIC_FRAMES_ACQUIRED).increment(1);

        if let FrameStatus::Incomplete(reason) = &frame.status {
            println!("Image incomplete: {reason}...");
            warn!("Frame {} incomplete: {}", index, reason);
            metrics::counter!(METRIC_FRAMES_INCOMPLETE).increment(1);
            camera.release_frame(frame);
            return ResultCode::SUCCESS;
        }

        let started = Instant::now();
        let outcome = self.process(&frame, index);
        camera.release_frame(frame);
        metrics::histogram!(METRIC_FRAME_PROCESSING_MS)
            .record(started.elapsed().as_secs_f64() * 1e3);

        match outcome {
            Ok(path) => {
                metrics::counter!(METRIC_FRAMES_PERSISTED).increment(1);
                println!("Image saved at {}", path.display());
                if let Err(e) = self.gate.wait(index) {
                    warn!("Continue gate unavailable ({}), not pausing", e);
                }
                ResultCode::SUCCESS
            }
            Err(e) => {
                error!("Frame {} failed: {}", index, e);
                println!("Error: {e}");
                e.kind().into()
            }
        }
    }

    fn process(&self, frame: &RawFrame, index: u32) -> Result<PathBuf, PipelineError> {
        let converted = self.converter.convert(frame)?;
        let (w, h) = converted.buffer_dims();
        debug!("Frame {} converted to {}x{} BGR", index, w, h);

        let detections = self.detector.detect(&converted)?;
        println!("Frame {index}: {} markers detected", detections.len());

        let mut annotated = converted.clone();
        self.detector.annotate(&mut annotated, &detections)?;
        self.estimate_poses(&detections)?;

        let path = self.settings.output_dir.join(format!("{index}.png"));
        annotated.save_png(&path)?;
        Ok(path)
    }

    fn estimate_poses(&self, detections: &[MarkerDetection]) -> Result<(), PipelineError> {
        let Some(calibration) = &self.settings.calibration else {
            return Ok(());
        };
        if detections.is_empty() {
            return Ok(());
        }
        let poses = self
            .pose
            .estimate(detections, self.settings.marker_length, calibration)?;
        for pose in poses {
            info!(
                "Marker {}: rvec {:?} tvec {:?}",
                pose.id, pose.rvec, pose.tvec
            );
        }
        Ok(())
    }
}
