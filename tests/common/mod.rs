#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::VecDeque;
use std::io;
use std::path::Path;
use std::rc::Rc;

use markcap::capture::{
    BgrConverter, Camera, CameraError, CameraList, CameraSystem, ConvertError, ConvertedFrame,
    DeviceInfo, FrameMetadata, FrameStatus, PixelConverter, PixelFormat, RawFrame,
};
use markcap::pipeline::{AcquisitionSettings, ContinueGate, FramePipeline};
use markcap::vision::{
    Calibration, MarkerDetection, MarkerDetector, MarkerPose, PoseEstimator, VisionError,
};

/// What the camera hands out on the next `next_frame` call.
#[derive(Debug, Clone)]
pub enum Step {
    Frame { x_padding: u32, y_padding: u32 },
    Short,
    Incomplete(&'static str),
    DriverError,
}

pub const WIDTH: u32 = 32;
pub const HEIGHT: u32 = 24;

#[derive(Debug, Default)]
pub struct CameraLog {
    pub next_frame_calls: u32,
    pub acquired: Vec<u64>,
    pub released: Vec<u64>,
    pub events: Vec<String>,
}

pub type Shared<T> = Rc<RefCell<T>>;

pub struct ScriptedCamera {
    pub name: String,
    pub script: VecDeque<Step>,
    pub fail_init: bool,
    pub no_streaming: bool,
    pub log: Shared<CameraLog>,
    pub drops: Option<Shared<Vec<String>>>,
    sequence: u64,
}

impl ScriptedCamera {
    pub fn new(name: &str, script: Vec<Step>) -> Self {
        Self {
            name: name.to_string(),
            script: script.into(),
            fail_init: false,
            no_streaming: false,
            log: Rc::default(),
            drops: None,
            sequence: 0,
        }
    }

    fn frame(&self, x_padding: u32, y_padding: u32) -> RawFrame {
        let mut meta = FrameMetadata::packed(self.sequence, WIDTH, HEIGHT, PixelFormat::Mono8);
        meta.x_padding = x_padding;
        meta.y_padding = y_padding;
        meta.stride = WIDTH + x_padding;
        let len = (meta.stride * meta.buffer_height()) as usize;
        let data: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
        RawFrame::new(data, meta, FrameStatus::Complete)
    }
}

impl Drop for ScriptedCamera {
    fn drop(&mut self) {
        if let Some(drops) = &self.drops {
            drops.borrow_mut().push(format!("drop {}", self.name));
        }
    }
}

impl Camera for ScriptedCamera {
    fn label(&self) -> String {
        self.name.clone()
    }

    fn device_info(&self) -> Result<DeviceInfo, CameraError> {
        let mut info = DeviceInfo::default();
        info.push("DeviceModelName", self.name.clone());
        Ok(info)
    }

    fn init(&mut self) -> Result<(), CameraError> {
        self.log.borrow_mut().events.push("init".into());
        if self.fail_init {
            return Err(CameraError::Init("device is busy".into()));
        }
        Ok(())
    }

    fn set_continuous_acquisition(&mut self) -> Result<(), CameraError> {
        if self.no_streaming {
            return Err(CameraError::AcquisitionMode("not writable".into()));
        }
        self.log.borrow_mut().events.push("continuous".into());
        Ok(())
    }

    fn begin_acquisition(&mut self) -> Result<(), CameraError> {
        self.log.borrow_mut().events.push("begin".into());
        Ok(())
    }

    fn next_frame(&mut self) -> Result<RawFrame, CameraError> {
        self.log.borrow_mut().next_frame_calls += 1;
        self.sequence += 1;
        let step = self.script.pop_front().unwrap_or(Step::Frame {
            x_padding: 0,
            y_padding: 0,
        });
        let frame = match step {
            Step::Frame {
                x_padding,
                y_padding,
            } => self.frame(x_padding, y_padding),
            Step::Short => {
                let mut frame = self.frame(0, 0);
                frame.data = frame.data.slice(..10);
                frame
            }
            Step::Incomplete(reason) => {
                let mut frame = self.frame(0, 0);
                frame.status = FrameStatus::Incomplete(reason.into());
                frame
            }
            Step::DriverError => {
                return Err(CameraError::Stream(io::Error::other("transfer aborted")));
            }
        };
        self.log.borrow_mut().acquired.push(frame.meta.sequence);
        Ok(frame)
    }

    fn release_frame(&mut self, frame: RawFrame) {
        self.log.borrow_mut().released.push(frame.meta.sequence);
    }

    fn end_acquisition(&mut self) -> Result<(), CameraError> {
        self.log.borrow_mut().events.push("end".into());
        Ok(())
    }

    fn deinit(&mut self) -> Result<(), CameraError> {
        self.log.borrow_mut().events.push("deinit".into());
        Ok(())
    }
}

pub struct ScriptedSystem {
    pub cameras: Vec<ScriptedCamera>,
    pub events: Shared<Vec<String>>,
}

impl ScriptedSystem {
    pub fn new(cameras: Vec<ScriptedCamera>) -> Self {
        let events: Shared<Vec<String>> = Rc::default();
        let cameras = cameras
            .into_iter()
            .map(|mut c| {
                c.drops = Some(events.clone());
                c
            })
            .collect();
        Self { cameras, events }
    }
}

impl CameraSystem for ScriptedSystem {
    type Camera = ScriptedCamera;

    fn cameras(&mut self) -> Result<CameraList<'_, ScriptedCamera>, CameraError> {
        self.events.borrow_mut().push("enumerate".into());
        Ok(CameraList::new(std::mem::take(&mut self.cameras)))
    }

    fn release(self) -> Result<(), CameraError> {
        self.events.borrow_mut().push("release system".into());
        Ok(())
    }
}

/// Wraps the real converter and records which frames reached it.
pub struct RecordingConverter {
    pub seen: Shared<Vec<u64>>,
}

impl PixelConverter for RecordingConverter {
    fn convert(&self, frame: &RawFrame) -> Result<ConvertedFrame, ConvertError> {
        self.seen.borrow_mut().push(frame.meta.sequence);
        BgrConverter::default().convert(frame)
    }
}

/// Reports the same markers for every frame.
pub struct FixedDetector(pub Vec<MarkerDetection>);

impl MarkerDetector for FixedDetector {
    fn detect(&self, _frame: &ConvertedFrame) -> Result<Vec<MarkerDetection>, VisionError> {
        Ok(self.0.clone())
    }
}

pub fn no_markers() -> Box<dyn MarkerDetector> {
    Box::new(FixedDetector(Vec::new()))
}

pub struct FailingDetector;

impl MarkerDetector for FailingDetector {
    fn detect(&self, _frame: &ConvertedFrame) -> Result<Vec<MarkerDetection>, VisionError> {
        Err(VisionError::Detection("dictionary not loaded".into()))
    }
}

pub struct RecordingPose {
    pub calls: Shared<u32>,
}

impl PoseEstimator for RecordingPose {
    fn estimate(
        &self,
        detections: &[MarkerDetection],
        _marker_length: f64,
        _calibration: &Calibration,
    ) -> Result<Vec<MarkerPose>, VisionError> {
        *self.calls.borrow_mut() += 1;
        Ok(detections
            .iter()
            .map(|d| MarkerPose {
                id: d.id,
                rvec: [0.0; 3],
                tvec: [0.0, 0.0, 0.5],
            })
            .collect())
    }
}

pub struct CountingGate {
    pub waits: Shared<Vec<u32>>,
}

impl ContinueGate for CountingGate {
    fn wait(&mut self, index: u32) -> io::Result<()> {
        self.waits.borrow_mut().push(index);
        Ok(())
    }
}

pub fn square_marker(id: i32) -> MarkerDetection {
    MarkerDetection {
        id,
        corners: [[4.0, 4.0], [20.0, 4.0], [20.0, 18.0], [4.0, 18.0]],
    }
}

pub fn settings(output_dir: &Path, iterations: u32) -> AcquisitionSettings {
    AcquisitionSettings {
        iterations,
        first_index: 1,
        output_dir: output_dir.to_path_buf(),
        marker_length: 0.05,
        calibration: None,
    }
}

/// Handles to everything a test pipeline records.
pub struct Harness {
    pub pipeline: FramePipeline,
    pub converted: Shared<Vec<u64>>,
    pub waits: Shared<Vec<u32>>,
    pub pose_calls: Shared<u32>,
}

pub fn harness(settings: AcquisitionSettings, detector: Box<dyn MarkerDetector>) -> Harness {
    let converted: Shared<Vec<u64>> = Rc::default();
    let waits: Shared<Vec<u32>> = Rc::default();
    let pose_calls: Shared<u32> = Rc::default();
    let pipeline = FramePipeline::new(
        settings,
        Box::new(RecordingConverter {
            seen: converted.clone(),
        }),
        detector,
        Box::new(RecordingPose {
            calls: pose_calls.clone(),
        }),
        Box::new(CountingGate {
            waits: waits.clone(),
        }),
    );
    Harness {
        pipeline,
        converted,
        waits,
        pose_calls,
    }
}
