pub mod acquisition;
pub mod error;
pub mod gate;
pub mod session;

pub use acquisition::{AcquisitionSettings, FramePipeline};
pub use error::{ErrorKind, PipelineError, ResultCode};
pub use gate::{AutoContinue, ChannelGate, ContinueGate, StdinGate};
pub use session::{list_devices, run, run_cameras};
