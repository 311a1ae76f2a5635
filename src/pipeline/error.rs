use std::fmt;
use std::io;
use std::ops::{BitOr, BitOrAssign};

use thiserror::Error;

use crate::capture::{CameraError, ConvertError};
use crate::vision::VisionError;

/// Closed set of failure kinds the pipeline reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    SetupFailed,
    FrameIncomplete,
    ConversionFailed,
    DetectionFailed,
    IoFailed,
}

impl ErrorKind {
    pub const ALL: [ErrorKind; 5] = [
        ErrorKind::SetupFailed,
        ErrorKind::FrameIncomplete,
        ErrorKind::ConversionFailed,
        ErrorKind::DetectionFailed,
        ErrorKind::IoFailed,
    ];

    pub const fn bit(self) -> u8 {
        match self {
            ErrorKind::SetupFailed => 1 << 0,
            ErrorKind::FrameIncomplete => 1 << 1,
            ErrorKind::ConversionFailed => 1 << 2,
            ErrorKind::DetectionFailed => 1 << 3,
            ErrorKind::IoFailed => 1 << 4,
        }
    }
}

/// Bitwise-OR accumulation of error kinds; zero means success.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResultCode(u8);

impl ResultCode {
    pub const SUCCESS: ResultCode = ResultCode(0);

    pub const fn from_bits(bits: u8) -> Self {
        ResultCode(bits)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn is_success(self) -> bool {
        self.0 == 0
    }

    pub const fn contains(self, kind: ErrorKind) -> bool {
        self.0 & kind.bit() != 0
    }
}

impl From<ErrorKind> for ResultCode {
    fn from(kind: ErrorKind) -> Self {
        ResultCode(kind.bit())
    }
}

impl BitOr for ResultCode {
    type Output = ResultCode;

    fn bitor(self, rhs: ResultCode) -> ResultCode {
        ResultCode(self.0 | rhs.0)
    }
}

impl BitOr<ErrorKind> for ResultCode {
    type Output = ResultCode;

    fn bitor(self, rhs: ErrorKind) -> ResultCode {
        self | ResultCode::from(rhs)
    }
}

impl BitOrAssign for ResultCode {
    fn bitor_assign(&mut self, rhs: ResultCode) {
        self.0 |= rhs.0;
    }
}

impl BitOrAssign<ErrorKind> for ResultCode {
    fn bitor_assign(&mut self, rhs: ErrorKind) {
        self.0 |= rhs.bit();
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_success() {
            return write!(f, "success");
        }
        let kinds: Vec<String> = ErrorKind::ALL
            .iter()
            .filter(|k| self.contains(**k))
            .map(|k| format!("{k:?}"))
            .collect();
        write!(f, "{:#04x} ({})", self.0, kinds.join(" | "))
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Camera(#[from] CameraError),

    #[error(transparent)]
    Conversion(#[from] ConvertError),

    #[error(transparent)]
    Vision(#[from] VisionError),

    #[error("failed to write image: {0}")]
    Persist(#[from] image::ImageError),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::Camera(e) => e.kind(),
            PipelineError::Conversion(_) => ErrorKind::ConversionFailed,
            PipelineError::Vision(_) => ErrorKind::DetectionFailed,
            PipelineError::Persist(_) | PipelineError::Io(_) => ErrorKind::IoFailed,
        }
    }
}
