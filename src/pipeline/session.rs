//! Device enumeration and per-camera orchestration

use std::path::Path;

use tracing::{error, info, warn};

use crate::capture::{Camera, CameraError, CameraList, CameraSystem};
use crate::pipeline::acquisition::FramePipeline;
use crate::pipeline::error::{ErrorKind, ResultCode};
use crate::utils;

/// Probes the output directory, opens the camera system and runs every
/// camera. Nothing is enumerated when the probe fails.
pub fn run<S, F>(output_dir: &Path, open_system: F, pipeline: &mut FramePipeline) -> ResultCode
where
    S: CameraSystem,
    F: FnOnce() -> Result<S, CameraError>,
{
    let code = match utils::probe_write_access(output_dir) {
        Ok(()) => match open_system() {
            Ok(system) => run_cameras(system, pipeline),
            Err(e) => {
                error!("Could not open camera system: {}", e);
                println!("Error: {e}");
                ErrorKind::SetupFailed.into()
            }
        },
        Err(e) => {
            error!("Write probe in {} failed: {}", output_dir.display(), e);
            println!(
                "Failed to create file in {}.  Please check permissions.",
                output_dir.display()
            );
            ErrorKind::IoFailed.into()
        }
    };

    println!("\nDone!");
    if let Err(e) = pipeline.gate_mut().wait_exit() {
        warn!("Exit confirmation unavailable: {}", e);
    }
    code
}

/// Runs all cameras of `system` and releases it after the device list is
/// cleared. Returns the OR of every camera's result code.
pub fn run_cameras<S: CameraSystem>(mut system: S, pipeline: &mut FramePipeline) -> ResultCode {
    let mut code = match system.cameras() {
        Ok(cameras) => run_listed(cameras, pipeline),
        Err(e) => {
            error!("Camera enumeration failed: {}", e);
            println!("Error: {e}");
            ErrorKind::SetupFailed.into()
        }
    };

    if let Err(e) = system.release() {
        error!("Camera system release failed: {}", e);
        code |= ErrorKind::SetupFailed;
    }
    code
}

fn run_listed<C: Camera>(
    mut cameras: CameraList<'_, C>,
    pipeline: &mut FramePipeline,
) -> ResultCode {
    println!("Number of cameras detected: {}\n", cameras.len());
    info!("Number of cameras detected: {}", cameras.len());

    if cameras.is_empty() {
        cameras.clear();
        println!("Not enough cameras!");
        return ErrorKind::SetupFailed.into();
    }

    let mut code = ResultCode::SUCCESS;
    for (i, camera) in cameras.iter_mut().enumerate() {
        println!("\nRunning example for camera {i}...");
        let camera_code = run_single_camera(camera, pipeline);
        if !camera_code.is_success() {
            warn!("Camera {} finished with {}", i, camera_code);
        }
        code |= camera_code;
        println!("Camera {i} example complete...\n");
    }

    cameras.clear();
    code
}

fn run_single_camera<C: Camera>(camera: &mut C, pipeline: &mut FramePipeline) -> ResultCode {
    let mut code = print_device_info(&*camera);
    code |= pipeline.run_camera(camera);
    code
}

/// Prints the transport-layer device information of `camera`.
pub fn print_device_info<C: Camera + ?Sized>(camera: &C) -> ResultCode {
    println!("\n*** DEVICE INFORMATION ***\n");
    match camera.device_info() {
        Ok(info) if info.features.is_empty() => {
            println!("Device control information not available.");
            ResultCode::SUCCESS
        }
        Ok(info) => {
            print!("{info}");
            ResultCode::SUCCESS
        }
        Err(e) => {
            error!("Device information of {} unreadable: {}", camera.label(), e);
            println!("Error: {e}");
            e.kind().into()
        }
    }
}

/// Enumerates cameras and prints their device information without
/// initializing any of them.
pub fn list_devices<S: CameraSystem>(mut system: S) -> Result<usize, CameraError> {
    let count = {
        let mut cameras = system.cameras()?;
        println!("Number of cameras detected: {}", cameras.len());
        for (i, camera) in cameras.iter_mut().enumerate() {
            println!("\nCamera {i}: {}", camera.label());
            print_device_info(&*camera);
        }
        let count = cameras.len();
        cameras.clear();
        count
    };
    system.release()?;
    Ok(count)
}
