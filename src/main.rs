//! markcap: capture frames from industrial cameras and annotate ArUco markers

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use color_eyre::Result;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use markcap::capture::{BgrConverter, V4l2System};
use markcap::pipeline::{
    self, AcquisitionSettings, AutoContinue, ContinueGate, ErrorKind, FramePipeline, ResultCode,
    StdinGate,
};
use markcap::{vision, Config};

#[derive(Parser)]
#[command(name = "markcap")]
#[command(about = "Capture camera frames, detect fiducial markers and save annotated images")]
#[command(version)]
struct Cli {
    /// TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Capture and annotate frames from every camera (default).
    Run(RunArgs),

    /// List capture devices and their information.
    Devices,

    /// Write a marker image from the configured dictionary.
    #[cfg(feature = "opencv")]
    Marker {
        /// Marker id within the dictionary.
        #[arg(long, default_value_t = 23)]
        id: i32,

        /// Side length in pixels.
        #[arg(long, default_value_t = 200)]
        size: u32,

        /// Output PNG path.
        #[arg(long, default_value = "marker.png")]
        out: PathBuf,
    },
}

#[derive(Debug, Clone, Default, Args)]
struct RunArgs {
    /// Frames to capture per camera.
    #[arg(long)]
    iterations: Option<u32>,

    /// Directory the annotated images are written to.
    #[arg(long)]
    output: Option<PathBuf>,

    /// Only use this device node.
    #[arg(long)]
    device: Option<String>,

    /// Do not wait for Enter between frames.
    #[arg(long)]
    no_pause: bool,
}

impl RunArgs {
    fn apply(self, config: &mut Config) {
        if let Some(iterations) = self.iterations {
            config.acquisition.iterations = iterations;
        }
        if let Some(output) = self.output {
            config.output.directory = output;
        }
        if let Some(device) = self.device {
            config.capture.device = Some(device);
        }
        if self.no_pause {
            config.acquisition.pause = false;
        }
    }
}

fn main() -> Result<ExitCode> {
    // Initialize error handling and logging
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("markcap=info")),
        )
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();

    let cli = Cli::parse();
    let mut config = Config::load(cli.config.as_deref())?;

    match cli.command.unwrap_or(Commands::Run(RunArgs::default())) {
        Commands::Run(args) => {
            args.apply(&mut config);
            run(config)
        }
        Commands::Devices => {
            let system = V4l2System::open(config.capture)?;
            pipeline::list_devices(system)?;
            Ok(ExitCode::SUCCESS)
        }
        #[cfg(feature = "opencv")]
        Commands::Marker { id, size, out } => {
            let image = vision::opencv::render_marker(config.detection.dictionary, id, size)?;
            image.save(&out)?;
            info!("Marker {} written to {}", id, out.display());
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn run(config: Config) -> Result<ExitCode> {
    info!("markcap launching...");

    let (detector, pose) = match vision::default_backend(config.detection.dictionary) {
        Ok(backend) => backend,
        Err(e) => {
            error!("Marker detection unavailable: {}", e);
            println!("Error: {e}");
            return Ok(ExitCode::from(
                ResultCode::from(ErrorKind::DetectionFailed).bits(),
            ));
        }
    };
    let gate: Box<dyn ContinueGate> = if config.acquisition.pause {
        Box::new(StdinGate)
    } else {
        Box::new(AutoContinue)
    };
    let mut frames = FramePipeline::new(
        AcquisitionSettings::from_config(&config),
        Box::new(BgrConverter::new(config.acquisition.color_processing)),
        detector,
        pose,
        gate,
    );

    let output_dir = config.output.directory.clone();
    let capture = config.capture;
    let code = pipeline::run(&output_dir, || V4l2System::open(capture), &mut frames);

    info!("markcap finished with {}", code);
    Ok(ExitCode::from(code.bits()))
}
