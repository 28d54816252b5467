//! Framecast CLI: render scenes and stream them to a video encoder.
//!
//! Usage:
//!   framecast export <SCENE> -o OUT     Export a scene to video
//!   framecast validate <SCENE>          Check a scene file for problems
//!   framecast info <SCENE>              Show scene information
//!   framecast frame <SCENE> -i N -o OUT Render a single frame to PPM
//!   framecast check                     Check the encoder and machine

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use framecast_common::config::AppConfig;

mod commands;

#[derive(Parser)]
#[command(
    name = "framecast",
    about = "Render procedural scenes to video in parallel",
    version,
    author
)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Export a scene to a video file
    Export(ExportArgs),

    /// Validate a scene file
    Validate {
        /// Path to the scene file
        scene: PathBuf,
    },

    /// Show scene information
    Info {
        /// Path to the scene file
        scene: PathBuf,
    },

    /// Render one frame to a binary PPM image
    Frame {
        /// Path to the scene file
        scene: PathBuf,

        /// Frame index
        #[arg(short, long, default_value = "0")]
        index: u64,

        /// Output image path
        #[arg(short, long, default_value = "frame.ppm")]
        output: PathBuf,

        /// Output width
        #[arg(long)]
        width: Option<u32>,

        /// Output height
        #[arg(long)]
        height: Option<u32>,

        /// Frame rate used to derive the frame time
        #[arg(long)]
        fps: Option<u32>,
    },

    /// Check encoder availability and machine capabilities
    Check {
        /// Encoder executable to probe
        #[arg(long)]
        encoder: Option<PathBuf>,
    },
}

/// Options for `framecast export`. Unset values come from the config file.
#[derive(Args)]
pub struct ExportArgs {
    /// Path to the scene file
    pub scene: PathBuf,

    /// Output video path (.mp4, .mov, .mkv, .webm)
    #[arg(short, long)]
    pub output: PathBuf,

    /// Output width
    #[arg(long)]
    pub width: Option<u32>,

    /// Output height
    #[arg(long)]
    pub height: Option<u32>,

    /// Frame rate
    #[arg(long)]
    pub fps: Option<u32>,

    /// Length in seconds
    #[arg(long)]
    pub length: Option<f64>,

    /// Render worker threads
    #[arg(short = 'j', long)]
    pub threads: Option<usize>,

    /// Quality (0-100)
    #[arg(short, long)]
    pub quality: Option<u8>,

    /// Encoder executable
    #[arg(long)]
    pub encoder: Option<PathBuf>,

    /// Maximum frames held for reordering (default: 3 x threads)
    #[arg(long)]
    pub lookahead: Option<usize>,

    /// Write a JSON job report to this path
    #[arg(long)]
    pub report: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let app_config = AppConfig::load();

    let mut logging = app_config.logging.clone();
    if cli.verbose {
        logging.level = "debug".to_string();
        logging.thread_names = true;
    }
    framecast_common::logging::init_logging(&logging);

    match cli.command {
        Commands::Export(args) => commands::export::run(args, &app_config.export).await,
        Commands::Validate { scene } => commands::validate::run(scene),
        Commands::Info { scene } => commands::info::run(scene, &app_config.export),
        Commands::Frame {
            scene,
            index,
            output,
            width,
            height,
            fps,
        } => commands::frame::run(scene, index, output, width, height, fps, &app_config.export),
        Commands::Check { encoder } => commands::check::run(encoder, &app_config.export),
    }
}
