//! Export a scene to video.

use std::io::Write;

use framecast_common::config::ExportDefaults;
use framecast_render_engine::{CancelToken, ExportProgress, ExportSupervisor, JobStatus};
use framecast_scene_model::{ExportConfig, Scene};

use crate::ExportArgs;

/// Apply command-line overrides on top of the configured defaults.
pub fn build_config(args: &ExportArgs, defaults: &ExportDefaults) -> ExportConfig {
    let mut config = ExportConfig::from_defaults(defaults, args.output.clone());
    if let Some(width) = args.width {
        config.width = width;
    }
    if let Some(height) = args.height {
        config.height = height;
    }
    if let Some(fps) = args.fps {
        config.fps = fps;
    }
    if let Some(length) = args.length {
        config.length_secs = length;
    }
    if let Some(quality) = args.quality {
        config.quality = quality;
    }
    if let Some(encoder) = &args.encoder {
        config.encoder_path = encoder.clone();
    }
    if let Some(threads) = args.threads {
        config.threads = threads;
        config.lookahead = Some(threads.saturating_mul(defaults.lookahead_factor.max(1)));
    }
    if args.lookahead.is_some() {
        config.lookahead = args.lookahead;
    }
    config
}

pub async fn run(args: ExportArgs, defaults: &ExportDefaults) -> anyhow::Result<()> {
    println!("Exporting scene: {}", args.scene.display());

    let scene =
        Scene::load(&args.scene).map_err(|e| anyhow::anyhow!("Failed to load scene: {e}"))?;
    let config = build_config(&args, defaults);
    let total_frames = config.validate()?;

    println!("  Scene: {}", scene.name());
    println!("  Output: {}", config.output_path.display());
    println!(
        "  Resolution: {}x{} @ {}fps, {:.2}s ({total_frames} frames)",
        config.width, config.height, config.fps, config.length_secs
    );
    println!(
        "  Workers: {} (look-ahead {} frames), quality {}",
        config.threads,
        config.lookahead_window(),
        config.quality
    );

    let cancel = CancelToken::new();
    let supervisor = ExportSupervisor::new(config, scene)
        .with_cancel_token(cancel.clone())
        .on_progress(|p: ExportProgress| {
            print!(
                "\r  Progress: {:.1}% ({}/{} frames, ETA: {:.0}s)  ",
                p.progress * 100.0,
                p.frames_completed,
                p.total_frames,
                p.eta_secs,
            );
            let _ = std::io::stdout().flush();
        });

    let mut job = tokio::task::spawn_blocking(move || supervisor.run());
    let report = tokio::select! {
        result = &mut job => result??,
        _ = tokio::signal::ctrl_c() => {
            println!("\n  Cancelling...");
            tracing::info!("Cancellation requested from terminal");
            cancel.cancel();
            job.await??
        }
    };

    println!();
    if let Some(path) = &args.report {
        report.write_json(path)?;
        println!("  Report: {}", path.display());
    }

    match &report.status {
        JobStatus::Succeeded => {
            println!(
                "Export complete: {} ({} frames in {:.1}s)",
                report.output_path.display(),
                report.frames_completed,
                report.elapsed_secs
            );
            Ok(())
        }
        JobStatus::Cancelled => Err(anyhow::anyhow!(
            "Export cancelled after {}/{} frames",
            report.frames_completed,
            report.total_frames
        )),
        JobStatus::Failed { reason } => Err(anyhow::anyhow!("Export failed: {reason}")),
        JobStatus::Idle | JobStatus::Running => Err(anyhow::anyhow!(
            "Export ended in unexpected state: {}",
            report.status.label()
        )),
    }
}
