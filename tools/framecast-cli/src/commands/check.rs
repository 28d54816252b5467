//! Check encoder availability and machine capabilities.

use std::path::PathBuf;

use framecast_common::config::{config_file_path, hardware_concurrency, ExportDefaults};
use framecast_render_engine::encoder_version;
use framecast_scene_model::ExportConfig;

pub fn run(encoder: Option<PathBuf>, defaults: &ExportDefaults) -> anyhow::Result<()> {
    println!("Framecast System Check");
    println!("{}", "=".repeat(50));

    let encoder = encoder.unwrap_or_else(|| defaults.encoder_path.clone());
    let encoder_ok = match encoder_version(&encoder) {
        Ok(version) => {
            println!("[OK] Encoder: {}", encoder.display());
            println!("     {version}");
            true
        }
        Err(err) => {
            println!("[FAIL] Encoder: {}", encoder.display());
            println!("     {err}");
            false
        }
    };

    println!(
        "[OK] Hardware threads: {} (worker limit {})",
        hardware_concurrency(),
        ExportConfig::thread_limit()
    );

    let config_path = config_file_path();
    if config_path.exists() {
        println!("[OK] Config: {}", config_path.display());
    } else {
        println!("[INFO] Config: {} (not found, using defaults)", config_path.display());
    }

    println!();
    if encoder_ok {
        println!("Encoder is available. Framecast is ready.");
        Ok(())
    } else {
        Err(anyhow::anyhow!(
            "encoder '{}' is not runnable; install ffmpeg or pass --encoder",
            encoder.display()
        ))
    }
}
