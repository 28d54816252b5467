//! Validate a Framecast scene file.

use std::path::PathBuf;

use framecast_scene_model::Scene;

pub fn run(path: PathBuf) -> anyhow::Result<()> {
    println!("Validating scene at: {}", path.display());

    let scene = Scene::load(&path).map_err(|e| anyhow::anyhow!("Failed to load scene: {e}"))?;
    let desc = scene.description();

    println!("  Name: {}", desc.name);
    println!("  Version: {}", desc.version);
    println!("  Palettes: {}", desc.palettes.len());
    println!("  Layers: {}", desc.layers.len());

    let issues = desc.validate();
    if issues.is_empty() {
        println!("\nScene is valid.");
        return Ok(());
    }

    println!("\nValidation issues:");
    for issue in &issues {
        println!("  - {issue}");
    }
    Err(anyhow::anyhow!("{} issue(s) found", issues.len()))
}
