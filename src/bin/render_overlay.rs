//! Render a bilingual overlay onto an image without running analysis or translation
//! Run with: cargo run --release --bin render_overlay -- <image> <segments.json> [out.png]
//!
//! `segments.json` is a list of bilingual segments as serialized by the library.

use anyhow::{bail, Context, Result};
use screen_translate::{
    services::rendering::OverlayRenderer,
    utils::{load_rgba_async, save_png_async},
    BilingualSegment, Config,
};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::new().context("Failed to load configuration")?;

    let filter = EnvFilter::new(format!(
        "screen_translate={}",
        match config.log_level() {
            tracing::Level::TRACE => "trace",
            tracing::Level::DEBUG => "debug",
            tracing::Level::INFO => "info",
            tracing::Level::WARN => "warn",
            tracing::Level::ERROR => "error",
        }
    ));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 3 {
        bail!("usage: {} <image> <segments.json> [out.png]", args[0]);
    }
    let image_path = PathBuf::from(&args[1]);
    let segments_path = PathBuf::from(&args[2]);
    let output_path = args
        .get(3)
        .map(PathBuf::from)
        .unwrap_or_else(|| default_output(&image_path));

    info!("Loading image: {}", image_path.display());
    let image = load_rgba_async(&image_path).await?;
    info!("Image dimensions: {}x{}", image.width(), image.height());

    let raw = tokio::fs::read_to_string(&segments_path)
        .await
        .with_context(|| format!("Failed to read {}", segments_path.display()))?;
    let segments: Vec<BilingualSegment> =
        serde_json::from_str(&raw).context("Failed to parse segments")?;
    info!("Loaded {} segments", segments.len());

    let renderer = OverlayRenderer::new(config.rendering.clone());
    let started = Instant::now();
    let output = renderer.render(&image, &segments).await?;
    info!(
        "Rendered {} boxes in {:.0}ms",
        output.boxes.len(),
        started.elapsed().as_secs_f64() * 1000.0
    );

    save_png_async(output.image, &output_path).await?;

    println!("\n=== Overlay ===");
    println!("Output: {}", output_path.display());
    for (i, (segment, rect)) in segments.iter().zip(&output.boxes).enumerate() {
        println!(
            "  {}. [{:.0},{:.0} {:.0}x{:.0}] {} -> {}",
            i + 1,
            rect.x,
            rect.y,
            rect.width,
            rect.height,
            segment.original.text,
            segment.translated_text
        );
    }

    Ok(())
}

fn default_output(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("capture");
    input.with_file_name(format!("{}_overlay.png", stem))
}
