use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use contrast_remediation::config::{BackendPreference, EnhanceConfig};
use contrast_remediation::error::classify;
use contrast_remediation::{Dispatcher, HasRecoverySuggestion, RgbaFrame, WcagLevel};
use log::{error, info, warn};

/// Rewrite low-contrast text in a screenshot so it meets a WCAG contrast level.
#[derive(Parser, Debug)]
#[command(name = "remediate")]
#[command(about = "Raise text contrast in a PNG to a WCAG target")]
#[command(long_about = "Locate glyph edges with a signed distance transform, sample the background
just outside each glyph and adjust text colours until the WCAG contrast ratio
meets the requested level.")]
struct Args {
    /// Input image (PNG)
    input: PathBuf,

    /// Output PNG path
    #[arg(default_value = "remediated.png")]
    output: PathBuf,

    /// WCAG level
    #[arg(short, long, help = "Target level: aa, aa-large, aaa, aaa-large")]
    level: Option<String>,

    /// Explicit contrast ratio; overrides --level
    #[arg(short, long, help = "Target contrast ratio in [1, 21]")]
    target: Option<f64>,

    #[arg(long, help = "Glyph band width in pixels")]
    max_distance: Option<f32>,

    #[arg(long, help = "How far outside the glyph to read the background, in pixels")]
    sample_distance: Option<f32>,

    #[arg(short, long, help = "Highest backend tier: auto, gpu, parallel, scalar, disabled")]
    backend: Option<String>,

    #[arg(long, help = "Worker threads for the parallel tier")]
    threads: Option<usize>,

    #[arg(long, help = "Completion timeout in milliseconds")]
    timeout_ms: Option<u64>,

    /// JSON configuration file; flags override its values
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Write the outer distance field as JSON
    #[arg(long)]
    dump_field: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = build_config(&args)?;
    let dispatcher = Dispatcher::new(config)?;
    for missing in dispatcher.capability_errors() {
        info!("{}", missing);
    }

    let image = image::open(&args.input)
        .with_context(|| format!("failed to open {}", args.input.display()))?
        .to_rgba8();
    let frame = RgbaFrame::from_image(image)?;

    if let Some(path) = &args.dump_field {
        dump_field(&dispatcher, &frame, path)?;
    }

    let enhanced = match dispatcher.try_enhance(&frame).await {
        Ok(report) => {
            println!(
                "{}x{}: {} glyph pixels in {} regions, {} adjusted, {} below target ({} backend, {:.1?})",
                frame.width,
                frame.height,
                report.glyph_pixels,
                report.regions,
                report.adjusted_pixels,
                report.unresolved_pixels,
                report.backend,
                report.elapsed
            );
            report.frame
        }
        Err(e) if classify::is_transient(&e) => {
            warn!("writing input unchanged: {}", e);
            frame
        }
        Err(e) => {
            if let Some(hint) = e.recovery_suggestion() {
                error!("{}", hint);
            }
            return Err(e.into());
        }
    };

    enhanced
        .to_image()?
        .save(&args.output)
        .with_context(|| format!("failed to write {}", args.output.display()))?;
    println!("Wrote {}", args.output.display());
    Ok(())
}

/// Merge the optional config file with command-line overrides.
fn build_config(args: &Args) -> Result<EnhanceConfig> {
    let mut config = match &args.config {
        Some(path) => EnhanceConfig::from_json_file(path)?,
        None => EnhanceConfig::default(),
    };

    if let Some(level) = &args.level {
        config = config.with_level(parse_level(level)?);
    }
    if let Some(target) = args.target {
        config.target_contrast = target;
    }
    if let Some(d) = args.max_distance {
        config.max_distance = d;
    }
    if let Some(d) = args.sample_distance {
        config.sample_distance = d;
    }
    if let Some(backend) = &args.backend {
        config.backend = parse_backend(backend)?;
    }
    if let Some(threads) = args.threads {
        config.worker_threads = Some(threads);
    }
    if let Some(ms) = args.timeout_ms {
        config.completion_timeout_ms = ms;
    }

    config.validate().map_err(anyhow::Error::msg)?;
    Ok(config)
}

fn parse_level(level: &str) -> Result<WcagLevel> {
    level
        .parse::<WcagLevel>()
        .map_err(|e| anyhow::anyhow!("{}. Use: aa, aa-large, aaa, aaa-large", e))
}

fn parse_backend(backend: &str) -> Result<BackendPreference> {
    Ok(backend.parse::<BackendPreference>()?)
}

fn dump_field(dispatcher: &Dispatcher, frame: &RgbaFrame, path: &Path) -> Result<()> {
    let offsets = dispatcher.distance_field(frame)?;
    let doc = serde_json::json!({
        "width": frame.width,
        "height": frame.height,
        "offsets": offsets,
    });
    let file = std::fs::File::create(path)
        .with_context(|| format!("failed to create {}", path.display()))?;
    serde_json::to_writer(std::io::BufWriter::new(file), &doc)?;
    info!("distance field written to {}", path.display());
    Ok(())
}
