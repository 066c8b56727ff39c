//! layerfit CLI: piecewise-surface reconstruction from a segmentation and a
//! disparity map.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};
use image::{DynamicImage, Rgb32FImage};
use layerfit::synth::{SynthConfig, SynthScene};
use layerfit::{
    DisparityIed, Field, FrontalSurfaceType, GrowReport, LayerGrow, LayerMerge, LayerScore,
    LayersBuilder, LayersReport, MergeReport, OutlierScore, PipelineConfig, PlaneSurfaceType,
    SphereSurfaceType, WarpScore, WarpScoreConfig,
};
use serde::Serialize;

type CliError = Box<dyn std::error::Error>;
type CliResult<T> = Result<T, CliError>;

#[derive(Parser)]
#[command(name = "layerfit")]
#[command(about = "Fit one robust depth surface per layer of an image segmentation")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fit surfaces to a segmentation and merge/grow the layers.
    Fit(CliFitArgs),

    /// Write a synthetic scene (labels, disparity, stereo pair).
    Synth(CliSynthArgs),
}

#[derive(Debug, Clone, Args)]
struct CliFitArgs {
    /// Segment label image; every distinct colour is one segment.
    #[arg(long)]
    segs: PathBuf,

    /// 16-bit disparity image; 0 marks invalid pixels.
    #[arg(long)]
    disparity: PathBuf,

    /// Stored disparity value per pixel of disparity.
    #[arg(long, default_value = "256.0")]
    disp_scale: f32,

    /// Depth → disparity multiplier.
    #[arg(long, default_value = "1.0")]
    mult: f32,

    /// Pipeline configuration (JSON). Defaults apply to missing fields.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Also offer fronto-parallel surfaces.
    #[arg(long)]
    frontal: bool,

    /// Also offer sphere-cap surfaces.
    #[arg(long)]
    sphere: bool,

    /// Left image; with --right, layers are scored by re-projection.
    #[arg(long, requires = "right")]
    left: Option<PathBuf>,

    /// Right image of the stereo pair.
    #[arg(long, requires = "left")]
    right: Option<PathBuf>,

    /// Re-projection cost of one occluded pixel.
    #[arg(long, default_value_t = 20.0 / 255.0)]
    occlusion_cost: f32,

    /// Path to write the JSON report.
    #[arg(long)]
    out: PathBuf,

    /// Path to write the fitted disparity (16-bit PNG, scaled by --disp-scale).
    #[arg(long)]
    disp_out: Option<PathBuf>,

    /// Path to write the layer of every pixel (16-bit PNG of head indices).
    #[arg(long)]
    layers_out: Option<PathBuf>,
}

#[derive(Debug, Clone, Args)]
struct CliSynthArgs {
    /// Output directory.
    #[arg(long)]
    out_dir: PathBuf,

    /// Scene configuration (JSON). Defaults apply to missing fields.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the scene seed.
    #[arg(long)]
    seed: Option<u64>,

    /// Stored disparity value per pixel of disparity.
    #[arg(long, default_value = "256.0")]
    disp_scale: f32,
}

fn main() -> CliResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Fit(args) => run_fit(&args),
        Commands::Synth(args) => run_synth(&args),
    }
}

fn open_image(path: &Path) -> CliResult<DynamicImage> {
    image::open(path).map_err(|e| -> CliError {
        format!("Failed to open image {}: {}", path.display(), e).into()
    })
}

fn read_json<T: serde::de::DeserializeOwned + Default>(path: Option<&Path>) -> CliResult<T> {
    let Some(path) = path else {
        return Ok(T::default());
    };
    let text = std::fs::read_to_string(path).map_err(|e| -> CliError {
        format!("Failed to read {}: {}", path.display(), e).into()
    })?;
    serde_json::from_str(&text).map_err(|e| -> CliError {
        format!("Invalid config {}: {}", path.display(), e).into()
    })
}

// ── fit ────────────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct FitOutput {
    config: PipelineConfig,
    warp_score: Option<f32>,
    merge: Option<MergeReport>,
    grow: Option<GrowReport>,
    layers: LayersReport,
}

/// Dense segment ids `0..n` for the distinct colours of a label image.
fn relabel(img: &DynamicImage) -> (Field<u32>, usize) {
    let rgb = img.to_rgb16();
    let mut ids: BTreeMap<[u16; 3], u32> = BTreeMap::new();
    for p in rgb.pixels() {
        let next = ids.len() as u32;
        ids.entry(p.0).or_insert(next);
    }
    let segs = Field::from_fn(rgb.width() as usize, rgb.height() as usize, |x, y| {
        ids[&rgb.get_pixel(x as u32, y as u32).0]
    });
    (segs, ids.len())
}

fn run_fit(args: &CliFitArgs) -> CliResult<()> {
    if !(args.disp_scale > 0.0) {
        return Err(format!("--disp-scale must be positive, got {}", args.disp_scale).into());
    }
    let config: PipelineConfig = read_json(args.config.as_deref())?;

    tracing::info!("Loading segmentation: {}", args.segs.display());
    let (segs, segment_count) = relabel(&open_image(&args.segs)?);
    tracing::info!(
        "Segmentation: {}x{}, {} segments",
        segs.width(),
        segs.height(),
        segment_count
    );

    tracing::info!("Loading disparity: {}", args.disparity.display());
    let raw: Field<u16> = Field::from(&open_image(&args.disparity)?.to_luma16());
    let disparity = raw.map(|&v| v as f32 / args.disp_scale);
    let valid = raw.map(|&v| v != 0);

    let mut builder = LayersBuilder::new(segs, segment_count)?;
    builder.set_fit_config(config.fit.clone())?;
    let source =
        builder.add_ied(Box::new(DisparityIed::new(disparity, args.mult).with_mask(valid)?))?;
    builder.set_outlier_dist(source, config.outlier_dist)?;
    builder.add_surface_type(Box::new(PlaneSurfaceType));
    if args.frontal {
        builder.add_surface_type(Box::new(FrontalSurfaceType));
    }
    if args.sphere {
        builder.add_surface_type(Box::new(SphereSurfaceType));
    }
    let mut layers = builder.commit()?;

    let mut warp = match (&args.left, &args.right) {
        (Some(left), Some(right)) => {
            let left = open_image(left)?.to_rgb32f();
            let right: Rgb32FImage = open_image(right)?.to_rgb32f();
            let warp_config = WarpScoreConfig {
                occlusion_cost: args.occlusion_cost,
                disparity_mult: args.mult,
            };
            Some(WarpScore::new(&layers, left, &right, None, warp_config)?)
        }
        _ => None,
    };
    let mut outlier = OutlierScore::new();
    let score: &mut dyn LayerScore = match warp.as_mut() {
        Some(w) => {
            tracing::info!("Scoring layers by re-projection (initial score {:.3})", w.score());
            w
        }
        None => &mut outlier,
    };

    let merge = if config.run_merge {
        Some(LayerMerge::new(config.merge.clone())?.run(&mut layers, score))
    } else {
        None
    };
    let grow = if config.run_grow {
        Some(LayerGrow::new(config.grow.clone()).run(&mut layers, score))
    } else {
        None
    };

    tracing::info!(
        "Reconstructed {} layers from {} segments (total cost {:.3})",
        layers.layer_count(),
        layers.segment_count(),
        layers.total_cost()
    );

    let output = FitOutput {
        config,
        warp_score: warp.as_ref().map(WarpScore::score),
        merge,
        grow,
        layers: layers.report(),
    };
    let json = serde_json::to_string_pretty(&output)?;
    std::fs::write(&args.out, &json)?;
    tracing::info!("Report written to {}", args.out.display());

    if let Some(path) = &args.disp_out {
        layers.disp_map(args.mult).to_luma16(args.disp_scale).save(path)?;
        tracing::info!("Disparity written to {}", path.display());
    }
    if let Some(path) = &args.layers_out {
        layers
            .layer_map()
            .map(|&h| h as f32)
            .to_luma16(1.0)
            .save(path)?;
        tracing::info!("Layer map written to {}", path.display());
    }

    Ok(())
}

// ── synth ──────────────────────────────────────────────────────────────────

fn run_synth(args: &CliSynthArgs) -> CliResult<()> {
    let mut config: SynthConfig = read_json(args.config.as_deref())?;
    if let Some(seed) = args.seed {
        config.seed = seed;
    }
    let scene = SynthScene::generate(&config)?;
    std::fs::create_dir_all(&args.out_dir)?;

    let segs = args.out_dir.join("segs.png");
    scene.segs.map(|&s| s as f32).to_luma16(1.0).save(&segs)?;
    scene
        .disparity
        .to_luma16(args.disp_scale)
        .save(args.out_dir.join("disparity.png"))?;
    for (name, img) in [("left.png", &scene.left), ("right.png", &scene.right)] {
        DynamicImage::ImageRgb32F(img.clone())
            .to_rgb8()
            .save(args.out_dir.join(name))?;
    }
    let json = serde_json::to_string_pretty(&scene.config)?;
    std::fs::write(args.out_dir.join("scene.json"), &json)?;

    tracing::info!(
        "Scene with {} segments on {} planes written to {} (labels {})",
        scene.segment_count,
        scene.config.planes.len(),
        args.out_dir.display(),
        segs.display()
    );
    Ok(())
}
