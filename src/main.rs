use anyhow::{Context, bail};
use clap::Parser;
use log::{info, warn};
use std::path::PathBuf;

use pcbinspect::{BatchPipeline, DefectPipeline, ImagePair, InspectionConfig, discover_pairs};

#[derive(Parser)]
#[command(name = "pcbinspect")]
#[command(about = "Find defects on PCB images by comparing them with a defect-free reference")]
struct Cli {
    /// Directory of test images, optionally grouped in category sub-directories
    #[arg(long, value_name = "DIR", requires = "reference_dir")]
    test_dir: Option<PathBuf>,

    /// Directory of reference images named `<board>.<ext>`
    #[arg(long, value_name = "DIR")]
    reference_dir: Option<PathBuf>,

    /// Inspect an explicit test/reference pair (repeatable)
    #[arg(long, num_args = 2, value_names = ["TEST", "REFERENCE"])]
    pair: Vec<PathBuf>,

    /// Only scan these category sub-directories (repeatable)
    #[arg(long, value_name = "NAME")]
    category: Vec<String>,

    /// Only inspect test images with these file names (repeatable)
    #[arg(long, value_name = "FILE")]
    only: Vec<String>,

    /// Output directory for crops and annotated images
    #[arg(short, long, value_name = "DIR")]
    out: PathBuf,

    /// JSON configuration file
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Side of the square crops
    #[arg(long)]
    crop_size: Option<u32>,

    /// Margin added around each defect before cropping
    #[arg(long)]
    correction: Option<u32>,

    /// RANSAC seed
    #[arg(long)]
    seed: Option<u64>,

    /// Worker threads (defaults to one per core)
    #[arg(short, long)]
    jobs: Option<usize>,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Save intermediate stage images to directory (must be empty)
    #[arg(long, value_name = "DIR")]
    debug_out: Option<PathBuf>,
}

impl Cli {
    fn load_config(&self) -> anyhow::Result<InspectionConfig> {
        let mut config = match &self.config {
            Some(path) => InspectionConfig::load(path)
                .with_context(|| format!("failed to load config {}", path.display()))?,
            None => InspectionConfig::default(),
        };
        if let Some(size) = self.crop_size {
            config.extraction.crop_size = size;
        }
        if let Some(correction) = self.correction {
            config.extraction.correction = correction;
        }
        if let Some(seed) = self.seed {
            config.alignment.seed = seed;
        }
        Ok(config)
    }

    fn collect_pairs(&self) -> anyhow::Result<Vec<ImagePair>> {
        let mut pairs: Vec<ImagePair> = self
            .pair
            .chunks_exact(2)
            .map(|p| ImagePair::new(&p[0], &p[1]))
            .collect();

        if let (Some(test_dir), Some(reference_dir)) = (&self.test_dir, &self.reference_dir) {
            let discovery = discover_pairs(test_dir, reference_dir, &self.category)
                .with_context(|| format!("failed to scan {}", test_dir.display()))?;
            for path in &discovery.unmatched {
                warn!("no reference for {}", path.display());
            }
            pairs.extend(discovery.pairs);
        }

        if !self.only.is_empty() {
            pairs.retain(|p| {
                p.test
                    .file_name()
                    .is_some_and(|n| self.only.iter().any(|o| n == o.as_str()))
            });
        }
        Ok(pairs)
    }
}

fn main() -> anyhow::Result<()> {
    let args = Cli::parse();

    let level = if args.verbose { "info" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    if let Some(jobs) = args.jobs {
        rayon::ThreadPoolBuilder::new()
            .num_threads(jobs)
            .build_global()
            .context("failed to configure worker threads")?;
    }

    let config = args.load_config()?;
    let pairs = args.collect_pairs()?;
    if pairs.is_empty() {
        bail!("nothing to inspect: pass --pair or --test-dir with --reference-dir");
    }
    info!("inspecting {} pairs", pairs.len());

    let mut batch = BatchPipeline::new(DefectPipeline::new(config)?, &args.out);
    if let Some(debug_dir) = args.debug_out.clone() {
        batch = batch.with_debug(debug_dir)?;
    }

    let report = batch.run(&pairs)?;

    println!("\n=== Inspection Results ===");
    println!("Pairs inspected: {}/{}", report.succeeded(), pairs.len());
    println!("Defect candidates: {}", report.total_regions());
    if args.verbose {
        for outcome in &report.outcomes {
            if let Ok(count) = &outcome.result {
                println!("  {}: {}", outcome.pair.test.display(), count);
            }
        }
    }
    let failures: Vec<_> = report.failed().collect();
    if !failures.is_empty() {
        println!("\nFailed pairs:");
        for outcome in &failures {
            if let Err(e) = &outcome.result {
                println!("  {}: {}", outcome.pair.test.display(), e);
            }
        }
    }
    println!("Output written to {}", args.out.display());

    if report.succeeded() == 0 {
        bail!("every pair failed");
    }
    Ok(())
}
