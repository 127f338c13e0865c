use clap::{Parser, Subcommand};
use sizefit::config::{self, SizefitConfig};
use sizefit::imaging::RustBackend;
use sizefit::{output, process};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Budget and size overrides shared by commands that look at a budget.
#[derive(clap::Args, Clone, Default)]
struct BudgetArgs {
    /// Byte budget, e.g. 500KB, 2MB, or plain bytes (overrides [budget].max_size)
    #[arg(long, value_parser = config::parse_byte_size)]
    max_size: Option<u64>,

    /// Initial encode quality in (0, 1]
    #[arg(long)]
    quality: Option<f32>,

    /// Never produce output wider than this
    #[arg(long)]
    max_width: Option<u32>,

    /// Never produce output taller than this
    #[arg(long)]
    max_height: Option<u32>,

    /// Clamp width and height independently instead of keeping the aspect ratio
    #[arg(long)]
    stretch: bool,
}

impl BudgetArgs {
    /// Layer CLI flags over the loaded config.
    fn apply(&self, config: &mut SizefitConfig) {
        if let Some(max_size) = self.max_size {
            config.budget.max_size = config::ByteSize(max_size);
        }
        if self.quality.is_some() {
            config.budget.quality = self.quality;
        }
        if self.max_width.is_some() {
            config.budget.max_width = self.max_width;
        }
        if self.max_height.is_some() {
            config.budget.max_height = self.max_height;
        }
        if self.stretch {
            config.budget.maintain_aspect_ratio = false;
        }
    }
}

#[derive(Parser)]
#[command(name = "sizefit")]
#[command(about = "Fit JPEG, PNG, and WebP images under a byte budget")]
#[command(long_about = "\
Fit JPEG, PNG, and WebP images under a byte budget

Each image is searched deterministically: files already within budget are
passed through untouched; otherwise quality is lowered step by step at full
size, then a fixed ladder of smaller dimensions is tried. The output always
keeps the input's format.

Search order (defaults):

  1. quality 0.9, 0.8, ... 0.2 at full size (within --max-width/--max-height)
  2. fit 1200x800 at quality 0.7
  3. fit 800x600 at quality 0.5

Outputs land in --out, mirroring input directory structure, together with
report.json and a result cache (.sizefit-cache.json).

Run 'sizefit gen-config' to generate a documented sizefit.toml.")]
#[command(version)]
struct Cli {
    /// Config file (missing file = stock defaults)
    #[arg(long, default_value = config::CONFIG_FILENAME, global = true)]
    config: PathBuf,

    /// Log search attempts to stderr (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Optimize files and directories into an output directory
    Optimize {
        /// Image files or directories (walked recursively)
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        /// Output directory
        #[arg(long, short, default_value = "optimized")]
        out: PathBuf,

        #[command(flatten)]
        budget: BudgetArgs,

        /// Disable the result cache and search every image afresh
        #[arg(long)]
        no_cache: bool,
    },
    /// Validate inputs and show dimensions without encoding
    Check {
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        #[command(flatten)]
        budget: BudgetArgs,
    },
    /// Print a stock sizefit.toml with all options documented
    GenConfig,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Command::Optimize {
            inputs,
            out,
            budget,
            no_cache,
        } => {
            let config = load_config(&cli.config, &budget)?;
            let options = process::ProcessOptions {
                inputs,
                output_dir: out,
                request: config.to_request(),
                policy: config.to_policy(),
                max_concurrent: config::effective_concurrency(&config.processing),
                use_cache: config.cache.enabled && !no_cache,
                cache_ttl: config.cache_ttl(),
            };

            let (tx, rx) = std::sync::mpsc::channel();
            let printer = std::thread::spawn(move || {
                for event in rx {
                    output::print_process_event(&event);
                }
            });
            let result = process::process(&options, Some(tx)).await;
            printer
                .join()
                .map_err(|_| "progress printer thread panicked")?;
            let report = result?;

            let report_path = report.write_to(&options.output_dir)?;
            println!();
            output::print_summary(&report);
            println!("Report: {}", report_path.display());

            if report.failed_count() > 0 {
                std::process::exit(1);
            }
        }
        Command::Check { inputs, budget } => {
            let config = load_config(&cli.config, &budget)?;
            let reports = process::check(&RustBackend::new(), &inputs, &config.to_request())?;
            output::print_check_output(&reports);
        }
        Command::GenConfig => {
            print!("{}", config::stock_config_toml());
        }
    }

    Ok(())
}

/// Load the config file, apply CLI overrides, and validate the result.
fn load_config(
    path: &std::path::Path,
    overrides: &BudgetArgs,
) -> Result<SizefitConfig, config::ConfigError> {
    let mut config = config::load_config(path)?;
    overrides.apply(&mut config);
    config.validate()?;
    Ok(config)
}

/// Install the stderr log subscriber. `-v` raises the default level to debug.
fn init_tracing(verbose: bool) {
    let default_level = if verbose { "sizefit=debug" } else { "sizefit=warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
