use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info, warn};
use windd::config::{DEFAULT_BLOCK_SIZE_MIB, ImagingConfig};
use windd::disk::PlatformDeviceAccess;
use windd::imaging::{execute_plan, plan_imaging};
use windd::logging::{self, LogConfig};
use windd::utils::{
    LogProgressSink, ProgressBarSink, elevation_status, format_file_size, is_elevated,
};

/// Copy a raw disk or volume into an image file
#[derive(Parser, Debug)]
#[clap(name = "windd", version, about = "Raw disk and volume imaging in the spirit of dd")]
struct Args {
    /// Source device or file (e.g. \\.\PhysicalDrive0, D:, /dev/sdb)
    #[clap(long = "if", value_name = "SOURCE")]
    input: String,

    /// Destination image file, created if absent
    #[clap(long = "of", value_name = "DEST")]
    output: PathBuf,

    /// Block size in MiB, clamped to 64
    #[clap(long, default_value_t = DEFAULT_BLOCK_SIZE_MIB)]
    bs: u32,

    /// Byte offset in the destination where writing starts
    #[clap(long, default_value_t = 0)]
    skip: u64,

    /// Byte offset in the source where reading starts
    #[clap(long, default_value_t = 0)]
    seek: u64,

    /// Show a progress bar
    #[clap(long)]
    progress: bool,

    /// Enable debug logging
    #[clap(short, long)]
    verbose: bool,

    /// Also write the log to this file
    #[clap(long, value_name = "PATH")]
    log_file: Option<PathBuf>,
}

fn main() -> ExitCode {
    let args = Args::parse();

    let _guard = match logging::init(&LogConfig {
        verbose: args.verbose,
        log_file: args.log_file.clone(),
    }) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to open log file: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<()> {
    if !is_elevated() {
        warn!("{}", elevation_status());
    }

    let config = ImagingConfig::new(
        &args.input,
        args.output,
        args.bs,
        args.seek,
        args.skip,
        args.progress,
    );
    if config.block_size_mib != args.bs {
        warn!("Block size {} MiB adjusted to {} MiB", args.bs, config.block_size_mib);
    }

    let access = PlatformDeviceAccess::new();
    let plan = plan_imaging(&config, &access)
        .with_context(|| format!("Failed to prepare imaging of {}", config.source))?;

    println!(
        "Source: {} ({})",
        config.source,
        format_file_size(plan.range.total_capacity)
    );
    println!(
        "Destination: {} ({} free)",
        config.destination.display(),
        format_file_size(plan.available)
    );
    if plan.range.source_base_offset != 0 {
        println!(
            "Reading through {} from offset {}",
            plan.range.source_path, plan.range.source_base_offset
        );
    }

    let total = plan.range.total_capacity;
    let copied = if config.progress {
        execute_plan(&config, &access, &plan, ProgressBarSink::new(total))
    } else {
        execute_plan(&config, &access, &plan, LogProgressSink::default())
    }
    .with_context(|| {
        format!(
            "Failed to image {} into {}",
            config.source,
            config.destination.display()
        )
    })?;

    info!("Wrote {} bytes to {}", copied.bytes_copied, config.destination.display());
    println!(
        "Done: {} ({} bytes) written",
        format_file_size(copied.bytes_copied),
        copied.bytes_copied
    );
    Ok(())
}
