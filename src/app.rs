//! Top-level application orchestration.
//!
//! `src/main.rs` is intentionally tiny; this module is the "real main" that:
//! - installs logging
//! - parses CLI arguments on top of the environment configuration
//! - loads input data and runs the fit pipeline
//! - prints summaries

use std::sync::atomic::AtomicBool;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::cli::{Command, FitArgs, NoiseArg, RoiArgs, SimulateArgs};
use crate::data::{PhantomNoise, PhantomSpec, simulate};
use crate::device::{ComputeContext, HostDeviceProvider, enumerate_devices};
use crate::domain::{DeviceSelection, FitConfig};
use crate::error::{Error, Result};
use crate::io::{
    MapWriter, NiftiVolumes, load_bvec_bval, load_input_data_with, load_protocol, map_path, read_volume3,
    write_protocol, write_signal,
};
use crate::maps::create_roi;
use crate::models::ModelRegistry;
use crate::report::{format_device_table, format_fit_summary, format_roi_stats, roi_stats};

pub mod pipeline;

/// Entry point for the `voxfit` binary.
pub fn run() -> Result<()> {
    init_tracing();
    let cli = crate::cli::Cli::parse();

    match cli.command {
        Command::ListDevices => {
            print!("{}", format_device_table(&enumerate_devices()));
            Ok(())
        }
        Command::Fit(args) => handle_fit(args),
        Command::Roi(args) => handle_roi(args),
        Command::Simulate(args) => handle_simulate(args),
    }
}

/// `RUST_LOG` filter, `info` by default, on stderr.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn handle_fit(args: FitArgs) -> Result<()> {
    let config = fit_config_from_args(&args)?;
    // Fail on a bad device index or model name before loading any volume.
    let ctx = ComputeContext::from_selection(&HostDeviceProvider, &config.device)?;
    let registry = ModelRegistry::with_defaults();
    for name in &args.models {
        registry.get(name)?;
    }

    let protocol = match (&args.protocol, &args.bvec, &args.bval) {
        (Some(path), _, _) => load_protocol(path)?,
        (None, Some(bvec), Some(bval)) => load_bvec_bval(bvec, bval)?,
        _ => return Err(Error::InvalidConfig("either --protocol or --bvec and --bval is required".into())),
    };
    let batch = load_input_data_with(&NiftiVolumes, &args.signal, protocol, args.mask.as_deref())?;

    // Never set here; see `pipeline::fit_models`.
    let cancel = AtomicBool::new(false);
    let runs = pipeline::fit_models(&args.models, &batch, &args.output, &ctx, &config, &cancel)?;
    for run in &runs {
        println!("{}", format_fit_summary(&run.info));
    }
    Ok(())
}

fn handle_roi(args: RoiArgs) -> Result<()> {
    let map = read_volume3(&NiftiVolumes, &args.map)?;
    let mask = read_volume3(&NiftiVolumes, &args.mask)?;
    let roi = create_roi(&map, &mask)?;
    let label = args
        .map
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "map".into());
    println!("{}", format_roi_stats(&label, roi_stats(&roi).as_ref()));
    Ok(())
}

fn handle_simulate(args: SimulateArgs) -> Result<()> {
    let model = ModelRegistry::with_defaults().get(&args.model)?;
    let shape: [usize; 3] = args
        .shape
        .as_slice()
        .try_into()
        .map_err(|_| Error::InvalidConfig("--shape takes exactly three sizes".into()))?;
    let spec = PhantomSpec {
        shape,
        snr: args.snr,
        seed: args.seed,
        noise: match args.noise {
            NoiseArg::Gaussian => PhantomNoise::Gaussian,
            NoiseArg::Rician => PhantomNoise::Rician,
        },
    };
    let phantom = simulate(model.as_ref(), &spec)?;

    let out = &args.output;
    std::fs::create_dir_all(out).map_err(|e| Error::io("failed to create output directory", out, e))?;
    write_signal(&out.join("signal.nii.gz"), &phantom.signal)?;
    write_protocol(&out.join("protocol.prtcl"), &phantom.protocol)?;
    NiftiVolumes.write_map(&map_path(out, "mask"), &phantom.mask.mapv(|m| if m { 1.0 } else { 0.0 }))?;
    info!(
        model = model.name(),
        voxels = phantom.truth.len(),
        sigma = phantom.sigma,
        dir = %out.display(),
        "phantom written"
    );
    Ok(())
}

/// Environment configuration overlaid with CLI flags.
pub fn fit_config_from_args(args: &FitArgs) -> Result<FitConfig> {
    let mut config = FitConfig::from_env()?;
    if !args.devices.is_empty() {
        config.device = DeviceSelection::from_indices(args.devices.clone());
    }
    if let Some(raw) = &args.noise_std {
        config.noise_std = raw.parse()?;
    }
    if let Some(noise_model) = args.noise_model {
        config.noise_model = Some(noise_model);
    }
    if let Some(max_iterations) = args.max_iterations {
        config.max_iterations = max_iterations;
    }
    if let Some(sentinel) = args.sentinel {
        config.sentinel = sentinel;
    }
    config.validate()?;
    Ok(config)
}
