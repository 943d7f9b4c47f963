//! Formatted terminal output.
//!
//! We keep formatting code in one place so:
//! - the fitting code stays clean and testable
//! - output changes are localized

use crate::device::{ComputeDevice, rank_devices};
use crate::io::FitInfo;
use crate::report::RoiStats;

/// Device table in enumeration order; `*` marks the automatic choice.
pub fn format_device_table(devices: &[ComputeDevice]) -> String {
    let best = rank_devices(devices).first().copied();
    let mut out = String::new();
    out.push_str(&format!(
        "{:<3} {:<5} {:<16} {:>6} {:>10}  {}\n",
        "", "index", "kind", "units", "memory", "name"
    ));
    out.push_str(&format!("{:-<3} {:-<5} {:-<16} {:-<6} {:-<10}  {:-<20}\n", "", "", "", "", "", ""));
    for (i, d) in devices.iter().enumerate() {
        let mark = if Some(i) == best { "*" } else { "" };
        out.push_str(
            format!(
                "{mark:<3} {i:<5} {:<16} {:>6} {:>10}  {}\n",
                d.kind.display_name(),
                d.compute_units,
                fmt_bytes(d.global_memory_bytes),
                d.name
            )
            .trim_end(),
        );
        out.push('\n');
    }
    out
}

/// One-model summary printed after `voxfit fit`.
pub fn format_fit_summary(info: &FitInfo) -> String {
    let mut out = String::new();
    out.push_str(&format!("=== {} ===\n", info.model));
    out.push_str(&format!("Devices: {}\n", info.devices.join(", ")));
    out.push_str(&format!(
        "Voxels: {} | measurements: {} | shape: {:?}\n",
        info.voxels, info.measurements, info.shape
    ));
    out.push_str(&format!("Noise: {:?} σ={:.4}\n", info.noise_model, info.noise_std));
    out.push_str(&format!(
        "Status: converged={} max_iterations={} degenerate={} numerical_failure={}\n",
        info.status.converged, info.status.max_iterations, info.status.degenerate, info.status.numerical_failure
    ));
    out.push_str(&format!("Elapsed: {:.2}s | maps: {}\n", info.elapsed_seconds, info.maps.len()));
    out
}

pub fn format_roi_stats(label: &str, stats: Option<&RoiStats>) -> String {
    match stats {
        Some(s) => format!(
            "{label}: n={} mean={:.6} std={:.6} min={:.6} max={:.6}",
            s.count, s.mean, s.std, s.min, s.max
        ),
        None => format!("{label}: n=0 (no finite voxels in ROI)"),
    }
}

fn fmt_bytes(bytes: u64) -> String {
    const GIB: f64 = 1024.0 * 1024.0 * 1024.0;
    if bytes == 0 {
        return "-".to_string();
    }
    format!("{:.1}G", bytes as f64 / GIB)
}
