//! Reporting utilities: ROI statistics and formatted terminal output.

pub mod format;

pub use format::*;

use serde::Serialize;

/// Summary statistics of an ROI.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RoiStats {
    pub count: usize,
    pub mean: f64,
    /// Population standard deviation (ddof 0).
    pub std: f64,
    pub min: f64,
    pub max: f64,
}

/// Statistics over the finite values of `roi`. `None` if there are none.
pub fn roi_stats(roi: &[f64]) -> Option<RoiStats> {
    let finite: Vec<f64> = roi.iter().copied().filter(|v| v.is_finite()).collect();
    if finite.is_empty() {
        return None;
    }
    let n = finite.len() as f64;
    let mean = finite.iter().sum::<f64>() / n;
    let var = finite.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    Some(RoiStats {
        count: finite.len(),
        mean,
        std: var.sqrt(),
        min: finite.iter().copied().fold(f64::INFINITY, f64::min),
        max: finite.iter().copied().fold(f64::NEG_INFINITY, f64::max),
    })
}
