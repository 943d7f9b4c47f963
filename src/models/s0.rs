//! `S0`: a constant signal, the simplest model and a useful baseline.

use crate::domain::{Protocol, ProtocolRow};
use crate::models::model::{ForwardModel, ParamSpec, unweighted_mean};

const PARAMS: [ParamSpec; 1] = [ParamSpec::bounded("S0.s0", 0.0, f64::INFINITY, 1.0, 1.0)];

#[derive(Debug, Clone, Copy, Default)]
pub struct S0;

impl ForwardModel for S0 {
    fn name(&self) -> &str {
        "S0"
    }

    fn params(&self) -> &[ParamSpec] {
        &PARAMS
    }

    fn predict(&self, _row: &ProtocolRow, params: &[f64]) -> f64 {
        params[0]
    }

    fn initial_guess(&self, protocol: &Protocol, signal: &[f64]) -> Vec<f64> {
        vec![unweighted_mean(protocol, signal).unwrap_or(PARAMS[0].default)]
    }
}
