//! Orientation helpers for direction-dependent compartments.
//!
//! Directions are parameterized by polar angle `θ` and azimuth `φ`:
//! `n = (sin θ cos φ, sin θ sin φ, cos θ)`. Diffusion is antipodally symmetric,
//! so `n` and `-n` describe the same fibre; canonical angles satisfy
//! `θ ∈ [0, π]` and `φ ∈ [0, π)`.
//!
//! A full tensor frame adds a third angle `ψ`, the rotation of the first
//! perpendicular axis around `n` starting from `∂n/∂θ`.

use std::f64::consts::PI;

use nalgebra::Vector3;

/// Unit vector for polar angle `theta` and azimuth `phi`.
pub fn direction(theta: f64, phi: f64) -> Vector3<f64> {
    let (st, ct) = theta.sin_cos();
    let (sp, cp) = phi.sin_cos();
    Vector3::new(st * cp, st * sp, ct)
}

/// Canonical `(θ, φ)` of a (not necessarily unit) vector.
///
/// Returns `(0, 0)` for a zero vector.
pub fn angles_of(v: &Vector3<f64>) -> (f64, f64) {
    let norm = v.norm();
    if !(norm.is_finite() && norm > 0.0) {
        return (0.0, 0.0);
    }
    let u = v / norm;
    let mut theta = u.z.clamp(-1.0, 1.0).acos();
    let mut phi = u.y.atan2(u.x);
    if phi < 0.0 {
        theta = PI - theta;
        phi += PI;
    }
    if phi >= PI {
        theta = PI - theta;
        phi -= PI;
    }
    (theta, phi)
}

/// Map arbitrary `(θ, φ)` onto the canonical range, keeping the direction.
pub fn canonicalize_angles(theta: f64, phi: f64) -> (f64, f64) {
    angles_of(&direction(theta, phi))
}

/// Orthonormal frame `[n0, n1, n2]` from three Euler-like angles.
pub fn tensor_frame(theta: f64, phi: f64, psi: f64) -> [Vector3<f64>; 3] {
    let n0 = direction(theta, phi);
    let (st, ct) = theta.sin_cos();
    let (sp, cp) = phi.sin_cos();
    let base = Vector3::new(ct * cp, ct * sp, -st);
    let (sq, cq) = psi.sin_cos();
    let n1 = base * cq + n0.cross(&base) * sq;
    let n2 = n0.cross(&n1);
    [n0, n1, n2]
}

/// Angles `(θ, φ, ψ)` of a frame whose first two axes are `n0` and `n1`.
///
/// `n1` is projected onto the plane orthogonal to `n0` first, so slightly
/// non-orthogonal inputs (numerical eigenvectors) are tolerated.
pub fn frame_angles(n0: &Vector3<f64>, n1: &Vector3<f64>) -> (f64, f64, f64) {
    let (theta, phi) = angles_of(n0);
    let n0 = direction(theta, phi);
    let (st, ct) = theta.sin_cos();
    let (sp, cp) = phi.sin_cos();
    let base = Vector3::new(ct * cp, ct * sp, -st);
    let perp = n1 - n0 * n0.dot(n1);
    if perp.norm() < 1e-12 {
        return (theta, phi, 0.0);
    }
    let psi = perp.dot(&n0.cross(&base)).atan2(perp.dot(&base));
    (theta, phi, canonicalize_psi(psi))
}

/// `ψ` and `ψ + π` give the same (sign-symmetric) frame; fold into `[0, π)`.
pub fn canonicalize_psi(psi: f64) -> f64 {
    let folded = psi.rem_euclid(PI);
    if folded >= PI { 0.0 } else { folded }
}
