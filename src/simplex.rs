//! Nelder-Mead downhill simplex over 3D positions.

use crate::Vec3;

// Standard reflection, expansion, contraction and shrink coefficients
const RHO: f64 = 1.0;
const CHI: f64 = 2.0;
const PSI: f64 = 0.5;
const SIGMA: f64 = 0.5;

/// Stopping criteria for [`minimize`].
#[derive(Debug, Clone)]
pub struct SimplexOptions {
    /// Initial edge length along each axis.
    pub initial_step: f64,
    /// Converged once every vertex is within this distance (per axis) of the best.
    pub xtol: f64,
    /// ...and every vertex value is within this of the best.
    pub ftol: f64,
    /// Maximum number of iterations.
    pub max_iterations: usize,
}

/// Result of a simplex search.
#[derive(Debug, Clone)]
pub struct SimplexResult {
    /// Best vertex.
    pub x: Vec3,
    /// Objective at `x`.
    pub value: f64,
    /// Number of iterations performed.
    pub iterations: usize,
    /// Whether both tolerances were met before the iteration cap.
    pub converged: bool,
}

/// Minimize `f` starting from `x0`.
///
/// `f` may return `+∞` to reject a point (NaN is treated the same way).
/// Rejected trial points never replace a finite vertex.
pub fn minimize<F>(mut f: F, x0: &Vec3, options: &SimplexOptions) -> SimplexResult
where
    F: FnMut(&Vec3) -> f64,
{
    let mut eval = |x: &Vec3| {
        let v = f(x);
        if v.is_nan() {
            f64::INFINITY
        } else {
            v
        }
    };

    let mut sim = [*x0, *x0, *x0, *x0];
    for (axis, vertex) in sim.iter_mut().skip(1).enumerate() {
        vertex[axis] += options.initial_step;
    }
    let mut fsim = [0.0; 4];
    for (v, fv) in sim.iter().zip(fsim.iter_mut()) {
        *fv = eval(v);
    }
    sort_simplex(&mut sim, &mut fsim);

    let mut iterations = 0;
    let mut converged = false;
    while iterations < options.max_iterations {
        if is_converged(&sim, &fsim, options) {
            converged = true;
            break;
        }
        iterations += 1;

        let centroid = (sim[0] + sim[1] + sim[2]) / 3.0;
        let worst = sim[3];

        let xr = centroid * (1.0 + RHO) - worst * RHO;
        let fxr = eval(&xr);
        let mut shrink = false;

        if fxr < fsim[0] {
            let xe = centroid * (1.0 + RHO * CHI) - worst * (RHO * CHI);
            let fxe = eval(&xe);
            if fxe < fxr {
                sim[3] = xe;
                fsim[3] = fxe;
            } else {
                sim[3] = xr;
                fsim[3] = fxr;
            }
        } else if fxr < fsim[2] {
            sim[3] = xr;
            fsim[3] = fxr;
        } else if fxr < fsim[3] {
            // Outside contraction
            let xc = centroid * (1.0 + PSI * RHO) - worst * (PSI * RHO);
            let fxc = eval(&xc);
            if fxc <= fxr {
                sim[3] = xc;
                fsim[3] = fxc;
            } else {
                shrink = true;
            }
        } else {
            // Inside contraction
            let xcc = centroid * (1.0 - PSI) + worst * PSI;
            let fxcc = eval(&xcc);
            if fxcc < fsim[3] {
                sim[3] = xcc;
                fsim[3] = fxcc;
            } else {
                shrink = true;
            }
        }

        if shrink {
            let best = sim[0];
            for j in 1..4 {
                sim[j] = best + (sim[j] - best) * SIGMA;
                fsim[j] = eval(&sim[j]);
            }
        }

        sort_simplex(&mut sim, &mut fsim);
    }

    // The cap may land exactly on a converged simplex
    if !converged && is_converged(&sim, &fsim, options) {
        converged = true;
    }

    SimplexResult {
        x: sim[0],
        value: fsim[0],
        iterations,
        converged,
    }
}

fn is_converged(sim: &[Vec3; 4], fsim: &[f64; 4], options: &SimplexOptions) -> bool {
    let x_spread = sim[1..]
        .iter()
        .map(|v| (v - sim[0]).amax())
        .fold(0.0, f64::max);
    let f_spread = fsim[1..]
        .iter()
        .map(|v| (v - fsim[0]).abs())
        .fold(0.0, f64::max);
    // NaN spreads (∞ - ∞) never count as converged
    x_spread <= options.xtol && f_spread <= options.ftol && !f_spread.is_nan()
}

fn sort_simplex(sim: &mut [Vec3; 4], fsim: &mut [f64; 4]) {
    let mut order = [0usize, 1, 2, 3];
    order.sort_by(|&a, &b| fsim[a].total_cmp(&fsim[b]));
    let (old_sim, old_f) = (*sim, *fsim);
    for (slot, &idx) in order.iter().enumerate() {
        sim[slot] = old_sim[idx];
        fsim[slot] = old_f[idx];
    }
}
