//! Two-interface Snell's-law forward projection.
//!
//! For a camera at `c` imaging a point `x` through a planar wall slab, the
//! ray path bends at both wall faces. The path is reduced to two unknowns —
//! the radial distances `ra` (front-face crossing) and `rb` (back-face
//! crossing) in the cylindrical frame around the camera axis — and solved
//! with a 2×2 Newton-Raphson iteration on the two Snell conditions.
//!
//! The solver is total: on non-convergence it reports through the logging
//! sink and keeps the last iterate. Targets inside the slab and cameras past
//! the front face are outside the contract and give unspecified results.

use nalgebra::Vector3;
use sapiv_core::RefractiveGeometry;
use tracing::warn;

/// Newton-Raphson controls.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolverOptions {
    /// Stop when |Δra| + |Δrb| drops below this.
    pub tol: f64,
    pub max_iters: usize,
}

impl Default for SolverOptions {
    fn default() -> Self {
        Self {
            tol: 1e-9,
            max_iters: 20,
        }
    }
}

/// Result of one forward-projection solve.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Refraction {
    /// Point on the front wall face (z = z_wall) where the ray enters glass.
    pub wall_point: Vector3<f64>,
    pub iterations: usize,
    pub converged: bool,
}

struct RadialSolution {
    ra: f64,
    phi: f64,
    iterations: usize,
    converged: bool,
}

fn solve_radial(
    c: &Vector3<f64>,
    x: &Vector3<f64>,
    geom: &RefractiveGeometry,
    opts: &SolverOptions,
) -> RadialSolution {
    let zw = geom.z_wall;
    let zb = geom.z_back();
    let (n1, n2, n3) = (geom.n1, geom.n2, geom.n3);

    // Straight-line seeds for the two interface crossings.
    let dz = x.z - c.z;
    let ax = c.x + (x.x - c.x) * (zw - c.z) / dz;
    let ay = c.y + (x.y - c.y) * (zw - c.z) / dz;
    let bx = c.x + (x.x - c.x) * (zb - c.z) / dz;
    let by = c.y + (x.y - c.y) * (zb - c.z) / dz;

    let rp = ((x.x - c.x).powi(2) + (x.y - c.y).powi(2)).sqrt();
    let dp = x.z - zb;
    let phi = (x.y - c.y).atan2(x.x - c.x);

    let mut ra = ((ax - c.x).powi(2) + (ay - c.y).powi(2)).sqrt();
    let mut rb = ((bx - c.x).powi(2) + (by - c.y).powi(2)).sqrt();
    let da = zw - c.z;
    let db = geom.thickness;

    let mut iterations = 0;
    let mut converged = false;

    for _ in 0..opts.max_iters {
        iterations += 1;

        let f = ra / (ra * ra + da * da).sqrt()
            - (n2 / n1) * (rb - ra) / ((rb - ra).powi(2) + db * db).sqrt();
        let g = (rb - ra) / ((rb - ra).powi(2) + db * db).sqrt()
            - (n3 / n2) * (rp - rb) / ((rp - rb).powi(2) + dp * dp).sqrt();

        let sa = (ra * ra + da * da).sqrt();
        let sab = ((ra - rb).powi(2) + db * db).sqrt();
        let sbp = ((rb - rp).powi(2) + dp * dp).sqrt();

        let dfdra = 1.0 / sa - ra * ra / sa.powi(3) + (n2 / n1) / sab
            - (n2 / n1) * (ra - rb).powi(2) / sab.powi(3);
        let dfdrb = (n2 / n1) * (ra - rb).powi(2) / sab.powi(3) - (n2 / n1) / sab;
        let dgdra = (ra - rb).powi(2) / sab.powi(3) - 1.0 / sab;
        let dgdrb = 1.0 / sab + (n3 / n2) / sbp
            - (ra - rb).powi(2) / sab.powi(3)
            - (n3 / n2) * (rb - rp).powi(2) / sbp.powi(3);

        let det = dfdra * dgdrb - dfdrb * dgdra;
        let step_a = (f * dgdrb - g * dfdrb) / det;
        let step_b = (g * dfdra - f * dgdra) / det;
        ra -= step_a;
        rb -= step_b;

        if step_a.abs() + step_b.abs() < opts.tol {
            converged = true;
            break;
        }
    }

    RadialSolution {
        ra,
        phi,
        iterations,
        converged,
    }
}

/// Solve the refractive forward projection for a single point.
///
/// Returns the entry point on the front wall face; projecting that point
/// through the camera's P matrix gives the refraction-corrected pixel.
pub fn refract_point(
    center: &Vector3<f64>,
    target: &Vector3<f64>,
    geom: &RefractiveGeometry,
    opts: &SolverOptions,
) -> Refraction {
    let sol = solve_radial(center, target, geom, opts);
    if !sol.converged {
        warn!(
            iterations = sol.iterations,
            "refraction solver hit the iteration cap; keeping last iterate"
        );
    }
    Refraction {
        wall_point: Vector3::new(
            center.x + sol.ra * sol.phi.cos(),
            center.y + sol.ra * sol.phi.sin(),
            geom.z_wall,
        ),
        iterations: sol.iterations,
        converged: sol.converged,
    }
}

/// Refract a batch of points; non-convergence is logged with the point index.
pub fn refract_points(
    center: &Vector3<f64>,
    targets: &[Vector3<f64>],
    geom: &RefractiveGeometry,
    opts: &SolverOptions,
) -> Vec<Vector3<f64>> {
    targets
        .iter()
        .enumerate()
        .map(|(i, target)| {
            let sol = solve_radial(center, target, geom, opts);
            if !sol.converged {
                warn!(
                    point = i,
                    iterations = sol.iterations,
                    "refraction solver hit the iteration cap; keeping last iterate"
                );
            }
            Vector3::new(
                center.x + sol.ra * sol.phi.cos(),
                center.y + sol.ra * sol.phi.sin(),
                geom.z_wall,
            )
        })
        .collect()
}
