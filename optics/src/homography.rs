//! Plane-to-plane homography estimation via DLT with Hartley normalization.

use crate::{Error, Result};
use nalgebra::{Matrix3, Vector2, Vector3};

/// Apply a 3×3 homography to a 2D point.
#[inline]
pub fn apply(h: &Matrix3<f64>, p: Vector2<f64>) -> Vector2<f64> {
    let q = h * Vector3::new(p.x, p.y, 1.0);
    Vector2::new(q.x / q.z, q.y / q.z)
}

/// Translate the centroid to the origin and scale the mean distance to √2.
fn normalize_points(pts: &[Vector2<f64>]) -> (Matrix3<f64>, Vec<Vector2<f64>>) {
    let n = pts.len() as f64;
    let cx = pts.iter().map(|p| p.x).sum::<f64>() / n;
    let cy = pts.iter().map(|p| p.y).sum::<f64>() / n;

    let mean_dist = pts
        .iter()
        .map(|p| ((p.x - cx).powi(2) + (p.y - cy).powi(2)).sqrt())
        .sum::<f64>()
        / n;
    let s = if mean_dist > 1e-15 {
        std::f64::consts::SQRT_2 / mean_dist
    } else {
        1.0
    };

    let t = Matrix3::new(s, 0.0, -s * cx, 0.0, s, -s * cy, 0.0, 0.0, 1.0);
    let normalized = pts
        .iter()
        .map(|p| Vector2::new(s * (p.x - cx), s * (p.y - cy)))
        .collect();
    (t, normalized)
}

/// Estimate H such that dst ≈ H · src from ≥4 correspondences.
///
/// Four non-collinear correspondences determine the map exactly; more are
/// fit in the least-squares sense. The solution is the eigenvector for the
/// smallest eigenvalue of AᵀA in the Hartley-normalized frame.
pub fn estimate_homography_dlt(
    src: &[Vector2<f64>],
    dst: &[Vector2<f64>],
) -> Result<Matrix3<f64>> {
    let n = src.len();
    if n < 4 || dst.len() < 4 {
        return Err(Error::Config(format!(
            "homography fit needs at least 4 correspondences, got {}",
            n.min(dst.len())
        )));
    }
    if src.len() != dst.len() {
        return Err(Error::Config(
            "homography fit needs equally many source and destination points".into(),
        ));
    }

    let (t_src, src_n) = normalize_points(src);
    let (t_dst, dst_n) = normalize_points(dst);

    let mut a = nalgebra::DMatrix::<f64>::zeros(2 * n, 9);
    for i in 0..n {
        let (sx, sy) = (src_n[i].x, src_n[i].y);
        let (dx, dy) = (dst_n[i].x, dst_n[i].y);

        a[(2 * i, 3)] = -sx;
        a[(2 * i, 4)] = -sy;
        a[(2 * i, 5)] = -1.0;
        a[(2 * i, 6)] = dy * sx;
        a[(2 * i, 7)] = dy * sy;
        a[(2 * i, 8)] = dy;

        a[(2 * i + 1, 0)] = sx;
        a[(2 * i + 1, 1)] = sy;
        a[(2 * i + 1, 2)] = 1.0;
        a[(2 * i + 1, 6)] = -dx * sx;
        a[(2 * i + 1, 7)] = -dx * sy;
        a[(2 * i + 1, 8)] = -dx;
    }

    let ata = a.transpose() * &a;
    let eig = nalgebra::SymmetricEigen::new(ata);

    let mut min_idx = 0;
    let mut min_val = eig.eigenvalues[0].abs();
    for i in 1..9 {
        if eig.eigenvalues[i].abs() < min_val {
            min_val = eig.eigenvalues[i].abs();
            min_idx = i;
        }
    }
    let h: Vec<f64> = (0..9).map(|j| eig.eigenvectors[(j, min_idx)]).collect();
    let h_norm = Matrix3::new(h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], h[8]);

    let t_dst_inv = t_dst
        .try_inverse()
        .ok_or_else(|| Error::Runtime("degenerate normalization transform".into()))?;
    let h = t_dst_inv * h_norm * t_src;

    let scale = h[(2, 2)];
    if scale.abs() < 1e-15 {
        Ok(h)
    } else {
        Ok(h / scale)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn reference_h() -> Matrix3<f64> {
        Matrix3::new(
            3.5, 0.1, 640.0, //
            -0.05, 3.3, 480.0, //
            0.0001, -0.00005, 1.0,
        )
    }

    #[test]
    fn exact_fit_from_four_corners() {
        let h_true = reference_h();
        let src: Vec<_> = [(0.0, 0.0), (100.0, 0.0), (100.0, 100.0), (0.0, 100.0)]
            .iter()
            .map(|&(x, y)| Vector2::new(x, y))
            .collect();
        let dst: Vec<_> = src.iter().map(|&p| apply(&h_true, p)).collect();

        let h = estimate_homography_dlt(&src, &dst).unwrap();
        for (s, d) in src.iter().zip(&dst) {
            let q = apply(&h, *s);
            assert_relative_eq!(q.x, d.x, epsilon = 1e-6);
            assert_relative_eq!(q.y, d.y, epsilon = 1e-6);
        }
    }

    #[test]
    fn fit_is_order_insensitive() {
        // The 4-point fit determines the same map regardless of how the
        // correspondence list is ordered, as long as pairs stay aligned.
        let h_true = reference_h();
        let src: Vec<_> = [(0.0, 0.0), (63.0, 0.0), (63.0, 63.0), (0.0, 63.0)]
            .iter()
            .map(|&(x, y)| Vector2::new(x, y))
            .collect();
        let dst: Vec<_> = src.iter().map(|&p| apply(&h_true, p)).collect();

        let shuffled = [2usize, 0, 3, 1];
        let src2: Vec<_> = shuffled.iter().map(|&i| src[i]).collect();
        let dst2: Vec<_> = shuffled.iter().map(|&i| dst[i]).collect();

        let h1 = estimate_homography_dlt(&src, &dst).unwrap();
        let h2 = estimate_homography_dlt(&src2, &dst2).unwrap();
        for &p in &src {
            let q1 = apply(&h1, p);
            let q2 = apply(&h2, p);
            assert_relative_eq!(q1.x, q2.x, epsilon = 1e-8);
            assert_relative_eq!(q1.y, q2.y, epsilon = 1e-8);
        }
    }

    #[test]
    fn too_few_points_is_an_error() {
        let pts = vec![Vector2::new(0.0, 0.0); 3];
        assert!(estimate_homography_dlt(&pts, &pts).is_err());
    }
}
