//! Pinhole projection primitives: 3×4 matrix projection, closed-form
//! back-projection onto a fixed-depth plane, and the plane rotation builder.

use nalgebra::{Matrix2, Matrix3, Matrix3x4, Vector2, Vector3, Vector4};

/// Project a world point through a 3×4 projection matrix.
///
/// Returns homogeneous pixel coordinates divided by the w-component. Points
/// on the principal plane (w ≈ 0) yield non-finite coordinates, which the
/// samplers treat as out-of-image.
#[inline]
pub fn project(p: &Matrix3x4<f64>, x: &Vector3<f64>) -> Vector2<f64> {
    let q = p * Vector4::new(x.x, x.y, x.z, 1.0);
    Vector2::new(q.x / q.z, q.y / q.z)
}

/// Invert the projection at a known depth: find the world point on the plane
/// z = depth that projects to `pixel`.
///
/// Solves the two linear equations obtained by eliminating the projective
/// scale from P·[x y depth 1]ᵀ = λ·[u v 1]ᵀ. Returns `None` when the plane is
/// viewed edge-on (singular 2×2 system).
pub fn back_project(p: &Matrix3x4<f64>, pixel: Vector2<f64>, depth: f64) -> Option<Vector3<f64>> {
    let (u, v) = (pixel.x, pixel.y);

    let a = Matrix2::new(
        p[(0, 0)] - u * p[(2, 0)],
        p[(0, 1)] - u * p[(2, 1)],
        p[(1, 0)] - v * p[(2, 0)],
        p[(1, 1)] - v * p[(2, 1)],
    );
    let b = Vector2::new(
        u * (p[(2, 2)] * depth + p[(2, 3)]) - (p[(0, 2)] * depth + p[(0, 3)]),
        v * (p[(2, 2)] * depth + p[(2, 3)]) - (p[(1, 2)] * depth + p[(1, 3)]),
    );

    let inv = a.try_inverse()?;
    let xy = inv * b;
    Some(Vector3::new(xy.x, xy.y, depth))
}

/// Rotation of the destination plane from Euler angles in degrees, fixed
/// composition order X·Y·Z.
pub fn rotation_xyz_deg(rx: f64, ry: f64, rz: f64) -> Matrix3<f64> {
    let (rx, ry, rz) = (rx.to_radians(), ry.to_radians(), rz.to_radians());

    let (sx, cx) = rx.sin_cos();
    let (sy, cy) = ry.sin_cos();
    let (sz, cz) = rz.sin_cos();

    let mx = Matrix3::new(1.0, 0.0, 0.0, 0.0, cx, -sx, 0.0, sx, cx);
    let my = Matrix3::new(cy, 0.0, sy, 0.0, 1.0, 0.0, -sy, 0.0, cy);
    let mz = Matrix3::new(cz, -sz, 0.0, sz, cz, 0.0, 0.0, 0.0, 1.0);

    mx * my * mz
}
