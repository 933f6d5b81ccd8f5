//! Brown-Conrady lens model and undistortion map construction, used by the
//! opt-in `undistort` ingestion path.

use nalgebra::Vector2;
use rayon::prelude::*;
use sapiv_core::SampleMap;

/// Pinhole intrinsics in pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraIntrinsics {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
}

impl CameraIntrinsics {
    #[inline]
    pub fn pixel_to_normalized(&self, p: Vector2<f64>) -> Vector2<f64> {
        Vector2::new((p.x - self.cx) / self.fx, (p.y - self.cy) / self.fy)
    }

    #[inline]
    pub fn normalized_to_pixel(&self, n: Vector2<f64>) -> Vector2<f64> {
        Vector2::new(self.fx * n.x + self.cx, self.fy * n.y + self.cy)
    }
}

/// Radial-tangential distortion coefficients.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LensDistortion {
    pub k1: f64,
    pub k2: f64,
    pub p1: f64,
    pub p2: f64,
    pub k3: f64,
}

impl LensDistortion {
    /// Apply distortion to normalized coordinates.
    pub fn apply(&self, n: Vector2<f64>) -> Vector2<f64> {
        let (x, y) = (n.x, n.y);
        let r2 = x * x + y * y;
        let r4 = r2 * r2;
        let r6 = r4 * r2;
        let radial = 1.0 + self.k1 * r2 + self.k2 * r4 + self.k3 * r6;
        let x_tan = 2.0 * self.p1 * x * y + self.p2 * (r2 + 2.0 * x * x);
        let y_tan = self.p1 * (r2 + 2.0 * y * y) + 2.0 * self.p2 * x * y;
        Vector2::new(x * radial + x_tan, y * radial + y_tan)
    }
}

/// Complete per-camera lens model for the expert undistortion path.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LensModel {
    pub intrinsics: CameraIntrinsics,
    pub distortion: LensDistortion,
}

impl LensModel {
    /// Dense remap map: for each undistorted output pixel, the distorted
    /// source-pixel coordinates to sample. Remapping a raw image through this
    /// map yields the undistorted image.
    pub fn undistort_map(&self, width: usize, height: usize) -> SampleMap {
        let mut map = SampleMap::zeros(width, height);
        map.x
            .par_chunks_mut(width)
            .zip(map.y.par_chunks_mut(width))
            .enumerate()
            .for_each(|(y, (row_x, row_y))| {
                for x in 0..width {
                    let n = self
                        .intrinsics
                        .pixel_to_normalized(Vector2::new(x as f64, y as f64));
                    let d = self.distortion.apply(n);
                    let src = self.intrinsics.normalized_to_pixel(d);
                    row_x[x] = src.x as f32;
                    row_y[x] = src.y as f32;
                }
            });
        map
    }

    /// Iteratively invert the distortion for a single pixel.
    pub fn undistort_pixel(&self, distorted: Vector2<f64>) -> Vector2<f64> {
        let nd = self.intrinsics.pixel_to_normalized(distorted);
        let mut n = nd;
        for _ in 0..15 {
            let r2 = n.x * n.x + n.y * n.y;
            let r4 = r2 * r2;
            let r6 = r4 * r2;
            let radial =
                1.0 + self.distortion.k1 * r2 + self.distortion.k2 * r4 + self.distortion.k3 * r6;
            if radial.abs() < 1e-12 {
                break;
            }
            let x_tan = 2.0 * self.distortion.p1 * n.x * n.y
                + self.distortion.p2 * (r2 + 2.0 * n.x * n.x);
            let y_tan = self.distortion.p1 * (r2 + 2.0 * n.y * n.y)
                + 2.0 * self.distortion.p2 * n.x * n.y;
            let next = Vector2::new((nd.x - x_tan) / radial, (nd.y - y_tan) / radial);
            let delta = (next - n).norm();
            n = next;
            if delta <= 1e-12 {
                break;
            }
        }
        self.intrinsics.normalized_to_pixel(n)
    }
}
