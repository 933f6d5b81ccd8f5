//! Refocus-map generation: where each destination-plane pixel samples from
//! in a camera's source image.
//!
//! Corner mode promotes the four image corners to world points on the sweep
//! plane, projects them (through the refractive solver when a wall is
//! present) and fits a 3×3 homography — exact for pinhole optics, an
//! approximation for refractive scenes with small rotations. Full mode
//! computes a dense per-pixel map instead.

use nalgebra::{Matrix3, Vector2, Vector3};
use rayon::prelude::*;
use sapiv_core::{CameraView, PixelScale, PlanePose, RefractiveGeometry, Result, SampleMap};
use sapiv_hal::RefractiveMapSpec;
use sapiv_optics::homography::estimate_homography_dlt;
use sapiv_optics::projection::{project, rotation_xyz_deg};
use sapiv_optics::refraction::{refract_point, SolverOptions};

/// How one camera's view is warped onto the destination plane: a cached
/// projective map, host-built dense sample coordinates, or a refractive map
/// recipe realized by the backend (on-device for the accelerator).
#[derive(Debug, Clone)]
pub enum RefocusMap {
    Homography(Matrix3<f64>),
    Dense(SampleMap),
    Refractive(RefractiveMapSpec),
}

/// Map generator for one destination-plane placement.
#[derive(Debug, Clone)]
pub struct MapBuilder {
    pub scale: PixelScale,
    pub pose: PlanePose,
    pub geometry: Option<RefractiveGeometry>,
    pub solver: SolverOptions,
    /// Legacy cylindrical curvature radius for pinhole dense maps.
    pub cylinder_radius: Option<f64>,
}

impl MapBuilder {
    /// Build the refocus map for one camera: corner homography (fast) or the
    /// per-pixel variant of the active optical model.
    pub fn build_map(&self, camera: &CameraView, corner: bool) -> Result<RefocusMap> {
        if corner {
            return Ok(RefocusMap::Homography(self.corner_homography(camera)?));
        }
        match self.geometry {
            Some(geom) => Ok(RefocusMap::Refractive(self.refractive_spec(camera, geom))),
            None => Ok(RefocusMap::Dense(self.dense_pinhole_map(camera))),
        }
    }

    /// The backend recipe for a dense refractive map of this plane.
    pub fn refractive_spec(
        &self,
        camera: &CameraView,
        geometry: RefractiveGeometry,
    ) -> RefractiveMapSpec {
        RefractiveMapSpec {
            width: self.scale.width,
            height: self.scale.height,
            pixel_to_plane: self.scale.pixel_to_plane(),
            rotation: self.rotation(),
            shift: self.shift(),
            p: camera.p,
            center: camera.center,
            geometry,
            tol: self.solver.tol,
            max_iters: self.solver.max_iters as u32,
        }
    }

    fn rotation(&self) -> Matrix3<f64> {
        rotation_xyz_deg(self.pose.rx, self.pose.ry, self.pose.rz)
    }

    fn shift(&self) -> Vector3<f64> {
        Vector3::new(self.pose.xs, self.pose.ys, self.pose.z)
    }

    /// Destination pixel → world point on the posed plane.
    fn plane_point(
        &self,
        px: f64,
        py: f64,
        dinv: &Matrix3<f64>,
        rot: &Matrix3<f64>,
    ) -> Vector3<f64> {
        let q = dinv * Vector3::new(px, py, 1.0);
        rot * Vector3::new(q.x, q.y, 0.0) + self.shift()
    }

    /// World point → source pixel, bending through the wall when refractive.
    fn source_pixel(&self, camera: &CameraView, world: &Vector3<f64>) -> Vector2<f64> {
        match &self.geometry {
            Some(geom) => {
                let r = refract_point(&camera.center, world, geom, &self.solver);
                project(&camera.p, &r.wall_point)
            }
            None => project(&camera.p, world),
        }
    }

    /// Fit the corner homography mapping source pixels → destination pixels.
    pub fn corner_homography(&self, camera: &CameraView) -> Result<Matrix3<f64>> {
        let w = (self.scale.width - 1) as f64;
        let h = (self.scale.height - 1) as f64;
        let corners = [
            Vector2::new(0.0, 0.0),
            Vector2::new(w, 0.0),
            Vector2::new(w, h),
            Vector2::new(0.0, h),
        ];

        let dinv = self.scale.pixel_to_plane();
        let rot = self.rotation();

        let mut src = Vec::with_capacity(4);
        for corner in &corners {
            let world = self.plane_point(corner.x, corner.y, &dinv, &rot);
            src.push(self.source_pixel(camera, &world));
        }

        estimate_homography_dlt(&src, &corners)
    }

    /// Dense pinhole map; the optional curvature term bulges the plane along
    /// x before projection.
    pub fn dense_pinhole_map(&self, camera: &CameraView) -> SampleMap {
        let (width, height) = (self.scale.width, self.scale.height);
        let dinv = self.scale.pixel_to_plane();
        let rot = self.rotation();
        let shift = self.shift();

        let mut map = SampleMap::zeros(width, height);
        map.x
            .par_chunks_mut(width)
            .zip(map.y.par_chunks_mut(width))
            .enumerate()
            .for_each(|(y, (row_x, row_y))| {
                for x in 0..width {
                    let q = dinv * Vector3::new(x as f64, y as f64, 1.0);
                    let mut world = rot * Vector3::new(q.x, q.y, 0.0) + shift;
                    if let Some(r) = self.cylinder_radius {
                        let s = (q.x / r).clamp(-1.0, 1.0);
                        world.z += r - r * s.asin().cos();
                    }
                    let px = project(&camera.p, &world);
                    row_x[x] = px.x as f32;
                    row_y[x] = px.y as f32;
                }
            });
        map
    }
}
