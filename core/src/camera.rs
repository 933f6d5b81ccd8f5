use crate::{Error, Result};
use nalgebra::{Matrix3x4, Vector3, Vector4};

/// A single calibrated view: 3×4 projection matrix and world camera center.
///
/// Constructed once at calibration load and immutable thereafter. The matrix
/// and center are redundant (the center spans the right null-space of P up to
/// scale); legacy calibration files carry rounded centers, so the relation is
/// checkable but not enforced.
#[derive(Debug, Clone, PartialEq)]
pub struct CameraView {
    pub name: String,
    pub p: Matrix3x4<f64>,
    pub center: Vector3<f64>,
}

impl CameraView {
    pub fn new(name: impl Into<String>, p: Matrix3x4<f64>, center: Vector3<f64>) -> Self {
        Self {
            name: name.into(),
            p,
            center,
        }
    }

    /// ‖P·c̃‖ normalized by ‖P‖; near zero for a consistent matrix/center pair.
    pub fn consistency_residual(&self) -> f64 {
        let c = Vector4::new(self.center.x, self.center.y, self.center.z, 1.0);
        let norm = self.p.norm();
        if norm <= f64::EPSILON {
            return f64::INFINITY;
        }
        (self.p * c).norm() / norm
    }
}

/// Planar three-medium geometry: camera side, wall slab, working fluid.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RefractiveGeometry {
    /// z-coordinate of the front (camera-side) wall face.
    pub z_wall: f64,
    /// Wall thickness along z.
    pub thickness: f64,
    /// Index on the camera side (air).
    pub n1: f64,
    /// Index of the wall material (glass).
    pub n2: f64,
    /// Index of the working fluid (water).
    pub n3: f64,
}

impl RefractiveGeometry {
    pub fn validate(&self) -> Result<()> {
        if !(self.thickness > 0.0) {
            return Err(Error::Config(format!(
                "wall thickness must be positive, got {}",
                self.thickness
            )));
        }
        for (label, n) in [("n1", self.n1), ("n2", self.n2), ("n3", self.n3)] {
            if !(n > 0.0) {
                return Err(Error::Config(format!(
                    "refractive index {label} must be positive, got {n}"
                )));
            }
        }
        Ok(())
    }

    /// z of the back (fluid-side) wall face.
    pub fn z_back(&self) -> f64 {
        self.z_wall + self.thickness
    }
}

/// Immutable calibration for one scene: image geometry, camera set and
/// optional refractive geometry. Presence of `geometry` selects the
/// refractive optical model.
#[derive(Debug, Clone)]
pub struct CalibrationSet {
    pub timestamp: String,
    pub mean_reprojection_error: f64,
    pub img_width: usize,
    pub img_height: usize,
    /// Pixels per physical unit on the reconstruction plane.
    pub scale: f64,
    pub cameras: Vec<CameraView>,
    pub geometry: Option<RefractiveGeometry>,
}

impl CalibrationSet {
    pub fn new(
        img_width: usize,
        img_height: usize,
        scale: f64,
        cameras: Vec<CameraView>,
        geometry: Option<RefractiveGeometry>,
    ) -> Result<Self> {
        let set = Self {
            timestamp: String::new(),
            mean_reprojection_error: 0.0,
            img_width,
            img_height,
            scale,
            cameras,
            geometry,
        };
        set.validate()?;
        Ok(set)
    }

    pub fn validate(&self) -> Result<()> {
        if self.img_width == 0 || self.img_height == 0 {
            return Err(Error::Config("image dimensions must be non-zero".into()));
        }
        if !(self.scale.is_finite() && self.scale != 0.0) {
            return Err(Error::Config(format!("invalid pixel scale {}", self.scale)));
        }
        for (i, a) in self.cameras.iter().enumerate() {
            for b in self.cameras.iter().skip(i + 1) {
                if a.name == b.name {
                    return Err(Error::Config(format!(
                        "camera name clash detected: \"{}\" appears more than once",
                        a.name
                    )));
                }
            }
        }
        if let Some(geom) = &self.geometry {
            geom.validate()?;
        }
        Ok(())
    }

    pub fn num_cameras(&self) -> usize {
        self.cameras.len()
    }

    pub fn is_refractive(&self) -> bool {
        self.geometry.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Matrix3x4;

    fn pinhole_at(cx: f64, cy: f64, cz: f64) -> CameraView {
        // P = [I | -c], K = I
        let p = Matrix3x4::new(
            1.0, 0.0, 0.0, -cx, //
            0.0, 1.0, 0.0, -cy, //
            0.0, 0.0, 1.0, -cz,
        );
        CameraView::new("cam", p, Vector3::new(cx, cy, cz))
    }

    #[test]
    fn consistent_center_has_tiny_residual() {
        let cam = pinhole_at(3.0, -2.0, -100.0);
        assert!(cam.consistency_residual() < 1e-12);
    }

    #[test]
    fn perturbed_center_is_detected() {
        let mut cam = pinhole_at(3.0, -2.0, -100.0);
        cam.center.x += 0.5;
        assert!(cam.consistency_residual() > 1e-3);
    }

    #[test]
    fn name_clash_is_fatal() {
        // Both helpers produce the name "cam".
        let a = pinhole_at(0.0, 0.0, -10.0);
        let b = pinhole_at(1.0, 0.0, -10.0);
        let err = CalibrationSet::new(64, 64, 1.0, vec![a, b], None).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn geometry_validation() {
        let bad = RefractiveGeometry {
            z_wall: 0.0,
            thickness: 0.0,
            n1: 1.0,
            n2: 1.5,
            n3: 1.33,
        };
        assert!(bad.validate().is_err());

        let good = RefractiveGeometry {
            thickness: 5.0,
            ..bad
        };
        assert!(good.validate().is_ok());
        assert_eq!(good.z_back(), 5.0);
    }
}
