use nalgebra::Matrix3;

/// Destination-plane placement relative to world axes.
///
/// `z` is the depth-sweep variable; the remaining components are user-chosen
/// shifts and rotations (degrees) and are typically zero.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PlanePose {
    pub xs: f64,
    pub ys: f64,
    pub z: f64,
    pub rx: f64,
    pub ry: f64,
    pub rz: f64,
}

impl PlanePose {
    pub fn at_depth(z: f64) -> Self {
        Self {
            z,
            ..Self::default()
        }
    }

    pub fn with_rotation(z: f64, rx: f64, ry: f64, rz: f64) -> Self {
        Self {
            z,
            rx,
            ry,
            rz,
            ..Self::default()
        }
    }
}

/// Canonical mapping between destination pixels and physical plane
/// coordinates: D = diag(s, ±s, 1) with the principal point at the image
/// center. Invert-y flips the vertical axis for calibrations with an
/// upward-positive world y.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PixelScale {
    pub scale: f64,
    pub width: usize,
    pub height: usize,
    pub invert_y: bool,
}

impl PixelScale {
    pub fn new(scale: f64, width: usize, height: usize, invert_y: bool) -> Self {
        Self {
            scale,
            width,
            height,
            invert_y,
        }
    }

    /// D: plane coordinates → destination pixels.
    pub fn plane_to_pixel(&self) -> Matrix3<f64> {
        let sy = if self.invert_y {
            -self.scale
        } else {
            self.scale
        };
        Matrix3::new(
            self.scale,
            0.0,
            self.width as f64 * 0.5,
            0.0,
            sy,
            self.height as f64 * 0.5,
            0.0,
            0.0,
            1.0,
        )
    }

    /// D⁻¹: destination pixels → plane coordinates.
    pub fn pixel_to_plane(&self) -> Matrix3<f64> {
        let sy = if self.invert_y {
            -self.scale
        } else {
            self.scale
        };
        Matrix3::new(
            1.0 / self.scale,
            0.0,
            -(self.width as f64) * 0.5 / self.scale,
            0.0,
            1.0 / sy,
            -(self.height as f64) * 0.5 / sy,
            0.0,
            0.0,
            1.0,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::Vector3;

    #[test]
    fn pixel_plane_roundtrip() {
        for invert in [false, true] {
            let ps = PixelScale::new(12.5, 1280, 800, invert);
            let d = ps.plane_to_pixel();
            let dinv = ps.pixel_to_plane();
            let px = Vector3::new(431.0, 212.0, 1.0);
            let back = d * (dinv * px);
            assert_relative_eq!(back.x, px.x, epsilon = 1e-9);
            assert_relative_eq!(back.y, px.y, epsilon = 1e-9);
            assert_relative_eq!(back.z, 1.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn image_center_maps_to_plane_origin() {
        let ps = PixelScale::new(4.0, 64, 48, false);
        let q = ps.pixel_to_plane() * Vector3::new(32.0, 24.0, 1.0);
        assert_relative_eq!(q.x, 0.0);
        assert_relative_eq!(q.y, 0.0);
    }

    #[test]
    fn invert_y_flips_vertical_axis() {
        let ps = PixelScale::new(1.0, 10, 10, true);
        let q = ps.pixel_to_plane() * Vector3::new(5.0, 7.0, 1.0);
        assert_relative_eq!(q.y, -2.0);
    }
}
