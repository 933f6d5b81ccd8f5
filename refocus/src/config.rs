use sapiv_core::{CalibrationSet, Error, Result};
use serde::{Deserialize, Serialize};

/// Exclusive view-combination operator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Composition {
    /// Arithmetic mean of the warped views.
    Mean,
    /// Element-wise product of views raised to `exponent`.
    Mult { exponent: f64 },
    /// Element-wise minimum along lines of sight.
    MinLos,
    /// Windowed non-linear contrast adjustment (exactly four views).
    Nlca { window: usize, delta: f64 },
    /// Single-pixel NLCA for peak-normalized inputs (exactly four views).
    NlcaFast { delta: f64 },
}

impl Default for Composition {
    fn default() -> Self {
        Self::Mean
    }
}

impl Composition {
    pub fn is_nlca(&self) -> bool {
        matches!(self, Self::Nlca { .. } | Self::NlcaFast { .. })
    }
}

/// Interpretation of the threshold argument passed to `refocus`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdMode {
    /// Zero out below the given [0, 1] intensity fraction.
    #[default]
    Absolute,
    /// Zero out below mean + t·stdev of the combined frame.
    StdevScaled,
}

/// Which frames of the ingested sequences take part in reconstruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FrameSelect {
    #[default]
    All,
    /// Inclusive [start, end], keeping every (skip+1)-th frame.
    Range {
        start: usize,
        end: usize,
        skip: usize,
    },
}

impl FrameSelect {
    /// Resolve to concrete frame indices given the available count.
    pub fn indices(&self, available: usize) -> Result<Vec<usize>> {
        match *self {
            FrameSelect::All => Ok((0..available).collect()),
            FrameSelect::Range { start, end, skip } => {
                if end >= available {
                    return Err(Error::Runtime(format!(
                        "end frame {end} is beyond the {available} available frames"
                    )));
                }
                if start > end {
                    return Err(Error::Config(format!(
                        "frame range start {start} is past end {end}"
                    )));
                }
                Ok((start..=end).step_by(skip + 1).collect())
            }
        }
    }
}

/// Newton-Raphson controls for the refractive solver.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverSettings {
    pub tol: f64,
    pub max_iters: u32,
}

impl Default for SolverSettings {
    fn default() -> Self {
        Self {
            tol: 1e-9,
            max_iters: 20,
        }
    }
}

/// Typed session configuration. Exclusivity of the composition operator is
/// structural; the remaining invariants are checked against the calibration
/// at session construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefocusConfig {
    pub use_accelerator: bool,
    /// Corner-homography refocus maps (fast) instead of dense per-pixel maps.
    pub corner_homography: bool,
    pub composition: Composition,
    pub threshold_mode: ThresholdMode,
    pub frames: FrameSelect,
    pub undistort: bool,
    pub resize_factor: Option<f32>,
    pub invert_y: bool,
    /// Expert: ingest 8-bit values without 1/255 normalization.
    pub integer_images: bool,
    /// Bypass thresholding entirely.
    pub benchmark_mode: bool,
    /// Expert passthrough for the external scene generator.
    pub particle_sigma: Option<f64>,
    pub solver: SolverSettings,
    /// Legacy cylindrical curvature term for pinhole dense maps; disabled by
    /// default.
    pub cylinder_radius: Option<f64>,
}

impl Default for RefocusConfig {
    fn default() -> Self {
        Self {
            use_accelerator: false,
            corner_homography: true,
            composition: Composition::default(),
            threshold_mode: ThresholdMode::default(),
            frames: FrameSelect::default(),
            undistort: false,
            resize_factor: None,
            invert_y: false,
            integer_images: false,
            benchmark_mode: false,
            particle_sigma: None,
            solver: SolverSettings::default(),
            cylinder_radius: None,
        }
    }
}

impl RefocusConfig {
    /// Invariants that involve the calibration; fatal at session init.
    pub fn validate_against(&self, calib: &CalibrationSet) -> Result<()> {
        if self.composition.is_nlca() && calib.num_cameras() != 4 {
            return Err(Error::Config(format!(
                "NLCA compositions support exactly 4 cameras, calibration has {}",
                calib.num_cameras()
            )));
        }
        if let Composition::Nlca { window, .. } = self.composition {
            if window == 0 || calib.img_width % window != 0 || calib.img_height % window != 0 {
                return Err(Error::Config(format!(
                    "NLCA window {} must divide image dimensions {}x{}",
                    window, calib.img_width, calib.img_height
                )));
            }
        }
        if let Some(rf) = self.resize_factor {
            if !(rf.is_finite() && rf > 0.0) {
                return Err(Error::Config(format!("invalid resize factor {rf}")));
            }
        }
        if !(self.solver.tol > 0.0) || self.solver.max_iters == 0 {
            return Err(Error::Config(
                "solver tolerance and iteration cap must be positive".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::{Matrix3x4, Vector3};
    use sapiv_core::CameraView;

    fn calib(num_cams: usize, w: usize, h: usize) -> CalibrationSet {
        let cams = (0..num_cams)
            .map(|i| {
                CameraView::new(
                    format!("cam{i}"),
                    Matrix3x4::identity(),
                    Vector3::zeros(),
                )
            })
            .collect();
        CalibrationSet::new(w, h, 1.0, cams, None).unwrap()
    }

    #[test]
    fn nlca_requires_four_cameras() {
        let cfg = RefocusConfig {
            composition: Composition::Nlca {
                window: 8,
                delta: 0.1,
            },
            ..Default::default()
        };
        assert!(cfg.validate_against(&calib(3, 64, 64)).is_err());
        assert!(cfg.validate_against(&calib(4, 64, 64)).is_ok());
    }

    #[test]
    fn nlca_window_must_divide_dimensions() {
        let cfg = RefocusConfig {
            composition: Composition::Nlca {
                window: 10,
                delta: 0.1,
            },
            ..Default::default()
        };
        assert!(cfg.validate_against(&calib(4, 64, 64)).is_err());
        assert!(cfg.validate_against(&calib(4, 60, 40)).is_ok());
    }

    #[test]
    fn frame_selection_bounds() {
        let sel = FrameSelect::Range {
            start: 2,
            end: 8,
            skip: 1,
        };
        assert_eq!(sel.indices(10).unwrap(), vec![2, 4, 6, 8]);
        assert!(matches!(
            sel.indices(8),
            Err(Error::Runtime(_))
        ));
        assert_eq!(FrameSelect::All.indices(3).unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn config_round_trips_through_yaml() {
        let cfg = RefocusConfig {
            composition: Composition::Mult { exponent: 1.5 },
            threshold_mode: ThresholdMode::StdevScaled,
            frames: FrameSelect::Range {
                start: 0,
                end: 4,
                skip: 0,
            },
            ..Default::default()
        };
        let text = serde_yaml::to_string(&cfg).unwrap();
        let back: RefocusConfig = serde_yaml::from_str(&text).unwrap();
        assert_eq!(back, cfg);
    }
}
