use crate::Result;
use nalgebra::{Matrix3, Matrix3x4, Vector3};
use sapiv_core::{Frame, RefractiveGeometry, SampleMap};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    Cpu,
    Accelerator,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Cpu => write!(f, "CPU"),
            BackendKind::Accelerator => write!(f, "accelerator"),
        }
    }
}

/// Everything a backend needs to build and apply a dense refractive refocus
/// map for one (camera, plane) pair without further host round-trips.
#[derive(Debug, Clone)]
pub struct RefractiveMapSpec {
    pub width: usize,
    pub height: usize,
    /// Destination pixels → physical plane coordinates (D⁻¹).
    pub pixel_to_plane: Matrix3<f64>,
    /// Plane rotation R(rx, ry, rz).
    pub rotation: Matrix3<f64>,
    /// Plane translation (xs, ys, z).
    pub shift: Vector3<f64>,
    pub p: Matrix3x4<f64>,
    pub center: Vector3<f64>,
    pub geometry: RefractiveGeometry,
    pub tol: f64,
    pub max_iters: u32,
}

/// The numeric contract shared by the CPU and accelerator backends.
///
/// The reconstruction algorithm is written once against this trait; a
/// backend supplies device-resident frames and the warp/fold/threshold
/// operations on them. All frames are single-channel f32 of one fixed size
/// per session.
pub trait ComputeContext: Send + Sync {
    type Frame: Clone + Send;

    fn kind(&self) -> BackendKind;

    fn upload(&self, frame: &Frame) -> Result<Self::Frame>;

    fn download(&self, frame: &Self::Frame) -> Result<Frame>;

    fn zeros(&self, width: usize, height: usize) -> Result<Self::Frame>;

    /// Warp with a homography mapping source pixels → destination pixels;
    /// the backend samples the source bilinearly at H⁻¹·dst. Out-of-image
    /// samples are zero; output size equals input size.
    fn warp_perspective(&self, src: &Self::Frame, h: &Matrix3<f64>) -> Result<Self::Frame>;

    /// Bilinear resample through a dense sample map.
    fn remap(&self, src: &Self::Frame, map: &SampleMap) -> Result<Self::Frame>;

    /// Build the dense refractive map for `spec` and apply it in one pass,
    /// keeping intermediates on the device.
    fn refract_remap(&self, src: &Self::Frame, spec: &RefractiveMapSpec) -> Result<Self::Frame>;

    /// acc += view · factor
    fn scale_add(&self, acc: &mut Self::Frame, view: &Self::Frame, factor: f32) -> Result<()>;

    /// acc = view^e on the first view, acc ·= view^e afterwards.
    fn mul_pow(
        &self,
        acc: &mut Self::Frame,
        view: &Self::Frame,
        exponent: f32,
        first_view: bool,
    ) -> Result<()>;

    /// acc = view on the first view, acc = min(acc, view) afterwards.
    fn min_fold(&self, acc: &mut Self::Frame, view: &Self::Frame, first_view: bool) -> Result<()>;

    /// Windowed non-linear contrast adjustment over exactly four views.
    fn nlca(&self, views: &[Self::Frame], window: usize, delta: f32) -> Result<Self::Frame>;

    /// Single-pixel NLCA for peak-normalized inputs, exactly four views.
    fn nlca_fast(&self, views: &[Self::Frame], delta: f32) -> Result<Self::Frame>;

    /// Population mean and standard deviation of the frame.
    fn mean_stdev(&self, frame: &Self::Frame) -> Result<(f32, f32)>;

    /// Zero out values not strictly above `thresh`.
    fn threshold_to_zero(&self, frame: &mut Self::Frame, thresh: f32) -> Result<()>;

    /// Block until pending device work has finished.
    fn wait_idle(&self) -> Result<()>;
}

pub(crate) fn check_nlca_views(num_views: usize) -> Result<()> {
    if num_views != 4 {
        return Err(crate::Error::InvalidInput(format!(
            "NLCA requires exactly 4 views, got {num_views}"
        )));
    }
    Ok(())
}

pub(crate) fn check_nlca_window(width: usize, height: usize, window: usize) -> Result<()> {
    if window == 0 || width % window != 0 || height % window != 0 {
        return Err(crate::Error::InvalidInput(format!(
            "NLCA window {window} must divide image dimensions {width}x{height}"
        )));
    }
    Ok(())
}
