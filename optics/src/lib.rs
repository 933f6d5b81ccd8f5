pub mod distortion;
pub mod homography;
pub mod projection;
pub mod refraction;

pub use distortion::{CameraIntrinsics, LensDistortion, LensModel};
pub use homography::estimate_homography_dlt;
pub use projection::{back_project, project, rotation_xyz_deg};
pub use refraction::{refract_point, refract_points, Refraction, SolverOptions};

pub type Error = sapiv_core::Error;
pub type Result<T> = sapiv_core::Result<T>;
