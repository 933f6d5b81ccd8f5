//! Synthetic-aperture particle tracking velocimetry reconstruction.
//!
//! `sapiv` refocuses simultaneously captured multi-camera images of a
//! particle-seeded volume onto arbitrary depth planes, with pinhole or
//! three-medium refractive optics and a choice of view-combination
//! operators, on a CPU or GPU compute backend.

pub use sapiv_calib as calib;
pub use sapiv_core as core;
pub use sapiv_hal as hal;
pub use sapiv_optics as optics;
pub use sapiv_refocus as refocus;

pub use sapiv_calib::{load_calibration, parse_calibration};
pub use sapiv_core::{CalibrationSet, CameraView, Frame, PlanePose, RefractiveGeometry};
pub use sapiv_refocus::{Composition, RefocusConfig, Session, ThresholdMode};

use rayon::ThreadPoolBuilder;
use std::env;
use std::sync::OnceLock;

static THREAD_POOL_INIT: OnceLock<Result<(), String>> = OnceLock::new();

/// Initialize a single global Rayon thread pool for all CPU-parallel
/// routines.
///
/// Call once at application startup before heavy reconstruction work.
/// Repeated calls are idempotent and return the first initialization result.
///
/// Priority order:
/// 1. explicit `num_threads`
/// 2. `SAPIV_CPU_THREADS` env var
/// 3. Rayon default
pub fn init_thread_pool(num_threads: Option<usize>) -> Result<(), String> {
    let res = THREAD_POOL_INIT.get_or_init(|| {
        let configured_threads = match num_threads {
            Some(n) => Some(n),
            None => read_cpu_threads_from_env()?,
        };
        let mut builder = ThreadPoolBuilder::new();
        if let Some(n) = configured_threads {
            builder = builder.num_threads(n);
        }
        builder.build_global().map_err(|e| e.to_string())
    });
    res.clone()
}

fn read_cpu_threads_from_env() -> Result<Option<usize>, String> {
    let raw = match env::var("SAPIV_CPU_THREADS") {
        Ok(v) => v,
        Err(env::VarError::NotPresent) => return Ok(None),
        Err(e) => return Err(format!("failed to read SAPIV_CPU_THREADS: {e}")),
    };

    let parsed: usize = raw
        .parse()
        .map_err(|_| format!("SAPIV_CPU_THREADS must be a positive integer, got '{raw}'"))?;
    if parsed == 0 {
        return Err("SAPIV_CPU_THREADS must be >= 1".to_string());
    }
    Ok(Some(parsed))
}

/// Install an env-filtered fmt subscriber for examples and ad-hoc runs.
/// The library itself only emits `tracing` events.
pub fn init_logging() {
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = fmt::layer().with_target(false);

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init();
}
