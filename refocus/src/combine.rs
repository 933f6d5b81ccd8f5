//! View combination: fold warped per-camera frames under the active
//! composition operator, in camera-index order, then apply the threshold
//! policy. Written once against the backend trait.

use crate::config::{Composition, ThresholdMode};
use sapiv_core::{Error, Result};
use sapiv_hal::ComputeContext;

/// Fold the warped views into one reconstructed plane.
pub fn compose<C: ComputeContext>(
    ctx: &C,
    warped: &[C::Frame],
    width: usize,
    height: usize,
    composition: &Composition,
) -> Result<C::Frame> {
    if warped.is_empty() {
        return Err(Error::Config("no views to combine".into()));
    }

    match *composition {
        Composition::Mean => {
            let factor = 1.0 / warped.len() as f32;
            let mut acc = ctx.zeros(width, height)?;
            for view in warped {
                ctx.scale_add(&mut acc, view, factor)?;
            }
            Ok(acc)
        }
        Composition::Mult { exponent } => {
            let mut acc = ctx.zeros(width, height)?;
            for (i, view) in warped.iter().enumerate() {
                ctx.mul_pow(&mut acc, view, exponent as f32, i == 0)?;
            }
            Ok(acc)
        }
        Composition::MinLos => {
            let mut acc = ctx.zeros(width, height)?;
            for (i, view) in warped.iter().enumerate() {
                ctx.min_fold(&mut acc, view, i == 0)?;
            }
            Ok(acc)
        }
        Composition::Nlca { window, delta } => {
            Ok(ctx.nlca(warped, window, delta as f32)?)
        }
        Composition::NlcaFast { delta } => Ok(ctx.nlca_fast(warped, delta as f32)?),
    }
}

/// Post-combination thresholding. NLCA outputs and benchmark runs skip this
/// at the call site.
pub fn apply_threshold<C: ComputeContext>(
    ctx: &C,
    frame: &mut C::Frame,
    mode: ThresholdMode,
    thresh: f64,
) -> Result<()> {
    let cutoff = match mode {
        ThresholdMode::Absolute => thresh as f32,
        ThresholdMode::StdevScaled => {
            let (mean, stdev) = ctx.mean_stdev(frame)?;
            mean + thresh as f32 * stdev
        }
    };
    ctx.threshold_to_zero(frame, cutoff)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use sapiv_core::Frame;
    use sapiv_hal::CpuBackend;

    fn frames(values: &[&[f32]]) -> Vec<Frame> {
        values
            .iter()
            .map(|v| Frame::from_vec(v.len(), 1, v.to_vec()).unwrap())
            .collect()
    }

    #[test]
    fn mean_is_arithmetic_average() {
        let cpu = CpuBackend::new();
        let views = frames(&[&[0.2, 0.4], &[0.6, 0.0]]);
        let out = compose(&cpu, &views, 2, 1, &Composition::Mean).unwrap();
        assert_relative_eq!(out.get(0, 0), 0.4);
        assert_relative_eq!(out.get(1, 0), 0.2);
    }

    #[test]
    fn mult_of_identical_views_is_a_power() {
        let cpu = CpuBackend::new();
        let views = frames(&[&[0.5], &[0.5], &[0.5], &[0.5]]);
        let out = compose(&cpu, &views, 1, 1, &Composition::Mult { exponent: 1.0 }).unwrap();
        assert_relative_eq!(out.get(0, 0), 0.0625, epsilon = 1e-6);
    }

    #[test]
    fn minlos_is_bounded_by_mean() {
        let cpu = CpuBackend::new();
        let views = frames(&[&[0.9, 0.1, 0.5], &[0.3, 0.7, 0.5]]);
        let mean = compose(&cpu, &views, 3, 1, &Composition::Mean).unwrap();
        let min = compose(&cpu, &views, 3, 1, &Composition::MinLos).unwrap();
        for i in 0..3 {
            assert!(min.get(i, 0) <= mean.get(i, 0) + 1e-7);
        }
    }

    #[test]
    fn absolute_threshold_is_idempotent() {
        let cpu = CpuBackend::new();
        let mut a = Frame::from_vec(4, 1, vec![0.1, 0.3, 0.6, 0.9]).unwrap();
        apply_threshold(&cpu, &mut a, ThresholdMode::Absolute, 0.5).unwrap();
        let once = a.clone();
        apply_threshold(&cpu, &mut a, ThresholdMode::Absolute, 0.5).unwrap();
        assert_eq!(a, once);
        assert_eq!(once.as_slice(), &[0.0, 0.0, 0.6, 0.9]);
    }

    #[test]
    fn stdev_threshold_uses_frame_statistics() {
        let cpu = CpuBackend::new();
        // mean = 0.5, stdev = 0.25 over {0.25, 0.75}.
        let mut a = Frame::from_vec(2, 1, vec![0.25, 0.75]).unwrap();
        apply_threshold(&cpu, &mut a, ThresholdMode::StdevScaled, 0.5).unwrap();
        // cutoff = 0.5 + 0.5 * 0.25 = 0.625
        assert_eq!(a.as_slice(), &[0.0, 0.75]);
    }
}
