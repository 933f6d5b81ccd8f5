use crate::context::{
    check_nlca_views, check_nlca_window, BackendKind, ComputeContext, RefractiveMapSpec,
};
use crate::{Error, Result};
use nalgebra::{Matrix3, Vector3};
use rayon::prelude::*;
use sapiv_core::{Frame, SampleMap};
use sapiv_optics::refraction::{refract_point, SolverOptions};
use sapiv_optics::projection::project;
use tracing::warn;

/// Row-parallel f32 reference backend.
#[derive(Debug, Clone, Default)]
pub struct CpuBackend;

impl CpuBackend {
    pub fn new() -> Self {
        Self
    }

    /// Dense refractive map in f64, one Newton-Raphson solve per pixel.
    pub fn build_refractive_map(&self, spec: &RefractiveMapSpec) -> SampleMap {
        let mut map = SampleMap::zeros(spec.width, spec.height);
        let opts = SolverOptions {
            tol: spec.tol,
            max_iters: spec.max_iters as usize,
        };

        let failures: usize = map
            .x
            .par_chunks_mut(spec.width)
            .zip(map.y.par_chunks_mut(spec.width))
            .enumerate()
            .map(|(y, (row_x, row_y))| {
                let mut failed = 0usize;
                for x in 0..spec.width {
                    let q = spec.pixel_to_plane * Vector3::new(x as f64, y as f64, 1.0);
                    let world =
                        spec.rotation * Vector3::new(q.x, q.y, 0.0) + spec.shift;
                    let refr = refract_point(&spec.center, &world, &spec.geometry, &opts);
                    if !refr.converged {
                        failed += 1;
                    }
                    let px = project(&spec.p, &refr.wall_point);
                    row_x[x] = px.x as f32;
                    row_y[x] = px.y as f32;
                }
                failed
            })
            .sum();

        if failures > 0 {
            warn!(
                failures,
                total = spec.width * spec.height,
                "refractive map solves hit the iteration cap; last iterates kept"
            );
        }
        map
    }
}

impl ComputeContext for CpuBackend {
    type Frame = Frame;

    fn kind(&self) -> BackendKind {
        BackendKind::Cpu
    }

    fn upload(&self, frame: &Frame) -> Result<Frame> {
        Ok(frame.clone())
    }

    fn download(&self, frame: &Frame) -> Result<Frame> {
        Ok(frame.clone())
    }

    fn zeros(&self, width: usize, height: usize) -> Result<Frame> {
        Ok(Frame::zeros(width, height))
    }

    fn warp_perspective(&self, src: &Frame, h: &Matrix3<f64>) -> Result<Frame> {
        let hinv = h
            .try_inverse()
            .ok_or_else(|| Error::InvalidInput("homography is not invertible".into()))?;
        let (width, height) = (src.width(), src.height());

        let mut out = Frame::zeros(width, height);
        out.as_mut_slice()
            .par_chunks_mut(width)
            .enumerate()
            .for_each(|(y, row)| {
                for (x, v) in row.iter_mut().enumerate() {
                    let d = hinv * Vector3::new(x as f64, y as f64, 1.0);
                    let sx = (d.x / d.z) as f32;
                    let sy = (d.y / d.z) as f32;
                    *v = src.sample_bilinear(sx, sy);
                }
            });
        Ok(out)
    }

    fn remap(&self, src: &Frame, map: &SampleMap) -> Result<Frame> {
        if map.width != src.width() || map.height != src.height() {
            return Err(Error::InvalidInput(format!(
                "sample map {}x{} does not match frame {}x{}",
                map.width,
                map.height,
                src.width(),
                src.height()
            )));
        }
        let width = map.width;
        let mut out = Frame::zeros(map.width, map.height);
        out.as_mut_slice()
            .par_chunks_mut(width)
            .enumerate()
            .for_each(|(y, row)| {
                for (x, v) in row.iter_mut().enumerate() {
                    let i = y * width + x;
                    *v = src.sample_bilinear(map.x[i], map.y[i]);
                }
            });
        Ok(out)
    }

    fn refract_remap(&self, src: &Frame, spec: &RefractiveMapSpec) -> Result<Frame> {
        let map = self.build_refractive_map(spec);
        self.remap(src, &map)
    }

    fn scale_add(&self, acc: &mut Frame, view: &Frame, factor: f32) -> Result<()> {
        for (a, &v) in acc.as_mut_slice().iter_mut().zip(view.as_slice()) {
            *a += v * factor;
        }
        Ok(())
    }

    fn mul_pow(
        &self,
        acc: &mut Frame,
        view: &Frame,
        exponent: f32,
        first_view: bool,
    ) -> Result<()> {
        for (a, &v) in acc.as_mut_slice().iter_mut().zip(view.as_slice()) {
            let p = v.max(0.0).powf(exponent);
            *a = if first_view { p } else { *a * p };
        }
        Ok(())
    }

    fn min_fold(&self, acc: &mut Frame, view: &Frame, first_view: bool) -> Result<()> {
        for (a, &v) in acc.as_mut_slice().iter_mut().zip(view.as_slice()) {
            *a = if first_view { v } else { a.min(v) };
        }
        Ok(())
    }

    fn nlca(&self, views: &[Frame], window: usize, delta: f32) -> Result<Frame> {
        check_nlca_views(views.len())?;
        let (width, height) = (views[0].width(), views[0].height());
        check_nlca_window(width, height, window)?;

        let mut out = Frame::zeros(width, height);
        for wy in (0..height).step_by(window) {
            for wx in (0..width).step_by(window) {
                // Per-view structure inside this window.
                let mut maxima = [0.0f32; 4];
                for (m, view) in maxima.iter_mut().zip(views) {
                    for y in wy..wy + window {
                        for x in wx..wx + window {
                            *m = m.max(view.get(x, y));
                        }
                    }
                }
                let floor = maxima.iter().copied().fold(f32::INFINITY, f32::min);

                for y in wy..wy + window {
                    for x in wx..wx + window {
                        let mut prod = 1.0f32;
                        for (view, &m) in views.iter().zip(&maxima) {
                            prod *= (view.get(x, y) + delta) / (m + delta);
                        }
                        out.set(x, y, prod.max(0.0).powf(0.25) * floor);
                    }
                }
            }
        }
        Ok(out)
    }

    fn nlca_fast(&self, views: &[Frame], delta: f32) -> Result<Frame> {
        check_nlca_views(views.len())?;
        let (width, height) = (views[0].width(), views[0].height());

        let mut out = Frame::zeros(width, height);
        for i in 0..width * height {
            let mut prod = 1.0f32;
            for view in views {
                prod *= view.as_slice()[i] + delta;
            }
            out.as_mut_slice()[i] = (prod.max(0.0).powf(0.25) - delta).max(0.0);
        }
        Ok(out)
    }

    fn mean_stdev(&self, frame: &Frame) -> Result<(f32, f32)> {
        let n = frame.len() as f64;
        if n == 0.0 {
            return Err(Error::InvalidInput("empty frame".into()));
        }
        let mut sum = 0.0f64;
        let mut sumsq = 0.0f64;
        for &v in frame.as_slice() {
            sum += v as f64;
            sumsq += (v as f64) * (v as f64);
        }
        let mean = sum / n;
        let var = (sumsq / n - mean * mean).max(0.0);
        Ok((mean as f32, var.sqrt() as f32))
    }

    fn threshold_to_zero(&self, frame: &mut Frame, thresh: f32) -> Result<()> {
        for v in frame.as_mut_slice() {
            if *v <= thresh {
                *v = 0.0;
            }
        }
        Ok(())
    }

    fn wait_idle(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn ramp(width: usize, height: usize) -> Frame {
        let data = (0..width * height)
            .map(|i| i as f32 / (width * height) as f32)
            .collect();
        Frame::from_vec(width, height, data).unwrap()
    }

    #[test]
    fn identity_warp_is_lossless() {
        let cpu = CpuBackend::new();
        let src = ramp(16, 12);
        let out = cpu.warp_perspective(&src, &Matrix3::identity()).unwrap();
        assert_eq!(out, src);
    }

    #[test]
    fn translation_warp_shifts_content() {
        let cpu = CpuBackend::new();
        let mut src = Frame::zeros(8, 8);
        src.set(3, 4, 1.0);
        // H maps source → destination: shift content right by two pixels.
        let h = Matrix3::new(1.0, 0.0, 2.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0);
        let out = cpu.warp_perspective(&src, &h).unwrap();
        assert_relative_eq!(out.get(5, 4), 1.0);
        assert_relative_eq!(out.get(3, 4), 0.0);
    }

    #[test]
    fn remap_identity() {
        let cpu = CpuBackend::new();
        let src = ramp(9, 7);
        let mut map = SampleMap::zeros(9, 7);
        for y in 0..7 {
            for x in 0..9 {
                map.x[y * 9 + x] = x as f32;
                map.y[y * 9 + x] = y as f32;
            }
        }
        assert_eq!(cpu.remap(&src, &map).unwrap(), src);
    }

    #[test]
    fn fold_semantics() {
        let cpu = CpuBackend::new();
        let a = Frame::from_vec(2, 1, vec![0.2, 0.8]).unwrap();
        let b = Frame::from_vec(2, 1, vec![0.5, 0.4]).unwrap();

        let mut acc = Frame::zeros(2, 1);
        cpu.scale_add(&mut acc, &a, 0.5).unwrap();
        cpu.scale_add(&mut acc, &b, 0.5).unwrap();
        assert_relative_eq!(acc.get(0, 0), 0.35);
        assert_relative_eq!(acc.get(1, 0), 0.6);

        let mut acc = Frame::zeros(2, 1);
        cpu.mul_pow(&mut acc, &a, 1.0, true).unwrap();
        cpu.mul_pow(&mut acc, &b, 1.0, false).unwrap();
        assert_relative_eq!(acc.get(0, 0), 0.1, epsilon = 1e-6);

        let mut acc = Frame::zeros(2, 1);
        cpu.min_fold(&mut acc, &a, true).unwrap();
        cpu.min_fold(&mut acc, &b, false).unwrap();
        assert_relative_eq!(acc.get(0, 0), 0.2);
        assert_relative_eq!(acc.get(1, 0), 0.4);
    }

    #[test]
    fn first_view_mul_is_not_doubled() {
        let cpu = CpuBackend::new();
        let a = Frame::from_vec(1, 1, vec![0.5]).unwrap();
        let mut acc = Frame::zeros(1, 1);
        cpu.mul_pow(&mut acc, &a, 2.0, true).unwrap();
        assert_relative_eq!(acc.get(0, 0), 0.25);
    }

    #[test]
    fn threshold_to_zero_matches_contract() {
        let cpu = CpuBackend::new();
        let mut f = Frame::from_vec(3, 1, vec![0.1, 0.5, 0.9]).unwrap();
        cpu.threshold_to_zero(&mut f, 0.5).unwrap();
        assert_eq!(f.as_slice(), &[0.0, 0.0, 0.9]);
    }

    #[test]
    fn mean_stdev_of_constant_is_zero_spread() {
        let cpu = CpuBackend::new();
        let f = Frame::from_vec(4, 4, vec![0.25; 16]).unwrap();
        let (mean, stdev) = cpu.mean_stdev(&f).unwrap();
        assert_relative_eq!(mean, 0.25);
        assert_relative_eq!(stdev, 0.0);
    }

    #[test]
    fn nlca_rejects_bad_inputs() {
        let cpu = CpuBackend::new();
        let views = vec![Frame::zeros(8, 8); 3];
        assert!(cpu.nlca(&views, 4, 0.1).is_err());

        let views = vec![Frame::zeros(8, 8); 4];
        assert!(cpu.nlca(&views, 3, 0.1).is_err());
        assert!(cpu.nlca(&views, 4, 0.1).is_ok());
    }

    #[test]
    fn nlca_fast_suppresses_single_view_ghosts() {
        let cpu = CpuBackend::new();
        let mut bright = Frame::zeros(4, 4);
        bright.set(1, 1, 1.0);
        let dark = Frame::zeros(4, 4);

        // Only one view sees the particle: heavily suppressed.
        let views = vec![bright.clone(), dark.clone(), dark.clone(), dark];
        let out = cpu.nlca_fast(&views, 0.1).unwrap();
        assert!(out.get(1, 1) < 0.3);

        // All views agree: full intensity survives.
        let views = vec![bright.clone(), bright.clone(), bright.clone(), bright];
        let out = cpu.nlca_fast(&views, 0.1).unwrap();
        assert_relative_eq!(out.get(1, 1), 1.0, epsilon = 1e-6);
    }
}
