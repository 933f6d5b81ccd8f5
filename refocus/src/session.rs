//! Reconstruction session: owns the calibration, configuration and view
//! stacks, and drives map generation, warping and combination through a
//! compute backend.

use crate::combine::{apply_threshold, compose};
use crate::config::{Composition, RefocusConfig};
use crate::maps::{MapBuilder, RefocusMap};
use nalgebra::{Matrix3, Matrix3x4, Vector2, Vector3};
use sapiv_core::{
    CalibrationSet, CameraView, Error, Frame, PixelScale, PlanePose, Result, ViewSet,
};
use sapiv_hal::{BackendKind, ComputeContext, CpuBackend, GpuContext};
use sapiv_optics::distortion::LensModel;
use sapiv_optics::projection::project;
use sapiv_optics::refraction::{refract_point, SolverOptions};
use std::fmt::Write as _;
use tracing::{info, warn};

/// Expert image-weighting variants: pixels below the frame mean are replaced
/// with a negative fill so that non-supporting views actively suppress the
/// reconstruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeightingMode {
    /// Fill with the negated frame maximum.
    MaxScaled,
    /// Fill with the negated camera count.
    CameraCount,
}

type PoseKey = ([u64; 6], usize, usize);

/// Backend-generic reconstruction engine. `Session` wraps it for runtime
/// backend selection.
pub struct Engine<C: ComputeContext> {
    ctx: C,
    config: RefocusConfig,
    calib: CalibrationSet,
    views: ViewSet,
    /// Original sequence index of each selected frame, for stack naming.
    frame_labels: Vec<usize>,
    /// Device-resident frames, uploaded lazily per selected frame.
    device: Vec<Option<Vec<C::Frame>>>,
    lenses: Vec<Option<LensModel>>,
    pose: PlanePose,
    thresh: f64,
    active_frame: usize,
    h_cache: Option<(PoseKey, Vec<Matrix3<f64>>)>,
}

impl<C: ComputeContext> Engine<C> {
    pub fn with_backend(ctx: C, config: RefocusConfig, calib: CalibrationSet) -> Result<Self> {
        calib.validate()?;
        config.validate_against(&calib)?;
        let lenses = vec![None; calib.num_cameras()];
        info!(
            backend = %ctx.kind(),
            cameras = calib.num_cameras(),
            refractive = calib.is_refractive(),
            "reconstruction session created"
        );
        Ok(Self {
            ctx,
            config,
            calib,
            views: ViewSet::default(),
            frame_labels: Vec::new(),
            device: Vec::new(),
            lenses,
            pose: PlanePose::default(),
            thresh: 0.0,
            active_frame: 0,
            h_cache: None,
        })
    }

    // --- ingestion -------------------------------------------------------

    /// Convert raw 8-bit pixels per the session's normalization policy.
    pub fn frame_from_bytes(&self, width: usize, height: usize, data: &[u8]) -> Result<Frame> {
        if self.config.integer_images {
            Frame::from_u8_raw(width, height, data)
        } else {
            Frame::from_u8(width, height, data)
        }
    }

    /// Ingest per-camera frame stacks (already decoded and normalized).
    /// Applies frame selection, optional undistortion and optional resize.
    pub fn set_views(&mut self, stacks: Vec<Vec<Frame>>) -> Result<()> {
        if stacks.len() != self.calib.num_cameras() {
            return Err(Error::Io(format!(
                "got {} camera stacks for {} calibrated cameras",
                stacks.len(),
                self.calib.num_cameras()
            )));
        }
        // Enforce sync before selection.
        let all = ViewSet::new(stacks)?;
        let labels = self.config.frames.indices(all.num_frames())?;

        let mut selected = ViewSet::default();
        for cam in 0..all.num_cameras() {
            let mut stack = Vec::with_capacity(labels.len());
            for &t in &labels {
                let mut frame = all.frame(cam, t).clone();
                if self.config.undistort {
                    frame = self.undistort(cam, &frame)?;
                }
                if let Some(rf) = self.config.resize_factor {
                    frame = frame.resized(rf)?;
                }
                stack.push(frame);
            }
            selected.push_camera(stack)?;
        }

        self.device = vec![None; labels.len()];
        self.frame_labels = labels;
        self.views = selected;
        self.h_cache = None;
        self.active_frame = 0;
        Ok(())
    }

    /// Append a single camera view programmatically (one frame per camera).
    pub fn add_view(
        &mut self,
        name: impl Into<String>,
        frame: Frame,
        p: Matrix3x4<f64>,
        center: Vector3<f64>,
    ) -> Result<()> {
        self.calib.cameras.push(CameraView::new(name, p, center));
        self.calib.validate()?;
        self.views.push_camera(vec![frame])?;
        self.lenses.push(None);
        self.frame_labels = vec![0];
        self.device = vec![None];
        self.h_cache = None;
        Ok(())
    }

    pub fn clear_views(&mut self) {
        self.calib.cameras.clear();
        self.views.clear();
        self.lenses.clear();
        self.frame_labels.clear();
        self.device.clear();
        self.h_cache = None;
    }

    fn undistort(&self, cam: usize, frame: &Frame) -> Result<Frame> {
        let model = self.lenses[cam].as_ref().ok_or_else(|| {
            Error::Config(format!(
                "undistortion requested but camera {} has no lens model",
                self.calib.cameras[cam].name
            ))
        })?;
        let map = model.undistort_map(frame.width(), frame.height());
        Ok(CpuBackend::new().remap(frame, &map)?)
    }

    // --- setters / expert controls ---------------------------------------

    pub fn set_lens(&mut self, camera: usize, model: LensModel) -> Result<()> {
        if camera >= self.lenses.len() {
            return Err(Error::Config(format!("no camera {camera} to attach lens to")));
        }
        self.lenses[camera] = Some(model);
        Ok(())
    }

    pub fn set_scale(&mut self, pixels_per_unit: f64) {
        self.calib.scale = pixels_per_unit;
        self.h_cache = None;
    }

    pub fn set_depth(&mut self, z: f64) {
        self.pose.z = z;
    }

    pub fn set_shift(&mut self, xs: f64, ys: f64) {
        self.pose.xs = xs;
        self.pose.ys = ys;
    }

    pub fn set_rotation(&mut self, rx: f64, ry: f64, rz: f64) {
        self.pose.rx = rx;
        self.pose.ry = ry;
        self.pose.rz = rz;
    }

    pub fn set_threshold(&mut self, thresh: f64) {
        self.thresh = thresh;
    }

    pub fn set_active_frame(&mut self, frame: usize) -> Result<()> {
        if frame >= self.frame_labels.len() {
            return Err(Error::Runtime(format!(
                "frame {frame} is beyond the {} selected frames",
                self.frame_labels.len()
            )));
        }
        self.active_frame = frame;
        Ok(())
    }

    pub fn pose(&self) -> PlanePose {
        self.pose
    }

    pub fn num_cameras(&self) -> usize {
        self.calib.num_cameras()
    }

    pub fn num_frames(&self) -> usize {
        self.frame_labels.len()
    }

    pub fn frame_labels(&self) -> &[usize] {
        &self.frame_labels
    }

    pub fn backend(&self) -> BackendKind {
        self.ctx.kind()
    }

    pub fn config(&self) -> &RefocusConfig {
        &self.config
    }

    pub fn calibration(&self) -> &CalibrationSet {
        &self.calib
    }

    /// Clamp intensities above 1 down to 1.
    pub fn saturate_views(&mut self) {
        for stack in self.views.stacks_mut() {
            for frame in stack {
                for v in frame.as_mut_slice() {
                    if *v > 1.0 {
                        *v = 1.0;
                    }
                }
            }
        }
        self.invalidate_device();
    }

    /// Replace below-mean pixels with a negative fill (expert).
    pub fn weight_views(&mut self, mode: WeightingMode) {
        let n = self.calib.num_cameras() as f32;
        for stack in self.views.stacks_mut() {
            for frame in stack {
                let max = frame.max();
                if max > 1.0 {
                    warn!(
                        max,
                        "maximum intensity above 1; saturate before weighting for a clean result"
                    );
                }
                let mean = frame.mean();
                let fill = match mode {
                    WeightingMode::MaxScaled => -max,
                    WeightingMode::CameraCount => -n,
                };
                for v in frame.as_mut_slice() {
                    if *v < mean {
                        *v = fill;
                    }
                }
            }
        }
        self.invalidate_device();
    }

    fn invalidate_device(&mut self) {
        for slot in &mut self.device {
            *slot = None;
        }
    }

    // --- device residency -------------------------------------------------

    /// Upload one selected frame's views to the backend.
    pub fn upload_single(&mut self, frame: usize) -> Result<()> {
        if frame >= self.device.len() {
            return Err(Error::Runtime(format!(
                "frame {frame} is beyond the {} selected frames",
                self.device.len()
            )));
        }
        if self.device[frame].is_none() {
            let mut per_camera = Vec::with_capacity(self.views.num_cameras());
            for cam in 0..self.views.num_cameras() {
                per_camera.push(self.ctx.upload(self.views.frame(cam, frame))?);
            }
            self.device[frame] = Some(per_camera);
        }
        Ok(())
    }

    /// Upload every selected frame.
    pub fn upload_all(&mut self) -> Result<()> {
        for t in 0..self.device.len() {
            self.upload_single(t)?;
        }
        Ok(())
    }

    // --- reconstruction ---------------------------------------------------

    fn dims(&self) -> Result<(usize, usize)> {
        self.views
            .dims()
            .ok_or_else(|| Error::Config("no views have been ingested".into()))
    }

    fn pixel_scale(&self, width: usize, height: usize) -> PixelScale {
        let mut scale = self.calib.scale;
        if let Some(rf) = self.config.resize_factor {
            scale *= rf as f64;
        }
        PixelScale::new(scale, width, height, self.config.invert_y)
    }

    fn map_builder(&self, width: usize, height: usize) -> MapBuilder {
        MapBuilder {
            scale: self.pixel_scale(width, height),
            pose: self.pose,
            geometry: self.calib.geometry,
            solver: SolverOptions {
                tol: self.config.solver.tol,
                max_iters: self.config.solver.max_iters as usize,
            },
            cylinder_radius: self.config.cylinder_radius,
        }
    }

    fn pose_key(&self, width: usize, height: usize) -> PoseKey {
        (
            [
                self.pose.xs.to_bits(),
                self.pose.ys.to_bits(),
                self.pose.z.to_bits(),
                self.pose.rx.to_bits(),
                self.pose.ry.to_bits(),
                self.pose.rz.to_bits(),
            ],
            width,
            height,
        )
    }

    /// One warp plan per camera for the current pose. Corner homographies
    /// are cached per pose.
    fn build_plans(&mut self, width: usize, height: usize) -> Result<Vec<RefocusMap>> {
        let builder = self.map_builder(width, height);

        if self.config.corner_homography {
            let key = self.pose_key(width, height);
            let cached = match &self.h_cache {
                Some((k, hs)) if *k == key && hs.len() == self.calib.num_cameras() => {
                    Some(hs.clone())
                }
                _ => None,
            };
            let hs = match cached {
                Some(hs) => hs,
                None => {
                    let mut hs = Vec::with_capacity(self.calib.num_cameras());
                    for cam in &self.calib.cameras {
                        hs.push(builder.corner_homography(cam)?);
                    }
                    self.h_cache = Some((key, hs.clone()));
                    hs
                }
            };
            return Ok(hs.into_iter().map(RefocusMap::Homography).collect());
        }

        self.calib
            .cameras
            .iter()
            .map(|cam| builder.build_map(cam, false))
            .collect()
    }

    fn reconstruct(&mut self, frame: usize) -> Result<Frame> {
        let n = self.calib.num_cameras();
        if n == 0 || self.views.num_cameras() != n {
            return Err(Error::Config(
                "session has no complete view set to reconstruct from".into(),
            ));
        }
        let (width, height) = self.dims()?;
        if self.config.composition.is_nlca() && n != 4 {
            return Err(Error::Config(format!(
                "NLCA compositions support exactly 4 cameras, session has {n}"
            )));
        }
        if let Composition::Nlca { window, .. } = self.config.composition {
            if window == 0 || width % window != 0 || height % window != 0 {
                return Err(Error::Config(format!(
                    "NLCA window {window} must divide image dimensions {width}x{height}"
                )));
            }
        }

        self.upload_single(frame)?;
        let plans = self.build_plans(width, height)?;

        let views = self.device[frame]
            .as_ref()
            .ok_or_else(|| Error::Runtime("frame upload was not retained".into()))?;

        let mut warped = Vec::with_capacity(n);
        for (plan, dev) in plans.iter().zip(views) {
            let view = match plan {
                RefocusMap::Homography(h) => self.ctx.warp_perspective(dev, h)?,
                RefocusMap::Dense(map) => self.ctx.remap(dev, map)?,
                RefocusMap::Refractive(spec) => self.ctx.refract_remap(dev, spec)?,
            };
            warped.push(view);
        }

        let mut combined = compose(&self.ctx, &warped, width, height, &self.config.composition)?;

        if !self.config.benchmark_mode && !self.config.composition.is_nlca() {
            apply_threshold(
                &self.ctx,
                &mut combined,
                self.config.threshold_mode,
                self.thresh,
            )?;
        }

        Ok(self.ctx.download(&combined)?)
    }

    /// The primary reconstruction surface: place the plane, reconstruct one
    /// frame, return the combined image.
    pub fn refocus(
        &mut self,
        z: f64,
        rx: f64,
        ry: f64,
        rz: f64,
        thresh: f64,
        frame: usize,
    ) -> Result<Frame> {
        if frame >= self.frame_labels.len() {
            return Err(Error::Runtime(format!(
                "frame {frame} is beyond the {} selected frames",
                self.frame_labels.len()
            )));
        }
        self.pose.z = z;
        self.pose.rx = rx;
        self.pose.ry = ry;
        self.pose.rz = rz;
        self.thresh = thresh;
        self.active_frame = frame;
        self.reconstruct(frame)
    }

    /// Reconstruct the active frame with the stored pose and threshold.
    pub fn current(&mut self) -> Result<Frame> {
        self.reconstruct(self.active_frame)
    }

    /// Project a world point into a camera, honoring the optical model.
    pub fn project_point(&self, camera: usize, x: &Vector3<f64>) -> Result<Vector2<f64>> {
        let cam = self
            .calib
            .cameras
            .get(camera)
            .ok_or_else(|| Error::Config(format!("no camera {camera}")))?;
        match &self.calib.geometry {
            Some(geom) => {
                let opts = SolverOptions {
                    tol: self.config.solver.tol,
                    max_iters: self.config.solver.max_iters as usize,
                };
                let r = refract_point(&cam.center, x, geom, &opts);
                Ok(project(&cam.p, &r.wall_point))
            }
            None => Ok(project(&cam.p, x)),
        }
    }

    /// Human-readable settings dump.
    pub fn settings_summary(&self) -> String {
        let mut s = String::new();
        let _ = writeln!(s, "--- backend ---");
        let _ = writeln!(s, "compute:     {}", self.ctx.kind());
        let _ = writeln!(s, "--- optics ---");
        let _ = writeln!(s, "refractive:  {}", self.calib.is_refractive());
        if let Some(g) = &self.calib.geometry {
            let _ = writeln!(s, "wall z:      {}", g.z_wall);
            let _ = writeln!(s, "wall t:      {}", g.thickness);
            let _ = writeln!(s, "n1/n2/n3:    {}/{}/{}", g.n1, g.n2, g.n3);
        }
        let _ = writeln!(s, "corner maps: {}", self.config.corner_homography);
        let _ = writeln!(s, "composition: {:?}", self.config.composition);
        let _ = writeln!(s, "threshold:   {:?}", self.config.threshold_mode);
        let _ = writeln!(s, "--- scene ---");
        let _ = writeln!(s, "cameras:     {}", self.calib.num_cameras());
        let _ = writeln!(s, "frames:      {}", self.frame_labels.len());
        let _ = write!(s, "px per unit: {}", self.calib.scale);
        s
    }
}

/// Runtime-selected reconstruction session.
pub enum Session {
    Cpu(Engine<CpuBackend>),
    Gpu(Engine<GpuContext>),
}

impl Session {
    /// Build a session per the configuration. Requesting the accelerator on
    /// a machine without one is fatal.
    pub fn new(config: RefocusConfig, calib: CalibrationSet) -> Result<Self> {
        if config.use_accelerator {
            let ctx = GpuContext::global().cloned().ok_or_else(|| {
                Error::Runtime("accelerator requested but no compute adapter is available".into())
            })?;
            Ok(Session::Gpu(Engine::with_backend(ctx, config, calib)?))
        } else {
            Ok(Session::Cpu(Engine::with_backend(
                CpuBackend::new(),
                config,
                calib,
            )?))
        }
    }
}

macro_rules! delegate {
    ($self:ident, $engine:ident => $body:expr) => {
        match $self {
            Session::Cpu($engine) => $body,
            Session::Gpu($engine) => $body,
        }
    };
}

impl Session {
    pub fn backend(&self) -> BackendKind {
        delegate!(self, e => e.backend())
    }

    pub fn set_views(&mut self, stacks: Vec<Vec<Frame>>) -> Result<()> {
        delegate!(self, e => e.set_views(stacks))
    }

    pub fn add_view(
        &mut self,
        name: impl Into<String>,
        frame: Frame,
        p: Matrix3x4<f64>,
        center: Vector3<f64>,
    ) -> Result<()> {
        delegate!(self, e => e.add_view(name, frame, p, center))
    }

    pub fn clear_views(&mut self) {
        delegate!(self, e => e.clear_views())
    }

    pub fn frame_from_bytes(&self, width: usize, height: usize, data: &[u8]) -> Result<Frame> {
        delegate!(self, e => e.frame_from_bytes(width, height, data))
    }

    pub fn set_lens(&mut self, camera: usize, model: LensModel) -> Result<()> {
        delegate!(self, e => e.set_lens(camera, model))
    }

    pub fn set_scale(&mut self, pixels_per_unit: f64) {
        delegate!(self, e => e.set_scale(pixels_per_unit))
    }

    pub fn set_depth(&mut self, z: f64) {
        delegate!(self, e => e.set_depth(z))
    }

    pub fn set_shift(&mut self, xs: f64, ys: f64) {
        delegate!(self, e => e.set_shift(xs, ys))
    }

    pub fn set_rotation(&mut self, rx: f64, ry: f64, rz: f64) {
        delegate!(self, e => e.set_rotation(rx, ry, rz))
    }

    pub fn set_threshold(&mut self, thresh: f64) {
        delegate!(self, e => e.set_threshold(thresh))
    }

    pub fn set_active_frame(&mut self, frame: usize) -> Result<()> {
        delegate!(self, e => e.set_active_frame(frame))
    }

    pub fn upload_single(&mut self, frame: usize) -> Result<()> {
        delegate!(self, e => e.upload_single(frame))
    }

    pub fn upload_all(&mut self) -> Result<()> {
        delegate!(self, e => e.upload_all())
    }

    pub fn refocus(
        &mut self,
        z: f64,
        rx: f64,
        ry: f64,
        rz: f64,
        thresh: f64,
        frame: usize,
    ) -> Result<Frame> {
        delegate!(self, e => e.refocus(z, rx, ry, rz, thresh, frame))
    }

    pub fn current(&mut self) -> Result<Frame> {
        delegate!(self, e => e.current())
    }

    pub fn project_point(&self, camera: usize, x: &Vector3<f64>) -> Result<Vector2<f64>> {
        delegate!(self, e => e.project_point(camera, x))
    }

    pub fn saturate_views(&mut self) {
        delegate!(self, e => e.saturate_views())
    }

    pub fn weight_views(&mut self, mode: WeightingMode) {
        delegate!(self, e => e.weight_views(mode))
    }

    pub fn settings_summary(&self) -> String {
        delegate!(self, e => e.settings_summary())
    }

    pub fn num_cameras(&self) -> usize {
        delegate!(self, e => e.num_cameras())
    }

    pub fn num_frames(&self) -> usize {
        delegate!(self, e => e.num_frames())
    }

    pub fn reconstruct_stack(
        &mut self,
        zmin: f64,
        zmax: f64,
        dz: f64,
        thresh: f64,
        frame: usize,
    ) -> Result<Vec<Frame>> {
        delegate!(self, e => e.reconstruct_stack(zmin, zmax, dz, thresh, frame))
    }

    pub fn dump_stack(
        &mut self,
        dir: impl AsRef<std::path::Path>,
        zmin: f64,
        zmax: f64,
        dz: f64,
        thresh: f64,
    ) -> Result<std::path::PathBuf> {
        delegate!(self, e => e.dump_stack(dir.as_ref(), zmin, zmax, dz, thresh))
    }

    pub fn write_piv_settings(
        &self,
        dir: impl AsRef<std::path::Path>,
    ) -> Result<std::path::PathBuf> {
        delegate!(self, e => e.write_piv_settings(dir.as_ref()))
    }
}
