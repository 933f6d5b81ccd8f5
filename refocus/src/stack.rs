//! Depth-stack driver: sweep z over [zmin, zmax], emit depth-ordered frames,
//! serialize stacks to disk and write the PIV handoff settings.

use crate::session::Engine;
use sapiv_core::{Error, Frame, Result};
use sapiv_hal::ComputeContext;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::info;

/// Handoff document for the downstream PIV tracker.
#[derive(Debug, Serialize)]
struct PivSettings {
    data_path: String,
    piv_save_path: String,
    pix_per_mm: f64,
    dt: f64,
    passes: u32,
    windows: Vec<[u32; 3]>,
    overlap: Vec<[u32; 3]>,
}

/// First non-existing sibling of `path` (`name_1`, `name_2`, …).
fn unique_sibling(path: &Path) -> PathBuf {
    let stem = path.file_name().map_or_else(
        || "stack".to_string(),
        |n| n.to_string_lossy().into_owned(),
    );
    let parent = path.parent().map_or_else(PathBuf::new, Path::to_path_buf);
    for i in 1.. {
        let candidate = parent.join(format!("{stem}_{i}"));
        if !candidate.exists() {
            return candidate;
        }
    }
    unreachable!()
}

fn dir_is_empty(path: &Path) -> bool {
    std::fs::read_dir(path).map_or(true, |mut entries| entries.next().is_none())
}

impl<C: ComputeContext> Engine<C> {
    /// Reconstruct the depth stack for one frame: z = zmin, zmin+dz, …,
    /// inclusive of zmax within half a step.
    pub fn reconstruct_stack(
        &mut self,
        zmin: f64,
        zmax: f64,
        dz: f64,
        thresh: f64,
        frame: usize,
    ) -> Result<Vec<Frame>> {
        if !(dz > 0.0) || zmax < zmin {
            return Err(Error::Config(format!(
                "invalid depth sweep [{zmin}, {zmax}] with step {dz}"
            )));
        }

        let mut stack = Vec::new();
        let mut i = 0u64;
        loop {
            let z = zmin + i as f64 * dz;
            if z > zmax + 0.5 * dz {
                break;
            }
            stack.push(self.refocus(z, 0.0, 0.0, 0.0, thresh, frame)?);
            i += 1;
        }
        Ok(stack)
    }

    /// Reconstruct and serialize depth stacks for every selected frame.
    ///
    /// Creates `dir` (or a unique sibling when it already exists non-empty),
    /// one subdirectory per frame, one image per depth with filenames that
    /// sort into depth order. Returns the directory actually written to.
    pub fn dump_stack(
        &mut self,
        dir: &Path,
        zmin: f64,
        zmax: f64,
        dz: f64,
        thresh: f64,
    ) -> Result<PathBuf> {
        let target = if dir.is_dir() && !dir_is_empty(dir) {
            let sibling = unique_sibling(dir);
            info!(requested = %dir.display(), using = %sibling.display(),
                "stack directory exists and is not empty; routing output to sibling");
            sibling
        } else {
            dir.to_path_buf()
        };
        std::fs::create_dir_all(&target)
            .map_err(|e| Error::Io(format!("could not create {}: {e}", target.display())))?;

        for frame in 0..self.num_frames() {
            let label = self.frame_labels()[frame];
            let frame_dir = target.join(format!("frame{label:04}"));
            std::fs::create_dir_all(&frame_dir)
                .map_err(|e| Error::Io(format!("could not create {}: {e}", frame_dir.display())))?;

            info!(frame = label, dir = %frame_dir.display(), "saving depth stack");

            let stack = self.reconstruct_stack(zmin, zmax, dz, thresh, frame)?;
            for (k, plane) in stack.iter().enumerate() {
                let path = frame_dir.join(format!("z{k:04}.png"));
                write_png(plane, &path)?;
            }
        }

        info!(dir = %target.display(), "stack saving complete");
        Ok(target)
    }

    /// Emit the YAML settings handoff consumed by the downstream tracker.
    pub fn write_piv_settings(&self, dir: &Path) -> Result<PathBuf> {
        let dir_s = dir.display().to_string();
        let settings = PivSettings {
            data_path: dir_s.clone(),
            piv_save_path: format!("{dir_s}/piv_results"),
            pix_per_mm: self.calibration().scale,
            dt: 1.0,
            passes: 3,
            windows: vec![[64, 64, 64], [48, 48, 48], [32, 32, 32]],
            overlap: vec![[50, 50, 50], [50, 50, 50], [50, 50, 50]],
        };

        let text = serde_yaml::to_string(&settings)
            .map_err(|e| Error::Io(format!("could not serialize PIV settings: {e}")))?;

        std::fs::create_dir_all(dir)
            .map_err(|e| Error::Io(format!("could not create {}: {e}", dir.display())))?;
        let path = dir.join("piv_config.yaml");
        std::fs::write(&path, text)
            .map_err(|e| Error::Io(format!("could not write {}: {e}", path.display())))?;
        Ok(path)
    }
}

fn write_png(frame: &Frame, path: &Path) -> Result<()> {
    let img = image::GrayImage::from_raw(
        frame.width() as u32,
        frame.height() as u32,
        frame.to_u8(),
    )
    .ok_or_else(|| Error::Io("frame buffer does not match its dimensions".into()))?;
    img.save(path)
        .map_err(|e| Error::Io(format!("could not write {}: {e}", path.display())))
}
