//! Loader for the persisted plain-text calibration format.
//!
//! Layout (whitespace-separated, line-oriented):
//!
//! ```text
//! <timestamp line>
//! <mean reprojection error>
//! <img_width> <img_height> <scale>
//! <num_cameras>
//! <camera name line>
//! <12 entries of the 3x4 P matrix>
//! <3 entries of the camera center>
//! ... repeated per camera ...
//! <refractive flag 0|1>
//! [zW t n1 n2 n3]        (present iff the flag is 1)
//! ```
//!
//! Camera names sit on their own line (blank lines before a name are
//! tolerated); a trailing carriage return from files written on Windows is
//! stripped.

use nalgebra::{Matrix3x4, Vector3};
use sapiv_core::{CalibrationSet, CameraView, Error, RefractiveGeometry, Result};
use std::path::Path;
use tracing::debug;

struct Cursor<'a> {
    lines: Vec<&'a str>,
    line: usize,
    tokens: Vec<&'a str>,
    token: usize,
}

impl<'a> Cursor<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            lines: text.lines().collect(),
            line: 0,
            tokens: Vec::new(),
            token: 0,
        }
    }

    /// Next whitespace-separated token, crossing line boundaries.
    fn next_token(&mut self) -> Result<&'a str> {
        loop {
            if self.token < self.tokens.len() {
                let t = self.tokens[self.token];
                self.token += 1;
                return Ok(t);
            }
            if self.line >= self.lines.len() {
                return Err(Error::Config(
                    "calibration file ended unexpectedly".into(),
                ));
            }
            self.tokens = self.lines[self.line].split_whitespace().collect();
            self.token = 0;
            self.line += 1;
        }
    }

    fn next_f64(&mut self, what: &str) -> Result<f64> {
        let t = self.next_token()?;
        t.parse::<f64>().map_err(|_| {
            Error::Config(format!("expected {what}, found \"{t}\" in calibration file"))
        })
    }

    fn next_usize(&mut self, what: &str) -> Result<usize> {
        let t = self.next_token()?;
        t.parse::<usize>().map_err(|_| {
            Error::Config(format!("expected {what}, found \"{t}\" in calibration file"))
        })
    }

    /// Next non-blank full line, ignoring any tokens left on the current one.
    fn next_name_line(&mut self) -> Result<String> {
        self.tokens.clear();
        self.token = 0;
        while self.line < self.lines.len() {
            let raw = self.lines[self.line];
            self.line += 1;
            let trimmed = raw.trim_end_matches('\r');
            if !trimmed.trim().is_empty() {
                return Ok(trimmed.trim().to_string());
            }
        }
        Err(Error::Config(
            "calibration file ended while expecting a camera name".into(),
        ))
    }
}

/// Parse calibration text into an immutable [`CalibrationSet`].
pub fn parse_calibration(text: &str) -> Result<CalibrationSet> {
    let mut lines = text.lines();
    let timestamp = lines
        .next()
        .ok_or_else(|| Error::Config("calibration file is empty".into()))?
        .trim_end_matches('\r')
        .to_string();
    let rest: String = lines.collect::<Vec<_>>().join("\n");
    let mut cur = Cursor::new(&rest);

    let mean_reprojection_error = cur.next_f64("mean reprojection error")?;
    let img_width = cur.next_usize("image width")?;
    let img_height = cur.next_usize("image height")?;
    let scale = cur.next_f64("pixel scale")?;
    let num_cameras = cur.next_usize("camera count")?;

    let mut cameras = Vec::with_capacity(num_cameras);
    for _ in 0..num_cameras {
        let name = cur.next_name_line()?;

        let mut p = Matrix3x4::zeros();
        for r in 0..3 {
            for c in 0..4 {
                p[(r, c)] = cur.next_f64("projection matrix entry")?;
            }
        }

        let center = Vector3::new(
            cur.next_f64("camera center x")?,
            cur.next_f64("camera center y")?,
            cur.next_f64("camera center z")?,
        );

        cameras.push(CameraView::new(name, p, center));
    }

    let flag = cur.next_usize("refractive flag")?;
    let geometry = match flag {
        0 => None,
        1 => Some(RefractiveGeometry {
            z_wall: cur.next_f64("wall z")?,
            thickness: cur.next_f64("wall thickness")?,
            n1: cur.next_f64("n1")?,
            n2: cur.next_f64("n2")?,
            n3: cur.next_f64("n3")?,
        }),
        other => {
            return Err(Error::Config(format!(
                "refractive flag must be 0 or 1, found {other}"
            )))
        }
    };

    let mut set = CalibrationSet::new(img_width, img_height, scale, cameras, geometry)?;
    set.timestamp = timestamp;
    set.mean_reprojection_error = mean_reprojection_error;

    for cam in &set.cameras {
        debug!(
            camera = %cam.name,
            residual = cam.consistency_residual(),
            "loaded camera"
        );
    }

    Ok(set)
}

/// Load and parse a calibration file.
pub fn load_calibration(path: impl AsRef<Path>) -> Result<CalibrationSet> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)
        .map_err(|e| Error::Io(format!("could not open calibration file {path:?}: {e}")))?;
    parse_calibration(&text)
}
