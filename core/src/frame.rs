use crate::{Error, Result};

/// Single-channel f32 intensity image.
///
/// Intensities are kept in [0, 1] after ingestion; the expert integer-image
/// path stores raw values without rescaling.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    width: usize,
    height: usize,
    data: Vec<f32>,
}

impl Frame {
    pub fn zeros(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            data: vec![0.0; width * height],
        }
    }

    pub fn from_vec(width: usize, height: usize, data: Vec<f32>) -> Result<Self> {
        if data.len() != width * height {
            return Err(Error::Config(format!(
                "frame data length {} does not match {}x{}",
                data.len(),
                width,
                height
            )));
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// 8-bit input normalized to [0, 1].
    pub fn from_u8(width: usize, height: usize, data: &[u8]) -> Result<Self> {
        Self::from_vec(
            width,
            height,
            data.iter().map(|&v| v as f32 / 255.0).collect(),
        )
    }

    /// 16-bit input normalized to [0, 1].
    pub fn from_u16(width: usize, height: usize, data: &[u16]) -> Result<Self> {
        Self::from_vec(
            width,
            height,
            data.iter().map(|&v| v as f32 / 65535.0).collect(),
        )
    }

    /// Expert integer-image path: raw 8-bit values stored without rescaling.
    pub fn from_u8_raw(width: usize, height: usize, data: &[u8]) -> Result<Self> {
        Self::from_vec(width, height, data.iter().map(|&v| v as f32).collect())
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [f32] {
        &mut self.data
    }

    pub fn into_vec(self) -> Vec<f32> {
        self.data
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> f32 {
        self.data[y * self.width + x]
    }

    #[inline]
    pub fn set(&mut self, x: usize, y: usize, value: f32) {
        self.data[y * self.width + x] = value;
    }

    /// Bilinear sample at fractional coordinates; outside the image → 0.
    pub fn sample_bilinear(&self, x: f32, y: f32) -> f32 {
        let w = self.width;
        let h = self.height;
        if !x.is_finite()
            || !y.is_finite()
            || x < 0.0
            || y < 0.0
            || x > (w - 1) as f32
            || y > (h - 1) as f32
        {
            return 0.0;
        }

        let x0 = x.floor() as usize;
        let y0 = y.floor() as usize;
        let x1 = (x0 + 1).min(w - 1);
        let y1 = (y0 + 1).min(h - 1);
        let fx = x - x0 as f32;
        let fy = y - y0 as f32;

        let v00 = self.data[y0 * w + x0];
        let v10 = self.data[y0 * w + x1];
        let v01 = self.data[y1 * w + x0];
        let v11 = self.data[y1 * w + x1];

        let top = v00 * (1.0 - fx) + v10 * fx;
        let bot = v01 * (1.0 - fx) + v11 * fx;
        top * (1.0 - fy) + bot * fy
    }

    /// Bilinear resize by a uniform factor.
    pub fn resized(&self, factor: f32) -> Result<Frame> {
        if !(factor.is_finite() && factor > 0.0) {
            return Err(Error::Config(format!("invalid resize factor {factor}")));
        }
        let nw = ((self.width as f32 * factor).round() as usize).max(1);
        let nh = ((self.height as f32 * factor).round() as usize).max(1);
        let sx = self.width as f32 / nw as f32;
        let sy = self.height as f32 / nh as f32;

        let mut out = Frame::zeros(nw, nh);
        for y in 0..nh {
            let src_y = ((y as f32 + 0.5) * sy - 0.5).clamp(0.0, (self.height - 1) as f32);
            for x in 0..nw {
                let src_x = ((x as f32 + 0.5) * sx - 0.5).clamp(0.0, (self.width - 1) as f32);
                out.data[y * nw + x] = self.sample_bilinear(src_x, src_y);
            }
        }
        Ok(out)
    }

    /// Quantize to 8-bit, clamping to [0, 1].
    pub fn to_u8(&self) -> Vec<u8> {
        self.data
            .iter()
            .map(|&v| (v.clamp(0.0, 1.0) * 255.0).round() as u8)
            .collect()
    }

    pub fn mean(&self) -> f32 {
        if self.data.is_empty() {
            return 0.0;
        }
        let sum: f64 = self.data.iter().map(|&v| v as f64).sum();
        (sum / self.data.len() as f64) as f32
    }

    pub fn max(&self) -> f32 {
        self.data.iter().copied().fold(f32::NEG_INFINITY, f32::max)
    }
}

/// Dense per-pixel source-sampling coordinates for one destination image.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleMap {
    pub width: usize,
    pub height: usize,
    pub x: Vec<f32>,
    pub y: Vec<f32>,
}

impl SampleMap {
    pub fn zeros(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            x: vec![0.0; width * height],
            y: vec![0.0; width * height],
        }
    }
}

/// Per-camera frame stacks for one scene.
///
/// Cardinality and frame dimensions must agree across cameras; this is the
/// sync invariant for simultaneously captured sequences.
#[derive(Debug, Clone, Default)]
pub struct ViewSet {
    stacks: Vec<Vec<Frame>>,
}

impl ViewSet {
    pub fn new(stacks: Vec<Vec<Frame>>) -> Result<Self> {
        let mut set = Self::default();
        for stack in stacks {
            set.push_camera(stack)?;
        }
        Ok(set)
    }

    pub fn push_camera(&mut self, stack: Vec<Frame>) -> Result<()> {
        if stack.is_empty() {
            return Err(Error::Io("camera stack contains no frames".into()));
        }
        let (w, h) = (stack[0].width(), stack[0].height());
        if stack.iter().any(|f| f.width() != w || f.height() != h) {
            return Err(Error::Io(
                "frame dimensions differ within a camera stack".into(),
            ));
        }
        if let Some(first) = self.stacks.first() {
            if stack.len() != first.len() {
                return Err(Error::Io(format!(
                    "camera stack has {} frames, expected {} to stay in sync",
                    stack.len(),
                    first.len()
                )));
            }
            if first[0].width() != w || first[0].height() != h {
                return Err(Error::Io(
                    "frame dimensions differ across camera stacks".into(),
                ));
            }
        }
        self.stacks.push(stack);
        Ok(())
    }

    pub fn num_cameras(&self) -> usize {
        self.stacks.len()
    }

    pub fn num_frames(&self) -> usize {
        self.stacks.first().map_or(0, Vec::len)
    }

    pub fn frame(&self, camera: usize, time: usize) -> &Frame {
        &self.stacks[camera][time]
    }

    pub fn frame_mut(&mut self, camera: usize, time: usize) -> &mut Frame {
        &mut self.stacks[camera][time]
    }

    pub fn stacks(&self) -> &[Vec<Frame>] {
        &self.stacks
    }

    pub fn stacks_mut(&mut self) -> &mut [Vec<Frame>] {
        &mut self.stacks
    }

    pub fn clear(&mut self) {
        self.stacks.clear();
    }

    pub fn dims(&self) -> Option<(usize, usize)> {
        self.stacks
            .first()
            .map(|s| (s[0].width(), s[0].height()))
    }
}
