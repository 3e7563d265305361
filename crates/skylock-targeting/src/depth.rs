//! Depth queries against the camera bridge.
//!
//! The bridge itself is an external collaborator; the seam here is
//! [`DepthSource`], answered in meters from RGB-frame coordinates.

/// Synchronous depth query over an RGB-space region of interest.
pub trait DepthSource: Send {
    /// Median depth in meters over the ROI, or `None` when no valid sample
    /// exists.
    fn query_depth_roi(&mut self, x1: f64, y1: f64, x2: f64, y2: f64) -> Option<f64>;
}

/// One depth image (u16 millimeters, zero = no return) plus the RGB frame
/// geometry it is registered against.
#[derive(Debug, Clone)]
pub struct DepthFrame {
    data: Vec<u16>,
    width: u32,
    height: u32,
    rgb_width: u32,
    rgb_height: u32,
}

impl DepthFrame {
    pub fn new(data: Vec<u16>, width: u32, height: u32, rgb_width: u32, rgb_height: u32) -> Self {
        debug_assert_eq!(data.len(), (width * height) as usize);
        Self {
            data,
            width,
            height,
            rgb_width,
            rgb_height,
        }
    }

    /// Depth at a single RGB-frame pixel, meters.
    pub fn depth_at_point(&self, u: f64, v: f64) -> Option<f64> {
        let scale_x = self.width as f64 / self.rgb_width as f64;
        let scale_y = self.height as f64 / self.rgb_height as f64;
        let du = (u * scale_x) as i64;
        let dv = (v * scale_y) as i64;
        if du < 0 || dv < 0 || du >= self.width as i64 || dv >= self.height as i64 {
            return None;
        }
        let mm = self.data[(dv as u32 * self.width + du as u32) as usize];
        if mm == 0 {
            return None;
        }
        Some(mm as f64 / 1000.0)
    }

    /// Median of non-zero samples in the ROI, scaled from RGB to depth
    /// coordinates. Meters.
    pub fn median_depth_roi(&self, x1: f64, y1: f64, x2: f64, y2: f64) -> Option<f64> {
        let scale_x = self.width as f64 / self.rgb_width as f64;
        let scale_y = self.height as f64 / self.rgb_height as f64;

        let dx1 = ((x1 * scale_x) as i64).max(0) as u32;
        let dy1 = ((y1 * scale_y) as i64).max(0) as u32;
        let dx2 = (((x2 * scale_x) as i64).max(0) as u32).min(self.width);
        let dy2 = (((y2 * scale_y) as i64).max(0) as u32).min(self.height);

        if dx2 <= dx1 || dy2 <= dy1 {
            return None;
        }

        let mut samples: Vec<u16> = Vec::with_capacity(((dx2 - dx1) * (dy2 - dy1)) as usize);
        for row in dy1..dy2 {
            let base = (row * self.width) as usize;
            for col in dx1..dx2 {
                let mm = self.data[base + col as usize];
                if mm > 0 {
                    samples.push(mm);
                }
            }
        }
        if samples.is_empty() {
            return None;
        }

        samples.sort_unstable();
        let n = samples.len();
        let median_mm = if n % 2 == 1 {
            samples[n / 2] as f64
        } else {
            (samples[n / 2 - 1] as f64 + samples[n / 2] as f64) / 2.0
        };
        Some(median_mm / 1000.0)
    }
}

impl DepthSource for DepthFrame {
    fn query_depth_roi(&mut self, x1: f64, y1: f64, x2: f64, y2: f64) -> Option<f64> {
        self.median_depth_roi(x1, y1, x2, y2)
    }
}

pub fn is_depth_in_range(depth_m: Option<f64>, min_range: f64, max_range: f64) -> bool {
    matches!(depth_m, Some(d) if min_range <= d && d <= max_range)
}
