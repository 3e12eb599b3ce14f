//! Rasterizes animation frames: a loss heatmap with the trajectory drawn on
//! top. Axis 1 runs left to right, axis 2 bottom to top.

use std::path::Path;

use image::{ImageError, Rgb, RgbImage};

use crate::error::{Error, Result};
use crate::surface::config::{Colormap, VisualizationConfig};
use crate::surface::reconstruct::LossSurface;
use crate::surface::trajectory::Frame;

const PATH_COLOR: Rgb<u8> = Rgb([230, 40, 40]);
const START_COLOR: Rgb<u8> = Rgb([40, 200, 70]);
const CURRENT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);

// Sampled from matplotlib's viridis.
const VIRIDIS: [[u8; 3]; 9] = [
    [68, 1, 84],
    [71, 44, 122],
    [59, 81, 139],
    [44, 113, 142],
    [33, 144, 141],
    [39, 173, 129],
    [92, 200, 99],
    [170, 220, 50],
    [253, 231, 37],
];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderOptions {
    pub width: u32,
    pub height: u32,
    pub colormap: Colormap,
    pub point_size: u32,
    pub line_width: u32,
}

impl Default for RenderOptions {
    fn default() -> Self {
        RenderOptions::from(&VisualizationConfig::default())
    }
}

impl From<&VisualizationConfig> for RenderOptions {
    fn from(cfg: &VisualizationConfig) -> Self {
        RenderOptions {
            width: cfg.width,
            height: cfg.height,
            colormap: cfg.colormap,
            point_size: cfg.point_size,
            line_width: cfg.line_width,
        }
    }
}

impl Colormap {
    /// Color for `t` in [0, 1].
    pub fn color(&self, t: f64) -> Rgb<u8> {
        let t = if t.is_finite() { t.clamp(0.0, 1.0) } else { 1.0 };
        match self {
            Colormap::Grayscale => {
                let v = (t * 255.0).round() as u8;
                Rgb([v, v, v])
            }
            Colormap::Viridis => {
                let pos = t * (VIRIDIS.len() - 1) as f64;
                let i = (pos.floor() as usize).min(VIRIDIS.len() - 2);
                let f = pos - i as f64;
                let (a, b) = (VIRIDIS[i], VIRIDIS[i + 1]);
                let lerp = |k: usize| (a[k] as f64 + (b[k] as f64 - a[k] as f64) * f).round() as u8;
                Rgb([lerp(0), lerp(1), lerp(2)])
            }
        }
    }
}

/// Maps weight-space positions to pixel centers.
struct Viewport {
    range1: (f64, f64),
    range2: (f64, f64),
    width: u32,
    height: u32,
}

impl Viewport {
    fn to_pixel(&self, a: f64, b: f64) -> (f64, f64) {
        let u = (a - self.range1.0) / (self.range1.1 - self.range1.0);
        let v = (b - self.range2.0) / (self.range2.1 - self.range2.0);
        (u * (self.width - 1) as f64, (1.0 - v) * (self.height - 1) as f64)
    }

    fn to_weights(&self, px: u32, py: u32) -> (f64, f64) {
        let u = px as f64 / (self.width - 1).max(1) as f64;
        let v = 1.0 - py as f64 / (self.height - 1).max(1) as f64;
        (
            self.range1.0 + u * (self.range1.1 - self.range1.0),
            self.range2.0 + v * (self.range2.1 - self.range2.0),
        )
    }
}

/// Draws the surface heatmap and the frame's path.
pub fn render_frame(surface: &LossSurface, frame: &Frame, options: &RenderOptions) -> Result<RgbImage> {
    if options.width < 2 || options.height < 2 {
        return Err(Error::Config(format!(
            "frame size must be at least 2x2, got {}x{}",
            options.width, options.height
        )));
    }
    let view = Viewport {
        range1: surface.range1(),
        range2: surface.range2(),
        width: options.width,
        height: options.height,
    };
    let mut img = heatmap(surface, &view, options.colormap);

    let pixels: Vec<(f64, f64)> = frame.path.iter().map(|p| view.to_pixel(p.w1, p.w2)).collect();
    for pair in pixels.windows(2) {
        draw_line(&mut img, pair[0], pair[1], options.line_width, PATH_COLOR);
    }
    if let Some(&start) = pixels.first() {
        draw_disc(&mut img, start, options.point_size as f64 / 2.0 + 1.0, START_COLOR);
    }
    if let Some(&current) = pixels.last() {
        draw_disc(&mut img, current, options.point_size as f64 / 2.0, CURRENT_COLOR);
        draw_disc(&mut img, current, options.point_size as f64 / 4.0, PATH_COLOR);
    }
    Ok(img)
}

fn heatmap(surface: &LossSurface, view: &Viewport, colormap: Colormap) -> RgbImage {
    let (lo, hi) = surface.loss_range().unwrap_or((0.0, 1.0));
    let span = if hi > lo { hi - lo } else { 1.0 };
    RgbImage::from_fn(view.width, view.height, |px, py| {
        let (a, b) = view.to_weights(px, py);
        colormap.color((surface.sample(a, b) - lo) / span)
    })
}

fn put(img: &mut RgbImage, x: i64, y: i64, color: Rgb<u8>) {
    if x >= 0 && y >= 0 && (x as u32) < img.width() && (y as u32) < img.height() {
        img.put_pixel(x as u32, y as u32, color);
    }
}

fn draw_disc(img: &mut RgbImage, center: (f64, f64), radius: f64, color: Rgb<u8>) {
    let r = radius.max(0.5);
    let (cx, cy) = center;
    let (x0, x1) = ((cx - r).floor() as i64, (cx + r).ceil() as i64);
    let (y0, y1) = ((cy - r).floor() as i64, (cy + r).ceil() as i64);
    for y in y0..=y1 {
        for x in x0..=x1 {
            let (dx, dy) = (x as f64 - cx, y as f64 - cy);
            if dx * dx + dy * dy <= r * r {
                put(img, x, y, color);
            }
        }
    }
}

/// Clips the segment to `[lo, hi]` on both axes (Liang-Barsky). `None` when
/// it misses the box or an end is not finite.
fn clip_segment(from: (f64, f64), to: (f64, f64), lo: (f64, f64), hi: (f64, f64)) -> Option<((f64, f64), (f64, f64))> {
    if ![from.0, from.1, to.0, to.1].iter().all(|v| v.is_finite()) {
        return None;
    }
    let (dx, dy) = (to.0 - from.0, to.1 - from.1);
    let (mut t0, mut t1) = (0.0_f64, 1.0_f64);
    for (p, q) in [(-dx, from.0 - lo.0), (dx, hi.0 - from.0), (-dy, from.1 - lo.1), (dy, hi.1 - from.1)] {
        if p == 0.0 {
            if q < 0.0 {
                return None;
            }
        } else {
            let r = q / p;
            if p < 0.0 {
                t0 = t0.max(r);
            } else {
                t1 = t1.min(r);
            }
        }
    }
    if t0 > t1 {
        return None;
    }
    Some(((from.0 + dx * t0, from.1 + dy * t0), (from.0 + dx * t1, from.1 + dy * t1)))
}

fn draw_line(img: &mut RgbImage, from: (f64, f64), to: (f64, f64), width: u32, color: Rgb<u8>) {
    let radius = width as f64 / 2.0;
    // Only the part that can touch a pixel is stepped.
    let margin = radius + 1.0;
    let hi = (img.width() as f64 + margin, img.height() as f64 + margin);
    let (from, to) = match clip_segment(from, to, (-margin, -margin), hi) {
        Some(seg) => seg,
        None => return,
    };
    let (dx, dy) = (to.0 - from.0, to.1 - from.1);
    let steps = dx.abs().max(dy.abs()).ceil().max(1.0) as usize;
    for k in 0..=steps {
        let t = k as f64 / steps as f64;
        draw_disc(img, (from.0 + dx * t, from.1 + dy * t), radius, color);
    }
}

/// Writes `img` as PNG.
pub fn save_frame_png(img: &RgbImage, path: &Path) -> Result<()> {
    img.save_with_format(path, image::ImageFormat::Png).map_err(|e| match e {
        ImageError::IoError(io) => Error::io(path, io),
        other => Error::format(path, other.to_string()),
    })
}

/// Encodes `img` as PNG bytes.
pub fn encode_png(img: &RgbImage) -> Result<Vec<u8>> {
    let mut bytes = std::io::Cursor::new(Vec::new());
    img.write_to(&mut bytes, image::ImageOutputFormat::Png)
        .map_err(|e| Error::format("<png>", e.to_string()))?;
    Ok(bytes.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::params::WeightCoord;
    use crate::surface::reconstruct::{linspace, TrajectoryPoint};

    fn bowl() -> LossSurface {
        let grid1 = linspace(-1.0, 1.0, 5);
        let grid2 = linspace(-1.0, 1.0, 5);
        let loss = grid2.iter().map(|b| grid1.iter().map(|a| a * a + b * b).collect()).collect();
        LossSurface { axes: [WeightCoord::w1(0, 0), WeightCoord::w2(0)], grid1, grid2, loss }
    }

    fn point(epoch: usize, w1: f64, w2: f64) -> TrajectoryPoint {
        TrajectoryPoint { epoch, w1, w2, loss: w1 * w1 + w2 * w2, snapshot_loss: 0.0 }
    }

    #[test]
    fn colormaps_span_their_ends() {
        assert_eq!(Colormap::Grayscale.color(0.0), Rgb([0, 0, 0]));
        assert_eq!(Colormap::Grayscale.color(1.0), Rgb([255, 255, 255]));
        assert_eq!(Colormap::Viridis.color(0.0), Rgb(VIRIDIS[0]));
        assert_eq!(Colormap::Viridis.color(1.0), Rgb(VIRIDIS[8]));
        assert_eq!(Colormap::Viridis.color(f64::NAN), Rgb(VIRIDIS[8]));
    }

    #[test]
    fn heatmap_is_dark_at_minimum_and_path_is_drawn() {
        let options = RenderOptions { width: 41, height: 41, colormap: Colormap::Grayscale, point_size: 4, line_width: 1 };
        let frame = Frame { index: 1, total: 2, path: vec![point(1, -1.0, 1.0), point(2, 0.5, 0.5)] };
        let img = render_frame(&bowl(), &frame, &options).unwrap();
        assert_eq!(img.dimensions(), (41, 41));
        // Bottom-right corner is far from both markers and the path.
        assert_eq!(*img.get_pixel(40, 40), Rgb([255, 255, 255]));
        assert_eq!(*img.get_pixel(0, 0), START_COLOR);
        // Current marker at (0.5, 0.5) maps to pixel (30, 10).
        assert_eq!(*img.get_pixel(30, 10), PATH_COLOR);

        let empty = Frame { index: 0, total: 0, path: Vec::new() };
        let plain = render_frame(&bowl(), &empty, &options).unwrap();
        assert_eq!(*plain.get_pixel(20, 20), Rgb([0, 0, 0]));
    }

    #[test]
    fn png_bytes_have_signature() {
        let options = RenderOptions { width: 8, height: 6, ..RenderOptions::default() };
        let img = render_frame(&bowl(), &Frame { index: 0, total: 0, path: Vec::new() }, &options).unwrap();
        let bytes = encode_png(&img).unwrap();
        assert_eq!(&bytes[..8], b"\x89PNG\r\n\x1a\n");
    }

    #[test]
    fn far_off_points_are_clipped_to_the_frame() {
        let options = RenderOptions { width: 41, height: 41, colormap: Colormap::Grayscale, point_size: 4, line_width: 1 };
        let frame = Frame { index: 1, total: 2, path: vec![point(1, 0.0, 0.0), point(2, 1e12, 0.0)] };
        let img = render_frame(&bowl(), &frame, &options).unwrap();
        // The visible part runs from the centre to the right edge.
        assert_eq!(*img.get_pixel(20, 20), START_COLOR);
        assert_eq!(*img.get_pixel(40, 20), PATH_COLOR);

        assert_eq!(clip_segment((0.0, 0.0), (f64::NAN, 1.0), (0.0, 0.0), (10.0, 10.0)), None);
        assert_eq!(clip_segment((-5.0, 20.0), (-5.0, 30.0), (0.0, 0.0), (10.0, 10.0)), None);
        assert_eq!(
            clip_segment((-8.0, 5.0), (24.0, 5.0), (0.0, 0.0), (10.0, 10.0)),
            Some(((0.0, 5.0), (10.0, 5.0)))
        );
    }
}
