//! Overlay rendering for tracked codes

use crate::config::OverlayConfig;
use crate::processing::TrackedCodes;
use image::{Rgba, RgbaImage};
use rollcall_core::Point;
use std::time::Duration;

const GRID_COLOR: Rgba<u8> = Rgba([0, 255, 120, 40]);
const SWEEP_COLOR: Rgba<u8> = Rgba([0, 255, 120, 170]);
const OUTLINE_COLOR: Rgba<u8> = Rgba([0, 255, 0, 255]);
const CORNER_COLOR: Rgba<u8> = Rgba([255, 255, 255, 255]);
const LABEL_BG: Rgba<u8> = Rgba([0, 0, 0, 180]);
const LABEL_FG: Rgba<u8> = Rgba([0, 255, 0, 255]);

const CORNER_SIZE: f32 = 6.0;
const GLYPH_ADVANCE: i32 = 6;
const GLYPH_HEIGHT: i32 = 7;

/// One drawing instruction in display coordinates
#[derive(Debug, Clone, PartialEq)]
pub enum Primitive {
    GridLine { from: Point, to: Point },
    SweepLine { y: f32 },
    Outline { id: String, points: Vec<Point> },
    CornerMarker { at: Point, size: f32 },
    Label { anchor: Point, text: String },
}

/// Everything drawn for one animation tick
#[derive(Debug, Clone, PartialEq)]
pub struct OverlayFrame {
    pub width: u32,
    pub height: u32,
    pub primitives: Vec<Primitive>,
}

impl OverlayFrame {
    /// Number of code outlines in the frame
    pub fn code_boxes(&self) -> usize {
        self.primitives
            .iter()
            .filter(|p| matches!(p, Primitive::Outline { .. }))
            .count()
    }

    pub fn labels(&self) -> Vec<&str> {
        self.primitives
            .iter()
            .filter_map(|p| match p {
                Primitive::Label { text, .. } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn sweep_y(&self) -> Option<f32> {
        self.primitives.iter().find_map(|p| match p {
            Primitive::SweepLine { y } => Some(*y),
            _ => None,
        })
    }

    /// Draw onto a transparent raster the size of the display box
    pub fn rasterize(&self) -> RgbaImage {
        let mut image = RgbaImage::from_pixel(self.width.max(1), self.height.max(1), Rgba([0, 0, 0, 0]));
        for primitive in &self.primitives {
            match primitive {
                Primitive::GridLine { from, to } => draw_line(&mut image, *from, *to, GRID_COLOR),
                Primitive::SweepLine { y } => {
                    let w = image.width() as f32;
                    draw_line(&mut image, Point::new(0.0, *y), Point::new(w, *y), SWEEP_COLOR);
                }
                Primitive::Outline { points, .. } => {
                    for (i, from) in points.iter().enumerate() {
                        let to = points[(i + 1) % points.len()];
                        draw_line(&mut image, *from, to, OUTLINE_COLOR);
                    }
                }
                Primitive::CornerMarker { at, size } => {
                    if !at.is_finite() {
                        continue;
                    }
                    let half = size / 2.0;
                    let (w, h) = image.dimensions();
                    fill_rect(
                        &mut image,
                        to_pixel(at.x - half, w),
                        to_pixel(at.y - half, h),
                        to_pixel(at.x + half, w),
                        to_pixel(at.y + half, h),
                        CORNER_COLOR,
                    );
                }
                Primitive::Label { anchor, text } => {
                    if !anchor.is_finite() {
                        continue;
                    }
                    let x = to_pixel(anchor.x, image.width());
                    let y = to_pixel(anchor.y, image.height())
                        .saturating_sub(GLYPH_HEIGHT + 4)
                        .max(0);
                    let text_width = i32::try_from(text.chars().count())
                        .unwrap_or(i32::MAX)
                        .saturating_mul(GLYPH_ADVANCE);
                    fill_rect(
                        &mut image,
                        x.saturating_sub(1),
                        y.saturating_sub(1),
                        x.saturating_add(text_width),
                        y.saturating_add(GLYPH_HEIGHT),
                        LABEL_BG,
                    );
                    draw_label(&mut image, x, y, text, LABEL_FG);
                }
            }
        }
        image
    }
}

/// Maps tracked geometry from native video pixels onto the displayed video
/// box and adds the decorative grid and sweep line.
///
/// Rendering is a pure function of the tracked snapshot and elapsed time.
#[derive(Debug, Clone)]
pub struct OverlayRenderer {
    grid_cell: u32,
    sweep_period: Duration,
    native: (u32, u32),
    display: (u32, u32),
    scale: (f32, f32),
}

impl OverlayRenderer {
    pub fn new(config: &OverlayConfig) -> Self {
        let mut renderer = Self {
            grid_cell: config.grid_cell.max(1),
            sweep_period: Duration::from_millis(config.sweep_period_ms.max(1)),
            native: (0, 0),
            display: (config.display_width, config.display_height),
            scale: (1.0, 1.0),
        };
        renderer.recompute_scale();
        renderer
    }

    /// Update the displayed box size (viewport resize)
    pub fn resize(&mut self, width: u32, height: u32) {
        if self.display != (width, height) {
            self.display = (width, height);
            self.recompute_scale();
        }
    }

    /// Update the native video size (camera switch or first frame)
    pub fn set_native_size(&mut self, width: u32, height: u32) {
        if self.native != (width, height) {
            self.native = (width, height);
            self.recompute_scale();
        }
    }

    /// `display / native` per axis
    pub fn scale(&self) -> (f32, f32) {
        self.scale
    }

    pub fn display_size(&self) -> (u32, u32) {
        self.display
    }

    fn recompute_scale(&mut self) {
        let (nw, nh) = self.native;
        let (dw, dh) = self.display;
        self.scale = if nw == 0 || nh == 0 {
            (1.0, 1.0)
        } else {
            (dw as f32 / nw as f32, dh as f32 / nh as f32)
        };
    }

    /// Sweep line position for a point in time
    pub fn sweep_position(&self, elapsed: Duration) -> f32 {
        let period = self.sweep_period.as_millis().max(1);
        let phase = (elapsed.as_millis() % period) as f32 / period as f32;
        phase * self.display.1 as f32
    }

    pub fn render(&self, tracked: &TrackedCodes, elapsed: Duration) -> OverlayFrame {
        let (width, height) = self.display;
        let mut primitives = Vec::new();

        let cell = self.grid_cell as usize;
        for x in (0..=width).step_by(cell) {
            primitives.push(Primitive::GridLine {
                from: Point::new(x as f32, 0.0),
                to: Point::new(x as f32, height as f32),
            });
        }
        for y in (0..=height).step_by(cell) {
            primitives.push(Primitive::GridLine {
                from: Point::new(0.0, y as f32),
                to: Point::new(width as f32, y as f32),
            });
        }

        primitives.push(Primitive::SweepLine {
            y: self.sweep_position(elapsed),
        });

        let (sx, sy) = self.scale;
        for code in tracked.iter() {
            let points: Vec<Point> = code.smoothed.iter().map(|p| p.scale(sx, sy)).collect();
            let Some(&anchor) = points.first() else {
                continue;
            };
            for corner in &points {
                primitives.push(Primitive::CornerMarker {
                    at: *corner,
                    size: CORNER_SIZE,
                });
            }
            primitives.push(Primitive::Outline {
                id: code.id().to_string(),
                points,
            });
            primitives.push(Primitive::Label {
                anchor,
                text: code.label(),
            });
        }

        OverlayFrame {
            width,
            height,
            primitives,
        }
    }
}

fn put_pixel(image: &mut RgbaImage, x: i32, y: i32, color: Rgba<u8>) {
    if x >= 0 && y >= 0 && (x as u32) < image.width() && (y as u32) < image.height() {
        *image.get_pixel_mut(x as u32, y as u32) = color;
    }
}

/// Pixels this far outside the raster are still addressed, anything beyond
/// is clamped
const GUARD_BAND: i32 = 64;

/// Round a display coordinate to a pixel index within the guard band
fn to_pixel(value: f32, extent: u32) -> i32 {
    let max = i32::try_from(extent).unwrap_or(i32::MAX).saturating_add(GUARD_BAND);
    (value.round() as i32).clamp(-GUARD_BAND, max)
}

/// Liang-Barsky clip of a segment against the raster grown by one pixel.
/// `None` when the segment misses it entirely.
fn clip_segment(from: Point, to: Point, width: u32, height: u32) -> Option<(Point, Point)> {
    let (x0, y0) = (from.x as f64, from.y as f64);
    let (dx, dy) = (to.x as f64 - x0, to.y as f64 - y0);
    let (min_x, min_y) = (-1.0, -1.0);
    let (max_x, max_y) = (width as f64, height as f64);

    let mut t0 = 0.0f64;
    let mut t1 = 1.0f64;
    for (p, q) in [(-dx, x0 - min_x), (dx, max_x - x0), (-dy, y0 - min_y), (dy, max_y - y0)] {
        if p == 0.0 {
            if q < 0.0 {
                return None;
            }
            continue;
        }
        let r = q / p;
        if p < 0.0 {
            if r > t1 {
                return None;
            }
            t0 = t0.max(r);
        } else {
            if r < t0 {
                return None;
            }
            t1 = t1.min(r);
        }
    }

    let at = |t: f64| Point::new((x0 + t * dx) as f32, (y0 + t * dy) as f32);
    Some((at(t0), at(t1)))
}

fn draw_line(image: &mut RgbaImage, from: Point, to: Point, color: Rgba<u8>) {
    if !from.is_finite() || !to.is_finite() {
        return;
    }
    let (w, h) = image.dimensions();
    let Some((from, to)) = clip_segment(from, to, w, h) else {
        return;
    };

    let (mut x0, mut y0) = (to_pixel(from.x, w), to_pixel(from.y, h));
    let (x1, y1) = (to_pixel(to.x, w), to_pixel(to.y, h));
    let dx = (x1 - x0).abs();
    let dy = -(y1 - y0).abs();
    let step_x = if x0 < x1 { 1 } else { -1 };
    let step_y = if y0 < y1 { 1 } else { -1 };
    let mut err = dx + dy;
    loop {
        put_pixel(image, x0, y0, color);
        if x0 == x1 && y0 == y1 {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x0 += step_x;
        }
        if e2 <= dx {
            err += dx;
            y0 += step_y;
        }
    }
}

fn fill_rect(image: &mut RgbaImage, left: i32, top: i32, right: i32, bottom: i32, color: Rgba<u8>) {
    let width = image.width() as i32;
    let height = image.height() as i32;
    if right < 0 || bottom < 0 || left >= width || top >= height {
        return;
    }
    let left = left.clamp(0, width.saturating_sub(1));
    let right = right.clamp(0, width.saturating_sub(1));
    let top = top.clamp(0, height.saturating_sub(1));
    let bottom = bottom.clamp(0, height.saturating_sub(1));

    for y in top..=bottom {
        for x in left..=right {
            *image.get_pixel_mut(x as u32, y as u32) = color;
        }
    }
}

fn draw_label(image: &mut RgbaImage, mut x: i32, y: i32, text: &str, color: Rgba<u8>) {
    for ch in text.chars().flat_map(|c| c.to_uppercase()) {
        let glyph = glyph_bits(ch).unwrap_or(UNKNOWN_GLYPH);
        for (row, pattern) in glyph.iter().enumerate() {
            for col in 0..5 {
                if (pattern >> (4 - col)) & 1 == 1 {
                    put_pixel(image, x + col, y + row as i32, color);
                }
            }
        }
        x = x.saturating_add(GLYPH_ADVANCE);
        if x >= image.width() as i32 {
            break;
        }
    }
}

const UNKNOWN_GLYPH: [u8; 7] = [0b01110, 0b10001, 0b00001, 0b00010, 0b00100, 0b00000, 0b00100];

fn glyph_bits(ch: char) -> Option<[u8; 7]> {
    let bits = match ch {
        'A' => [0b01110, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001],
        'B' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10001, 0b10001, 0b11110],
        'C' => [0b01110, 0b10001, 0b10000, 0b10000, 0b10000, 0b10001, 0b01110],
        'D' => [0b11100, 0b10010, 0b10001, 0b10001, 0b10001, 0b10010, 0b11100],
        'E' => [0b11111, 0b10000, 0b11110, 0b10000, 0b10000, 0b10000, 0b11111],
        'F' => [0b11111, 0b10000, 0b11110, 0b10000, 0b10000, 0b10000, 0b10000],
        'G' => [0b01110, 0b10001, 0b10000, 0b10111, 0b10001, 0b10001, 0b01111],
        'H' => [0b10001, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001],
        'I' => [0b01110, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110],
        'J' => [0b00111, 0b00010, 0b00010, 0b00010, 0b00010, 0b10010, 0b01100],
        'K' => [0b10001, 0b10010, 0b10100, 0b11000, 0b10100, 0b10010, 0b10001],
        'L' => [0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b11111],
        'M' => [0b10001, 0b11011, 0b10101, 0b10101, 0b10001, 0b10001, 0b10001],
        'N' => [0b10001, 0b11001, 0b10101, 0b10101, 0b10011, 0b10001, 0b10001],
        'O' => [0b01110, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110],
        'P' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10000, 0b10000, 0b10000],
        'Q' => [0b01110, 0b10001, 0b10001, 0b10001, 0b10101, 0b10010, 0b01101],
        'R' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10100, 0b10010, 0b10001],
        'S' => [0b01111, 0b10000, 0b01110, 0b00001, 0b00001, 0b10001, 0b01110],
        'T' => [0b11111, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100],
        'U' => [0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110],
        'V' => [0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01010, 0b00100],
        'W' => [0b10001, 0b10001, 0b10001, 0b10101, 0b10101, 0b11011, 0b10001],
        'X' => [0b10001, 0b10001, 0b01010, 0b00100, 0b01010, 0b10001, 0b10001],
        'Y' => [0b10001, 0b10001, 0b01010, 0b00100, 0b00100, 0b00100, 0b00100],
        'Z' => [0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b10000, 0b11111],
        '0' => [0b01110, 0b10001, 0b10011, 0b10101, 0b11001, 0b10001, 0b01110],
        '1' => [0b00100, 0b01100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110],
        '2' => [0b01110, 0b10001, 0b00001, 0b00010, 0b00100, 0b01000, 0b11111],
        '3' => [0b11110, 0b00001, 0b00001, 0b01110, 0b00001, 0b00001, 0b11110],
        '4' => [0b00010, 0b00110, 0b01010, 0b10010, 0b11111, 0b00010, 0b00010],
        '5' => [0b11111, 0b10000, 0b11110, 0b00001, 0b00001, 0b10001, 0b01110],
        '6' => [0b00110, 0b01000, 0b10000, 0b11110, 0b10001, 0b10001, 0b01110],
        '7' => [0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b01000, 0b01000],
        '8' => [0b01110, 0b10001, 0b10001, 0b01110, 0b10001, 0b10001, 0b01110],
        '9' => [0b01110, 0b10001, 0b10001, 0b01111, 0b00001, 0b00010, 0b01100],
        ':' => [0, 0b00110, 0b00110, 0, 0b00110, 0b00110, 0],
        '.' => [0, 0, 0, 0, 0, 0b00110, 0b00110],
        '-' => [0, 0, 0, 0b11111, 0, 0, 0],
        '_' => [0, 0, 0, 0, 0, 0, 0b11111],
        '/' => [0b00001, 0b00010, 0b00010, 0b00100, 0b01000, 0b01000, 0b10000],
        '@' => [0b01110, 0b10001, 0b10111, 0b10101, 0b10111, 0b10000, 0b01110],
        ' ' => [0, 0, 0, 0, 0, 0, 0],
        _ => return None,
    };
    Some(bits)
}
