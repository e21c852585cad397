//! The host graphics surface seam.
//!
//! Real hosts rasterize onto their own bitmap; the board only needs to
//! capture, restore and stamp points. [`MemorySurface`] is a headless RGBA
//! implementation used by tests and server-side tooling.

use sketchroom_shared::{Point, Tool};

use crate::error::RasterError;

const RASTER_MAGIC: [u8; 4] = *b"SKRR";
const RASTER_HEADER_LEN: usize = RASTER_MAGIC.len() + 8;

/// A full-canvas RGBA8 bitmap.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Raster {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl Raster {
    /// A white, fully opaque canvas.
    pub fn blank(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![255; width as usize * height as usize * 4],
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut payload = Vec::with_capacity(RASTER_HEADER_LEN + self.pixels.len());
        payload.extend_from_slice(&RASTER_MAGIC);
        payload.extend_from_slice(&self.width.to_le_bytes());
        payload.extend_from_slice(&self.height.to_le_bytes());
        payload.extend_from_slice(&self.pixels);
        payload
    }

    pub fn decode(payload: &[u8]) -> Result<Self, RasterError> {
        if payload.len() < RASTER_HEADER_LEN || !payload.starts_with(&RASTER_MAGIC) {
            return Err(RasterError::InvalidData);
        }
        let width = u32::from_le_bytes(
            payload[4..8]
                .try_into()
                .map_err(|_| RasterError::InvalidData)?,
        );
        let height = u32::from_le_bytes(
            payload[8..12]
                .try_into()
                .map_err(|_| RasterError::InvalidData)?,
        );
        let pixels = payload[RASTER_HEADER_LEN..].to_vec();
        if pixels.len() != width as usize * height as usize * 4 {
            return Err(RasterError::SizeMismatch {
                width,
                height,
                len: pixels.len(),
            });
        }
        Ok(Self {
            width,
            height,
            pixels,
        })
    }
}

/// Brush parameters for one stamped point.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Brush<'a> {
    pub color: &'a str,
    pub size: f32,
    pub tool: Tool,
}

pub trait Surface {
    fn capture(&self) -> Raster;
    fn restore(&mut self, raster: &Raster);
    /// Draws a point, joined to `from` with a segment when given.
    fn draw(&mut self, from: Option<Point>, to: Point, brush: Brush<'_>);
    fn clear(&mut self);
}

pub struct MemorySurface {
    raster: Raster,
}

impl MemorySurface {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            raster: Raster::blank(width, height),
        }
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.raster.width || y >= self.raster.height {
            return None;
        }
        let index = (y as usize * self.raster.width as usize + x as usize) * 4;
        self.raster.pixels[index..index + 4].try_into().ok()
    }

    fn stamp(&mut self, center: Point, radius: f64, rgba: [u8; 4]) {
        let min_x = (center.x - radius).floor().max(0.0) as i64;
        let min_y = (center.y - radius).floor().max(0.0) as i64;
        let max_x = ((center.x + radius).ceil() as i64).min(self.raster.width as i64 - 1);
        let max_y = ((center.y + radius).ceil() as i64).min(self.raster.height as i64 - 1);
        for y in min_y..=max_y {
            for x in min_x..=max_x {
                let dx = x as f64 + 0.5 - center.x;
                let dy = y as f64 + 0.5 - center.y;
                if dx * dx + dy * dy <= radius * radius {
                    let index = (y as usize * self.raster.width as usize + x as usize) * 4;
                    self.raster.pixels[index..index + 4].copy_from_slice(&rgba);
                }
            }
        }
    }
}

impl Surface for MemorySurface {
    fn capture(&self) -> Raster {
        self.raster.clone()
    }

    fn restore(&mut self, raster: &Raster) {
        self.raster = raster.clone();
    }

    fn draw(&mut self, from: Option<Point>, to: Point, brush: Brush<'_>) {
        let rgba = match brush.tool {
            Tool::Pen => parse_hex(brush.color).unwrap_or([0x1f, 0x1f, 0x1f, 255]),
            Tool::Eraser => [255, 255, 255, 255],
        };
        let radius = (brush.size as f64 / 2.0).max(0.5);
        let from = from.unwrap_or(to);
        if !(from.is_finite() && to.is_finite()) {
            return;
        }
        // Only the part of the segment that can touch the canvas is stepped.
        let bounds = (
            Point::new(-radius, -radius),
            Point::new(
                self.raster.width as f64 + radius,
                self.raster.height as f64 + radius,
            ),
        );
        let Some((from, to)) = clip_segment(from, to, bounds) else {
            return;
        };
        let distance = ((to.x - from.x).powi(2) + (to.y - from.y).powi(2)).sqrt();
        let steps = (distance / (radius / 2.0).max(0.5)).ceil().max(1.0) as usize;
        for step in 0..=steps {
            let t = step as f64 / steps as f64;
            let point = Point::new(from.x + (to.x - from.x) * t, from.y + (to.y - from.y) * t);
            self.stamp(point, radius, rgba);
        }
    }

    fn clear(&mut self) {
        self.raster = Raster::blank(self.raster.width, self.raster.height);
    }
}

/// Liang-Barsky clip of the segment `from..to` against an axis-aligned box.
fn clip_segment(from: Point, to: Point, (min, max): (Point, Point)) -> Option<(Point, Point)> {
    let dx = to.x - from.x;
    let dy = to.y - from.y;
    let mut enter = 0.0_f64;
    let mut exit = 1.0_f64;
    for (p, q) in [
        (-dx, from.x - min.x),
        (dx, max.x - from.x),
        (-dy, from.y - min.y),
        (dy, max.y - from.y),
    ] {
        if p == 0.0 {
            if q < 0.0 {
                return None;
            }
            continue;
        }
        let r = q / p;
        if p < 0.0 {
            enter = enter.max(r);
        } else {
            exit = exit.min(r);
        }
        if enter > exit {
            return None;
        }
    }
    let at = |t: f64| Point::new(from.x + dx * t, from.y + dy * t);
    Some((at(enter), at(exit)))
}

fn parse_hex(color: &str) -> Option<[u8; 4]> {
    let digits = color.strip_prefix('#')?;
    let channel = |s: &str| u8::from_str_radix(s, 16).ok();
    match digits.len() {
        3 => {
            let mut rgba = [255; 4];
            for (i, c) in digits.chars().enumerate() {
                let value = c.to_digit(16)? as u8;
                rgba[i] = value * 17;
            }
            Some(rgba)
        }
        6 => Some([
            channel(&digits[0..2])?,
            channel(&digits[2..4])?,
            channel(&digits[4..6])?,
            255,
        ]),
        _ => None,
    }
}
