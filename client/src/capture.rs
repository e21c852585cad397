//! Pointer samples to normalized canvas samples.

use sketchroom_shared::{
    is_hex_color, sanitize_size, DrawSample, Point, Tool, DEFAULT_BRUSH_SIZE, DEFAULT_COLOR,
};

pub const MAX_SAMPLES_PER_GESTURE: usize = 5000;

/// Maps screen coordinates onto the canvas bitmap. `offset` is the pan in
/// screen units, `pixel_ratio` the bitmap pixels per screen unit.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Viewport {
    pub offset_x: f64,
    pub offset_y: f64,
    pub zoom: f64,
    pub pixel_ratio: f64,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            offset_x: 0.0,
            offset_y: 0.0,
            zoom: 1.0,
            pixel_ratio: 1.0,
        }
    }
}

impl Viewport {
    pub fn to_canvas(&self, screen: Point) -> Option<Point> {
        if !(self.zoom > 0.0 && self.pixel_ratio > 0.0) {
            return None;
        }
        let scale = self.pixel_ratio / self.zoom;
        let point = Point::new(
            (screen.x - self.offset_x) * scale,
            (screen.y - self.offset_y) * scale,
        );
        point.is_finite().then_some(point)
    }
}

#[derive(Debug)]
pub struct StrokeCapture {
    viewport: Viewport,
    tool: Tool,
    color: String,
    brush_size: f32,
    active: bool,
    last: Option<Point>,
    samples: usize,
}

impl Default for StrokeCapture {
    fn default() -> Self {
        Self::new(Viewport::default())
    }
}

impl StrokeCapture {
    pub fn new(viewport: Viewport) -> Self {
        Self {
            viewport,
            tool: Tool::Pen,
            color: DEFAULT_COLOR.to_string(),
            brush_size: DEFAULT_BRUSH_SIZE,
            active: false,
            last: None,
            samples: 0,
        }
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    pub fn set_viewport(&mut self, viewport: Viewport) {
        self.viewport = viewport;
    }

    pub fn tool(&self) -> Tool {
        self.tool
    }

    pub fn set_tool(&mut self, tool: Tool) {
        self.tool = tool;
    }

    pub fn color(&self) -> &str {
        &self.color
    }

    /// Returns false and keeps the current color when `color` is not a hex
    /// color.
    pub fn set_color(&mut self, color: &str) -> bool {
        if !is_hex_color(color) {
            return false;
        }
        self.color = color.to_ascii_lowercase();
        true
    }

    pub fn brush_size(&self) -> f32 {
        self.brush_size
    }

    pub fn set_brush_size(&mut self, size: f32) {
        self.brush_size = sanitize_size(size);
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Starts a gesture. A point outside the viewport mapping starts nothing.
    pub fn begin(&mut self, screen: Point) -> Option<DrawSample> {
        self.active = false;
        self.last = None;
        self.samples = 0;
        let point = self.viewport.to_canvas(screen)?;
        self.active = true;
        Some(self.sample(point, true))
    }

    pub fn extend(&mut self, screen: Point) -> Option<DrawSample> {
        if !self.active || self.samples >= MAX_SAMPLES_PER_GESTURE {
            return None;
        }
        let point = self.viewport.to_canvas(screen)?;
        if self.last == Some(point) {
            return None;
        }
        Some(self.sample(point, false))
    }

    /// Ends the gesture; returns whether one was in progress.
    pub fn end(&mut self) -> bool {
        let was_active = self.active;
        self.active = false;
        self.last = None;
        was_active
    }

    fn sample(&mut self, point: Point, stroke_start: bool) -> DrawSample {
        self.last = Some(point);
        self.samples += 1;
        DrawSample {
            x: point.x,
            y: point.y,
            color: self.color.clone(),
            brush_size: self.brush_size,
            tool: self.tool,
            stroke_start,
        }
    }
}
