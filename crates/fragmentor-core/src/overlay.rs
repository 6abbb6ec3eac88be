//! HUD overlay drawn over a horizontally mirrored camera view.
//!
//! Detector coordinates are raw (unmirrored) while the view is shown
//! mirrored. Geometry is therefore drawn with raw coordinates under a single
//! horizontal-flip transform, and text is drawn without any transform at a
//! manually mirrored anchor (`width - x`) so glyphs are never reversed.
//! Mixing the two spaces is the easy mistake here; [`render`] keeps every
//! geometry call inside one `save`/`restore` pair and every text call after it.

use crate::types::{Detection, Snapshot};
use ab_glyph::{FontVec, PxScale};
use image::{Rgba, RgbaImage};
use imageproc::drawing::{draw_filled_circle_mut, draw_line_segment_mut, draw_text_mut, text_size};
use std::path::Path;
use thiserror::Error;

pub type Color = Rgba<u8>;

pub const HUD_CYAN: Color = Rgba([0, 243, 255, 255]);
pub const HUD_MAGENTA: Color = Rgba([255, 0, 85, 255]);
const EYE_STROKE: Color = Rgba([255, 0, 85, 128]);
const LANDMARK_FILL: Color = Rgba([255, 255, 255, 102]);
const SCAN_STROKE: Color = Rgba([0, 255, 255, 51]);
const SEARCHING_FILL: Color = Rgba([0, 255, 255, 77]);

/// Gap between the face box and the corner brackets.
const BRACKET_PAD: f32 = 20.0;
/// Length of each bracket arm.
const BRACKET_ARM: f32 = 20.0;
const LABEL_GAP: f32 = 5.0;
const LABEL_LINE_HEIGHT: f32 = 15.0;
const LABEL_SIZE: f32 = 12.0;
const SEARCHING_SIZE: f32 = 16.0;
const SCAN_SPEED: f64 = 3.0;

#[derive(Error, Debug)]
pub enum CanvasError {
    #[error("font could not be parsed: {0}")]
    Font(String),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("image: {0}")]
    Image(#[from] image::ImageError),
    #[error("overlay is {overlay:?} but frame is {frame:?}")]
    SizeMismatch {
        overlay: (u32, u32),
        frame: (u32, u32),
    },
}

/// 2D affine transform in canvas convention: `x' = a·x + c·y + e`, `y' = b·x + d·y + f`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    pub a: f32,
    pub b: f32,
    pub c: f32,
    pub d: f32,
    pub e: f32,
    pub f: f32,
}

impl Transform {
    pub const IDENTITY: Self = Self { a: 1.0, b: 0.0, c: 0.0, d: 1.0, e: 0.0, f: 0.0 };

    pub fn apply(&self, (x, y): (f32, f32)) -> (f32, f32) {
        (
            self.a * x + self.c * y + self.e,
            self.b * x + self.d * y + self.f,
        )
    }

    /// Prepend a translation, as a 2D context's `translate` does.
    fn translated(self, tx: f32, ty: f32) -> Self {
        Self {
            e: self.a * tx + self.c * ty + self.e,
            f: self.b * tx + self.d * ty + self.f,
            ..self
        }
    }

    fn scaled(self, sx: f32, sy: f32) -> Self {
        Self {
            a: self.a * sx,
            b: self.b * sx,
            c: self.c * sy,
            d: self.d * sy,
            ..self
        }
    }

    /// Whether this transform reverses the horizontal axis.
    pub fn is_mirrored(&self) -> bool {
        self.a * self.d - self.b * self.c < 0.0
    }
}

/// Current transform plus the `save`d ones.
#[derive(Debug, Clone)]
pub struct TransformStack {
    current: Transform,
    saved: Vec<Transform>,
}

impl Default for TransformStack {
    fn default() -> Self {
        Self {
            current: Transform::IDENTITY,
            saved: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Stroke {
    pub color: Color,
    pub width: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextAlign {
    Left,
    Center,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TextStyle {
    pub color: Color,
    pub size: f32,
    pub align: TextAlign,
}

/// Minimal 2D drawing context.
pub trait Canvas {
    fn width(&self) -> u32;
    fn height(&self) -> u32;
    /// Resize the backing store; clears it and resets the transform.
    fn resize(&mut self, width: u32, height: u32);
    fn clear(&mut self);
    fn transform_stack(&mut self) -> &mut TransformStack;

    fn stroke_polyline(&mut self, points: &[(f32, f32)], closed: bool, stroke: Stroke);
    fn fill_circle(&mut self, center: (f32, f32), radius: f32, color: Color);
    /// Draw text with its baseline at `at.1`.
    fn fill_text(&mut self, text: &str, at: (f32, f32), style: TextStyle);

    fn current_transform(&mut self) -> Transform {
        self.transform_stack().current
    }

    fn save(&mut self) {
        let stack = self.transform_stack();
        stack.saved.push(stack.current);
    }

    fn restore(&mut self) {
        let stack = self.transform_stack();
        if let Some(t) = stack.saved.pop() {
            stack.current = t;
        }
    }

    fn translate(&mut self, tx: f32, ty: f32) {
        let stack = self.transform_stack();
        stack.current = stack.current.translated(tx, ty);
    }

    fn scale(&mut self, sx: f32, sy: f32) {
        let stack = self.transform_stack();
        stack.current = stack.current.scaled(sx, sy);
    }
}

/// Render one overlay pass.
///
/// `frame_size` is the camera's native size; the canvas is resized to match
/// when it differs. `time_secs` drives the scan line.
pub fn render<C: Canvas>(
    canvas: &mut C,
    frame_size: (u32, u32),
    live: Option<&Detection>,
    snapshot: Option<&Snapshot>,
    expression: &str,
    time_secs: f64,
) {
    if (canvas.width(), canvas.height()) != frame_size {
        canvas.resize(frame_size.0, frame_size.1);
    }
    canvas.clear();

    let width = canvas.width() as f32;
    let height = canvas.height() as f32;

    let Some(face) = live else {
        canvas.fill_text(
            "SEARCHING_SUBJECT...",
            (width / 2.0, height / 2.0),
            TextStyle { color: SEARCHING_FILL, size: SEARCHING_SIZE, align: TextAlign::Center },
        );
        return;
    };

    let b = &face.bbox;
    let (x, y, w, h) = (b.x, b.y, b.width, b.height);

    // Mirrored space: raw detector coordinates from here to restore().
    canvas.save();
    canvas.translate(width, 0.0);
    canvas.scale(-1.0, 1.0);

    draw_brackets(canvas, x, y, w, h);

    for (i, p) in face.landmarks.points().iter().enumerate() {
        if i % 4 == 0 || i > 30 {
            canvas.fill_circle((p.x, p.y), 1.0, LANDMARK_FILL);
        }
    }

    let eye_stroke = Stroke { color: EYE_STROKE, width: 1.0 };
    for eye in [face.landmarks.left_eye(), face.landmarks.right_eye()] {
        let pts: Vec<(f32, f32)> = eye.iter().map(|p| (p.x, p.y)).collect();
        canvas.stroke_polyline(&pts, true, eye_stroke);
    }

    if snapshot.is_none() {
        let phase = ((time_secs * SCAN_SPEED).sin() + 1.0) / 2.0;
        let scan_y = y + phase as f32 * h;
        canvas.stroke_polyline(
            &[(x - BRACKET_PAD, scan_y), (x + w + BRACKET_PAD, scan_y)],
            false,
            Stroke { color: SCAN_STROKE, width: 2.0 },
        );
    }

    canvas.restore();

    // Normal space. The raw left edge `x` is the visual right edge after mirroring.
    let text_x = width - x + BRACKET_PAD + LABEL_GAP;
    let score_text = match snapshot {
        Some(_) => "ID_LOCKED".to_string(),
        None => format!("ID_SIG: {}%", (b.confidence * 100.0).floor() as u32),
    };
    canvas.fill_text(
        &score_text,
        (text_x, y),
        TextStyle { color: HUD_CYAN, size: LABEL_SIZE, align: TextAlign::Left },
    );
    canvas.fill_text(
        &format!("EXPR: {}", expression.to_uppercase()),
        (text_x, y + LABEL_LINE_HEIGHT),
        TextStyle { color: HUD_MAGENTA, size: LABEL_SIZE, align: TextAlign::Left },
    );
}

fn draw_brackets<C: Canvas>(canvas: &mut C, x: f32, y: f32, w: f32, h: f32) {
    let stroke = Stroke { color: HUD_CYAN, width: 2.0 };
    let (l, r) = (x - BRACKET_PAD, x + w + BRACKET_PAD);
    let (t, btm) = (y - BRACKET_PAD, y + h + BRACKET_PAD);
    let arm = BRACKET_ARM;

    canvas.stroke_polyline(&[(l, t + arm), (l, t), (l + arm, t)], false, stroke);
    canvas.stroke_polyline(&[(r - arm, t), (r, t), (r, t + arm)], false, stroke);
    canvas.stroke_polyline(&[(l, btm - arm), (l, btm), (l + arm, btm)], false, stroke);
    canvas.stroke_polyline(&[(r - arm, btm), (r, btm), (r, btm - arm)], false, stroke);
}

/// RGBA raster canvas backed by `imageproc`.
///
/// Text needs a font; without one, text calls are skipped.
pub struct RasterCanvas {
    image: RgbaImage,
    stack: TransformStack,
    font: Option<FontVec>,
}

impl RasterCanvas {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            image: RgbaImage::new(width, height),
            stack: TransformStack::default(),
            font: None,
        }
    }

    pub fn with_font(mut self, font: FontVec) -> Self {
        self.font = Some(font);
        self
    }

    pub fn load_font(path: &Path) -> Result<FontVec, CanvasError> {
        let bytes = std::fs::read(path)?;
        FontVec::try_from_vec(bytes).map_err(|e| CanvasError::Font(e.to_string()))
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    fn segment(&mut self, from: (f32, f32), to: (f32, f32), stroke: Stroke) {
        draw_line_segment_mut(&mut self.image, from, to, stroke.color);
        // Thicken by offsetting along the minor axis.
        let extra = stroke.width.round() as i32 - 1;
        let steep = (to.1 - from.1).abs() > (to.0 - from.0).abs();
        for k in 1..=extra.max(0) {
            let o = k as f32;
            let (a, b) = if steep {
                ((from.0 + o, from.1), (to.0 + o, to.1))
            } else {
                ((from.0, from.1 + o), (to.0, to.1 + o))
            };
            draw_line_segment_mut(&mut self.image, a, b, stroke.color);
        }
    }
}

impl Canvas for RasterCanvas {
    fn width(&self) -> u32 {
        self.image.width()
    }

    fn height(&self) -> u32 {
        self.image.height()
    }

    fn resize(&mut self, width: u32, height: u32) {
        self.image = RgbaImage::new(width, height);
        self.stack = TransformStack::default();
    }

    fn clear(&mut self) {
        for p in self.image.pixels_mut() {
            *p = Rgba([0, 0, 0, 0]);
        }
    }

    fn transform_stack(&mut self) -> &mut TransformStack {
        &mut self.stack
    }

    fn stroke_polyline(&mut self, points: &[(f32, f32)], closed: bool, stroke: Stroke) {
        let t = self.stack.current;
        let mapped: Vec<(f32, f32)> = points.iter().map(|&p| t.apply(p)).collect();
        for pair in mapped.windows(2) {
            self.segment(pair[0], pair[1], stroke);
        }
        if closed && mapped.len() > 2 {
            self.segment(mapped[mapped.len() - 1], mapped[0], stroke);
        }
    }

    fn fill_circle(&mut self, center: (f32, f32), radius: f32, color: Color) {
        let (cx, cy) = self.stack.current.apply(center);
        let r = (radius * self.stack.current.a.abs()).round().max(1.0) as i32;
        draw_filled_circle_mut(&mut self.image, (cx.round() as i32, cy.round() as i32), r, color);
    }

    fn fill_text(&mut self, text: &str, at: (f32, f32), style: TextStyle) {
        let Some(font) = &self.font else {
            tracing::trace!(text, "no overlay font configured; skipping text");
            return;
        };
        // Only the anchor is transformed; glyphs are always drawn upright.
        let (x, y) = self.stack.current.apply(at);
        let scale = PxScale::from(style.size);
        let (tw, _) = text_size(scale, font, text);
        let left = match style.align {
            TextAlign::Left => x,
            TextAlign::Center => x - tw as f32 / 2.0,
        };
        let top = y - style.size;
        draw_text_mut(&mut self.image, style.color, left.round() as i32, top.round() as i32, scale, font, text);
    }
}

/// Mirror a grayscale frame horizontally and alpha-blend `overlay` on top,
/// producing what the user sees.
pub fn compose_mirrored(
    gray: &[u8],
    width: u32,
    height: u32,
    overlay: &RgbaImage,
) -> Result<RgbaImage, CanvasError> {
    if overlay.dimensions() != (width, height) || gray.len() < (width * height) as usize {
        return Err(CanvasError::SizeMismatch {
            overlay: overlay.dimensions(),
            frame: (width, height),
        });
    }

    Ok(RgbaImage::from_fn(width, height, |x, y| {
        let v = gray[(y * width + (width - 1 - x)) as usize] as f32;
        let Rgba([r, g, b, a]) = *overlay.get_pixel(x, y);
        let alpha = a as f32 / 255.0;
        let blend = |c: u8| (c as f32 * alpha + v * (1.0 - alpha)).round() as u8;
        Rgba([blend(r), blend(g), blend(b), 255])
    }))
}

/// Canvas that records draw calls with the transform in effect. Used to
/// check which coordinate space each call was issued in.
#[derive(Debug, Default)]
pub struct RecordingCanvas {
    width: u32,
    height: u32,
    stack: TransformStack,
    pub commands: Vec<DrawCommand>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DrawCommand {
    Clear,
    Polyline { points: Vec<(f32, f32)>, closed: bool, transform: Transform },
    Circle { center: (f32, f32), transform: Transform },
    Text { text: String, at: (f32, f32), transform: Transform },
}

impl RecordingCanvas {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            ..Self::default()
        }
    }

    pub fn texts(&self) -> Vec<(&str, (f32, f32))> {
        self.commands
            .iter()
            .filter_map(|c| match c {
                DrawCommand::Text { text, at, .. } => Some((text.as_str(), *at)),
                _ => None,
            })
            .collect()
    }
}

impl Canvas for RecordingCanvas {
    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn resize(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
        self.stack = TransformStack::default();
    }

    fn clear(&mut self) {
        self.commands.push(DrawCommand::Clear);
    }

    fn transform_stack(&mut self) -> &mut TransformStack {
        &mut self.stack
    }

    fn stroke_polyline(&mut self, points: &[(f32, f32)], closed: bool, _stroke: Stroke) {
        let transform = self.stack.current;
        self.commands.push(DrawCommand::Polyline { points: points.to_vec(), closed, transform });
    }

    fn fill_circle(&mut self, center: (f32, f32), _radius: f32, _color: Color) {
        let transform = self.stack.current;
        self.commands.push(DrawCommand::Circle { center, transform });
    }

    fn fill_text(&mut self, text: &str, at: (f32, f32), _style: TextStyle) {
        let transform = self.stack.current;
        self.commands.push(DrawCommand::Text { text: text.to_string(), at, transform });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::fixtures::detection;

    const FRAME: (u32, u32) = (1280, 720);

    #[test]
    fn test_flip_transform_maps_raw_to_visual() {
        let mut c = RecordingCanvas::new(1280, 720);
        c.save();
        c.translate(1280.0, 0.0);
        c.scale(-1.0, 1.0);
        let t = c.current_transform();
        assert!(t.is_mirrored());
        assert_eq!(t.apply((400.0, 50.0)), (880.0, 50.0));
        c.restore();
        assert_eq!(c.current_transform(), Transform::IDENTITY);
    }

    #[test]
    fn test_restore_without_save_is_noop() {
        let mut c = RecordingCanvas::new(10, 10);
        c.translate(3.0, 4.0);
        c.restore();
        assert_eq!(c.current_transform().apply((0.0, 0.0)), (3.0, 4.0));
    }

    #[test]
    fn test_no_face_draws_only_searching() {
        let mut c = RecordingCanvas::new(0, 0);
        render(&mut c, FRAME, None, None, "neutral", 0.0);
        assert_eq!((c.width(), c.height()), FRAME);
        assert_eq!(c.texts(), vec![("SEARCHING_SUBJECT...", (640.0, 360.0))]);
        assert!(!c.commands.iter().any(|cmd| matches!(cmd, DrawCommand::Polyline { .. } | DrawCommand::Circle { .. })));
    }

    #[test]
    fn test_geometry_in_flipped_space_text_in_normal_space() {
        let live = detection(350.0, 200.0, 100.0, 160.0, 30.0);
        let mut c = RecordingCanvas::new(1280, 720);
        render(&mut c, FRAME, Some(&live), None, "happy", 0.0);

        let mut geometry = 0;
        for cmd in &c.commands {
            match cmd {
                DrawCommand::Polyline { transform, .. } | DrawCommand::Circle { transform, .. } => {
                    geometry += 1;
                    assert!(transform.is_mirrored(), "geometry drawn unmirrored: {cmd:?}");
                    assert_eq!(transform.apply((0.0, 0.0)), (1280.0, 0.0));
                }
                DrawCommand::Text { transform, .. } => {
                    assert_eq!(*transform, Transform::IDENTITY, "text drawn under a transform");
                }
                DrawCommand::Clear => {}
            }
        }
        assert!(geometry > 0);
    }

    #[test]
    fn test_geometry_uses_raw_coordinates() {
        let live = detection(350.0, 200.0, 100.0, 160.0, 30.0);
        let mut c = RecordingCanvas::new(1280, 720);
        render(&mut c, FRAME, Some(&live), None, "happy", 0.0);

        // First bracket: top-left corner in raw space.
        let first = c.commands.iter().find_map(|cmd| match cmd {
            DrawCommand::Polyline { points, .. } => Some(points.clone()),
            _ => None,
        });
        assert_eq!(first.unwrap()[1], (330.0, 180.0));
    }

    #[test]
    fn test_text_anchor_manually_mirrored() {
        let live = detection(350.0, 200.0, 100.0, 160.0, 30.0);
        let mut c = RecordingCanvas::new(1280, 720);
        render(&mut c, FRAME, Some(&live), None, "happy", 0.0);

        let texts = c.texts();
        assert_eq!(texts.len(), 2);
        // visual x = 1280 - 350 = 930, plus pad and gap.
        assert_eq!(texts[0], ("ID_SIG: 93%", (955.0, 200.0)));
        assert_eq!(texts[1], ("EXPR: HAPPY", (955.0, 215.0)));
    }

    #[test]
    fn test_locked_label_and_no_scan_line() {
        let live = detection(350.0, 200.0, 100.0, 160.0, 30.0);
        let snapshot = Snapshot::capture(&live);
        let mut with_snapshot = RecordingCanvas::new(1280, 720);
        render(&mut with_snapshot, FRAME, Some(&live), Some(&snapshot), "sad", 1.0);
        let mut without = RecordingCanvas::new(1280, 720);
        render(&mut without, FRAME, Some(&live), None, "sad", 1.0);

        assert_eq!(with_snapshot.texts()[0].0, "ID_LOCKED");
        let polylines = |c: &RecordingCanvas| {
            c.commands.iter().filter(|cmd| matches!(cmd, DrawCommand::Polyline { .. })).count()
        };
        // 4 brackets + 2 eyes, plus the scan line only while unlocked.
        assert_eq!(polylines(&with_snapshot), 6);
        assert_eq!(polylines(&without), 7);
    }

    #[test]
    fn test_landmark_subsampling() {
        let live = detection(350.0, 200.0, 100.0, 160.0, 30.0);
        let mut c = RecordingCanvas::new(1280, 720);
        render(&mut c, FRAME, Some(&live), None, "happy", 0.0);
        let dots = c.commands.iter().filter(|cmd| matches!(cmd, DrawCommand::Circle { .. })).count();
        // i % 4 == 0 for i in 0..=30 → 8, plus 31..68 → 37.
        assert_eq!(dots, 8 + 37);
    }

    #[test]
    fn test_scan_line_oscillates_within_box() {
        let live = detection(350.0, 200.0, 100.0, 160.0, 30.0);
        for t in [0.0, 0.3, 0.9, 2.5] {
            let mut c = RecordingCanvas::new(1280, 720);
            render(&mut c, FRAME, Some(&live), None, "happy", t);
            let scan = c.commands.iter().rev().find_map(|cmd| match cmd {
                DrawCommand::Polyline { points, closed: false, .. } if points.len() == 2 => Some(points[0].1),
                _ => None,
            });
            let y = scan.unwrap();
            assert!((200.0..=360.0).contains(&y), "scan y {y} outside box at t={t}");
        }
    }

    #[test]
    fn test_raster_geometry_lands_mirrored() {
        let live = detection(100.0, 100.0, 50.0, 50.0, 30.0);
        let mut c = RasterCanvas::new(320, 240);
        render(&mut c, (320, 240), Some(&live), None, "happy", 0.0);

        // Raw top-left bracket corner (80, 80) appears at visual x = 320 - 80.
        assert_eq!(c.image().get_pixel(240, 80)[3], 255);
        assert_eq!(c.image().get_pixel(80, 80)[3], 0);
    }

    #[test]
    fn test_raster_resize_on_frame_change() {
        let mut c = RasterCanvas::new(10, 10);
        render(&mut c, (64, 48), None, None, "", 0.0);
        assert_eq!(c.image().dimensions(), (64, 48));
    }

    #[test]
    fn test_compose_mirrored() {
        let gray = vec![10u8, 20, 30, 40];
        let mut overlay = RgbaImage::new(2, 2);
        overlay.put_pixel(1, 1, Rgba([255, 0, 0, 255]));
        let out = compose_mirrored(&gray, 2, 2, &overlay).unwrap();
        assert_eq!(out.get_pixel(0, 0), &Rgba([20, 20, 20, 255]));
        assert_eq!(out.get_pixel(1, 0), &Rgba([10, 10, 10, 255]));
        assert_eq!(out.get_pixel(1, 1), &Rgba([255, 0, 0, 255]));
    }

    #[test]
    fn test_compose_size_mismatch() {
        let overlay = RgbaImage::new(4, 4);
        assert!(matches!(
            compose_mirrored(&[0; 4], 2, 2, &overlay),
            Err(CanvasError::SizeMismatch { .. })
        ));
    }
}
