//! Canvas records: freehand strokes and geometric shapes.

mod stroke;
mod text;

pub use stroke::{Stroke, StrokeMode};
pub use text::{
    DEFAULT_FONT_FAMILY, DEFAULT_FONT_SIZE, DEFAULT_TEXT, DEFAULT_TEXT_WIDTH, NEW_TEXT_WIDTH,
    TextAlign, TextShape,
};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque record identifier, unique per creation.
pub type RecordId = String;

/// Offset applied to both axes when a shape is duplicated.
pub const DUPLICATE_OFFSET: f64 = 12.0;

/// Generate a fresh record id.
pub fn new_id() -> RecordId {
    Uuid::new_v4().to_string()
}

/// Rectangle or ellipse bounds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoxShape {
    pub id: RecordId,
    pub color: String,
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
}

impl BoxShape {
    pub fn new(x: f64, y: f64, w: f64, h: f64, color: impl Into<String>) -> Self {
        Self {
            id: new_id(),
            color: color.into(),
            x,
            y,
            w,
            h,
        }
    }

    /// Bounds with the origin at the top-left and non-negative extents.
    ///
    /// A draft dragged up or to the left has negative `w`/`h`.
    pub fn normalized(&self) -> Self {
        Self {
            id: self.id.clone(),
            color: self.color.clone(),
            x: self.x.min(self.x + self.w),
            y: self.y.min(self.y + self.h),
            w: self.w.abs(),
            h: self.h.abs(),
        }
    }
}

/// Arrow from `(x1, y1)` to `(x2, y2)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArrowShape {
    pub id: RecordId,
    pub color: String,
    pub points: [f64; 4],
}

impl ArrowShape {
    pub fn new(x1: f64, y1: f64, x2: f64, y2: f64, color: impl Into<String>) -> Self {
        Self {
            id: new_id(),
            color: color.into(),
            points: [x1, y1, x2, y2],
        }
    }
}

/// A shape on the canvas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Shape {
    Rect(BoxShape),
    Ellipse(BoxShape),
    Arrow(ArrowShape),
    Text(TextShape),
}

/// Discriminant of [`Shape`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShapeKind {
    Rect,
    Ellipse,
    Arrow,
    Text,
}

impl ShapeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ShapeKind::Rect => "rect",
            ShapeKind::Ellipse => "ellipse",
            ShapeKind::Arrow => "arrow",
            ShapeKind::Text => "text",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "rect" => Some(ShapeKind::Rect),
            "ellipse" => Some(ShapeKind::Ellipse),
            "arrow" => Some(ShapeKind::Arrow),
            "text" => Some(ShapeKind::Text),
            _ => None,
        }
    }
}

impl Shape {
    pub fn id(&self) -> &str {
        match self {
            Shape::Rect(b) | Shape::Ellipse(b) => &b.id,
            Shape::Arrow(a) => &a.id,
            Shape::Text(t) => &t.id,
        }
    }

    pub fn kind(&self) -> ShapeKind {
        match self {
            Shape::Rect(_) => ShapeKind::Rect,
            Shape::Ellipse(_) => ShapeKind::Ellipse,
            Shape::Arrow(_) => ShapeKind::Arrow,
            Shape::Text(_) => ShapeKind::Text,
        }
    }

    pub fn color(&self) -> &str {
        match self {
            Shape::Rect(b) | Shape::Ellipse(b) => &b.color,
            Shape::Arrow(a) => &a.color,
            Shape::Text(t) => &t.color,
        }
    }

    fn set_id(&mut self, id: RecordId) {
        match self {
            Shape::Rect(b) | Shape::Ellipse(b) => b.id = id,
            Shape::Arrow(a) => a.id = id,
            Shape::Text(t) => t.id = id,
        }
    }

    /// Move the shape by `(dx, dy)`. Arrows move both endpoints.
    pub fn translate(&mut self, dx: f64, dy: f64) {
        match self {
            Shape::Rect(b) | Shape::Ellipse(b) => {
                b.x += dx;
                b.y += dy;
            }
            Shape::Arrow(a) => {
                for (i, p) in a.points.iter_mut().enumerate() {
                    *p += if i % 2 == 0 { dx } else { dy };
                }
            }
            Shape::Text(t) => {
                t.x += dx;
                t.y += dy;
            }
        }
    }

    /// Copy with a fresh id, offset by [`DUPLICATE_OFFSET`].
    pub fn duplicate(&self) -> Self {
        let mut copy = self.clone();
        copy.set_id(new_id());
        copy.translate(DUPLICATE_OFFSET, DUPLICATE_OFFSET);
        copy
    }

    /// Normalize draft geometry before it is committed.
    pub fn normalized(self) -> Self {
        match self {
            Shape::Rect(b) => Shape::Rect(b.normalized()),
            Shape::Ellipse(b) => Shape::Ellipse(b.normalized()),
            other @ (Shape::Arrow(_) | Shape::Text(_)) => other,
        }
    }
}
