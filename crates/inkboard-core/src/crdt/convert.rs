//! Conversion between canvas records and Loro values.

use loro::{LoroList, LoroMap, LoroMapValue, LoroResult, LoroValue};

use crate::chat::ChatMessage;
use crate::shapes::{
    ArrowShape, BoxShape, DEFAULT_FONT_FAMILY, DEFAULT_FONT_SIZE, DEFAULT_TEXT,
    DEFAULT_TEXT_WIDTH, Shape, ShapeKind, Stroke, StrokeMode, TextAlign, TextShape,
};

// Common keys
const KEY_ID: &str = "id";
const KEY_COLOR: &str = "color";

// Stroke keys
const KEY_WIDTH: &str = "width";
const KEY_POINTS: &str = "points";
const KEY_MODE: &str = "mode";

// Shape keys
const KEY_KIND: &str = "kind";
const KEY_X: &str = "x";
const KEY_Y: &str = "y";
const KEY_W: &str = "w";
const KEY_H: &str = "h";
const KEY_TEXT: &str = "text";
const KEY_FONT_SIZE: &str = "fontSize";
const KEY_FONT_FAMILY: &str = "fontFamily";
const KEY_ALIGN: &str = "align";

// Chat keys
const KEY_USER: &str = "user";
const KEY_TS: &str = "ts";

/// Root container of each sequence in the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Sequence {
    Strokes,
    Shapes,
    Chat,
}

impl Sequence {
    pub const ALL: [Sequence; 3] = [Sequence::Strokes, Sequence::Shapes, Sequence::Chat];

    pub fn key(&self) -> &'static str {
        match self {
            Sequence::Strokes => "strokes",
            Sequence::Shapes => "shapes",
            Sequence::Chat => "chat",
        }
    }
}

/// A keyed record stored as one map in a document sequence.
pub trait Record: Clone + Sized {
    /// The sequence records of this type live in.
    const SEQUENCE: Sequence;

    fn record_id(&self) -> &str;

    /// Write all fields into a freshly attached map.
    fn write_loro(&self, map: &LoroMap) -> LoroResult<()>;

    /// Read a record back. Returns `None` for maps missing required fields.
    fn read_loro(map: &LoroMapValue) -> Option<Self>;
}

fn get_double(map: &LoroMapValue, key: &str) -> Option<f64> {
    match map.get(key)? {
        LoroValue::Double(d) => Some(*d),
        LoroValue::I64(i) => Some(*i as f64),
        _ => None,
    }
}

fn get_i64(map: &LoroMapValue, key: &str) -> Option<i64> {
    match map.get(key)? {
        LoroValue::I64(i) => Some(*i),
        LoroValue::Double(d) => Some(*d as i64),
        _ => None,
    }
}

fn get_string(map: &LoroMapValue, key: &str) -> Option<String> {
    match map.get(key)? {
        LoroValue::String(s) => Some(s.to_string()),
        _ => None,
    }
}

fn get_numbers(map: &LoroMapValue, key: &str) -> Option<Vec<f64>> {
    match map.get(key)? {
        LoroValue::List(items) => Some(
            items
                .iter()
                .filter_map(|v| match v {
                    LoroValue::Double(d) => Some(*d),
                    LoroValue::I64(i) => Some(*i as f64),
                    _ => None,
                })
                .collect(),
        ),
        _ => None,
    }
}

fn put_numbers(map: &LoroMap, key: &str, numbers: &[f64]) -> LoroResult<()> {
    let list = map.insert_container(key, LoroList::new())?;
    for n in numbers {
        list.push(*n)?;
    }
    Ok(())
}

impl Record for Stroke {
    const SEQUENCE: Sequence = Sequence::Strokes;

    fn record_id(&self) -> &str {
        &self.id
    }

    fn write_loro(&self, map: &LoroMap) -> LoroResult<()> {
        map.insert(KEY_ID, self.id.clone())?;
        map.insert(KEY_COLOR, self.color.clone())?;
        map.insert(KEY_WIDTH, self.width)?;
        put_numbers(map, KEY_POINTS, &self.points)?;
        map.insert(KEY_MODE, self.mode.as_str())?;
        Ok(())
    }

    fn read_loro(map: &LoroMapValue) -> Option<Self> {
        Some(Stroke {
            id: get_string(map, KEY_ID)?,
            color: get_string(map, KEY_COLOR)?,
            width: get_double(map, KEY_WIDTH)?,
            points: get_numbers(map, KEY_POINTS).unwrap_or_default(),
            mode: get_string(map, KEY_MODE)
                .map(|m| StrokeMode::parse(&m))
                .unwrap_or_default(),
        })
    }
}

impl Record for Shape {
    const SEQUENCE: Sequence = Sequence::Shapes;

    fn record_id(&self) -> &str {
        self.id()
    }

    fn write_loro(&self, map: &LoroMap) -> LoroResult<()> {
        map.insert(KEY_ID, self.id().to_string())?;
        map.insert(KEY_KIND, self.kind().as_str())?;
        match self {
            Shape::Rect(b) | Shape::Ellipse(b) => {
                map.insert(KEY_X, b.x)?;
                map.insert(KEY_Y, b.y)?;
                map.insert(KEY_W, b.w)?;
                map.insert(KEY_H, b.h)?;
            }
            Shape::Arrow(a) => {
                put_numbers(map, KEY_POINTS, &a.points)?;
            }
            Shape::Text(t) => {
                map.insert(KEY_X, t.x)?;
                map.insert(KEY_Y, t.y)?;
                map.insert(KEY_W, t.w)?;
                map.insert(KEY_TEXT, t.text.clone())?;
                map.insert(KEY_FONT_SIZE, t.font_size)?;
                map.insert(KEY_FONT_FAMILY, t.font_family.clone())?;
                map.insert(KEY_ALIGN, t.align.as_str())?;
            }
        }
        map.insert(KEY_COLOR, self.color().to_string())?;
        Ok(())
    }

    fn read_loro(map: &LoroMapValue) -> Option<Self> {
        let id = get_string(map, KEY_ID)?;
        let color = get_string(map, KEY_COLOR)?;
        let kind = ShapeKind::parse(&get_string(map, KEY_KIND)?)?;

        let shape = match kind {
            ShapeKind::Rect | ShapeKind::Ellipse => {
                let bounds = BoxShape {
                    id,
                    color,
                    x: get_double(map, KEY_X)?,
                    y: get_double(map, KEY_Y)?,
                    w: get_double(map, KEY_W)?,
                    h: get_double(map, KEY_H)?,
                };
                if kind == ShapeKind::Rect {
                    Shape::Rect(bounds)
                } else {
                    Shape::Ellipse(bounds)
                }
            }
            ShapeKind::Arrow => {
                let numbers = get_numbers(map, KEY_POINTS)?;
                let points: [f64; 4] = numbers.get(..4)?.try_into().ok()?;
                Shape::Arrow(ArrowShape { id, color, points })
            }
            ShapeKind::Text => Shape::Text(TextShape {
                id,
                color,
                x: get_double(map, KEY_X)?,
                y: get_double(map, KEY_Y)?,
                w: get_double(map, KEY_W).unwrap_or(DEFAULT_TEXT_WIDTH),
                text: get_string(map, KEY_TEXT).unwrap_or_else(|| DEFAULT_TEXT.to_string()),
                font_size: get_double(map, KEY_FONT_SIZE).unwrap_or(DEFAULT_FONT_SIZE),
                font_family: get_string(map, KEY_FONT_FAMILY)
                    .unwrap_or_else(|| DEFAULT_FONT_FAMILY.to_string()),
                align: get_string(map, KEY_ALIGN)
                    .map(|a| TextAlign::parse(&a))
                    .unwrap_or_default(),
            }),
        };
        Some(shape)
    }
}

impl Record for ChatMessage {
    const SEQUENCE: Sequence = Sequence::Chat;

    fn record_id(&self) -> &str {
        &self.id
    }

    fn write_loro(&self, map: &LoroMap) -> LoroResult<()> {
        map.insert(KEY_ID, self.id.clone())?;
        map.insert(KEY_USER, self.user.clone())?;
        map.insert(KEY_TEXT, self.text.clone())?;
        map.insert(KEY_COLOR, self.color.clone())?;
        map.insert(KEY_TS, self.ts)?;
        Ok(())
    }

    fn read_loro(map: &LoroMapValue) -> Option<Self> {
        Some(ChatMessage {
            id: get_string(map, KEY_ID)?,
            user: get_string(map, KEY_USER)?,
            text: get_string(map, KEY_TEXT)?,
            color: get_string(map, KEY_COLOR)?,
            ts: get_i64(map, KEY_TS).unwrap_or_default(),
        })
    }
}
