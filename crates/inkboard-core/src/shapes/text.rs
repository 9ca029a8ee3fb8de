//! Text box shape.

use super::{RecordId, new_id};
use serde::{Deserialize, Serialize};

/// Width used when a stored text box has none.
pub const DEFAULT_TEXT_WIDTH: f64 = 200.0;
/// Width of a freshly placed text box.
pub const NEW_TEXT_WIDTH: f64 = 220.0;
pub const DEFAULT_TEXT: &str = "Text";
pub const DEFAULT_FONT_SIZE: f64 = 18.0;
pub const DEFAULT_FONT_FAMILY: &str = "Inter, system-ui, sans-serif";

/// Horizontal text alignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextAlign {
    #[default]
    Left,
    Center,
    Right,
}

impl TextAlign {
    pub fn as_str(&self) -> &'static str {
        match self {
            TextAlign::Left => "left",
            TextAlign::Center => "center",
            TextAlign::Right => "right",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "center" => TextAlign::Center,
            "right" => TextAlign::Right,
            _ => TextAlign::Left,
        }
    }
}

/// A text box.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextShape {
    pub id: RecordId,
    pub color: String,
    pub x: f64,
    pub y: f64,
    #[serde(default = "default_width")]
    pub w: f64,
    #[serde(default = "default_text")]
    pub text: String,
    #[serde(default = "default_font_size")]
    pub font_size: f64,
    #[serde(default = "default_font_family")]
    pub font_family: String,
    #[serde(default)]
    pub align: TextAlign,
}

fn default_width() -> f64 {
    DEFAULT_TEXT_WIDTH
}

fn default_text() -> String {
    DEFAULT_TEXT.to_string()
}

fn default_font_size() -> f64 {
    DEFAULT_FONT_SIZE
}

fn default_font_family() -> String {
    DEFAULT_FONT_FAMILY.to_string()
}

impl TextShape {
    /// A new text box at `(x, y)` with placeholder content.
    pub fn new(x: f64, y: f64, color: impl Into<String>) -> Self {
        Self {
            id: new_id(),
            color: color.into(),
            x,
            y,
            w: NEW_TEXT_WIDTH,
            text: default_text(),
            font_size: DEFAULT_FONT_SIZE,
            font_family: default_font_family(),
            align: TextAlign::Left,
        }
    }

    /// Replace the content. Trailing whitespace is dropped; empty content
    /// falls back to the placeholder.
    pub fn set_text(&mut self, text: &str) {
        let trimmed = text.trim_end();
        self.text = if trimmed.is_empty() {
            default_text()
        } else {
            trimmed.to_string()
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_fill_missing_fields() {
        let json = r##"{"id":"t1","color":"#fff","x":4,"y":5}"##;
        let text: TextShape = serde_json::from_str(json).unwrap();
        assert_eq!(text.w, DEFAULT_TEXT_WIDTH);
        assert_eq!(text.text, "Text");
        assert_eq!(text.font_size, 18.0);
        assert_eq!(text.align, TextAlign::Left);
    }

    #[test]
    fn test_camel_case_fields() {
        let text = TextShape::new(0.0, 0.0, "#000");
        let json = serde_json::to_value(&text).unwrap();
        assert_eq!(json["fontSize"], 18.0);
        assert_eq!(json["fontFamily"], DEFAULT_FONT_FAMILY);
    }

    #[test]
    fn test_set_text_trims_and_falls_back() {
        let mut text = TextShape::new(0.0, 0.0, "#000");
        text.set_text("hello  \n");
        assert_eq!(text.text, "hello");
        text.set_text("   ");
        assert_eq!(text.text, "Text");
    }
}
