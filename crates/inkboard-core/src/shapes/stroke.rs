//! Freehand stroke.

use super::{RecordId, new_id};
use serde::{Deserialize, Serialize};

/// Whether a stroke paints or erases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrokeMode {
    #[default]
    Draw,
    Erase,
}

impl StrokeMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrokeMode::Draw => "draw",
            StrokeMode::Erase => "erase",
        }
    }

    /// Unknown values fall back to drawing.
    pub fn parse(s: &str) -> Self {
        match s {
            "erase" => StrokeMode::Erase,
            _ => StrokeMode::Draw,
        }
    }
}

/// A freehand stroke. Points are `(x, y)` pairs flattened to `[x0, y0, x1, y1, ...]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stroke {
    pub id: RecordId,
    pub color: String,
    pub width: f64,
    pub points: Vec<f64>,
    #[serde(default)]
    pub mode: StrokeMode,
}

impl Stroke {
    /// Start a stroke at a single point.
    pub fn begin(x: f64, y: f64, color: impl Into<String>, width: f64, mode: StrokeMode) -> Self {
        Self {
            id: new_id(),
            color: color.into(),
            width,
            points: vec![x, y],
            mode,
        }
    }

    pub fn push_point(&mut self, x: f64, y: f64) {
        self.points.push(x);
        self.points.push(y);
    }

    pub fn point_count(&self) -> usize {
        self.points.len() / 2
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_points_are_flattened_pairs() {
        let mut stroke = Stroke::begin(1.0, 2.0, "#22d3ee", 3.0, StrokeMode::Draw);
        stroke.push_point(3.0, 4.0);
        assert_eq!(stroke.points, vec![1.0, 2.0, 3.0, 4.0]);
        assert_eq!(stroke.point_count(), 2);
    }

    #[test]
    fn test_missing_mode_defaults_to_draw() {
        let json = r##"{"id":"s1","color":"#000","width":2,"points":[0,0]}"##;
        let stroke: Stroke = serde_json::from_str(json).unwrap();
        assert_eq!(stroke.mode, StrokeMode::Draw);
    }

    #[test]
    fn test_mode_parse_falls_back_to_draw() {
        assert_eq!(StrokeMode::parse("erase"), StrokeMode::Erase);
        assert_eq!(StrokeMode::parse("smudge"), StrokeMode::Draw);
    }
}
