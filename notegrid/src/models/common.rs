use serde::{Deserialize, Serialize};

/// Axis-aligned rectangle in source-image pixels.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn full_frame(width: u32, height: u32) -> Self {
        Self::new(0, 0, width, height)
    }

    pub fn area(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }

    pub fn aspect_ratio(&self) -> f64 {
        if self.height == 0 {
            0.0
        } else {
            f64::from(self.width) / f64::from(self.height)
        }
    }

    pub fn center(&self) -> (f64, f64) {
        (
            f64::from(self.x) + f64::from(self.width) / 2.0,
            f64::from(self.y) + f64::from(self.height) / 2.0,
        )
    }

    /// Shrinks the box so it lies inside a `width` x `height` frame.
    pub fn clamp_to(&self, width: u32, height: u32) -> Self {
        let x = self.x.min(width.saturating_sub(1));
        let y = self.y.min(height.saturating_sub(1));
        Self {
            x,
            y,
            width: self.width.min(width - x).max(1),
            height: self.height.min(height - y).max(1),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

/// Named palette colors a note background can be classified as.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum ColorName {
    Yellow,
    Pink,
    Blue,
    Green,
    Orange,
    White,
    Gray,
    #[default]
    Unknown,
}

/// Inclusive per-channel ranges, checked in order.
const PALETTE: &[(ColorName, [u8; 3], [u8; 3])] = &[
    (ColorName::Yellow, [200, 200, 0], [255, 255, 180]),
    (ColorName::Pink, [255, 150, 150], [255, 220, 220]),
    (ColorName::Blue, [100, 150, 200], [180, 220, 255]),
    (ColorName::Green, [150, 200, 150], [200, 255, 200]),
    (ColorName::Orange, [255, 150, 50], [255, 220, 150]),
    (ColorName::White, [240, 240, 240], [255, 255, 255]),
    (ColorName::Gray, [150, 150, 150], [200, 200, 200]),
];

impl ColorName {
    pub fn from_rgb(rgb: [u8; 3]) -> Self {
        PALETTE
            .iter()
            .find(|(_, lower, upper)| (0..3).all(|i| rgb[i] >= lower[i] && rgb[i] <= upper[i]))
            .map(|(name, _, _)| *name)
            .unwrap_or(ColorName::Unknown)
    }

    /// Saturated sticky-note colors.
    pub fn is_sticky(&self) -> bool {
        matches!(
            self,
            ColorName::Yellow
                | ColorName::Pink
                | ColorName::Blue
                | ColorName::Green
                | ColorName::Orange
        )
    }
}

impl std::fmt::Display for ColorName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Yellow => write!(f, "yellow"),
            Self::Pink => write!(f, "pink"),
            Self::Blue => write!(f, "blue"),
            Self::Green => write!(f, "green"),
            Self::Orange => write!(f, "orange"),
            Self::White => write!(f, "white"),
            Self::Gray => write!(f, "gray"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ColorInfo {
    pub rgb: [u8; 3],
    pub hex: String,
    pub name: ColorName,
}

impl ColorInfo {
    pub fn from_rgb(rgb: [u8; 3]) -> Self {
        Self {
            rgb,
            hex: format!("#{:02x}{:02x}{:02x}", rgb[0], rgb[1], rgb[2]),
            name: ColorName::from_rgb(rgb),
        }
    }
}

impl Default for ColorInfo {
    fn default() -> Self {
        Self::from_rgb([0, 0, 0])
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum NoteType {
    StickyNote,
    Paper,
    #[default]
    Unknown,
}

impl NoteType {
    pub fn from_background(color: ColorName) -> Self {
        if color.is_sticky() {
            NoteType::StickyNote
        } else if color == ColorName::White {
            NoteType::Paper
        } else {
            NoteType::Unknown
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_palette_ranges_are_inclusive() {
        assert_eq!(ColorName::from_rgb([200, 200, 0]), ColorName::Yellow);
        assert_eq!(ColorName::from_rgb([255, 255, 180]), ColorName::Yellow);
        assert_eq!(ColorName::from_rgb([255, 255, 181]), ColorName::Unknown);
        assert_eq!(ColorName::from_rgb([255, 180, 180]), ColorName::Pink);
        assert_eq!(ColorName::from_rgb([140, 180, 230]), ColorName::Blue);
        assert_eq!(ColorName::from_rgb([180, 230, 180]), ColorName::Green);
        assert_eq!(ColorName::from_rgb([255, 180, 100]), ColorName::Orange);
        assert_eq!(ColorName::from_rgb([250, 250, 250]), ColorName::White);
        assert_eq!(ColorName::from_rgb([170, 170, 170]), ColorName::Gray);
        assert_eq!(ColorName::from_rgb([10, 10, 10]), ColorName::Unknown);
    }

    #[test]
    fn test_color_info_hex() {
        let info = ColorInfo::from_rgb([255, 240, 16]);
        assert_eq!(info.hex, "#fff010");
        assert_eq!(info.name, ColorName::Yellow);
    }

    #[test]
    fn test_note_type_from_background() {
        assert_eq!(NoteType::from_background(ColorName::Pink), NoteType::StickyNote);
        assert_eq!(NoteType::from_background(ColorName::White), NoteType::Paper);
        assert_eq!(NoteType::from_background(ColorName::Gray), NoteType::Unknown);
    }

    #[test]
    fn test_bounding_box_clamp() {
        let clamped = BoundingBox::new(90, 90, 50, 50).clamp_to(100, 100);
        assert_eq!(clamped, BoundingBox::new(90, 90, 10, 10));
        let degenerate = BoundingBox::new(500, 0, 10, 10).clamp_to(100, 100);
        assert_eq!(degenerate.x, 99);
        assert_eq!(degenerate.width, 1);
    }
}
