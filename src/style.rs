use crate::error::PageTileError;
use crate::types::{Color, Px, Size};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageLayout {
    pub canvas: Size,
    pub left_margin: Px,
    pub content_width: Px,
    pub title_anchor_y: Px,
    pub bottom_bound: Px,
    pub safety_margin: Px,
    pub min_top_margin: Px,
    pub title_gap: Px,
}

impl Default for PageLayout {
    fn default() -> Self {
        Self {
            canvas: Size::note_page(),
            left_margin: Px::from_i32(80),
            content_width: Px::from_i32(1082),
            title_anchor_y: Px::from_i32(80),
            bottom_bound: Px::from_i32(1650),
            safety_margin: Px::from_i32(40),
            min_top_margin: Px::from_i32(120),
            title_gap: Px::from_i32(60),
        }
    }
}

impl PageLayout {
    // Lowest y a content block may reach.
    pub fn content_limit(&self) -> Px {
        self.bottom_bound - self.safety_margin
    }

    pub fn validate(&self) -> Result<(), PageTileError> {
        if self.canvas.width == 0 || self.canvas.height == 0 {
            return Err(PageTileError::InvalidConfiguration(
                "canvas must be non-empty".to_string(),
            ));
        }
        if self.content_width <= Px::ZERO {
            return Err(PageTileError::InvalidConfiguration(
                "content width must be positive".to_string(),
            ));
        }
        let canvas_w = Px::from_i32(self.canvas.width as i32);
        let canvas_h = Px::from_i32(self.canvas.height as i32);
        if self.left_margin < Px::ZERO || self.left_margin + self.content_width > canvas_w {
            return Err(PageTileError::InvalidConfiguration(format!(
                "content column {}+{} exceeds canvas width {}",
                self.left_margin.to_f32(),
                self.content_width.to_f32(),
                self.canvas.width
            )));
        }
        if self.bottom_bound > canvas_h || self.content_limit() <= self.min_top_margin {
            return Err(PageTileError::InvalidConfiguration(
                "bottom bound leaves no room for content".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ContentStyle {
    pub font_size: Px,
    pub line_height_multiplier: f32,
    pub paragraph_gap: Px,
    pub color: Color,
    pub font_family: Option<String>,
    pub continuation_indent: Px,
    pub heading_scale: f32,
    pub heading_marker: String,
}

impl Default for ContentStyle {
    fn default() -> Self {
        Self {
            font_size: Px::from_i32(45),
            line_height_multiplier: 60.0 / 45.0,
            paragraph_gap: Px::from_i32(10),
            color: Color::WHITE,
            font_family: None,
            continuation_indent: Px::ZERO,
            heading_scale: 1.2,
            heading_marker: "◆ ".to_string(),
        }
    }
}

impl ContentStyle {
    pub fn line_height(&self) -> Px {
        self.font_size * self.line_height_multiplier
    }

    pub fn heading_size(&self) -> Px {
        self.font_size * self.heading_scale
    }

    pub fn heading_line_height(&self) -> Px {
        self.heading_size() * self.line_height_multiplier
    }

    pub fn validate(&self) -> Result<(), PageTileError> {
        if self.font_size <= Px::ZERO || !(self.line_height_multiplier > 0.0) {
            return Err(PageTileError::InvalidConfiguration(
                "content font size and line height must be positive".to_string(),
            ));
        }
        if self.paragraph_gap < Px::ZERO || !(self.heading_scale > 0.0) {
            return Err(PageTileError::InvalidConfiguration(
                "paragraph gap and heading scale must not be negative".to_string(),
            ));
        }
        Ok(())
    }
}
