use tiny_skia::Pixmap;

use crate::debug::DebugLogger;
use crate::font::{FontRegistry, approximate_text_width};
use crate::raster::{self, TextRun};
use crate::style::PageLayout;
use crate::types::{Color, Px};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TitleEffect {
    None,
    Stroke,
    Shadow,
    Glow,
    #[default]
    Background,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TitleConfig {
    // Empty text disables the title.
    pub text: String,
    pub font_size: f32,
    pub color: Color,
    pub effect: TitleEffect,
    pub effect_color: Color,
    pub effect_intensity: f32,
    pub font_family: Option<String>,
    pub stroke_width: f32,
    pub background: Color,
}

impl Default for TitleConfig {
    fn default() -> Self {
        Self {
            text: String::new(),
            font_size: 80.0,
            color: Color::WHITE,
            effect: TitleEffect::Background,
            effect_color: Color::BLACK,
            effect_intensity: 1.0,
            font_family: None,
            stroke_width: 4.0,
            background: Color::rgb8(0xE5, 0x39, 0x35),
        }
    }
}

impl TitleConfig {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    pub fn is_enabled(&self) -> bool {
        !self.text.trim().is_empty()
    }
}

const BOX_SCALE: f32 = 1.2;
const BOX_RADIUS: f32 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TitleBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub text_width: f32,
    pub ascent: f32,
    pub descent: f32,
}

impl TitleBox {
    pub fn bottom(&self) -> Px {
        Px::from_f32(self.y + self.height)
    }
}

pub fn measure_title(config: &TitleConfig, layout: &PageLayout, fonts: &FontRegistry) -> TitleBox {
    let size = config.font_size.max(1.0);
    let (text_width, ascent, descent) = match fonts.resolve(config.font_family.as_deref()) {
        Some(font) => match raster::layout_text_run(font, &config.text, size, 0.0, 0.0) {
            Some(run) => (run.advance, run.ascent, run.descent),
            None => approximate_extent(config, size),
        },
        None => approximate_extent(config, size),
    };
    let width = text_width * BOX_SCALE;
    let height = (ascent + descent) * BOX_SCALE;
    TitleBox {
        x: (layout.canvas.width as f32 - width) / 2.0,
        y: layout.title_anchor_y.to_f32(),
        width,
        height,
        text_width,
        ascent,
        descent,
    }
}

fn approximate_extent(config: &TitleConfig, size: f32) -> (f32, f32, f32) {
    let width = approximate_text_width(Px::from_f32(size), &config.text).to_f32();
    (width, size * 0.8, size * 0.2)
}

// Draws the title horizontally centered at the layout anchor and returns its
// box. Text is skipped (and logged) when no font is available; the box
// geometry still applies.
pub fn stamp_title(
    pixmap: &mut Pixmap,
    config: &TitleConfig,
    layout: &PageLayout,
    fonts: &FontRegistry,
    debug: Option<&DebugLogger>,
) -> TitleBox {
    let tb = measure_title(config, layout, fonts);
    if config.effect == TitleEffect::Background {
        if let Some(path) = raster::rounded_rect_path(tb.x, tb.y, tb.width, tb.height, BOX_RADIUS) {
            raster::fill_path(pixmap, &path, config.background, 1.0, (0.0, 0.0));
        }
    }

    let text_x = (layout.canvas.width as f32 - tb.text_width) / 2.0;
    let baseline = tb.y + (tb.height - tb.ascent - tb.descent) / 2.0 + tb.ascent;
    let run = fonts
        .resolve(config.font_family.as_deref())
        .and_then(|font| raster::layout_text_run(font, &config.text, config.font_size, text_x, baseline));
    let Some(TextRun {
        path: Some(path), ..
    }) = run
    else {
        if let Some(debug) = debug {
            debug.log_warning("title", "no font available; title text skipped");
        }
        return tb;
    };

    let intensity = config.effect_intensity.max(0.0);
    match config.effect {
        TitleEffect::None | TitleEffect::Background => {}
        TitleEffect::Stroke => {
            raster::stroke_path(
                pixmap,
                &path,
                config.effect_color,
                1.0,
                config.stroke_width * intensity,
            );
        }
        TitleEffect::Shadow => {
            let offset = 4.0 * intensity;
            raster::fill_path(pixmap, &path, config.effect_color, 0.6, (offset, offset));
        }
        TitleEffect::Glow => {
            for ring in (1..=3).rev() {
                raster::stroke_path(
                    pixmap,
                    &path,
                    config.effect_color,
                    0.2,
                    4.0 * ring as f32 * intensity,
                );
            }
        }
    }
    raster::fill_path(pixmap, &path, config.color, 1.0, (0.0, 0.0));
    tb
}
