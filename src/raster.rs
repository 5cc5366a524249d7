use std::io::Cursor;

use rustybuzz::{Face as HbFace, UnicodeBuffer};
use tiny_skia::{
    FillRule, FilterQuality, Paint, Path, PathBuilder, Pixmap, PixmapPaint, Stroke, Transform,
};
use ttf_parser::{GlyphId, OutlineBuilder};

use crate::error::PageTileError;
use crate::font::{RegisteredFont, detect_direction};
use crate::types::{Color, Size};

pub const BACKGROUND_ALPHA: f32 = 0.35;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Png,
    Jpeg,
}

impl OutputFormat {
    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Png => "png",
            OutputFormat::Jpeg => "jpg",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "png" => Some(OutputFormat::Png),
            "jpg" | "jpeg" => Some(OutputFormat::Jpeg),
            _ => None,
        }
    }
}

pub(crate) const JPEG_QUALITY: u8 = 90;

pub fn encode(pixmap: &Pixmap, format: OutputFormat) -> Result<Vec<u8>, PageTileError> {
    match format {
        OutputFormat::Png => encode_png(pixmap),
        OutputFormat::Jpeg => encode_jpeg(pixmap, JPEG_QUALITY),
    }
}

pub fn encode_png(pixmap: &Pixmap) -> Result<Vec<u8>, PageTileError> {
    pixmap
        .encode_png()
        .map_err(|err| PageTileError::Encode(err.to_string()))
}

pub fn encode_jpeg(pixmap: &Pixmap, quality: u8) -> Result<Vec<u8>, PageTileError> {
    let mut rgb = Vec::with_capacity(pixmap.width() as usize * pixmap.height() as usize * 3);
    for px in pixmap.pixels() {
        let c = px.demultiply();
        rgb.extend_from_slice(&[c.red(), c.green(), c.blue()]);
    }
    let mut out = Vec::new();
    {
        let mut encoder =
            image::codecs::jpeg::JpegEncoder::new_with_quality(Cursor::new(&mut out), quality);
        encoder
            .encode(
                &rgb,
                pixmap.width(),
                pixmap.height(),
                image::ExtendedColorType::Rgb8,
            )
            .map_err(|err| PageTileError::Encode(err.to_string()))?;
    }
    Ok(out)
}

pub fn decode_image_to_pixmap(data: &[u8]) -> Result<Pixmap, PageTileError> {
    let decoded = match image::guess_format(data) {
        Ok(fmt) => image::load_from_memory_with_format(data, fmt),
        Err(_) => image::load_from_memory(data),
    }
    .map_err(|err| PageTileError::ImageDecode(err.to_string()))?;
    let rgba = decoded.to_rgba8();
    let (width, height) = rgba.dimensions();
    let Some(mut pixmap) = Pixmap::new(width, height) else {
        return Err(PageTileError::ImageDecode(format!(
            "unsupported image size {width}x{height}"
        )));
    };
    let src = rgba.as_raw();
    let dst = pixmap.data_mut();
    for (src_px, dst_px) in src.chunks_exact(4).zip(dst.chunks_exact_mut(4)) {
        let a = src_px[3];
        dst_px[0] = premul_u8(src_px[0], a);
        dst_px[1] = premul_u8(src_px[1], a);
        dst_px[2] = premul_u8(src_px[2], a);
        dst_px[3] = a;
    }
    Ok(pixmap)
}

fn premul_u8(channel: u8, alpha: u8) -> u8 {
    let prod = (channel as u16) * (alpha as u16) + 127;
    ((prod + (prod >> 8)) >> 8) as u8
}

pub fn blank_canvas(canvas: Size, fill: Color) -> Result<Pixmap, PageTileError> {
    let Some(mut pixmap) = Pixmap::new(canvas.width, canvas.height) else {
        return Err(PageTileError::InvalidConfiguration(format!(
            "canvas {}x{} is empty",
            canvas.width, canvas.height
        )));
    };
    pixmap.fill(to_skia(fill, 1.0));
    Ok(pixmap)
}

// Scales `src` to cover `canvas` (centered, cropping overflow) and draws it
// at `alpha` over opaque black.
pub fn cover_fit_darkened(src: &Pixmap, canvas: Size, alpha: f32) -> Result<Pixmap, PageTileError> {
    let mut out = blank_canvas(canvas, Color::BLACK)?;
    let (w, h) = (src.width() as f32, src.height() as f32);
    let (cw, ch) = (canvas.width as f32, canvas.height as f32);
    let scale = (cw / w).max(ch / h);
    let tx = (cw - w * scale) / 2.0;
    let ty = (ch - h * scale) / 2.0;
    let paint = PixmapPaint {
        opacity: alpha.clamp(0.0, 1.0),
        quality: FilterQuality::Bilinear,
        ..PixmapPaint::default()
    };
    out.draw_pixmap(
        0,
        0,
        src.as_ref(),
        &paint,
        Transform::from_row(scale, 0.0, 0.0, scale, tx, ty),
        None,
    );
    Ok(out)
}

pub fn stretch_to_canvas(src: &Pixmap, canvas: Size) -> Result<Pixmap, PageTileError> {
    let mut out = blank_canvas(canvas, Color::WHITE)?;
    let sx = canvas.width as f32 / src.width() as f32;
    let sy = canvas.height as f32 / src.height() as f32;
    let paint = PixmapPaint {
        quality: FilterQuality::Bilinear,
        ..PixmapPaint::default()
    };
    out.draw_pixmap(
        0,
        0,
        src.as_ref(),
        &paint,
        Transform::from_scale(sx, sy),
        None,
    );
    Ok(out)
}

pub(crate) fn to_skia(color: Color, alpha: f32) -> tiny_skia::Color {
    tiny_skia::Color::from_rgba(
        color.r.clamp(0.0, 1.0),
        color.g.clamp(0.0, 1.0),
        color.b.clamp(0.0, 1.0),
        alpha.clamp(0.0, 1.0),
    )
    .unwrap_or(tiny_skia::Color::BLACK)
}

fn solid_paint(color: Color, alpha: f32) -> Paint<'static> {
    let mut paint = Paint::default();
    paint.set_color(to_skia(color, alpha));
    paint.anti_alias = true;
    paint
}

pub fn rounded_rect_path(x: f32, y: f32, w: f32, h: f32, radius: f32) -> Option<Path> {
    let r = radius.min(w / 2.0).min(h / 2.0).max(0.0);
    let mut pb = PathBuilder::new();
    pb.move_to(x + r, y);
    pb.line_to(x + w - r, y);
    pb.quad_to(x + w, y, x + w, y + r);
    pb.line_to(x + w, y + h - r);
    pb.quad_to(x + w, y + h, x + w - r, y + h);
    pb.line_to(x + r, y + h);
    pb.quad_to(x, y + h, x, y + h - r);
    pb.line_to(x, y + r);
    pb.quad_to(x, y, x + r, y);
    pb.close();
    pb.finish()
}

pub fn fill_path(pixmap: &mut Pixmap, path: &Path, color: Color, alpha: f32, offset: (f32, f32)) {
    pixmap.fill_path(
        path,
        &solid_paint(color, alpha),
        FillRule::Winding,
        Transform::from_translate(offset.0, offset.1),
        None,
    );
}

pub fn stroke_path(pixmap: &mut Pixmap, path: &Path, color: Color, alpha: f32, width: f32) {
    let stroke = Stroke {
        width: width.max(0.1),
        line_join: tiny_skia::LineJoin::Round,
        ..Stroke::default()
    };
    pixmap.stroke_path(
        path,
        &solid_paint(color, alpha),
        &stroke,
        Transform::identity(),
        None,
    );
}

pub fn fill_rect(pixmap: &mut Pixmap, x: f32, y: f32, w: f32, h: f32, color: Color) {
    let Some(rect) = tiny_skia::Rect::from_xywh(x, y, w, h) else {
        return;
    };
    pixmap.fill_rect(rect, &solid_paint(color, 1.0), Transform::identity(), None);
}

pub struct TextRun {
    pub path: Option<Path>,
    pub advance: f32,
    pub ascent: f32,
    pub descent: f32,
}

// Shapes `text` and collects its glyph outlines with the pen starting at
// (`x`, `baseline_y`). Page space is y-down; font units are y-up.
pub fn layout_text_run(
    font: &RegisteredFont,
    text: &str,
    font_size: f32,
    x: f32,
    baseline_y: f32,
) -> Option<TextRun> {
    let outlines = ttf_parser::Face::parse(font.data(), 0).ok()?;
    let units_per_em = outlines.units_per_em().max(1) as f32;
    let scale = font_size / units_per_em;

    let mut glyphs = GlyphPathBuilder::new(scale);
    let mut pen_x = 0.0f32;
    match HbFace::from_slice(font.data(), 0) {
        Some(face) => {
            let mut buffer = UnicodeBuffer::new();
            buffer.set_direction(detect_direction(text));
            buffer.push_str(text);
            let output = rustybuzz::shape(&face, &[], buffer);
            for (info, pos) in output.glyph_infos().iter().zip(output.glyph_positions()) {
                let gid = info.glyph_id as u16;
                if gid != 0 {
                    glyphs.set_origin(
                        x + pen_x + pos.x_offset as f32 * scale,
                        baseline_y - pos.y_offset as f32 * scale,
                    );
                    let _ = outlines.outline_glyph(GlyphId(gid), &mut glyphs);
                }
                pen_x += pos.x_advance as f32 * scale;
            }
        }
        None => {
            for ch in text.chars() {
                let gid = outlines.glyph_index(ch).map(|id| id.0).unwrap_or(0);
                if gid != 0 {
                    glyphs.set_origin(x + pen_x, baseline_y);
                    let _ = outlines.outline_glyph(GlyphId(gid), &mut glyphs);
                }
                let advance = outlines.glyph_hor_advance(GlyphId(gid)).unwrap_or(0) as f32 * scale;
                pen_x += if advance > 0.0 { advance } else { font_size * 0.5 };
            }
        }
    }

    Some(TextRun {
        path: glyphs.finish(),
        advance: pen_x,
        ascent: font.ascender as f32 * scale,
        descent: -(font.descender as f32) * scale,
    })
}

struct GlyphPathBuilder {
    builder: PathBuilder,
    origin_x: f32,
    origin_y: f32,
    scale: f32,
}

impl GlyphPathBuilder {
    fn new(scale: f32) -> Self {
        Self {
            builder: PathBuilder::new(),
            origin_x: 0.0,
            origin_y: 0.0,
            scale,
        }
    }

    fn set_origin(&mut self, x: f32, y: f32) {
        self.origin_x = x;
        self.origin_y = y;
    }

    fn point(&self, x: f32, y: f32) -> (f32, f32) {
        (self.origin_x + x * self.scale, self.origin_y - y * self.scale)
    }

    fn finish(self) -> Option<Path> {
        self.builder.finish()
    }
}

impl OutlineBuilder for GlyphPathBuilder {
    fn move_to(&mut self, x: f32, y: f32) {
        let (x, y) = self.point(x, y);
        self.builder.move_to(x, y);
    }

    fn line_to(&mut self, x: f32, y: f32) {
        let (x, y) = self.point(x, y);
        self.builder.line_to(x, y);
    }

    fn quad_to(&mut self, x1: f32, y1: f32, x: f32, y: f32) {
        let (x1, y1) = self.point(x1, y1);
        let (x, y) = self.point(x, y);
        self.builder.quad_to(x1, y1, x, y);
    }

    fn curve_to(&mut self, x1: f32, y1: f32, x2: f32, y2: f32, x: f32, y: f32) {
        let (x1, y1) = self.point(x1, y1);
        let (x2, y2) = self.point(x2, y2);
        let (x, y) = self.point(x, y);
        self.builder.cubic_to(x1, y1, x2, y2, x, y);
    }

    fn close(&mut self) {
        self.builder.close();
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use image::RgbaImage;

    pub(crate) fn png_bytes(width: u32, height: u32, rgba: [u8; 4]) -> Vec<u8> {
        let src = RgbaImage::from_pixel(width, height, image::Rgba(rgba));
        let mut bytes = Vec::new();
        src.write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();
        bytes
    }

    #[test]
    fn decode_image_to_pixmap_premultiplies_alpha() {
        let bytes = png_bytes(2, 1, [255, 0, 0, 128]);
        let pixmap = decode_image_to_pixmap(&bytes).unwrap();
        assert_eq!((pixmap.width(), pixmap.height()), (2, 1));
        assert_eq!(&pixmap.data()[0..4], &[128, 0, 0, 128]);
    }

    #[test]
    fn decode_rejects_garbage() {
        let err = decode_image_to_pixmap(b"not an image").unwrap_err();
        assert!(matches!(err, PageTileError::ImageDecode(_)));
    }

    #[test]
    fn cover_fit_darkens_white_to_background_alpha() {
        let src = decode_image_to_pixmap(&png_bytes(40, 30, [255, 255, 255, 255])).unwrap();
        let out = cover_fit_darkened(&src, Size::new(20, 20), BACKGROUND_ALPHA).unwrap();
        assert_eq!((out.width(), out.height()), (20, 20));
        let center = out.pixel(10, 10).unwrap();
        assert_eq!(center.alpha(), 255);
        let expected = (255.0 * BACKGROUND_ALPHA).round() as i32;
        assert!((center.red() as i32 - expected).abs() <= 2);
    }

    #[test]
    fn stretch_fills_whole_canvas() {
        let src = decode_image_to_pixmap(&png_bytes(4, 8, [0, 0, 255, 255])).unwrap();
        let out = stretch_to_canvas(&src, Size::new(30, 10)).unwrap();
        let corner = out.pixel(29, 9).unwrap();
        assert!(corner.blue() > 200);
        assert!(corner.red() < 40);
    }

    #[test]
    fn png_and_jpeg_encoders_produce_decodable_images() {
        let page = blank_canvas(Size::new(8, 6), Color::BLACK).unwrap();
        let png = encode(&page, OutputFormat::Png).unwrap();
        let jpg = encode(&page, OutputFormat::Jpeg).unwrap();
        assert_eq!(image::guess_format(&png).unwrap(), image::ImageFormat::Png);
        assert_eq!(image::guess_format(&jpg).unwrap(), image::ImageFormat::Jpeg);
        let decoded = image::load_from_memory(&jpg).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (8, 6));
    }

    #[test]
    fn output_format_parses_aliases() {
        assert_eq!(OutputFormat::parse("JPEG"), Some(OutputFormat::Jpeg));
        assert_eq!(OutputFormat::parse("png"), Some(OutputFormat::Png));
        assert_eq!(OutputFormat::parse("gif"), None);
        assert_eq!(OutputFormat::Jpeg.extension(), "jpg");
    }

    #[test]
    fn rounded_rect_fill_covers_center_not_corner() {
        let mut page = blank_canvas(Size::new(40, 40), Color::BLACK).unwrap();
        let path = rounded_rect_path(0.0, 0.0, 40.0, 40.0, 10.0).unwrap();
        fill_path(&mut page, &path, Color::WHITE, 1.0, (0.0, 0.0));
        assert_eq!(page.pixel(20, 20).unwrap().red(), 255);
        assert_eq!(page.pixel(0, 0).unwrap().red(), 0);
    }
}
