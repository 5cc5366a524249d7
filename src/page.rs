use tiny_skia::Pixmap;

use crate::allocation::MaterialUnit;
use crate::debug::DebugLogger;
use crate::error::PageTileError;
use crate::font::FontRegistry;
use crate::raster::{self, blank_canvas};
use crate::slicer::Tile;
use crate::style::{ContentStyle, PageLayout};
use crate::title::{TitleConfig, stamp_title};
use crate::types::{Color, Px};

#[derive(Debug, Clone)]
pub struct RenderedPage {
    pub surface: Pixmap,
    pub line_count: usize,
    pub has_title: bool,
    pub unit: Option<MaterialUnit>,
    pub background_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LineBlock {
    pub lines: Vec<String>,
    pub font_size: Px,
    pub line_height: Px,
    pub continuation_indent: Px,
    pub heading: bool,
    // Set on the tail of a split block; its first line is indented too.
    pub continued: bool,
}

impl LineBlock {
    pub fn extent(&self, paragraph_gap: Px) -> Px {
        self.line_height * self.lines.len() as i32 + paragraph_gap
    }

    pub fn split_off(&mut self, at: usize) -> LineBlock {
        LineBlock {
            lines: self.lines.split_off(at.min(self.lines.len())),
            font_size: self.font_size,
            line_height: self.line_height,
            continuation_indent: self.continuation_indent,
            heading: self.heading,
            continued: true,
        }
    }
}

pub struct PageBuilder {
    surface: Pixmap,
    layout: PageLayout,
    cursor_y: Px,
    line_count: usize,
    has_title: bool,
    unit: Option<MaterialUnit>,
    background_name: Option<String>,
}

impl PageBuilder {
    pub fn new(
        layout: PageLayout,
        background: Option<&Tile>,
        unit: Option<MaterialUnit>,
    ) -> Result<Self, PageTileError> {
        let surface = match background {
            Some(tile) => (*tile.surface).clone(),
            None => blank_canvas(layout.canvas, Color::BLACK)?,
        };
        Ok(Self {
            surface,
            layout,
            cursor_y: layout.min_top_margin,
            line_count: 0,
            has_title: false,
            unit,
            background_name: background.map(|tile| tile.source_name.clone()),
        })
    }

    pub fn stamp_title(&mut self, title: &TitleConfig, fonts: &FontRegistry, debug: Option<&DebugLogger>) {
        if !title.is_enabled() {
            return;
        }
        let tb = stamp_title(&mut self.surface, title, &self.layout, fonts, debug);
        self.has_title = true;
        self.cursor_y = (tb.bottom() + self.layout.title_gap).max(self.layout.min_top_margin);
    }

    pub fn cursor_y(&self) -> Px {
        self.cursor_y
    }

    pub fn line_count(&self) -> usize {
        self.line_count
    }

    pub fn has_title(&self) -> bool {
        self.has_title
    }

    // True until a line has been placed; a title alone does not count.
    pub fn is_empty(&self) -> bool {
        self.line_count == 0
    }

    pub fn remaining(&self) -> Px {
        self.layout.content_limit() - self.cursor_y
    }

    pub fn fits(&self, block: &LineBlock, paragraph_gap: Px, max_lines: Option<usize>) -> bool {
        self.fits_with(block, None, paragraph_gap, max_lines)
    }

    // `next`, when given, has to fit right after `block` as well.
    pub fn fits_with(
        &self,
        block: &LineBlock,
        next: Option<&LineBlock>,
        paragraph_gap: Px,
        max_lines: Option<usize>,
    ) -> bool {
        let extent = block.extent(paragraph_gap) + next.map_or(Px::ZERO, |n| n.extent(paragraph_gap));
        let lines = block.lines.len() + next.map_or(0, |n| n.lines.len());
        if self.cursor_y + extent > self.layout.content_limit() {
            return false;
        }
        max_lines.is_none_or(|limit| self.line_count + lines <= limit)
    }

    pub fn lines_that_fit(&self, block: &LineBlock, paragraph_gap: Px) -> usize {
        let mut room = self.remaining() - paragraph_gap;
        let mut count = 0;
        while count < block.lines.len() && block.line_height > Px::ZERO && room >= block.line_height {
            room -= block.line_height;
            count += 1;
        }
        count
    }

    // Draws `block` at the cursor and advances past it. Returns the number of
    // lines whose text could not be drawn for lack of a font.
    pub fn place(&mut self, block: &LineBlock, style: &ContentStyle, fonts: &FontRegistry) -> usize {
        let font = fonts.resolve(style.font_family.as_deref());
        let size = block.font_size.to_f32();
        let mut skipped = 0;
        for (idx, line) in block.lines.iter().enumerate() {
            let mut x = self.layout.left_margin;
            if idx > 0 || block.continued {
                x += block.continuation_indent;
            }
            let baseline = self.cursor_y + block.font_size;
            let run = font.and_then(|font| {
                raster::layout_text_run(font, line, size, x.to_f32(), baseline.to_f32())
            });
            match run {
                Some(run) => {
                    if let Some(path) = &run.path {
                        raster::fill_path(&mut self.surface, path, style.color, 1.0, (0.0, 0.0));
                        if block.heading {
                            raster::stroke_path(&mut self.surface, path, style.color, 1.0, size / 24.0);
                        }
                    }
                    if block.heading {
                        let thickness = (size / 16.0).max(1.0);
                        raster::fill_rect(
                            &mut self.surface,
                            x.to_f32(),
                            baseline.to_f32() + thickness * 2.0,
                            run.advance,
                            thickness,
                            style.color,
                        );
                    }
                }
                None => skipped += 1,
            }
            self.cursor_y += block.line_height;
            self.line_count += 1;
        }
        self.cursor_y += style.paragraph_gap;
        skipped
    }

    pub fn finish(self) -> RenderedPage {
        RenderedPage {
            surface: self.surface,
            line_count: self.line_count,
            has_title: self.has_title,
            unit: self.unit,
            background_name: self.background_name,
        }
    }
}
