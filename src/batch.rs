use std::collections::BTreeSet;

use rand_core::RngCore;
use tiny_skia::Pixmap;

use crate::content::TextSource;
use crate::context::RunContext;
use crate::error::PageTileError;
use crate::metrics::RunMetrics;
use crate::paginate::NoteRequest;
use crate::raster::{self, OutputFormat};
use crate::source::{BackgroundSource, CoverSource, decode_with_retry};
use crate::title::TitleConfig;
use crate::types::Color;
use crate::Engine;

pub const COVER_STEM: &str = "封面图";
pub const CONTENT_STEM: &str = "内页";

pub trait FolderIndexStore {
    fn next_available(&mut self) -> Result<u32, PageTileError>;
    fn mark_used(&mut self, index: u32) -> Result<(), PageTileError>;
}

// In-memory store returning the smallest unused index, starting at 1.
#[derive(Debug, Clone, Default)]
pub struct MemoryFolderIndexStore {
    used: BTreeSet<u32>,
}

impl MemoryFolderIndexStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_used(used: impl IntoIterator<Item = u32>) -> Self {
        Self {
            used: used.into_iter().collect(),
        }
    }

    pub fn used(&self) -> impl Iterator<Item = u32> + '_ {
        self.used.iter().copied()
    }
}

impl FolderIndexStore for MemoryFolderIndexStore {
    fn next_available(&mut self) -> Result<u32, PageTileError> {
        let mut candidate = 1u32;
        for used in self.used.range(1..) {
            if *used != candidate {
                break;
            }
            candidate = candidate.checked_add(1).ok_or_else(|| {
                PageTileError::InvalidConfiguration("folder indices exhausted".to_string())
            })?;
        }
        Ok(candidate)
    }

    fn mark_used(&mut self, index: u32) -> Result<(), PageTileError> {
        if index == 0 {
            return Err(PageTileError::InvalidConfiguration(
                "folder index must be at least 1".to_string(),
            ));
        }
        self.used.insert(index);
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct BatchRequest {
    pub covers: Vec<CoverSource>,
    pub backgrounds: Vec<BackgroundSource>,
    pub content: TextSource,
    pub title: TitleConfig,
    pub shuffle: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputFile {
    pub name: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct NoteBundle {
    pub folder_name: String,
    pub files: Vec<OutputFile>,
    // Set when the cover could not be decoded and a placeholder was used.
    pub cover_error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct BatchOutput {
    pub notes: Vec<NoteBundle>,
    pub sliced_sources: Vec<String>,
    pub metrics: RunMetrics,
}

pub fn folder_name(index: u32) -> String {
    format!("{index:04}")
}

pub fn content_file_name(page_number: usize, format: OutputFormat) -> String {
    format!("{CONTENT_STEM}{page_number}.{}", format.extension())
}

pub fn cover_file_name(format: OutputFormat) -> String {
    format!("{COVER_STEM}.{}", format.extension())
}

impl Engine {
    // One bundle per cover. Notes share a run context, so exclusive material
    // consumed by one note is gone for the next; the title-once flag is per
    // note, so every note titles its own first page. The context is finished
    // whether or not the batch succeeds.
    pub fn run_batch<R: RngCore + ?Sized>(
        &self,
        request: &BatchRequest,
        store: &mut dyn FolderIndexStore,
        rng: &mut R,
    ) -> Result<BatchOutput, PageTileError> {
        let mut ctx = self.new_context()?;
        let outcome = self.run_notes(&mut ctx, request, store, rng);
        let (sliced_sources, metrics) = ctx.finish();
        self.emit_debug_summary("batch");
        Ok(BatchOutput {
            notes: outcome?,
            sliced_sources,
            metrics,
        })
    }

    fn run_notes<R: RngCore + ?Sized>(
        &self,
        ctx: &mut RunContext,
        request: &BatchRequest,
        store: &mut dyn FolderIndexStore,
        rng: &mut R,
    ) -> Result<Vec<NoteBundle>, PageTileError> {
        let note_count = request.covers.len().max(1);
        let mut notes = Vec::with_capacity(note_count);
        for group_index in 0..note_count {
            let cover = match request.covers.get(group_index) {
                Some(cover) => Some(self.render_cover(cover)?),
                None => None,
            };

            let content = if request.shuffle {
                request.content.shuffled(rng)
            } else {
                request.content.clone()
            };
            let note = NoteRequest {
                backgrounds: request.backgrounds.clone(),
                content,
                title: request.title.clone(),
                group_index,
            };
            let output = self.paginate(ctx, &note)?;

            let index = store.next_available()?;
            store.mark_used(index)?;

            let mut files = Vec::with_capacity(output.pages.len() + 1);
            let mut cover_error = None;
            if let Some((surface, error)) = cover {
                files.push(OutputFile {
                    name: cover_file_name(self.output_format),
                    bytes: raster::encode(&surface, self.output_format)?,
                });
                cover_error = error;
            }
            for (idx, page) in output.pages.iter().enumerate() {
                files.push(OutputFile {
                    name: content_file_name(idx + 1, self.output_format),
                    bytes: raster::encode(&page.surface, self.output_format)?,
                });
            }
            notes.push(NoteBundle {
                folder_name: folder_name(index),
                files,
                cover_error,
            });
        }
        Ok(notes)
    }

    fn render_cover(&self, cover: &CoverSource) -> Result<(Pixmap, Option<String>), PageTileError> {
        let retry = self.decode_retry;
        let rendered = decode_with_retry(cover.data(), retry.attempts, retry.backoff)
            .and_then(|image| raster::stretch_to_canvas(&image, self.layout.canvas));
        match rendered {
            Ok(surface) => Ok((surface, None)),
            Err(err) => {
                let message = format!("{}: {}", cover.name(), err);
                if let Some(debug) = &self.debug {
                    debug.log_warning("cover", &message);
                    debug.increment("cover.placeholder", 1);
                }
                Ok((self.placeholder_page(&message)?, Some(message)))
            }
        }
    }

    fn placeholder_page(&self, message: &str) -> Result<Pixmap, PageTileError> {
        let canvas = self.layout.canvas;
        let mut page = raster::blank_canvas(canvas, Color::rgb8(0x20, 0x20, 0x20))?;
        let text: String = message.chars().take(48).collect();
        let size = self.style.font_size.to_f32();
        let font = self.fonts.resolve(self.style.font_family.as_deref());
        let run = font.and_then(|font| {
            raster::layout_text_run(
                font,
                &text,
                size,
                self.layout.left_margin.to_f32(),
                canvas.height as f32 / 2.0,
            )
        });
        if let Some(path) = run.and_then(|run| run.path) {
            raster::fill_path(&mut page, &path, Color::WHITE, 1.0, (0.0, 0.0));
        }
        Ok(page)
    }
}
