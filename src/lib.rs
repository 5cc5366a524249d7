mod allocation;
mod batch;
mod content;
mod context;
mod debug;
mod error;
mod font;
mod metrics;
mod page;
mod paginate;
mod perf;
mod raster;
mod slicer;
mod source;
mod style;
mod tile_cache;
mod title;
mod types;
mod wrap;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

pub use allocation::{Allocation, AllocationPolicy, Allocator, MaterialUnit};
pub use batch::{
    BatchOutput, BatchRequest, FolderIndexStore, MemoryFolderIndexStore, NoteBundle, OutputFile,
    content_file_name, cover_file_name, folder_name,
};
pub use content::{Block, TextSource, Topic, shuffle};
pub use context::RunContext;
pub use debug::DebugLogger;
pub use error::PageTileError;
pub use font::{FontMeasure, FontRegistry, approximate_text_width};
pub use metrics::{PageMetrics, RunMetrics};
pub use page::{LineBlock, PageBuilder, RenderedPage};
pub use paginate::{NoteOutput, NoteRequest, RunResult, kept_page_indices};
pub use perf::PerfLogger;
pub use raster::{BACKGROUND_ALPHA, OutputFormat, encode_jpeg, encode_png};
pub use slicer::{MAX_PIECES, MIN_PIECES, Tile, grid_for, slice};
pub use source::{BackgroundSource, CoverSource, DecodeRetry, decode_with_retry};
pub use style::{ContentStyle, PageLayout};
pub use tile_cache::TileCache;
pub use title::{TitleConfig, TitleEffect};
pub use types::{Color, Px, Size};
pub use wrap::{TextMeasure, WrappedLine, is_no_leading, is_no_trailing, wrap};

pub struct Engine {
    layout: PageLayout,
    style: ContentStyle,
    policy: AllocationPolicy,
    slicing: Option<u32>,
    page_limit: usize,
    max_lines_per_page: Option<usize>,
    topic_headings: bool,
    output_format: OutputFormat,
    decode_retry: DecodeRetry,
    fonts: Arc<FontRegistry>,
    debug: Option<DebugLogger>,
    perf: Option<PerfLogger>,
}

impl Engine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    pub fn new_context(&self) -> Result<RunContext, PageTileError> {
        let mut ctx = RunContext::new(self.policy, self.slicing, self.layout.canvas)?;
        ctx.tiles = ctx
            .tiles
            .take()
            .map(|cache| {
                cache
                    .with_loggers(self.debug.clone(), self.perf.clone())
                    .with_decode_retry(self.decode_retry)
            });
        Ok(ctx)
    }

    pub fn layout(&self) -> &PageLayout {
        &self.layout
    }

    pub fn content_style(&self) -> &ContentStyle {
        &self.style
    }

    pub fn fonts(&self) -> &FontRegistry {
        &self.fonts
    }

    pub fn slicing(&self) -> Option<u32> {
        self.slicing
    }

    pub fn output_format(&self) -> OutputFormat {
        self.output_format
    }

    fn emit_debug_summary(&self, context: &str) {
        if let Some(logger) = &self.debug {
            logger.emit_summary(context);
            logger.flush();
        }
        if let Some(perf) = &self.perf {
            perf.flush();
        }
    }
}

pub struct EngineBuilder {
    layout: PageLayout,
    style: ContentStyle,
    policy: AllocationPolicy,
    slicing: Option<u32>,
    page_limit: usize,
    max_lines_per_page: Option<usize>,
    topic_headings: bool,
    output_format: OutputFormat,
    decode_retry: DecodeRetry,
    font_dirs: Vec<PathBuf>,
    font_files: Vec<PathBuf>,
    font_bytes: Vec<(String, Vec<u8>)>,
    system_fonts: bool,
    debug_path: Option<PathBuf>,
    perf_path: Option<PathBuf>,
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self {
            layout: PageLayout::default(),
            style: ContentStyle::default(),
            policy: AllocationPolicy::Shared,
            slicing: None,
            page_limit: 0,
            max_lines_per_page: None,
            topic_headings: false,
            output_format: OutputFormat::Png,
            decode_retry: DecodeRetry::default(),
            font_dirs: Vec::new(),
            font_files: Vec::new(),
            font_bytes: Vec::new(),
            system_fonts: true,
            debug_path: None,
            perf_path: None,
        }
    }

    pub fn policy(mut self, policy: AllocationPolicy) -> Self {
        self.policy = policy;
        self
    }

    // Pieces per background (even, 2..=16); None draws whole images.
    pub fn slicing(mut self, piece_count: Option<u32>) -> Self {
        self.slicing = piece_count;
        self
    }

    // Maximum pages per note, 0 for no limit.
    pub fn page_limit(mut self, limit: usize) -> Self {
        self.page_limit = limit;
        self
    }

    pub fn content_style(mut self, style: ContentStyle) -> Self {
        self.style = style;
        self
    }

    pub fn layout(mut self, layout: PageLayout) -> Self {
        self.layout = layout;
        self
    }

    pub fn max_lines_per_page(mut self, limit: Option<usize>) -> Self {
        self.max_lines_per_page = limit;
        self
    }

    pub fn topic_headings(mut self, enabled: bool) -> Self {
        self.topic_headings = enabled;
        self
    }

    pub fn continuation_indent(mut self, indent: f32) -> Self {
        self.style.continuation_indent = Px::from_f32(indent);
        self
    }

    pub fn output_format(mut self, format: OutputFormat) -> Self {
        self.output_format = format;
        self
    }

    pub fn register_font_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.font_dirs.push(path.into());
        self
    }

    pub fn register_font_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.font_files.push(path.into());
        self
    }

    pub fn register_font_bytes(mut self, name: impl Into<String>, data: Vec<u8>) -> Self {
        self.font_bytes.push((name.into(), data));
        self
    }

    // Look up a CJK-capable system font after the registered ones. Turn off
    // for runs that must measure identically on every machine.
    pub fn system_fonts(mut self, enabled: bool) -> Self {
        self.system_fonts = enabled;
        self
    }

    pub fn debug_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.debug_path = Some(path.into());
        self
    }

    pub fn perf_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.perf_path = Some(path.into());
        self
    }

    pub fn decode_retry(mut self, attempts: u32, backoff: Duration) -> Self {
        self.decode_retry = DecodeRetry { attempts, backoff };
        self
    }

    pub fn build(self) -> Result<Engine, PageTileError> {
        self.layout.validate()?;
        self.style.validate()?;
        if let Some(pieces) = self.slicing {
            slicer::validate_piece_count(pieces)?;
        }
        if self.max_lines_per_page == Some(0) {
            return Err(PageTileError::InvalidConfiguration(
                "max_lines_per_page must be at least 1".to_string(),
            ));
        }
        if self.decode_retry.attempts == 0 {
            return Err(PageTileError::InvalidConfiguration(
                "decode_retry needs at least one attempt".to_string(),
            ));
        }

        let mut registry = FontRegistry::new();
        for file in &self.font_files {
            registry.register_file(file)?;
        }
        for (name, data) in self.font_bytes {
            registry.register_bytes(data, Some(&name))?;
        }
        for dir in &self.font_dirs {
            registry.register_dir(dir);
        }
        if self.system_fonts {
            registry.register_system_fallback();
        }

        let debug = match self.debug_path {
            Some(path) => Some(DebugLogger::new(path)?),
            None => None,
        };
        let perf = match self.perf_path {
            Some(path) => Some(PerfLogger::new(path)?),
            None => None,
        };
        if let Some(debug) = &debug {
            debug.log_json(&format!(
                "{{\"type\":\"engine.build\",\"policy\":\"{}\",\"slicing\":{},\"page_limit\":{},\"fonts\":{}}}",
                self.policy,
                self.slicing.unwrap_or(0),
                self.page_limit,
                registry.len()
            ));
        }

        Ok(Engine {
            layout: self.layout,
            style: self.style,
            policy: self.policy,
            slicing: self.slicing,
            page_limit: self.page_limit,
            max_lines_per_page: self.max_lines_per_page,
            topic_headings: self.topic_headings,
            output_format: self.output_format,
            decode_retry: self.decode_retry,
            fonts: Arc::new(registry),
            debug,
            perf,
        })
    }
}
