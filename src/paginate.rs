use std::time::Instant;

use crate::allocation::{AllocationPolicy, MaterialUnit};
use crate::content::{Block, TextSource};
use crate::context::RunContext;
use crate::error::PageTileError;
use crate::font::FontMeasure;
use crate::metrics::{PageMetrics, RunMetrics};
use crate::page::{LineBlock, PageBuilder, RenderedPage};
use crate::slicer::{self, Tile};
use crate::source::BackgroundSource;
use crate::title::TitleConfig;
use crate::wrap::wrap;
use crate::Engine;

#[derive(Debug, Clone, Default)]
pub struct NoteRequest {
    pub backgrounds: Vec<BackgroundSource>,
    pub content: TextSource,
    pub title: TitleConfig,
    pub group_index: usize,
}

#[derive(Debug, Clone)]
pub struct NoteOutput {
    pub pages: Vec<RenderedPage>,
    pub metrics: Vec<PageMetrics>,
    // Indices (before trimming) of pages dropped by the page limit.
    pub removed_pages: Vec<usize>,
}

#[derive(Debug, Clone)]
pub struct RunResult {
    pub pages: Vec<RenderedPage>,
    pub sliced_sources: Vec<String>,
    pub metrics: RunMetrics,
}

impl Engine {
    pub fn paginate(
        &self,
        ctx: &mut RunContext,
        request: &NoteRequest,
    ) -> Result<NoteOutput, PageTileError> {
        let note = ctx.metrics.notes;
        let started = Instant::now();
        ctx.allocator.begin_note(request.group_index);

        let measure = self.fonts.measure_for(self.style.font_family.as_deref());
        let gap = self.style.paragraph_gap;
        let mut pages: Vec<(RenderedPage, f64)> = Vec::new();
        let mut current: Option<(PageBuilder, Instant)> = None;
        let mut whole_memo: Option<Tile> = None;
        let mut number = 0usize;

        let prepared: Vec<LineBlock> = request
            .content
            .blocks(self.topic_headings)
            .into_iter()
            .map(|block| match block {
                Block::Item(text) => {
                    number += 1;
                    self.item_block(&measure, text, number)
                }
                Block::Heading(name) => self.heading_block(&measure, name),
            })
            .collect();

        let mut blocks = prepared.into_iter().peekable();
        while let Some(block) = blocks.next() {
            // A heading moves to the next page together with its first item.
            let follower = blocks.peek().filter(|next| block.heading && !next.heading);
            let mut pending = Some(block);
            while let Some(mut lines) = pending.take() {
                let (mut page, opened) = match current.take() {
                    Some(open) => open,
                    None => (
                        self.open_page(ctx, request, note, &mut whole_memo)?,
                        Instant::now(),
                    ),
                };
                if !page.is_empty()
                    && !page.fits_with(&lines, follower, gap, self.max_lines_per_page)
                {
                    pages.push(self.flush(note, pages.len(), page, opened));
                    pending = Some(lines);
                    continue;
                }
                // An empty page always takes the block; what runs past the
                // bottom bound continues on the next page.
                let room = page.lines_that_fit(&lines, gap).max(1);
                if room < lines.lines.len() {
                    let rest = lines.split_off(room);
                    self.place(&mut page, &lines);
                    if let Some(debug) = &self.debug {
                        debug.log_json(&format!(
                            "{{\"type\":\"content.split\",\"note\":{},\"page\":{},\"placed\":{},\"carried\":{}}}",
                            note,
                            pages.len(),
                            lines.lines.len(),
                            rest.lines.len()
                        ));
                        debug.increment("content.split", 1);
                    }
                    pages.push(self.flush(note, pages.len(), page, opened));
                    pending = Some(rest);
                    continue;
                }
                self.place(&mut page, &lines);
                current = Some((page, opened));
            }
        }
        if let Some((page, opened)) = current.take() {
            if !page.is_empty() {
                pages.push(self.flush(note, pages.len(), page, opened));
            }
        }

        let (kept, removed) = self.apply_page_limit(ctx, note, pages);
        let metrics: Vec<PageMetrics> = kept
            .iter()
            .enumerate()
            .map(|(idx, (page, ms))| PageMetrics {
                page_number: idx + 1,
                line_count: page.line_count,
                has_title: page.has_title,
                background: page
                    .background_name
                    .clone()
                    .zip(page.unit.map(|u| u.tile_index)),
                render_ms: *ms,
            })
            .collect();
        let pages: Vec<RenderedPage> = kept.into_iter().map(|(page, _)| page).collect();

        ctx.metrics.notes += 1;
        ctx.metrics.pages.extend(metrics.iter().cloned());
        ctx.metrics.units_consumed = ctx.allocator.consumed();
        ctx.metrics.pages_trimmed += removed.len();
        ctx.metrics.total_render_ms += metrics.iter().map(|m| m.render_ms).sum::<f64>();

        if let Some(perf) = &self.perf {
            perf.log_span_ms("note.paginate", Some(note), started.elapsed().as_secs_f64() * 1000.0);
            perf.log_counts(
                "note",
                Some(note),
                &[
                    ("pages", pages.len() as u64),
                    ("units", number as u64),
                    ("trimmed", removed.len() as u64),
                ],
            );
        }

        Ok(NoteOutput {
            pages,
            metrics,
            removed_pages: removed,
        })
    }

    pub fn paginate_once(&self, request: &NoteRequest) -> Result<RunResult, PageTileError> {
        let mut ctx = self.new_context()?;
        let outcome = self.paginate(&mut ctx, request);
        let (sliced_sources, metrics) = ctx.finish();
        self.emit_debug_summary("paginate");
        let output = outcome?;
        Ok(RunResult {
            pages: output.pages,
            sliced_sources,
            metrics,
        })
    }

    fn open_page(
        &self,
        ctx: &mut RunContext,
        request: &NoteRequest,
        note: usize,
        whole_memo: &mut Option<Tile>,
    ) -> Result<PageBuilder, PageTileError> {
        let allocation = ctx
            .allocator
            .next(request.backgrounds.len())
            .inspect_err(|err| {
                if let Some(debug) = &self.debug {
                    debug.log_warning("alloc", &err.to_string());
                    debug.increment("alloc.exhausted", 1);
                }
            })?;
        let tile = match allocation.unit {
            Some(unit) => Some(self.resolve_tile(ctx, request, unit, whole_memo)?),
            None => None,
        };
        if let (Some(debug), Some(unit), Some(tile)) = (&self.debug, allocation.unit, &tile) {
            debug.log_allocation(
                note,
                &tile.source_name,
                unit.source_index,
                unit.tile_index,
                ctx.allocator.consumed(),
            );
        }
        let mut page = PageBuilder::new(self.layout, tile.as_ref(), allocation.unit)?;
        if allocation.draw_title {
            page.stamp_title(&request.title, &self.fonts, self.debug.as_ref());
        }
        Ok(page)
    }

    fn resolve_tile(
        &self,
        ctx: &mut RunContext,
        request: &NoteRequest,
        unit: MaterialUnit,
        whole_memo: &mut Option<Tile>,
    ) -> Result<Tile, PageTileError> {
        let Some(source) = request.backgrounds.get(unit.source_index) else {
            return Err(PageTileError::InvalidConfiguration(format!(
                "background {} is not in the pool",
                unit.source_index
            )));
        };
        if let Some(cache) = ctx.tiles.as_mut() {
            return cache.get_slice(source, unit.tile_index);
        }
        if let Some(tile) = whole_memo.as_ref().filter(|t| t.source_id == source.id()) {
            let mut tile = tile.clone();
            tile.source_name = source.name().to_string();
            return Ok(tile);
        }
        let tile = slicer::whole(source, self.layout.canvas, self.decode_retry)?;
        *whole_memo = Some(tile.clone());
        Ok(tile)
    }

    fn place(&self, page: &mut PageBuilder, lines: &LineBlock) {
        let skipped = page.place(lines, &self.style, &self.fonts);
        if skipped > 0 {
            if let Some(debug) = &self.debug {
                debug.log_warning("content", "no font available; text skipped");
                debug.increment("lines.skipped", skipped as u64);
            }
        }
    }

    fn flush(&self, note: usize, index: usize, page: PageBuilder, opened: Instant) -> (RenderedPage, f64) {
        let page = page.finish();
        if let Some(debug) = &self.debug {
            debug.log_page(note, index, page.line_count, page.has_title);
        }
        (page, opened.elapsed().as_secs_f64() * 1000.0)
    }

    fn item_block(&self, measure: &FontMeasure<'_>, text: &str, number: usize) -> LineBlock {
        let lines = wrap(measure, text, self.style.font_size, self.layout.content_width)
            .into_iter()
            .map(|line| {
                if line.is_first_of_unit {
                    format!("{number}. {}", line.text)
                } else {
                    line.text
                }
            })
            .collect();
        LineBlock {
            lines,
            font_size: self.style.font_size,
            line_height: self.style.line_height(),
            continuation_indent: self.style.continuation_indent,
            heading: false,
            continued: false,
        }
    }

    fn heading_block(&self, measure: &FontMeasure<'_>, name: &str) -> LineBlock {
        let text = format!("{}{}", self.style.heading_marker, name);
        let size = self.style.heading_size();
        LineBlock {
            lines: wrap(measure, &text, size, self.layout.content_width)
                .into_iter()
                .map(|line| line.text)
                .collect(),
            font_size: size,
            line_height: self.style.heading_line_height(),
            continuation_indent: self.style.continuation_indent,
            heading: true,
            continued: false,
        }
    }

    fn apply_page_limit(
        &self,
        ctx: &mut RunContext,
        note: usize,
        pages: Vec<(RenderedPage, f64)>,
    ) -> (Vec<(RenderedPage, f64)>, Vec<usize>) {
        let keep = kept_page_indices(pages.len(), self.page_limit);
        if keep.len() == pages.len() {
            return (pages, Vec::new());
        }
        let mut kept = Vec::with_capacity(keep.len());
        let mut removed = Vec::new();
        for (idx, (page, ms)) in pages.into_iter().enumerate() {
            if keep.binary_search(&idx).is_ok() {
                kept.push((page, ms));
                continue;
            }
            if let Some(unit) = page.unit {
                ctx.allocator.release(unit);
            }
            removed.push(idx);
        }
        if let Some(debug) = &self.debug {
            debug.log_trim(note, &keep, &removed);
        }
        (kept, removed)
    }

    pub fn policy(&self) -> AllocationPolicy {
        self.policy
    }
}

// Indices of the pages kept under `limit` (0 = unlimited): the first
// `ceil(limit / 2)` pages and the last `limit - ceil(limit / 2)`.
pub fn kept_page_indices(total: usize, limit: usize) -> Vec<usize> {
    if limit == 0 || total <= limit {
        return (0..total).collect();
    }
    let head = limit.div_ceil(2);
    let tail = limit - head;
    (0..head).chain(total - tail..total).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::Topic;
    use crate::raster::tests::png_bytes;
    use crate::style::PageLayout;
    use crate::types::{Px, Size};
    use crate::{EngineBuilder, PageTileError};
    use std::collections::HashSet;

    fn backgrounds(count: usize) -> Vec<BackgroundSource> {
        (0..count)
            .map(|i| {
                BackgroundSource::from_bytes(
                    format!("bg{i}.png"),
                    png_bytes(40, 30, [(i * 20) as u8, 80, 120, 255]),
                )
            })
            .collect()
    }

    fn units(count: usize) -> TextSource {
        TextSource::flat((1..=count).map(|i| format!("u{i}")))
    }

    fn small_layout() -> PageLayout {
        PageLayout {
            canvas: Size::new(200, 300),
            left_margin: Px::from_i32(10),
            content_width: Px::from_i32(180),
            title_anchor_y: Px::from_i32(10),
            bottom_bound: Px::from_i32(290),
            safety_margin: Px::from_i32(10),
            min_top_margin: Px::from_i32(20),
            title_gap: Px::from_i32(5),
        }
    }

    // Two single-line units per page on a small canvas, no fonts.
    fn engine(policy: AllocationPolicy, slicing: Option<u32>) -> EngineBuilder {
        Engine::builder()
            .system_fonts(false)
            .layout(small_layout())
            .policy(policy)
            .slicing(slicing)
            .max_lines_per_page(Some(2))
    }

    fn request(backgrounds: Vec<BackgroundSource>, content: TextSource) -> NoteRequest {
        NoteRequest {
            backgrounds,
            content,
            title: TitleConfig::new("Tips"),
            group_index: 0,
        }
    }

    #[test]
    fn kept_indices_keep_head_and_tail() {
        assert_eq!(kept_page_indices(10, 6), vec![0, 1, 2, 7, 8, 9]);
        assert_eq!(kept_page_indices(10, 5), vec![0, 1, 2, 8, 9]);
        assert_eq!(kept_page_indices(4, 6), vec![0, 1, 2, 3]);
        assert_eq!(kept_page_indices(4, 0), vec![0, 1, 2, 3]);
        assert_eq!(kept_page_indices(3, 1), vec![0]);
    }

    #[test]
    fn exclusive_sliced_pool_allows_exactly_its_unit_count() {
        let engine = engine(AllocationPolicy::Exclusive, Some(4)).build().unwrap();
        let ok = engine
            .paginate_once(&request(backgrounds(2), units(16)))
            .unwrap();
        assert_eq!(ok.pages.len(), 8);
        assert_eq!(ok.sliced_sources, vec!["bg0.png".to_string(), "bg1.png".to_string()]);

        let err = engine
            .paginate_once(&request(backgrounds(2), units(17)))
            .unwrap_err();
        assert!(matches!(
            err,
            PageTileError::MaterialInsufficient { requested: 9, available: 8 }
        ));
    }

    #[test]
    fn exclusive_never_binds_a_unit_twice() {
        let engine = engine(AllocationPolicy::Exclusive, Some(4)).build().unwrap();
        let result = engine
            .paginate_once(&request(backgrounds(3), units(24)))
            .unwrap();
        let seen: HashSet<MaterialUnit> = result.pages.iter().filter_map(|p| p.unit).collect();
        assert_eq!(seen.len(), 12);
        assert_eq!(result.pages.len(), 12);
        assert_eq!(result.metrics.units_consumed, 12);
    }

    #[test]
    fn shared_policy_reuses_one_background_indefinitely() {
        let engine = engine(AllocationPolicy::Shared, None).build().unwrap();
        let mut req = request(backgrounds(1), units(40));
        req.group_index = 7;
        let result = engine.paginate_once(&req).unwrap();
        assert_eq!(result.pages.len(), 20);
        assert!(result.pages.iter().all(|p| {
            p.unit == Some(MaterialUnit { source_index: 0, tile_index: 0 }) && p.has_title
        }));
        assert!(result.sliced_sources.is_empty());
    }

    #[test]
    fn title_once_stamps_only_the_first_page() {
        let engine = engine(AllocationPolicy::ExclusiveTitleOnce, None)
            .build()
            .unwrap();
        let result = engine
            .paginate_once(&request(backgrounds(5), units(10)))
            .unwrap();
        let titles: Vec<bool> = result.pages.iter().map(|p| p.has_title).collect();
        assert_eq!(titles, vec![true, false, false, false, false]);
    }

    #[test]
    fn numbering_is_continuous_across_pages() {
        let engine = engine(AllocationPolicy::Shared, None)
            .layout(PageLayout::default())
            .max_lines_per_page(None)
            .build()
            .unwrap();
        let measure = engine.fonts.measure_for(None);
        let first = engine.item_block(&measure, "一二三", 7);
        assert_eq!(first.lines, vec!["7. 一二三".to_string()]);

        // 1082px at 45px per wide char holds 24 chars; 30 chars wrap once.
        let long = "字".repeat(30);
        let wrapped = engine.item_block(&measure, &long, 8);
        assert_eq!(wrapped.lines.len(), 2);
        assert!(wrapped.lines[0].starts_with("8. "));
        assert!(!wrapped.lines[1].starts_with("9. "));

        let mut ctx = engine.new_context().unwrap();
        let output = engine
            .paginate(&mut ctx, &request(backgrounds(1), units(60)))
            .unwrap();
        let lines: usize = output.pages.iter().map(|p| p.line_count).sum();
        assert_eq!(lines, 60);
        assert!(output.pages.len() > 1);
        // Units start at 236 and take 70px each; a 20th would end at 1636 > 1610.
        assert_eq!(output.pages[0].line_count, 19);
    }

    #[test]
    fn oversized_unit_is_placed_on_an_empty_page() {
        let engine = engine(AllocationPolicy::Shared, None)
            .layout(PageLayout::default())
            .build()
            .unwrap();
        // Three wrapped lines exceed the two-line ceiling but still land.
        let long = "字".repeat(60);
        let result = engine
            .paginate_once(&request(backgrounds(1), TextSource::flat([long.clone(), long])))
            .unwrap();
        assert_eq!(result.pages.len(), 2);
        assert!(result.pages.iter().all(|p| p.line_count == 3));
    }

    #[test]
    fn unit_taller_than_a_page_continues_on_the_next_one() {
        let dir = std::env::temp_dir().join(format!("pagetile-split-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let log = dir.join("debug.jsonl");
        let engine = engine(AllocationPolicy::Shared, None)
            .layout(PageLayout::default())
            .max_lines_per_page(None)
            .debug_log(&log)
            .build()
            .unwrap();
        // 960 wide chars wrap into 40 lines; 22 fit below the title.
        let long = "字".repeat(960);
        let result = engine
            .paginate_once(&request(backgrounds(1), TextSource::flat([long.as_str(), "next"])))
            .unwrap();
        let counts: Vec<usize> = result.pages.iter().map(|p| p.line_count).collect();
        assert_eq!(counts, vec![22, 19]);
        assert_eq!(result.metrics.line_count(), 41);

        let text = std::fs::read_to_string(&log).unwrap();
        assert!(text.contains("\"type\":\"content.split\",\"note\":0,\"page\":0,\"placed\":22,\"carried\":18"));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn heading_moves_with_its_first_item() {
        let engine = engine(AllocationPolicy::Shared, None)
            .max_lines_per_page(None)
            .topic_headings(true)
            .build()
            .unwrap();
        let content = TextSource::Grouped(vec![Topic::new("A", ["a1"]), Topic::new("B", ["b1"])]);
        let mut req = request(backgrounds(1), content);
        req.title = TitleConfig::default();
        // Heading B alone would fit under a1 (254 <= 280) but b1 would not.
        let result = engine.paginate_once(&req).unwrap();
        let counts: Vec<usize> = result.pages.iter().map(|p| p.line_count).collect();
        assert_eq!(counts, vec![2, 2]);
    }

    #[test]
    fn identical_background_files_are_reported_separately() {
        let engine = engine(AllocationPolicy::Exclusive, Some(2))
            .max_lines_per_page(Some(1))
            .build()
            .unwrap();
        let bytes = png_bytes(40, 30, [30, 60, 90, 255]);
        let pool = vec![
            BackgroundSource::from_bytes("a.png", bytes.clone()),
            BackgroundSource::from_bytes("b.png", bytes),
        ];
        let result = engine.paginate_once(&request(pool, units(4))).unwrap();
        assert_eq!(result.sliced_sources, vec!["a.png".to_string(), "b.png".to_string()]);
        let names: Vec<&str> = result
            .pages
            .iter()
            .filter_map(|p| p.background_name.as_deref())
            .collect();
        assert_eq!(names, vec!["a.png", "a.png", "b.png", "b.png"]);
    }

    #[test]
    fn page_limit_returns_interior_material_to_the_pool() {
        let engine = engine(AllocationPolicy::Exclusive, None)
            .page_limit(6)
            .build()
            .unwrap();
        let mut ctx = engine.new_context().unwrap();
        let output = engine
            .paginate(&mut ctx, &request(backgrounds(12), units(20)))
            .unwrap();
        assert_eq!(output.pages.len(), 6);
        assert_eq!(output.removed_pages, vec![3, 4, 5, 6]);
        let sources: Vec<usize> = output
            .pages
            .iter()
            .map(|p| p.unit.unwrap().source_index)
            .collect();
        assert_eq!(sources, vec![0, 1, 2, 7, 8, 9]);
        assert_eq!(ctx.allocator().consumed(), 6);
        assert_eq!(ctx.metrics().pages_trimmed, 4);

        // Released units are bound again before fresh ones.
        let next = engine
            .paginate(&mut ctx, &request(backgrounds(12), units(2)))
            .unwrap();
        assert_eq!(next.pages[0].unit.unwrap().source_index, 3);
        let _ = ctx.finish();
    }

    #[test]
    fn topic_headings_are_placed_but_not_numbered() {
        let engine = engine(AllocationPolicy::Shared, None)
            .layout(PageLayout::default())
            .max_lines_per_page(None)
            .topic_headings(true)
            .build()
            .unwrap();
        let measure = engine.fonts.measure_for(None);
        let heading = engine.heading_block(&measure, "Morning");
        assert!(heading.heading);
        assert_eq!(heading.lines, vec!["◆ Morning".to_string()]);
        assert_eq!(heading.font_size.to_milli_i64(), 54_000);

        let content = TextSource::Grouped(vec![
            Topic::new("A", ["a1", "a2"]),
            Topic::new("B", ["b1"]),
        ]);
        let result = engine
            .paginate_once(&request(backgrounds(1), content))
            .unwrap();
        assert_eq!(result.pages.len(), 1);
        assert_eq!(result.pages[0].line_count, 5);
    }

    #[test]
    fn empty_content_produces_no_pages_and_consumes_nothing() {
        let engine = engine(AllocationPolicy::Exclusive, Some(2)).build().unwrap();
        let result = engine
            .paginate_once(&request(backgrounds(1), TextSource::flat(["", "  "])))
            .unwrap();
        assert!(result.pages.is_empty());
        assert_eq!(result.metrics.units_consumed, 0);
        assert!(result.sliced_sources.is_empty());
    }
}
