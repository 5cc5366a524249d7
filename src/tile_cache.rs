use std::collections::{HashMap, HashSet};

use crate::debug::{DebugLogger, json_escape};
use crate::error::PageTileError;
use crate::perf::PerfLogger;
use crate::slicer::{self, Tile};
use crate::source::{BackgroundSource, DecodeRetry};
use crate::types::Size;

// Rasters are keyed by content id so identical files slice once; names are
// recorded per pool entry so every consumed source is reported.
pub struct TileCache {
    canvas: Size,
    piece_count: u32,
    retry: DecodeRetry,
    tiles: HashMap<String, Vec<Tile>>,
    sliced_names: Vec<String>,
    recorded: HashSet<(String, String)>,
    hits: u64,
    misses: u64,
    debug: Option<DebugLogger>,
    perf: Option<PerfLogger>,
}

impl TileCache {
    pub fn new(canvas: Size, piece_count: u32) -> Result<Self, PageTileError> {
        slicer::validate_piece_count(piece_count)?;
        Ok(Self {
            canvas,
            piece_count,
            retry: DecodeRetry::default(),
            tiles: HashMap::new(),
            sliced_names: Vec::new(),
            recorded: HashSet::new(),
            hits: 0,
            misses: 0,
            debug: None,
            perf: None,
        })
    }

    pub(crate) fn with_loggers(mut self, debug: Option<DebugLogger>, perf: Option<PerfLogger>) -> Self {
        self.debug = debug;
        self.perf = perf;
        self
    }

    pub fn with_decode_retry(mut self, retry: DecodeRetry) -> Self {
        self.retry = retry;
        self
    }

    pub fn piece_count(&self) -> u32 {
        self.piece_count
    }

    pub fn get_slice(
        &mut self,
        source: &BackgroundSource,
        tile_index: usize,
    ) -> Result<Tile, PageTileError> {
        if self.tiles.contains_key(source.id()) {
            self.hits += 1;
            if let Some(debug) = &self.debug {
                debug.increment("cache.hit", 1);
            }
        } else {
            self.misses += 1;
            let (canvas, piece_count, retry) = (self.canvas, self.piece_count, self.retry);
            let tiles = match &self.perf {
                Some(perf) => perf.span("slice", None, || {
                    slicer::slice(source, piece_count, canvas, retry)
                }),
                None => slicer::slice(source, piece_count, canvas, retry),
            }?;
            if tiles.is_empty() {
                return Err(PageTileError::ImageDecode(format!(
                    "background {} has no usable tiles",
                    source.name()
                )));
            }
            if let Some(debug) = &self.debug {
                debug.log_json(&format!(
                    "{{\"type\":\"cache.slice\",\"source\":\"{}\",\"pieces\":{}}}",
                    json_escape(source.name()),
                    tiles.len()
                ));
                debug.increment("cache.miss", 1);
            }
            self.tiles.insert(source.id().to_string(), tiles);
        }

        let key = (source.name().to_string(), source.id().to_string());
        if !self.recorded.contains(&key) {
            self.sliced_names.push(key.0.clone());
            self.recorded.insert(key);
        }
        let tiles = self.tiles.get(source.id()).map(Vec::as_slice).unwrap_or(&[]);
        pick(tiles, source, tile_index)
    }

    pub fn contains(&self, source: &BackgroundSource) -> bool {
        self.tiles.contains_key(source.id())
    }

    // First-use order.
    pub fn sliced_source_names(&self) -> &[String] {
        &self.sliced_names
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn misses(&self) -> u64 {
        self.misses
    }

    pub fn cleanup(&mut self) {
        if let Some(debug) = &self.debug {
            debug.log_cleanup(self.tiles.len());
        }
        self.tiles.clear();
        self.sliced_names.clear();
        self.recorded.clear();
    }
}

// Tiles shared between identical files carry the name of the requesting source.
fn pick(tiles: &[Tile], source: &BackgroundSource, tile_index: usize) -> Result<Tile, PageTileError> {
    let Some(tile) = tiles.get(tile_index) else {
        return Err(PageTileError::InvalidConfiguration(format!(
            "tile {} requested from {} which has {} tiles",
            tile_index,
            source.name(),
            tiles.len()
        )));
    };
    let mut tile = tile.clone();
    if tile.source_name != source.name() {
        tile.source_name = source.name().to_string();
    }
    Ok(tile)
}
