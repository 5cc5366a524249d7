use crate::allocation::{AllocationPolicy, Allocator};
use crate::error::PageTileError;
use crate::metrics::RunMetrics;
use crate::tile_cache::TileCache;
use crate::types::Size;

pub struct RunContext {
    pub(crate) allocator: Allocator,
    pub(crate) tiles: Option<TileCache>,
    pub(crate) metrics: RunMetrics,
}

impl RunContext {
    pub fn new(
        policy: AllocationPolicy,
        slicing: Option<u32>,
        canvas: Size,
    ) -> Result<Self, PageTileError> {
        let tiles = slicing
            .map(|pieces| TileCache::new(canvas, pieces))
            .transpose()?;
        let pieces = slicing.unwrap_or(1) as usize;
        Ok(Self {
            allocator: Allocator::new(policy, pieces),
            tiles,
            metrics: RunMetrics::default(),
        })
    }

    pub fn allocator(&self) -> &Allocator {
        &self.allocator
    }

    pub fn tile_cache(&self) -> Option<&TileCache> {
        self.tiles.as_ref()
    }

    pub fn metrics(&self) -> &RunMetrics {
        &self.metrics
    }

    pub fn sliced_source_names(&self) -> Vec<String> {
        self.tiles
            .as_ref()
            .map(|cache| cache.sliced_source_names().to_vec())
            .unwrap_or_default()
    }

    // Snapshots the sliced source names, then drops every cached tile.
    pub fn finish(mut self) -> (Vec<String>, RunMetrics) {
        let names = self.sliced_source_names();
        if let Some(cache) = self.tiles.as_mut() {
            cache.cleanup();
        }
        (names, std::mem::take(&mut self.metrics))
    }
}
