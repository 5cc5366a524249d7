use std::sync::Arc;

use rayon::prelude::*;
use tiny_skia::{IntRect, Pixmap};

use crate::error::PageTileError;
use crate::raster::{BACKGROUND_ALPHA, cover_fit_darkened};
use crate::source::{BackgroundSource, DecodeRetry};
use crate::types::Size;

pub const MIN_PIECES: u32 = 2;
pub const MAX_PIECES: u32 = 16;

#[derive(Debug, Clone)]
pub struct Tile {
    pub source_id: String,
    pub source_name: String,
    pub tile_index: usize,
    pub surface: Arc<Pixmap>,
}

pub fn validate_piece_count(piece_count: u32) -> Result<(), PageTileError> {
    if piece_count % 2 != 0 || !(MIN_PIECES..=MAX_PIECES).contains(&piece_count) {
        return Err(PageTileError::SliceGeometry(piece_count));
    }
    Ok(())
}

pub fn grid_for(piece_count: u32, aspect: f32) -> Result<(u32, u32), PageTileError> {
    validate_piece_count(piece_count)?;
    let wide = match piece_count {
        4 => Some((2, 2)),
        6 => Some((2, 3)),
        8 => Some((2, 4)),
        10 => Some((2, 5)),
        12 => Some((3, 4)),
        14 => Some((2, 7)),
        16 => Some((4, 4)),
        _ => None,
    };
    if let Some((rows, cols)) = wide {
        return Ok(if aspect >= 1.0 { (rows, cols) } else { (cols, rows) });
    }

    let mut best = (1, piece_count);
    let mut best_diff = f32::INFINITY;
    for rows in 1..=piece_count {
        if piece_count % rows != 0 {
            continue;
        }
        let cols = piece_count / rows;
        let diff = (cols as f32 / rows as f32 - aspect).abs();
        if diff < best_diff {
            best = (rows, cols);
            best_diff = diff;
        }
    }
    Ok(best)
}

// Splits `source` into `piece_count` row-major tiles, each cover-fitted to
// `canvas` and darkened. An undecodable source yields no tiles.
pub fn slice(
    source: &BackgroundSource,
    piece_count: u32,
    canvas: Size,
    retry: DecodeRetry,
) -> Result<Vec<Tile>, PageTileError> {
    validate_piece_count(piece_count)?;
    let Ok(image) = source.decode_with(retry) else {
        return Ok(Vec::new());
    };
    let (width, height) = (image.width(), image.height());
    let (rows, cols) = grid_for(piece_count, width as f32 / height as f32)?;

    let cells: Vec<(usize, IntRect)> = (0..rows)
        .flat_map(|row| (0..cols).map(move |col| (row, col)))
        .enumerate()
        .filter_map(|(index, (row, col))| {
            cell_rect(width, height, rows, cols, row, col).map(|rect| (index, rect))
        })
        .collect();
    if cells.len() != piece_count as usize {
        return Err(PageTileError::ImageDecode(format!(
            "{} ({}x{}) is too small for {} tiles",
            source.name(),
            width,
            height,
            piece_count
        )));
    }

    cells
        .par_iter()
        .map(|(index, rect)| {
            let Some(cell) = image.clone_rect(*rect) else {
                return Err(PageTileError::ImageDecode(format!(
                    "tile {} of {} is out of bounds",
                    index,
                    source.name()
                )));
            };
            let surface = cover_fit_darkened(&cell, canvas, BACKGROUND_ALPHA)?;
            Ok(Tile {
                source_id: source.id().to_string(),
                source_name: source.name().to_string(),
                tile_index: *index,
                surface: Arc::new(surface),
            })
        })
        .collect()
}

pub fn whole(
    source: &BackgroundSource,
    canvas: Size,
    retry: DecodeRetry,
) -> Result<Tile, PageTileError> {
    let image = source.decode_with(retry)?;
    let surface = cover_fit_darkened(&image, canvas, BACKGROUND_ALPHA)?;
    Ok(Tile {
        source_id: source.id().to_string(),
        source_name: source.name().to_string(),
        tile_index: 0,
        surface: Arc::new(surface),
    })
}

fn cell_rect(width: u32, height: u32, rows: u32, cols: u32, row: u32, col: u32) -> Option<IntRect> {
    let x0 = col * width / cols;
    let x1 = (col + 1) * width / cols;
    let y0 = row * height / rows;
    let y1 = (row + 1) * height / rows;
    if x1 <= x0 || y1 <= y0 {
        return None;
    }
    IntRect::from_xywh(x0 as i32, y0 as i32, x1 - x0, y1 - y0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::tests::png_bytes;
    use image::RgbaImage;
    use std::io::Cursor;
    use std::time::{Duration, Instant};

    #[test]
    fn canonical_grids_follow_orientation() {
        assert_eq!(grid_for(4, 1.5).unwrap(), (2, 2));
        assert_eq!(grid_for(6, 1.5).unwrap(), (2, 3));
        assert_eq!(grid_for(6, 0.75).unwrap(), (3, 2));
        assert_eq!(grid_for(8, 1.0).unwrap(), (2, 4));
        assert_eq!(grid_for(10, 2.0).unwrap(), (2, 5));
        assert_eq!(grid_for(12, 1.2).unwrap(), (3, 4));
        assert_eq!(grid_for(12, 0.5).unwrap(), (4, 3));
        assert_eq!(grid_for(14, 1.1).unwrap(), (2, 7));
        assert_eq!(grid_for(16, 0.3).unwrap(), (4, 4));
    }

    #[test]
    fn two_pieces_use_nearest_ratio() {
        assert_eq!(grid_for(2, 1.8).unwrap(), (1, 2));
        assert_eq!(grid_for(2, 0.6).unwrap(), (2, 1));
        // |2 - 1.25| == |0.5 - 1.25|, tie goes to a single row.
        assert_eq!(grid_for(2, 1.25).unwrap(), (1, 2));
    }

    #[test]
    fn invalid_piece_counts_fail_fast() {
        for bad in [0, 1, 3, 7, 18, 32] {
            assert!(matches!(
                grid_for(bad, 1.0),
                Err(PageTileError::SliceGeometry(n)) if n == bad
            ));
        }
        let src = BackgroundSource::from_bytes("bg.png", png_bytes(40, 30, [0, 0, 0, 255]));
        assert!(slice(&src, 5, Size::new(10, 10), DecodeRetry::default()).is_err());
    }

    #[test]
    fn slice_produces_row_major_tiles_of_canvas_size() {
        // Left half red, right half blue.
        let mut img = RgbaImage::new(400, 300);
        for (x, _, px) in img.enumerate_pixels_mut() {
            *px = if x < 200 {
                image::Rgba([255, 0, 0, 255])
            } else {
                image::Rgba([0, 0, 255, 255])
            };
        }
        let mut bytes = Vec::new();
        img.write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();
        let src = BackgroundSource::from_bytes("bg.png", bytes);

        let tiles = slice(&src, 4, Size::new(62, 83), DecodeRetry::default()).unwrap();
        assert_eq!(tiles.len(), 4);
        for (i, tile) in tiles.iter().enumerate() {
            assert_eq!(tile.tile_index, i);
            assert_eq!(tile.source_id, src.id());
            assert_eq!((tile.surface.width(), tile.surface.height()), (62, 83));
        }
        let left = tiles[0].surface.pixel(31, 41).unwrap();
        let right = tiles[1].surface.pixel(31, 41).unwrap();
        assert!(left.red() > left.blue());
        assert!(right.blue() > right.red());
        // Darkened: full red lands near 255 * 0.35.
        assert!(left.red() < 100);
    }

    #[test]
    fn undecodable_source_yields_no_tiles() {
        let src = BackgroundSource::from_bytes("broken.png", b"\x89PNG broken".to_vec());
        assert!(slice(&src, 4, Size::new(10, 10), DecodeRetry::default()).unwrap().is_empty());
        assert!(whole(&src, Size::new(10, 10), DecodeRetry::default()).is_err());
    }

    #[test]
    fn background_decode_honors_retry_budget() {
        let src = BackgroundSource::from_bytes("broken.png", b"nope".to_vec());
        let retry = DecodeRetry {
            attempts: 3,
            backoff: Duration::from_millis(15),
        };
        // Pauses of 15ms and 30ms between the three attempts.
        let started = Instant::now();
        assert!(whole(&src, Size::new(10, 10), retry).is_err());
        assert!(started.elapsed() >= Duration::from_millis(45));

        let started = Instant::now();
        assert!(slice(&src, 2, Size::new(10, 10), retry).unwrap().is_empty());
        assert!(started.elapsed() >= Duration::from_millis(45));
    }
}
