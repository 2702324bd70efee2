/// One slice of the source image, in image pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileRect {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

/// Overlapping tile plan covering the whole image.
///
/// Images that fit in one slice produce a single full-image tile. Otherwise
/// tiles are `slice_size` squares stepped by `slice_size * (1 - overlap)`,
/// with the last row/column clamped so the image edge is always covered.
pub fn tile_plan(img_w: u32, img_h: u32, slice_size: u32, overlap_ratio: f32) -> Vec<TileRect> {
    if img_w <= slice_size && img_h <= slice_size {
        return vec![TileRect { x: 0, y: 0, w: img_w, h: img_h }];
    }

    let overlap = (slice_size as f32 * overlap_ratio) as u32;
    let stride = slice_size.saturating_sub(overlap).max(1);

    let axis_positions = |len: u32| -> Vec<u32> {
        if len <= slice_size {
            return vec![0];
        }
        let last = len - slice_size;
        let mut pos: Vec<u32> = (0..)
            .map(|i| i * stride)
            .take_while(|&p| p < last)
            .collect();
        pos.push(last);
        pos
    };

    let xs = axis_positions(img_w);
    let ys = axis_positions(img_h);

    let mut tiles = Vec::with_capacity(xs.len() * ys.len());
    for &y in &ys {
        for &x in &xs {
            tiles.push(TileRect {
                x,
                y,
                w: slice_size.min(img_w - x),
                h: slice_size.min(img_h - y),
            });
        }
    }
    tiles
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_image_is_a_single_tile() {
        let tiles = tile_plan(100, 80, 512, 0.3);
        assert_eq!(tiles, vec![TileRect { x: 0, y: 0, w: 100, h: 80 }]);
    }

    #[test]
    fn wide_image_tiles_overlap_and_cover_the_edge() {
        // stride = 512 - 128 = 384; last tile clamped to x = 1024 - 512
        let tiles = tile_plan(1024, 512, 512, 0.25);
        let xs: Vec<u32> = tiles.iter().map(|t| t.x).collect();
        assert_eq!(xs, vec![0, 384, 512]);
        assert!(tiles.iter().all(|t| t.w == 512 && t.h == 512));
        assert!(tiles.iter().all(|t| t.x + t.w <= 1024 && t.y + t.h <= 512));
    }

    #[test]
    fn plan_covers_every_pixel() {
        let (w, h) = (1300, 900);
        let tiles = tile_plan(w, h, 512, 0.3);
        let mut covered = vec![false; (w * h) as usize];
        for t in &tiles {
            for y in t.y..t.y + t.h {
                for x in t.x..t.x + t.w {
                    covered[(y * w + x) as usize] = true;
                }
            }
        }
        assert!(covered.iter().all(|&c| c));
    }
}
