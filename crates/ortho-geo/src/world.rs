/// Affine pixel-to-geographic transform, GDAL coefficient order:
/// `(origin_x, pixel_w, rot_x, origin_y, rot_y, pixel_h)`.
/// `pixel_h` is negative for north-up rasters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoTransform(pub [f64; 6]);

impl Default for GeoTransform {
    /// The identity transform GDAL reports for rasters without geotags.
    fn default() -> Self {
        Self([0.0, 1.0, 0.0, 0.0, 0.0, 1.0])
    }
}

impl GeoTransform {
    /// From GeoTIFF ModelPixelScale + ModelTiepoint tags (north-up, zero
    /// rotation). Tiepoint maps raster (i, j) to model (x, y).
    pub fn from_geotags(pixel_scale: &[f64], tiepoint: &[f64]) -> Option<Self> {
        if pixel_scale.len() < 2 || tiepoint.len() < 5 {
            return None;
        }
        let (sx, sy) = (pixel_scale[0], pixel_scale[1]);
        let (i, j, x, y) = (tiepoint[0], tiepoint[1], tiepoint[3], tiepoint[4]);
        Some(Self([x - i * sx, sx, 0.0, y + j * sy, 0.0, -sy]))
    }

    /// Square pixels of `size` map units, origin zero, north-up.
    pub fn from_pixel_size(size: f64) -> Self {
        Self([0.0, size, 0.0, 0.0, 0.0, -size])
    }

    /// Six-line ESRI world file body. The last two lines carry the
    /// geographic coordinate of the top-left pixel's center, hence the
    /// half-pixel offset from the origin.
    pub fn world_file_contents(&self) -> String {
        let gt = &self.0;
        format!(
            "{}\n{}\n{}\n{}\n{}\n{}\n",
            gt[1],
            gt[4],
            gt[2],
            gt[5],
            gt[0] + gt[1] * 0.5,
            gt[3] + gt[5] * 0.5,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(s: &str) -> Vec<f64> {
        s.lines().map(|l| l.parse().unwrap()).collect()
    }

    #[test]
    fn world_file_matches_scale_rotation_and_center_formula() {
        let gt = GeoTransform([443400.0, 5.0, 0.0, 5195000.0, 0.0, -5.0]);
        let v = lines(&gt.world_file_contents());
        assert_eq!(v, vec![5.0, 0.0, 0.0, -5.0, 443402.5, 5194997.5]);
    }

    #[test]
    fn default_transform_matches_gdal_identity() {
        let v = lines(&GeoTransform::default().world_file_contents());
        assert_eq!(v, vec![1.0, 0.0, 0.0, 1.0, 0.5, 0.5]);
    }

    #[test]
    fn geotags_with_nonzero_tiepoint_shift_the_origin() {
        // tiepoint: raster (2, 4) pins to model (100, 200), 0.5 units/pixel
        let gt = GeoTransform::from_geotags(&[0.5, 0.5, 0.0], &[2.0, 4.0, 0.0, 100.0, 200.0, 0.0])
            .unwrap();
        assert_eq!(gt.0, [99.0, 0.5, 0.0, 202.0, 0.0, -0.5]);
    }

    #[test]
    fn short_geotags_are_rejected() {
        assert!(GeoTransform::from_geotags(&[1.0], &[0.0; 6]).is_none());
        assert!(GeoTransform::from_geotags(&[1.0, 1.0], &[0.0; 3]).is_none());
    }

    #[test]
    fn pixel_size_transform_is_north_up() {
        let gt = GeoTransform::from_pixel_size(5.0);
        assert_eq!(gt.0, [0.0, 5.0, 0.0, 0.0, 0.0, -5.0]);
        let v = lines(&gt.world_file_contents());
        assert_eq!(v, vec![5.0, 0.0, 0.0, -5.0, 2.5, -2.5]);
    }
}
