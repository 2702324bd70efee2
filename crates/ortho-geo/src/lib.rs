pub mod world;

use std::io::Cursor;

use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use tiff::decoder::Decoder;
use tiff::tags::Tag;
use tracing::debug;

pub use world::GeoTransform;

// GeoTIFF tag ids (not all are named by the tiff crate).
const TAG_MODEL_PIXEL_SCALE: u16 = 33550;
const TAG_MODEL_TIEPOINT: u16 = 33922;
const TAG_GEO_ASCII_PARAMS: u16 = 34737;

#[derive(Debug, thiserror::Error)]
pub enum GeoError {
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),
    #[error("raster driver error: {0}")]
    Driver(String),
    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy)]
pub struct ConvertOptions {
    pub save_georeference: bool,
    /// Pixel size (map units per pixel) used for the world file when the
    /// source raster carries no geotags.
    pub fallback_pixel_size: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct ConvertedRaster {
    pub png: Vec<u8>,
    /// `.pgw` body; `Some` iff georeferencing was requested.
    pub world_file: Option<String>,
    /// `.prj` body (CRS text from the raster); only when georeferencing was
    /// requested and the source declared one.
    pub projection: Option<String>,
}

/// Only `.tif`/`.tiff` inputs are accepted.
pub fn check_extension(filename: &str) -> Result<(), GeoError> {
    let lower = filename.to_ascii_lowercase();
    if lower.ends_with(".tif") || lower.ends_with(".tiff") {
        Ok(())
    } else {
        Err(GeoError::UnsupportedFormat(filename.to_string()))
    }
}

/// Converts a GeoTIFF to PNG, optionally producing world-file/projection
/// sidecar contents.
///
/// 8- and 16-bit rasters re-encode directly, preserving bit depth. Float
/// rasters are renormalized per band to 8-bit (capped at RGBA). Bit-depth
/// behavior on the direct path is an accepted precision trade-off: values
/// are carried through as decoded, never re-scaled.
pub fn convert(tiff_bytes: &[u8], opts: &ConvertOptions) -> Result<ConvertedRaster, GeoError> {
    let geo = read_geo_tags(tiff_bytes);

    let img = image::load_from_memory_with_format(tiff_bytes, ImageFormat::Tiff)
        .map_err(|e| GeoError::Driver(format!("decode tiff: {}", e)))?;

    let png = encode_png(&img)?;

    let (world_file, projection) = if opts.save_georeference {
        let transform = match &geo {
            Some(tags) => tags.transform,
            None => opts
                .fallback_pixel_size
                .map(GeoTransform::from_pixel_size)
                .unwrap_or_default(),
        };
        let projection = geo.as_ref().and_then(|t| t.crs.clone());
        (Some(transform.world_file_contents()), projection)
    } else {
        (None, None)
    };

    Ok(ConvertedRaster { png, world_file, projection })
}

struct GeoTags {
    transform: GeoTransform,
    crs: Option<String>,
}

/// Best-effort geotag read; a raster without ModelPixelScale/ModelTiepoint
/// simply has no georeferencing.
fn read_geo_tags(tiff_bytes: &[u8]) -> Option<GeoTags> {
    let mut decoder = Decoder::new(Cursor::new(tiff_bytes)).ok()?;

    let scale = decoder
        .find_tag(Tag::Unknown(TAG_MODEL_PIXEL_SCALE))
        .ok()
        .flatten()
        .and_then(|v| v.into_f64_vec().ok())?;
    let tiepoint = decoder
        .find_tag(Tag::Unknown(TAG_MODEL_TIEPOINT))
        .ok()
        .flatten()
        .and_then(|v| v.into_f64_vec().ok())?;
    let transform = GeoTransform::from_geotags(&scale, &tiepoint)?;

    let crs = decoder
        .find_tag(Tag::Unknown(TAG_GEO_ASCII_PARAMS))
        .ok()
        .flatten()
        .and_then(|v| v.into_string().ok())
        .map(|s| s.trim_end_matches(['|', '\0']).to_string())
        .filter(|s| !s.is_empty());

    debug!("geo: transform {:?}, crs present: {}", transform, crs.is_some());
    Some(GeoTags { transform, crs })
}

fn encode_png(img: &DynamicImage) -> Result<Vec<u8>, GeoError> {
    // Direct copy keeps source depth (PNG handles 8- and 16-bit channels).
    // Everything else goes through float renormalization.
    let direct = matches!(
        img,
        DynamicImage::ImageLuma8(_)
            | DynamicImage::ImageLumaA8(_)
            | DynamicImage::ImageRgb8(_)
            | DynamicImage::ImageRgba8(_)
            | DynamicImage::ImageLuma16(_)
            | DynamicImage::ImageLumaA16(_)
            | DynamicImage::ImageRgb16(_)
            | DynamicImage::ImageRgba16(_)
    );

    let mut out = Vec::new();
    if direct {
        img.write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
            .map_err(|e| GeoError::Driver(format!("encode png: {}", e)))?;
    } else {
        let normalized = renormalize(img);
        DynamicImage::ImageRgba8(normalized)
            .write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
            .map_err(|e| GeoError::Driver(format!("encode png: {}", e)))?;
    }
    Ok(out)
}

/// Per-band min/max rescale to 8 bits, channel count capped at RGBA.
/// Constant bands map to full white when positive (keeps opaque alpha
/// opaque) and black otherwise.
fn renormalize(img: &DynamicImage) -> RgbaImage {
    let float = img.to_rgba32f();
    let (w, h) = float.dimensions();

    let mut min = [f32::INFINITY; 4];
    let mut max = [f32::NEG_INFINITY; 4];
    for px in float.pixels() {
        for c in 0..4 {
            min[c] = min[c].min(px[c]);
            max[c] = max[c].max(px[c]);
        }
    }

    let mut out = RgbaImage::new(w, h);
    for (x, y, px) in float.enumerate_pixels() {
        let mut mapped = [0u8; 4];
        for c in 0..4 {
            mapped[c] = if max[c] > min[c] {
                (((px[c] - min[c]) / (max[c] - min[c])) * 255.0).round() as u8
            } else if max[c] > 0.0 {
                255
            } else {
                0
            };
        }
        out.put_pixel(x, y, Rgba(mapped));
    }
    out
}
