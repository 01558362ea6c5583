//! Single-band GeoTIFF rasters, decoded whole or as a pixel window.

use crate::{Result, TileError};
use biomass_common::Bounds;
use std::io::{Cursor, Read, Seek};
use tiff::decoder::{Decoder, DecodingResult, Limits};
use tiff::tags::Tag;
use tiff::ColorType;

const MODEL_PIXEL_SCALE: u16 = 33550;
const MODEL_TIEPOINT: u16 = 33922;
const MODEL_TRANSFORMATION: u16 = 34264;
const GEO_KEY_DIRECTORY: u16 = 34735;
const GDAL_NODATA: u16 = 42113;

const PROJECTED_CS_TYPE_KEY: u32 = 3072;
const GEOGRAPHIC_TYPE_KEY: u32 = 2048;
const USER_DEFINED: u32 = 32767;

fn geo_tag(code: u16) -> Tag {
    Tag::from_u16_exhaustive(code)
}

/// North-up affine transform. Rows run south from `origin_y`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoTransform {
    /// World x of the top-left corner of pixel (0, 0).
    pub origin_x: f64,
    /// World y of the top-left corner of pixel (0, 0).
    pub origin_y: f64,
    /// Pixel width in world units.
    pub pixel_width: f64,
    /// Pixel height in world units (positive).
    pub pixel_height: f64,
}

impl GeoTransform {
    /// Fractional pixel coordinates `(col, row)` of a world point.
    pub fn world_to_pixel(&self, x: f64, y: f64) -> (f64, f64) {
        (
            (x - self.origin_x) / self.pixel_width,
            (self.origin_y - y) / self.pixel_height,
        )
    }

    /// World coordinates of a pixel centre.
    pub fn pixel_center(&self, col: u32, row: u32) -> (f64, f64) {
        (
            self.origin_x + (col as f64 + 0.5) * self.pixel_width,
            self.origin_y - (row as f64 + 0.5) * self.pixel_height,
        )
    }

    /// Transform of a sub-window starting at `(col_off, row_off)`.
    pub fn shifted(&self, col_off: u32, row_off: u32) -> GeoTransform {
        GeoTransform {
            origin_x: self.origin_x + col_off as f64 * self.pixel_width,
            origin_y: self.origin_y - row_off as f64 * self.pixel_height,
            ..*self
        }
    }

    /// Extent of a `width × height` grid.
    pub fn bounds(&self, width: u32, height: u32) -> Bounds {
        Bounds::new(
            self.origin_x,
            self.origin_y - height as f64 * self.pixel_height,
            self.origin_x + width as f64 * self.pixel_width,
            self.origin_y,
        )
    }
}

/// A rectangular block of pixels within an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelWindow {
    pub col_off: u32,
    pub row_off: u32,
    pub width: u32,
    pub height: u32,
}

impl PixelWindow {
    pub fn pixel_count(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Pixel window covering `bounds` plus `buffer` pixels, clamped to a
    /// `width × height` image. `None` when nothing overlaps.
    pub fn for_bounds(
        transform: &GeoTransform,
        width: u32,
        height: u32,
        bounds: &Bounds,
        buffer: u32,
    ) -> Option<PixelWindow> {
        let (c0, r0) = transform.world_to_pixel(bounds.min_x, bounds.max_y);
        let (c1, r1) = transform.world_to_pixel(bounds.max_x, bounds.min_y);
        let clamp = |v: f64, max: u32| v.max(0.0).min(max as f64) as u32;

        let col_start = clamp(c0.min(c1).floor() - buffer as f64, width);
        let col_end = clamp(c0.max(c1).ceil() + buffer as f64, width);
        let row_start = clamp(r0.min(r1).floor() - buffer as f64, height);
        let row_end = clamp(r0.max(r1).ceil() + buffer as f64, height);

        if col_end <= col_start || row_end <= row_start {
            return None;
        }
        Some(PixelWindow {
            col_off: col_start,
            row_off: row_start,
            width: col_end - col_start,
            height: row_end - row_start,
        })
    }
}

/// Limits deciding whether a window is streamed or the full tile fetched.
#[derive(Debug, Clone, Copy)]
pub struct StreamLimits {
    /// Window payload ceiling, counted at 2 bytes per pixel.
    pub max_window_bytes: u64,
    /// Ceiling on decoded bytes of the chunks a window touches.
    pub max_chunk_bytes: u64,
    /// Extra pixels read around the requested bounds.
    pub buffer_pixels: u32,
}

impl Default for StreamLimits {
    fn default() -> Self {
        Self {
            max_window_bytes: 10 * 1024 * 1024,
            max_chunk_bytes: 50 * 1024 * 1024,
            buffer_pixels: 2,
        }
    }
}

/// Outcome of a window read.
#[derive(Debug)]
pub enum WindowRead {
    /// The window was decoded.
    Raster(Raster),
    /// The bounds do not overlap the image.
    Outside,
    /// Streaming would exceed the limits; fetch the full tile instead.
    TooLarge { window_bytes: u64, chunk_bytes: u64 },
}

struct RasterHeader {
    width: u32,
    height: u32,
    transform: GeoTransform,
    epsg: u32,
    nodata: Option<f32>,
}

/// Decoded single-band raster, either a whole tile or a window of one.
#[derive(Debug, Clone)]
pub struct Raster {
    /// Pixel values in row-major order (north to south, west to east).
    data: Vec<f32>,
    width: u32,
    height: u32,
    transform: GeoTransform,
    epsg: u32,
    nodata: Option<f32>,
}

impl Raster {
    /// Build a raster from already decoded values.
    pub fn new(
        data: Vec<f32>,
        width: u32,
        height: u32,
        transform: GeoTransform,
        epsg: u32,
        nodata: Option<f32>,
    ) -> Result<Self> {
        if data.len() != width as usize * height as usize {
            return Err(TileError::UnsupportedDataType(format!(
                "{} values for a {}x{} raster",
                data.len(),
                width,
                height
            )));
        }
        Ok(Self {
            data,
            width,
            height,
            transform,
            epsg,
            nodata,
        })
    }

    /// Decode a whole GeoTIFF held in memory. `fallback_epsg` is used when
    /// the file carries no GeoKey CRS.
    pub fn from_bytes(bytes: &[u8], fallback_epsg: u32) -> Result<Self> {
        let mut decoder = open_decoder(Cursor::new(bytes))?;
        let header = read_header(&mut decoder, fallback_epsg)?;
        let data = decode_samples(decoder.read_image()?);
        Self::new(
            data,
            header.width,
            header.height,
            header.transform,
            header.epsg,
            header.nodata,
        )
    }

    /// Decode only the chunks under `bounds` (in the raster's CRS).
    pub fn read_window<R: Read + Seek>(
        reader: R,
        bounds: &Bounds,
        limits: &StreamLimits,
        fallback_epsg: u32,
    ) -> Result<WindowRead> {
        let mut decoder = open_decoder(reader)?;
        let header = read_header(&mut decoder, fallback_epsg)?;
        let Some(window) = PixelWindow::for_bounds(
            &header.transform,
            header.width,
            header.height,
            bounds,
            limits.buffer_pixels,
        ) else {
            return Ok(WindowRead::Outside);
        };

        let bytes_per_sample = bytes_per_sample(decoder.colortype()?)?;
        let (chunk_w, chunk_h) = decoder.chunk_dimensions();
        if chunk_w == 0 || chunk_h == 0 {
            return Err(TileError::InvalidGeoTiff("zero chunk size".to_string()));
        }
        let chunks_across = header.width.div_ceil(chunk_w);
        let col_first = window.col_off / chunk_w;
        let col_last = (window.col_off + window.width - 1) / chunk_w;
        let row_first = window.row_off / chunk_h;
        let row_last = (window.row_off + window.height - 1) / chunk_h;

        let chunk_count = (col_last - col_first + 1) as u64 * (row_last - row_first + 1) as u64;
        let chunk_bytes = chunk_count * chunk_w as u64 * chunk_h as u64 * bytes_per_sample;
        let window_bytes = window.pixel_count() * 2;
        if window_bytes > limits.max_window_bytes || chunk_bytes > limits.max_chunk_bytes {
            return Ok(WindowRead::TooLarge {
                window_bytes,
                chunk_bytes,
            });
        }

        let mut data = vec![f32::NAN; window.pixel_count() as usize];
        for chunk_row in row_first..=row_last {
            for chunk_col in col_first..=col_last {
                let index = chunk_row * chunks_across + chunk_col;
                let (data_w, data_h) = decoder.chunk_data_dimensions(index);
                let values = decode_samples(decoder.read_chunk(index)?);
                let x0 = chunk_col * chunk_w;
                let y0 = chunk_row * chunk_h;

                for y in 0..data_h {
                    let row = y0 + y;
                    if row < window.row_off || row >= window.row_off + window.height {
                        continue;
                    }
                    for x in 0..data_w {
                        let col = x0 + x;
                        if col < window.col_off || col >= window.col_off + window.width {
                            continue;
                        }
                        let src = (y * data_w + x) as usize;
                        let dst = ((row - window.row_off) * window.width + (col - window.col_off))
                            as usize;
                        if let Some(v) = values.get(src) {
                            data[dst] = *v;
                        }
                    }
                }
            }
        }

        Ok(WindowRead::Raster(Self::new(
            data,
            window.width,
            window.height,
            header.transform.shifted(window.col_off, window.row_off),
            header.epsg,
            header.nodata,
        )?))
    }

    /// Pixel value, or `None` for nodata and non-finite values.
    pub fn get(&self, col: u32, row: u32) -> Option<f32> {
        if col >= self.width || row >= self.height {
            return None;
        }
        let value = self.data[(row * self.width + col) as usize];
        if !value.is_finite() {
            return None;
        }
        if let Some(nodata) = self.nodata {
            if (value - nodata).abs() < 0.001 {
                return None;
            }
        }
        Some(value)
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn transform(&self) -> &GeoTransform {
        &self.transform
    }

    pub fn epsg(&self) -> u32 {
        self.epsg
    }

    pub fn nodata(&self) -> Option<f32> {
        self.nodata
    }

    /// Extent in the raster's CRS.
    pub fn bounds(&self) -> Bounds {
        self.transform.bounds(self.width, self.height)
    }

    /// Approximate heap size of the pixel buffer.
    pub fn memory_bytes(&self) -> usize {
        self.data.len() * std::mem::size_of::<f32>()
    }
}

fn open_decoder<R: Read + Seek>(reader: R) -> Result<Decoder<R>> {
    let mut limits = Limits::default();
    limits.decoding_buffer_size = 1024 * 1024 * 1024; // 1 GB
    limits.intermediate_buffer_size = 1024 * 1024 * 1024; // 1 GB
    limits.ifd_value_size = 1024 * 1024 * 1024;
    Ok(Decoder::new(reader)?.with_limits(limits))
}

fn bytes_per_sample(color: ColorType) -> Result<u64> {
    match color {
        ColorType::Gray(bits) => Ok((bits as u64).div_ceil(8)),
        other => Err(TileError::UnsupportedDataType(format!("{:?}", other))),
    }
}

fn read_header<R: Read + Seek>(decoder: &mut Decoder<R>, fallback_epsg: u32) -> Result<RasterHeader> {
    let (width, height) = decoder.dimensions()?;
    let transform = read_geotransform(decoder)?;
    let epsg = read_epsg(decoder).unwrap_or(fallback_epsg);
    let nodata = decoder
        .get_tag_ascii_string(geo_tag(GDAL_NODATA))
        .ok()
        .and_then(|s| s.trim().trim_end_matches('\0').parse().ok());
    Ok(RasterHeader {
        width,
        height,
        transform,
        epsg,
        nodata,
    })
}

/// Read the affine transform from ModelTiepoint + ModelPixelScale, or from
/// ModelTransformation.
fn read_geotransform<R: Read + Seek>(decoder: &mut Decoder<R>) -> Result<GeoTransform> {
    let tiepoint = decoder.get_tag_f64_vec(geo_tag(MODEL_TIEPOINT));
    let pixel_scale = decoder.get_tag_f64_vec(geo_tag(MODEL_PIXEL_SCALE));

    if let (Ok(tiepoint), Ok(scale)) = (tiepoint, pixel_scale) {
        if tiepoint.len() >= 6 && scale.len() >= 2 {
            // Tiepoint format: [i, j, k, x, y, z]
            return Ok(GeoTransform {
                origin_x: tiepoint[3] - tiepoint[0] * scale[0],
                origin_y: tiepoint[4] + tiepoint[1] * scale[1],
                pixel_width: scale[0],
                pixel_height: scale[1],
            });
        }
    }

    if let Ok(m) = decoder.get_tag_f64_vec(geo_tag(MODEL_TRANSFORMATION)) {
        if m.len() >= 8 && m[1] == 0.0 && m[4] == 0.0 {
            return Ok(GeoTransform {
                origin_x: m[3],
                origin_y: m[7],
                pixel_width: m[0],
                pixel_height: -m[5],
            });
        }
    }

    Err(TileError::InvalidGeoTiff(
        "missing ModelTiepoint/ModelPixelScale or ModelTransformation".to_string(),
    ))
}

/// EPSG code from the GeoKey directory (projected CRS preferred).
fn read_epsg<R: Read + Seek>(decoder: &mut Decoder<R>) -> Option<u32> {
    let keys = decoder.get_tag_u32_vec(geo_tag(GEO_KEY_DIRECTORY)).ok()?;
    let count = *keys.get(3)? as usize;
    let mut geographic = None;
    for entry in keys.get(4..)?.chunks_exact(4).take(count) {
        let (id, location, value) = (entry[0], entry[1], entry[3]);
        if location != 0 || value == 0 || value == USER_DEFINED {
            continue;
        }
        match id {
            PROJECTED_CS_TYPE_KEY => return Some(value),
            GEOGRAPHIC_TYPE_KEY => geographic = Some(value),
            _ => {}
        }
    }
    geographic
}

/// Convert any sample type to f32.
fn decode_samples(result: DecodingResult) -> Vec<f32> {
    match result {
        DecodingResult::F32(data) => data,
        DecodingResult::F64(data) => data.into_iter().map(|v| v as f32).collect(),
        DecodingResult::I16(data) => data.into_iter().map(|v| v as f32).collect(),
        DecodingResult::I32(data) => data.into_iter().map(|v| v as f32).collect(),
        DecodingResult::U16(data) => data.into_iter().map(|v| v as f32).collect(),
        DecodingResult::U32(data) => data.into_iter().map(|v| v as f32).collect(),
        DecodingResult::U8(data) => data.into_iter().map(|v| v as f32).collect(),
        DecodingResult::I8(data) => data.into_iter().map(|v| v as f32).collect(),
        DecodingResult::U64(data) => data.into_iter().map(|v| v as f32).collect(),
        DecodingResult::I64(data) => data.into_iter().map(|v| v as f32).collect(),
    }
}
