//! In-process GeoTIFF fixtures.

#![allow(dead_code)]

use std::io::Cursor;
use tiff::encoder::{colortype, TiffEncoder, TiffValue};
use tiff::tags::Tag;

/// Grid placement and CRS of a fixture raster.
#[derive(Debug, Clone, Copy)]
pub struct GeoSpec {
    pub width: u32,
    pub height: u32,
    pub origin_x: f64,
    pub origin_y: f64,
    pub pixel_size: f64,
    pub epsg: u16,
}

impl GeoSpec {
    fn pixel_scale(&self) -> [f64; 3] {
        [self.pixel_size, self.pixel_size, 0.0]
    }

    fn tiepoint(&self) -> [f64; 6] {
        [0.0, 0.0, 0.0, self.origin_x, self.origin_y, 0.0]
    }

    fn geo_keys(&self) -> Vec<u16> {
        let geographic = self.epsg == 4326;
        vec![
            1, 1, 0, 3,
            1024, 0, 1, if geographic { 2 } else { 1 },
            1025, 0, 1, 1,
            if geographic { 2048 } else { 3072 }, 0, 1, self.epsg,
        ]
    }
}

fn stripped<C>(spec: &GeoSpec, data: &[C::Inner], rows_per_strip: u32, nodata: Option<&str>) -> Vec<u8>
where
    C: colortype::ColorType,
    [C::Inner]: TiffValue,
{
    assert_eq!(data.len(), (spec.width * spec.height) as usize);
    let mut buf = Cursor::new(Vec::new());
    {
        let mut encoder = TiffEncoder::new(&mut buf).unwrap();
        let mut image = encoder.new_image::<C>(spec.width, spec.height).unwrap();
        image.rows_per_strip(rows_per_strip).unwrap();
        let dir = image.encoder();
        dir.write_tag(Tag::from_u16_exhaustive(33550), &spec.pixel_scale()[..])
            .unwrap();
        dir.write_tag(Tag::from_u16_exhaustive(33922), &spec.tiepoint()[..])
            .unwrap();
        dir.write_tag(Tag::from_u16_exhaustive(34735), &spec.geo_keys()[..])
            .unwrap();
        if let Some(nodata) = nodata {
            dir.write_tag(Tag::from_u16_exhaustive(42113), nodata).unwrap();
        }
        image.write_data(data).unwrap();
    }
    buf.into_inner()
}

/// Stripped 16-bit GeoTIFF.
pub fn stripped_u16(spec: &GeoSpec, data: &[u16], rows_per_strip: u32) -> Vec<u8> {
    stripped::<colortype::Gray16>(spec, data, rows_per_strip, None)
}

/// Stripped 8-bit GeoTIFF with nodata 0, the WorldCover layout.
pub fn stripped_u8(spec: &GeoSpec, data: &[u8]) -> Vec<u8> {
    stripped::<colortype::Gray8>(spec, data, 64, Some("0"))
}

struct Entry {
    tag: u16,
    kind: u16,
    count: u32,
    data: Vec<u8>,
}

fn shorts(tag: u16, values: &[u16]) -> Entry {
    Entry {
        tag,
        kind: 3,
        count: values.len() as u32,
        data: values.iter().flat_map(|v| v.to_le_bytes()).collect(),
    }
}

fn longs(tag: u16, values: &[u32]) -> Entry {
    Entry {
        tag,
        kind: 4,
        count: values.len() as u32,
        data: values.iter().flat_map(|v| v.to_le_bytes()).collect(),
    }
}

fn doubles(tag: u16, values: &[f64]) -> Entry {
    Entry {
        tag,
        kind: 12,
        count: values.len() as u32,
        data: values.iter().flat_map(|v| v.to_le_bytes()).collect(),
    }
}

/// Uncompressed tiled 16-bit GeoTIFF, written byte by byte.
pub fn tiled_u16(spec: &GeoSpec, data: &[u16], tile: u32) -> Vec<u8> {
    assert_eq!(data.len(), (spec.width * spec.height) as usize);
    assert_eq!(tile % 16, 0);
    let across = spec.width.div_ceil(tile);
    let down = spec.height.div_ceil(tile);
    let tile_len = tile * tile * 2;

    let mut tiles = Vec::new();
    for ty in 0..down {
        for tx in 0..across {
            for y in 0..tile {
                for x in 0..tile {
                    let (col, row) = (tx * tile + x, ty * tile + y);
                    let v = if col < spec.width && row < spec.height {
                        data[(row * spec.width + col) as usize]
                    } else {
                        0
                    };
                    tiles.extend_from_slice(&v.to_le_bytes());
                }
            }
        }
    }
    let tile_count = (across * down) as usize;

    let mut entries = vec![
        longs(256, &[spec.width]),
        longs(257, &[spec.height]),
        shorts(258, &[16]),
        shorts(259, &[1]),
        shorts(262, &[1]),
        shorts(277, &[1]),
        longs(322, &[tile]),
        longs(323, &[tile]),
        longs(324, &vec![0; tile_count]),
        longs(325, &vec![tile_len; tile_count]),
        shorts(339, &[1]),
        doubles(33550, &spec.pixel_scale()),
        doubles(33922, &spec.tiepoint()),
        shorts(34735, &spec.geo_keys()),
    ];

    let ifd_len = 2 + 12 * entries.len() as u32 + 4;
    let external_len: u32 = entries
        .iter()
        .filter(|e| e.data.len() > 4)
        .map(|e| (e.data.len() as u32).next_multiple_of(2))
        .sum();
    let tiles_start = 8 + ifd_len + external_len;
    let offsets: Vec<u32> = (0..tile_count as u32)
        .map(|i| tiles_start + i * tile_len)
        .collect();
    entries[8] = longs(324, &offsets);

    let mut out = Vec::new();
    out.extend_from_slice(b"II");
    out.extend_from_slice(&42u16.to_le_bytes());
    out.extend_from_slice(&8u32.to_le_bytes());

    out.extend_from_slice(&(entries.len() as u16).to_le_bytes());
    let mut external = Vec::new();
    let mut next_external = 8 + ifd_len;
    for entry in &entries {
        out.extend_from_slice(&entry.tag.to_le_bytes());
        out.extend_from_slice(&entry.kind.to_le_bytes());
        out.extend_from_slice(&entry.count.to_le_bytes());
        if entry.data.len() <= 4 {
            let mut inline = entry.data.clone();
            inline.resize(4, 0);
            out.extend_from_slice(&inline);
        } else {
            out.extend_from_slice(&next_external.to_le_bytes());
            external.extend_from_slice(&entry.data);
            if entry.data.len() % 2 == 1 {
                external.push(0);
            }
            next_external += (entry.data.len() as u32).next_multiple_of(2);
        }
    }
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(&external);
    assert_eq!(out.len() as u32, tiles_start);
    out.extend_from_slice(&tiles);
    out
}

/// Constant-valued raster data.
pub fn filled<T: Copy>(spec: &GeoSpec, value: T) -> Vec<T> {
    vec![value; (spec.width * spec.height) as usize]
}
