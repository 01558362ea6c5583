//! Well-Known Binary codec for polygonal geometry.
//!
//! Only Polygon (type 3) and MultiPolygon (type 6) are understood, in either
//! byte order. Z/M variants and EWKB SRID prefixes are rejected.

use crate::{GeometryError, Result};
use geo::{Coord, LineString, MultiPolygon, Polygon};

const WKB_BE: u8 = 0;
const WKB_LE: u8 = 1;
const WKB_POLYGON: u32 = 3;
const WKB_MULTIPOLYGON: u32 = 6;

struct WkbReader<'a> {
    buf: &'a [u8],
    pos: usize,
    little_endian: bool,
}

impl<'a> WkbReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self {
            buf,
            pos: 0,
            little_endian: true,
        }
    }

    fn take<const N: usize>(&mut self) -> Result<[u8; N]> {
        let end = self.pos + N;
        let slice = self
            .buf
            .get(self.pos..end)
            .ok_or(GeometryError::Truncated { offset: self.pos })?;
        let mut out = [0u8; N];
        out.copy_from_slice(slice);
        self.pos = end;
        Ok(out)
    }

    fn byte_order(&mut self) -> Result<()> {
        let [marker] = self.take::<1>()?;
        self.little_endian = match marker {
            WKB_LE => true,
            WKB_BE => false,
            other => return Err(GeometryError::InvalidByteOrder(other)),
        };
        Ok(())
    }

    fn u32(&mut self) -> Result<u32> {
        let bytes = self.take::<4>()?;
        Ok(if self.little_endian {
            u32::from_le_bytes(bytes)
        } else {
            u32::from_be_bytes(bytes)
        })
    }

    fn f64(&mut self) -> Result<f64> {
        let bytes = self.take::<8>()?;
        Ok(if self.little_endian {
            f64::from_le_bytes(bytes)
        } else {
            f64::from_be_bytes(bytes)
        })
    }

    fn ring(&mut self) -> Result<LineString<f64>> {
        let n = self.u32()? as usize;
        // Each point needs 16 bytes; refuse counts the buffer cannot hold.
        if n.saturating_mul(16) > self.buf.len().saturating_sub(self.pos) {
            return Err(GeometryError::Truncated { offset: self.pos });
        }
        let mut coords = Vec::with_capacity(n);
        for _ in 0..n {
            let x = self.f64()?;
            let y = self.f64()?;
            coords.push(Coord { x, y });
        }
        Ok(LineString::new(coords))
    }

    fn polygon_body(&mut self) -> Result<Polygon<f64>> {
        let num_rings = self.u32()?;
        if num_rings == 0 {
            return Err(GeometryError::NoRings);
        }
        let exterior = self.ring()?;
        let mut interiors = Vec::with_capacity(num_rings as usize - 1);
        for _ in 1..num_rings {
            interiors.push(self.ring()?);
        }
        Ok(Polygon::new(exterior, interiors))
    }

    fn geometry(&mut self) -> Result<MultiPolygon<f64>> {
        self.byte_order()?;
        match self.u32()? {
            WKB_POLYGON => Ok(MultiPolygon::new(vec![self.polygon_body()?])),
            WKB_MULTIPOLYGON => {
                let count = self.u32()?;
                let mut polygons = Vec::new();
                for _ in 0..count {
                    self.byte_order()?;
                    let kind = self.u32()?;
                    if kind != WKB_POLYGON {
                        return Err(GeometryError::UnsupportedType(kind));
                    }
                    polygons.push(self.polygon_body()?);
                }
                Ok(MultiPolygon::new(polygons))
            }
            other => Err(GeometryError::UnsupportedType(other)),
        }
    }
}

/// Decode a Polygon or MultiPolygon from WKB. Polygons are promoted to a
/// single-member MultiPolygon.
pub fn read_multipolygon(bytes: &[u8]) -> Result<MultiPolygon<f64>> {
    WkbReader::new(bytes).geometry()
}

fn write_ring(out: &mut Vec<u8>, ring: &LineString<f64>) {
    out.extend_from_slice(&(ring.0.len() as u32).to_le_bytes());
    for c in &ring.0 {
        out.extend_from_slice(&c.x.to_le_bytes());
        out.extend_from_slice(&c.y.to_le_bytes());
    }
}

fn write_polygon(out: &mut Vec<u8>, polygon: &Polygon<f64>) {
    out.push(WKB_LE);
    out.extend_from_slice(&WKB_POLYGON.to_le_bytes());
    out.extend_from_slice(&(1 + polygon.interiors().len() as u32).to_le_bytes());
    write_ring(out, polygon.exterior());
    for ring in polygon.interiors() {
        write_ring(out, ring);
    }
}

/// Encode as little-endian WKB. A single polygon is written as type 3,
/// anything else as type 6.
pub fn write_multipolygon(geometry: &MultiPolygon<f64>) -> Vec<u8> {
    let mut out = Vec::new();
    if geometry.0.len() == 1 {
        write_polygon(&mut out, &geometry.0[0]);
        return out;
    }
    out.push(WKB_LE);
    out.extend_from_slice(&WKB_MULTIPOLYGON.to_le_bytes());
    out.extend_from_slice(&(geometry.0.len() as u32).to_le_bytes());
    for polygon in &geometry.0 {
        write_polygon(&mut out, polygon);
    }
    out
}
