//! Geometry SQL functions registered on every pooled connection.
//!
//! Geometries are stored as WKB blobs in WGS84 degrees. Areas use the same
//! equirectangular scaling as [`ParcelGeometry::area_m2`].

use biomass_common::ParcelGeometry;
use rusqlite::functions::{Context, FunctionFlags};
use rusqlite::Connection;

fn flags() -> FunctionFlags {
    FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC
}

/// Decode argument `idx`. NULL and undecodable blobs both yield `None`.
fn geometry_arg(ctx: &Context<'_>, idx: usize) -> rusqlite::Result<Option<ParcelGeometry>> {
    let blob: Option<Vec<u8>> = ctx.get(idx)?;
    Ok(blob.and_then(|bytes| ParcelGeometry::from_wkb(&bytes).ok()))
}

/// Register `geom_area_m2(geom)` and `geom_intersection_area_m2(a, b)`.
///
/// Both return NULL when a geometry is NULL or not polygon WKB, so a bad
/// row never aborts the enclosing query.
pub fn register(conn: &Connection) -> rusqlite::Result<()> {
    conn.create_scalar_function("geom_area_m2", 1, flags(), |ctx| {
        Ok(geometry_arg(ctx, 0)?.map(|g| g.area_m2()))
    })?;
    conn.create_scalar_function("geom_intersection_area_m2", 2, flags(), |ctx| {
        let a = geometry_arg(ctx, 0)?;
        let b = geometry_arg(ctx, 1)?;
        Ok(match (a, b) {
            (Some(a), Some(b)) => Some(a.intersection_area_m2(&b)),
            _ => None,
        })
    })?;
    Ok(())
}
