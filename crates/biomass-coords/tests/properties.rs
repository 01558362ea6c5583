//! Property checks over seeded random boxes.

use biomass_common::Bounds;
use biomass_coords::CoordinateTransformer;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

fn random_box(rng: &mut ChaCha8Rng) -> Bounds {
    let x = rng.gen_range(-180.0..179.0);
    let y = rng.gen_range(-80.0..79.0);
    let w = rng.gen_range(0.0..2.0);
    let h = rng.gen_range(0.0..2.0);
    Bounds::new(x, y, x + w, y + h)
}

#[test]
fn bounds_intersection_is_symmetric() {
    let t = CoordinateTransformer::new();
    let mut rng = ChaCha8Rng::seed_from_u64(7);
    for _ in 0..5_000 {
        let a = random_box(&mut rng);
        let b = random_box(&mut rng);
        assert_eq!(t.bounds_intersect(&a, &b), t.bounds_intersect(&b, &a));
        assert!(t.bounds_intersect(&a, &a));
    }
}

#[test]
fn separated_boxes_never_intersect() {
    let t = CoordinateTransformer::new();
    let mut rng = ChaCha8Rng::seed_from_u64(11);
    for _ in 0..2_000 {
        let a = random_box(&mut rng);
        let gap = rng.gen_range(1e-9..1.0);
        let right = Bounds::new(a.max_x + gap, a.min_y, a.max_x + gap + 1.0, a.max_y);
        let above = Bounds::new(a.min_x, a.max_y + gap, a.max_x, a.max_y + gap + 1.0);
        assert!(!t.bounds_intersect(&a, &right));
        assert!(!t.bounds_intersect(&above, &a));
    }
}

#[test]
fn worldcover_cells_cover_box_once() {
    let t = CoordinateTransformer::new();
    let mut rng = ChaCha8Rng::seed_from_u64(3);
    for _ in 0..500 {
        let b = random_box(&mut rng);
        let names = t.worldcover_tiles_for_bounds(&b);
        assert!(!names.is_empty());
        let mut deduped = names.clone();
        deduped.sort();
        deduped.dedup();
        assert_eq!(deduped.len(), names.len(), "duplicate cells for {:?}", b);
        // A box at most 2° wide spans at most 2 cells per axis.
        assert!(names.len() <= 4);
    }
}

#[test]
fn utm_round_trip_over_conus() {
    let t = CoordinateTransformer::new();
    let mut rng = ChaCha8Rng::seed_from_u64(42);
    for _ in 0..200 {
        let lon = rng.gen_range(-124.0..-67.0);
        let lat = rng.gen_range(25.0..49.0);
        let epsg = biomass_coords::utm_epsg_for(lon, lat);
        let (e, n) = t.to_utm(lon, lat, epsg).unwrap();
        let (lon2, lat2) = t.from_utm(e, n, epsg).unwrap();
        assert!((lon - lon2).abs() < 1e-6 && (lat - lat2).abs() < 1e-6);
    }
}
