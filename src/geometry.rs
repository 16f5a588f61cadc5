use geo::{Closest, ClosestPoint, Coord, Line, LineString, Point};

/// Earth radius used by the spherical Web Mercator projection (EPSG:3857)
pub const EARTH_RADIUS_M: f64 = 6_378_137.0;

/// Latitude limit of Web Mercator, beyond which `y` diverges
pub const MAX_MERCATOR_LAT: f64 = 85.051_128_779_806_59;

/// Approximate metres per degree at the equator, used for degree buffers
pub const METERS_PER_DEGREE: f64 = 111_000.0;

/// Project WGS84 degrees into Web Mercator metres.
pub fn project_to_metric(lon: f64, lat: f64) -> (f64, f64) {
    let lat = lat.clamp(-MAX_MERCATOR_LAT, MAX_MERCATOR_LAT);
    let x = EARTH_RADIUS_M * lon.to_radians();
    let y = EARTH_RADIUS_M * (std::f64::consts::FRAC_PI_4 + lat.to_radians() / 2.0).tan().ln();
    (x, y)
}

/// Inverse of [`project_to_metric`].
pub fn unproject_from_metric(x: f64, y: f64) -> (f64, f64) {
    let lon = (x / EARTH_RADIUS_M).to_degrees();
    let lat = (2.0 * (y / EARTH_RADIUS_M).exp().atan() - std::f64::consts::FRAC_PI_2).to_degrees();
    (lon, lat)
}

/// Planar distance in metres between two geographic points.
pub fn distance_meters(a: Point<f64>, b: Point<f64>) -> f64 {
    let (ax, ay) = project_to_metric(a.x(), a.y());
    let (bx, by) = project_to_metric(b.x(), b.y());
    (ax - bx).hypot(ay - by)
}

/// Closest point on a polyline together with its normalized arc-length position.
///
/// Arc length is measured in the coordinate space of the line itself (degrees), so the
/// fraction is stable with respect to [`interpolate_polyline`].
pub fn project_point_onto_polyline(
    line: &LineString<f64>,
    point: Point<f64>,
) -> Option<(Point<f64>, f64)> {
    let total = polyline_length(line);
    let mut best: Option<(Point<f64>, f64, f64)> = None; // (snapped, along, squared distance)
    let mut travelled = 0.0;

    for segment in line.lines() {
        let seg_len = line_length(&segment);
        let snapped = match segment.closest_point(&point) {
            Closest::SinglePoint(p) | Closest::Intersection(p) => p,
            // Zero-length pieces report Indeterminate, the start is as good as any
            Closest::Indeterminate => segment.start_point(),
        };
        let dist2 = (snapped.x() - point.x()).powi(2) + (snapped.y() - point.y()).powi(2);

        if best.is_none_or(|(_, _, d)| dist2 < d) {
            let along =
                travelled + (snapped.x() - segment.start.x).hypot(snapped.y() - segment.start.y);
            best = Some((snapped, along, dist2));
        }
        travelled += seg_len;
    }

    best.map(|(snapped, along, _)| {
        let fraction = if total > 0.0 { (along / total).clamp(0.0, 1.0) } else { 0.0 };
        (snapped, fraction)
    })
}

/// Point at a normalized arc-length position along a polyline.
pub fn interpolate_polyline(line: &LineString<f64>, fraction: f64) -> Option<Point<f64>> {
    let first = *line.0.first()?;
    let total = polyline_length(line);
    if total <= 0.0 {
        return Some(first.into());
    }

    let target = fraction.clamp(0.0, 1.0) * total;
    let mut travelled = 0.0;
    for segment in line.lines() {
        let seg_len = line_length(&segment);
        if seg_len > 0.0 && travelled + seg_len >= target {
            let t = (target - travelled) / seg_len;
            return Some(Point::new(
                segment.start.x + t * (segment.end.x - segment.start.x),
                segment.start.y + t * (segment.end.y - segment.start.y),
            ));
        }
        travelled += seg_len;
    }

    line.0.last().map(|c| Point::from(*c))
}

/// Direction of travel (degrees clockwise from north, `[0, 360)`) around a position
/// on the polyline, estimated from two points `offset` before and after it.
pub fn bearing_near(line: &LineString<f64>, fraction: f64, offset: f64) -> f64 {
    let before = interpolate_polyline(line, (fraction - offset).max(0.0));
    let after = interpolate_polyline(line, (fraction + offset).min(1.0));

    match (before, after) {
        (Some(p1), Some(p2)) => bearing_between(p1, p2),
        _ => 0.0,
    }
}

/// Compass bearing from `from` to `to`, measured on the metric-frame delta.
pub fn bearing_between(from: Point<f64>, to: Point<f64>) -> f64 {
    let (x1, y1) = project_to_metric(from.x(), from.y());
    let (x2, y2) = project_to_metric(to.x(), to.y());
    (x2 - x1).atan2(y2 - y1).to_degrees().rem_euclid(360.0)
}

/// Absolute angular difference folded into `[0, 180]`.
pub fn angle_difference(a: f64, b: f64) -> f64 {
    let diff = (a.rem_euclid(360.0) - b.rem_euclid(360.0)).abs();
    if diff > 180.0 { 360.0 - diff } else { diff }
}

/// Angular difference between two undirected lines, folded into `[0, 90]`.
pub fn axis_difference(a: f64, b: f64) -> f64 {
    let diff = (a - b).abs() % 180.0;
    if diff > 90.0 { 180.0 - diff } else { diff }
}

/// Round to a fixed number of decimal places.
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

/// Round a coordinate to 1e-6 degree.
pub fn round_coord(value: f64) -> f64 {
    round_to(value, 6)
}

/// Euclidean length of a polyline in its own coordinate space.
pub fn polyline_length(line: &LineString<f64>) -> f64 {
    line.lines().map(|l| line_length(&l)).sum()
}

/// Number of distinct vertices, ignoring consecutive repeats.
pub fn distinct_vertices(coords: &[Coord<f64>]) -> usize {
    let mut count = 0;
    let mut prev: Option<Coord<f64>> = None;
    for c in coords {
        if prev != Some(*c) {
            count += 1;
        }
        prev = Some(*c);
    }
    count
}

fn line_length(line: &Line<f64>) -> f64 {
    (line.end.x - line.start.x).hypot(line.end.y - line.start.y)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn north_line() -> LineString<f64> {
        LineString::from(vec![(0.0, 0.0), (0.0, 0.001)])
    }

    #[test]
    fn projection_round_trips_through_mercator() {
        let (x, y) = project_to_metric(4.3517, 50.8503);
        let (lon, lat) = unproject_from_metric(x, y);
        assert!((lon - 4.3517).abs() < 1e-9);
        assert!((lat - 50.8503).abs() < 1e-9);
    }

    #[test]
    fn origin_projects_to_origin() {
        let (x, y) = project_to_metric(0.0, 0.0);
        assert!(x.abs() < 1e-9 && y.abs() < 1e-9);
    }

    #[test]
    fn snaps_onto_segment_interior() {
        let (snapped, fraction) =
            project_point_onto_polyline(&north_line(), Point::new(0.0002, 0.0003)).unwrap();
        assert!(snapped.x().abs() < 1e-12);
        assert!((snapped.y() - 0.0003).abs() < 1e-12);
        assert!((fraction - 0.3).abs() < 1e-9);
    }

    #[test]
    fn snap_beyond_end_clamps_to_vertex() {
        let (snapped, fraction) =
            project_point_onto_polyline(&north_line(), Point::new(0.0, 0.005)).unwrap();
        assert_eq!(snapped, Point::new(0.0, 0.001));
        assert_eq!(fraction, 1.0);
    }

    #[test]
    fn interpolation_follows_multi_vertex_lines() {
        let line = LineString::from(vec![(0.0, 0.0), (1.0, 0.0), (1.0, 1.0)]);
        let mid = interpolate_polyline(&line, 0.5).unwrap();
        assert!((mid.x() - 1.0).abs() < 1e-12 && mid.y().abs() < 1e-12);
        let three_quarters = interpolate_polyline(&line, 0.75).unwrap();
        assert!((three_quarters.y() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn bearing_of_northbound_and_eastbound_lines() {
        assert!(bearing_near(&north_line(), 0.5, 0.01).abs() < 1e-6);
        let east = LineString::from(vec![(0.0, 0.0), (0.001, 0.0)]);
        assert!((bearing_near(&east, 0.0, 0.01) - 90.0).abs() < 1e-6);
        let south = LineString::from(vec![(0.0, 0.001), (0.0, 0.0)]);
        assert!((bearing_near(&south, 1.0, 0.01) - 180.0).abs() < 1e-6);
    }

    #[test]
    fn angle_differences_fold() {
        assert_eq!(angle_difference(350.0, 10.0), 20.0);
        assert_eq!(angle_difference(0.0, 180.0), 180.0);
        assert_eq!(axis_difference(0.0, 180.0), 0.0);
        assert_eq!(axis_difference(10.0, 100.0), 90.0);
        assert_eq!(axis_difference(350.0, 10.0), 20.0);
    }

    #[test]
    fn rounding_is_idempotent() {
        let d = round_to(22.263_891, 2);
        assert_eq!(d, round_to(d, 2));
        let c = round_coord(4.123_456_789);
        assert_eq!(c, round_coord(c));
    }

    #[test]
    fn counts_distinct_vertices() {
        let coords = vec![
            Coord { x: 0.0, y: 0.0 },
            Coord { x: 0.0, y: 0.0 },
            Coord { x: 1.0, y: 0.0 },
        ];
        assert_eq!(distinct_vertices(&coords), 2);
    }
}
