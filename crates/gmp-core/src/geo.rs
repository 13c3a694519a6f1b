//! Great-circle helpers used for directional scoring and light path sampling.

use crate::CoordKey;

pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Initial bearing from point 1 to point 2 in degrees, 0-360 clockwise from north.
pub fn bearing(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let (phi1, phi2) = (lat1.to_radians(), lat2.to_radians());
    let d_lambda = (lon2 - lon1).to_radians();
    let x = d_lambda.sin() * phi2.cos();
    let y = phi1.cos() * phi2.sin() - phi1.sin() * phi2.cos() * d_lambda.cos();
    (x.atan2(y).to_degrees() + 360.0) % 360.0
}

pub fn distance_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let (phi1, phi2) = (lat1.to_radians(), lat2.to_radians());
    let d_phi = (lat2 - lat1).to_radians();
    let d_lambda = (lon2 - lon1).to_radians();
    let a = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * a.sqrt().atan2((1.0 - a).sqrt())
}

/// Point reached travelling `distance_km` from the origin along `bearing_deg`.
pub fn destination(lat: f64, lon: f64, bearing_deg: f64, distance_km: f64) -> (f64, f64) {
    let delta = distance_km / EARTH_RADIUS_KM;
    let theta = bearing_deg.to_radians();
    let phi1 = lat.to_radians();
    let lambda1 = lon.to_radians();
    let phi2 = (phi1.sin() * delta.cos() + phi1.cos() * delta.sin() * theta.cos()).asin();
    let lambda2 = lambda1
        + (theta.sin() * delta.sin() * phi1.cos()).atan2(delta.cos() - phi1.sin() * phi2.sin());
    let lon2 = (lambda2.to_degrees() + 540.0) % 360.0 - 180.0;
    (phi2.to_degrees(), lon2)
}

/// Sample points every `interval_km` along `azimuth`, starting one interval out.
pub fn light_path_points(
    lat: f64,
    lon: f64,
    azimuth: f64,
    count: usize,
    interval_km: f64,
) -> Vec<CoordKey> {
    (1..=count)
        .map(|i| {
            let (plat, plon) = destination(lat, lon, azimuth, interval_km * i as f64);
            CoordKey::new(plat, plon)
        })
        .collect()
}

/// True when `bearing` lies within +-90 degrees of the point opposite `azimuth`.
pub fn is_opposite_direction(bearing: f64, azimuth: f64) -> bool {
    let opposite = (azimuth + 180.0) % 360.0;
    let mut diff = (bearing - opposite).abs() % 360.0;
    if diff > 180.0 {
        diff = 360.0 - diff;
    }
    diff < 90.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bearing_cardinal_directions() {
        assert!((bearing(0.0, 0.0, 1.0, 0.0) - 0.0).abs() < 1e-6);
        assert!((bearing(0.0, 0.0, 0.0, 1.0) - 90.0).abs() < 1e-6);
        assert!((bearing(0.0, 0.0, -1.0, 0.0) - 180.0).abs() < 1e-6);
        assert!((bearing(0.0, 0.0, 0.0, -1.0) - 270.0).abs() < 1e-6);
    }

    #[test]
    fn destination_matches_distance() {
        let (lat, lon) = destination(29.75, 102.35, 115.0, 50.0);
        assert!((distance_km(29.75, 102.35, lat, lon) - 50.0).abs() < 0.01);
        assert!((bearing(29.75, 102.35, lat, lon) - 115.0).abs() < 0.5);
    }

    #[test]
    fn light_path_points_are_rounded_and_ordered() {
        let points = light_path_points(29.75, 102.35, 90.0, 10, 10.0);
        assert_eq!(points.len(), 10);
        assert!(points.windows(2).all(|w| w[0].lon() < w[1].lon()));
        assert_eq!(points[0], CoordKey::new(points[0].lat(), points[0].lon()));
    }

    #[test]
    fn opposite_cone_is_open_at_ninety_degrees() {
        // sunrise in the east lights peaks to the west
        assert!(is_opposite_direction(250.0, 110.0));
        assert!(is_opposite_direction(210.0, 110.0));
        assert!(!is_opposite_direction(110.0, 110.0));
        assert!(!is_opposite_direction(200.0, 290.0));
        assert!(is_opposite_direction(10.0, 170.0));
    }
}
