use serde::Serialize;

pub const EARTH_RADIUS_KM: f64 = 6371.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }
}

/// Great-circle distance in kilometres.
pub fn haversine_km(from: GeoPoint, to: GeoPoint) -> f64 {
    let d_lat = (to.lat - from.lat).to_radians();
    let d_lon = (to.lon - from.lon).to_radians();
    let a = (d_lat / 2.0).sin().powi(2)
        + from.lat.to_radians().cos() * to.lat.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * a.sqrt().atan2((1.0 - a).sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_point_is_zero() {
        let point = GeoPoint::new(37.5, 127.0);

        assert!(haversine_km(point, point).abs() < 1e-9);
    }

    #[test]
    fn seoul_to_busan_is_about_325_km() {
        let seoul = GeoPoint::new(37.5665, 126.9780);
        let busan = GeoPoint::new(35.1796, 129.0756);

        let distance = haversine_km(seoul, busan);

        assert!((distance - 325.0).abs() < 5.0, "distance was {distance}");
    }

    #[test]
    fn distance_is_symmetric() {
        let a = GeoPoint::new(37.55, 126.92);
        let b = GeoPoint::new(37.56, 126.94);

        assert!((haversine_km(a, b) - haversine_km(b, a)).abs() < 1e-12);
    }
}
