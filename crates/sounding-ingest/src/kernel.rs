//! Geodetic and thermodynamic conversions.
//!
//! Pure functions with no state. Angles are in degrees and linear units in
//! meters. The geopotential conversion uses a spherical Earth with constant
//! surface gravity, which is accurate enough for plotting ascents.

/// Mean Earth radius (m).
pub const EARTH_AVG_RADIUS: f64 = 6_371_008.7714;

/// Standard surface gravity (m/s²).
pub const EARTH_GRAVITY: f64 = 9.80665;

/// Meters per degree of latitude.
pub const METERS_PER_DEGREE: f64 = 111_320.0;

/// Specific gas constant for dry air (J/(kg·K)).
pub const DRY_AIR_GAS_CONSTANT: f64 = 287.05;

/// Convert geopotential height to geometric height.
pub fn geopotential_to_height(gph: f64) -> f64 {
    gph * EARTH_GRAVITY / (EARTH_GRAVITY - gph * EARTH_GRAVITY / EARTH_AVG_RADIUS)
}

/// Convert geometric height to geopotential height.
pub fn height_to_geopotential(height: f64) -> f64 {
    height * EARTH_AVG_RADIUS / (EARTH_AVG_RADIUS + height)
}

/// Height of pressure level `p` given a reference level `(h0, t0, p0)`.
///
/// Isothermal barometric relation at the reference temperature `t0` (K).
/// Pressures may be in any unit as long as `p0` and `p` agree.
pub fn barometric_height(h0: f64, t0: f64, p0: f64, p: f64) -> f64 {
    h0 + DRY_AIR_GAS_CONSTANT * t0 / EARTH_GRAVITY * (p0 / p).ln()
}

/// Pressure `dh` meters above a reference level `(p0, t0)`.
///
/// Inverse of [`barometric_height`].
pub fn barometric_pressure(p0: f64, t0: f64, dh: f64) -> f64 {
    p0 * (-EARTH_GRAVITY * dh / (DRY_AIR_GAS_CONSTANT * t0)).exp()
}

/// Decompose wind speed and "from" direction into u/v components.
///
/// Returns `None` if either input is missing.
pub fn wind_to_uv(speed: Option<f64>, direction: Option<f64>) -> Option<(f64, f64)> {
    let (speed, direction) = (speed?, direction?);
    if !speed.is_finite() || !direction.is_finite() {
        return None;
    }
    let rad = direction.to_radians();
    Some((-speed * rad.sin(), -speed * rad.cos()))
}

/// Move a coordinate by a wind vector `(u, v)` applied for `dt` seconds.
///
/// Returns the new `(lat, lon)`.
pub fn displace_lat_lon(lat: f64, lon: f64, u: f64, v: f64, dt: f64) -> (f64, f64) {
    let d_lat = v * dt / METERS_PER_DEGREE;
    let mid_lat = (lat + d_lat / 2.0).to_radians();
    let d_lon = u * dt / (mid_lat.cos() * METERS_PER_DEGREE);
    (lat + d_lat, normalize_lon(lon + d_lon))
}

/// Approximate horizontal distance (m) of a small `(d_lat, d_lon)` offset at `lat`.
pub fn offset_distance(lat: f64, d_lat: f64, d_lon: f64) -> f64 {
    let dy = d_lat * METERS_PER_DEGREE;
    let dx = d_lon * METERS_PER_DEGREE * lat.to_radians().cos();
    dx.hypot(dy)
}

/// Seconds into the flight at `height` for a balloon released at `h0`.
pub fn height_to_time_offset(h0: f64, height: f64, ascent_rate: f64) -> f64 {
    (height - h0) / ascent_rate
}

/// Wrap a longitude into [-180, 180].
pub fn normalize_lon(lon: f64) -> f64 {
    if (-180.0..=180.0).contains(&lon) {
        return lon;
    }
    let wrapped = (lon + 180.0).rem_euclid(360.0) - 180.0;
    if wrapped == -180.0 && lon > 0.0 {
        180.0
    } else {
        wrapped
    }
}

/// Round to a fixed number of decimals.
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_utils::assert_approx_eq;

    #[test]
    fn test_geopotential_round_trip() {
        let mut h = 0.0;
        while h <= 40_000.0 {
            let back = height_to_geopotential(geopotential_to_height(h));
            assert_approx_eq!(back, h, 1e-6);
            h += 250.0;
        }
    }

    #[test]
    fn test_geopotential_height_is_higher() {
        // geometric height exceeds geopotential height aloft
        let h = geopotential_to_height(10_000.0);
        assert!(h > 10_000.0);
        assert_approx_eq!(h, 10_015.7, 0.1);
        assert_eq!(geopotential_to_height(0.0), 0.0);
    }

    #[test]
    fn test_barometric_round_trip() {
        let (h0, t0, p0) = (200.0, 288.15, 1000.0);
        let h = barometric_height(h0, t0, p0, 850.0);
        assert!(h > h0);
        let p = barometric_pressure(p0, t0, h - h0);
        assert_approx_eq!(p, 850.0, 1e-9);
        assert_approx_eq!(barometric_height(h0, t0, p0, p0), h0, 1e-12);
    }

    #[test]
    fn test_barometric_scale_height() {
        // one scale height up, pressure drops by e
        let t0 = 250.0;
        let scale = DRY_AIR_GAS_CONSTANT * t0 / EARTH_GRAVITY;
        let p = barometric_pressure(1000.0, t0, scale);
        assert_approx_eq!(p, 1000.0 / std::f64::consts::E, 1e-9);
    }

    #[test]
    fn test_wind_to_uv() {
        // wind from the north blows southward
        let (u, v) = wind_to_uv(Some(10.0), Some(0.0)).unwrap();
        assert_approx_eq!(u, 0.0, 1e-12);
        assert_approx_eq!(v, -10.0, 1e-12);

        // wind from the west blows eastward
        let (u, v) = wind_to_uv(Some(5.0), Some(270.0)).unwrap();
        assert_approx_eq!(u, 5.0, 1e-12);
        assert_approx_eq!(v, 0.0, 1e-9);
    }

    #[test]
    fn test_wind_to_uv_missing() {
        assert!(wind_to_uv(None, Some(90.0)).is_none());
        assert!(wind_to_uv(Some(3.0), None).is_none());
        assert!(wind_to_uv(Some(f64::NAN), Some(90.0)).is_none());
    }

    #[test]
    fn test_displace_lat_lon() {
        // one degree of latitude northward
        let (lat, lon) = displace_lat_lon(48.0, 16.0, 0.0, METERS_PER_DEGREE, 1.0);
        assert_approx_eq!(lat, 49.0, 1e-12);
        assert_approx_eq!(lon, 16.0, 1e-12);

        // eastward at the equator
        let (lat, lon) = displace_lat_lon(0.0, 0.0, 10.0, 0.0, METERS_PER_DEGREE / 10.0);
        assert_approx_eq!(lat, 0.0, 1e-12);
        assert_approx_eq!(lon, 1.0, 1e-9);

        // eastward displacement grows with latitude
        let (_, lon) = displace_lat_lon(60.0, 0.0, 10.0, 0.0, METERS_PER_DEGREE / 10.0);
        assert_approx_eq!(lon, 2.0, 1e-6);
    }

    #[test]
    fn test_offset_distance() {
        assert_approx_eq!(offset_distance(0.0, 1.0, 0.0), METERS_PER_DEGREE, 1e-6);
        assert_approx_eq!(offset_distance(60.0, 0.0, 1.0), METERS_PER_DEGREE / 2.0, 1e-6);
    }

    #[test]
    fn test_height_to_time_offset() {
        assert_approx_eq!(height_to_time_offset(100.0, 730.0, 6.3), 100.0, 1e-9);
        assert_eq!(height_to_time_offset(100.0, 100.0, 6.3), 0.0);
    }

    #[test]
    fn test_normalize_lon() {
        assert_eq!(normalize_lon(10.0), 10.0);
        assert_eq!(normalize_lon(180.0), 180.0);
        assert_approx_eq!(normalize_lon(181.0), -179.0, 1e-12);
        assert_approx_eq!(normalize_lon(-181.0), 179.0, 1e-12);
        assert_approx_eq!(normalize_lon(540.0), 180.0, 1e-12);
    }

    #[test]
    fn test_round_to() {
        assert_eq!(round_to(1.23456789, 6), 1.234568);
        assert_eq!(round_to(12.345, 1), 12.3);
        assert_eq!(round_to(-2.346, 2), -2.35);
    }
}
