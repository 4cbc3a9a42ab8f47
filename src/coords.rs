//! Datum conversion between the public WGS-84 coordinates and vendor datums
//!
//! Leaflet, Mapbox and Google take WGS-84 directly. Amap expects GCJ-02
//! (the obfuscated Chinese national datum) and Baidu expects BD-09, which is
//! a further offset applied on top of GCJ-02. The forward transforms are the
//! published closed forms; the inverses are solved by fixed-point iteration so
//! that round trips stay far inside 1e-5 degrees.

use crate::core::constants::{DATUM_INVERSION_EPSILON, DATUM_INVERSION_MAX_ITERATIONS};
use crate::core::geo::LatLng;
use crate::provider::ProviderKind;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Krasovsky 1940 ellipsoid, used by GCJ-02
const KRASOVSKY_A: f64 = 6378245.0;
const KRASOVSKY_EE: f64 = 0.006_693_421_622_965_943;

const BD_X_PI: f64 = PI * 3000.0 / 180.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CoordinateSystem {
    Wgs84,
    Gcj02,
    Bd09,
}

impl CoordinateSystem {
    /// Native datum of a provider
    pub fn of(provider: ProviderKind) -> Self {
        match provider {
            ProviderKind::Leaflet | ProviderKind::Mapbox | ProviderKind::Google => Self::Wgs84,
            ProviderKind::Amap => Self::Gcj02,
            ProviderKind::Baidu => Self::Bd09,
        }
    }

    pub fn is_identity(self) -> bool {
        matches!(self, Self::Wgs84)
    }
}

/// Converts a provider-native coordinate to WGS-84.
pub fn to_wgs84(provider: ProviderKind, point: LatLng) -> LatLng {
    match CoordinateSystem::of(provider) {
        CoordinateSystem::Wgs84 => point,
        CoordinateSystem::Gcj02 => gcj02_to_wgs84(point),
        CoordinateSystem::Bd09 => gcj02_to_wgs84(bd09_to_gcj02(point)),
    }
}

/// Converts a WGS-84 coordinate to the provider's native datum.
pub fn from_wgs84(provider: ProviderKind, point: LatLng) -> LatLng {
    match CoordinateSystem::of(provider) {
        CoordinateSystem::Wgs84 => point,
        CoordinateSystem::Gcj02 => wgs84_to_gcj02(point),
        CoordinateSystem::Bd09 => gcj02_to_bd09(wgs84_to_gcj02(point)),
    }
}

/// GCJ-02 is only defined inside this rough mainland bounding box; outside
/// it the datum coincides with WGS-84.
pub fn out_of_china(point: LatLng) -> bool {
    !(72.004..=137.8347).contains(&point.lng) || !(0.8293..=55.8271).contains(&point.lat)
}

pub fn wgs84_to_gcj02(point: LatLng) -> LatLng {
    if out_of_china(point) {
        return point;
    }

    let d_lat = transform_lat(point.lng - 105.0, point.lat - 35.0);
    let d_lng = transform_lng(point.lng - 105.0, point.lat - 35.0);
    let rad_lat = point.lat.to_radians();
    let magic = 1.0 - KRASOVSKY_EE * rad_lat.sin().powi(2);
    let sqrt_magic = magic.sqrt();

    let d_lat = (d_lat * 180.0) / ((KRASOVSKY_A * (1.0 - KRASOVSKY_EE)) / (magic * sqrt_magic) * PI);
    let d_lng = (d_lng * 180.0) / (KRASOVSKY_A / sqrt_magic * rad_lat.cos() * PI);

    LatLng::new(point.lat + d_lat, point.lng + d_lng)
}

pub fn gcj02_to_wgs84(point: LatLng) -> LatLng {
    if out_of_china(point) {
        return point;
    }
    invert(point, wgs84_to_gcj02)
}

pub fn gcj02_to_bd09(point: LatLng) -> LatLng {
    let x = point.lng;
    let y = point.lat;
    let z = (x * x + y * y).sqrt() + 0.00002 * (y * BD_X_PI).sin();
    let theta = y.atan2(x) + 0.000003 * (x * BD_X_PI).cos();

    LatLng::new(z * theta.sin() + 0.006, z * theta.cos() + 0.0065)
}

pub fn bd09_to_gcj02(point: LatLng) -> LatLng {
    invert(point, gcj02_to_bd09)
}

/// Solves `forward(x) == target` for x. The datum offsets are small and
/// smooth, so `x += target - forward(x)` converges in a handful of steps.
fn invert<F>(target: LatLng, forward: F) -> LatLng
where
    F: Fn(LatLng) -> LatLng,
{
    let mut guess = target;
    for _ in 0..DATUM_INVERSION_MAX_ITERATIONS {
        let projected = forward(guess);
        let d_lat = target.lat - projected.lat;
        let d_lng = target.lng - projected.lng;
        guess = LatLng::new(guess.lat + d_lat, guess.lng + d_lng);
        if d_lat.abs() < DATUM_INVERSION_EPSILON && d_lng.abs() < DATUM_INVERSION_EPSILON {
            break;
        }
    }
    guess
}

fn transform_lat(x: f64, y: f64) -> f64 {
    let mut ret = -100.0 + 2.0 * x + 3.0 * y + 0.2 * y * y + 0.1 * x * y + 0.2 * x.abs().sqrt();
    ret += (20.0 * (6.0 * x * PI).sin() + 20.0 * (2.0 * x * PI).sin()) * 2.0 / 3.0;
    ret += (20.0 * (y * PI).sin() + 40.0 * (y / 3.0 * PI).sin()) * 2.0 / 3.0;
    ret += (160.0 * (y / 12.0 * PI).sin() + 320.0 * (y * PI / 30.0).sin()) * 2.0 / 3.0;
    ret
}

fn transform_lng(x: f64, y: f64) -> f64 {
    let mut ret = 300.0 + x + 2.0 * y + 0.1 * x * x + 0.1 * x * y + 0.1 * x.abs().sqrt();
    ret += (20.0 * (6.0 * x * PI).sin() + 20.0 * (2.0 * x * PI).sin()) * 2.0 / 3.0;
    ret += (20.0 * (x * PI).sin() + 40.0 * (x / 3.0 * PI).sin()) * 2.0 / 3.0;
    ret += (150.0 * (x / 12.0 * PI).sin() + 300.0 * (x / 30.0 * PI).sin()) * 2.0 / 3.0;
    ret
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    const TOLERANCE: f64 = 1e-5;

    fn random_point(rng: &mut StdRng) -> LatLng {
        LatLng::new(rng.random_range(-89.0..=89.0), rng.random_range(-179.0..=179.0))
    }

    // GCJ-02 is discontinuous at the edge of the mainland box, so points within
    // one offset-width of it have no exact inverse.
    fn near_china_edge(p: LatLng) -> bool {
        let band = 0.02;
        let near = |v: f64, edge: f64| (v - edge).abs() < band;
        let in_lat = (0.8293 - band..=55.8271 + band).contains(&p.lat);
        let in_lng = (72.004 - band..=137.8347 + band).contains(&p.lng);
        (in_lat && (near(p.lng, 72.004) || near(p.lng, 137.8347)))
            || (in_lng && (near(p.lat, 0.8293) || near(p.lat, 55.8271)))
    }

    #[test]
    fn test_identity_providers_are_exact() {
        let mut rng = StdRng::seed_from_u64(7);
        for provider in [ProviderKind::Leaflet, ProviderKind::Mapbox, ProviderKind::Google] {
            for _ in 0..100 {
                let p = random_point(&mut rng);
                assert_eq!(from_wgs84(provider, to_wgs84(provider, p)), p);
                assert_eq!(to_wgs84(provider, p), p);
            }
        }
    }

    #[test]
    fn test_baidu_round_trip_within_tolerance() {
        let mut rng = StdRng::seed_from_u64(42);
        let mut checked = 0;
        while checked < 1000 {
            let p = random_point(&mut rng);
            if near_china_edge(p) {
                continue;
            }
            checked += 1;
            let back = from_wgs84(ProviderKind::Baidu, to_wgs84(ProviderKind::Baidu, p));
            assert!(back.max_delta(&p) < TOLERANCE, "{:?} came back as {:?}", p, back);
        }
    }

    #[test]
    fn test_baidu_round_trip_inside_china() {
        let mut rng = StdRng::seed_from_u64(1234);
        for _ in 0..1000 {
            let p = LatLng::new(rng.random_range(18.0..=50.0), rng.random_range(80.0..=130.0));
            let back = from_wgs84(ProviderKind::Baidu, to_wgs84(ProviderKind::Baidu, p));
            assert!(back.max_delta(&p) < TOLERANCE);

            let forward = to_wgs84(ProviderKind::Baidu, from_wgs84(ProviderKind::Baidu, p));
            assert!(forward.max_delta(&p) < TOLERANCE);
        }
    }

    #[test]
    fn test_amap_round_trip_inside_china() {
        let mut rng = StdRng::seed_from_u64(99);
        for _ in 0..500 {
            let p = LatLng::new(rng.random_range(18.0..=50.0), rng.random_range(80.0..=130.0));
            let back = to_wgs84(ProviderKind::Amap, from_wgs84(ProviderKind::Amap, p));
            assert!(back.max_delta(&p) < TOLERANCE);
        }
    }

    #[test]
    fn test_known_beijing_offsets() {
        // Tiananmen, WGS-84
        let wgs = LatLng::new(39.908_722, 116.397_499);
        let gcj = wgs84_to_gcj02(wgs);
        let bd = gcj02_to_bd09(gcj);

        // GCJ-02 shifts Beijing a few hundred meters; BD-09 adds roughly another kilometer
        let gcj_shift = wgs.distance_to(&gcj);
        let bd_shift = wgs.distance_to(&bd);
        assert!(gcj_shift > 100.0 && gcj_shift < 1000.0, "gcj shift {}", gcj_shift);
        assert!(bd_shift > gcj_shift && bd_shift < 2000.0, "bd shift {}", bd_shift);
    }

    #[test]
    fn test_gcj_is_identity_outside_china() {
        let paris = LatLng::new(48.8566, 2.3522);
        assert_eq!(wgs84_to_gcj02(paris), paris);
        assert_eq!(gcj02_to_wgs84(paris), paris);
        assert_eq!(to_wgs84(ProviderKind::Amap, paris), paris);
    }

    #[test]
    fn test_native_datums() {
        assert!(CoordinateSystem::of(ProviderKind::Google).is_identity());
        assert_eq!(CoordinateSystem::of(ProviderKind::Baidu), CoordinateSystem::Bd09);
        assert_eq!(CoordinateSystem::of(ProviderKind::Amap), CoordinateSystem::Gcj02);
    }
}
