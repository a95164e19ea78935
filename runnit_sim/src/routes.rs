//! Ground-truth routes and the GPS noise model.
//!
//! A [`RouteBuilder`] lays down where the runner really is, one fix per
//! interval. [`GpsNoise`] then turns that truth into what a phone would
//! report: scatter, low-accuracy fixes and teleport glitches.

use h3o::{CellIndex, LatLng, Resolution};
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal, NormalError};
use runnit_core::geodesy::{haversine_km, EARTH_RADIUS_KM};
use runnit_env::Coordinate;

/// Meters per degree of latitude on the haversine sphere.
pub const M_PER_DEG_LAT: f64 = EARTH_RADIUS_KM * 1000.0 * std::f64::consts::PI / 180.0;

/// Downtown San Francisco.
pub const SF_ORIGIN: (f64, f64) = (37.7749, -122.4194);

/// Moves a point by small north/east offsets in meters.
pub fn offset(origin: (f64, f64), north_m: f64, east_m: f64) -> (f64, f64) {
    let (lat, lng) = origin;
    let m_per_deg_lng = M_PER_DEG_LAT * lat.to_radians().cos();
    (lat + north_m / M_PER_DEG_LAT, lng + east_m / m_per_deg_lng)
}

/// Center of the H3 cell containing `point`, or the point itself if it
/// is not a valid position.
pub fn cell_center(point: (f64, f64), resolution: Resolution) -> (f64, f64) {
    match LatLng::new(point.0, point.1) {
        Ok(latlng) => {
            let center = LatLng::from(latlng.to_cell(resolution));
            (center.lat(), center.lng())
        }
        Err(_) => point,
    }
}

/// H3 cell of a point at the given resolution.
pub fn cell_of(point: (f64, f64), resolution: Resolution) -> Option<CellIndex> {
    LatLng::new(point.0, point.1)
        .ok()
        .map(|latlng| latlng.to_cell(resolution))
}

// ============================================================================
// GROUND TRUTH
// ============================================================================

/// Builds a ground-truth route at a fixed fix interval.
#[derive(Debug, Clone)]
pub struct RouteBuilder {
    position: (f64, f64),
    time_ms: u64,
    interval_ms: u64,
    fixes: Vec<Coordinate>,
}

impl RouteBuilder {
    /// Starts at `origin` with a first fix at `start_ms`.
    pub fn new(origin: (f64, f64), start_ms: u64, interval_ms: u64) -> Self {
        Self {
            position: origin,
            time_ms: start_ms,
            interval_ms,
            fixes: vec![Coordinate::new(origin.0, origin.1, start_ms)],
        }
    }

    /// `steps` fixes, each `step_m` further along `bearing_deg` (0 = north).
    pub fn walk(mut self, bearing_deg: f64, step_m: f64, steps: u32) -> Self {
        let (sin, cos) = bearing_deg.to_radians().sin_cos();
        for _ in 0..steps {
            self.position = offset(self.position, step_m * cos, step_m * sin);
            self.push();
        }
        self
    }

    /// `steps` fixes without moving.
    pub fn stand(self, steps: u32) -> Self {
        self.walk(0.0, 0.0, steps)
    }

    /// One fix at each of the given points, in order.
    pub fn visit(mut self, points: &[(f64, f64)]) -> Self {
        for point in points {
            self.position = *point;
            self.push();
        }
        self
    }

    fn push(&mut self) {
        self.time_ms += self.interval_ms;
        self.fixes
            .push(Coordinate::new(self.position.0, self.position.1, self.time_ms));
    }

    pub fn build(self) -> Vec<Coordinate> {
        self.fixes
    }
}

/// Length of a route along consecutive fixes (km).
pub fn route_distance_km(fixes: &[Coordinate]) -> f64 {
    fixes
        .windows(2)
        .map(|w| haversine_km(w[0].latitude, w[0].longitude, w[1].latitude, w[1].longitude))
        .sum()
}

// ============================================================================
// NOISE MODEL
// ============================================================================

/// How a phone's GPS misreports the truth.
#[derive(Debug, Clone, PartialEq)]
pub struct GpsNoise {
    /// Per-axis scatter (meters, 1σ)
    pub position_std_m: f64,

    /// Per-axis scatter is clamped to this (meters)
    pub max_offset_m: f64,

    /// Accuracy reported on ordinary fixes (meters)
    pub accuracy_m: f64,

    /// Share of fixes reported with poor accuracy
    pub low_accuracy_rate: f64,

    /// Accuracy reported on poor fixes (meters)
    pub low_accuracy_m: f64,

    /// Share of fixes that jump far away for one sample
    pub glitch_rate: f64,

    /// Glitch jump length range (meters)
    pub glitch_min_m: f64,
    pub glitch_max_m: f64,
}

impl GpsNoise {
    /// Perfect positions reported at 5 m accuracy.
    pub fn clean() -> Self {
        Self {
            position_std_m: 0.0,
            max_offset_m: 0.0,
            accuracy_m: 5.0,
            low_accuracy_rate: 0.0,
            low_accuracy_m: 45.0,
            glitch_rate: 0.0,
            glitch_min_m: 300.0,
            glitch_max_m: 800.0,
        }
    }

    /// Sub-meter scatter, small enough to always read as jitter.
    pub fn settled() -> Self {
        Self {
            position_std_m: 0.6,
            max_offset_m: 1.0,
            accuracy_m: 4.0,
            ..Self::clean()
        }
    }

    /// Street canyon: visible scatter and occasional poor fixes.
    pub fn urban() -> Self {
        Self {
            position_std_m: 1.5,
            max_offset_m: 4.0,
            accuracy_m: 8.0,
            low_accuracy_rate: 0.1,
            ..Self::clean()
        }
    }

    /// Clean positions with occasional far jumps.
    pub fn glitchy(rate: f64) -> Self {
        Self {
            glitch_rate: rate,
            ..Self::clean()
        }
    }

    /// Applies the model to a ground-truth route.
    ///
    /// The first fix is always a settled, accurate one: a run is only
    /// started once the phone has a lock.
    pub fn apply(
        &self,
        truth: &[Coordinate],
        rng: &mut ChaCha8Rng,
    ) -> Result<NoisyRoute, NormalError> {
        let scatter = Normal::new(0.0, self.position_std_m.max(0.0))?;

        let mut route = NoisyRoute::default();
        for (i, fix) in truth.iter().enumerate() {
            let mut north = scatter.sample(rng).clamp(-self.max_offset_m, self.max_offset_m);
            let mut east = scatter.sample(rng).clamp(-self.max_offset_m, self.max_offset_m);
            let mut accuracy = self.accuracy_m;

            let roll: f64 = rng.gen();
            if i > 0 && roll < self.glitch_rate {
                let bearing = rng.gen_range(0.0..std::f64::consts::TAU);
                let jump = rng.gen_range(self.glitch_min_m..=self.glitch_max_m);
                north += jump * bearing.cos();
                east += jump * bearing.sin();
                route.glitches += 1;
            } else if i > 0 && roll < self.glitch_rate + self.low_accuracy_rate {
                accuracy = self.low_accuracy_m;
                route.low_accuracy += 1;
            }

            let (lat, lng) = offset((fix.latitude, fix.longitude), north, east);
            route.fixes.push(Coordinate {
                latitude: lat,
                longitude: lng,
                accuracy: Some(accuracy),
                ..*fix
            });
        }
        Ok(route)
    }
}

/// Noisy fixes plus what the noise model injected.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NoisyRoute {
    pub fixes: Vec<Coordinate>,
    pub glitches: usize,
    pub low_accuracy: usize,
}
