//! Geodesic & derived-metric helpers.
//!
//! Pure functions only: great-circle distance, pace, speed, a MET-based
//! calorie estimate and the presentation formatters used by run summaries.

/// Mean Earth radius used by the haversine formula (kilometers).
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Default body weight for calorie estimates (kilograms).
pub const DEFAULT_WEIGHT_KG: f64 = 70.0;

/// Great-circle distance between two WGS84 points in kilometers.
///
/// Haversine form. The intermediate term is clamped to `[0, 1]` so
/// rounding near antipodal points cannot produce `NaN`.
pub fn haversine_km(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
    let d_lat = (lat2 - lat1).to_radians();
    let d_lng = (lng2 - lng1).to_radians();

    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lng / 2.0).sin().powi(2);
    let a = a.clamp(0.0, 1.0);

    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    EARTH_RADIUS_KM * c
}

/// Pace in minutes per kilometer. Zero when no distance has been covered.
pub fn pace_min_per_km(distance_km: f64, duration_sec: f64) -> f64 {
    if distance_km <= 0.0 {
        return 0.0;
    }
    (duration_sec / 60.0) / distance_km
}

/// Speed in km/h. Zero when no time has elapsed.
pub fn speed_kmh(distance_km: f64, duration_sec: f64) -> f64 {
    if duration_sec <= 0.0 {
        return 0.0;
    }
    (distance_km / duration_sec) * 3600.0
}

/// Metabolic equivalent for running at the given speed.
pub fn met_for_speed(speed_kmh: f64) -> f64 {
    match speed_kmh {
        s if s < 6.0 => 6.0,
        s if s < 8.0 => 8.0,
        s if s < 10.0 => 10.0,
        s if s < 12.0 => 11.5,
        _ => 13.0,
    }
}

/// Calories burned: `MET × weight(kg) × duration(h)`.
pub fn estimate_calories(duration_min: f64, speed_kmh: f64, weight_kg: f64) -> f64 {
    met_for_speed(speed_kmh) * weight_kg * (duration_min / 60.0)
}

/// Formats seconds as `H:MM:SS`, or `M:SS` under an hour.
pub fn format_duration(total_seconds: u64) -> String {
    let hrs = total_seconds / 3600;
    let mins = (total_seconds % 3600) / 60;
    let secs = total_seconds % 60;

    if hrs > 0 {
        format!("{hrs}:{mins:02}:{secs:02}")
    } else {
        format!("{mins}:{secs:02}")
    }
}

/// Formats a pace as `M'SS"` (5.5 → `5'30"`).
pub fn format_pace(pace_min_per_km: f64) -> String {
    if pace_min_per_km <= 0.0 || !pace_min_per_km.is_finite() {
        return "0'00\"".to_string();
    }
    let mut mins = pace_min_per_km.floor() as u64;
    let mut secs = ((pace_min_per_km - mins as f64) * 60.0).round() as u64;
    if secs == 60 {
        mins += 1;
        secs = 0;
    }
    format!("{mins}'{secs:02}\"")
}

/// Formats a distance as meters under 1 km, otherwise `N.NNkm`.
pub fn format_distance(km: f64) -> String {
    if km < 1.0 {
        format!("{}m", (km * 1000.0).round() as i64)
    } else {
        format!("{km:.2}km")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_haversine_identical_points() {
        assert_eq!(haversine_km(37.7749, -122.4194, 37.7749, -122.4194), 0.0);
    }

    #[test]
    fn test_haversine_symmetric() {
        let ab = haversine_km(51.5074, -0.1278, 48.8566, 2.3522);
        let ba = haversine_km(48.8566, 2.3522, 51.5074, -0.1278);
        assert_relative_eq!(ab, ba, epsilon = 1e-9);
        // London → Paris is roughly 344 km
        assert!((ab - 343.5).abs() < 2.0);
    }

    #[test]
    fn test_haversine_antipodal_is_half_circumference() {
        let d = haversine_km(0.0, 0.0, 0.0, 180.0);
        assert!(d.is_finite());
        assert_relative_eq!(d, std::f64::consts::PI * EARTH_RADIUS_KM, epsilon = 1e-6);
    }

    #[test]
    fn test_haversine_one_degree_latitude() {
        let d = haversine_km(0.0, 0.0, 1.0, 0.0);
        assert_relative_eq!(d, 111.19, epsilon = 0.01);
    }

    #[test]
    fn test_pace_and_speed_purity() {
        assert_eq!(pace_min_per_km(0.0, 1234.0), 0.0);
        assert_eq!(pace_min_per_km(-1.0, 1234.0), 0.0);
        assert_eq!(speed_kmh(12.0, 0.0), 0.0);
        assert_relative_eq!(pace_min_per_km(10.0, 3000.0), 5.0);
        assert_relative_eq!(speed_kmh(10.0, 3600.0), 10.0);
    }

    #[test]
    fn test_met_table_steps() {
        assert_eq!(met_for_speed(0.0), 6.0);
        assert_eq!(met_for_speed(5.99), 6.0);
        assert_eq!(met_for_speed(6.0), 8.0);
        assert_eq!(met_for_speed(9.5), 10.0);
        assert_eq!(met_for_speed(11.0), 11.5);
        assert_eq!(met_for_speed(12.0), 13.0);
    }

    #[test]
    fn test_estimate_calories() {
        // 60 min at 10 km/h, 70 kg: MET 11.5 → 805 kcal
        assert_relative_eq!(estimate_calories(60.0, 10.0, DEFAULT_WEIGHT_KG), 805.0);
        assert_eq!(estimate_calories(0.0, 10.0, DEFAULT_WEIGHT_KG), 0.0);
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(0), "0:00");
        assert_eq!(format_duration(65), "1:05");
        assert_eq!(format_duration(3600 + 2 * 60 + 3), "1:02:03");
    }

    #[test]
    fn test_format_pace() {
        assert_eq!(format_pace(5.5), "5'30\"");
        assert_eq!(format_pace(0.0), "0'00\"");
        assert_eq!(format_pace(f64::INFINITY), "0'00\"");
        assert_eq!(format_pace(4.999), "5'00\"");
    }

    #[test]
    fn test_format_distance() {
        assert_eq!(format_distance(0.4567), "457m");
        assert_eq!(format_distance(1.0), "1.00km");
        assert_eq!(format_distance(12.346), "12.35km");
    }
}
