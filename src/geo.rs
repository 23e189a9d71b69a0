use crate::models::{Station, TransitEstimate};

const EARTH_RADIUS_KM: f64 = 6371.0;

/// Average walking speed used to turn reported minutes into a distance
const WALKING_SPEED_KMH: f64 = 5.0;
/// Average public-transport speed for the same conversion
const TRANSPORT_SPEED_KMH: f64 = 25.0;

/// Upstream transport tag for on-foot travel
pub const TRANSPORT_ON_FOOT: &str = "ON_FOOT";
/// Upstream transport tag for public-transport travel
pub const TRANSPORT_ON_TRANSPORT: &str = "ON_TRANSPORT";

/// Great-circle distance between two points in kilometers
pub fn haversine_km(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
    let lat_diff = (lat2 - lat1).to_radians();
    let lng_diff = (lng2 - lng1).to_radians();

    let angle = (lat_diff / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (lng_diff / 2.0).sin().powi(2);

    EARTH_RADIUS_KM * 2.0 * angle.sqrt().atan2((1.0 - angle).sqrt())
}

/// Maps a reported station name/coordinate to the closest known station.
///
/// 1. Case-insensitive exact match on name; a single hit wins outright.
/// 2. Several stations may share one name (same station on different lines);
///    the closest one to the reported point wins.
/// 3. No name match at all: fall back to the globally nearest station, so a
///    non-empty table never resolves to nothing.
pub fn resolve_station<'a>(
    stations: &'a [Station],
    name: &str,
    lat: f64,
    lng: f64,
) -> Option<&'a Station> {
    let wanted = name.trim().to_lowercase();

    let matched: Vec<&Station> = stations
        .iter()
        .filter(|s| s.name.trim().to_lowercase() == wanted)
        .collect();

    match matched.len() {
        1 => Some(matched[0]),
        0 => nearest(stations.iter(), lat, lng),
        _ => nearest(matched.into_iter(), lat, lng),
    }
}

fn nearest<'a>(
    stations: impl Iterator<Item = &'a Station>,
    lat: f64,
    lng: f64,
) -> Option<&'a Station> {
    stations.min_by(|a, b| {
        let da = haversine_km(lat, lng, a.lat, a.lng);
        let db = haversine_km(lat, lng, b.lat, b.lng);
        da.total_cmp(&db)
    })
}

/// Builds the travel estimate from the upstream's own reported minutes and
/// transport tag. Distance is an approximation from fixed average speeds,
/// rounded to 50 m below one kilometer and to 0.1 km above.
pub fn transit_estimate(minutes: Option<i32>, transport: Option<&str>) -> TransitEstimate {
    let mut estimate = TransitEstimate::default();

    let minutes = match minutes {
        Some(m) if m > 0 => m,
        _ => return estimate,
    };
    estimate.travel_time_min = Some(minutes);

    estimate.travel_type = match transport {
        Some(TRANSPORT_ON_FOOT) => Some("walk".to_string()),
        Some(TRANSPORT_ON_TRANSPORT) => Some("public_transport".to_string()),
        _ => None,
    };

    let speed_kmh = if transport == Some(TRANSPORT_ON_FOOT) {
        WALKING_SPEED_KMH
    } else {
        TRANSPORT_SPEED_KMH
    };
    let distance_meters = f64::from(minutes) / 60.0 * speed_kmh * 1000.0;

    estimate.distance = Some(if distance_meters >= 1000.0 {
        format!("{:.1} km", (distance_meters / 100.0).round() / 10.0)
    } else {
        format!("{} m", ((distance_meters / 50.0).round() as i64) * 50)
    });

    estimate
}

#[cfg(test)]
mod tests {
    use super::*;

    fn station(id: i32, name: &str, lat: f64, lng: f64) -> Station {
        Station {
            id,
            name: name.to_string(),
            lat,
            lng,
        }
    }

    #[test]
    fn haversine_known_distance() {
        // Moscow center to Saint Petersburg center, roughly 634 km
        let d = haversine_km(55.7558, 37.6173, 59.9343, 30.3351);
        assert!((d - 634.0).abs() < 5.0, "got {d}");
    }

    #[test]
    fn exact_name_match_wins() {
        let stations = vec![
            station(1, "Sokol", 55.805, 37.515),
            station(2, "Aeroport", 55.800, 37.533),
        ];
        let found = resolve_station(&stations, "aeroport", 55.0, 37.0).unwrap();
        assert_eq!(found.id, 2);
    }

    #[test]
    fn same_name_disambiguated_by_distance() {
        // Two stations named "Central" on different lines; the reported point
        // sits next to the second one.
        let stations = vec![
            station(1, "Central", 55.700, 37.500),
            station(2, "Central", 55.900, 37.700),
        ];
        let found = resolve_station(&stations, "Central", 55.899, 37.699).unwrap();
        assert_eq!(found.id, 2);
    }

    #[test]
    fn no_name_match_falls_back_to_nearest() {
        let stations = vec![
            station(1, "North", 55.900, 37.600),
            station(2, "South", 55.600, 37.600),
        ];
        let found = resolve_station(&stations, "Unknown", 55.610, 37.600).unwrap();
        assert_eq!(found.id, 2);
    }

    #[test]
    fn empty_table_resolves_to_none() {
        assert!(resolve_station(&[], "Central", 55.0, 37.0).is_none());
    }

    #[test]
    fn walk_estimate_under_one_km() {
        // 3 minutes on foot at 5 km/h = 250 m
        let est = transit_estimate(Some(3), Some(TRANSPORT_ON_FOOT));
        assert_eq!(est.travel_time_min, Some(3));
        assert_eq!(est.travel_type.as_deref(), Some("walk"));
        assert_eq!(est.distance.as_deref(), Some("250 m"));
    }

    #[test]
    fn walk_estimate_rounds_to_fifty_meters() {
        // 4 minutes on foot = 333.3 m, rounded to 350 m
        let est = transit_estimate(Some(4), Some(TRANSPORT_ON_FOOT));
        assert_eq!(est.distance.as_deref(), Some("350 m"));
    }

    #[test]
    fn transport_estimate_above_one_km() {
        // 12 minutes by transport at 25 km/h = 5 km
        let est = transit_estimate(Some(12), Some(TRANSPORT_ON_TRANSPORT));
        assert_eq!(est.travel_type.as_deref(), Some("public_transport"));
        assert_eq!(est.distance.as_deref(), Some("5.0 km"));
    }

    #[test]
    fn missing_minutes_yields_empty_estimate() {
        assert_eq!(transit_estimate(None, Some(TRANSPORT_ON_FOOT)), TransitEstimate::default());
        assert_eq!(transit_estimate(Some(0), None), TransitEstimate::default());
    }
}
