use serde::Serialize;

/// Listing lifecycle status as stored in the shared CRM tables
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListingStatus {
    New,
    Raised,
}

impl ListingStatus {
    pub fn id(self) -> i32 {
        match self {
            Self::New => 1,
            Self::Raised => 2,
        }
    }
}

/// One normalized listing ready for persistence.
///
/// Keyed by `(source_id, external_id)` in the shared `listings` table;
/// saving the same key twice updates the mutable fields in place.
#[derive(Debug, Clone)]
pub struct NewListing {
    pub external_id: String,
    pub source_id: i32,
    pub category_id: i32,
    pub location_id: i32,
    pub room_id: Option<i32>,
    pub status: ListingStatus,
    pub title: String,
    /// Full geocoded address string as reported upstream
    pub address: Option<String>,
    pub city: Option<String>,
    pub street: Option<String>,
    pub house: Option<String>,
    pub price: Option<f64>,
    pub square_meters: Option<f64>,
    pub floor: Option<i32>,
    pub floors_total: Option<i32>,
    pub phone: Option<String>,
    pub url: Option<String>,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
}

/// A known transit station from the per-location `stations` table
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Station {
    pub id: i32,
    pub name: String,
    pub lat: f64,
    pub lng: f64,
}

/// Travel estimate from a listing to its nearest station, derived from the
/// upstream's reported minutes rather than measured geometry
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransitEstimate {
    pub travel_time_min: Option<i32>,
    pub travel_type: Option<String>,
    /// Human-readable distance ("350 m", "1.2 km")
    pub distance: Option<String>,
}

/// One entry of the newest-first price-history series stored on a listing.
///
/// Field names are part of the storage contract read by the CRM side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PricePoint {
    pub date: i64,
    pub price: i64,
    pub diff: i64,
}
