use crate::models::{NewListing, Station, TransitEstimate};
use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tracing::warn;

/// Dedup cache seeding window, in days
const RECENT_WINDOW_DAYS: i32 = 30;

/// Gateway to the shared CRM store. Strict upsert-only semantics: the
/// listings tables are read concurrently by unrelated CRM features, so this
/// side never deletes and never holds locks across an HTTP call.
///
/// Owned by exactly one worker; on a connectivity fault the pool is rebuilt
/// in place and the failed write retried once.
pub struct PgStore {
    pool: PgPool,
    database_url: String,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = build_pool(database_url).await?;
        Ok(Self {
            pool,
            database_url: database_url.to_string(),
        })
    }

    async fn reconnect(&mut self) -> Result<()> {
        self.pool.close().await;
        self.pool = build_pool(&self.database_url).await?;
        Ok(())
    }

    /// Idempotent save keyed by `(source_id, external_id)`. Repeated
    /// sightings update mutable fields without creating rows. One reconnect
    /// and retry on a connectivity fault; the second failure propagates and
    /// the caller leaves the offer unmarked so it is retried on the next
    /// sighting.
    pub async fn save_listing(&mut self, listing: &NewListing) -> Result<i64> {
        match self.insert_listing(listing).await {
            Ok(id) => Ok(id),
            Err(error) if is_connectivity_error(&error) => {
                warn!(error = %error, "storage connection fault, reconnecting");
                self.reconnect().await?;
                self.insert_listing(listing)
                    .await
                    .context("listing save failed after reconnect")
            }
            Err(error) => Err(error).context("failed to save listing"),
        }
    }

    async fn insert_listing(&self, listing: &NewListing) -> Result<i64, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        let listing_id: i64 = sqlx::query(
            r#"
            INSERT INTO listings (
                external_id, source_id, category_id, location_id, room_id,
                listing_status_id, title, address, city, street, house,
                price, square_meters, floor, floors_total, phone, url,
                lat, lng, created_at, updated_at
            )
            VALUES (
                $1, $2, $3, $4, $5,
                $6, $7, $8, $9, $10, $11,
                $12, $13, $14, $15, $16, $17,
                $18, $19, now(), now()
            )
            ON CONFLICT (source_id, external_id) DO UPDATE SET
                room_id = EXCLUDED.room_id,
                listing_status_id = EXCLUDED.listing_status_id,
                title = EXCLUDED.title,
                address = EXCLUDED.address,
                city = EXCLUDED.city,
                street = EXCLUDED.street,
                house = EXCLUDED.house,
                price = EXCLUDED.price,
                square_meters = EXCLUDED.square_meters,
                floor = EXCLUDED.floor,
                floors_total = EXCLUDED.floors_total,
                phone = EXCLUDED.phone,
                url = EXCLUDED.url,
                lat = EXCLUDED.lat,
                lng = EXCLUDED.lng,
                updated_at = now()
            RETURNING id
            "#,
        )
        .bind(&listing.external_id)
        .bind(listing.source_id)
        .bind(listing.category_id)
        .bind(listing.location_id)
        .bind(listing.room_id)
        .bind(listing.status.id())
        .bind(&listing.title)
        .bind(&listing.address)
        .bind(&listing.city)
        .bind(&listing.street)
        .bind(&listing.house)
        .bind(listing.price)
        .bind(listing.square_meters)
        .bind(listing.floor)
        .bind(listing.floors_total)
        .bind(&listing.phone)
        .bind(&listing.url)
        .bind(listing.lat)
        .bind(listing.lng)
        .fetch_one(&mut *tx)
        .await?
        .get(0);

        // Geographic point: written only when coordinates exist, safe to
        // recompute on every sighting.
        if let (Some(lat), Some(lng)) = (listing.lat, listing.lng) {
            sqlx::query(
                "UPDATE listings SET point = ST_SetSRID(ST_MakePoint($2, $3), 4326) WHERE id = $1",
            )
            .bind(listing_id)
            .bind(lng)
            .bind(lat)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(listing_id)
    }

    /// Idempotent upsert of the transit association. Updates the travel
    /// estimate without disturbing other links of the same listing.
    pub async fn save_station_link(
        &self,
        listing_id: i64,
        station_id: i32,
        estimate: &TransitEstimate,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO listing_station_links (
                listing_id, station_id, travel_time_min, travel_type, distance,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, now(), now())
            ON CONFLICT (listing_id, station_id) DO UPDATE SET
                travel_time_min = EXCLUDED.travel_time_min,
                travel_type = EXCLUDED.travel_type,
                distance = EXCLUDED.distance,
                updated_at = now()
            "#,
        )
        .bind(listing_id)
        .bind(station_id)
        .bind(estimate.travel_time_min)
        .bind(&estimate.travel_type)
        .bind(&estimate.distance)
        .execute(&self.pool)
        .await
        .context("failed to save station link")?;

        Ok(())
    }

    /// Stores the serialized newest-first price series on the listing
    pub async fn update_price_history(&self, listing_id: i64, series_json: &str) -> Result<()> {
        sqlx::query("UPDATE listings SET price_history = $2, updated_at = now() WHERE id = $1")
            .bind(listing_id)
            .bind(series_json)
            .execute(&self.pool)
            .await
            .context("failed to update price history")?;

        Ok(())
    }

    /// Seeds the dedup cache: external ids of this shard's listings created
    /// inside the recent window
    pub async fn load_recent_external_ids(
        &self,
        source_id: i32,
        location_id: i32,
        category_id: i32,
    ) -> Result<HashSet<String>> {
        let ids: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT external_id FROM listings
            WHERE source_id = $1
              AND location_id = $2
              AND category_id = $3
              AND created_at >= now() - make_interval(days => $4)
            "#,
        )
        .bind(source_id)
        .bind(location_id)
        .bind(category_id)
        .bind(RECENT_WINDOW_DAYS)
        .fetch_all(&self.pool)
        .await
        .context("failed to load recent listings")?;

        Ok(ids.into_iter().collect())
    }

    /// Loads the location's station table, once per worker start
    pub async fn load_stations(&self, location_id: i32) -> Result<Vec<Station>> {
        sqlx::query_as(
            r#"
            SELECT id, name, lat, lng FROM stations
            WHERE location_id = $1 AND lat IS NOT NULL AND lng IS NOT NULL
            "#,
        )
        .bind(location_id)
        .fetch_all(&self.pool)
        .await
        .context("failed to load stations")
    }

    /// Resolves commercial-type codes to room ids, once per worker start
    pub async fn load_commercial_rooms(&self, codes: &[&str]) -> Result<HashMap<String, i32>> {
        let codes: Vec<String> = codes.iter().map(|code| code.to_string()).collect();

        let rows = sqlx::query("SELECT code, id FROM rooms WHERE code = ANY($1)")
            .bind(&codes)
            .fetch_all(&self.pool)
            .await
            .context("failed to load commercial rooms")?;

        Ok(rows
            .into_iter()
            .map(|row| (row.get::<String, _>(0), row.get::<i32, _>(1)))
            .collect())
    }
}

async fn build_pool(database_url: &str) -> Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(2)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url)
        .await
        .context("failed to connect to database")
}

fn is_connectivity_error(error: &sqlx::Error) -> bool {
    matches!(
        error,
        sqlx::Error::Io(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed
            | sqlx::Error::Tls(_)
    )
}
