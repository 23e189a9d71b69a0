use crate::config::{GlobalConfig, ShardConfig};
use crate::geo;
use crate::models::{ListingStatus, PricePoint, Station, TransitEstimate};
use crate::scrapers::normalize::COMMERCIAL_TYPE_CODES;
use crate::scrapers::query::build_search_query;
use crate::scrapers::types::{Offer, RawPricePoint};
use crate::scrapers::{OfferMapper, OfferSource, YandexApi};
use crate::storage::PgStore;
use anyhow::Result;
use chrono::{DateTime, FixedOffset, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Consecutive request failures tolerated before the worker backs off
const MAX_CONSECUTIVE_ERRORS: u32 = 10;
/// Fixed pause taken when the failure threshold is crossed
const ERROR_BACKOFF: Duration = Duration::from_secs(30);
/// Pause before the extra price-history request for a raised offer
const RAISED_FETCH_PAUSE: Duration = Duration::from_millis(500);

/// Supervisor entry point for one shard: builds the worker-owned resources
/// (HTTP client pool, storage handle, caches) and runs the loop until the
/// token is cancelled. An initialization failure propagates and is handled
/// by the supervisor's respawn path.
pub async fn run_shard(
    config: Arc<GlobalConfig>,
    shard: ShardConfig,
    token: CancellationToken,
) -> Result<()> {
    let source = YandexApi::new(&config)?;
    let store = PgStore::connect(&config.database_url).await?;
    let mut worker = ScrapeWorker::new(config, shard, source, store).await?;
    worker.run(token).await;
    Ok(())
}

/// Counts consecutive request failures. Crossing the threshold signals one
/// backoff pause and resets the counter, bounding how fast a persistently
/// failing worker burns through proxies without ever stopping outright.
pub struct ErrorStreak {
    count: u32,
    threshold: u32,
}

impl ErrorStreak {
    pub fn new(threshold: u32) -> Self {
        Self {
            count: 0,
            threshold,
        }
    }

    /// Records one failure; returns true when the caller should back off now
    pub fn record_failure(&mut self) -> bool {
        self.count += 1;
        if self.count >= self.threshold {
            self.count = 0;
            return true;
        }
        false
    }

    pub fn reset(&mut self) {
        self.count = 0;
    }

    pub fn count(&self) -> u32 {
        self.count
    }
}

/// The daemon loop for one shard: fetch, filter, enrich, persist, forever.
///
/// Everything here is owned by this worker alone (dedup cache, station
/// table, storage handle, client pool), so no cross-shard locking exists.
pub struct ScrapeWorker<S> {
    config: Arc<GlobalConfig>,
    shard: ShardConfig,
    name: String,
    source: S,
    store: PgStore,
    mapper: OfferMapper,
    seen: HashSet<String>,
    stations: Vec<Station>,
    last_rotation: Instant,
    errors: ErrorStreak,
}

impl<S: OfferSource> ScrapeWorker<S> {
    pub async fn new(
        config: Arc<GlobalConfig>,
        shard: ShardConfig,
        source: S,
        store: PgStore,
    ) -> Result<Self> {
        let name = shard.name();

        let commercial_rooms = if shard.category.commercial {
            let codes: Vec<&str> = COMMERCIAL_TYPE_CODES.iter().map(|(_, code)| *code).collect();
            store.load_commercial_rooms(&codes).await?
        } else {
            HashMap::new()
        };
        let mapper = OfferMapper::new(
            config.source_id,
            shard.location_id,
            shard.category.id,
            shard.category.commercial,
            commercial_rooms,
        );

        let seen = match store
            .load_recent_external_ids(config.source_id, shard.location_id, shard.category.id)
            .await
        {
            Ok(ids) => ids,
            Err(error) => {
                error!(worker = %name, error = %error, "failed to seed dedup cache");
                HashSet::new()
            }
        };

        let stations = match store.load_stations(shard.location_id).await {
            Ok(stations) => stations,
            Err(error) => {
                error!(worker = %name, error = %error, "failed to load stations");
                Vec::new()
            }
        };

        info!(
            worker = %name,
            seen = seen.len(),
            stations = stations.len(),
            "worker initialized"
        );

        Ok(Self {
            config,
            shard,
            name,
            source,
            store,
            mapper,
            seen,
            stations,
            last_rotation: Instant::now(),
            errors: ErrorStreak::new(MAX_CONSECUTIVE_ERRORS),
        })
    }

    pub async fn run(&mut self, token: CancellationToken) {
        info!(worker = %self.name, source = self.source.source_name(), "worker started");

        while !token.is_cancelled() {
            self.rotate_cache_if_due().await;

            // Rebuilt every iteration: the randomized prices make each
            // request look distinct to the upstream's cache layer.
            let query = build_search_query(
                &self.config.request,
                &self.shard.category.params,
                self.shard.rgid,
            );

            let (min_ms, max_ms) = self.shard.sleep_range_ms(&self.config);
            sleep(Duration::from_millis(fastrand::u64(min_ms..=max_ms))).await;

            match self.source.search(&query).await {
                Ok(offers) if offers.is_empty() => {
                    // Nothing new is a normal outcome, not a failure
                    debug!(worker = %self.name, "no offers");
                    self.errors.reset();
                }
                Ok(offers) => {
                    self.process_offers(offers).await;
                    self.errors.reset();
                }
                Err(error) => {
                    warn!(worker = %self.name, error = %error, "search request failed");
                    if self.errors.record_failure() {
                        warn!(
                            worker = %self.name,
                            backoff_secs = ERROR_BACKOFF.as_secs(),
                            "too many consecutive errors, backing off"
                        );
                        sleep(ERROR_BACKOFF).await;
                    }
                }
            }
        }

        info!(worker = %self.name, "worker stopped");
    }

    async fn rotate_cache_if_due(&mut self) {
        let interval = Duration::from_secs(self.config.cache_rotation_minutes * 60);
        if self.last_rotation.elapsed() < interval {
            return;
        }

        match self
            .store
            .load_recent_external_ids(
                self.config.source_id,
                self.shard.location_id,
                self.shard.category.id,
            )
            .await
        {
            Ok(ids) => {
                info!(worker = %self.name, size = ids.len(), "dedup cache rotated");
                self.seen = ids;
            }
            Err(error) => {
                warn!(worker = %self.name, error = %error, "dedup cache rotation failed");
            }
        }
        self.last_rotation = Instant::now();
    }

    async fn process_offers(&mut self, offers: Vec<Offer>) {
        let filter_today_only = self.shard.category.filter_today_only;

        for offer in offers {
            let Some(offer_id) = offer.external_id() else {
                continue;
            };
            if self.seen.contains(&offer_id) {
                continue;
            }

            let raised = offer.raised || offer.promoted;

            if filter_today_only
                && !created_today(
                    offer.creation_date.as_deref(),
                    self.config.utc_offset_hours,
                    Utc::now(),
                )
            {
                // The creation date never changes upstream, so the offer is
                // suppressed for good rather than re-evaluated every pass.
                self.seen.insert(offer_id);
                continue;
            }

            let Some(mut listing) = self.mapper.map(&offer) else {
                self.seen.insert(offer_id);
                continue;
            };
            if raised {
                listing.status = ListingStatus::Raised;
            }

            let station_link = self.resolve_station_link(&offer);

            match self.store.save_listing(&listing).await {
                Ok(listing_id) => {
                    // Marked seen only after the durable save; a crash in
                    // between re-processes the offer and the upsert makes
                    // that harmless.
                    self.seen.insert(offer_id.clone());

                    if let Some((station_id, estimate)) = station_link {
                        if let Err(error) = self
                            .store
                            .save_station_link(listing_id, station_id, &estimate)
                            .await
                        {
                            warn!(
                                worker = %self.name,
                                listing_id,
                                station_id,
                                error = %error,
                                "failed to link station"
                            );
                        }
                    }

                    info!(
                        worker = %self.name,
                        offer_id = %offer_id,
                        listing_id,
                        price = ?listing.price,
                        raised,
                        "listing stored"
                    );

                    if raised {
                        sleep(RAISED_FETCH_PAUSE).await;
                        self.refresh_price_history(listing_id, &offer_id).await;
                    }
                }
                Err(error) => {
                    // Left unmarked on purpose: the offer is retried the
                    // next time the upstream returns it.
                    error!(
                        worker = %self.name,
                        offer_id = %offer_id,
                        error = %error,
                        "failed to save listing"
                    );
                }
            }
        }
    }

    fn resolve_station_link(&self, offer: &Offer) -> Option<(i32, TransitEstimate)> {
        let metro = offer.nearest_metro()?;
        let station = geo::resolve_station(
            &self.stations,
            metro.name.as_deref().unwrap_or(""),
            metro.latitude.unwrap_or(0.0),
            metro.longitude.unwrap_or(0.0),
        )?;
        let estimate = geo::transit_estimate(metro.time_to_metro, metro.metro_transport.as_deref());
        Some((station.id, estimate))
    }

    /// Fetches the upstream price timeline and stores the diffed series.
    /// Failures are logged and swallowed; they never abort the save that
    /// triggered them.
    async fn refresh_price_history(&self, listing_id: i64, offer_id: &str) {
        let prices = match self.source.price_timeline(offer_id).await {
            Ok(prices) => prices,
            Err(error) => {
                warn!(
                    worker = %self.name,
                    offer_id = %offer_id,
                    error = %error,
                    "failed to fetch price history"
                );
                return;
            }
        };

        let series = diff_price_series(&prices);
        if series.is_empty() {
            // A single price point carries no history worth showing
            return;
        }

        let json = match serde_json::to_string(&series) {
            Ok(json) => json,
            Err(error) => {
                warn!(worker = %self.name, offer_id = %offer_id, error = %error, "failed to serialize price history");
                return;
            }
        };

        match self.store.update_price_history(listing_id, &json).await {
            Ok(()) => {
                info!(
                    worker = %self.name,
                    offer_id = %offer_id,
                    listing_id,
                    entries = series.len(),
                    "price history stored"
                );
            }
            Err(error) => {
                warn!(
                    worker = %self.name,
                    offer_id = %offer_id,
                    error = %error,
                    "failed to store price history"
                );
            }
        }
    }
}

/// Turns the upstream's oldest-first price timeline into the stored
/// newest-first series. Each entry's diff is the change versus the
/// next-older point; the oldest entry has no older neighbor and gets 0.
/// Single-point timelines produce an empty series (no history to show).
pub fn diff_price_series(prices: &[RawPricePoint]) -> Vec<PricePoint> {
    if prices.len() <= 1 {
        return Vec::new();
    }

    let mut points: Vec<(i64, i64)> = prices
        .iter()
        .map(|point| (parse_timestamp(point.date.as_deref()), point.price_value()))
        .collect();
    points.reverse();

    points
        .iter()
        .enumerate()
        .map(|(index, &(date, price))| PricePoint {
            date,
            price,
            diff: points
                .get(index + 1)
                .map(|&(_, older)| price - older)
                .unwrap_or(0),
        })
        .collect()
}

fn parse_timestamp(date: Option<&str>) -> i64 {
    date.and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .map(|parsed| parsed.timestamp())
        .unwrap_or_else(|| Utc::now().timestamp())
}

/// Whether the offer's creation timestamp falls on today's calendar day in
/// the shard's local offset. Missing or unparseable dates count as not-today.
pub fn created_today(
    creation_date: Option<&str>,
    utc_offset_hours: i32,
    now: DateTime<Utc>,
) -> bool {
    let Some(raw) = creation_date else {
        return false;
    };
    let Ok(created) = DateTime::parse_from_rfc3339(raw) else {
        return false;
    };
    let Some(offset) = FixedOffset::east_opt(utc_offset_hours * 3600) else {
        return false;
    };

    created.with_timezone(&offset).date_naive() == now.with_timezone(&offset).date_naive()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn raw_point(date: &str, value: i64) -> RawPricePoint {
        RawPricePoint {
            date: Some(date.to_string()),
            value: Some(value),
            price: None,
        }
    }

    #[test]
    fn backoff_triggers_exactly_at_threshold() {
        let mut streak = ErrorStreak::new(3);
        assert!(!streak.record_failure());
        assert!(!streak.record_failure());
        assert!(streak.record_failure());
        // The trigger resets the counter, so the next failure starts over
        assert_eq!(streak.count(), 0);
        assert!(!streak.record_failure());
    }

    #[test]
    fn success_resets_the_streak() {
        let mut streak = ErrorStreak::new(3);
        streak.record_failure();
        streak.record_failure();
        streak.reset();
        assert_eq!(streak.count(), 0);
        assert!(!streak.record_failure());
        assert!(!streak.record_failure());
        assert!(streak.record_failure());
    }

    #[test]
    fn price_series_diffs_against_next_older_point() {
        // Ascending by time: 100, then 120, then 90
        let prices = vec![
            raw_point("2024-01-01T00:00:00Z", 100),
            raw_point("2024-02-01T00:00:00Z", 120),
            raw_point("2024-03-01T00:00:00Z", 90),
        ];
        let series = diff_price_series(&prices);

        assert_eq!(series.len(), 3);
        // Newest first: the drop from 120 to 90 lands on the newest entry
        assert_eq!(series[0].price, 90);
        assert_eq!(series[0].diff, -30);
        assert_eq!(series[1].price, 120);
        assert_eq!(series[1].diff, 20);
        assert_eq!(series[2].price, 100);
        assert_eq!(series[2].diff, 0);
        assert!(series[0].date > series[2].date);
    }

    #[test]
    fn single_price_point_yields_no_series() {
        let prices = vec![raw_point("2024-01-01T00:00:00Z", 100)];
        assert!(diff_price_series(&prices).is_empty());
        assert!(diff_price_series(&[]).is_empty());
    }

    #[test]
    fn nested_price_value_is_used() {
        use crate::scrapers::types::ValueField;
        let prices = vec![
            RawPricePoint {
                date: Some("2024-01-01T00:00:00Z".to_string()),
                value: None,
                price: Some(ValueField { value: Some(100.0) }),
            },
            raw_point("2024-02-01T00:00:00Z", 80),
        ];
        let series = diff_price_series(&prices);
        assert_eq!(series[0].price, 80);
        assert_eq!(series[0].diff, -20);
    }

    #[test]
    fn today_filter_respects_local_offset() {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();

        assert!(created_today(Some("2024-06-01T05:00:00Z"), 3, now));
        // 23:30 UTC the previous day is already June 1st at +03:00
        assert!(created_today(Some("2024-05-31T23:30:00Z"), 3, now));
        assert!(!created_today(Some("2024-05-31T10:00:00Z"), 3, now));
        assert!(!created_today(None, 3, now));
        assert!(!created_today(Some("not a date"), 3, now));
    }
}
