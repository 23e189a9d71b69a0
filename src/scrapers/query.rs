use crate::scrapers::types::{PriceBound, SearchDefaults, ShardParams};

/// Randomized prices are snapped to this step
const PRICE_STEP: u64 = 1000;

/// Resolves a configured price bound to a concrete value. A `[low, high]`
/// range draws a fresh value on every call, snapped to `PRICE_STEP`, which
/// makes consecutive requests look distinct to the upstream's cache layer.
pub fn pick_price(bound: PriceBound) -> u64 {
    match bound {
        PriceBound::Fixed(value) => value,
        PriceBound::Range(low, high) => {
            let steps = high.saturating_sub(low) / PRICE_STEP;
            low + fastrand::u64(0..=steps) * PRICE_STEP
        }
    }
}

/// Builds the search query for one request: global defaults merged with the
/// shard's parameters (shard wins), prices randomized, array parameters
/// serialized as repeated keys. Called fresh every iteration; the result is
/// never reused.
pub fn build_search_query(
    defaults: &SearchDefaults,
    shard: &ShardParams,
    rgid: i64,
) -> Vec<(String, String)> {
    let mut pairs: Vec<(String, String)> = Vec::new();
    let mut push = |key: &str, value: String| pairs.push((key.to_string(), value));

    push("page", defaults.page.to_string());
    push("sort", defaults.sort.clone());
    push(
        "category",
        shard
            .category
            .clone()
            .unwrap_or_else(|| defaults.category.clone()),
    );
    push("currency", defaults.currency.clone());
    push("showOnMobile", defaults.show_on_mobile.clone());
    push("priceType", defaults.price_type.clone());
    push("showSimilar", defaults.show_similar.clone());
    push("agents", defaults.agents.clone());
    push("pageSize", defaults.page_size.to_string());
    push("rgid", rgid.to_string());

    if let Some(deal_type) = &shard.deal_type {
        push("type", deal_type.clone());
    }
    if let Some(rent_time) = &shard.rent_time {
        push("rentTime", rent_time.clone());
    }
    if let Some(object_type) = &shard.object_type {
        push("objectType", object_type.clone());
    }

    // An explicit empty list removes the key (commercial shards); None
    // inherits the global default.
    let rooms = shard
        .rooms_total
        .as_ref()
        .unwrap_or(&defaults.rooms_total);
    for room in rooms {
        push("roomsTotal", room.clone());
    }

    if let Some(commercial_types) = &shard.commercial_type {
        for commercial_type in commercial_types {
            push("commercialType", commercial_type.clone());
        }
    }

    if let Some(bound) = shard.price_min {
        push("priceMin", pick_price(bound).to_string());
    }
    if let Some(bound) = shard.price_max {
        push("priceMax", pick_price(bound).to_string());
    }

    pairs
}
