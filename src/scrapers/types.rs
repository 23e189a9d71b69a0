use serde::{Deserialize, Serialize};

/// Offer id as it appears on the wire: usually a string, occasionally a
/// bare number. Always handled as a string internally.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum OfferId {
    Text(String),
    Number(u64),
}

impl OfferId {
    pub fn as_string(&self) -> String {
        match self {
            Self::Text(s) => s.clone(),
            Self::Number(n) => n.to_string(),
        }
    }
}

/// `roomsTotal` is a number for ordinary apartments and a sentinel string
/// ("STUDIO", "PLUS_4") otherwise; some payloads stringify the number too.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RoomsTotal {
    Count(i64),
    Tag(String),
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ValueField {
    #[serde(default)]
    pub value: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommercialInfo {
    #[serde(default)]
    pub commercial_types: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthorInfo {
    #[serde(default)]
    pub phones: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressComponent {
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub region_type: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StructuredAddress {
    #[serde(default)]
    pub component: Vec<AddressComponent>,
}

/// Nearest-transit block as reported by the upstream
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetroInfo {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    #[serde(default)]
    pub time_to_metro: Option<i32>,
    #[serde(default)]
    pub metro_transport: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfferLocation {
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    #[serde(default)]
    pub geocoder_address: Option<String>,
    #[serde(default)]
    pub structured_address: Option<StructuredAddress>,
    #[serde(default)]
    pub metro: Option<MetroInfo>,
    #[serde(default)]
    pub metro_list: Vec<MetroInfo>,
}

/// One raw listing record from the upstream search response, pre-normalization
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Offer {
    #[serde(default)]
    pub offer_id: Option<OfferId>,
    #[serde(default)]
    pub price: Option<ValueField>,
    #[serde(default)]
    pub area: Option<ValueField>,
    #[serde(default)]
    pub floors_offered: Vec<i32>,
    #[serde(default)]
    pub floors_total: Option<i32>,
    #[serde(default)]
    pub rooms_total: Option<RoomsTotal>,
    #[serde(default)]
    pub commercial: Option<CommercialInfo>,
    #[serde(default)]
    pub author: Option<AuthorInfo>,
    #[serde(default)]
    pub location: Option<OfferLocation>,
    #[serde(default)]
    pub share_url: Option<String>,
    #[serde(default)]
    pub creation_date: Option<String>,
    #[serde(default)]
    pub raised: bool,
    #[serde(default)]
    pub promoted: bool,
}

impl Offer {
    pub fn external_id(&self) -> Option<String> {
        self.offer_id.as_ref().map(OfferId::as_string)
    }

    /// Best nearest-transit record: the dedicated `metro` block when present,
    /// otherwise the first entry of `metroList`
    pub fn nearest_metro(&self) -> Option<&MetroInfo> {
        let location = self.location.as_ref()?;
        if location.metro_list.is_empty() {
            return None;
        }
        location.metro.as_ref().or_else(|| location.metro_list.first())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OfferItems {
    #[serde(default)]
    pub items: Vec<Offer>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchBody {
    #[serde(default)]
    pub offers: OfferItems,
}

/// Envelope of the search endpoint response
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchResponse {
    #[serde(default)]
    pub response: SearchBody,
}

impl SearchResponse {
    pub fn into_offers(self) -> Vec<Offer> {
        self.response.offers.items
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawPricePoint {
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub value: Option<i64>,
    #[serde(default)]
    pub price: Option<ValueField>,
}

impl RawPricePoint {
    /// Price value; older payloads nest it under `price.value`
    pub fn price_value(&self) -> i64 {
        self.value
            .or_else(|| self.price.as_ref().and_then(|p| p.value).map(|v| v as i64))
            .unwrap_or(0)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PriceTimeline {
    #[serde(default)]
    pub prices: Vec<RawPricePoint>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CardBody {
    #[serde(default)]
    pub history: PriceTimeline,
}

/// Envelope of the per-offer card response carrying the price timeline
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CardResponse {
    #[serde(default)]
    pub response: CardBody,
}

impl CardResponse {
    pub fn into_prices(self) -> Vec<RawPricePoint> {
        self.response.history.prices
    }
}

/// A price bound configured either as a fixed value or as a `[low, high]`
/// randomization range
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PriceBound {
    Fixed(u64),
    Range(u64, u64),
}

/// Search parameters shared by every shard; shard-specific values override
/// these at request-build time
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchDefaults {
    pub page: u32,
    pub sort: String,
    pub category: String,
    pub currency: String,
    pub show_on_mobile: String,
    pub price_type: String,
    pub show_similar: String,
    pub agents: String,
    pub page_size: u32,
    pub rooms_total: Vec<String>,
}

impl Default for SearchDefaults {
    fn default() -> Self {
        Self {
            page: 0,
            sort: "DATE_DESC".to_string(),
            category: "APARTMENT".to_string(),
            currency: "RUR".to_string(),
            show_on_mobile: "YES".to_string(),
            price_type: "PER_OFFER".to_string(),
            show_similar: "NO".to_string(),
            agents: "NO".to_string(),
            page_size: 20,
            rooms_total: vec![
                "STUDIO".to_string(),
                "1".to_string(),
                "2".to_string(),
                "3".to_string(),
                "PLUS_4".to_string(),
            ],
        }
    }
}

/// Per-shard search parameters. Every field is optional; `None` inherits the
/// global default. `rooms_total: Some(vec![])` removes the key entirely
/// (commercial shards filter by `commercial_type` instead).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ShardParams {
    /// "RENT" or "SELL"; serialized as the `type` query key
    pub deal_type: Option<String>,
    pub rent_time: Option<String>,
    pub object_type: Option<String>,
    pub category: Option<String>,
    pub rooms_total: Option<Vec<String>>,
    pub commercial_type: Option<Vec<String>>,
    pub price_min: Option<PriceBound>,
    pub price_max: Option<PriceBound>,
}
