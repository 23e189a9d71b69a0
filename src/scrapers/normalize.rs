use crate::models::{ListingStatus, NewListing};
use crate::scrapers::types::{AddressComponent, Offer, RoomsTotal};
use regex::Regex;
use std::collections::HashMap;

/// Room id for the studio sentinel
const ROOM_ID_STUDIO: i32 = 1;
/// Room id for the "4 or more rooms" sentinel
const ROOM_ID_PLUS_4: i32 = 5;

/// Country code prepended during phone normalization
const COUNTRY_CODE: &str = "7";

/// Upstream commercial-type tags and the codes they resolve to in the
/// shared `rooms` table
pub const COMMERCIAL_TYPE_CODES: &[(&str, &str)] = &[
    ("OFFICE", "office"),
    ("RETAIL", "retail"),
    ("FREE_PURPOSE", "free_purpose"),
    ("WAREHOUSE", "warehouse"),
    ("MANUFACTURING", "manufacturing"),
    ("PUBLIC_CATERING", "public_catering"),
    ("AUTO_REPAIR", "auto_repair"),
    ("HOTEL", "hotel"),
    ("BUSINESS", "business"),
];

/// Display names for commercial types used in titles
const COMMERCIAL_TYPE_NAMES: &[(&str, &str)] = &[
    ("OFFICE", "Office"),
    ("RETAIL", "Retail space"),
    ("FREE_PURPOSE", "Free-purpose premises"),
    ("WAREHOUSE", "Warehouse"),
    ("MANUFACTURING", "Manufacturing"),
    ("PUBLIC_CATERING", "Catering"),
    ("AUTO_REPAIR", "Auto repair"),
    ("HOTEL", "Hotel"),
    ("BUSINESS", "Ready business"),
];

/// Pure mapper from one upstream offer to the internal listing shape.
///
/// Owned by exactly one worker; the commercial room lookup is resolved from
/// storage once at worker start and cached here for the worker's lifetime.
pub struct OfferMapper {
    source_id: i32,
    location_id: i32,
    category_id: i32,
    commercial: bool,
    commercial_rooms: HashMap<String, i32>,
    mobile_re: Regex,
    bare_mobile_re: Regex,
}

impl OfferMapper {
    pub fn new(
        source_id: i32,
        location_id: i32,
        category_id: i32,
        commercial: bool,
        commercial_rooms: HashMap<String, i32>,
    ) -> Self {
        Self {
            source_id,
            location_id,
            category_id,
            commercial,
            commercial_rooms,
            mobile_re: Regex::new(r"[78](9\d{9})").expect("mobile phone pattern"),
            bare_mobile_re: Regex::new(r"(9\d{9})").expect("bare mobile phone pattern"),
        }
    }

    /// Maps an offer to listing fields. Returns `None` only when the offer
    /// carries no id; classification gaps degrade to unknown-room listings
    /// instead of being dropped.
    pub fn map(&self, offer: &Offer) -> Option<NewListing> {
        let external_id = offer.external_id()?;

        let commercial_type = offer
            .commercial
            .as_ref()
            .and_then(|c| c.commercial_types.first())
            .cloned();
        let square_meters = offer.area.as_ref().and_then(|a| a.value);
        let price = offer.price.as_ref().and_then(|p| p.value);
        let floor = offer.floors_offered.first().copied();

        let phone = offer
            .author
            .as_ref()
            .and_then(|a| a.phones.first())
            .and_then(|raw| self.normalize_phone(raw));

        let location = offer.location.as_ref();
        let (city, street, house) = location
            .and_then(|l| l.structured_address.as_ref())
            .map(|addr| parse_address_components(&addr.component))
            .unwrap_or((None, None, None));

        Some(NewListing {
            external_id,
            source_id: self.source_id,
            category_id: self.category_id,
            location_id: self.location_id,
            room_id: self.room_id(offer, commercial_type.as_deref()),
            status: ListingStatus::New,
            title: self.build_title(commercial_type.as_deref(), offer, square_meters),
            address: location.and_then(|l| l.geocoder_address.clone()),
            city,
            street,
            house,
            price,
            square_meters,
            floor,
            floors_total: offer.floors_total,
            phone,
            url: offer.share_url.clone(),
            lat: location.and_then(|l| l.latitude),
            lng: location.and_then(|l| l.longitude),
        })
    }

    /// Room classification: residential offers go through the fixed rule
    /// table (studio sentinel, counts, 4-or-more sentinel); commercial
    /// offers resolve their type code through the cached lookup and stay
    /// unknown when the upstream omits the type.
    fn room_id(&self, offer: &Offer, commercial_type: Option<&str>) -> Option<i32> {
        if let Some(tag) = commercial_type {
            let code = COMMERCIAL_TYPE_CODES
                .iter()
                .find(|(t, _)| *t == tag)
                .map(|(_, code)| *code)?;
            return self.commercial_rooms.get(code).copied();
        }

        // Commercial shard without a reported type: never fall through to
        // the residential rules.
        if self.commercial {
            return None;
        }

        match &offer.rooms_total {
            None => Some(ROOM_ID_STUDIO),
            Some(RoomsTotal::Tag(tag)) => match tag.as_str() {
                "STUDIO" => Some(ROOM_ID_STUDIO),
                "PLUS_4" => Some(ROOM_ID_PLUS_4),
                other => other.parse::<i64>().ok().and_then(residential_room_id),
            },
            Some(RoomsTotal::Count(count)) => residential_room_id(*count),
        }
    }

    fn build_title(
        &self,
        commercial_type: Option<&str>,
        offer: &Offer,
        square_meters: Option<f64>,
    ) -> String {
        let area_suffix = square_meters
            .map(|sq| format!(", {sq} m²"))
            .unwrap_or_default();

        if let Some(name) = commercial_type.and_then(|tag| {
            COMMERCIAL_TYPE_NAMES
                .iter()
                .find(|(t, _)| *t == tag)
                .map(|(_, name)| *name)
        }) {
            return format!("{name}{area_suffix}");
        }

        if self.commercial {
            return format!("Commercial property{area_suffix}");
        }

        match room_count_label(&offer.rooms_total) {
            Some(rooms) => format!("{rooms}-room apartment{area_suffix}"),
            None => format!("Studio{area_suffix}"),
        }
    }

    /// Normalizes a raw phone string to the canonical 11-digit form:
    /// 10 digits get the country code prepended, 11 digits get their leading
    /// digit replaced, anything else is scanned for an embedded mobile number.
    pub fn normalize_phone(&self, raw: &str) -> Option<String> {
        let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();

        if digits.len() == 10 {
            return Some(format!("{COUNTRY_CODE}{digits}"));
        }
        if digits.len() == 11 {
            return Some(format!("{COUNTRY_CODE}{}", &digits[1..]));
        }

        if let Some(captures) = self.mobile_re.captures(&digits) {
            return Some(format!("{COUNTRY_CODE}{}", &captures[1]));
        }
        if let Some(captures) = self.bare_mobile_re.captures(&digits) {
            return Some(format!("{COUNTRY_CODE}{}", &captures[1]));
        }

        None
    }
}

fn residential_room_id(count: i64) -> Option<i32> {
    match count {
        1 => Some(2),
        2 => Some(3),
        3 => Some(4),
        n if n >= 4 => Some(ROOM_ID_PLUS_4),
        _ => None,
    }
}

fn room_count_label(rooms_total: &Option<RoomsTotal>) -> Option<String> {
    match rooms_total {
        Some(RoomsTotal::Count(count)) if *count > 0 => Some(count.to_string()),
        Some(RoomsTotal::Tag(tag)) => match tag.as_str() {
            "PLUS_4" => Some("4+".to_string()),
            "STUDIO" => None,
            other => other.parse::<i64>().ok().filter(|n| *n > 0).map(|n| n.to_string()),
        },
        _ => None,
    }
}

/// Walks the flat component list: the first CITY (or the first CITY_DISTRICT
/// when no CITY exists) becomes the city, the first STREET the street, the
/// first HOUSE the house. Later duplicates of a tag are ignored.
fn parse_address_components(
    components: &[AddressComponent],
) -> (Option<String>, Option<String>, Option<String>) {
    let mut city = None;
    let mut city_district = None;
    let mut street = None;
    let mut house = None;

    for component in components {
        if component.value.is_empty() {
            continue;
        }
        match component.region_type.as_str() {
            "CITY" => {
                if city.is_none() {
                    city = Some(component.value.clone());
                }
            }
            "CITY_DISTRICT" => {
                if city_district.is_none() {
                    city_district = Some(component.value.clone());
                }
            }
            "STREET" => {
                if street.is_none() {
                    street = Some(component.value.clone());
                }
            }
            "HOUSE" => {
                if house.is_none() {
                    house = Some(component.value.clone());
                }
            }
            _ => {}
        }
    }

    (city.or(city_district), street, house)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scrapers::types::{AuthorInfo, CommercialInfo, OfferId, ValueField};

    fn mapper() -> OfferMapper {
        OfferMapper::new(2, 1, 1, false, HashMap::new())
    }

    fn commercial_mapper() -> OfferMapper {
        let rooms = HashMap::from([("office".to_string(), 10), ("retail".to_string(), 11)]);
        OfferMapper::new(2, 1, 2, true, rooms)
    }

    fn offer_with_id(id: &str) -> Offer {
        Offer {
            offer_id: Some(OfferId::Text(id.to_string())),
            ..Offer::default()
        }
    }

    fn component(region_type: &str, value: &str) -> AddressComponent {
        AddressComponent {
            value: value.to_string(),
            region_type: region_type.to_string(),
        }
    }

    #[test]
    fn offer_without_id_is_rejected() {
        assert!(mapper().map(&Offer::default()).is_none());
    }

    #[test]
    fn residential_room_rule_table() {
        let m = mapper();
        let mut offer = offer_with_id("1");

        offer.rooms_total = Some(RoomsTotal::Tag("STUDIO".to_string()));
        assert_eq!(m.map(&offer).unwrap().room_id, Some(1));

        offer.rooms_total = Some(RoomsTotal::Count(2));
        assert_eq!(m.map(&offer).unwrap().room_id, Some(3));

        offer.rooms_total = Some(RoomsTotal::Tag("3".to_string()));
        assert_eq!(m.map(&offer).unwrap().room_id, Some(4));

        offer.rooms_total = Some(RoomsTotal::Count(7));
        assert_eq!(m.map(&offer).unwrap().room_id, Some(5));

        offer.rooms_total = Some(RoomsTotal::Tag("PLUS_4".to_string()));
        assert_eq!(m.map(&offer).unwrap().room_id, Some(5));

        // Missing room count counts as a studio
        offer.rooms_total = None;
        assert_eq!(m.map(&offer).unwrap().room_id, Some(1));
    }

    #[test]
    fn commercial_room_resolved_through_lookup() {
        let m = commercial_mapper();
        let mut offer = offer_with_id("1");
        offer.commercial = Some(CommercialInfo {
            commercial_types: vec!["OFFICE".to_string()],
        });
        let listing = m.map(&offer).unwrap();
        assert_eq!(listing.room_id, Some(10));
        assert_eq!(listing.title, "Office");
    }

    #[test]
    fn commercial_without_type_stays_unknown() {
        let m = commercial_mapper();
        let mut offer = offer_with_id("1");
        offer.area = Some(ValueField { value: Some(120.0) });
        let listing = m.map(&offer).unwrap();
        assert_eq!(listing.room_id, None);
        assert_eq!(listing.title, "Commercial property, 120 m²");
    }

    #[test]
    fn unknown_commercial_tag_yields_no_room() {
        let m = commercial_mapper();
        let mut offer = offer_with_id("1");
        offer.commercial = Some(CommercialInfo {
            commercial_types: vec!["SPACEPORT".to_string()],
        });
        assert_eq!(m.map(&offer).unwrap().room_id, None);
    }

    #[test]
    fn residential_titles() {
        let m = mapper();
        let mut offer = offer_with_id("1");
        offer.area = Some(ValueField { value: Some(54.0) });
        offer.rooms_total = Some(RoomsTotal::Count(2));
        assert_eq!(m.map(&offer).unwrap().title, "2-room apartment, 54 m²");

        offer.rooms_total = Some(RoomsTotal::Tag("STUDIO".to_string()));
        offer.area = Some(ValueField { value: Some(28.5) });
        assert_eq!(m.map(&offer).unwrap().title, "Studio, 28.5 m²");

        offer.rooms_total = Some(RoomsTotal::Tag("PLUS_4".to_string()));
        offer.area = None;
        assert_eq!(m.map(&offer).unwrap().title, "4+-room apartment");
    }

    #[test]
    fn first_city_wins_with_district_fallback() {
        let (city, street, house) = parse_address_components(&[
            component("CITY_DISTRICT", "Center"),
            component("CITY", "Moscow"),
            component("CITY", "Zelenograd"),
            component("STREET", "Tverskaya"),
            component("STREET", "Arbat"),
            component("HOUSE", "12"),
        ]);
        assert_eq!(city.as_deref(), Some("Moscow"));
        assert_eq!(street.as_deref(), Some("Tverskaya"));
        assert_eq!(house.as_deref(), Some("12"));

        let (city, _, _) = parse_address_components(&[component("CITY_DISTRICT", "Center")]);
        assert_eq!(city.as_deref(), Some("Center"));
    }

    #[test]
    fn empty_components_are_skipped() {
        let (city, street, house) =
            parse_address_components(&[component("CITY", ""), component("STREET", "Arbat")]);
        assert_eq!(city, None);
        assert_eq!(street.as_deref(), Some("Arbat"));
        assert_eq!(house, None);
    }

    #[test]
    fn phone_ten_digits_gets_country_code() {
        assert_eq!(
            mapper().normalize_phone("9261234567").as_deref(),
            Some("79261234567")
        );
    }

    #[test]
    fn phone_eleven_digits_replaces_leading_digit() {
        let m = mapper();
        assert_eq!(
            m.normalize_phone("89261234567").as_deref(),
            Some("79261234567")
        );
        assert_eq!(
            m.normalize_phone("+7 (926) 123-45-67").as_deref(),
            Some("79261234567")
        );
    }

    #[test]
    fn phone_embedded_mobile_is_recovered() {
        let m = mapper();
        // 16 digits of noise around a prefixed mobile number
        assert_eq!(
            m.normalize_phone("1234589261234567").as_deref(),
            Some("79261234567")
        );
        // 12 digits with a bare mobile number inside
        assert_eq!(
            m.normalize_phone("129161234567").as_deref(),
            Some("79161234567")
        );
    }

    #[test]
    fn phone_too_short_is_rejected() {
        let m = mapper();
        assert_eq!(m.normalize_phone("12345"), None);
        assert_eq!(m.normalize_phone("not a phone"), None);
    }

    #[test]
    fn full_offer_maps_to_listing() {
        let m = mapper();
        let mut offer = offer_with_id("987654321");
        offer.price = Some(ValueField { value: Some(45_000.0) });
        offer.area = Some(ValueField { value: Some(54.0) });
        offer.floors_offered = vec![7];
        offer.floors_total = Some(17);
        offer.rooms_total = Some(RoomsTotal::Count(2));
        offer.author = Some(AuthorInfo {
            phones: vec!["8 926 123 45 67".to_string()],
        });
        offer.share_url = Some("https://example.test/offer/987654321".to_string());

        let listing = m.map(&offer).unwrap();
        assert_eq!(listing.external_id, "987654321");
        assert_eq!(listing.source_id, 2);
        assert_eq!(listing.price, Some(45_000.0));
        assert_eq!(listing.floor, Some(7));
        assert_eq!(listing.floors_total, Some(17));
        assert_eq!(listing.phone.as_deref(), Some("79261234567"));
        assert_eq!(listing.status, ListingStatus::New);
    }
}
