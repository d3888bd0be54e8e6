//! Immutable topic and country tables shared by the scoring components.
//!
//! A [`TopicCatalog`] is built once at startup and handed to every component that needs
//! keyword lists, source sites, extraction schemas, or boundary levels. Lookups are by value
//! and never mutate the catalog.

use std::collections::BTreeMap;

use serde::Serialize;

/// Whether larger numeric readings are better or worse for residents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NumericDirection {
    HigherIsBetter,
    LowerIsBetter,
}

/// Value shape the language model must produce for one schema field.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SignalKind {
    Qualitative,
    Numeric {
        max: f64,
        unit: &'static str,
        direction: NumericDirection,
    },
}

/// One field of a topic's extraction schema.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SignalField {
    pub name: &'static str,
    pub description: &'static str,
    #[serde(flatten)]
    pub kind: SignalKind,
}

impl SignalField {
    const fn qualitative(name: &'static str, description: &'static str) -> Self {
        Self {
            name,
            description,
            kind: SignalKind::Qualitative,
        }
    }

    const fn numeric(
        name: &'static str,
        description: &'static str,
        max: f64,
        unit: &'static str,
        direction: NumericDirection,
    ) -> Self {
        Self {
            name,
            description,
            kind: SignalKind::Numeric {
                max,
                unit,
                direction,
            },
        }
    }
}

/// Keywords, preferred sources, and extraction schema for one topic.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TopicProfile {
    pub name: String,
    pub keywords: Vec<String>,
    pub sites: Vec<String>,
    pub fields: Vec<SignalField>,
}

impl TopicProfile {
    pub fn field(&self, name: &str) -> Option<&SignalField> {
        self.fields.iter().find(|field| field.name == name)
    }

    /// Generic profile used for topics outside the standard table.
    pub fn generic(topic: &str) -> Self {
        let keywords = topic
            .split_whitespace()
            .map(|word| word.to_lowercase())
            .collect();

        Self {
            name: normalize_key(topic),
            keywords,
            sites: Vec::new(),
            fields: vec![
                SignalField::qualitative(
                    "overall_condition",
                    "overall state of this aspect in the district",
                ),
                SignalField::qualitative(
                    "resident_sentiment",
                    "how residents describe this aspect of the district",
                ),
                SignalField::qualitative(
                    "official_assessment",
                    "how official statistics or audits rate the district",
                ),
                SignalField::qualitative(
                    "recent_trend",
                    "whether the situation has recently improved (good) or worsened (poor)",
                ),
            ],
        }
    }
}

/// Boundary levels and search hints for one country.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CountryProfile {
    pub name: String,
    pub district_levels: Vec<String>,
    pub search_language: String,
    pub recency_terms: Vec<String>,
}

impl CountryProfile {
    fn fallback(country: &str) -> Self {
        Self {
            name: country.trim().to_string(),
            district_levels: vec!["7".to_string(), "8".to_string()],
            search_language: "English".to_string(),
            recency_terms: Vec::new(),
        }
    }
}

/// Lookup table for topic and country configuration.
#[derive(Debug, Clone, Default)]
pub struct TopicCatalog {
    topics: BTreeMap<String, TopicProfile>,
    countries: BTreeMap<String, CountryProfile>,
}

impl TopicCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_topic(mut self, profile: TopicProfile) -> Self {
        self.topics.insert(normalize_key(&profile.name), profile);
        self
    }

    pub fn with_country(mut self, profile: CountryProfile) -> Self {
        self.countries.insert(normalize_key(&profile.name), profile);
        self
    }

    /// Catalog with the built-in topics and countries.
    pub fn standard() -> Self {
        standard_topics()
            .into_iter()
            .fold(Self::new(), Self::with_topic)
            .with_country(CountryProfile {
                name: "Taiwan".to_string(),
                district_levels: vec!["7".to_string(), "8".to_string()],
                search_language: "Traditional Chinese".to_string(),
                recency_terms: strings(&["113年", "114年", "2024", "2025"]),
            })
            .with_country(CountryProfile {
                name: "Japan".to_string(),
                district_levels: vec!["7".to_string(), "8".to_string()],
                search_language: "Japanese".to_string(),
                recency_terms: strings(&["2024", "2025"]),
            })
    }

    /// Resolve a topic, falling back to a generic profile for unknown names.
    pub fn topic(&self, topic: &str) -> TopicProfile {
        self.topics
            .get(&normalize_key(topic))
            .cloned()
            .unwrap_or_else(|| TopicProfile::generic(topic))
    }

    pub fn country(&self, country: &str) -> CountryProfile {
        self.countries
            .get(&normalize_key(country))
            .cloned()
            .unwrap_or_else(|| CountryProfile::fallback(country))
    }

    pub fn topics(&self) -> impl Iterator<Item = &TopicProfile> {
        self.topics.values()
    }

    pub fn is_known_topic(&self, topic: &str) -> bool {
        self.topics.contains_key(&normalize_key(topic))
    }
}

fn normalize_key(value: &str) -> String {
    value
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|value| value.to_string()).collect()
}

fn standard_topics() -> Vec<TopicProfile> {
    use NumericDirection::{HigherIsBetter, LowerIsBetter};

    vec![
        TopicProfile {
            name: "cleanliness".to_string(),
            keywords: strings(&[
                "clean", "litter", "garbage", "trash", "recycling", "sanitation", "清潔隊",
                "資源回收", "垃圾", "衛生", "乾淨", "回收率",
            ]),
            sites: strings(&[
                "epa.gov.tw",
                "moenv.gov.tw",
                "udn.com",
                "ltn.com.tw",
                "chinatimes.com",
                "ettoday.net",
                "g0v.tw",
                "cna.com.tw",
                "ptt.cc",
                "mobile01.com",
            ]),
            fields: vec![
                SignalField::qualitative("street_cleanliness", "litter and upkeep of streets"),
                SignalField::qualitative("park_cleanliness", "upkeep of parks and public spaces"),
                SignalField::qualitative(
                    "waste_collection",
                    "reliability of garbage collection services",
                ),
                SignalField::qualitative(
                    "public_toilet_hygiene",
                    "hygiene of public restrooms",
                ),
                SignalField::numeric(
                    "recycling_rate",
                    "share of household waste recycled",
                    100.0,
                    "percent",
                    HigherIsBetter,
                ),
            ],
        },
        TopicProfile {
            name: "air quality".to_string(),
            keywords: strings(&[
                "air quality", "aqi", "pm2.5", "pollution", "smog", "emission", "空氣品質",
                "空污", "污染", "監測站", "空品",
            ]),
            sites: strings(&[
                "airtw.moenv.gov.tw",
                "moenv.gov.tw",
                "epa.gov.tw",
                "udn.com",
                "ltn.com.tw",
                "ettoday.net",
                "ptt.cc",
            ]),
            fields: vec![
                SignalField::numeric(
                    "aqi",
                    "typical air quality index reading",
                    500.0,
                    "AQI",
                    LowerIsBetter,
                ),
                SignalField::numeric(
                    "pm25",
                    "typical PM2.5 concentration",
                    250.0,
                    "µg/m³",
                    LowerIsBetter,
                ),
                SignalField::qualitative(
                    "industrial_pollution",
                    "absence of factories and industrial emitters nearby",
                ),
                SignalField::qualitative(
                    "traffic_emissions",
                    "absence of heavy traffic exhaust",
                ),
                SignalField::qualitative("green_coverage", "parks, trees, and green space"),
            ],
        },
        TopicProfile {
            name: "safety".to_string(),
            keywords: strings(&[
                "crime", "safety", "police", "theft", "burglary", "robbery", "治安", "犯罪率",
                "刑案", "警", "竊盜",
            ]),
            sites: strings(&[
                "police.gov.tw",
                "npa.gov.tw",
                "udn.com",
                "ltn.com.tw",
                "ettoday.net",
                "chinatimes.com",
                "ptt.cc",
            ]),
            fields: vec![
                SignalField::numeric(
                    "crime_rate",
                    "reported crimes per 1,000 residents per year",
                    100.0,
                    "per 1,000 residents",
                    LowerIsBetter,
                ),
                SignalField::qualitative("violent_crime", "rarity of violent crime"),
                SignalField::qualitative("theft_and_burglary", "rarity of theft and burglary"),
                SignalField::qualitative("night_time_safety", "how safe streets feel at night"),
                SignalField::qualitative("police_presence", "visibility of police patrols"),
            ],
        },
        TopicProfile {
            name: "cost of living".to_string(),
            keywords: strings(&[
                "rent", "housing price", "cost of living", "price per", "affordable", "房價",
                "租金", "生活成本", "物價", "實價登錄", "每坪",
            ]),
            sites: strings(&[
                "591.com.tw",
                "houseprice.tw",
                "numbeo.com",
                "mobile01.com",
                "ptt.cc",
                "udn.com",
                "ltn.com.tw",
            ]),
            fields: vec![
                SignalField::numeric(
                    "monthly_rent",
                    "typical rent for a one-bedroom apartment",
                    5000.0,
                    "USD per month",
                    LowerIsBetter,
                ),
                SignalField::numeric(
                    "property_price_per_sqm",
                    "typical purchase price per square metre",
                    20000.0,
                    "USD per square metre",
                    LowerIsBetter,
                ),
                SignalField::qualitative("grocery_prices", "affordability of groceries"),
                SignalField::qualitative("utility_costs", "affordability of utilities"),
                SignalField::qualitative(
                    "affordability",
                    "overall affordability relative to local incomes",
                ),
            ],
        },
    ]
}
