//! Channel price lists
//!
//! Prices are integer cents. A `PriceList` can only be constructed non-empty,
//! so a channel row can never carry an empty list.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::OnceLock;
use thiserror::Error;

const MAX_AD_TYPES: usize = 10;

/// Price in cents
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Price(pub u64);

impl Price {
    pub fn cents(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${}.{:02}", self.0 / 100, self.0 % 100)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PriceListError {
    #[error("price list is empty")]
    Empty,
    #[error("could not read line `{0}`, expected `ad_type: price`")]
    Malformed(String),
    #[error("price for `{0}` must be greater than zero")]
    ZeroPrice(String),
    #[error("ad type `{0}` is listed twice")]
    Duplicate(String),
    #[error("at most {MAX_AD_TYPES} ad types are allowed")]
    TooMany,
}

/// Mapping from ad type to price, never empty
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "BTreeMap<String, Price>", into = "BTreeMap<String, Price>")]
pub struct PriceList(BTreeMap<String, Price>);

impl PriceList {
    pub fn new(prices: BTreeMap<String, Price>) -> Result<Self, PriceListError> {
        if prices.is_empty() {
            return Err(PriceListError::Empty);
        }
        if prices.len() > MAX_AD_TYPES {
            return Err(PriceListError::TooMany);
        }
        if let Some((ad_type, _)) = prices.iter().find(|(_, p)| p.0 == 0) {
            return Err(PriceListError::ZeroPrice(ad_type.clone()));
        }
        Ok(Self(prices))
    }

    /// Parse owner input such as `post: 100` / `story: 12.50`, one entry per
    /// line or separated by commas or semicolons.
    pub fn parse(text: &str) -> Result<Self, PriceListError> {
        let mut prices = BTreeMap::new();
        for entry in text
            .split(['\n', ',', ';'])
            .map(str::trim)
            .filter(|e| !e.is_empty())
        {
            let (ad_type, price) = parse_entry(entry)?;
            if prices.insert(ad_type.clone(), price).is_some() {
                return Err(PriceListError::Duplicate(ad_type));
            }
        }
        Self::new(prices)
    }

    pub fn get(&self, ad_type: &str) -> Option<Price> {
        self.0.get(ad_type).copied()
    }

    pub fn contains(&self, ad_type: &str) -> bool {
        self.0.contains_key(ad_type)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Price)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Always false; present for API symmetry with `len`
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Bullet list used in replies
    pub fn summary(&self) -> String {
        self.iter()
            .map(|(ad_type, price)| format!("• {ad_type}: {price}"))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl TryFrom<BTreeMap<String, Price>> for PriceList {
    type Error = PriceListError;

    fn try_from(value: BTreeMap<String, Price>) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<PriceList> for BTreeMap<String, Price> {
    fn from(value: PriceList) -> Self {
        value.0
    }
}

fn entry_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^([a-z][a-z0-9_]{0,31})\s*[:=]\s*\$?(\d{1,9})(?:\.(\d{1,2}))?$")
            .expect("static price pattern")
    })
}

fn parse_entry(entry: &str) -> Result<(String, Price), PriceListError> {
    let lowered = entry.to_lowercase();
    let caps = entry_pattern()
        .captures(&lowered)
        .ok_or_else(|| PriceListError::Malformed(entry.to_string()))?;

    let ad_type = caps[1].to_string();
    let whole: u64 = caps[2]
        .parse()
        .map_err(|_| PriceListError::Malformed(entry.to_string()))?;
    let fraction = match caps.get(3).map(|m| m.as_str()) {
        None => 0,
        Some(f) if f.len() == 1 => f.parse::<u64>().unwrap_or(0) * 10,
        Some(f) => f.parse::<u64>().unwrap_or(0),
    };

    let price = Price(whole * 100 + fraction);
    if price.0 == 0 {
        return Err(PriceListError::ZeroPrice(ad_type));
    }
    Ok((ad_type, price))
}
