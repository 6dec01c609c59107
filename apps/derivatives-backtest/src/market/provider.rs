//! Market data provider port and in-memory adapter.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::bar::PriceSeries;
use crate::error::ProviderError;

/// Environment variable read by [`ProviderContext::from_env`].
pub const API_KEY_ENV: &str = "MARKET_DATA_API_KEY";

/// Environment variable read by [`ProviderContext::from_env`].
pub const BASE_URL_ENV: &str = "MARKET_DATA_BASE_URL";

/// Bar frequency accepted by providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Frequency {
    /// One minute.
    Minute1,
    /// Five minutes.
    Minute5,
    /// Fifteen minutes.
    Minute15,
    /// Thirty minutes.
    Minute30,
    /// One hour.
    Hour1,
    /// One trading day.
    Day1,
}

impl Frequency {
    /// Provider wire code (e.g. `"5M"`).
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::Minute1 => "1M",
            Self::Minute5 => "5M",
            Self::Minute15 => "15M",
            Self::Minute30 => "30M",
            Self::Hour1 => "1H",
            Self::Day1 => "1D",
        }
    }

    /// Whether bars at this frequency are intraday.
    #[must_use]
    pub const fn is_intraday(self) -> bool {
        !matches!(self, Self::Day1)
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Frequency {
    type Err = ProviderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "1M" => Ok(Self::Minute1),
            "5M" => Ok(Self::Minute5),
            "15M" => Ok(Self::Minute15),
            "30M" => Ok(Self::Minute30),
            "1H" => Ok(Self::Hour1),
            "1D" => Ok(Self::Day1),
            _ => Err(ProviderError::UnsupportedFrequency(s.to_string())),
        }
    }
}

impl TryFrom<String> for Frequency {
    type Error = ProviderError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Frequency> for String {
    fn from(value: Frequency) -> Self {
        value.code().to_string()
    }
}

/// Credentials and endpoint handed explicitly to network-backed providers.
#[derive(Clone, Default)]
pub struct ProviderContext {
    api_key: Option<String>,
    base_url: Option<String>,
}

impl ProviderContext {
    /// Context with an API key and the provider's default endpoint.
    #[must_use]
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: Some(api_key.into()),
            base_url: None,
        }
    }

    /// Read `MARKET_DATA_API_KEY` / `MARKET_DATA_BASE_URL`; unset or empty values stay `None`.
    #[must_use]
    pub fn from_env() -> Self {
        let read = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());
        Self {
            api_key: read(API_KEY_ENV),
            base_url: read(BASE_URL_ENV),
        }
    }

    /// Override the endpoint.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// API key, or `MissingCredentials` naming `provider`.
    pub fn require_api_key(&self, provider: &str) -> Result<&str, ProviderError> {
        self.api_key
            .as_deref()
            .ok_or_else(|| ProviderError::MissingCredentials(provider.to_string()))
    }

    /// Endpoint override, if any.
    #[must_use]
    pub fn base_url(&self) -> Option<&str> {
        self.base_url.as_deref()
    }
}

impl fmt::Debug for ProviderContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderContext")
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .field("base_url", &self.base_url)
            .finish()
    }
}

/// Source of historical bars.
pub trait MarketDataProvider: Send + Sync {
    /// Full history for an instrument at `frequency`, ascending by timestamp.
    ///
    /// # Errors
    ///
    /// Returns an error if the instrument is unknown or has no data at this
    /// frequency.
    fn get_history(
        &self,
        instrument_id: &str,
        frequency: Frequency,
    ) -> Result<PriceSeries, ProviderError>;

    /// Instruments currently considered liquid enough to trade.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider cannot produce the list.
    fn list_liquid_instruments(&self) -> Result<BTreeSet<String>, ProviderError>;

    /// Provider name for logs.
    fn name(&self) -> &'static str;
}

/// In-memory provider for tests and offline runs.
#[derive(Debug, Default)]
pub struct InMemoryProvider {
    data: HashMap<(String, Frequency), PriceSeries>,
    liquid: BTreeSet<String>,
}

impl InMemoryProvider {
    /// Create an empty provider.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a series under its instrument id; the instrument is marked liquid.
    pub fn add_series(&mut self, frequency: Frequency, series: PriceSeries) {
        let instrument_id = series.instrument_id().to_string();
        self.liquid.insert(instrument_id.clone());
        self.data.insert((instrument_id, frequency), series);
    }

    /// Remove an instrument from the liquid set without dropping its data.
    pub fn mark_illiquid(&mut self, instrument_id: &str) {
        self.liquid.remove(instrument_id);
    }
}

impl MarketDataProvider for InMemoryProvider {
    fn get_history(
        &self,
        instrument_id: &str,
        frequency: Frequency,
    ) -> Result<PriceSeries, ProviderError> {
        if let Some(series) = self.data.get(&(instrument_id.to_string(), frequency)) {
            return Ok(series.clone());
        }

        if self.data.keys().any(|(id, _)| id == instrument_id) {
            Err(ProviderError::NoData {
                instrument_id: instrument_id.to_string(),
                frequency: frequency.to_string(),
            })
        } else {
            Err(ProviderError::UnknownInstrument(instrument_id.to_string()))
        }
    }

    fn list_liquid_instruments(&self) -> Result<BTreeSet<String>, ProviderError> {
        Ok(self.liquid.clone())
    }

    fn name(&self) -> &'static str {
        "InMemory"
    }
}
