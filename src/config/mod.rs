//! Configuration loading.
//!
//! Two CSV files describe the deployment: `exchanges.csv` activates venues
//! (name, API key, taker fee) and `assetpairs.csv` maps each canonical pair
//! to the per-venue symbol space, one column per venue plus an ISO-4217
//! column for the Kraken WebSocket dialect. Secrets never live in the CSV;
//! they come from the environment (see [`credentials`]).
//!
//! All failures here are [`GatewayError::Config`]: the only error kind
//! allowed to abort startup.

pub mod credentials;

pub use credentials::{secret_key_from_env, Credentials, SecretString};

use rust_decimal::Decimal;
use std::collections::HashMap;
use std::path::Path;

use crate::error::{GatewayError, Result};
use crate::types::{AssetPair, AssetPairTranslator};

pub const EXCHANGES_FILE: &str = "exchanges.csv";
pub const ASSET_PAIRS_FILE: &str = "assetpairs.csv";

/// Column holding Kraken's "XBT/USD"-style pair names.
pub const ISO4217_COLUMN: &str = "ISO4217";

/// One activated venue from `exchanges.csv`.
#[derive(Debug, Clone)]
pub struct VenueEntry {
    pub name: String,
    pub api_key: String,
    /// Taker fee as a fraction, for the arbitrage loop's edge computation.
    pub fee: Decimal,
}

/// Parsed deployment configuration.
#[derive(Debug, Clone, Default)]
pub struct Settings {
    pub venues: Vec<VenueEntry>,
    /// Canonical pair labels, indexed by [`AssetPair`] id (the row order).
    pub pair_names: Vec<String>,
    translators: HashMap<String, AssetPairTranslator>,
}

impl Settings {
    /// Loads `exchanges.csv` and `assetpairs.csv` from `dir`.
    pub fn load(dir: &Path) -> Result<Self> {
        let venues = load_exchanges(&dir.join(EXCHANGES_FILE))?;
        let (pair_names, translators) = load_asset_pairs(&dir.join(ASSET_PAIRS_FILE))?;
        Ok(Self { venues, pair_names, translators })
    }

    /// Symbol translator for one venue column. Venues a pair's cell leaves
    /// empty simply don't appear in that venue's map.
    pub fn translator(&self, venue: &str) -> Result<AssetPairTranslator> {
        self.translators
            .get(venue)
            .cloned()
            .ok_or_else(|| GatewayError::Config(format!("no asset pair column for {}", venue)))
    }

    pub fn iso4217_translator(&self) -> Result<AssetPairTranslator> {
        self.translator(ISO4217_COLUMN)
    }
}

fn load_exchanges(path: &Path) -> Result<Vec<VenueEntry>> {
    let mut reader = csv::Reader::from_path(path)
        .map_err(|e| GatewayError::Config(format!("{}: {}", path.display(), e)))?;

    let headers = reader
        .headers()
        .map_err(|e| GatewayError::Config(format!("{}: {}", path.display(), e)))?
        .clone();
    let expected = ["exchange", "api_key", "fees"];
    let found: Vec<&str> = headers.iter().collect();
    if found != expected {
        return Err(GatewayError::Config(format!(
            "{}: expected header {:?}, found {:?}",
            path.display(),
            expected,
            found
        )));
    }

    let mut venues = Vec::new();
    for record in reader.records() {
        let record =
            record.map_err(|e| GatewayError::Config(format!("{}: {}", path.display(), e)))?;
        let name = record.get(0).unwrap_or("").trim().to_string();
        let api_key = record.get(1).unwrap_or("").trim().to_string();
        let fee_str = record.get(2).unwrap_or("").trim();
        if name.is_empty() || api_key.is_empty() {
            return Err(GatewayError::Config(format!(
                "{}: exchange and api_key must be non-empty",
                path.display()
            )));
        }
        let fee = fee_str.parse::<Decimal>().map_err(|e| {
            GatewayError::Config(format!("{}: bad fee {:?}: {}", path.display(), fee_str, e))
        })?;
        venues.push(VenueEntry { name, api_key, fee });
    }
    Ok(venues)
}

fn load_asset_pairs(
    path: &Path,
) -> Result<(Vec<String>, HashMap<String, AssetPairTranslator>)> {
    let mut reader = csv::Reader::from_path(path)
        .map_err(|e| GatewayError::Config(format!("{}: {}", path.display(), e)))?;

    let headers = reader
        .headers()
        .map_err(|e| GatewayError::Config(format!("{}: {}", path.display(), e)))?
        .clone();
    if headers.get(0).map(str::trim) != Some("canonical") {
        return Err(GatewayError::Config(format!(
            "{}: first column must be 'canonical'",
            path.display()
        )));
    }

    let columns: Vec<String> =
        headers.iter().skip(1).map(|h| h.trim().to_string()).collect();
    let mut translators: HashMap<String, AssetPairTranslator> =
        columns.iter().map(|c| (c.clone(), AssetPairTranslator::default())).collect();

    let mut pair_names = Vec::new();
    for (row, record) in reader.records().enumerate() {
        let record =
            record.map_err(|e| GatewayError::Config(format!("{}: {}", path.display(), e)))?;
        let canonical = record.get(0).unwrap_or("").trim().to_string();
        if canonical.is_empty() {
            return Err(GatewayError::Config(format!(
                "{}: row {} has an empty canonical name",
                path.display(),
                row + 1
            )));
        }
        let pair = AssetPair(row as u32);
        for (column_index, column) in columns.iter().enumerate() {
            let symbol = record.get(column_index + 1).unwrap_or("").trim();
            if symbol.is_empty() {
                // empty cell: pair unsupported on that venue
                continue;
            }
            if let Some(translator) = translators.get_mut(column) {
                translator.insert(pair, symbol.to_string());
            }
        }
        pair_names.push(canonical);
    }

    Ok((pair_names, translators))
}
