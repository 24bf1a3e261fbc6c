pub mod data_brokers;

use crate::config::Settings;
use crate::error::{EngineError, Result};
use crate::utils::parse_date;
use chrono::NaiveDate;
use ndarray::{Array1, Array2, Axis};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

#[derive(Debug, Clone, Deserialize)]
pub struct Record {
    pub date: String,
    pub asset: String,
    pub price: f64,
}

pub type HistoricalData = Vec<Record>;

/// Aligned adjusted-close prices on a shared calendar.
///
/// `prices` has shape (n_dates, n_assets); dates are strictly increasing.
#[derive(Debug, Clone)]
pub struct PriceSeries {
    dates: Vec<NaiveDate>,
    assets: Vec<String>,
    prices: Array2<f64>,
}

impl PriceSeries {
    pub fn new(dates: Vec<NaiveDate>, assets: Vec<String>, prices: Array2<f64>) -> Result<Self> {
        if prices.dim() != (dates.len(), assets.len()) {
            return Err(EngineError::InvalidParameter(format!(
                "price table is {:?}, expected ({}, {})",
                prices.dim(),
                dates.len(),
                assets.len()
            )));
        }
        if dates.windows(2).any(|w| w[0] >= w[1]) {
            return Err(EngineError::InvalidParameter(
                "price dates must be strictly increasing".into(),
            ));
        }
        for ((row, col), &price) in prices.indexed_iter() {
            if !price.is_finite() || price <= 0.0 {
                return Err(EngineError::InvalidPrice {
                    asset: assets[col].clone(),
                    date: dates[row].to_string(),
                    price,
                });
            }
        }
        Ok(Self {
            dates,
            assets,
            prices,
        })
    }

    /// Builds the table from long-format records: outer join on dates, then keep only
    /// the dates on which every asset has a price.
    pub fn from_records(data: &HistoricalData) -> Result<Self> {
        let mut by_date: BTreeMap<NaiveDate, BTreeMap<String, f64>> = BTreeMap::new();
        let mut asset_set = BTreeSet::new();
        for record in data {
            // Intraday stamps like "2020-02-26 15:59:00" keep only the date part
            let date = parse_date(record.date.get(..10).unwrap_or(record.date.as_str()))?;
            asset_set.insert(record.asset.clone());
            by_date
                .entry(date)
                .or_default()
                .insert(record.asset.clone(), record.price);
        }
        let assets: Vec<String> = asset_set.into_iter().collect();
        if assets.is_empty() {
            return Err(EngineError::DataSource("No assets found in data.".into()));
        }

        let total_dates = by_date.len();
        let complete: Vec<(NaiveDate, Vec<f64>)> = by_date
            .into_iter()
            .filter_map(|(date, row)| {
                let prices: Option<Vec<f64>> =
                    assets.iter().map(|a| row.get(a).copied()).collect();
                prices.map(|p| (date, p))
            })
            .collect();
        if complete.len() < total_dates {
            debug!(
                dropped = total_dates - complete.len(),
                "dropped dates missing at least one asset"
            );
        }

        let dates: Vec<NaiveDate> = complete.iter().map(|(d, _)| *d).collect();
        let flat: Vec<f64> = complete.into_iter().flat_map(|(_, p)| p).collect();
        let prices = Array2::from_shape_vec((dates.len(), assets.len()), flat)
            .map_err(|e| EngineError::InvalidParameter(e.to_string()))?;
        Self::new(dates, assets, prices)
    }

    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    pub fn assets(&self) -> &[String] {
        &self.assets
    }

    pub fn prices(&self) -> &Array2<f64> {
        &self.prices
    }

    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    /// Prices of one asset, if present.
    pub fn column(&self, asset: &str) -> Option<Array1<f64>> {
        let idx = self.assets.iter().position(|a| a == asset)?;
        Some(self.prices.column(idx).to_owned())
    }

    /// Rows whose date falls in `[start, end]`.
    pub fn window(&self, start: NaiveDate, end: NaiveDate) -> Self {
        let rows: Vec<usize> = self
            .dates
            .iter()
            .enumerate()
            .filter(|(_, d)| **d >= start && **d <= end)
            .map(|(i, _)| i)
            .collect();
        Self {
            dates: rows.iter().map(|&i| self.dates[i]).collect(),
            assets: self.assets.clone(),
            prices: self.prices.select(Axis(0), &rows),
        }
    }

    /// Removes `asset` from the table and returns it as a separate single-column series.
    pub fn split_off(&self, asset: &str) -> Result<(Self, Self)> {
        let idx = self
            .assets
            .iter()
            .position(|a| a == asset)
            .ok_or_else(|| EngineError::DataSource(format!("{} not present in price data", asset)))?;
        let keep: Vec<usize> = (0..self.assets.len()).filter(|&i| i != idx).collect();
        let rest = Self {
            dates: self.dates.clone(),
            assets: keep.iter().map(|&i| self.assets[i].clone()).collect(),
            prices: self.prices.select(Axis(1), &keep),
        };
        let single = Self {
            dates: self.dates.clone(),
            assets: vec![asset.to_string()],
            prices: self.prices.select(Axis(1), &[idx]),
        };
        Ok((rest, single))
    }
}

/// Reads a wide CSV (first column date, one column per asset) into HistoricalData.
/// Blank or unparsable cells are skipped and later removed by date alignment.
pub fn read_csv(path: &str) -> Result<HistoricalData> {
    let mut rdr = csv::Reader::from_path(path)?;
    let headers = rdr.headers()?.clone();
    let mut data = Vec::new();

    for result in rdr.records() {
        let record = result?;
        let date = match record.get(0) {
            Some(d) if !d.is_empty() => d.to_string(),
            _ => continue,
        };
        for (i, asset_name) in headers.iter().enumerate().skip(1) {
            if let Some(price) = record.get(i).and_then(|s| s.parse::<f64>().ok()) {
                data.push(Record {
                    date: date.clone(),
                    asset: asset_name.to_string(),
                    price,
                });
            }
        }
    }
    Ok(data)
}

/// Keeps only the records of `tickers`. A ticker without any record is dropped
/// with a warning; an empty selection is an error.
pub fn select_tickers(data: HistoricalData, tickers: &[String]) -> Result<HistoricalData> {
    let present: BTreeSet<&str> = data.iter().map(|r| r.asset.as_str()).collect();
    for ticker in tickers {
        if !present.contains(ticker.as_str()) {
            warn!(%ticker, "dropping ticker");
        }
    }
    let selected: HistoricalData = data
        .into_iter()
        .filter(|r| tickers.contains(&r.asset))
        .collect();
    if selected.is_empty() {
        return Err(EngineError::DataSource(format!(
            "None of the configured tickers {:?} found in price data",
            tickers
        )));
    }
    Ok(selected)
}

/// Loads prices from the configured source.
pub async fn fetch_data(settings: &Settings) -> Result<HistoricalData> {
    let data = match settings.general.data_source.as_str() {
        "csv" => select_tickers(
            read_csv(&settings.general.data_file)?,
            &settings.data_api.all_tickers(),
        )?,
        "api" => data_brokers::fetch_data(settings).await?,
        other => {
            return Err(EngineError::DataSource(format!(
                "Unknown data source specified: {}",
                other
            )))
        }
    };
    if data.is_empty() {
        warn!(source = %settings.general.data_source, "data source returned no records");
    }
    Ok(data)
}
