pub mod alphavantage;
pub mod twelve;

use crate::config::Settings;
use crate::error::{EngineError, Result};
use crate::utils::parse_date;
use chrono::{Local, NaiveDate};
use reqwest::Client;
use serde_json::Value;
use std::fs;
use std::future::Future;
use tracing::{info, warn};

use super::{HistoricalData, Record};

/// Fetches every configured ticker plus the benchmark from the configured broker.
pub async fn fetch_data(settings: &Settings) -> Result<HistoricalData> {
    let broker = settings.data_api.source.to_lowercase();
    if broker != "alphavantage" && broker != "twelve" {
        return Err(EngineError::DataSource(format!(
            "Unsupported data broker specified: {}. Please open an issue, specifying your data broker and useful links.",
            settings.data_api.source
        )));
    }

    let start_date = parse_date(&settings.data_api.start_date)?;
    let end_date = parse_date(&settings.data_api.end_date)?;
    let client = Client::new();
    let client = &client;
    let broker_name = broker.as_str();

    collect_tickers(
        broker_name,
        settings.data_api.all_tickers(),
        start_date,
        end_date,
        move |ticker| async move {
            match broker_name {
                "alphavantage" => alphavantage::fetch_ticker(client, settings, &ticker).await,
                _ => twelve::fetch_ticker(client, settings, &ticker).await,
            }
        },
    )
    .await
}

/// Runs `fetch` for each ticker in turn. A ticker that fails is dropped with a
/// warning; the batch only fails when nothing could be fetched.
async fn collect_tickers<F, Fut>(
    source: &str,
    tickers: Vec<String>,
    start_date: NaiveDate,
    end_date: NaiveDate,
    mut fetch: F,
) -> Result<HistoricalData>
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = Result<Vec<Record>>>,
{
    let mut all_records = Vec::new();
    for ticker in tickers {
        match fetch(ticker.clone()).await {
            Ok(records) => {
                let before = all_records.len();
                all_records.extend(
                    records
                        .into_iter()
                        .filter(|r| within(&r.date, start_date, end_date)),
                );
                info!(%ticker, records = all_records.len() - before, "fetched prices");
            }
            Err(e) => warn!(%ticker, error = %e, "dropping ticker"),
        }
    }

    if all_records.is_empty() {
        return Err(EngineError::DataSource(format!(
            "No prices fetched from {} for any ticker",
            source
        )));
    }
    Ok(all_records)
}

fn within(date: &str, start: NaiveDate, end: NaiveDate) -> bool {
    date.get(..10)
        .and_then(|d| parse_date(d).ok())
        .map(|d| d >= start && d <= end)
        .unwrap_or(false)
}

fn close_record(date: &str, ticker: &str, close: &Value) -> Result<Record> {
    let close = close
        .as_str()
        .ok_or_else(|| EngineError::DataSource(format!("Missing close value for {}", ticker)))?;
    let price = close
        .parse::<f64>()
        .map_err(|e| EngineError::DataSource(format!("{} close {:?}: {}", ticker, close, e)))?;
    Ok(Record {
        date: date.to_string(),
        asset: ticker.to_string(),
        price,
    })
}

/// Saves the raw JSON API result in
/// data/raw/{ticker}/{timeframe}/{datetimenow}/{file_name}
fn save_api_result(json_val: &Value, ticker: &str, timeframe: &str, file_name: &str) -> Result<()> {
    let today = Local::now().format("%Y-%m-%d").to_string();
    let dir_path = format!("data/raw/{}/{}/{}", ticker, timeframe, today);
    fs::create_dir_all(&dir_path)?;
    fs::write(format!("{}/{}", dir_path, file_name), json_val.to_string())?;
    Ok(())
}
