use crate::config::Settings;
use crate::data::Record;
use crate::error::{EngineError, Result};
use reqwest::Client;
use serde_json::Value;

use super::{close_record, save_api_result};

const BASE_URL: &str = "https://api.twelvedata.com/time_series";

/// Twelve Data split/dividend adjusted series for one ticker
pub async fn fetch_ticker(client: &Client, settings: &Settings, ticker: &str) -> Result<Vec<Record>> {
    let timeframe = settings.data_api.timeframe.to_lowercase();
    // TODO: Expand to intraday
    let interval = match timeframe.as_str() {
        "daily" => "1day",
        "weekly" => "1week",
        "monthly" => "1month",
        _ => {
            return Err(EngineError::DataSource(format!(
                "Unsupported timeframe: {}",
                timeframe
            )))
        }
    };

    let url = format!(
        "{}?symbol={}&interval={}&adjust=all&outputsize=5000&apikey={}",
        BASE_URL, ticker, interval, settings.data_api.api_key
    );
    let json_val: Value = client.get(&url).send().await?.json().await?;
    save_api_result(&json_val, ticker, &timeframe, "raw.json")?;

    if json_val.get("status").and_then(Value::as_str) == Some("error") {
        return Err(EngineError::DataSource(format!(
            "Error from Twelve Data API for {}: {}",
            ticker,
            json_val.get("message").unwrap_or(&Value::Null)
        )));
    }

    let values = json_val
        .get("values")
        .and_then(Value::as_array)
        .ok_or_else(|| {
            EngineError::DataSource(format!(
                "Could not parse 'values' array from Twelve response for {}",
                ticker
            ))
        })?;

    values
        .iter()
        .filter_map(|entry| {
            let date = entry.get("datetime").and_then(Value::as_str)?;
            Some(close_record(date, ticker, entry.get("close").unwrap_or(&Value::Null)))
        })
        .collect()
}
