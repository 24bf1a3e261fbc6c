use crate::config::Settings;
use crate::data::Record;
use crate::error::{EngineError, Result};
use reqwest::Client;
use serde_json::Value;

use super::{close_record, save_api_result};

/// Alpha Vantage adjusted series for one ticker
pub async fn fetch_ticker(client: &Client, settings: &Settings, ticker: &str) -> Result<Vec<Record>> {
    let timeframe = settings.data_api.timeframe.to_lowercase();
    let (function, time_series_key) = match timeframe.as_str() {
        "daily" => ("TIME_SERIES_DAILY_ADJUSTED", "Time Series (Daily)"),
        "weekly" => ("TIME_SERIES_WEEKLY_ADJUSTED", "Weekly Adjusted Time Series"),
        "monthly" => ("TIME_SERIES_MONTHLY_ADJUSTED", "Monthly Adjusted Time Series"),
        _ => {
            return Err(EngineError::DataSource(format!(
                "Unsupported timeframe: {}",
                timeframe
            )))
        }
    };

    let url = format!(
        "https://www.alphavantage.co/query?function={function}&symbol={symbol}&outputsize=full&apikey={apikey}",
        function = function,
        symbol = ticker,
        apikey = settings.data_api.api_key
    );
    let json_val: Value = client.get(&url).send().await?.json().await?;
    save_api_result(&json_val, ticker, &timeframe, "raw_alphavantage.json")?;

    let series_obj = json_val[time_series_key].as_object().ok_or_else(|| {
        EngineError::DataSource(format!(
            "Could not parse time series JSON from Alpha Vantage for {}",
            ticker
        ))
    })?;

    series_obj
        .iter()
        .map(|(date, values)| close_record(date, ticker, &values["5. adjusted close"]))
        .collect()
}
