//! 外部汇率 API 客户端
//!
//! `GET {url}?access_key=..&base=..&symbols=..`，响应形如
//! `{"rates": {"RUB": 91.3456, ...}}`。汇率以 JSON 数字下发，
//! 这里按其十进制文本解析为 `Decimal`，不经过浮点运算。

use std::collections::HashMap;
use std::str::FromStr;

use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use saga_shared::config::ExchangeApiConfig;
use saga_shared::observability::metrics;
use serde::Deserialize;
use tracing::{debug, instrument};

use crate::error::RateApiError;

/// 汇率数据源
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RateApi: Send + Sync {
    /// 拉取以基准币种计价的全部已配置汇率
    async fn fetch_rates(&self) -> Result<HashMap<String, Decimal>, RateApiError>;
}

#[derive(Debug, Deserialize)]
struct RatesResponse {
    rates: Option<HashMap<String, serde_json::Number>>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

/// 把响应中的数字转换为精确的十进制数
fn parse_rate(number: &serde_json::Number) -> Option<Decimal> {
    let text = number.to_string();
    Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .ok()
}

fn parse_body(body: RatesResponse) -> Result<HashMap<String, Decimal>, RateApiError> {
    let Some(raw_rates) = body.rates else {
        let detail = body
            .error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "缺少 rates 字段".to_string());
        return Err(RateApiError::Malformed(detail));
    };

    raw_rates
        .into_iter()
        .map(|(symbol, number)| match parse_rate(&number) {
            Some(rate) => Ok((symbol.to_ascii_uppercase(), rate)),
            None => Err(RateApiError::Malformed(format!("{symbol} 的汇率无法解析: {number}"))),
        })
        .collect()
}

/// 基于 reqwest 的汇率 API 客户端
#[derive(Clone)]
pub struct ExchangeRateClient {
    http: Client,
    url: String,
    access_key: String,
    base_currency: String,
    symbols: String,
}

impl ExchangeRateClient {
    pub fn new(config: &ExchangeApiConfig) -> Result<Self, RateApiError> {
        let http = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| RateApiError::Connection(format!("创建 HTTP 客户端失败: {e}")))?;

        Ok(Self {
            http,
            url: config.url.clone(),
            access_key: config.access_key.clone(),
            base_currency: config.base_currency.to_ascii_uppercase(),
            symbols: config.symbols.clone(),
        })
    }

    async fn request(&self) -> Result<HashMap<String, Decimal>, RateApiError> {
        let response = self
            .http
            .get(&self.url)
            .query(&[
                ("access_key", self.access_key.as_str()),
                ("base", self.base_currency.as_str()),
                ("symbols", self.symbols.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(RateApiError::Status {
                status: status.as_u16(),
            });
        }

        let body: RatesResponse = response.json().await?;
        parse_body(body)
    }
}

#[async_trait]
impl RateApi for ExchangeRateClient {
    #[instrument(skip(self), fields(base = %self.base_currency))]
    async fn fetch_rates(&self) -> Result<HashMap<String, Decimal>, RateApiError> {
        let result = self.request().await;
        match &result {
            Ok(rates) => {
                metrics::record_rate_api_request("success");
                debug!(symbols = rates.len(), "汇率 API 请求成功");
            }
            Err(e) => metrics::record_rate_api_request(e.status_label()),
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn body(json: &str) -> RatesResponse {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_parse_rates_keeps_decimal_text() {
        let rates = parse_body(body(r#"{"base":"USD","rates":{"RUB":91.3456,"EUR":0.92}}"#)).unwrap();
        assert_eq!(rates["RUB"], dec!(91.3456));
        assert_eq!(rates["EUR"], dec!(0.92));
    }

    #[test]
    fn test_parse_rates_accepts_scientific_notation() {
        let number: serde_json::Number = serde_json::from_str("1.5e-5").unwrap();
        assert_eq!(parse_rate(&number), Some(dec!(0.000015)));
    }

    #[test]
    fn test_missing_rates_is_malformed() {
        let err = parse_body(body(r#"{"success":false,"error":{"code":101}}"#)).unwrap_err();
        assert!(matches!(err, RateApiError::Malformed(ref detail) if detail.contains("101")));
        assert!(!err.is_transient());
    }

    #[test]
    fn test_client_builds_from_default_config() {
        let client = ExchangeRateClient::new(&ExchangeApiConfig::default()).unwrap();
        assert_eq!(client.base_currency, "USD");
    }
}
