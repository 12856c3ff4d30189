//! Exchange REST client
//!
//! Fetches level-3 order book snapshots used to seed each live book.

use std::time::Duration;

use reqwest::header::{ACCEPT, CONTENT_TYPE};
use tracing::debug;

use crate::error::{QuoteError, Result};
use crate::parser::RawBook;
use crate::products;

/// REST client bound to an exchange API base URL
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: reqwest::Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        if base_url.is_empty() {
            return Err(QuoteError::Config("missing REST API URL".to_string()));
        }

        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Fetch the order book for a product at the given level. Live books
    /// always request level 3; levels 1 and 2 return aggregated tuples.
    pub async fn get_book(&self, product_id: &str, level: u8) -> Result<RawBook> {
        if !products::is_valid_product_id(product_id) {
            return Err(QuoteError::InvalidProduct(product_id.to_string()));
        }
        if !(1..=3).contains(&level) {
            return Err(QuoteError::Internal(format!(
                "order book level must be 1, 2, or 3, got {level}"
            )));
        }

        let url = format!("{}/products/{}/book?level={}", self.base_url, product_id, level);
        debug!(url = %url, "fetching order book snapshot");

        let response = self
            .client
            .get(&url)
            .header(ACCEPT, "application/json")
            .header(CONTENT_TYPE, "application/json; charset=utf-8")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(QuoteError::SnapshotStatus {
                status: status.as_u16(),
            });
        }

        let body = response.bytes().await?;
        let raw: RawBook = serde_json::from_slice(&body)?;
        Ok(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_base_url_is_rejected() {
        let err = ApiClient::new("", Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, QuoteError::Config(_)));
    }

    #[test]
    fn test_trailing_slash_is_trimmed() {
        let client = ApiClient::new("https://api.example.com/", Duration::from_secs(1)).unwrap();
        assert_eq!(client.base_url, "https://api.example.com");
    }

    #[tokio::test]
    async fn test_unknown_product_is_rejected() {
        let client = ApiClient::new("https://api.example.com", Duration::from_secs(1)).unwrap();
        let err = client.get_book("DOGE-USD", 3).await.unwrap_err();
        assert!(matches!(err, QuoteError::InvalidProduct(_)));
    }

    #[tokio::test]
    async fn test_out_of_range_level_is_rejected() {
        let client = ApiClient::new("https://api.example.com", Duration::from_secs(1)).unwrap();
        let err = client.get_book("BTC-USD", 4).await.unwrap_err();
        assert!(matches!(err, QuoteError::Internal(_)));
    }
}
