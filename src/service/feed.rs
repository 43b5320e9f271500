use crate::error::CollaboratorError;
use crate::models::SaleRecord;
use async_trait::async_trait;
use chrono::NaiveDate;
use std::time::Duration;

/// Source of the completed POS sales of a business day
#[async_trait]
pub trait SalesFeed: Send + Sync {
    /// All sale lines of `date`. A day without sales is an empty list, not an error.
    async fn fetch_sales(&self, date: NaiveDate) -> Result<Vec<SaleRecord>, CollaboratorError>;
}

/// ERP sales endpoint: `GET {url}?date=YYYY-MM-DD` returning a JSON array of sale lines
pub struct HttpSalesFeed {
    client: reqwest::Client,
    url: String,
}

impl HttpSalesFeed {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, url: url.into() })
    }
}

#[async_trait]
impl SalesFeed for HttpSalesFeed {
    async fn fetch_sales(&self, date: NaiveDate) -> Result<Vec<SaleRecord>, CollaboratorError> {
        let date = date.format("%Y-%m-%d").to_string();
        let response = self
            .client
            .get(&self.url)
            .query(&[("date", date.as_str())])
            .send()
            .await?;
        if response.status() == reqwest::StatusCode::NO_CONTENT {
            return Ok(Vec::new());
        }
        let sales = response.error_for_status()?.json::<Option<Vec<SaleRecord>>>().await?;
        Ok(sales.unwrap_or_default())
    }
}
