use crate::error::CollaboratorError;
use crate::models::to_cents;
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use serde::Deserialize;
use std::time::Duration;

/// Pricing of a counter product, in minor units per kilogram
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductPricing {
    pub description: String,
    pub full_price_cents_kg: i64,
    /// Zero when the product is not on offer.
    pub discount_price_cents_kg: i64,
}

impl ProductPricing {
    /// The per-kg price charged right now: the offer price when there is one.
    pub fn effective_price_cents_kg(&self) -> i64 {
        if self.discount_price_cents_kg > 0 {
            self.discount_price_cents_kg
        } else {
            self.full_price_cents_kg
        }
    }
}

/// Resolves a PLU into product pricing
#[async_trait]
pub trait ProductCatalog: Send + Sync {
    async fn lookup(&self, plu: &str) -> Result<Option<ProductPricing>, CollaboratorError>;
}

/// Product payload as served by the ERP products endpoint
#[derive(Debug, Deserialize)]
struct ErpProduct {
    #[serde(alias = "descricao")]
    description: String,
    #[serde(alias = "valvenda")]
    price: BigDecimal,
    #[serde(default, alias = "valoferta")]
    offer_price: Option<BigDecimal>,
}

impl From<ErpProduct> for ProductPricing {
    fn from(p: ErpProduct) -> Self {
        ProductPricing {
            description: p.description,
            full_price_cents_kg: to_cents(&p.price),
            discount_price_cents_kg: p.offer_price.as_ref().map(to_cents).unwrap_or(0).max(0),
        }
    }
}

/// ERP product lookup over HTTP: `GET {base_url}/{plu}`
pub struct HttpProductCatalog {
    client: reqwest::Client,
    base_url: String,
}

impl HttpProductCatalog {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }
}

#[async_trait]
impl ProductCatalog for HttpProductCatalog {
    async fn lookup(&self, plu: &str) -> Result<Option<ProductPricing>, CollaboratorError> {
        let url = format!("{}/{}", self.base_url.trim_end_matches('/'), plu);
        let response = self.client.get(&url).send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let product = response.error_for_status()?.json::<ErpProduct>().await?;
        Ok(Some(product.into()))
    }
}
