use crate::error::CollaboratorError;
use crate::models::ScanEvent;
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use std::path::PathBuf;
use std::time::Duration;

/// Delivers the day's unmatched scans as one document.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// `Ok(())` means the batch was delivered. Never called with an empty batch.
    async fn send_unmatched_batch(&self, scans: &[ScanEvent], date: NaiveDate) -> Result<(), CollaboratorError>;
}

const HEADER: [&str; 10] = [
    "id",
    "ean",
    "product_id",
    "description",
    "price",
    "weight",
    "event_date",
    "equipment_id",
    "employee_id",
    "store_code",
];

fn option_to_csv<T: ToString>(val: &Option<T>) -> String {
    val.as_ref().map(|v| v.to_string()).unwrap_or_default()
}

/// Renders the unmatched-scan document as CSV.
pub fn render_document(scans: &[ScanEvent]) -> Result<Vec<u8>, csv::Error> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(HEADER)?;

    for scan in scans {
        writer.write_record(&[
            scan.id.to_string(),
            scan.ean.clone(),
            scan.product_id.clone(),
            option_to_csv(&scan.description),
            BigDecimal::new(scan.price_cents.into(), 2).to_string(),
            option_to_csv(&scan.weight),
            scan.event_date.to_rfc3339(),
            option_to_csv(&scan.equipment_id),
            option_to_csv(&scan.employee_id),
            option_to_csv(&scan.store_code),
        ])?;
    }

    writer.into_inner().map_err(|e| e.into_error().into())
}

pub fn document_name(date: NaiveDate) -> String {
    format!("unmatched-{}.csv", date.format("%Y-%m-%d"))
}

/// Writes `unmatched-<date>.csv` into a directory
pub struct FileNotifier {
    output_dir: PathBuf,
}

impl FileNotifier {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }
}

#[async_trait]
impl Notifier for FileNotifier {
    async fn send_unmatched_batch(&self, scans: &[ScanEvent], date: NaiveDate) -> Result<(), CollaboratorError> {
        let document = render_document(scans)?;
        tokio::fs::create_dir_all(&self.output_dir).await?;

        let path = self.output_dir.join(document_name(date));
        tokio::fs::write(&path, document).await?;
        tracing::info!(path = %path.display(), scans = scans.len(), "Unmatched scans written");
        Ok(())
    }
}

/// POSTs the document to a webhook; any 2xx counts as delivered
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, url: url.into() })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn send_unmatched_batch(&self, scans: &[ScanEvent], date: NaiveDate) -> Result<(), CollaboratorError> {
        let document = render_document(scans)?;
        let response = self
            .client
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, "text/csv")
            .header(
                reqwest::header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", document_name(date)),
            )
            .body(document)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(CollaboratorError::Status {
                service: "webhook",
                status,
            });
        }
        tracing::info!(scans = scans.len(), %status, "Unmatched scans posted");
        Ok(())
    }
}
