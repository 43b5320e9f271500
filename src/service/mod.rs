pub mod catalog;
pub mod decoder;
pub mod feed;
pub mod guard;
pub mod ingress;
pub mod matcher;
pub mod notifier;
pub mod reconcile;
pub mod scheduler;

pub use catalog::{HttpProductCatalog, ProductCatalog, ProductPricing};
pub use decoder::{decode, BadgeRecognizer, DecodedCode, Scheme};
pub use feed::{HttpSalesFeed, SalesFeed};
pub use guard::AbuseGuard;
pub use ingress::{IngressOutcome, ScanIngress, ScanRequest};
pub use matcher::{build_sells, verify_scans, SellPlan, VerificationResult};
pub use notifier::{FileNotifier, Notifier, WebhookNotifier};
pub use reconcile::{JobSettings, ReconciliationJob, RunPhase, RunReport};
