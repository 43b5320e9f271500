use bip_reconcile::config::NotifierKind;
use bip_reconcile::db::{ensure_schema, PgStore};
use bip_reconcile::service::{
    scheduler, AbuseGuard, BadgeRecognizer, FileNotifier, HttpProductCatalog, HttpSalesFeed, JobSettings,
    Notifier, ProductCatalog, ReconciliationJob, ScanIngress, WebhookNotifier,
};
use bip_reconcile::{api, create_pool, AppConfig};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::fmt::time::ChronoLocal;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Local-time log format
    tracing_subscriber::fmt()
        .with_timer(ChronoLocal::new("%Y-%m-%d %H:%M:%S".to_string()))
        .with_target(true)
        .with_level(true)
        .init();

    let config = AppConfig::load()?;
    info!("Starting server with config: {:?}", config);

    let pool = create_pool(&config.database).await?;
    ensure_schema(&pool).await?;
    info!("Database pool created");
    let store = Arc::new(PgStore::new(pool));

    let catalog: Option<Arc<dyn ProductCatalog>> = match &config.catalog.url {
        Some(url) => {
            let catalog = HttpProductCatalog::new(url.clone(), Duration::from_secs(config.catalog.timeout_secs))?;
            Some(Arc::new(catalog) as Arc<dyn ProductCatalog>)
        }
        None => {
            info!("No product catalog configured, weight-embedded codes will be rejected");
            None
        }
    };

    let notify_timeout = Duration::from_secs(config.notifier.timeout_secs);
    let notifier: Arc<dyn Notifier> = match config.notifier.kind {
        NotifierKind::File => Arc::new(FileNotifier::new(config.notifier.output_dir.clone())),
        NotifierKind::Webhook => {
            let url = config
                .notifier
                .url
                .clone()
                .ok_or("notifier.url is required for the webhook notifier")?;
            Arc::new(WebhookNotifier::new(url, notify_timeout)?)
        }
    };

    let feed_timeout = Duration::from_secs(config.feed.timeout_secs);
    let feed = Arc::new(HttpSalesFeed::new(config.feed.url.clone(), feed_timeout)?);

    let offset = config.engine.offset();
    let ingress = Arc::new(ScanIngress::new(
        BadgeRecognizer::new(config.engine.badge_prefix.clone()),
        AbuseGuard::new(store.clone(), config.engine.abuse_threshold),
        catalog,
        offset,
    ));
    let job = Arc::new(ReconciliationJob::new(
        store.clone(),
        store,
        feed,
        notifier,
        JobSettings {
            tolerance_cents: config.engine.price_tolerance_cents,
            offset,
            feed_timeout,
            notify_timeout,
        },
    ));

    let _workers = scheduler::start(job.clone(), &config.schedule);

    let app = api::router(api::AppState { ingress, job });

    let addr = format!("{}:{}", config.server.host, config.server.port);
    info!("Server listening on {}", addr);
    info!("API Endpoints:");
    info!("  POST /api/bips                - scanner ingress");
    info!("  POST /api/reconcile           - reconcile a day (backfill)");
    info!("  GET  /api/reconcile/last      - last run report");
    info!("  POST /api/scans/:id/verify    - operator verify");
    info!("  GET  /api/sells/:date         - reconciled sales of a day");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
