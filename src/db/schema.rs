use sqlx::PgPool;

const CREATE_BIPS: &str = r#"
CREATE TABLE IF NOT EXISTS bips (
    id                       BIGSERIAL PRIMARY KEY,
    ean                      VARCHAR(20) NOT NULL,
    product_id               VARCHAR(20) NOT NULL,
    price_cents              BIGINT NOT NULL,
    weight                   NUMERIC(12, 3),
    description              TEXT,
    full_price_cents_kg      BIGINT,
    discount_price_cents_kg  BIGINT,
    event_date               TIMESTAMPTZ NOT NULL,
    equipment_id             BIGINT,
    employee_id              VARCHAR(64),
    receipt                  VARCHAR(50),
    store_code               INTEGER,
    status                   VARCHAR(20) NOT NULL DEFAULT 'pending'
                             CHECK (status IN ('pending', 'verified', 'cancelled')),
    notified_at              TIMESTAMPTZ
)
"#;

const CREATE_BIPS_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_bips_ean_event_date ON bips (ean, event_date)
"#;

const CREATE_SELLS: &str = r#"
CREATE TABLE IF NOT EXISTS sells (
    id               BIGSERIAL PRIMARY KEY,
    product_id       VARCHAR(20) NOT NULL,
    description      TEXT NOT NULL DEFAULT '',
    sell_date        TIMESTAMP NOT NULL,
    value_cents      BIGINT NOT NULL,
    quantity         NUMERIC(12, 3) NOT NULL,
    scan_id          BIGINT REFERENCES bips (id),
    receipt          VARCHAR(50) NOT NULL,
    pos_code         INTEGER,
    operator_code    INTEGER,
    operator_name    TEXT,
    status           VARCHAR(20) NOT NULL
                     CHECK (status IN ('verified', 'not_verified', 'cancelled')),
    discount_cents   BIGINT NOT NULL DEFAULT 0,
    UNIQUE (product_id, quantity, receipt)
)
"#;

/// Creates the engine tables if they are missing. Safe to run on every start.
pub async fn ensure_schema(pool: &PgPool) -> Result<(), sqlx::Error> {
    for statement in [CREATE_BIPS, CREATE_BIPS_INDEX, CREATE_SELLS] {
        sqlx::query(statement).execute(pool).await?;
    }
    tracing::info!("Schema ready");
    Ok(())
}
