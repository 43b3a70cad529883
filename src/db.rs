use crate::config::AppConfig;
use crate::errors::ServiceError;
use sea_orm::{
    ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DbBackend, Statement,
};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Type alias for a database connection pool
pub type DbPool = DatabaseConnection;

/// Establishes a connection pool using the application configuration.
pub async fn establish_connection(cfg: &AppConfig) -> Result<DbPool, ServiceError> {
    debug!(url = %cfg.database_url, "Configuring database connection");

    let mut opt = ConnectOptions::new(cfg.database_url.clone());
    opt.max_connections(cfg.db_max_connections)
        .min_connections(cfg.db_min_connections)
        .connect_timeout(Duration::from_secs(30))
        .acquire_timeout(Duration::from_secs(8))
        .idle_timeout(Duration::from_secs(600))
        .sqlx_logging(false);

    let pool = Database::connect(opt).await?;

    info!(
        max_connections = cfg.db_max_connections,
        "Database connection established"
    );

    Ok(pool)
}

/// Creates the schema in place for SQLite deployments (development and the
/// test harness). Postgres schemas are managed externally.
pub async fn ensure_schema(db: &DatabaseConnection) -> Result<(), ServiceError> {
    if db.get_database_backend() != DbBackend::Sqlite {
        warn!("auto_schema requested on a non-SQLite backend; skipping");
        return Ok(());
    }

    let statements = [
        r#"CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            email TEXT NOT NULL,
            name TEXT NOT NULL,
            phone TEXT,
            addresses TEXT NOT NULL DEFAULT '[]',
            created_at TEXT NOT NULL,
            updated_at TEXT
        )"#,
        r#"CREATE TABLE IF NOT EXISTS products (
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            price REAL NOT NULL,
            discount REAL NOT NULL DEFAULT 0,
            stock INTEGER NOT NULL DEFAULT 0,
            order_count INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT
        )"#,
        r#"CREATE TABLE IF NOT EXISTS coupons (
            id TEXT PRIMARY KEY,
            code TEXT NOT NULL UNIQUE,
            percentage REAL NOT NULL,
            created_at TEXT NOT NULL
        )"#,
        r#"CREATE TABLE IF NOT EXISTS coupon_redemptions (
            id TEXT PRIMARY KEY,
            coupon_id TEXT NOT NULL,
            user_id TEXT NOT NULL,
            redeemed_at TEXT NOT NULL,
            UNIQUE (coupon_id, user_id)
        )"#,
        r#"CREATE TABLE IF NOT EXISTS carts (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL UNIQUE,
            created_at TEXT NOT NULL,
            updated_at TEXT
        )"#,
        r#"CREATE TABLE IF NOT EXISTS cart_items (
            id TEXT PRIMARY KEY,
            cart_id TEXT NOT NULL,
            product_id TEXT NOT NULL,
            quantity INTEGER NOT NULL,
            created_at TEXT NOT NULL
        )"#,
        r#"CREATE TABLE IF NOT EXISTS orders (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            shipping_address TEXT NOT NULL,
            phone TEXT NOT NULL,
            payment_method TEXT NOT NULL,
            coupon_code TEXT,
            shipping_price REAL NOT NULL,
            total_price_before_discount REAL NOT NULL,
            total_price_after_discount REAL NOT NULL,
            total_price REAL NOT NULL,
            order_status TEXT NOT NULL,
            shipping_status TEXT NOT NULL,
            transaction_id TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT
        )"#,
        r#"CREATE TABLE IF NOT EXISTS order_items (
            id TEXT PRIMARY KEY,
            order_id TEXT NOT NULL,
            product_id TEXT NOT NULL,
            quantity INTEGER NOT NULL,
            price_at_order REAL NOT NULL,
            discount_at_order REAL NOT NULL,
            discounted_price_at_order REAL NOT NULL,
            created_at TEXT NOT NULL
        )"#,
    ];

    for ddl in statements {
        db.execute(Statement::from_string(DbBackend::Sqlite, ddl.to_string()))
            .await?;
    }

    info!("SQLite schema ensured");
    Ok(())
}
