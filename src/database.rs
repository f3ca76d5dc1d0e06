use crate::{config::DatabaseConfig, MarketError, Result};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
    Row, Sqlite, SqlitePool, Transaction,
};
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new(database_url: &str) -> Result<Self> {
        Self::connect(&DatabaseConfig {
            url: database_url.to_string(),
            ..DatabaseConfig::default()
        })
        .await
    }

    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(&config.url)?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections.unwrap_or(10))
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_seconds.unwrap_or(30)))
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.migrate().await?;
        tracing::info!(url = %config.url, "database ready");
        Ok(db)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                email TEXT NOT NULL UNIQUE,
                role TEXT NOT NULL,
                rating REAL,
                trips_completed INTEGER NOT NULL DEFAULT 0,
                created_at DATETIME NOT NULL
            );

            CREATE TABLE IF NOT EXISTS cargo_types (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL UNIQUE,
                created_at DATETIME NOT NULL
            );

            CREATE TABLE IF NOT EXISTS vehicle_types (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL UNIQUE,
                created_at DATETIME NOT NULL
            );

            CREATE TABLE IF NOT EXISTS vehicles (
                id TEXT PRIMARY KEY,
                owner_id TEXT NOT NULL,
                vehicle_type_id TEXT NOT NULL,
                plate_number TEXT NOT NULL,
                created_at DATETIME NOT NULL,
                FOREIGN KEY (owner_id) REFERENCES users(id),
                FOREIGN KEY (vehicle_type_id) REFERENCES vehicle_types(id)
            );

            CREATE TABLE IF NOT EXISTS shipments (
                id TEXT PRIMARY KEY,
                owner_id TEXT NOT NULL,
                cargo_type_id TEXT NOT NULL,
                cargo_description TEXT,
                weight_kg REAL NOT NULL CHECK (weight_kg > 0),
                volume_m3 REAL,
                pickup_location TEXT NOT NULL,
                pickup_time DATETIME NOT NULL,
                delivery_location TEXT NOT NULL,
                delivery_time DATETIME NOT NULL,
                vehicle_type_id TEXT,
                price_offer REAL,
                status TEXT NOT NULL,
                created_at DATETIME NOT NULL,
                updated_at DATETIME NOT NULL,
                FOREIGN KEY (owner_id) REFERENCES users(id),
                FOREIGN KEY (cargo_type_id) REFERENCES cargo_types(id),
                FOREIGN KEY (vehicle_type_id) REFERENCES vehicle_types(id)
            );

            CREATE TABLE IF NOT EXISTS shipment_offers (
                id TEXT PRIMARY KEY,
                shipment_id TEXT NOT NULL,
                carrier_id TEXT NOT NULL,
                vehicle_id TEXT NOT NULL,
                proposed_price REAL NOT NULL CHECK (proposed_price > 0),
                proposed_pickup_time DATETIME,
                proposed_delivery_time DATETIME,
                message TEXT,
                status TEXT NOT NULL,
                created_at DATETIME NOT NULL,
                updated_at DATETIME NOT NULL,
                FOREIGN KEY (shipment_id) REFERENCES shipments(id),
                FOREIGN KEY (carrier_id) REFERENCES users(id),
                FOREIGN KEY (vehicle_id) REFERENCES vehicles(id)
            );

            CREATE TABLE IF NOT EXISTS shipment_contracts (
                id TEXT PRIMARY KEY,
                shipment_id TEXT NOT NULL UNIQUE,
                offer_id TEXT NOT NULL UNIQUE,
                final_price REAL NOT NULL CHECK (final_price > 0),
                terms TEXT,
                notes TEXT,
                status TEXT NOT NULL,
                created_at DATETIME NOT NULL,
                updated_at DATETIME NOT NULL,
                completed_at DATETIME,
                FOREIGN KEY (shipment_id) REFERENCES shipments(id),
                FOREIGN KEY (offer_id) REFERENCES shipment_offers(id)
            );

            CREATE TABLE IF NOT EXISTS shipment_status_updates (
                id TEXT PRIMARY KEY,
                contract_id TEXT NOT NULL,
                status TEXT NOT NULL,
                latitude REAL CHECK (latitude BETWEEN -90 AND 90),
                longitude REAL CHECK (longitude BETWEEN -180 AND 180),
                notes TEXT,
                recorded_by TEXT NOT NULL,
                created_at DATETIME NOT NULL,
                FOREIGN KEY (contract_id) REFERENCES shipment_contracts(id) ON DELETE CASCADE,
                FOREIGN KEY (recorded_by) REFERENCES users(id)
            );

            CREATE TABLE IF NOT EXISTS user_reviews (
                id TEXT PRIMARY KEY,
                reviewer_id TEXT NOT NULL,
                reviewed_user_id TEXT NOT NULL,
                contract_id TEXT NOT NULL,
                rating INTEGER NOT NULL CHECK (rating BETWEEN 1 AND 10),
                comment TEXT,
                created_at DATETIME NOT NULL,
                updated_at DATETIME NOT NULL,
                UNIQUE (reviewer_id, contract_id),
                CHECK (reviewer_id <> reviewed_user_id),
                FOREIGN KEY (reviewer_id) REFERENCES users(id),
                FOREIGN KEY (reviewed_user_id) REFERENCES users(id),
                FOREIGN KEY (contract_id) REFERENCES shipment_contracts(id)
            );

            CREATE INDEX IF NOT EXISTS idx_users_role ON users(role);
            CREATE INDEX IF NOT EXISTS idx_shipments_status ON shipments(status);
            CREATE INDEX IF NOT EXISTS idx_shipments_owner ON shipments(owner_id);
            CREATE INDEX IF NOT EXISTS idx_offers_shipment ON shipment_offers(shipment_id, status);
            CREATE INDEX IF NOT EXISTS idx_offers_carrier ON shipment_offers(carrier_id);
            CREATE INDEX IF NOT EXISTS idx_status_updates_contract ON shipment_status_updates(contract_id, created_at);
            CREATE INDEX IF NOT EXISTS idx_reviews_reviewed ON user_reviews(reviewed_user_id);
            CREATE INDEX IF NOT EXISTS idx_reviews_contract ON user_reviews(contract_id);
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

/// Opens a transaction whose first statement is a write, so it holds the
/// SQLite write lock before it reads. Concurrent writers then queue on the
/// busy timeout rather than failing with a stale WAL snapshot.
pub(crate) async fn begin_write(pool: &SqlitePool) -> Result<Transaction<'static, Sqlite>> {
    let mut tx = pool.begin().await?;
    sqlx::query("UPDATE users SET id = id WHERE id = ''")
        .execute(&mut *tx)
        .await?;
    Ok(tx)
}

pub(crate) fn get_id(row: &SqliteRow, column: &str) -> Result<Uuid> {
    let raw: String = row.try_get(column)?;
    Ok(Uuid::parse_str(&raw)?)
}

pub(crate) fn get_opt_id(row: &SqliteRow, column: &str) -> Result<Option<Uuid>> {
    let raw: Option<String> = row.try_get(column)?;
    raw.map(|s| Uuid::parse_str(&s)).transpose().map_err(Into::into)
}

pub(crate) fn get_enum<T>(row: &SqliteRow, column: &str) -> Result<T>
where
    T: FromStr<Err = MarketError>,
{
    let raw: String = row.try_get(column)?;
    raw.parse()
        .map_err(|_| MarketError::Serialization(format!("corrupt {} value '{}'", column, raw)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[tokio::test]
    async fn migration_is_idempotent() {
        let temp_file = NamedTempFile::new().unwrap();
        let db_url = format!("sqlite://{}", temp_file.path().to_string_lossy());

        let first = Database::new(&db_url).await.unwrap();
        first.migrate().await.unwrap();
        drop(first);

        let second = Database::new(&db_url).await.unwrap();
        let row = sqlx::query(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name LIKE 'shipment%'",
        )
        .fetch_one(second.pool())
        .await
        .unwrap();
        let tables: i64 = row.get(0);
        assert_eq!(tables, 4);
    }

    async fn insert_cargo_type(tx: &mut Transaction<'static, Sqlite>, name: &str) -> Result<()> {
        sqlx::query("INSERT INTO cargo_types (id, name, created_at) VALUES (?, ?, ?)")
            .bind(Uuid::new_v4().to_string())
            .bind(name)
            .bind(chrono::Utc::now())
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    #[tokio::test]
    async fn write_transactions_queue_instead_of_failing() {
        let temp_file = NamedTempFile::new().unwrap();
        let db_url = format!("sqlite://{}", temp_file.path().to_string_lossy());
        let db = Database::new(&db_url).await.unwrap();

        let first = async {
            let mut tx = begin_write(db.pool()).await?;
            let _: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM cargo_types")
                .fetch_one(&mut *tx)
                .await?;
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            insert_cargo_type(&mut tx, "Reefer").await?;
            tx.commit().await?;
            Ok::<_, MarketError>(())
        };
        let second = async {
            let mut tx = begin_write(db.pool()).await?;
            let _: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM cargo_types")
                .fetch_one(&mut *tx)
                .await?;
            insert_cargo_type(&mut tx, "Bulk").await?;
            tx.commit().await?;
            Ok::<_, MarketError>(())
        };

        let (a, b) = tokio::join!(first, second);
        a.unwrap();
        b.unwrap();

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM cargo_types")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(count, 2);
    }
}
