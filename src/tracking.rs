//! Status Tracker: the append-only progress timeline of a contract.

use crate::{
    auth::Caller,
    contracts,
    database::{begin_write, get_enum, get_id},
    model::{validate_coordinates, NewStatusUpdate, StatusUpdate, StatusUpdateCorrection},
    pagination::{Page, PageRequest},
    shipments, ContractId, Database, MarketError, Result, StatusUpdateId,
};
use chrono::Utc;
use sqlx::{sqlite::SqliteRow, Executor, Row, Sqlite, SqlitePool};
use uuid::Uuid;

const UPDATE_COLUMNS: &str =
    "id, contract_id, status, latitude, longitude, notes, recorded_by, created_at";

fn update_from_row(row: &SqliteRow) -> Result<StatusUpdate> {
    Ok(StatusUpdate {
        id: get_id(row, "id")?,
        contract_id: get_id(row, "contract_id")?,
        status: get_enum(row, "status")?,
        latitude: row.try_get("latitude")?,
        longitude: row.try_get("longitude")?,
        notes: row.try_get("notes")?,
        recorded_by: get_id(row, "recorded_by")?,
        created_at: row.try_get("created_at")?,
    })
}

async fn require_update<'e, E>(executor: E, id: StatusUpdateId) -> Result<StatusUpdate>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sql = format!("SELECT {} FROM shipment_status_updates WHERE id = ?", UPDATE_COLUMNS);
    sqlx::query(&sql)
        .bind(id.to_string())
        .fetch_optional(executor)
        .await?
        .as_ref()
        .map(update_from_row)
        .transpose()?
        .ok_or_else(|| MarketError::not_found("status update", id))
}

#[derive(Clone)]
pub struct StatusTracker {
    pool: SqlitePool,
}

impl StatusTracker {
    pub fn new(db: &Database) -> Self {
        Self {
            pool: db.pool().clone(),
        }
    }

    /// Appends an event to the contract's timeline and moves the shipment
    /// along when the event implies it.
    pub async fn record(&self, caller: &Caller, request: NewStatusUpdate) -> Result<StatusUpdate> {
        request.validate()?;

        let mut tx = begin_write(&self.pool).await?;
        let contract = contracts::require_contract(&mut *tx, request.contract_id).await?;
        caller.require_self_or_admin(contract.carrier_id, "report progress on this contract")?;
        if !contract.status.accepts_tracking() {
            return Err(MarketError::conflict(format!(
                "contract is '{}'; progress can no longer be recorded",
                contract.status
            )));
        }

        let update = StatusUpdate {
            id: Uuid::new_v4(),
            contract_id: contract.id,
            status: request.status,
            latitude: request.latitude,
            longitude: request.longitude,
            notes: request.notes,
            recorded_by: caller.user_id,
            created_at: Utc::now(),
        };

        sqlx::query(
            r#"
            INSERT INTO shipment_status_updates
                (id, contract_id, status, latitude, longitude, notes, recorded_by, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(update.id.to_string())
        .bind(update.contract_id.to_string())
        .bind(update.status.as_str())
        .bind(update.latitude)
        .bind(update.longitude)
        .bind(&update.notes)
        .bind(update.recorded_by.to_string())
        .bind(update.created_at)
        .execute(&mut *tx)
        .await?;

        if let Some(effect) = update.status.shipment_effect() {
            shipments::advance_shipment(&mut *tx, contract.shipment_id, effect).await?;
        }

        tx.commit().await?;

        tracing::info!(
            status_update_id = %update.id,
            contract_id = %update.contract_id,
            status = %update.status,
            "status update recorded"
        );
        Ok(update)
    }

    pub async fn get(&self, id: StatusUpdateId) -> Result<StatusUpdate> {
        require_update(&self.pool, id).await
    }

    /// The contract's events, oldest first.
    pub async fn timeline(
        &self,
        contract_id: ContractId,
        page: PageRequest,
    ) -> Result<Page<StatusUpdate>> {
        contracts::require_contract(&self.pool, contract_id).await?;

        let total: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM shipment_status_updates WHERE contract_id = ?")
                .bind(contract_id.to_string())
                .fetch_one(&self.pool)
                .await?;

        let sql = format!(
            "SELECT {} FROM shipment_status_updates WHERE contract_id = ? \
             ORDER BY created_at ASC, rowid ASC LIMIT ? OFFSET ?",
            UPDATE_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(contract_id.to_string())
            .bind(i64::from(page.limit()))
            .bind(page.offset())
            .fetch_all(&self.pool)
            .await?;

        let data = rows.iter().map(update_from_row).collect::<Result<Vec<_>>>()?;
        Ok(Page::new(data, page, total))
    }

    /// Administrative correction. Does not replay shipment effects.
    pub async fn correct(
        &self,
        caller: &Caller,
        id: StatusUpdateId,
        correction: StatusUpdateCorrection,
    ) -> Result<StatusUpdate> {
        caller.require_admin("correct a status update")?;

        let mut update = require_update(&self.pool, id).await?;
        if let Some(status) = correction.status {
            update.status = status;
        }
        if let Some(latitude) = correction.latitude {
            update.latitude = latitude;
        }
        if let Some(longitude) = correction.longitude {
            update.longitude = longitude;
        }
        if let Some(notes) = correction.notes {
            update.notes = notes;
        }
        validate_coordinates(update.latitude, update.longitude)?;

        sqlx::query(
            r#"
            UPDATE shipment_status_updates
            SET status = ?, latitude = ?, longitude = ?, notes = ?
            WHERE id = ?
            "#,
        )
        .bind(update.status.as_str())
        .bind(update.latitude)
        .bind(update.longitude)
        .bind(&update.notes)
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        tracing::info!(status_update_id = %id, corrected_by = %caller.user_id, "status update corrected");
        Ok(update)
    }

    pub async fn delete(&self, caller: &Caller, id: StatusUpdateId) -> Result<()> {
        caller.require_admin("delete a status update")?;

        let result = sqlx::query("DELETE FROM shipment_status_updates WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(MarketError::not_found("status update", id));
        }

        tracing::info!(status_update_id = %id, deleted_by = %caller.user_id, "status update deleted");
        Ok(())
    }
}
