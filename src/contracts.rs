//! Contract formation.
//!
//! A contract only ever comes into existence through [`form_contract`], which
//! accepts one offer, rejects its siblings, activates the shipment and inserts
//! the contract inside the caller's transaction. Each step is a conditional
//! update checked by affected-row count; the UNIQUE columns on
//! `shipment_contracts` are the last guard against double booking.

use crate::{
    auth::Caller,
    database::{begin_write, get_enum, get_id},
    model::{
        check_contract_transition, validate_price, Contract,
        ContractStatus, ContractUpdate, NewContract, OfferStatus, ShipmentStatus,
    },
    offers,
    pagination::{Page, PageRequest},
    shipments, ContractId, Database, MarketError, Result, ShipmentId, UserId,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::{sqlite::SqliteRow, Executor, QueryBuilder, Row, Sqlite, SqliteConnection, SqlitePool};
use uuid::Uuid;

const CONTRACT_SELECT: &str = "SELECT c.id, c.shipment_id, c.offer_id, s.owner_id AS shipper_id, \
     o.carrier_id AS carrier_id, c.final_price, c.terms, c.notes, c.status, c.created_at, \
     c.updated_at, c.completed_at \
     FROM shipment_contracts c \
     JOIN shipments s ON s.id = c.shipment_id \
     JOIN shipment_offers o ON o.id = c.offer_id";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContractFilter {
    pub status: Option<ContractStatus>,
    pub shipment_id: Option<ShipmentId>,
    pub shipper_id: Option<UserId>,
    pub carrier_id: Option<UserId>,
}

fn contract_from_row(row: &SqliteRow) -> Result<Contract> {
    Ok(Contract {
        id: get_id(row, "id")?,
        shipment_id: get_id(row, "shipment_id")?,
        offer_id: get_id(row, "offer_id")?,
        shipper_id: get_id(row, "shipper_id")?,
        carrier_id: get_id(row, "carrier_id")?,
        final_price: row.try_get("final_price")?,
        terms: row.try_get("terms")?,
        notes: row.try_get("notes")?,
        status: get_enum(row, "status")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        completed_at: row.try_get("completed_at")?,
    })
}

pub(crate) async fn find_contract<'e, E>(executor: E, id: ContractId) -> Result<Option<Contract>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sql = format!("{} WHERE c.id = ?", CONTRACT_SELECT);
    let row = sqlx::query(&sql)
        .bind(id.to_string())
        .fetch_optional(executor)
        .await?;
    row.as_ref().map(contract_from_row).transpose()
}

pub(crate) async fn require_contract<'e, E>(executor: E, id: ContractId) -> Result<Contract>
where
    E: Executor<'e, Database = Sqlite>,
{
    find_contract(executor, id)
        .await?
        .ok_or_else(|| MarketError::not_found("contract", id))
}

pub(crate) async fn find_for_shipment<'e, E>(
    executor: E,
    shipment_id: ShipmentId,
) -> Result<Option<Contract>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sql = format!("{} WHERE c.shipment_id = ?", CONTRACT_SELECT);
    let row = sqlx::query(&sql)
        .bind(shipment_id.to_string())
        .fetch_optional(executor)
        .await?;
    row.as_ref().map(contract_from_row).transpose()
}

/// The acceptance unit. Must run inside a transaction opened with
/// [`begin_write`]; the caller commits.
pub(crate) async fn form_contract(
    conn: &mut SqliteConnection,
    request: &NewContract,
) -> Result<Contract> {
    request.validate()?;
    let now = Utc::now();

    let claimed = sqlx::query(
        r#"
        UPDATE shipments SET status = ?, updated_at = ?
        WHERE id = ? AND status = ?
          AND EXISTS (
              SELECT 1 FROM shipment_offers
              WHERE id = ? AND shipment_id = shipments.id AND status = ?
          )
        "#,
    )
    .bind(ShipmentStatus::Active.as_str())
    .bind(now)
    .bind(request.shipment_id.to_string())
    .bind(ShipmentStatus::Pending.as_str())
    .bind(request.offer_id.to_string())
    .bind(OfferStatus::Pending.as_str())
    .execute(&mut *conn)
    .await?;

    if claimed.rows_affected() == 0 {
        return Err(explain_rejected_acceptance(conn, request).await);
    }

    let accepted = offers::transition_offer(
        &mut *conn,
        request.offer_id,
        OfferStatus::Pending,
        OfferStatus::Accepted,
    )
    .await?;
    if !accepted {
        return Err(MarketError::conflict("offer is no longer pending"));
    }

    let rejected =
        offers::reject_open_offers(&mut *conn, request.shipment_id, Some(request.offer_id)).await?;

    let contract_id = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO shipment_contracts (id, shipment_id, offer_id, final_price, terms, notes, status,
            created_at, updated_at, completed_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, NULL)
        "#,
    )
    .bind(contract_id.to_string())
    .bind(request.shipment_id.to_string())
    .bind(request.offer_id.to_string())
    .bind(request.final_price)
    .bind(&request.terms)
    .bind(&request.notes)
    .bind(ContractStatus::Active.as_str())
    .bind(now)
    .bind(now)
    .execute(&mut *conn)
    .await?;

    tracing::info!(
        contract_id = %contract_id,
        shipment_id = %request.shipment_id,
        offer_id = %request.offer_id,
        final_price = request.final_price,
        rejected_siblings = rejected,
        "offer accepted, contract formed"
    );

    require_contract(&mut *conn, contract_id).await
}

/// Works out why the acceptance compare-and-swap matched no row.
async fn explain_rejected_acceptance(conn: &mut SqliteConnection, request: &NewContract) -> MarketError {
    match diagnose_acceptance(conn, request).await {
        Ok(err) | Err(err) => err,
    }
}

async fn diagnose_acceptance(
    conn: &mut SqliteConnection,
    request: &NewContract,
) -> Result<MarketError> {
    let Some(shipment) = shipments::find_shipment(&mut *conn, request.shipment_id).await? else {
        return Ok(MarketError::not_found("shipment", request.shipment_id));
    };
    let Some(offer) = offers::find_offer(&mut *conn, request.offer_id).await? else {
        return Ok(MarketError::not_found("offer", request.offer_id));
    };
    if offer.shipment_id != shipment.id {
        return Ok(MarketError::validation(format!(
            "offer {} does not belong to shipment {}",
            offer.id, shipment.id
        )));
    }
    if let Some(existing) = find_for_shipment(&mut *conn, shipment.id).await? {
        return Ok(MarketError::conflict(format!(
            "shipment already has contract {}",
            existing.id
        )));
    }
    if shipment.status != ShipmentStatus::Pending {
        return Ok(MarketError::conflict(format!(
            "shipment is no longer pending (status '{}')",
            shipment.status
        )));
    }
    if offer.status != OfferStatus::Pending {
        return Ok(MarketError::conflict(format!(
            "offer has already been resolved (status '{}')",
            offer.status
        )));
    }
    Ok(MarketError::conflict(
        "shipment or offer changed concurrently; re-fetch and retry",
    ))
}

fn push_filters(qb: &mut QueryBuilder<'_, Sqlite>, filter: &ContractFilter) {
    qb.push(" WHERE 1 = 1");
    if let Some(status) = filter.status {
        qb.push(" AND c.status = ").push_bind(status.as_str());
    }
    if let Some(shipment) = filter.shipment_id {
        qb.push(" AND c.shipment_id = ").push_bind(shipment.to_string());
    }
    if let Some(shipper) = filter.shipper_id {
        qb.push(" AND s.owner_id = ").push_bind(shipper.to_string());
    }
    if let Some(carrier) = filter.carrier_id {
        qb.push(" AND o.carrier_id = ").push_bind(carrier.to_string());
    }
}

/// Contract Formation.
#[derive(Clone)]
pub struct ContractService {
    pool: SqlitePool,
}

impl ContractService {
    pub fn new(db: &Database) -> Self {
        Self {
            pool: db.pool().clone(),
        }
    }

    /// Forms a contract by accepting `offer_id` at `final_price`.
    pub async fn create(&self, caller: &Caller, request: NewContract) -> Result<Contract> {
        request.validate()?;

        // Ownership never changes, so it can be checked before the transaction.
        let shipment = shipments::require_shipment(&self.pool, request.shipment_id).await?;
        caller.require_self_or_admin(shipment.owner_id, "contract this shipment")?;

        let mut tx = begin_write(&self.pool).await?;
        let contract = form_contract(&mut *tx, &request).await?;
        tx.commit().await?;
        Ok(contract)
    }

    pub async fn get(&self, id: ContractId) -> Result<Contract> {
        require_contract(&self.pool, id).await
    }

    pub async fn get_by_shipment(&self, shipment_id: ShipmentId) -> Result<Contract> {
        find_for_shipment(&self.pool, shipment_id)
            .await?
            .ok_or_else(|| MarketError::not_found("contract for shipment", shipment_id))
    }

    pub async fn list(&self, filter: &ContractFilter, page: PageRequest) -> Result<Page<Contract>> {
        let mut count = QueryBuilder::<Sqlite>::new(
            "SELECT COUNT(*) FROM shipment_contracts c \
             JOIN shipments s ON s.id = c.shipment_id \
             JOIN shipment_offers o ON o.id = c.offer_id",
        );
        push_filters(&mut count, filter);
        let total: i64 = count.build_query_scalar().fetch_one(&self.pool).await?;

        let mut query = QueryBuilder::<Sqlite>::new(CONTRACT_SELECT);
        push_filters(&mut query, filter);
        query
            .push(" ORDER BY c.created_at DESC, c.rowid DESC LIMIT ")
            .push_bind(i64::from(page.limit()))
            .push(" OFFSET ")
            .push_bind(page.offset());

        let rows = query.build().fetch_all(&self.pool).await?;
        let data = rows.iter().map(contract_from_row).collect::<Result<Vec<_>>>()?;
        Ok(Page::new(data, page, total))
    }

    pub async fn update(
        &self,
        caller: &Caller,
        id: ContractId,
        update: ContractUpdate,
    ) -> Result<Contract> {
        let mut tx = begin_write(&self.pool).await?;

        let current = require_contract(&mut *tx, id).await?;
        if !current.is_party(caller.user_id) {
            caller.require_admin("update a contract they are not party to")?;
        }

        let final_price = match update.final_price {
            Some(price) => {
                validate_price("Final price", price)?;
                price
            }
            None => current.final_price,
        };
        let terms = update.terms.clone().unwrap_or_else(|| current.terms.clone());
        let notes = update.notes.clone().unwrap_or_else(|| current.notes.clone());

        let status = update.status.unwrap_or(current.status);
        let status_changed = status != current.status;
        if status_changed {
            check_contract_transition(current.status, status)?;
        }

        let now = Utc::now();
        let completed_at = if status_changed && status == ContractStatus::Completed {
            Some(now)
        } else {
            current.completed_at
        };

        let result = sqlx::query(
            r#"
            UPDATE shipment_contracts
            SET final_price = ?, terms = ?, notes = ?, status = ?, updated_at = ?, completed_at = ?
            WHERE id = ? AND status = ?
            "#,
        )
        .bind(final_price)
        .bind(&terms)
        .bind(&notes)
        .bind(status.as_str())
        .bind(now)
        .bind(completed_at)
        .bind(id.to_string())
        .bind(current.status.as_str())
        .execute(&mut *tx)
        .await?;
        if result.rows_affected() == 0 {
            return Err(MarketError::conflict(
                "contract was modified concurrently; re-fetch and retry",
            ));
        }

        if status_changed {
            if let Some(effect) = status.shipment_effect() {
                shipments::advance_shipment(&mut *tx, current.shipment_id, effect).await?;
            }
        }

        let contract = require_contract(&mut *tx, id).await?;
        tx.commit().await?;

        if status_changed {
            tracing::info!(contract_id = %id, from = %current.status, to = %status, "contract status changed");
        }
        Ok(contract)
    }

    /// Deletes a contract and, by cascade, its status timeline. Reviews are
    /// the permanent record of how a contract ended, so they block deletion.
    pub async fn delete(&self, caller: &Caller, id: ContractId) -> Result<()> {
        let mut tx = begin_write(&self.pool).await?;

        let contract = require_contract(&mut *tx, id).await?;
        caller.require_self_or_admin(contract.shipper_id, "delete this contract")?;

        let reviews: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM user_reviews WHERE contract_id = ?")
            .bind(id.to_string())
            .fetch_one(&mut *tx)
            .await?;
        if reviews > 0 {
            return Err(MarketError::conflict(format!(
                "contract is referenced by {} review(s)",
                reviews
            )));
        }

        sqlx::query("DELETE FROM shipment_contracts WHERE id = ?")
            .bind(id.to_string())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        tracing::info!(contract_id = %id, "contract deleted");
        Ok(())
    }
}
