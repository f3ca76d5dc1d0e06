use crate::{
    auth::Caller,
    contracts::form_contract,
    database::{begin_write, get_enum, get_id},
    identity,
    model::{
        check_offer_transition, Contract, NewContract, NewOffer, Offer, OfferStatus, OfferUpdate,
        Role, ShipmentStatus,
    },
    pagination::{Page, PageRequest},
    shipments, Database, MarketError, OfferId, Result, ShipmentId, UserId,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::{sqlite::SqliteRow, Executor, QueryBuilder, Row, Sqlite, SqliteConnection, SqlitePool};
use uuid::Uuid;

const OFFER_COLUMNS: &str = "id, shipment_id, carrier_id, vehicle_id, proposed_price, \
     proposed_pickup_time, proposed_delivery_time, message, status, created_at, updated_at";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OfferFilter {
    pub shipment_id: Option<ShipmentId>,
    pub carrier_id: Option<UserId>,
    pub status: Option<OfferStatus>,
}

/// Result of a status change. `contract` is set when the change was an
/// acceptance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfferResolution {
    #[serde(flatten)]
    pub offer: Offer,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contract: Option<Contract>,
}

fn offer_from_row(row: &SqliteRow) -> Result<Offer> {
    Ok(Offer {
        id: get_id(row, "id")?,
        shipment_id: get_id(row, "shipment_id")?,
        carrier_id: get_id(row, "carrier_id")?,
        vehicle_id: get_id(row, "vehicle_id")?,
        proposed_price: row.try_get("proposed_price")?,
        proposed_pickup_time: row.try_get("proposed_pickup_time")?,
        proposed_delivery_time: row.try_get("proposed_delivery_time")?,
        message: row.try_get("message")?,
        status: get_enum(row, "status")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

pub(crate) async fn find_offer<'e, E>(executor: E, id: OfferId) -> Result<Option<Offer>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sql = format!("SELECT {} FROM shipment_offers WHERE id = ?", OFFER_COLUMNS);
    let row = sqlx::query(&sql)
        .bind(id.to_string())
        .fetch_optional(executor)
        .await?;
    row.as_ref().map(offer_from_row).transpose()
}

pub(crate) async fn require_offer<'e, E>(executor: E, id: OfferId) -> Result<Offer>
where
    E: Executor<'e, Database = Sqlite>,
{
    find_offer(executor, id)
        .await?
        .ok_or_else(|| MarketError::not_found("offer", id))
}

/// Compare-and-swap on the offer status column.
pub(crate) async fn transition_offer<'e, E>(
    executor: E,
    id: OfferId,
    from: OfferStatus,
    to: OfferStatus,
) -> Result<bool>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        "UPDATE shipment_offers SET status = ?, updated_at = ? WHERE id = ? AND status = ?",
    )
    .bind(to.as_str())
    .bind(Utc::now())
    .bind(id.to_string())
    .bind(from.as_str())
    .execute(executor)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// Rejects every pending or countered offer on a shipment, except `keep`.
pub(crate) async fn reject_open_offers(
    conn: &mut SqliteConnection,
    shipment_id: ShipmentId,
    keep: Option<OfferId>,
) -> Result<u64> {
    let mut qb = QueryBuilder::<Sqlite>::new("UPDATE shipment_offers SET status = ");
    qb.push_bind(OfferStatus::Rejected.as_str())
        .push(", updated_at = ")
        .push_bind(Utc::now())
        .push(" WHERE shipment_id = ")
        .push_bind(shipment_id.to_string())
        .push(" AND status IN (")
        .push_bind(OfferStatus::Pending.as_str())
        .push(", ")
        .push_bind(OfferStatus::Countered.as_str())
        .push(")");
    if let Some(keep) = keep {
        qb.push(" AND id <> ").push_bind(keep.to_string());
    }
    let result = qb.build().execute(&mut *conn).await?;
    Ok(result.rows_affected())
}

/// Authorization and state checks for a status change. Writes nothing.
async fn check_status_change(
    conn: &mut SqliteConnection,
    caller: &Caller,
    offer: &Offer,
    status: OfferStatus,
) -> Result<()> {
    let shipment = shipments::require_shipment(&mut *conn, offer.shipment_id).await?;
    match status {
        OfferStatus::Accepted | OfferStatus::Rejected | OfferStatus::Countered => {
            caller.require_self_or_admin(shipment.owner_id, "resolve offers on this shipment")?
        }
        OfferStatus::Withdrawn | OfferStatus::Pending => {
            caller.require_self_or_admin(offer.carrier_id, "change this offer")?
        }
    }
    check_offer_transition(offer.status, status)?;
    if status == OfferStatus::Accepted && !shipment.status.accepts_offers() {
        return Err(MarketError::conflict(format!(
            "shipment is no longer pending (status '{}')",
            shipment.status
        )));
    }
    Ok(())
}

async fn write_terms(
    conn: &mut SqliteConnection,
    caller: &Caller,
    current: Offer,
    update: &OfferUpdate,
) -> Result<Offer> {
    caller.require_self_or_admin(current.carrier_id, "edit this offer")?;
    if current.status.is_terminal() {
        return Err(MarketError::conflict(format!(
            "offer terms are final once the offer is '{}'",
            current.status
        )));
    }

    if let Some(vehicle_id) = update.vehicle_id {
        let vehicle = identity::require_vehicle(&mut *conn, vehicle_id).await?;
        if vehicle.owner_id != current.carrier_id {
            return Err(MarketError::validation(format!(
                "vehicle {} does not belong to carrier {}",
                vehicle_id, current.carrier_id
            )));
        }
    }

    let mut next = update.apply_terms(&current)?;
    next.updated_at = Utc::now();

    let result = sqlx::query(
        r#"
        UPDATE shipment_offers
        SET vehicle_id = ?, proposed_price = ?, proposed_pickup_time = ?, proposed_delivery_time = ?,
            message = ?, updated_at = ?
        WHERE id = ? AND status = ?
        "#,
    )
    .bind(next.vehicle_id.to_string())
    .bind(next.proposed_price)
    .bind(next.proposed_pickup_time)
    .bind(next.proposed_delivery_time)
    .bind(&next.message)
    .bind(next.updated_at)
    .bind(next.id.to_string())
    .bind(current.status.as_str())
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(MarketError::conflict(
            "offer was resolved concurrently; re-fetch and retry",
        ));
    }
    Ok(next)
}

/// Applies a checked status change. Acceptance forms the contract at the
/// offer's proposed price.
async fn resolve(
    conn: &mut SqliteConnection,
    offer: Offer,
    status: OfferStatus,
) -> Result<OfferResolution> {
    if status == OfferStatus::Accepted {
        let request = NewContract {
            shipment_id: offer.shipment_id,
            offer_id: offer.id,
            final_price: offer.proposed_price,
            terms: None,
            notes: None,
        };
        let contract = form_contract(&mut *conn, &request).await?;
        let accepted = require_offer(&mut *conn, offer.id).await?;
        return Ok(OfferResolution {
            offer: accepted,
            contract: Some(contract),
        });
    }

    if !transition_offer(&mut *conn, offer.id, offer.status, status).await? {
        return Err(MarketError::conflict(
            "offer was resolved concurrently; re-fetch and retry",
        ));
    }
    tracing::info!(offer_id = %offer.id, from = %offer.status, to = %status, "offer status changed");

    Ok(OfferResolution {
        offer: require_offer(&mut *conn, offer.id).await?,
        contract: None,
    })
}

fn push_filters(qb: &mut QueryBuilder<'_, Sqlite>, filter: &OfferFilter) {
    qb.push(" WHERE 1 = 1");
    if let Some(shipment) = filter.shipment_id {
        qb.push(" AND shipment_id = ").push_bind(shipment.to_string());
    }
    if let Some(carrier) = filter.carrier_id {
        qb.push(" AND carrier_id = ").push_bind(carrier.to_string());
    }
    if let Some(status) = filter.status {
        qb.push(" AND status = ").push_bind(status.as_str());
    }
}

/// Offer Negotiation.
#[derive(Clone)]
pub struct OfferService {
    pool: SqlitePool,
}

impl OfferService {
    pub fn new(db: &Database) -> Self {
        Self {
            pool: db.pool().clone(),
        }
    }

    pub async fn create(&self, caller: &Caller, request: NewOffer) -> Result<Offer> {
        caller.require_role(Role::Carrier)?;
        let carrier_id = caller.acting_for(request.carrier_id)?;
        request.validate()?;

        identity::require_role(&self.pool, carrier_id, Role::Carrier).await?;
        let vehicle = identity::require_vehicle(&self.pool, request.vehicle_id).await?;
        if vehicle.owner_id != carrier_id {
            return Err(MarketError::validation(format!(
                "vehicle {} does not belong to carrier {}",
                vehicle.id, carrier_id
            )));
        }
        let shipment = shipments::require_shipment(&self.pool, request.shipment_id).await?;
        if !shipment.status.accepts_offers() {
            return Err(MarketError::conflict(format!(
                "shipment is not accepting offers (status '{}')",
                shipment.status
            )));
        }

        let now = Utc::now();
        let offer = Offer {
            id: Uuid::new_v4(),
            shipment_id: request.shipment_id,
            carrier_id,
            vehicle_id: request.vehicle_id,
            proposed_price: request.proposed_price,
            proposed_pickup_time: request.proposed_pickup_time,
            proposed_delivery_time: request.proposed_delivery_time,
            message: request.message,
            status: OfferStatus::Pending,
            created_at: now,
            updated_at: now,
        };

        // The pending check is repeated in the insert itself so an offer can
        // never land on a shipment that was accepted in the meantime.
        let result = sqlx::query(
            r#"
            INSERT INTO shipment_offers (id, shipment_id, carrier_id, vehicle_id, proposed_price,
                proposed_pickup_time, proposed_delivery_time, message, status, created_at, updated_at)
            SELECT ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?
            WHERE EXISTS (SELECT 1 FROM shipments WHERE id = ? AND status = ?)
            "#,
        )
        .bind(offer.id.to_string())
        .bind(offer.shipment_id.to_string())
        .bind(offer.carrier_id.to_string())
        .bind(offer.vehicle_id.to_string())
        .bind(offer.proposed_price)
        .bind(offer.proposed_pickup_time)
        .bind(offer.proposed_delivery_time)
        .bind(&offer.message)
        .bind(offer.status.as_str())
        .bind(offer.created_at)
        .bind(offer.updated_at)
        .bind(offer.shipment_id.to_string())
        .bind(ShipmentStatus::Pending.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(MarketError::conflict("shipment is no longer accepting offers"));
        }

        tracing::info!(
            offer_id = %offer.id,
            shipment_id = %offer.shipment_id,
            carrier_id = %carrier_id,
            price = offer.proposed_price,
            "offer submitted"
        );
        Ok(offer)
    }

    pub async fn get(&self, id: OfferId) -> Result<Offer> {
        require_offer(&self.pool, id).await
    }

    pub async fn list(&self, filter: &OfferFilter, page: PageRequest) -> Result<Page<Offer>> {
        let mut count = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM shipment_offers");
        push_filters(&mut count, filter);
        let total: i64 = count.build_query_scalar().fetch_one(&self.pool).await?;

        let mut query =
            QueryBuilder::<Sqlite>::new(format!("SELECT {} FROM shipment_offers", OFFER_COLUMNS));
        push_filters(&mut query, filter);
        query
            .push(" ORDER BY created_at ASC, rowid ASC LIMIT ")
            .push_bind(i64::from(page.limit()))
            .push(" OFFSET ")
            .push_bind(page.offset());

        let rows = query.build().fetch_all(&self.pool).await?;
        let data = rows.iter().map(offer_from_row).collect::<Result<Vec<_>>>()?;
        Ok(Page::new(data, page, total))
    }

    /// Edits the offer's terms and, when `status` is present, resolves it.
    /// Both happen in one transaction, and every status check runs before
    /// the terms are written.
    pub async fn update(
        &self,
        caller: &Caller,
        id: OfferId,
        update: OfferUpdate,
    ) -> Result<OfferResolution> {
        let mut tx = begin_write(&self.pool).await?;
        let mut offer = require_offer(&mut *tx, id).await?;

        let status_change = update.status.filter(|status| *status != offer.status);
        if let Some(status) = status_change {
            check_status_change(&mut *tx, caller, &offer, status).await?;
        }

        if update.has_terms() {
            offer = write_terms(&mut *tx, caller, offer, &update).await?;
        }

        let resolution = match status_change {
            Some(status) => resolve(&mut *tx, offer, status).await?,
            None => OfferResolution {
                offer,
                contract: None,
            },
        };
        tx.commit().await?;
        Ok(resolution)
    }

    /// Moves an offer through its state machine. Acceptance runs the full
    /// atomic protocol and returns the contract it formed.
    pub async fn update_status(
        &self,
        caller: &Caller,
        id: OfferId,
        status: OfferStatus,
    ) -> Result<OfferResolution> {
        let mut tx = begin_write(&self.pool).await?;
        let offer = require_offer(&mut *tx, id).await?;
        check_status_change(&mut *tx, caller, &offer, status).await?;
        let resolution = resolve(&mut *tx, offer, status).await?;
        tx.commit().await?;
        Ok(resolution)
    }

    pub async fn delete(&self, caller: &Caller, id: OfferId) -> Result<()> {
        let mut tx = begin_write(&self.pool).await?;

        let offer = require_offer(&mut *tx, id).await?;
        caller.require_self_or_admin(offer.carrier_id, "delete this offer")?;

        let contract: Option<String> =
            sqlx::query_scalar("SELECT id FROM shipment_contracts WHERE offer_id = ?")
                .bind(id.to_string())
                .fetch_optional(&mut *tx)
                .await?;
        if let Some(contract_id) = contract {
            return Err(MarketError::conflict(format!(
                "offer is referenced by contract {}",
                contract_id
            )));
        }

        sqlx::query("DELETE FROM shipment_offers WHERE id = ?")
            .bind(id.to_string())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        tracing::info!(offer_id = %id, "offer deleted");
        Ok(())
    }
}
