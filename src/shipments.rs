use crate::{
    auth::Caller,
    contracts,
    database::{begin_write, get_enum, get_id, get_opt_id},
    identity, offers,
    model::{
        check_shipment_transition, NewShipment, Role, Shipment, ShipmentDetails, ShipmentListing, ShipmentStatus,
        ShipmentUpdate,
    },
    pagination::{Page, PageRequest},
    Database, MarketError, Result, ShipmentId, UserId,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::{sqlite::SqliteRow, Executor, QueryBuilder, Row, Sqlite, SqliteConnection, SqlitePool};
use uuid::Uuid;

const SHIPMENT_COLUMNS: &str = "s.id, s.owner_id, s.cargo_type_id, s.cargo_description, \
     s.weight_kg, s.volume_m3, s.pickup_location, s.pickup_time, s.delivery_location, \
     s.delivery_time, s.vehicle_type_id, s.price_offer, s.status, s.created_at, s.updated_at";

const LISTING_JOIN: &str = ", u.name AS owner_name, u.rating AS owner_rating, \
     u.trips_completed AS owner_trips_completed \
     FROM shipments s JOIN users u ON u.id = s.owner_id";

/// Filters for the authenticated shipment list.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ShipmentFilter {
    pub owner_id: Option<UserId>,
    pub status: Option<ShipmentStatus>,
}

/// Filters for public discovery. Only `pending` shipments are ever returned.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ShipmentSearch {
    pub origin: Option<String>,
    pub destination: Option<String>,
    pub cargo_type_id: Option<Uuid>,
    pub vehicle_type_id: Option<Uuid>,
    pub min_price: Option<f64>,
    pub max_price: Option<f64>,
}

pub(crate) fn shipment_from_row(row: &SqliteRow) -> Result<Shipment> {
    Ok(Shipment {
        id: get_id(row, "id")?,
        owner_id: get_id(row, "owner_id")?,
        cargo_type_id: get_id(row, "cargo_type_id")?,
        cargo_description: row.try_get("cargo_description")?,
        weight_kg: row.try_get("weight_kg")?,
        volume_m3: row.try_get("volume_m3")?,
        pickup_location: row.try_get("pickup_location")?,
        pickup_time: row.try_get("pickup_time")?,
        delivery_location: row.try_get("delivery_location")?,
        delivery_time: row.try_get("delivery_time")?,
        vehicle_type_id: get_opt_id(row, "vehicle_type_id")?,
        price_offer: row.try_get("price_offer")?,
        status: get_enum(row, "status")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn listing_from_row(row: &SqliteRow) -> Result<ShipmentListing> {
    Ok(ShipmentListing {
        shipment: shipment_from_row(row)?,
        owner_name: row.try_get("owner_name")?,
        owner_rating: row.try_get("owner_rating")?,
        owner_trips_completed: row.try_get("owner_trips_completed")?,
    })
}

pub(crate) async fn find_shipment<'e, E>(executor: E, id: ShipmentId) -> Result<Option<Shipment>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sql = format!("SELECT {} FROM shipments s WHERE s.id = ?", SHIPMENT_COLUMNS);
    let row = sqlx::query(&sql)
        .bind(id.to_string())
        .fetch_optional(executor)
        .await?;
    row.as_ref().map(shipment_from_row).transpose()
}

pub(crate) async fn require_shipment<'e, E>(executor: E, id: ShipmentId) -> Result<Shipment>
where
    E: Executor<'e, Database = Sqlite>,
{
    find_shipment(executor, id)
        .await?
        .ok_or_else(|| MarketError::not_found("shipment", id))
}

/// Compare-and-swap on the shipment status column. Returns whether the row
/// was still in `from` and has been moved to `to`.
pub(crate) async fn transition_shipment<'e, E>(
    executor: E,
    id: ShipmentId,
    from: ShipmentStatus,
    to: ShipmentStatus,
) -> Result<bool>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        "UPDATE shipments SET status = ?, updated_at = ? WHERE id = ? AND status = ?",
    )
    .bind(to.as_str())
    .bind(Utc::now())
    .bind(id.to_string())
    .bind(from.as_str())
    .execute(executor)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// Moves a shipment to `target` as the side effect of a contract or tracking
/// change. Already being in `target` is not an error.
pub(crate) async fn advance_shipment(
    conn: &mut SqliteConnection,
    id: ShipmentId,
    target: ShipmentStatus,
) -> Result<()> {
    let shipment = require_shipment(&mut *conn, id).await?;
    if shipment.status == target {
        return Ok(());
    }
    check_shipment_transition(shipment.status, target)?;
    if !transition_shipment(&mut *conn, id, shipment.status, target).await? {
        return Err(MarketError::conflict(
            "shipment changed concurrently; re-fetch and retry",
        ));
    }
    tracing::info!(shipment_id = %id, from = %shipment.status, to = %target, "shipment status changed");
    Ok(())
}

fn like_pattern(term: &str) -> String {
    let escaped = term
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{}%", escaped)
}

fn push_search_filters(qb: &mut QueryBuilder<'_, Sqlite>, search: &ShipmentSearch) {
    qb.push(" WHERE s.status = ")
        .push_bind(ShipmentStatus::Pending.as_str());
    if let Some(origin) = search.origin.as_deref().filter(|s| !s.trim().is_empty()) {
        qb.push(" AND s.pickup_location LIKE ")
            .push_bind(like_pattern(origin))
            .push(" ESCAPE '\\'");
    }
    if let Some(destination) = search.destination.as_deref().filter(|s| !s.trim().is_empty()) {
        qb.push(" AND s.delivery_location LIKE ")
            .push_bind(like_pattern(destination))
            .push(" ESCAPE '\\'");
    }
    if let Some(cargo_type) = search.cargo_type_id {
        qb.push(" AND s.cargo_type_id = ").push_bind(cargo_type.to_string());
    }
    if let Some(vehicle_type) = search.vehicle_type_id {
        qb.push(" AND s.vehicle_type_id = ").push_bind(vehicle_type.to_string());
    }
    if let Some(min) = search.min_price {
        qb.push(" AND s.price_offer >= ").push_bind(min);
    }
    if let Some(max) = search.max_price {
        qb.push(" AND s.price_offer <= ").push_bind(max);
    }
}

fn push_list_filters(qb: &mut QueryBuilder<'_, Sqlite>, filter: &ShipmentFilter) {
    qb.push(" WHERE 1 = 1");
    if let Some(owner) = filter.owner_id {
        qb.push(" AND s.owner_id = ").push_bind(owner.to_string());
    }
    if let Some(status) = filter.status {
        qb.push(" AND s.status = ").push_bind(status.as_str());
    }
}

/// Shipment Registry.
#[derive(Clone)]
pub struct ShipmentService {
    pool: SqlitePool,
}

impl ShipmentService {
    pub fn new(db: &Database) -> Self {
        Self {
            pool: db.pool().clone(),
        }
    }

    pub async fn create(&self, caller: &Caller, request: NewShipment) -> Result<Shipment> {
        caller.require_role(Role::Shipper)?;
        let owner_id = caller.acting_for(request.owner_id)?;
        request.validate()?;

        identity::require_role(&self.pool, owner_id, Role::Shipper).await?;
        identity::require_cargo_type(&self.pool, request.cargo_type_id).await?;
        if let Some(vehicle_type) = request.vehicle_type_id {
            identity::require_vehicle_type(&self.pool, vehicle_type).await?;
        }

        let now = Utc::now();
        let shipment = Shipment {
            id: Uuid::new_v4(),
            owner_id,
            cargo_type_id: request.cargo_type_id,
            cargo_description: request.cargo_description,
            weight_kg: request.weight_kg,
            volume_m3: request.volume_m3,
            pickup_location: request.pickup_location,
            pickup_time: request.pickup_time,
            delivery_location: request.delivery_location,
            delivery_time: request.delivery_time,
            vehicle_type_id: request.vehicle_type_id,
            price_offer: request.price_offer,
            status: ShipmentStatus::Pending,
            created_at: now,
            updated_at: now,
        };

        sqlx::query(
            r#"
            INSERT INTO shipments (id, owner_id, cargo_type_id, cargo_description, weight_kg, volume_m3,
                pickup_location, pickup_time, delivery_location, delivery_time, vehicle_type_id,
                price_offer, status, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(shipment.id.to_string())
        .bind(shipment.owner_id.to_string())
        .bind(shipment.cargo_type_id.to_string())
        .bind(&shipment.cargo_description)
        .bind(shipment.weight_kg)
        .bind(shipment.volume_m3)
        .bind(&shipment.pickup_location)
        .bind(shipment.pickup_time)
        .bind(&shipment.delivery_location)
        .bind(shipment.delivery_time)
        .bind(shipment.vehicle_type_id.map(|id| id.to_string()))
        .bind(shipment.price_offer)
        .bind(shipment.status.as_str())
        .bind(shipment.created_at)
        .bind(shipment.updated_at)
        .execute(&self.pool)
        .await?;

        tracing::info!(shipment_id = %shipment.id, owner_id = %owner_id, "shipment posted");
        Ok(shipment)
    }

    pub async fn get(&self, id: ShipmentId) -> Result<Shipment> {
        require_shipment(&self.pool, id).await
    }

    pub async fn list(&self, filter: &ShipmentFilter, page: PageRequest) -> Result<Page<Shipment>> {
        let mut count = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM shipments s");
        push_list_filters(&mut count, filter);
        let total: i64 = count.build_query_scalar().fetch_one(&self.pool).await?;

        let mut query = QueryBuilder::<Sqlite>::new(format!("SELECT {} FROM shipments s", SHIPMENT_COLUMNS));
        push_list_filters(&mut query, filter);
        query
            .push(" ORDER BY s.created_at DESC, s.rowid DESC LIMIT ")
            .push_bind(i64::from(page.limit()))
            .push(" OFFSET ")
            .push_bind(page.offset());

        let rows = query.build().fetch_all(&self.pool).await?;
        let data = rows.iter().map(shipment_from_row).collect::<Result<Vec<_>>>()?;
        Ok(Page::new(data, page, total))
    }

    pub async fn update(
        &self,
        caller: &Caller,
        id: ShipmentId,
        update: ShipmentUpdate,
    ) -> Result<Shipment> {
        let mut tx = begin_write(&self.pool).await?;

        let current = require_shipment(&mut *tx, id).await?;
        caller.require_self_or_admin(current.owner_id, "update this shipment")?;

        if let Some(cargo_type) = update.cargo_type_id {
            identity::require_cargo_type(&mut *tx, cargo_type).await?;
        }
        if let Some(Some(vehicle_type)) = update.vehicle_type_id {
            identity::require_vehicle_type(&mut *tx, vehicle_type).await?;
        }

        let mut next = update.apply(&current)?;
        next.updated_at = Utc::now();

        if next.status != current.status
            && contracts::find_for_shipment(&mut *tx, id).await?.is_some()
        {
            return Err(MarketError::conflict(
                "shipment status follows its contract; update the contract instead",
            ));
        }

        let result = sqlx::query(
            r#"
            UPDATE shipments SET cargo_type_id = ?, cargo_description = ?, weight_kg = ?, volume_m3 = ?,
                pickup_location = ?, pickup_time = ?, delivery_location = ?, delivery_time = ?,
                vehicle_type_id = ?, price_offer = ?, status = ?, updated_at = ?
            WHERE id = ? AND status = ?
            "#,
        )
        .bind(next.cargo_type_id.to_string())
        .bind(&next.cargo_description)
        .bind(next.weight_kg)
        .bind(next.volume_m3)
        .bind(&next.pickup_location)
        .bind(next.pickup_time)
        .bind(&next.delivery_location)
        .bind(next.delivery_time)
        .bind(next.vehicle_type_id.map(|id| id.to_string()))
        .bind(next.price_offer)
        .bind(next.status.as_str())
        .bind(next.updated_at)
        .bind(id.to_string())
        .bind(current.status.as_str())
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(MarketError::conflict(
                "shipment was modified concurrently; re-fetch and retry",
            ));
        }

        let rejected = if next.status == ShipmentStatus::Cancelled {
            offers::reject_open_offers(&mut *tx, id, None).await?
        } else {
            0
        };
        tx.commit().await?;

        if next.status != current.status {
            tracing::info!(
                shipment_id = %id,
                from = %current.status,
                to = %next.status,
                rejected_offers = rejected,
                "shipment status changed"
            );
        }
        Ok(next)
    }

    pub async fn delete(&self, caller: &Caller, id: ShipmentId) -> Result<()> {
        let mut tx = begin_write(&self.pool).await?;

        let shipment = require_shipment(&mut *tx, id).await?;
        caller.require_self_or_admin(shipment.owner_id, "delete this shipment")?;

        let offers: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM shipment_offers WHERE shipment_id = ?")
            .bind(id.to_string())
            .fetch_one(&mut *tx)
            .await?;
        let contracts: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM shipment_contracts WHERE shipment_id = ?")
                .bind(id.to_string())
                .fetch_one(&mut *tx)
                .await?;
        if offers > 0 || contracts > 0 {
            return Err(MarketError::conflict(format!(
                "shipment is referenced by {} offer(s) and {} contract(s)",
                offers, contracts
            )));
        }

        sqlx::query("DELETE FROM shipments WHERE id = ?")
            .bind(id.to_string())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        tracing::info!(shipment_id = %id, "shipment deleted");
        Ok(())
    }

    /// Public discovery over pending shipments, with owner trust signals.
    pub async fn search(
        &self,
        search: &ShipmentSearch,
        page: PageRequest,
    ) -> Result<Page<ShipmentListing>> {
        if let (Some(min), Some(max)) = (search.min_price, search.max_price) {
            if min > max {
                return Err(MarketError::validation("min_price must not exceed max_price"));
            }
        }

        let mut count = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM shipments s");
        push_search_filters(&mut count, search);
        let total: i64 = count.build_query_scalar().fetch_one(&self.pool).await?;

        let mut query = QueryBuilder::<Sqlite>::new(format!("SELECT {}{}", SHIPMENT_COLUMNS, LISTING_JOIN));
        push_search_filters(&mut query, search);
        query
            .push(" ORDER BY s.created_at DESC, s.rowid DESC LIMIT ")
            .push_bind(i64::from(page.limit()))
            .push(" OFFSET ")
            .push_bind(page.offset());

        let rows = query.build().fetch_all(&self.pool).await?;
        let data = rows.iter().map(listing_from_row).collect::<Result<Vec<_>>>()?;
        Ok(Page::new(data, page, total))
    }

    pub async fn details(&self, id: ShipmentId) -> Result<ShipmentDetails> {
        let sql = format!(
            "SELECT {}{}, c.name AS cargo_type_name, vt.name AS vehicle_type_name, \
             (SELECT COUNT(*) FROM shipment_offers o WHERE o.shipment_id = s.id) AS offer_count \
             FROM shipments s JOIN users u ON u.id = s.owner_id \
             JOIN cargo_types c ON c.id = s.cargo_type_id \
             LEFT JOIN vehicle_types vt ON vt.id = s.vehicle_type_id \
             WHERE s.id = ?",
            SHIPMENT_COLUMNS,
            ", u.name AS owner_name, u.rating AS owner_rating, u.trips_completed AS owner_trips_completed"
        );
        let row = sqlx::query(&sql)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| MarketError::not_found("shipment", id))?;

        let contract = contracts::find_for_shipment(&self.pool, id).await?;

        Ok(ShipmentDetails {
            listing: listing_from_row(&row)?,
            cargo_type_name: row.try_get("cargo_type_name")?,
            vehicle_type_name: row.try_get("vehicle_type_name")?,
            offer_count: row.try_get("offer_count")?,
            contract,
        })
    }
}
