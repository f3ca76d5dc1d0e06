//! Identity and reference-data lookups.
//!
//! Users, cargo types, vehicle types and vehicles are owned by other parts of
//! the platform. The workflow only needs to resolve them, so this module keeps
//! to lookups plus the minimal registration used for seeding. The free
//! functions take any SQLite executor so they can run inside a transaction.

use crate::{
    database::{get_enum, get_id},
    model::{Reputation, Role, User},
    Database, MarketError, Result, UserId,
};
use chrono::Utc;
use sqlx::{sqlite::SqliteRow, Executor, Row, Sqlite, SqlitePool};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct Vehicle {
    pub id: Uuid,
    pub owner_id: UserId,
    pub vehicle_type_id: Uuid,
    pub plate_number: String,
}

fn user_from_row(row: &SqliteRow) -> Result<User> {
    Ok(User {
        id: get_id(row, "id")?,
        name: row.try_get("name")?,
        email: row.try_get("email")?,
        role: get_enum(row, "role")?,
        rating: row.try_get("rating")?,
        trips_completed: row.try_get("trips_completed")?,
        created_at: row.try_get("created_at")?,
    })
}

pub async fn find_user<'e, E>(executor: E, id: UserId) -> Result<Option<User>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row = sqlx::query(
        "SELECT id, name, email, role, rating, trips_completed, created_at FROM users WHERE id = ?",
    )
    .bind(id.to_string())
    .fetch_optional(executor)
    .await?;

    row.as_ref().map(user_from_row).transpose()
}

pub async fn require_user<'e, E>(executor: E, id: UserId) -> Result<User>
where
    E: Executor<'e, Database = Sqlite>,
{
    find_user(executor, id)
        .await?
        .ok_or_else(|| MarketError::not_found("user", id))
}

/// Resolves a user and checks they hold `role`.
pub async fn require_role<'e, E>(executor: E, id: UserId, role: Role) -> Result<User>
where
    E: Executor<'e, Database = Sqlite>,
{
    let user = require_user(executor, id).await?;
    if user.role != role {
        return Err(MarketError::Validation(format!(
            "user {} is not a {}",
            id, role
        )));
    }
    Ok(user)
}

async fn exists<'e, E>(executor: E, table: &str, id: Uuid) -> Result<bool>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sql = format!("SELECT EXISTS(SELECT 1 FROM {} WHERE id = ?)", table);
    let found: bool = sqlx::query_scalar(&sql)
        .bind(id.to_string())
        .fetch_one(executor)
        .await?;
    Ok(found)
}

pub async fn require_cargo_type<'e, E>(executor: E, id: Uuid) -> Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    if !exists(executor, "cargo_types", id).await? {
        return Err(MarketError::not_found("cargo type", id));
    }
    Ok(())
}

pub async fn require_vehicle_type<'e, E>(executor: E, id: Uuid) -> Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    if !exists(executor, "vehicle_types", id).await? {
        return Err(MarketError::not_found("vehicle type", id));
    }
    Ok(())
}

pub async fn require_vehicle<'e, E>(executor: E, id: Uuid) -> Result<Vehicle>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row = sqlx::query(
        "SELECT id, owner_id, vehicle_type_id, plate_number FROM vehicles WHERE id = ?",
    )
    .bind(id.to_string())
    .fetch_optional(executor)
    .await?
    .ok_or_else(|| MarketError::not_found("vehicle", id))?;

    Ok(Vehicle {
        id: get_id(&row, "id")?,
        owner_id: get_id(&row, "owner_id")?,
        vehicle_type_id: get_id(&row, "vehicle_type_id")?,
        plate_number: row.try_get("plate_number")?,
    })
}

/// Registration and lookup surface used by seeding tools and tests.
#[derive(Clone)]
pub struct IdentityService {
    pool: SqlitePool,
}

impl IdentityService {
    pub fn new(db: &Database) -> Self {
        Self {
            pool: db.pool().clone(),
        }
    }

    pub async fn register_user(&self, name: &str, email: &str, role: Role) -> Result<User> {
        if name.trim().is_empty() || email.trim().is_empty() {
            return Err(MarketError::validation("User name and email are required"));
        }

        let user = User {
            id: Uuid::new_v4(),
            name: name.to_string(),
            email: email.to_string(),
            role,
            rating: None,
            trips_completed: 0,
            created_at: Utc::now(),
        };

        sqlx::query(
            r#"
            INSERT INTO users (id, name, email, role, rating, trips_completed, created_at)
            VALUES (?, ?, ?, ?, NULL, 0, ?)
            "#,
        )
        .bind(user.id.to_string())
        .bind(&user.name)
        .bind(&user.email)
        .bind(user.role.as_str())
        .bind(user.created_at)
        .execute(&self.pool)
        .await?;

        Ok(user)
    }

    pub async fn register_cargo_type(&self, name: &str) -> Result<Uuid> {
        self.register_named("cargo_types", name).await
    }

    pub async fn register_vehicle_type(&self, name: &str) -> Result<Uuid> {
        self.register_named("vehicle_types", name).await
    }

    async fn register_named(&self, table: &str, name: &str) -> Result<Uuid> {
        let id = Uuid::new_v4();
        let sql = format!("INSERT INTO {} (id, name, created_at) VALUES (?, ?, ?)", table);
        sqlx::query(&sql)
            .bind(id.to_string())
            .bind(name)
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;
        Ok(id)
    }

    pub async fn register_vehicle(
        &self,
        owner_id: UserId,
        vehicle_type_id: Uuid,
        plate_number: &str,
    ) -> Result<Vehicle> {
        require_role(&self.pool, owner_id, Role::Carrier).await?;
        require_vehicle_type(&self.pool, vehicle_type_id).await?;

        let vehicle = Vehicle {
            id: Uuid::new_v4(),
            owner_id,
            vehicle_type_id,
            plate_number: plate_number.to_string(),
        };

        sqlx::query(
            r#"
            INSERT INTO vehicles (id, owner_id, vehicle_type_id, plate_number, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(vehicle.id.to_string())
        .bind(vehicle.owner_id.to_string())
        .bind(vehicle.vehicle_type_id.to_string())
        .bind(&vehicle.plate_number)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(vehicle)
    }

    pub async fn get_user(&self, id: UserId) -> Result<User> {
        require_user(&self.pool, id).await
    }

    pub async fn reputation(&self, id: UserId) -> Result<Reputation> {
        let user = self.get_user(id).await?;
        Ok(Reputation {
            user_id: user.id,
            rating: user.rating,
            trips_completed: user.trips_completed,
        })
    }
}
