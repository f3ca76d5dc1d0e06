//! Review Aggregator.
//!
//! Reviews are written only against completed contracts, one per reviewer,
//! and always about the other party. Every write recomputes the reviewed
//! user's reputation inside the same transaction, so a review never exists
//! without its aggregate and vice versa.

use crate::{
    auth::Caller,
    contracts,
    database::{begin_write, get_id},
    identity,
    model::{validate_rating, ContractStatus, NewReview, Reputation, Review, ReviewUpdate},
    pagination::{Page, PageRequest},
    ContractId, Database, MarketError, Result, ReviewId, UserId,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::{sqlite::SqliteRow, Executor, QueryBuilder, Row, Sqlite, SqliteConnection, SqlitePool};
use uuid::Uuid;

const REVIEW_COLUMNS: &str =
    "id, reviewer_id, reviewed_user_id, contract_id, rating, comment, created_at, updated_at";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReviewFilter {
    pub reviewer_id: Option<UserId>,
    pub reviewed_user_id: Option<UserId>,
    pub contract_id: Option<ContractId>,
}

fn review_from_row(row: &SqliteRow) -> Result<Review> {
    Ok(Review {
        id: get_id(row, "id")?,
        reviewer_id: get_id(row, "reviewer_id")?,
        reviewed_user_id: get_id(row, "reviewed_user_id")?,
        contract_id: get_id(row, "contract_id")?,
        rating: row.try_get("rating")?,
        comment: row.try_get("comment")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

async fn require_review<'e, E>(executor: E, id: ReviewId) -> Result<Review>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sql = format!("SELECT {} FROM user_reviews WHERE id = ?", REVIEW_COLUMNS);
    sqlx::query(&sql)
        .bind(id.to_string())
        .fetch_optional(executor)
        .await?
        .as_ref()
        .map(review_from_row)
        .transpose()?
        .ok_or_else(|| MarketError::not_found("review", id))
}

/// Average rounded to two decimals; `None` when there is nothing to average.
pub fn average_rating(sum: i64, count: i64) -> Option<f64> {
    if count <= 0 {
        return None;
    }
    Some(((sum as f64 / count as f64) * 100.0).round() / 100.0)
}

/// Rescans every review about `user_id` and rewrites the user's aggregate.
async fn recompute_reputation(conn: &mut SqliteConnection, user_id: UserId) -> Result<Reputation> {
    let row = sqlx::query(
        "SELECT COUNT(*) AS review_count, COALESCE(SUM(rating), 0) AS rating_sum \
         FROM user_reviews WHERE reviewed_user_id = ?",
    )
    .bind(user_id.to_string())
    .fetch_one(&mut *conn)
    .await?;
    let count: i64 = row.try_get("review_count")?;
    let sum: i64 = row.try_get("rating_sum")?;
    let rating = average_rating(sum, count);

    let result = sqlx::query("UPDATE users SET rating = ?, trips_completed = ? WHERE id = ?")
        .bind(rating)
        .bind(count)
        .bind(user_id.to_string())
        .execute(&mut *conn)
        .await?;
    if result.rows_affected() == 0 {
        return Err(MarketError::not_found("user", user_id));
    }

    tracing::info!(user_id = %user_id, rating = ?rating, trips_completed = count, "reputation recomputed");
    Ok(Reputation {
        user_id,
        rating,
        trips_completed: count,
    })
}

fn push_filters(qb: &mut QueryBuilder<'_, Sqlite>, filter: &ReviewFilter) {
    qb.push(" WHERE 1 = 1");
    if let Some(reviewer) = filter.reviewer_id {
        qb.push(" AND reviewer_id = ").push_bind(reviewer.to_string());
    }
    if let Some(reviewed) = filter.reviewed_user_id {
        qb.push(" AND reviewed_user_id = ").push_bind(reviewed.to_string());
    }
    if let Some(contract) = filter.contract_id {
        qb.push(" AND contract_id = ").push_bind(contract.to_string());
    }
}

#[derive(Clone)]
pub struct ReviewService {
    pool: SqlitePool,
}

impl ReviewService {
    pub fn new(db: &Database) -> Self {
        Self {
            pool: db.pool().clone(),
        }
    }

    pub async fn create(&self, caller: &Caller, request: NewReview) -> Result<Review> {
        let reviewer_id = caller.user_id;
        request.validate(reviewer_id)?;

        let mut tx = begin_write(&self.pool).await?;

        identity::require_user(&mut *tx, reviewer_id).await?;
        identity::require_user(&mut *tx, request.reviewed_user_id).await?;
        let contract = contracts::require_contract(&mut *tx, request.contract_id).await?;

        if contract.status != ContractStatus::Completed {
            return Err(MarketError::conflict(format!(
                "contract is '{}'; only completed contracts can be reviewed",
                contract.status
            )));
        }
        match contract.counterparty(reviewer_id) {
            Some(other) if other == request.reviewed_user_id => {}
            Some(_) => {
                return Err(MarketError::validation(
                    "the reviewed user must be the other party to the contract",
                ))
            }
            None => {
                return Err(MarketError::forbidden(
                    "only parties to the contract may review it",
                ))
            }
        }

        let existing: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM user_reviews WHERE reviewer_id = ? AND contract_id = ?)",
        )
        .bind(reviewer_id.to_string())
        .bind(contract.id.to_string())
        .fetch_one(&mut *tx)
        .await?;
        if existing {
            return Err(MarketError::conflict(
                "reviewer has already reviewed this contract",
            ));
        }

        let now = Utc::now();
        let review = Review {
            id: Uuid::new_v4(),
            reviewer_id,
            reviewed_user_id: request.reviewed_user_id,
            contract_id: contract.id,
            rating: request.rating,
            comment: request.comment,
            created_at: now,
            updated_at: now,
        };

        sqlx::query(
            r#"
            INSERT INTO user_reviews
                (id, reviewer_id, reviewed_user_id, contract_id, rating, comment, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(review.id.to_string())
        .bind(review.reviewer_id.to_string())
        .bind(review.reviewed_user_id.to_string())
        .bind(review.contract_id.to_string())
        .bind(review.rating)
        .bind(&review.comment)
        .bind(review.created_at)
        .bind(review.updated_at)
        .execute(&mut *tx)
        .await?;

        recompute_reputation(&mut *tx, review.reviewed_user_id).await?;
        tx.commit().await?;

        tracing::info!(
            review_id = %review.id,
            contract_id = %review.contract_id,
            reviewed_user_id = %review.reviewed_user_id,
            rating = review.rating,
            "review recorded"
        );
        Ok(review)
    }

    pub async fn get(&self, id: ReviewId) -> Result<Review> {
        require_review(&self.pool, id).await
    }

    pub async fn list(&self, filter: &ReviewFilter, page: PageRequest) -> Result<Page<Review>> {
        let mut count = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM user_reviews");
        push_filters(&mut count, filter);
        let total: i64 = count.build_query_scalar().fetch_one(&self.pool).await?;

        let mut query = QueryBuilder::<Sqlite>::new(format!("SELECT {} FROM user_reviews", REVIEW_COLUMNS));
        push_filters(&mut query, filter);
        query
            .push(" ORDER BY created_at DESC, rowid DESC LIMIT ")
            .push_bind(i64::from(page.limit()))
            .push(" OFFSET ")
            .push_bind(page.offset());

        let rows = query.build().fetch_all(&self.pool).await?;
        let data = rows.iter().map(review_from_row).collect::<Result<Vec<_>>>()?;
        Ok(Page::new(data, page, total))
    }

    /// Reviews received by `user_id`.
    pub async fn for_user(&self, user_id: UserId, page: PageRequest) -> Result<Page<Review>> {
        identity::require_user(&self.pool, user_id).await?;
        let filter = ReviewFilter {
            reviewed_user_id: Some(user_id),
            ..Default::default()
        };
        self.list(&filter, page).await
    }

    pub async fn for_contract(&self, contract_id: ContractId, page: PageRequest) -> Result<Page<Review>> {
        contracts::require_contract(&self.pool, contract_id).await?;
        let filter = ReviewFilter {
            contract_id: Some(contract_id),
            ..Default::default()
        };
        self.list(&filter, page).await
    }

    pub async fn update(&self, caller: &Caller, id: ReviewId, update: ReviewUpdate) -> Result<Review> {
        let mut tx = begin_write(&self.pool).await?;

        let mut review = require_review(&mut *tx, id).await?;
        if review.reviewer_id != caller.user_id {
            return Err(MarketError::forbidden("only the original reviewer may edit a review"));
        }

        let rating_changed = match update.rating {
            Some(rating) => {
                validate_rating(rating)?;
                let changed = rating != review.rating;
                review.rating = rating;
                changed
            }
            None => false,
        };
        if let Some(comment) = update.comment {
            review.comment = comment;
        }
        review.updated_at = Utc::now();

        sqlx::query("UPDATE user_reviews SET rating = ?, comment = ?, updated_at = ? WHERE id = ?")
            .bind(review.rating)
            .bind(&review.comment)
            .bind(review.updated_at)
            .bind(id.to_string())
            .execute(&mut *tx)
            .await?;

        if rating_changed {
            recompute_reputation(&mut *tx, review.reviewed_user_id).await?;
        }
        tx.commit().await?;

        tracing::info!(review_id = %id, rating = review.rating, "review updated");
        Ok(review)
    }

    pub async fn delete(&self, caller: &Caller, id: ReviewId) -> Result<()> {
        let mut tx = begin_write(&self.pool).await?;

        let review = require_review(&mut *tx, id).await?;
        caller.require_self_or_admin(review.reviewer_id, "delete this review")?;

        sqlx::query("DELETE FROM user_reviews WHERE id = ?")
            .bind(id.to_string())
            .execute(&mut *tx)
            .await?;
        recompute_reputation(&mut *tx, review.reviewed_user_id).await?;
        tx.commit().await?;

        tracing::info!(review_id = %id, reviewed_user_id = %review.reviewed_user_id, "review deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn average_is_rounded_to_two_decimals() {
        assert_eq!(average_rating(24, 3), Some(8.0));
        assert_eq!(average_rating(16, 2), Some(8.0));
        assert_eq!(average_rating(10, 3), Some(3.33));
        assert_eq!(average_rating(20, 3), Some(6.67));
    }

    #[test]
    fn no_reviews_means_no_rating() {
        assert_eq!(average_rating(0, 0), None);
    }
}
