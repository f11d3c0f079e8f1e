//! Recording answered checks.
//!
//! The engine itself never writes coverage. This is the path the check-taking
//! side uses, kept here so coverage and prior stats are updated in one
//! transaction with the response.

use check_structs::{CheckCoverage, CheckStatus, LocalPriorStats};
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::debug;
use uuid::Uuid;

/// An answered check item to persist.
#[derive(Debug, Clone, Copy)]
pub struct NewResponse {
    pub run_id: Option<Uuid>,
    pub store_id: Uuid,
    pub template_id: Uuid,
    pub status: CheckStatus,
    pub answered_at: DateTime<Utc>,
}

/// Inserts a response and folds it into coverage and local prior stats.
///
/// Returns the coverage row as it stands after the response.
///
/// # Errors
///
/// Returns an error if any statement fails; nothing is written in that case.
pub async fn record_response(pool: &PgPool, response: NewResponse) -> anyhow::Result<CheckCoverage> {
    let mut tx = pool.begin().await?;

    sqlx::query(
        r"
        INSERT INTO check_responses (id, run_id, store_id, template_id, status, answered_at)
        VALUES ($1, $2, $3, $4, $5, $6)
        ",
    )
    .bind(Uuid::new_v4())
    .bind(response.run_id)
    .bind(response.store_id)
    .bind(response.template_id)
    .bind(response.status)
    .bind(response.answered_at)
    .execute(&mut *tx)
    .await?;

    // The conflict arm locks the row, so concurrent responses for one pair
    // serialize here even when neither sees an existing row.
    let first = CheckCoverage::first(
        response.store_id,
        response.template_id,
        response.status,
        response.answered_at,
    );
    let upserted = sqlx::query_as::<_, CheckCoverage>(
        r"
        INSERT INTO check_coverage
            (store_id, template_id, last_verified_at, last_status, consecutive_passes, consecutive_fails)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (store_id, template_id) DO UPDATE SET
            last_verified_at = EXCLUDED.last_verified_at,
            last_status = EXCLUDED.last_status,
            consecutive_passes = CASE WHEN $7 THEN 0 ELSE check_coverage.consecutive_passes + 1 END,
            consecutive_fails = CASE WHEN $7 THEN check_coverage.consecutive_fails + 1 ELSE 0 END
        WHERE check_coverage.last_verified_at <= EXCLUDED.last_verified_at
        RETURNING store_id, template_id, last_verified_at, last_status,
                  consecutive_passes, consecutive_fails
        ",
    )
    .bind(first.store_id)
    .bind(first.template_id)
    .bind(first.last_verified_at)
    .bind(first.last_status)
    .bind(first.consecutive_passes)
    .bind(first.consecutive_fails)
    .bind(response.status.is_failure())
    .fetch_optional(&mut *tx)
    .await?;

    // No row back means the response is older than the stored coverage.
    let coverage = match upserted {
        Some(row) => row,
        None => {
            sqlx::query_as::<_, CheckCoverage>(
                r"
                SELECT store_id, template_id, last_verified_at, last_status,
                       consecutive_passes, consecutive_fails
                FROM check_coverage
                WHERE store_id = $1 AND template_id = $2
                ",
            )
            .bind(response.store_id)
            .bind(response.template_id)
            .fetch_one(&mut *tx)
            .await?
        }
    };

    let mut increment = LocalPriorStats::empty(response.store_id, response.template_id);
    increment.record(response.status);

    sqlx::query(
        r"
        INSERT INTO local_prior_stats (store_id, template_id, fail_count, total_count)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (store_id, template_id) DO UPDATE SET
            fail_count = local_prior_stats.fail_count + EXCLUDED.fail_count,
            total_count = local_prior_stats.total_count + EXCLUDED.total_count
        ",
    )
    .bind(increment.store_id)
    .bind(increment.template_id)
    .bind(increment.fail_count)
    .bind(increment.total_count)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    debug!(
        store = %response.store_id,
        template = %response.template_id,
        status = ?response.status,
        "Recorded check response"
    );
    Ok(coverage)
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::{create_pool, run_migrations};

    async fn seed_pair(pool: &PgPool) -> (Uuid, Uuid) {
        let store_id = Uuid::new_v4();
        let template_id = Uuid::new_v4();
        let brand_id = Uuid::new_v4();
        sqlx::query("INSERT INTO stores (id, brand_id, name) VALUES ($1, $2, 'Test store')")
            .bind(store_id)
            .bind(brand_id)
            .execute(pool)
            .await
            .unwrap();
        sqlx::query(
            "INSERT INTO check_templates (id, brand_id, title, category, severity)
             VALUES ($1, $2, 'Fridge temperature', 'food_safety', 'critical')",
        )
        .bind(template_id)
        .bind(brand_id)
        .execute(pool)
        .await
        .unwrap();
        (store_id, template_id)
    }

    #[tokio::test]
    #[ignore] // Requires DATABASE_URL pointing at a disposable database
    async fn test_concurrent_first_responses_keep_both_streaks() {
        let url = std::env::var("DATABASE_URL").unwrap();
        let pool = create_pool(&url, 4).await.unwrap();
        run_migrations(&pool).await.unwrap();
        let (store_id, template_id) = seed_pair(&pool).await;

        let at = Utc::now();
        let response = NewResponse {
            run_id: None,
            store_id,
            template_id,
            status: CheckStatus::Fail,
            answered_at: at,
        };
        let (a, b) = tokio::join!(
            record_response(&pool, response),
            record_response(&pool, response),
        );
        a.unwrap();
        b.unwrap();

        let coverage = sqlx::query_as::<_, CheckCoverage>(
            "SELECT store_id, template_id, last_verified_at, last_status,
                    consecutive_passes, consecutive_fails
             FROM check_coverage WHERE store_id = $1 AND template_id = $2",
        )
        .bind(store_id)
        .bind(template_id)
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(coverage.consecutive_fails, 2);
        assert_eq!(coverage.consecutive_passes, 0);

        let total: i64 = sqlx::query_scalar(
            "SELECT total_count FROM local_prior_stats WHERE store_id = $1 AND template_id = $2",
        )
        .bind(store_id)
        .bind(template_id)
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(total, 2);
    }

    #[tokio::test]
    #[ignore] // Requires DATABASE_URL pointing at a disposable database
    async fn test_older_response_leaves_coverage_unchanged() {
        let url = std::env::var("DATABASE_URL").unwrap();
        let pool = create_pool(&url, 2).await.unwrap();
        run_migrations(&pool).await.unwrap();
        let (store_id, template_id) = seed_pair(&pool).await;

        let at = Utc::now();
        let newer = record_response(
            &pool,
            NewResponse {
                run_id: None,
                store_id,
                template_id,
                status: CheckStatus::Pass,
                answered_at: at,
            },
        )
        .await
        .unwrap();
        let after_older = record_response(
            &pool,
            NewResponse {
                run_id: None,
                store_id,
                template_id,
                status: CheckStatus::Fail,
                answered_at: at - Duration::days(1),
            },
        )
        .await
        .unwrap();

        assert_eq!(after_older.last_status, CheckStatus::Pass);
        assert_eq!(after_older.consecutive_passes, newer.consecutive_passes);
    }
}
