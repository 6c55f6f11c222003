//! Postgres implementation of DepositRepository and LedgerRepository.
//!
//! Uniqueness of active payable amounts and of transaction hashes is left to
//! the partial/unique indexes; violations come back as domain errors. The
//! notification outbox row is written inside the credit transaction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::BigDecimal;
use sqlx::{PgPool, Postgres, Transaction as SqlxTransaction};
use uuid::Uuid;

use crate::adapters::map_write_error;
use crate::db::models::{DepositRow, UserBalanceRow};
use crate::domain::{ConfirmDeposit, Deposit, DepositStatus, NewDeposit, UserBalance};
use crate::money::Amount;
use crate::ports::{DepositRepository, LedgerRepository, RepositoryError, RepositoryResult};

/// Postgres-backed deposit store and ledger.
#[derive(Clone)]
pub struct PostgresDepositRepository {
    pool: PgPool,
}

impl PostgresDepositRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn lock_balance(
        tx: &mut SqlxTransaction<'_, Postgres>,
        user_id: Uuid,
    ) -> RepositoryResult<UserBalance> {
        let row = sqlx::query_as::<_, UserBalanceRow>(
            "SELECT id, available_balance, frozen_balance FROM users WHERE id = $1 FOR UPDATE",
        )
        .bind(user_id)
        .fetch_optional(&mut **tx)
        .await?;

        row.ok_or_else(|| RepositoryError::NotFound(format!("user {}", user_id)))?
            .into_domain()
    }

    async fn store_available_balance(
        tx: &mut SqlxTransaction<'_, Postgres>,
        user_id: Uuid,
        available: Amount,
    ) -> RepositoryResult<UserBalance> {
        let row = sqlx::query_as::<_, UserBalanceRow>(
            r#"
            UPDATE users SET available_balance = $2, updated_at = NOW()
            WHERE id = $1
            RETURNING id, available_balance, frozen_balance
            "#,
        )
        .bind(user_id)
        .bind(available.to_bigdecimal())
        .fetch_one(&mut **tx)
        .await?;

        row.into_domain()
    }
}

fn statuses(list: &[DepositStatus]) -> Vec<String> {
    list.iter().map(|s| s.as_str().to_string()).collect()
}

#[async_trait]
impl DepositRepository for PostgresDepositRepository {
    async fn insert(&self, deposit: NewDeposit) -> RepositoryResult<Deposit> {
        let payable = deposit.payable_amount;
        let deposit = deposit.into_deposit(Utc::now());

        let row = sqlx::query_as::<_, DepositRow>(
            r#"
            INSERT INTO deposits (
                id, user_id, requested_amount, payable_amount, wallet_address,
                expires_at, status, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING *
            "#,
        )
        .bind(deposit.id)
        .bind(deposit.user_id)
        .bind(deposit.requested_amount.to_bigdecimal())
        .bind(deposit.payable_amount.to_bigdecimal())
        .bind(&deposit.wallet_address)
        .bind(deposit.expires_at)
        .bind(deposit.status.as_str())
        .bind(deposit.created_at)
        .bind(deposit.updated_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_write_error(e, &payable.to_string()))?;

        row.into_domain()
    }

    async fn get_by_id(&self, id: Uuid) -> RepositoryResult<Deposit> {
        let row = sqlx::query_as::<_, DepositRow>("SELECT * FROM deposits WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.ok_or_else(|| RepositoryError::NotFound(format!("deposit {}", id)))?
            .into_domain()
    }

    async fn active_payable_amounts(&self) -> RepositoryResult<Vec<Amount>> {
        let amounts = sqlx::query_scalar::<_, BigDecimal>(
            "SELECT payable_amount FROM deposits WHERE status = ANY($1)",
        )
        .bind(statuses(&DepositStatus::ACTIVE))
        .fetch_all(&self.pool)
        .await?;

        amounts
            .iter()
            .map(|a| Amount::from_bigdecimal(a).map_err(RepositoryError::from))
            .collect()
    }

    async fn find_active_by_payable_amount(
        &self,
        amount: Amount,
        now: DateTime<Utc>,
    ) -> RepositoryResult<Option<Deposit>> {
        let row = sqlx::query_as::<_, DepositRow>(
            r#"
            SELECT * FROM deposits
            WHERE status = 'pending' AND payable_amount = $1 AND expires_at > $2
            LIMIT 1
            "#,
        )
        .bind(amount.to_bigdecimal())
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        row.map(DepositRow::into_domain).transpose()
    }

    async fn find_by_tx_hash(&self, tx_hash: &str) -> RepositoryResult<Option<Deposit>> {
        let row = sqlx::query_as::<_, DepositRow>("SELECT * FROM deposits WHERE tx_hash = $1")
            .bind(tx_hash)
            .fetch_optional(&self.pool)
            .await?;

        row.map(DepositRow::into_domain).transpose()
    }

    async fn transition(
        &self,
        id: Uuid,
        from: &[DepositStatus],
        to: DepositStatus,
    ) -> RepositoryResult<Deposit> {
        let row = sqlx::query_as::<_, DepositRow>(
            r#"
            UPDATE deposits SET status = $3, updated_at = NOW()
            WHERE id = $1 AND status = ANY($2)
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(statuses(from))
        .bind(to.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_write_error(e, &id.to_string()))?;

        match row {
            Some(row) => row.into_domain(),
            None => {
                let current = self.get_by_id(id).await?;
                Err(RepositoryError::InvalidState(format!(
                    "deposit {} is {}, cannot move to {}",
                    id, current.status, to
                )))
            }
        }
    }

    async fn expire_overdue(&self, now: DateTime<Utc>) -> RepositoryResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE deposits SET status = 'expired', updated_at = NOW()
            WHERE status = ANY($1) AND expires_at <= $2
            "#,
        )
        .bind(statuses(&DepositStatus::ACTIVE))
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn confirm_and_credit(&self, confirm: ConfirmDeposit) -> RepositoryResult<Deposit> {
        let mut tx = self.pool.begin().await?;

        let current = sqlx::query_as::<_, DepositRow>(
            "SELECT * FROM deposits WHERE id = $1 FOR UPDATE",
        )
        .bind(confirm.deposit_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| RepositoryError::NotFound(format!("deposit {}", confirm.deposit_id)))?
        .into_domain()?;

        if !confirm.mode.permits(&current) {
            return Err(RepositoryError::InvalidState(format!(
                "deposit {} is {} and cannot be confirmed",
                current.id, current.status
            )));
        }

        let balance = Self::lock_balance(&mut tx, current.user_id).await?;
        let credited = balance.available_balance.checked_add(confirm.amount)?;

        let confirmed = sqlx::query_as::<_, DepositRow>(
            r#"
            UPDATE deposits
            SET status = 'confirmed', tx_hash = $2, amount = $3,
                confirmed_at = NOW(), confirmed_by = $4, updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(current.id)
        .bind(&confirm.tx_hash)
        .bind(confirm.amount.to_bigdecimal())
        .bind(&confirm.confirmed_by)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_write_error(e, &confirm.tx_hash))?
        .into_domain()?;

        Self::store_available_balance(&mut tx, current.user_id, credited).await?;

        sqlx::query(
            "INSERT INTO notifications (id, user_id, kind, message) VALUES ($1, $2, $3, $4)",
        )
        .bind(Uuid::new_v4())
        .bind(current.user_id)
        .bind(confirm.notification.kind.as_str())
        .bind(&confirm.notification.message)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(confirmed)
    }

    async fn list(
        &self,
        status: Option<DepositStatus>,
        limit: i64,
        offset: i64,
    ) -> RepositoryResult<Vec<Deposit>> {
        let rows = sqlx::query_as::<_, DepositRow>(
            r#"
            SELECT * FROM deposits
            WHERE ($1::text IS NULL OR status = $1)
            ORDER BY created_at DESC, id
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(status.map(|s| s.as_str()))
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(DepositRow::into_domain).collect()
    }
}

#[async_trait]
impl LedgerRepository for PostgresDepositRepository {
    async fn balance(&self, user_id: Uuid) -> RepositoryResult<UserBalance> {
        let row = sqlx::query_as::<_, UserBalanceRow>(
            "SELECT id, available_balance, frozen_balance FROM users WHERE id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        row.ok_or_else(|| RepositoryError::NotFound(format!("user {}", user_id)))?
            .into_domain()
    }

    async fn credit(&self, user_id: Uuid, amount: Amount) -> RepositoryResult<UserBalance> {
        let mut tx = self.pool.begin().await?;
        let balance = Self::lock_balance(&mut tx, user_id).await?;
        let credited = balance.available_balance.checked_add(amount)?;
        let updated = Self::store_available_balance(&mut tx, user_id, credited).await?;
        tx.commit().await?;
        Ok(updated)
    }

    async fn debit(&self, user_id: Uuid, amount: Amount) -> RepositoryResult<UserBalance> {
        let mut tx = self.pool.begin().await?;
        let balance = Self::lock_balance(&mut tx, user_id).await?;
        let remaining = balance.available_balance.checked_sub(amount)?;
        if remaining < Amount::ZERO {
            return Err(RepositoryError::InsufficientFunds(format!(
                "user {} has {}, needs {}",
                user_id, balance.available_balance, amount
            )));
        }
        let updated = Self::store_available_balance(&mut tx, user_id, remaining).await?;
        tx.commit().await?;
        Ok(updated)
    }
}
