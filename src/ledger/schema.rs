//! Schema for the five tables named in spec.md §6.
//!
//! Grounded on `TheOusia-ousia`'s `init_ledger_schema` (one
//! `CREATE TABLE IF NOT EXISTS` per statement inside a transaction, plus
//! dedicated `CREATE INDEX IF NOT EXISTS` statements — including the
//! partial unique index this spec's at-most-one-active-bet invariant
//! depends on).

use crate::error::CoreResult;

pub async fn init_schema(pool: &sqlx::PgPool) -> CoreResult<()> {
    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS users (
            id UUID PRIMARY KEY,
            phone TEXT NOT NULL UNIQUE,
            password_hash TEXT NOT NULL,
            balance NUMERIC(18,2) NOT NULL DEFAULT 0 CHECK (balance >= 0),
            external_payment_id UUID NOT NULL UNIQUE,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS seed_commits (
            idx BIGINT PRIMARY KEY,
            seed_hash BYTEA NOT NULL UNIQUE,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS rounds (
            round_id UUID PRIMARY KEY,
            commit_idx BIGINT REFERENCES seed_commits(idx),
            server_seed_hash BYTEA NOT NULL,
            server_seed BYTEA,
            crash_point NUMERIC(10,2) NOT NULL,
            started_at TIMESTAMPTZ NOT NULL,
            ended_at TIMESTAMPTZ,
            settlement_window_seconds BIGINT NOT NULL DEFAULT 300,
            settlement_closed_at TIMESTAMPTZ,
            meta JSONB NOT NULL DEFAULT '{}'::jsonb
        )
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS bets (
            id UUID PRIMARY KEY,
            round_id UUID NOT NULL REFERENCES rounds(round_id),
            user_id UUID NOT NULL REFERENCES users(id),
            bet_amount NUMERIC(18,2) NOT NULL CHECK (bet_amount > 0),
            payout NUMERIC(18,2),
            status TEXT NOT NULL,
            bet_placed_at TIMESTAMPTZ NOT NULL,
            claimed_at TIMESTAMPTZ,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
            meta JSONB NOT NULL DEFAULT '{}'::jsonb
        )
        "#,
    )
    .execute(&mut *tx)
    .await?;

    // At-most-one-active-bet-per-round is enforced here, not in
    // application code (spec §3, §5: the storage layer is the source of
    // truth; application checks exist only for friendly errors).
    sqlx::query(
        r#"
        CREATE UNIQUE INDEX IF NOT EXISTS idx_bets_one_active_per_round
        ON bets(user_id, round_id)
        WHERE status = 'active'
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_bets_round ON bets(round_id)")
        .execute(&mut *tx)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS payments (
            id UUID PRIMARY KEY,
            user_id UUID NOT NULL REFERENCES users(id),
            type TEXT NOT NULL,
            amount NUMERIC(18,2) NOT NULL CHECK (amount > 0),
            phone TEXT,
            gateway_txn_id TEXT UNIQUE,
            external_id UUID NOT NULL UNIQUE,
            status TEXT NOT NULL,
            gateway_status TEXT,
            error_reason TEXT,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_payments_user ON payments(user_id)")
        .execute(&mut *tx)
        .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_payments_pending
        ON payments(user_id, type)
        WHERE status IN ('pending', 'processing')
        "#,
    )
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(())
}
