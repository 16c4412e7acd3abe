use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context as _, Result};
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension as _, Row, TransactionBehavior, params};

use super::{NewSwap, SwapId, SwapRecord, SwapState, TransitionFields};

const SWAP_COLUMNS: &str = r#"
  swap_id,
  bolt11_invoice,
  payment_hash,
  deposit_address,
  requested_amount_sat,
  fee_sat,
  payout_amount_sat,
  state,
  receipt_txid,
  received_amount_sat,
  payment_ref,
  failure_reason,
  reconciliation_required,
  reconciliation_note,
  created_at,
  updated_at
"#;

/// Result of a compare-and-set on a swap's state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Applied(SwapRecord),
    /// The stored state no longer matched the expected one; nothing was written.
    Conflict { actual: SwapState },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Sent,
    Failed,
    Unknown,
}

impl AttemptOutcome {
    fn as_str(self) -> &'static str {
        match self {
            AttemptOutcome::Sent => "sent",
            AttemptOutcome::Failed => "failed",
            AttemptOutcome::Unknown => "unknown",
        }
    }
}

/// One row of the durable payment attempt log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentAttempt {
    pub attempt_id: i64,
    pub swap_id: SwapId,
    pub payment_hash: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub outcome: Option<AttemptOutcome>,
    pub detail: Option<String>,
}

#[derive(Debug)]
pub struct SqliteSwapStore {
    conn: Connection,
    path: PathBuf,
}

impl SqliteSwapStore {
    pub fn open(path: PathBuf) -> Result<Self> {
        if let Some(dir) = path.parent()
            && !dir.as_os_str().is_empty()
        {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("create swap store dir {}", dir.display()))?;
        }

        let conn =
            Connection::open(&path).with_context(|| format!("open sqlite {}", path.display()))?;
        conn.busy_timeout(Duration::from_secs(5))
            .context("set sqlite busy_timeout")?;
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA foreign_keys = ON;")
            .context("configure sqlite pragmas")?;

        migrate(&conn).context("migrate sqlite schema")?;

        Ok(Self { conn, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn create_swap(&mut self, swap: &NewSwap) -> Result<SwapRecord> {
        anyhow::ensure!(
            swap.fee_sat < swap.requested_amount_sat,
            "fee {} must be below requested amount {}",
            swap.fee_sat,
            swap.requested_amount_sat
        );
        let payout_amount_sat = swap.requested_amount_sat - swap.fee_sat;
        let now = Utc::now().timestamp_millis();

        self.conn
            .execute(
                r#"
INSERT INTO swaps (
  bolt11_invoice,
  payment_hash,
  deposit_address,
  requested_amount_sat,
  fee_sat,
  payout_amount_sat,
  state,
  created_at,
  updated_at
) VALUES (
  ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8
)
"#,
                params![
                    &swap.bolt11_invoice,
                    &swap.payment_hash,
                    &swap.deposit_address,
                    to_sql_int(swap.requested_amount_sat)?,
                    to_sql_int(swap.fee_sat)?,
                    to_sql_int(payout_amount_sat)?,
                    SwapState::AwaitingFunds.as_str(),
                    now,
                ],
            )
            .with_context(|| format!("insert swap for address {}", swap.deposit_address))?;

        let swap_id = SwapId(
            u64::try_from(self.conn.last_insert_rowid()).context("swap_id must be positive")?,
        );
        self.get_swap(swap_id)?
            .with_context(|| format!("swap {swap_id} missing after insert"))
    }

    pub fn get_swap(&self, swap_id: SwapId) -> Result<Option<SwapRecord>> {
        self.conn
            .query_row(
                &format!("SELECT {SWAP_COLUMNS} FROM swaps WHERE swap_id = ?1"),
                params![to_sql_int(swap_id.0)?],
                swap_from_row,
            )
            .optional()
            .with_context(|| format!("get swap {swap_id}"))
    }

    pub fn list_swaps(&self) -> Result<Vec<SwapRecord>> {
        self.query_swaps(
            &format!("SELECT {SWAP_COLUMNS} FROM swaps ORDER BY swap_id"),
            [],
        )
        .context("list swaps")
    }

    pub fn list_swaps_by_state(&self, state: SwapState) -> Result<Vec<SwapRecord>> {
        self.query_swaps(
            &format!("SELECT {SWAP_COLUMNS} FROM swaps WHERE state = ?1 ORDER BY swap_id"),
            params![state.as_str()],
        )
        .with_context(|| format!("list swaps in state {state}"))
    }

    pub fn list_reconciliation_required(&self) -> Result<Vec<SwapRecord>> {
        self.query_swaps(
            &format!(
                "SELECT {SWAP_COLUMNS} FROM swaps WHERE reconciliation_required = 1 ORDER BY swap_id"
            ),
            [],
        )
        .context("list swaps requiring reconciliation")
    }

    /// Moves `swap_id` from `expected` to `next` only if it is still in `expected`.
    ///
    /// Fields set in `fields` are written in the same statement; `updated_at`
    /// is refreshed on success. Illegal edges are rejected before touching the
    /// database.
    pub fn transition(
        &mut self,
        swap_id: SwapId,
        expected: SwapState,
        next: SwapState,
        fields: &TransitionFields,
    ) -> Result<Transition> {
        anyhow::ensure!(
            expected.can_transition_to(next),
            "illegal transition {expected} -> {next} for swap {swap_id}"
        );

        let id = to_sql_int(swap_id.0)?;
        let received = fields.received_amount_sat.map(to_sql_int).transpose()?;
        let now = Utc::now().timestamp_millis();

        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .with_context(|| format!("begin transition for swap {swap_id}"))?;

        let rows = tx
            .execute(
                r#"
UPDATE swaps SET
  state = ?3,
  receipt_txid = COALESCE(?4, receipt_txid),
  received_amount_sat = COALESCE(?5, received_amount_sat),
  payment_ref = COALESCE(?6, payment_ref),
  failure_reason = COALESCE(?7, failure_reason),
  updated_at = ?8
WHERE swap_id = ?1 AND state = ?2
"#,
                params![
                    id,
                    expected.as_str(),
                    next.as_str(),
                    &fields.receipt_txid,
                    received,
                    &fields.payment_ref,
                    &fields.failure_reason,
                    now,
                ],
            )
            .with_context(|| format!("update swap {swap_id} {expected} -> {next}"))?;

        let record = tx
            .query_row(
                &format!("SELECT {SWAP_COLUMNS} FROM swaps WHERE swap_id = ?1"),
                params![id],
                swap_from_row,
            )
            .optional()
            .with_context(|| format!("reload swap {swap_id}"))?;

        tx.commit()
            .with_context(|| format!("commit transition for swap {swap_id}"))?;

        match record {
            None => anyhow::bail!("swap not found: {swap_id}"),
            Some(record) if rows == 1 => Ok(Transition::Applied(record)),
            Some(record) => Ok(Transition::Conflict {
                actual: record.state,
            }),
        }
    }

    /// Marks a `settling` swap for manual reconciliation. Returns `false` when
    /// it was already flagged or is no longer settling.
    pub fn flag_for_reconciliation(&mut self, swap_id: SwapId, note: &str) -> Result<bool> {
        let rows = self
            .conn
            .execute(
                r#"
UPDATE swaps SET
  reconciliation_required = 1,
  reconciliation_note = ?2
WHERE swap_id = ?1 AND state = ?3 AND reconciliation_required = 0
"#,
                params![to_sql_int(swap_id.0)?, note, SwapState::Settling.as_str()],
            )
            .with_context(|| format!("flag swap {swap_id} for reconciliation"))?;
        Ok(rows == 1)
    }

    /// Appends a payment attempt, but only while the swap is `settling`, not
    /// flagged for reconciliation, and has exactly `prior_attempts` attempts.
    ///
    /// Returns `None` when any of those no longer holds, i.e. another monitor
    /// got there first. The attempt is committed before the caller pays.
    pub fn claim_payment_attempt(
        &mut self,
        swap_id: SwapId,
        payment_hash: &str,
        prior_attempts: usize,
    ) -> Result<Option<i64>> {
        let id = to_sql_int(swap_id.0)?;
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .with_context(|| format!("begin payment claim for swap {swap_id}"))?;

        let claimable: bool = tx
            .query_row(
                r#"
SELECT
  s.state = ?2
  AND s.reconciliation_required = 0
  AND (SELECT COUNT(*) FROM payment_attempts a WHERE a.swap_id = s.swap_id) = ?3
FROM swaps s
WHERE s.swap_id = ?1
"#,
                params![
                    id,
                    SwapState::Settling.as_str(),
                    i64::try_from(prior_attempts).context("attempt count overflow")?
                ],
                |row| row.get(0),
            )
            .optional()
            .with_context(|| format!("check payment claim for swap {swap_id}"))?
            .with_context(|| format!("swap not found: {swap_id}"))?;

        if !claimable {
            return Ok(None);
        }

        tx.execute(
            "INSERT INTO payment_attempts (swap_id, payment_hash, started_at) VALUES (?1, ?2, ?3)",
            params![id, payment_hash, Utc::now().timestamp_millis()],
        )
        .with_context(|| format!("record payment attempt for swap {swap_id}"))?;
        let attempt_id = tx.last_insert_rowid();

        tx.commit()
            .with_context(|| format!("commit payment claim for swap {swap_id}"))?;
        Ok(Some(attempt_id))
    }

    /// Writes `outcome` on every attempt of `swap_id` that is still open or unknown.
    pub fn finish_payment_attempts(
        &mut self,
        swap_id: SwapId,
        outcome: AttemptOutcome,
        detail: &str,
    ) -> Result<usize> {
        self.conn
            .execute(
                r#"
UPDATE payment_attempts SET
  outcome = ?2,
  detail = ?3,
  finished_at = ?4
WHERE swap_id = ?1 AND (outcome IS NULL OR outcome = 'unknown')
"#,
                params![
                    to_sql_int(swap_id.0)?,
                    outcome.as_str(),
                    detail,
                    Utc::now().timestamp_millis()
                ],
            )
            .with_context(|| format!("finish payment attempts for swap {swap_id}"))
    }

    pub fn list_payment_attempts(&self, swap_id: SwapId) -> Result<Vec<PaymentAttempt>> {
        let mut stmt = self
            .conn
            .prepare(
                r#"
SELECT
  attempt_id,
  swap_id,
  payment_hash,
  started_at,
  finished_at,
  outcome,
  detail
FROM payment_attempts
WHERE swap_id = ?1
ORDER BY attempt_id
"#,
            )
            .context("prepare list payment attempts")?;

        let rows = stmt
            .query_map(params![to_sql_int(swap_id.0)?], |row| {
                let outcome: Option<String> = row.get(5)?;
                Ok(PaymentAttempt {
                    attempt_id: row.get(0)?,
                    swap_id: SwapId(u64_at(row, 1)?),
                    payment_hash: row.get(2)?,
                    started_at: timestamp_at(row, 3)?,
                    finished_at: row
                        .get::<_, Option<i64>>(4)?
                        .map(|_| timestamp_at(row, 4))
                        .transpose()?,
                    outcome: outcome
                        .as_deref()
                        .map(|s| outcome_from_str(s, 5))
                        .transpose()?,
                    detail: row.get(6)?,
                })
            })
            .with_context(|| format!("query payment attempts for swap {swap_id}"))?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row.context("read payment attempt row")?);
        }
        Ok(out)
    }

    fn query_swaps<P: rusqlite::Params>(&self, sql: &str, params: P) -> Result<Vec<SwapRecord>> {
        let mut stmt = self.conn.prepare(sql).context("prepare swap query")?;
        let rows = stmt
            .query_map(params, swap_from_row)
            .context("query swaps")?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row.context("read swap row")?);
        }
        Ok(out)
    }
}

fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
CREATE TABLE IF NOT EXISTS swaps (
  swap_id INTEGER PRIMARY KEY AUTOINCREMENT,
  bolt11_invoice TEXT NOT NULL,
  payment_hash TEXT NOT NULL,
  deposit_address TEXT NOT NULL UNIQUE,
  requested_amount_sat INTEGER NOT NULL,
  fee_sat INTEGER NOT NULL,
  payout_amount_sat INTEGER NOT NULL,
  state TEXT NOT NULL,
  receipt_txid TEXT,
  received_amount_sat INTEGER,
  payment_ref TEXT,
  failure_reason TEXT,
  reconciliation_required INTEGER NOT NULL DEFAULT 0,
  reconciliation_note TEXT,
  created_at INTEGER NOT NULL,
  updated_at INTEGER NOT NULL,
  CHECK (fee_sat >= 0 AND fee_sat < requested_amount_sat),
  CHECK (payout_amount_sat = requested_amount_sat - fee_sat)
);
CREATE INDEX IF NOT EXISTS swaps_state_idx ON swaps(state);

CREATE TRIGGER IF NOT EXISTS swaps_append_only
BEFORE DELETE ON swaps
BEGIN
  SELECT RAISE(ABORT, 'swaps are append-only');
END;

CREATE TABLE IF NOT EXISTS payment_attempts (
  attempt_id INTEGER PRIMARY KEY AUTOINCREMENT,
  swap_id INTEGER NOT NULL REFERENCES swaps(swap_id),
  payment_hash TEXT NOT NULL,
  started_at INTEGER NOT NULL,
  finished_at INTEGER,
  outcome TEXT,
  detail TEXT
);
CREATE INDEX IF NOT EXISTS payment_attempts_swap_idx ON payment_attempts(swap_id);
"#,
    )
    .context("create tables")?;
    Ok(())
}

fn swap_from_row(row: &Row<'_>) -> rusqlite::Result<SwapRecord> {
    let state_str: String = row.get(7)?;
    let state = state_str.parse::<SwapState>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(7, Type::Text, e.to_string().into())
    })?;

    Ok(SwapRecord {
        swap_id: SwapId(u64_at(row, 0)?),
        bolt11_invoice: row.get(1)?,
        payment_hash: row.get(2)?,
        deposit_address: row.get(3)?,
        requested_amount_sat: u64_at(row, 4)?,
        fee_sat: u64_at(row, 5)?,
        payout_amount_sat: u64_at(row, 6)?,
        state,
        receipt_txid: row.get(8)?,
        received_amount_sat: row
            .get::<_, Option<i64>>(9)?
            .map(|_| u64_at(row, 9))
            .transpose()?,
        payment_ref: row.get(10)?,
        failure_reason: row.get(11)?,
        reconciliation_required: row.get(12)?,
        reconciliation_note: row.get(13)?,
        created_at: timestamp_at(row, 14)?,
        updated_at: timestamp_at(row, 15)?,
    })
}

fn u64_at(row: &Row<'_>, col: usize) -> rusqlite::Result<u64> {
    let value: i64 = row.get(col)?;
    u64::try_from(value).map_err(|_| {
        rusqlite::Error::FromSqlConversionFailure(
            col,
            Type::Integer,
            format!("negative value {value}").into(),
        )
    })
}

fn timestamp_at(row: &Row<'_>, col: usize) -> rusqlite::Result<DateTime<Utc>> {
    let millis: i64 = row.get(col)?;
    DateTime::from_timestamp_millis(millis).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            col,
            Type::Integer,
            format!("timestamp out of range {millis}").into(),
        )
    })
}

fn outcome_from_str(s: &str, col: usize) -> rusqlite::Result<AttemptOutcome> {
    match s {
        "sent" => Ok(AttemptOutcome::Sent),
        "failed" => Ok(AttemptOutcome::Failed),
        "unknown" => Ok(AttemptOutcome::Unknown),
        other => Err(rusqlite::Error::FromSqlConversionFailure(
            col,
            Type::Text,
            format!("unknown attempt outcome: {other}").into(),
        )),
    }
}

fn to_sql_int(value: u64) -> Result<i64> {
    i64::try_from(value).with_context(|| format!("value {value} exceeds sqlite integer range"))
}
