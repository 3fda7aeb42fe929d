//! SQLite Persistent Ledger
//!
//! Durable storage for blocks, deposits, claims, exit roots and monitored
//! claim transactions. Uses connection pooling via r2d2 for concurrent access.
//!
//! Hashes and addresses are stored as `0x` lowercase hex, 256-bit amounts as
//! decimal text. Monitored tx history lives in its own table: hashes are never
//! removed and a retired hash never becomes live again.
//!
//! rusqlite calls block, so every statement runs on tokio's blocking pool.
//! A caller that gives up on a call (the store deadline) is not held up by a
//! busy database.

use alloy_primitives::{Address, B256, U256};
use async_trait::async_trait;
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::types::Type;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use std::collections::BTreeSet;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError};

use super::traits::{LedgerOps, LedgerStore, LedgerTx, StorageError, StorageResult};
use crate::types::{
    to_hex, Block, Claim, Deposit, DepositId, DepositKey, ExitRoot, LeafType, MonitoredTx,
    MonitoredTxStatus, NetworkId,
};

type SqlitePool = Pool<SqliteConnectionManager>;
type SqliteConn = PooledConnection<SqliteConnectionManager>;

const DEPOSIT_COLUMNS: &str = "network_id, deposit_count, leaf_type, orig_net, orig_addr, amount, \
     dest_net, dest_addr, block_id, block_number, tx_hash, metadata, time, ready_for_claim, ready_time";

/// SQLite-backed ledger with connection pooling
pub struct SqliteLedger {
    pool: SqlitePool,
}

impl SqliteLedger {
    /// Open (or create) the database at `db_path` and run migrations
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self, StorageError> {
        // Ensure parent directory exists
        if let Some(parent) = db_path.as_ref().parent() {
            std::fs::create_dir_all(parent).ok();
        }

        let manager = SqliteConnectionManager::file(db_path).with_init(|conn| {
            conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA busy_timeout = 5000;")
        });
        let pool = Pool::builder()
            .max_size(10)
            .build(manager)
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        let store = Self { pool };
        store.run_migrations()?;

        Ok(store)
    }

    /// Create an in-memory ledger (for testing)
    ///
    /// Single connection: a transaction must not be held open while the
    /// store itself is used.
    pub fn in_memory() -> Result<Self, StorageError> {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder()
            .max_size(1)
            .build(manager)
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        let store = Self { pool };
        store.run_migrations()?;

        Ok(store)
    }

    fn conn(&self) -> Result<SqliteConn, StorageError> {
        self.pool
            .get()
            .map_err(|e| StorageError::Connection(e.to_string()))
    }

    fn run_migrations(&self) -> Result<(), StorageError> {
        let conn = self.conn()?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS blocks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                network_id INTEGER NOT NULL,
                block_number INTEGER NOT NULL,
                block_hash TEXT NOT NULL,
                parent_hash TEXT NOT NULL,
                received_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS deposits (
                network_id INTEGER NOT NULL,
                deposit_count INTEGER NOT NULL,
                leaf_type INTEGER NOT NULL,
                orig_net INTEGER NOT NULL,
                orig_addr TEXT NOT NULL,
                amount TEXT NOT NULL,
                dest_net INTEGER NOT NULL,
                dest_addr TEXT NOT NULL,
                block_id INTEGER NOT NULL,
                block_number INTEGER NOT NULL,
                tx_hash TEXT NOT NULL,
                metadata BLOB NOT NULL,
                time INTEGER NOT NULL,
                ready_for_claim INTEGER NOT NULL DEFAULT 0,
                ready_time INTEGER,
                PRIMARY KEY (network_id, deposit_count)
            );

            CREATE INDEX IF NOT EXISTS idx_deposits_dest_addr ON deposits(dest_addr);
            CREATE INDEX IF NOT EXISTS idx_deposits_tx_hash ON deposits(tx_hash);
            CREATE INDEX IF NOT EXISTS idx_deposits_ready ON deposits(network_id, ready_for_claim);

            CREATE TABLE IF NOT EXISTS claims (
                idx INTEGER NOT NULL,
                network_id INTEGER NOT NULL,
                orig_net INTEGER NOT NULL,
                orig_addr TEXT NOT NULL,
                amount TEXT NOT NULL,
                dest_addr TEXT NOT NULL,
                tx_hash TEXT NOT NULL,
                block_id INTEGER NOT NULL,
                time INTEGER NOT NULL,
                PRIMARY KEY (idx, network_id)
            );

            CREATE TABLE IF NOT EXISTS exit_roots (
                root TEXT NOT NULL,
                network INTEGER NOT NULL,
                deposit_count INTEGER NOT NULL,
                block_id INTEGER NOT NULL,
                PRIMARY KEY (root, network)
            );

            CREATE TABLE IF NOT EXISTS monitored_txs (
                network_id INTEGER NOT NULL,
                deposit_count INTEGER NOT NULL,
                from_addr TEXT NOT NULL,
                to_addr TEXT NOT NULL,
                nonce INTEGER NOT NULL,
                value TEXT NOT NULL,
                data BLOB NOT NULL,
                gas INTEGER NOT NULL,
                gas_price TEXT NOT NULL,
                status TEXT NOT NULL,
                current_hash TEXT,
                attempts INTEGER NOT NULL DEFAULT 0,
                started_at INTEGER NOT NULL,
                next_attempt_at INTEGER NOT NULL,
                last_broadcast_at INTEGER,
                last_error TEXT,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (network_id, deposit_count)
            );

            CREATE INDEX IF NOT EXISTS idx_monitored_txs_status ON monitored_txs(status);

            CREATE INDEX IF NOT EXISTS idx_monitored_txs_from ON monitored_txs(from_addr, status);

            CREATE TABLE IF NOT EXISTS monitored_tx_history (
                network_id INTEGER NOT NULL,
                deposit_count INTEGER NOT NULL,
                tx_hash TEXT NOT NULL,
                retired INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (network_id, deposit_count, tx_hash)
            );
            "#,
        )
        .map_err(|e| StorageError::Database(e.to_string()))?;

        Ok(())
    }

    async fn with_conn<R, F>(&self, f: F) -> StorageResult<R>
    where
        F: FnOnce(&Connection) -> StorageResult<R> + Send + 'static,
        R: Send + 'static,
    {
        let pool = self.pool.clone();
        run_blocking(move || {
            let conn = pool
                .get()
                .map_err(|e| StorageError::Connection(e.to_string()))?;
            f(&conn)
        })
        .await
    }
}

async fn run_blocking<R, F>(f: F) -> StorageResult<R>
where
    F: FnOnce() -> StorageResult<R> + Send + 'static,
    R: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| StorageError::Database(format!("blocking task failed: {}", e)))?
}

/// Map a query error, surfacing undecodable columns as invalid data
fn db_err(e: rusqlite::Error) -> StorageError {
    match e {
        rusqlite::Error::FromSqlConversionFailure(_, _, inner) => {
            StorageError::InvalidData(inner.to_string())
        }
        other => StorageError::Database(other.to_string()),
    }
}

fn insert_err(e: rusqlite::Error, what: String) -> StorageError {
    if let rusqlite::Error::SqliteFailure(ref err, _) = e {
        if err.extended_code == 1555 || err.extended_code == 2067 {
            return StorageError::Duplicate(what);
        }
    }
    StorageError::Database(e.to_string())
}

fn parse_text<T>(row: &rusqlite::Row, column: &str) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: String = row.get(column)?;
    raw.parse::<T>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(e)))
}

fn conversion(msg: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        0,
        Type::Text,
        Box::new(StorageError::InvalidData(msg)),
    )
}

fn row_to_deposit(row: &rusqlite::Row) -> rusqlite::Result<Deposit> {
    let leaf_raw: i64 = row.get("leaf_type")?;
    let leaf_type = LeafType::from_u8(leaf_raw as u8)
        .ok_or_else(|| conversion(format!("unknown leaf type {}", leaf_raw)))?;

    Ok(Deposit {
        leaf_type,
        orig_net: row.get::<_, i64>("orig_net")? as NetworkId,
        orig_addr: parse_text::<Address>(row, "orig_addr")?,
        amount: parse_text::<U256>(row, "amount")?,
        dest_net: row.get::<_, i64>("dest_net")? as NetworkId,
        dest_addr: parse_text::<Address>(row, "dest_addr")?,
        network_id: row.get::<_, i64>("network_id")? as NetworkId,
        deposit_count: row.get::<_, i64>("deposit_count")? as u32,
        block_id: row.get::<_, i64>("block_id")? as u64,
        block_number: row.get::<_, i64>("block_number")? as u64,
        tx_hash: parse_text::<B256>(row, "tx_hash")?,
        metadata: row.get("metadata")?,
        time: row.get::<_, i64>("time")? as u64,
        ready_for_claim: row.get::<_, i64>("ready_for_claim")? != 0,
        ready_time: row.get::<_, Option<i64>>("ready_time")?.map(|v| v as u64),
    })
}

fn row_to_claim(row: &rusqlite::Row) -> rusqlite::Result<Claim> {
    Ok(Claim {
        index: row.get::<_, i64>("idx")? as u32,
        orig_net: row.get::<_, i64>("orig_net")? as NetworkId,
        orig_addr: parse_text::<Address>(row, "orig_addr")?,
        amount: parse_text::<U256>(row, "amount")?,
        dest_addr: parse_text::<Address>(row, "dest_addr")?,
        network_id: row.get::<_, i64>("network_id")? as NetworkId,
        tx_hash: parse_text::<B256>(row, "tx_hash")?,
        block_id: row.get::<_, i64>("block_id")? as u64,
        time: row.get::<_, i64>("time")? as u64,
    })
}

fn row_to_exit_root(row: &rusqlite::Row) -> rusqlite::Result<ExitRoot> {
    Ok(ExitRoot {
        root: parse_text::<B256>(row, "root")?,
        network: row.get::<_, i64>("network")? as NetworkId,
        deposit_count: row.get::<_, i64>("deposit_count")? as u32,
        block_id: row.get::<_, i64>("block_id")? as u64,
    })
}

/// Decode a monitored tx row; history is loaded separately
fn row_to_monitored(row: &rusqlite::Row) -> rusqlite::Result<MonitoredTx> {
    let status: MonitoredTxStatus = {
        let raw: String = row.get("status")?;
        raw.parse().map_err(conversion)?
    };
    let current_hash = match row.get::<_, Option<String>>("current_hash")? {
        Some(raw) => Some(
            raw.parse::<B256>()
                .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(e)))?,
        ),
        None => None,
    };

    Ok(MonitoredTx {
        deposit_id: DepositId::new(
            row.get::<_, i64>("network_id")? as NetworkId,
            row.get::<_, i64>("deposit_count")? as u32,
        ),
        from: parse_text::<Address>(row, "from_addr")?,
        to: parse_text::<Address>(row, "to_addr")?,
        nonce: row.get::<_, i64>("nonce")? as u64,
        value: parse_text::<U256>(row, "value")?,
        data: row.get("data")?,
        gas: row.get::<_, i64>("gas")? as u64,
        gas_price: parse_text::<U256>(row, "gas_price")?,
        status,
        history: BTreeSet::new(),
        retired: BTreeSet::new(),
        current_hash,
        attempts: row.get::<_, i64>("attempts")? as u32,
        started_at: row.get::<_, i64>("started_at")? as u64,
        next_attempt_at: row.get::<_, i64>("next_attempt_at")? as u64,
        last_broadcast_at: row
            .get::<_, Option<i64>>("last_broadcast_at")?
            .map(|v| v as u64),
        last_error: row.get("last_error")?,
        created_at: row.get::<_, i64>("created_at")? as u64,
        updated_at: row.get::<_, i64>("updated_at")? as u64,
    })
}

/// Statement bodies shared by the store and its transactions
mod queries {
    use super::*;

    pub fn add_block(conn: &Connection, block: &Block) -> StorageResult<u64> {
        conn.execute(
            r#"
            INSERT INTO blocks (network_id, block_number, block_hash, parent_hash, received_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                block.network_id as i64,
                block.block_number as i64,
                to_hex(block.block_hash.as_slice()),
                to_hex(block.parent_hash.as_slice()),
                block.received_at as i64,
            ],
        )
        .map_err(db_err)?;
        Ok(conn.last_insert_rowid() as u64)
    }

    pub fn add_deposit(conn: &Connection, d: &Deposit) -> StorageResult<()> {
        conn.execute(
            &format!(
                "INSERT INTO deposits ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
                DEPOSIT_COLUMNS
            ),
            params![
                d.network_id as i64,
                d.deposit_count as i64,
                d.leaf_type.as_u8() as i64,
                d.orig_net as i64,
                to_hex(d.orig_addr.as_slice()),
                d.amount.to_string(),
                d.dest_net as i64,
                to_hex(d.dest_addr.as_slice()),
                d.block_id as i64,
                d.block_number as i64,
                to_hex(d.tx_hash.as_slice()),
                d.metadata,
                d.time as i64,
                d.ready_for_claim as i64,
                d.ready_time.map(|v| v as i64),
            ],
        )
        .map_err(|e| insert_err(e, format!("deposit {}", d.id())))?;
        Ok(())
    }

    pub fn add_claim(conn: &Connection, c: &Claim) -> StorageResult<()> {
        conn.execute(
            r#"
            INSERT INTO claims (idx, network_id, orig_net, orig_addr, amount, dest_addr, tx_hash, block_id, time)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
            params![
                c.index as i64,
                c.network_id as i64,
                c.orig_net as i64,
                to_hex(c.orig_addr.as_slice()),
                c.amount.to_string(),
                to_hex(c.dest_addr.as_slice()),
                to_hex(c.tx_hash.as_slice()),
                c.block_id as i64,
                c.time as i64,
            ],
        )
        .map_err(|e| insert_err(e, format!("claim {}/{}", c.network_id, c.index)))?;
        Ok(())
    }

    pub fn add_exit_root(conn: &Connection, r: &ExitRoot) -> StorageResult<()> {
        conn.execute(
            "INSERT INTO exit_roots (root, network, deposit_count, block_id) VALUES (?1, ?2, ?3, ?4)",
            params![
                to_hex(r.root.as_slice()),
                r.network as i64,
                r.deposit_count as i64,
                r.block_id as i64,
            ],
        )
        .map_err(|e| insert_err(e, format!("exit root {} on {}", r.root, r.network)))?;
        Ok(())
    }

    pub fn latest_exit_root(conn: &Connection, network: NetworkId) -> StorageResult<Option<ExitRoot>> {
        conn.query_row(
            r#"
            SELECT * FROM exit_roots WHERE network = ?1
            ORDER BY deposit_count DESC, block_id DESC LIMIT 1
            "#,
            params![network as i64],
            row_to_exit_root,
        )
        .optional()
        .map_err(db_err)
    }

    pub fn deposit(conn: &Connection, id: DepositId) -> StorageResult<Option<Deposit>> {
        conn.query_row(
            &format!(
                "SELECT {} FROM deposits WHERE network_id = ?1 AND deposit_count = ?2",
                DEPOSIT_COLUMNS
            ),
            params![id.network_id as i64, id.deposit_count as i64],
            row_to_deposit,
        )
        .optional()
        .map_err(db_err)
    }

    pub fn deposit_by_key(conn: &Connection, key: &DepositKey) -> StorageResult<Option<Deposit>> {
        conn.query_row(
            &format!(
                "SELECT {} FROM deposits WHERE dest_addr = ?1 AND network_id = ?2 AND tx_hash = ?3",
                DEPOSIT_COLUMNS
            ),
            params![
                to_hex(key.dest_addr.as_slice()),
                key.network_id as i64,
                to_hex(key.tx_hash.as_slice()),
            ],
            row_to_deposit,
        )
        .optional()
        .map_err(db_err)
    }

    /// Run a deposit listing whose `WHERE` clause uses `?1..` for `args`
    /// followed by limit and offset
    pub fn deposit_list(
        conn: &Connection,
        where_clause: &str,
        args: Vec<rusqlite::types::Value>,
        limit: u32,
        offset: u32,
    ) -> StorageResult<Vec<Deposit>> {
        let n = args.len();
        let sql = format!(
            "SELECT {} FROM deposits d WHERE {} ORDER BY d.block_id DESC, d.deposit_count DESC LIMIT ?{} OFFSET ?{}",
            DEPOSIT_COLUMNS,
            where_clause,
            n + 1,
            n + 2
        );
        let mut values = args;
        values.push((limit as i64).into());
        values.push((offset as i64).into());

        let mut stmt = conn.prepare(&sql).map_err(db_err)?;
        let rows = stmt
            .query_map(params_from_iter(values), row_to_deposit)
            .map_err(db_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(db_err)?;
        Ok(rows)
    }

    pub const UNCLAIMED: &str =
        "NOT EXISTS (SELECT 1 FROM claims c WHERE c.idx = d.deposit_count AND c.network_id = d.dest_net)";

    pub fn claim(conn: &Connection, deposit_count: u32, network: NetworkId) -> StorageResult<Option<Claim>> {
        conn.query_row(
            "SELECT * FROM claims WHERE idx = ?1 AND network_id = ?2",
            params![deposit_count as i64, network as i64],
            row_to_claim,
        )
        .optional()
        .map_err(db_err)
    }

    pub fn mark_ready(
        conn: &Connection,
        network: NetworkId,
        root: B256,
        ready_time: u64,
    ) -> StorageResult<Vec<Deposit>> {
        let sql = format!(
            r#"
            UPDATE deposits SET ready_for_claim = 1, ready_time = ?3
            WHERE network_id = ?1 AND ready_for_claim = 0
              AND deposit_count <= (SELECT deposit_count FROM exit_roots WHERE root = ?2 AND network = ?1)
            RETURNING {}
            "#,
            DEPOSIT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql).map_err(db_err)?;
        let rows = stmt
            .query_map(
                params![network as i64, to_hex(root.as_slice()), ready_time as i64],
                row_to_deposit,
            )
            .map_err(db_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(db_err)?;
        Ok(rows)
    }

    pub fn upsert_monitored(conn: &Connection, tx: &MonitoredTx) -> StorageResult<()> {
        let id = tx.deposit_id;
        conn.execute(
            r#"
            INSERT INTO monitored_txs (
                network_id, deposit_count, from_addr, to_addr, nonce, value, data, gas,
                gas_price, status, current_hash, attempts, started_at, next_attempt_at,
                last_broadcast_at, last_error, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)
            ON CONFLICT (network_id, deposit_count) DO UPDATE SET
                from_addr = excluded.from_addr,
                to_addr = excluded.to_addr,
                nonce = excluded.nonce,
                value = excluded.value,
                data = excluded.data,
                gas = excluded.gas,
                gas_price = excluded.gas_price,
                status = excluded.status,
                current_hash = excluded.current_hash,
                attempts = excluded.attempts,
                started_at = excluded.started_at,
                next_attempt_at = excluded.next_attempt_at,
                last_broadcast_at = excluded.last_broadcast_at,
                last_error = excluded.last_error,
                updated_at = excluded.updated_at
            "#,
            params![
                id.network_id as i64,
                id.deposit_count as i64,
                to_hex(tx.from.as_slice()),
                to_hex(tx.to.as_slice()),
                tx.nonce as i64,
                tx.value.to_string(),
                tx.data,
                tx.gas as i64,
                tx.gas_price.to_string(),
                tx.status.to_string(),
                tx.current_hash.map(|h| to_hex(h.as_slice())),
                tx.attempts as i64,
                tx.started_at as i64,
                tx.next_attempt_at as i64,
                tx.last_broadcast_at.map(|v| v as i64),
                tx.last_error,
                tx.created_at as i64,
                tx.updated_at as i64,
            ],
        )
        .map_err(db_err)?;

        let mut stmt = conn
            .prepare(
                r#"
                INSERT INTO monitored_tx_history (network_id, deposit_count, tx_hash, retired)
                VALUES (?1, ?2, ?3, ?4)
                ON CONFLICT (network_id, deposit_count, tx_hash) DO UPDATE SET
                    retired = MAX(retired, excluded.retired)
                "#,
            )
            .map_err(db_err)?;
        for hash in &tx.history {
            stmt.execute(params![
                id.network_id as i64,
                id.deposit_count as i64,
                to_hex(hash.as_slice()),
                tx.is_retired(hash) as i64,
            ])
            .map_err(db_err)?;
        }
        Ok(())
    }

    fn load_history(conn: &Connection, tx: &mut MonitoredTx) -> StorageResult<()> {
        let mut stmt = conn
            .prepare(
                "SELECT tx_hash, retired FROM monitored_tx_history WHERE network_id = ?1 AND deposit_count = ?2",
            )
            .map_err(db_err)?;
        let entries = stmt
            .query_map(
                params![
                    tx.deposit_id.network_id as i64,
                    tx.deposit_id.deposit_count as i64
                ],
                |row| Ok((parse_text::<B256>(row, "tx_hash")?, row.get::<_, i64>("retired")? != 0)),
            )
            .map_err(db_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(db_err)?;

        tx.history = entries.iter().map(|(hash, _)| *hash).collect();
        tx.retired = entries
            .iter()
            .filter(|(_, retired)| *retired)
            .map(|(hash, _)| *hash)
            .collect();
        Ok(())
    }

    pub fn monitored(conn: &Connection, id: DepositId) -> StorageResult<Option<MonitoredTx>> {
        let row = conn
            .query_row(
                "SELECT * FROM monitored_txs WHERE network_id = ?1 AND deposit_count = ?2",
                params![id.network_id as i64, id.deposit_count as i64],
                row_to_monitored,
            )
            .optional()
            .map_err(db_err)?;

        match row {
            Some(mut tx) => {
                load_history(conn, &mut tx)?;
                Ok(Some(tx))
            }
            None => Ok(None),
        }
    }

    pub fn max_live_nonce(conn: &Connection, from: &Address) -> StorageResult<Option<u64>> {
        let max: Option<i64> = conn
            .query_row(
                "SELECT MAX(nonce) FROM monitored_txs WHERE from_addr = ?1 AND status IN (?2, ?3)",
                params![
                    to_hex(from.as_slice()),
                    MonitoredTxStatus::Created.to_string(),
                    MonitoredTxStatus::Sent.to_string(),
                ],
                |row| row.get(0),
            )
            .map_err(db_err)?;
        Ok(max.map(|n| n as u64))
    }

    pub fn latest_ready(conn: &Connection, network: NetworkId, limit: u32) -> StorageResult<Vec<Deposit>> {
        let sql = format!(
            "SELECT {} FROM deposits WHERE network_id = ?1 AND ready_for_claim = 1 \
             AND ready_time IS NOT NULL ORDER BY deposit_count DESC LIMIT ?2",
            DEPOSIT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql).map_err(db_err)?;
        let rows = stmt
            .query_map(params![network as i64, limit as i64], row_to_deposit)
            .map_err(db_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(db_err)?;
        Ok(rows)
    }

    pub fn monitored_by_status(
        conn: &Connection,
        statuses: &[MonitoredTxStatus],
        limit: u32,
        offset: u32,
    ) -> StorageResult<Vec<MonitoredTx>> {
        if statuses.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders: Vec<String> = (1..=statuses.len()).map(|i| format!("?{}", i)).collect();
        let sql = format!(
            "SELECT * FROM monitored_txs WHERE status IN ({}) \
             ORDER BY created_at ASC, network_id ASC, deposit_count ASC LIMIT ?{} OFFSET ?{}",
            placeholders.join(", "),
            statuses.len() + 1,
            statuses.len() + 2
        );
        let mut values: Vec<rusqlite::types::Value> =
            statuses.iter().map(|s| s.to_string().into()).collect();
        values.push((limit as i64).into());
        values.push((offset as i64).into());

        let mut stmt = conn.prepare(&sql).map_err(db_err)?;
        let mut rows = stmt
            .query_map(params_from_iter(values), row_to_monitored)
            .map_err(db_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(db_err)?;
        for tx in rows.iter_mut() {
            load_history(conn, tx)?;
        }
        Ok(rows)
    }
}

/// Implements [`LedgerOps`] for a type with an async `with_conn` that runs
/// its closure on the blocking pool
macro_rules! impl_sqlite_ops {
    ($ty:ty) => {
        #[async_trait]
        impl LedgerOps for $ty {
            async fn add_block(&self, block: &Block) -> StorageResult<u64> {
                let block = block.clone();
                self.with_conn(move |c| queries::add_block(c, &block)).await
            }

            async fn add_deposit(&self, deposit: &Deposit) -> StorageResult<()> {
                let deposit = deposit.clone();
                self.with_conn(move |c| queries::add_deposit(c, &deposit)).await
            }

            async fn add_claim(&self, claim: &Claim) -> StorageResult<()> {
                let claim = claim.clone();
                self.with_conn(move |c| queries::add_claim(c, &claim)).await
            }

            async fn add_exit_root(&self, root: &ExitRoot) -> StorageResult<()> {
                let root = root.clone();
                self.with_conn(move |c| queries::add_exit_root(c, &root)).await
            }

            async fn get_latest_exit_root(
                &self,
                network: NetworkId,
            ) -> StorageResult<Option<ExitRoot>> {
                self.with_conn(move |c| queries::latest_exit_root(c, network)).await
            }

            async fn get_deposit(&self, id: DepositId) -> StorageResult<Option<Deposit>> {
                self.with_conn(move |c| queries::deposit(c, id)).await
            }

            async fn get_deposit_by_key(&self, key: &DepositKey) -> StorageResult<Option<Deposit>> {
                let key = *key;
                self.with_conn(move |c| queries::deposit_by_key(c, &key)).await
            }

            async fn get_deposits(
                &self,
                dest_addr: &Address,
                limit: u32,
                offset: u32,
            ) -> StorageResult<Vec<Deposit>> {
                let args = vec![to_hex(dest_addr.as_slice()).into()];
                self.with_conn(move |c| queries::deposit_list(c, "d.dest_addr = ?1", args, limit, offset))
                    .await
            }

            async fn get_pending_deposits(
                &self,
                dest_addr: &Address,
                limit: u32,
                offset: u32,
            ) -> StorageResult<Vec<Deposit>> {
                let args = vec![to_hex(dest_addr.as_slice()).into()];
                let clause = format!("d.dest_addr = ?1 AND {}", queries::UNCLAIMED);
                self.with_conn(move |c| queries::deposit_list(c, &clause, args, limit, offset))
                    .await
            }

            async fn get_not_ready_deposits(
                &self,
                limit: u32,
                offset: u32,
            ) -> StorageResult<Vec<Deposit>> {
                self.with_conn(move |c| {
                    queries::deposit_list(c, "d.ready_for_claim = 0", Vec::new(), limit, offset)
                })
                .await
            }

            async fn get_claimable_deposits(
                &self,
                network: NetworkId,
                leaf_type: LeafType,
                limit: u32,
                offset: u32,
                ready_before: u64,
            ) -> StorageResult<Vec<Deposit>> {
                let args = vec![
                    (network as i64).into(),
                    (leaf_type.as_u8() as i64).into(),
                    (ready_before as i64).into(),
                ];
                let clause = format!(
                    "d.network_id = ?1 AND d.leaf_type = ?2 AND d.ready_for_claim = 1 \
                     AND d.ready_time <= ?3 AND {}",
                    queries::UNCLAIMED
                );
                self.with_conn(move |c| queries::deposit_list(c, &clause, args, limit, offset))
                    .await
            }

            async fn get_not_ready_deposits_in_block_range(
                &self,
                network: NetworkId,
                min_block: u64,
                max_block: u64,
                limit: u32,
                offset: u32,
            ) -> StorageResult<Vec<Deposit>> {
                let args = vec![
                    (network as i64).into(),
                    (min_block as i64).into(),
                    (max_block as i64).into(),
                ];
                let clause = "d.network_id = ?1 AND d.ready_for_claim = 0 \
                     AND d.block_number >= ?2 AND d.block_number <= ?3";
                self.with_conn(move |c| queries::deposit_list(c, clause, args, limit, offset))
                    .await
            }

            async fn get_latest_ready_deposits(
                &self,
                network: NetworkId,
                limit: u32,
            ) -> StorageResult<Vec<Deposit>> {
                self.with_conn(move |c| queries::latest_ready(c, network, limit)).await
            }

            async fn get_claim(
                &self,
                deposit_count: u32,
                network: NetworkId,
            ) -> StorageResult<Option<Claim>> {
                self.with_conn(move |c| queries::claim(c, deposit_count, network)).await
            }

            async fn mark_deposits_ready(
                &self,
                network: NetworkId,
                root: B256,
                ready_time: u64,
            ) -> StorageResult<Vec<Deposit>> {
                self.with_conn(move |c| queries::mark_ready(c, network, root, ready_time))
                    .await
            }

            async fn upsert_monitored_tx(&self, tx: &MonitoredTx) -> StorageResult<()> {
                let tx = tx.clone();
                self.with_conn(move |c| queries::upsert_monitored(c, &tx)).await
            }

            async fn get_monitored_tx(&self, id: DepositId) -> StorageResult<Option<MonitoredTx>> {
                self.with_conn(move |c| queries::monitored(c, id)).await
            }

            async fn get_max_live_nonce(&self, from: &Address) -> StorageResult<Option<u64>> {
                let from = *from;
                self.with_conn(move |c| queries::max_live_nonce(c, &from)).await
            }

            async fn get_monitored_txs_by_status(
                &self,
                statuses: &[MonitoredTxStatus],
                limit: u32,
                offset: u32,
            ) -> StorageResult<Vec<MonitoredTx>> {
                let statuses = statuses.to_vec();
                self.with_conn(move |c| queries::monitored_by_status(c, &statuses, limit, offset))
                    .await
            }
        }
    };
}

impl_sqlite_ops!(SqliteLedger);

#[async_trait]
impl LedgerStore for SqliteLedger {
    async fn begin(&self) -> StorageResult<Box<dyn LedgerTx>> {
        let pool = self.pool.clone();
        run_blocking(move || {
            let conn = pool
                .get()
                .map_err(|e| StorageError::Connection(e.to_string()))?;
            conn.execute_batch("BEGIN IMMEDIATE").map_err(db_err)?;
            // Dropped unreturned if the caller timed out, which rolls back
            let tx: Box<dyn LedgerTx> = Box::new(SqliteTx {
                conn: Arc::new(Mutex::new(Some(conn))),
            });
            Ok(tx)
        })
        .await
    }
}

type TxConn = Arc<Mutex<Option<SqliteConn>>>;

/// End the transaction on `conn` once; later calls are no-ops
fn finish(conn: &TxConn, statement: &str) -> StorageResult<()> {
    let taken = conn.lock().unwrap_or_else(PoisonError::into_inner).take();
    match taken {
        Some(conn) => conn.execute_batch(statement).map_err(db_err),
        None => Ok(()),
    }
}

/// Open `BEGIN IMMEDIATE` transaction holding one pooled connection
pub struct SqliteTx {
    conn: TxConn,
}

impl SqliteTx {
    async fn with_conn<R, F>(&self, f: F) -> StorageResult<R>
    where
        F: FnOnce(&Connection) -> StorageResult<R> + Send + 'static,
        R: Send + 'static,
    {
        let conn = self.conn.clone();
        run_blocking(move || {
            let guard = conn.lock().unwrap_or_else(PoisonError::into_inner);
            match guard.as_ref() {
                Some(conn) => f(conn),
                None => Err(StorageError::Database("transaction already finished".into())),
            }
        })
        .await
    }
}

impl_sqlite_ops!(SqliteTx);

#[async_trait]
impl LedgerTx for SqliteTx {
    async fn commit(self: Box<Self>) -> StorageResult<()> {
        let conn = self.conn.clone();
        run_blocking(move || finish(&conn, "COMMIT")).await
    }

    async fn rollback(self: Box<Self>) -> StorageResult<()> {
        let conn = self.conn.clone();
        run_blocking(move || finish(&conn, "ROLLBACK")).await
    }
}

impl Drop for SqliteTx {
    fn drop(&mut self) {
        if let Err(e) = finish(&self.conn, "ROLLBACK") {
            tracing::warn!(target: "xbridge::storage", error = %e, "rollback on drop failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Timed;
    use crate::testing::{claim_for, deposit, exit_root, monitored_tx};
    use std::time::{Duration, Instant};

    fn temp_db_path() -> std::path::PathBuf {
        std::env::temp_dir().join(format!("xbridge-{}.db", uuid::Uuid::new_v4()))
    }

    #[tokio::test]
    async fn test_insert_and_get_deposit() {
        let store = SqliteLedger::in_memory().unwrap();
        let mut d = deposit(0, 3);
        d.amount = U256::from_str_radix("123456789012345678901234567890", 10).unwrap();
        d.metadata = vec![1, 2, 3];
        store.add_deposit(&d).await.unwrap();

        let by_id = store.get_deposit(d.id()).await.unwrap().unwrap();
        assert_eq!(by_id, d);

        let by_key = store.get_deposit_by_key(&d.key()).await.unwrap().unwrap();
        assert_eq!(by_key.deposit_count, 3);
    }

    #[tokio::test]
    async fn test_duplicate_deposit() {
        let store = SqliteLedger::in_memory().unwrap();
        store.add_deposit(&deposit(0, 1)).await.unwrap();
        let result = store.add_deposit(&deposit(0, 1)).await;
        assert!(matches!(result, Err(StorageError::Duplicate(_))));
    }

    #[tokio::test]
    async fn test_mark_ready_returns_changed_rows_once() {
        let store = SqliteLedger::in_memory().unwrap();
        for count in 0..5 {
            store.add_deposit(&deposit(0, count)).await.unwrap();
        }
        let root = exit_root(0, 3, 0x42);
        store.add_exit_root(&root).await.unwrap();

        let updated = store.mark_deposits_ready(0, root.root, 777).await.unwrap();
        assert_eq!(updated.len(), 4);
        assert!(updated.iter().all(|d| d.ready_for_claim && d.ready_time == Some(777)));

        let again = store.mark_deposits_ready(0, root.root, 800).await.unwrap();
        assert!(again.is_empty());

        let untouched = store.get_deposit(DepositId::new(0, 4)).await.unwrap().unwrap();
        assert!(!untouched.ready_for_claim);

        let unknown = store
            .mark_deposits_ready(0, B256::repeat_byte(0x01), 800)
            .await
            .unwrap();
        assert!(unknown.is_empty());
    }

    #[tokio::test]
    async fn test_pending_excludes_claimed() {
        let store = SqliteLedger::in_memory().unwrap();
        let a = deposit(0, 1);
        let b = deposit(0, 2);
        store.add_deposit(&a).await.unwrap();
        store.add_deposit(&b).await.unwrap();
        store.add_claim(&claim_for(&a)).await.unwrap();

        let all = store.get_deposits(&a.dest_addr, 10, 0).await.unwrap();
        assert_eq!(all.len(), 2);
        let pending = store.get_pending_deposits(&a.dest_addr, 10, 0).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].deposit_count, 2);

        let claim = store.get_claim(1, a.dest_net).await.unwrap();
        assert!(claim.is_some());
    }

    #[tokio::test]
    async fn test_claimable_respects_ready_before() {
        let store = SqliteLedger::in_memory().unwrap();
        for count in 0..3 {
            let mut d = deposit(0, count);
            d.block_id = 10 + count as u64;
            store.add_deposit(&d).await.unwrap();
        }
        let root = exit_root(0, 2, 0x07);
        store.add_exit_root(&root).await.unwrap();
        store.mark_deposits_ready(0, root.root, 1_000).await.unwrap();

        let rows = store
            .get_claimable_deposits(0, LeafType::Asset, 2, 0, 1_000)
            .await
            .unwrap();
        let counts: Vec<u32> = rows.iter().map(|d| d.deposit_count).collect();
        assert_eq!(counts, vec![2, 1]);

        let rest = store
            .get_claimable_deposits(0, LeafType::Asset, 2, 2, 1_000)
            .await
            .unwrap();
        assert_eq!(rest.len(), 1);

        let early = store
            .get_claimable_deposits(0, LeafType::Asset, 10, 0, 999)
            .await
            .unwrap();
        assert!(early.is_empty());
    }

    #[tokio::test]
    async fn test_monitored_history_is_insert_only() {
        let store = SqliteLedger::in_memory().unwrap();
        let id = DepositId::new(0, 9);
        let mut tx = monitored_tx(id, 50);
        tx.mark_sent(B256::repeat_byte(0xa1), 60);
        store.upsert_monitored_tx(&tx).await.unwrap();

        let mut bumped = tx.clone();
        bumped.history.clear();
        bumped.mark_sent(B256::repeat_byte(0xa2), 200);
        store.upsert_monitored_tx(&bumped).await.unwrap();

        let stored = store.get_monitored_tx(id).await.unwrap().unwrap();
        assert_eq!(stored.history.len(), 2);
        assert_eq!(stored.current_hash, Some(B256::repeat_byte(0xa2)));
        assert_eq!(stored.attempts, 2);

        let sent = store
            .get_monitored_txs_by_status(&[MonitoredTxStatus::Sent], 10, 0)
            .await
            .unwrap();
        assert_eq!(sent.len(), 1);
        let created = store
            .get_monitored_txs_by_status(&[MonitoredTxStatus::Created], 10, 0)
            .await
            .unwrap();
        assert!(created.is_empty());
    }

    #[tokio::test]
    async fn test_retired_flag_survives_stale_writes() {
        let store = SqliteLedger::in_memory().unwrap();
        let id = DepositId::new(0, 4);
        let mut tx = monitored_tx(id, 50);
        tx.mark_sent(B256::repeat_byte(0xb1), 60);
        tx.mark_failed("reverted".to_string(), 70);
        tx.rearm(1, vec![0x01], 250_000, U256::from(2u64), 80);
        tx.mark_sent(B256::repeat_byte(0xb2), 90);
        store.upsert_monitored_tx(&tx).await.unwrap();

        let mut stale = tx.clone();
        stale.retired.clear();
        store.upsert_monitored_tx(&stale).await.unwrap();

        let stored = store.get_monitored_tx(id).await.unwrap().unwrap();
        assert_eq!(stored.history.len(), 2);
        assert!(stored.is_retired(&B256::repeat_byte(0xb1)));
        assert!(!stored.is_retired(&B256::repeat_byte(0xb2)));
    }

    #[tokio::test]
    async fn test_max_live_nonce() {
        let store = SqliteLedger::in_memory().unwrap();
        let from = Address::repeat_byte(0xcc);
        assert_eq!(store.get_max_live_nonce(&from).await.unwrap(), None);

        let mut created = monitored_tx(DepositId::new(0, 1), 10);
        created.nonce = 5;
        store.upsert_monitored_tx(&created).await.unwrap();

        let mut sent = monitored_tx(DepositId::new(0, 2), 10);
        sent.nonce = 6;
        sent.mark_sent(B256::repeat_byte(0x01), 11);
        store.upsert_monitored_tx(&sent).await.unwrap();

        let mut confirmed = monitored_tx(DepositId::new(0, 3), 10);
        confirmed.nonce = 40;
        confirmed.mark_confirmed(B256::repeat_byte(0x02), 12);
        store.upsert_monitored_tx(&confirmed).await.unwrap();

        assert_eq!(store.get_max_live_nonce(&from).await.unwrap(), Some(6));
    }

    #[tokio::test]
    async fn test_block_range_and_latest_ready() {
        let store = SqliteLedger::in_memory().unwrap();
        for count in 0..4 {
            let mut d = deposit(0, count);
            d.block_id = 1 + count as u64;
            d.block_number = 100 + count as u64 * 10;
            store.add_deposit(&d).await.unwrap();
        }
        let root = exit_root(0, 1, 0x31);
        store.add_exit_root(&root).await.unwrap();
        store.mark_deposits_ready(0, root.root, 50).await.unwrap();

        let rows = store
            .get_not_ready_deposits_in_block_range(0, 100, 130, 10, 0)
            .await
            .unwrap();
        let counts: Vec<u32> = rows.iter().map(|d| d.deposit_count).collect();
        assert_eq!(counts, vec![3, 2]);

        let latest = store.get_latest_ready_deposits(0, 10).await.unwrap();
        let counts: Vec<u32> = latest.iter().map(|d| d.deposit_count).collect();
        assert_eq!(counts, vec![1, 0]);
    }

    #[tokio::test]
    async fn test_deadline_fires_while_writer_is_blocked() {
        let path = temp_db_path();
        let ledger: Arc<dyn LedgerStore> = Arc::new(SqliteLedger::new(&path).unwrap());
        let held = ledger.begin().await.unwrap();

        let store = Timed::new(ledger.clone(), Duration::from_millis(100));
        let start = Instant::now();
        let result = store.begin().await;
        assert!(matches!(result, Err(StorageError::Timeout(_))));
        assert!(start.elapsed() < Duration::from_secs(2));

        // Readers are not blocked by the open writer
        assert!(store.get_deposit(DepositId::new(0, 1)).await.unwrap().is_none());

        held.rollback().await.unwrap();
        let relaxed = Timed::new(ledger.clone(), Duration::from_secs(10));
        let tx = relaxed.begin().await.unwrap();
        tx.add_deposit(&deposit(0, 1)).await.unwrap();
        tx.commit().await.unwrap();
        assert!(relaxed.get_deposit(DepositId::new(0, 1)).await.unwrap().is_some());

        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn test_transaction_commit_and_rollback() {
        let store = SqliteLedger::in_memory().unwrap();

        let tx = store.begin().await.unwrap();
        tx.add_deposit(&deposit(0, 1)).await.unwrap();
        tx.rollback().await.unwrap();
        assert!(store.get_deposit(DepositId::new(0, 1)).await.unwrap().is_none());

        {
            let tx = store.begin().await.unwrap();
            tx.add_deposit(&deposit(0, 1)).await.unwrap();
        }
        assert!(store.get_deposit(DepositId::new(0, 1)).await.unwrap().is_none());

        let tx = store.begin().await.unwrap();
        tx.add_deposit(&deposit(0, 1)).await.unwrap();
        tx.commit().await.unwrap();
        assert!(store.get_deposit(DepositId::new(0, 1)).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_latest_exit_root() {
        let store = SqliteLedger::in_memory().unwrap();
        assert!(store.get_latest_exit_root(0).await.unwrap().is_none());
        store.add_exit_root(&exit_root(0, 3, 0x01)).await.unwrap();
        store.add_exit_root(&exit_root(0, 8, 0x02)).await.unwrap();
        store.add_exit_root(&exit_root(1, 20, 0x03)).await.unwrap();

        let latest = store.get_latest_exit_root(0).await.unwrap().unwrap();
        assert_eq!(latest.deposit_count, 8);
    }
}
