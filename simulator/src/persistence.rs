use anyhow::Context;
use raffle_types::{ParticipantId, RaffleId, RaffleRecord, RaffleState};
use rusqlite::{params, Connection};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing::{error, warn};

enum PersistRequest {
    Record(RaffleRecord),
}

/// Write-behind SQLite persistence for raffle records.
///
/// Writes are queued to a dedicated thread; the in-memory store stays authoritative while the
/// process runs and the database only restores it on the next boot.
pub struct RecordPersistence {
    sender: mpsc::Sender<PersistRequest>,
}

impl RecordPersistence {
    pub fn load_and_start_sqlite(
        path: &Path,
        buffer_size: usize,
    ) -> anyhow::Result<(Self, Vec<RaffleRecord>)> {
        let conn = Connection::open(path).context("open record persistence db")?;
        init_schema_sqlite(&conn)?;

        let records = load_records_sqlite(&conn)?;
        drop(conn);

        let (sender, receiver) = mpsc::channel(buffer_size.max(1));
        let path = path.to_path_buf();
        std::thread::spawn(move || {
            persistence_worker(path, receiver);
        });

        Ok((Self { sender }, records))
    }

    pub fn persist_record(&self, record: RaffleRecord) {
        let request = PersistRequest::Record(record);
        match self.sender.try_send(request) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("Record persistence channel full; dropping write (next change will overwrite)");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                error!("Record persistence worker stopped; dropping write");
            }
        }
    }
}

fn init_schema_sqlite(conn: &Connection) -> anyhow::Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode=WAL;
         PRAGMA synchronous=NORMAL;
         CREATE TABLE IF NOT EXISTS raffles (
             id INTEGER PRIMARY KEY,
             created_at INTEGER NOT NULL,
             state TEXT NOT NULL,
             winner TEXT
         );",
    )
    .context("init record persistence schema")?;
    Ok(())
}

fn load_records_sqlite(conn: &Connection) -> anyhow::Result<Vec<RaffleRecord>> {
    let mut stmt = conn.prepare("SELECT id, created_at, state, winner FROM raffles ORDER BY id")?;
    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, i64>(0)?,
            row.get::<_, i64>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, Option<String>>(3)?,
        ))
    })?;

    let mut records = Vec::new();
    for row in rows {
        let (id, created_at, state, winner) = row?;
        let state: RaffleState = state.parse().context("decode persisted raffle state")?;
        let record = RaffleRecord::new(RaffleId(id as u64), created_at as u64)
            .with_outcome(state, winner.map(ParticipantId::new))
            .with_context(|| format!("persisted raffle {id} violates record invariant"))?;
        records.push(record);
    }
    Ok(records)
}

fn persistence_worker(path: PathBuf, mut receiver: mpsc::Receiver<PersistRequest>) {
    let conn = match Connection::open(&path) {
        Ok(conn) => conn,
        Err(err) => {
            error!("Record persistence open failed: {err}");
            return;
        }
    };

    if let Err(err) = init_schema_sqlite(&conn) {
        error!("Record persistence init failed: {err}");
        return;
    }

    while let Some(request) = receiver.blocking_recv() {
        let PersistRequest::Record(record) = request;
        if let Err(err) = conn.execute(
            "INSERT OR REPLACE INTO raffles (id, created_at, state, winner) VALUES (?, ?, ?, ?)",
            params![
                record.id().0 as i64,
                record.created_at() as i64,
                record.state().as_str(),
                record.winner().map(|winner| winner.as_str()),
            ],
        ) {
            error!("Record persistence write failed: {err}");
        }
    }
}
