use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result, anyhow};
use rusqlite::{Connection, OpenFlags, params};
use serde::Serialize;
use tracing::info;

use crate::model::PersonaResult;
use crate::pipeline::sink::ResultSink;
use crate::util::{ensure_directory, now_utc_string};

/// SQLite ledger of persona results across runs.
pub struct LedgerSink {
    connection: Mutex<Connection>,
    run_id: String,
}

impl LedgerSink {
    pub fn open(path: &Path, run_id: &str) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            ensure_directory(parent)?;
        }

        let connection = Connection::open(path)
            .with_context(|| format!("failed to open ledger {}", path.display()))?;
        configure_connection(&connection)?;
        ensure_schema(&connection)?;
        info!(path = %path.display(), run_id = %run_id, "ledger ready");

        Ok(Self {
            connection: Mutex::new(connection),
            run_id: run_id.to_string(),
        })
    }
}

impl ResultSink for LedgerSink {
    fn name(&self) -> &'static str {
        "ledger"
    }

    fn publish(&self, result: &PersonaResult) -> Result<()> {
        let result_json =
            serde_json::to_string(result).context("failed to serialize persona result")?;
        let mut connection = self
            .connection
            .lock()
            .map_err(|_| anyhow!("ledger connection lock poisoned"))?;

        let tx = connection
            .transaction()
            .context("failed to start ledger transaction")?;
        tx.execute(
            "
            INSERT INTO persona_results(run_id, persona, persona_score, task_count, recorded_at, result_json)
            VALUES(?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(run_id, persona) DO UPDATE SET
              persona_score=excluded.persona_score,
              task_count=excluded.task_count,
              recorded_at=excluded.recorded_at,
              result_json=excluded.result_json
            ",
            params![
                self.run_id,
                result.persona,
                result.persona_score,
                result.tasks.len() as i64,
                now_utc_string(),
                result_json,
            ],
        )
        .with_context(|| format!("failed to record persona {}", result.persona))?;

        tx.execute(
            "DELETE FROM task_scores WHERE run_id = ?1 AND persona = ?2",
            params![self.run_id, result.persona],
        )?;
        {
            let mut statement = tx.prepare(
                "
                INSERT INTO task_scores(
                  run_id, persona, task_id, semantic, consistency, explainability,
                  final_score, precision, recall, ndcg
                )
                VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                ",
            )?;
            for task in &result.tasks {
                statement.execute(params![
                    self.run_id,
                    result.persona,
                    task.task_id,
                    task.semantic,
                    task.consistency,
                    task.explainability,
                    task.final_score,
                    task.structural.precision,
                    task.structural.recall,
                    task.structural.ndcg,
                ])?;
            }
        }

        tx.commit().context("failed to commit ledger transaction")?;
        Ok(())
    }
}

fn configure_connection(connection: &Connection) -> Result<()> {
    connection
        .pragma_update(None, "journal_mode", "WAL")
        .context("failed to set journal_mode=WAL")?;
    connection
        .pragma_update(None, "synchronous", "NORMAL")
        .context("failed to set synchronous=NORMAL")?;
    Ok(())
}

fn ensure_schema(connection: &Connection) -> Result<()> {
    connection
        .execute_batch(
            "
            CREATE TABLE IF NOT EXISTS persona_results (
              run_id TEXT NOT NULL,
              persona TEXT NOT NULL,
              persona_score REAL NOT NULL,
              task_count INTEGER NOT NULL,
              recorded_at TEXT NOT NULL,
              result_json TEXT NOT NULL,
              PRIMARY KEY(run_id, persona)
            );

            CREATE TABLE IF NOT EXISTS task_scores (
              run_id TEXT NOT NULL,
              persona TEXT NOT NULL,
              task_id TEXT NOT NULL,
              semantic REAL NOT NULL,
              consistency REAL NOT NULL,
              explainability REAL NOT NULL,
              final_score REAL NOT NULL,
              precision REAL NOT NULL,
              recall REAL NOT NULL,
              ndcg REAL NOT NULL,
              FOREIGN KEY(run_id, persona) REFERENCES persona_results(run_id, persona)
            );

            CREATE INDEX IF NOT EXISTS idx_task_scores_run_persona
              ON task_scores(run_id, persona);
            ",
        )
        .context("failed to create ledger schema")
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LedgerSummaryRow {
    pub run_id: String,
    pub persona: String,
    pub persona_score: f64,
    pub task_count: i64,
    pub recorded_at: String,
    pub mean_semantic: Option<f64>,
    pub mean_consistency: Option<f64>,
    pub mean_explainability: Option<f64>,
}

/// Persona rows of one run, or of the most recently recorded run when
/// `run_id` is `None`. Sorted by persona name.
pub fn read_ledger_summary(path: &Path, run_id: Option<&str>) -> Result<Vec<LedgerSummaryRow>> {
    let connection = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .with_context(|| format!("failed to open ledger {}", path.display()))?;

    let run_id = match run_id {
        Some(run_id) => run_id.to_string(),
        None => {
            let latest = connection
                .query_row(
                    "SELECT run_id FROM persona_results ORDER BY recorded_at DESC, run_id DESC LIMIT 1",
                    [],
                    |row| row.get::<_, String>(0),
                )
                .map(Some)
                .or_else(|err| match err {
                    rusqlite::Error::QueryReturnedNoRows => Ok(None),
                    other => Err(other),
                })
                .context("failed to find latest run in ledger")?;
            match latest {
                Some(run_id) => run_id,
                None => return Ok(Vec::new()),
            }
        }
    };

    let mut statement = connection.prepare(
        "
        SELECT
          p.run_id,
          p.persona,
          p.persona_score,
          p.task_count,
          p.recorded_at,
          AVG(t.semantic),
          AVG(t.consistency),
          AVG(t.explainability)
        FROM persona_results p
        LEFT JOIN task_scores t
          ON t.run_id = p.run_id AND t.persona = p.persona
        WHERE p.run_id = ?1
        GROUP BY p.run_id, p.persona
        ORDER BY p.persona ASC
        ",
    )?;

    let mut rows = statement.query(params![run_id])?;
    let mut out = Vec::<LedgerSummaryRow>::new();
    while let Some(row) = rows.next()? {
        out.push(LedgerSummaryRow {
            run_id: row.get(0)?,
            persona: row.get(1)?,
            persona_score: row.get(2)?,
            task_count: row.get(3)?,
            recorded_at: row.get(4)?,
            mean_semantic: row.get(5)?,
            mean_consistency: row.get(6)?,
            mean_explainability: row.get(7)?,
        });
    }

    Ok(out)
}
