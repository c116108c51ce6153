use std::io::{self, Write};

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{info, warn};

use crate::cli::{StatusArgs, default_ledger_path};
use crate::pipeline::{LedgerSummaryRow, read_ledger_summary};

#[derive(Debug, Serialize)]
struct StatusReport<'a> {
    ledger_path: String,
    run_id: Option<&'a str>,
    personas: &'a [LedgerSummaryRow],
}

pub fn run(args: StatusArgs) -> Result<()> {
    let ledger_path = args
        .ledger_path
        .clone()
        .unwrap_or_else(|| default_ledger_path(&args.results_dir));

    info!(path = %ledger_path.display(), "status requested");

    let rows = if ledger_path.exists() {
        read_ledger_summary(&ledger_path, args.run_id.as_deref())?
    } else {
        warn!(path = %ledger_path.display(), "ledger missing");
        Vec::new()
    };

    for row in &rows {
        info!(
            run_id = %row.run_id,
            persona = %row.persona,
            persona_score = row.persona_score,
            tasks = row.task_count,
            mean_semantic = row.mean_semantic.unwrap_or_default(),
            mean_consistency = row.mean_consistency.unwrap_or_default(),
            mean_explainability = row.mean_explainability.unwrap_or_default(),
            recorded_at = %row.recorded_at,
            "persona result"
        );
    }
    if rows.is_empty() {
        warn!("no persona results recorded");
    }

    if args.json {
        let report = StatusReport {
            ledger_path: ledger_path.display().to_string(),
            run_id: rows.first().map(|row| row.run_id.as_str()),
            personas: &rows,
        };
        let mut output = io::BufWriter::new(io::stdout().lock());
        serde_json::to_writer_pretty(&mut output, &report)
            .context("failed to serialize status json output")?;
        writeln!(output)?;
        output.flush()?;
    }

    Ok(())
}
