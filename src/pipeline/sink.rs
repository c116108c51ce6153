use std::path::{Path, PathBuf};

use anyhow::Result;
use tracing::{info, warn};

use crate::model::PersonaResult;
use crate::util::{file_stem_for, write_json_pretty};

/// Destination for finished persona results.
pub trait ResultSink: Send + Sync {
    fn name(&self) -> &'static str;
    fn publish(&self, result: &PersonaResult) -> Result<()>;
}

/// Writes `results_<persona>.json` into a directory.
pub struct JsonFileSink {
    dir: PathBuf,
}

impl JsonFileSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, persona: &str) -> PathBuf {
        result_path(&self.dir, persona)
    }
}

impl ResultSink for JsonFileSink {
    fn name(&self) -> &'static str {
        "json"
    }

    fn publish(&self, result: &PersonaResult) -> Result<()> {
        let path = self.path_for(&result.persona);
        write_json_pretty(&path, result)?;
        info!(
            persona = %result.persona,
            path = %path.display(),
            persona_score = result.persona_score,
            "wrote persona result"
        );
        Ok(())
    }
}

fn result_path(dir: &Path, persona: &str) -> PathBuf {
    dir.join(format!("results_{}.json", file_stem_for(persona)))
}

/// Hands a result to every sink. Failures are logged and not retried; the
/// remaining sinks still run. Returns how many sinks succeeded.
pub fn publish_all(sinks: &[&dyn ResultSink], result: &PersonaResult) -> usize {
    let mut published = 0;
    for sink in sinks {
        match sink.publish(result) {
            Ok(()) => published += 1,
            Err(err) => warn!(
                persona = %result.persona,
                sink = sink.name(),
                error = %format!("{err:#}"),
                "result sink failed"
            ),
        }
    }
    published
}
