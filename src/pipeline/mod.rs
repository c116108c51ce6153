//! Evaluation stages: personas → tasks → trials → scores → persona result.
//!
//! Each stage hands back a [`StageOutcome`]; nothing below the command layer
//! propagates a unit-level failure as an error.

mod aggregate;
mod dispatcher;
mod generator;
mod ledger;
mod normalize;
mod orchestrator;
mod outcome;
mod personas;
mod scoring;
mod sink;
#[cfg(test)]
mod testing;
#[cfg(test)]
mod tests;

pub use self::dispatcher::Dispatcher;
pub use self::generator::TaskGenerator;
pub use self::ledger::{LedgerSink, LedgerSummaryRow, read_ledger_summary};
pub use self::orchestrator::{Evaluator, PersonaRunSummary, run_personas};
pub use self::personas::{PersonaFile, PersonaStore};
pub use self::scoring::Scorer;
pub use self::sink::{JsonFileSink, ResultSink};
