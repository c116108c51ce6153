/// Result of one pipeline stage for one unit (persona, task, or trial set).
#[derive(Debug, Clone, PartialEq)]
pub enum StageOutcome<T> {
    Ok(T),
    /// Nothing to do for this unit, e.g. every trial failed.
    Skipped(String),
    /// The stage ran and hit an error for this unit only.
    Failed(String),
}

impl<T> StageOutcome<T> {
    pub fn ok(self) -> Option<T> {
        match self {
            Self::Ok(value) => Some(value),
            Self::Skipped(_) | Self::Failed(_) => None,
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok(_))
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Ok(_) => None,
            Self::Skipped(reason) | Self::Failed(reason) => Some(reason),
        }
    }

    pub fn status(&self) -> &'static str {
        match self {
            Self::Ok(_) => "ok",
            Self::Skipped(_) => "skipped",
            Self::Failed(_) => "failed",
        }
    }
}

impl<T> From<anyhow::Result<T>> for StageOutcome<T> {
    fn from(result: anyhow::Result<T>) -> Self {
        match result {
            Ok(value) => Self::Ok(value),
            Err(err) => Self::Failed(format!("{err:#}")),
        }
    }
}
