//! The three workflow stages. Each one asserts its inputs, writes files,
//! and leaves a report under `reports/`; nothing is shared in memory.

pub mod curate;
pub mod model;
pub mod train;

use anyhow::Result;
use tracing::{error, info, warn};

use crate::config::AppConfig;
use crate::report::{StageEvent, StageReport};

/// Closes the report according to `res` and persists it.
pub(crate) fn finish(cfg: &AppConfig, mut report: StageReport, res: Result<()>) -> Result<StageReport> {
    match res {
        Ok(()) => {
            report.apply_event(StageEvent::Done);
            report.save(&cfg.reports_dir())?;
            info!(stage = %report.stage, run_id = %report.run_id, "stage done");
            Ok(report)
        }
        Err(e) => {
            error!(stage = %report.stage, run_id = %report.run_id, "stage failed: {e:#}");
            report.apply_event(StageEvent::Error { message: format!("{e:#}") });
            if let Err(save_err) = report.save(&cfg.reports_dir()) {
                warn!(stage = %report.stage, "failed to write report: {save_err:#}");
            }
            Err(e)
        }
    }
}
