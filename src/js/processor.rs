use tracing::{debug, error};

use super::environment::ScriptEnvironment;
use super::script::ScriptSource;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScriptExecutionSummary {
    pub executed_scripts: usize,
    pub failed_scripts: usize,
}

/// Run `scripts` in order. A script that throws is logged and skipped; the
/// scripts after it still run.
pub fn run_scripts(
    environment: &ScriptEnvironment,
    scripts: &[ScriptSource],
) -> ScriptExecutionSummary {
    let mut summary = ScriptExecutionSummary::default();

    for script in scripts {
        match environment.eval(&script.code, &script.name) {
            Ok(()) => summary.executed_scripts += 1,
            Err(err) => {
                error!(target: "quickjs", script = %script.name, error = %err, "script crashed");
                summary.failed_scripts += 1;
            }
        }
    }

    debug!(
        target: "quickjs",
        executed = summary.executed_scripts,
        failed = summary.failed_scripts,
        "finished running scripts"
    );
    summary
}
