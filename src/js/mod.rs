pub mod environment;
pub mod processor;
pub mod runtime;
pub mod script;

pub use environment::ScriptEnvironment;
pub use processor::{run_scripts, ScriptExecutionSummary};
pub use runtime::ScriptEngine;
pub use script::ScriptSource;
