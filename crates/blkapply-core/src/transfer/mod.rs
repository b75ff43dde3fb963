//! Transfer-list parsing and execution.

pub mod command;
pub mod engine;
pub mod exec;
pub mod new_data;

pub use command::{Command, CommandKind};
pub use engine::{EngineConfig, EngineState, TransferEngine, TransferHeader};
pub use exec::{CommandOutcome, ExecContext};
pub use new_data::NewDataSource;
