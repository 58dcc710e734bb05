pub mod assistant;
pub mod dispatcher;
pub mod executor;
pub mod generator;
pub mod linter;
pub mod metrics;
pub mod mock;
pub mod report;
pub mod scratch;

pub use assistant::{Assistant, ConversationSession, OpenAiAssistant, OpenAiSettings, RunStatus};
pub use dispatcher::Dispatcher;
pub use executor::{CommandExecutor, ToolCommand};
pub use generator::{CodeGenerator, CommandGenerator};
pub use linter::{CommandLinter, SchemaLinter};
pub use metrics::{get_metrics, init_metrics};
pub use report::{render_report, ReportFormat};
