//! Schema-to-source code generation through an external generator program.

use crate::error::CapabilityError;
use crate::models::SchemaDefinition;
use crate::services::executor::{CommandExecutor, ToolCommand};
use crate::services::scratch::ScratchSpace;
use async_trait::async_trait;
use std::path::PathBuf;

/// Produces model source code for a schema.
#[async_trait]
pub trait CodeGenerator: Send + Sync {
    async fn generate(&self, schema: &SchemaDefinition) -> Result<String, CapabilityError>;
}

/// Runs a generator such as `gen-pydantic` on a per-request schema file and
/// returns what it prints.
pub struct CommandGenerator {
    tool: ToolCommand,
    executor: CommandExecutor,
    scratch_root: PathBuf,
}

impl CommandGenerator {
    pub fn new(tool: ToolCommand, executor: CommandExecutor, scratch_root: PathBuf) -> Self {
        Self {
            tool,
            executor,
            scratch_root,
        }
    }
}

#[async_trait]
impl CodeGenerator for CommandGenerator {
    async fn generate(&self, schema: &SchemaDefinition) -> Result<String, CapabilityError> {
        let scratch = ScratchSpace::create_in(&self.scratch_root).await?;
        let schema_path = scratch.write_schema(schema).await?;

        let output = self.executor.run_checked(&self.tool, &schema_path).await?;

        String::from_utf8(output.stdout).map_err(|e| CapabilityError::MalformedOutput {
            tool: self.tool.program.clone(),
            reason: format!("output is not UTF-8: {}", e),
        })
    }
}
