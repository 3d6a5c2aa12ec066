pub mod fuel_calculator;
pub mod tool_def;

use std::collections::HashSet;

use tracing::{debug, info, warn};

use crate::assistant::{PendingToolCall, ToolOutput};
use crate::config::CalculatorConfig;
pub use fuel_calculator::FuelCalculator;
pub use tool_def::ToolDef;

/// A function the assistant may call while a run is paused.
///
/// `call` never fails: implementations turn their own errors into an output
/// string so the run can always resume.
#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn definition(&self) -> ToolDef;
    async fn call(&self, arguments: &str) -> String;
}

pub fn unknown_tool_output(name: &str) -> String {
    format!("Unknown tool '{name}'. No output is available for this call.")
}

/// Name-keyed table of the tools this application exposes.
#[derive(Default)]
pub struct ToolInvoker {
    tools: Vec<Box<dyn Tool>>,
}

impl ToolInvoker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tool(mut self, tool: impl Tool + 'static) -> Self {
        self.register(Box::new(tool));
        self
    }

    /// Later registrations replace earlier ones with the same name.
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        self.tools.retain(|t| t.name() != tool.name());
        self.tools.push(tool);
    }

    pub fn from_config(cfg: &CalculatorConfig) -> anyhow::Result<Self> {
        Ok(Self::new().with_tool(FuelCalculator::from_config(cfg)?))
    }

    pub fn definitions(&self) -> Vec<ToolDef> {
        self.tools.iter().map(|t| t.definition()).collect()
    }

    #[cfg(test)]
    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    fn find(&self, name: &str) -> Option<&dyn Tool> {
        self.tools
            .iter()
            .find(|t| t.name() == name)
            .map(|t| t.as_ref())
    }

    pub async fn invoke(&self, call: &PendingToolCall) -> ToolOutput {
        let output = match self.find(&call.name) {
            Some(tool) => {
                debug!(id=%call.id, name=%call.name, "invoking tool");
                tool.call(&call.arguments).await
            }
            None => {
                warn!(id=%call.id, name=%call.name, "assistant requested an unknown tool");
                unknown_tool_output(&call.name)
            }
        };
        ToolOutput {
            tool_call_id: call.id.clone(),
            output,
        }
    }

    /// One output per distinct call id, in request order. Duplicate ids
    /// keep the first occurrence.
    pub async fn resolve_all(&self, calls: &[PendingToolCall]) -> Vec<ToolOutput> {
        let mut seen = HashSet::new();
        let mut outputs = Vec::with_capacity(calls.len());
        for call in calls {
            if !seen.insert(call.id.as_str()) {
                warn!(id=%call.id, "duplicate tool call id ignored");
                continue;
            }
            outputs.push(self.invoke(call).await);
        }
        info!(count = outputs.len(), "tool calls resolved");
        outputs
    }
}
