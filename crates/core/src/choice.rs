//! Tool-choice modes and the per-turn tool plan derived from them.

use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::provider::ToolDefinition;
use crate::registry::Registry;

/// How strongly the backend is steered towards tool use.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "name", rename_all = "snake_case")]
pub enum ToolChoice {
    /// No tools are offered, even if registered.
    None,
    /// The backend decides.
    #[default]
    Auto,
    /// Some tool must be called.
    Any,
    /// This specific tool must be called.
    Named(String),
}

/// The tools to declare for one turn and the choice that applies to them.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolPlan {
    pub tools: Vec<ToolDefinition>,
    pub choice: ToolChoice,
}

impl ToolPlan {
    /// Resolve `choice` against the attached registry.
    ///
    /// With no registry, an empty registry or `ToolChoice::None` the plan
    /// carries no tools at all. `Named` narrows the declarations to the one
    /// tool; naming an unregistered tool is a caller error.
    pub fn resolve(registry: Option<&dyn Registry>, choice: &ToolChoice) -> Result<Self, ProviderError> {
        let registry = match registry {
            Some(r) if !r.is_empty() => r,
            _ => {
                if let ToolChoice::Named(name) = choice {
                    return Err(ProviderError::NotConfigured(format!(
                        "tool choice names '{name}' but no tools are registered"
                    )));
                }
                return Ok(Self::none());
            }
        };

        match choice {
            ToolChoice::None => Ok(Self::none()),
            ToolChoice::Auto | ToolChoice::Any => Ok(Self {
                tools: registry.definitions(),
                choice: choice.clone(),
            }),
            ToolChoice::Named(name) => {
                let tool = registry.get(name).ok_or_else(|| {
                    ProviderError::NotConfigured(format!(
                        "tool choice names '{name}' which is not registered"
                    ))
                })?;
                Ok(Self {
                    tools: vec![ToolDefinition::from_tool(tool)],
                    choice: choice.clone(),
                })
            }
        }
    }

    fn none() -> Self {
        Self {
            tools: Vec::new(),
            choice: ToolChoice::None,
        }
    }

    pub fn has_tools(&self) -> bool {
        !self.tools.is_empty()
    }

    /// System directive for backends with no native tool-choice parameter.
    ///
    /// `Auto` encourages, `Any` and `Named` mandate.
    pub fn directive(&self) -> Option<String> {
        if !self.has_tools() {
            return None;
        }
        match &self.choice {
            ToolChoice::None => None,
            ToolChoice::Auto => Some(
                "Tools are available for this turn. Call one when it helps you answer; \
                 otherwise reply directly."
                    .into(),
            ),
            ToolChoice::Any => {
                let names: Vec<&str> = self.tools.iter().map(|t| t.name.as_str()).collect();
                Some(format!(
                    "You must call one of the available tools ({}) in this turn. \
                     Do not answer in plain text.",
                    names.join(", ")
                ))
            }
            ToolChoice::Named(name) => Some(format!(
                "You must call the tool `{name}` in this turn. Do not answer in plain text \
                 and do not call any other tool."
            )),
        }
    }
}
