// src/core/provider.rs

//! The narrow handle through which plugins and resolvers talk to a cloud
//! provider. Provider-specific API shapes live outside the core.

use async_trait::async_trait;
use serde_json::Value;

#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;

    /// Performs `operation` on the provider `service` (e.g. `CloudFormation`,
    /// `describeStacks`) and returns the raw response.
    async fn request(&self, service: &str, operation: &str, params: Value) -> anyhow::Result<Value>;
}

/// Stand-in used until a provider plugin installs a real handle.
#[derive(Debug, Clone)]
pub struct UnconfiguredProvider {
    name: String,
}

impl UnconfiguredProvider {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }
}

#[async_trait]
impl Provider for UnconfiguredProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn request(&self, service: &str, operation: &str, _params: Value) -> anyhow::Result<Value> {
        anyhow::bail!(
            "No API handle is installed for provider \"{}\"; cannot call {}.{}",
            self.name,
            service,
            operation
        )
    }
}
