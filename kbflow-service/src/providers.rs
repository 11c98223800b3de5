//! Model provider registry.
//!
//! Provider adapters register a constructor per `(factory, capability)`.
//! The lifecycle service only needs them to validate credentials, so a
//! client exposes a single `probe` round-trip.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::ProviderError;

/// What a model client can do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Chat,
    Embed,
    Rerank,
    Describe,
    Synthesize,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::Chat => "chat",
            Capability::Embed => "embed",
            Capability::Rerank => "rerank",
            Capability::Describe => "describe",
            Capability::Synthesize => "synthesize",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Credentials used to construct a client
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderCredentials {
    pub api_key: String,
    pub model: String,
    #[serde(default)]
    pub base_url: Option<String>,
}

pub trait ModelClient: Send + Sync {
    /// Cheapest call that proves the credentials work.
    fn probe(&self) -> Result<(), ProviderError>;
}

pub type ClientConstructor = Arc<
    dyn Fn(&ProviderCredentials) -> Result<Box<dyn ModelClient>, ProviderError> + Send + Sync,
>;

/// Result of probing one capability
#[derive(Debug, Clone, Serialize)]
pub struct ProbeOutcome {
    pub capability: Capability,
    pub model: String,
    pub passed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Default)]
pub struct ProviderRegistry {
    constructors: HashMap<(String, Capability), ClientConstructor>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    #[allow(dead_code)] // Adapters register here at startup
    pub fn register<F>(&mut self, factory: &str, capability: Capability, constructor: F)
    where
        F: Fn(&ProviderCredentials) -> Result<Box<dyn ModelClient>, ProviderError>
            + Send
            + Sync
            + 'static,
    {
        self.constructors
            .insert((factory.to_string(), capability), Arc::new(constructor));
    }

    /// Capabilities a factory has constructors for
    pub fn capabilities(&self, factory: &str) -> Vec<Capability> {
        let mut caps: Vec<Capability> = self
            .constructors
            .keys()
            .filter(|(f, _)| f == factory)
            .map(|(_, cap)| *cap)
            .collect();
        caps.sort_by_key(|c| c.as_str());
        caps
    }

    /// Build a client for a factory and capability
    pub fn create(
        &self,
        factory: &str,
        capability: Capability,
        credentials: &ProviderCredentials,
    ) -> Result<Box<dyn ModelClient>, ProviderError> {
        let constructor = self
            .constructors
            .get(&(factory.to_string(), capability))
            .ok_or_else(|| ProviderError::UnsupportedProvider {
                factory: factory.to_string(),
                capability: capability.to_string(),
            })?;
        constructor(credentials)
    }

    /// Probe each requested capability. Any failure rejects the whole set;
    /// an unknown factory/capability pair is reported as unsupported.
    pub fn check(
        &self,
        factory: &str,
        requests: &[(Capability, ProviderCredentials)],
    ) -> Result<Vec<ProbeOutcome>, ProviderError> {
        let mut outcomes = Vec::with_capacity(requests.len());

        for (capability, credentials) in requests {
            let client = self.create(factory, *capability, credentials)?;
            let outcome = match client.probe() {
                Ok(()) => {
                    debug!(factory = %factory, capability = %capability, model = %credentials.model, "Provider probe passed");
                    ProbeOutcome {
                        capability: *capability,
                        model: credentials.model.clone(),
                        passed: true,
                        message: None,
                    }
                }
                Err(e) => {
                    warn!(factory = %factory, capability = %capability, model = %credentials.model, error = %e, "Provider probe failed");
                    ProbeOutcome {
                        capability: *capability,
                        model: credentials.model.clone(),
                        passed: false,
                        message: Some(format!(
                            "Fail to access model({}) using this api key. {e}",
                            credentials.model
                        )),
                    }
                }
            };
            outcomes.push(outcome);
        }

        let failures: Vec<&str> = outcomes
            .iter()
            .filter_map(|o| o.message.as_deref())
            .collect();
        if !failures.is_empty() {
            return Err(ProviderError::Rejected {
                factory: factory.to_string(),
                message: failures.join("\n"),
            });
        }

        Ok(outcomes)
    }
}
