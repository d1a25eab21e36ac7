//! Model profiles and provider binding.
//!
//! Agents name a *profile*; a profile names a provider and a model plus
//! the context-window accounting the compactor needs. Resolution failures
//! surface as `LlmProviderUnavailable` so the agent manager can park the
//! agent in ERROR instead of crashing the loop.

use std::collections::HashMap;
use std::sync::Arc;

use super::provider::{ChunkStream, LlmProvider};
use super::types::{ChatMessage, CompletionRequest, ToolSpec};
use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct ModelProfile {
    pub provider: String,
    pub model: String,
    pub context_window: usize,
    pub reserve_tokens: usize,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

/// A profile resolved against a live provider.
#[derive(Clone)]
pub struct BoundModel {
    pub profile: ModelProfile,
    pub provider: Arc<dyn LlmProvider>,
}

impl BoundModel {
    fn request(&self, messages: Vec<ChatMessage>, tools: Vec<ToolSpec>) -> CompletionRequest {
        let mut req = CompletionRequest::new(self.profile.model.clone(), messages).with_tools(tools);
        if let Some(t) = self.profile.temperature {
            req = req.with_temperature(t);
        }
        if let Some(m) = self.profile.max_tokens {
            req = req.with_max_tokens(m);
        }
        req
    }

    pub async fn stream(
        &self,
        messages: Vec<ChatMessage>,
        tools: Vec<ToolSpec>,
    ) -> Result<ChunkStream> {
        self.provider.stream(self.request(messages, tools)).await
    }

    pub async fn complete_text(&self, messages: Vec<ChatMessage>) -> Result<String> {
        Ok(self
            .provider
            .complete(self.request(messages, Vec::new()))
            .await?
            .text)
    }

    pub fn count_tokens(&self, messages: &[ChatMessage]) -> usize {
        self.provider.count_tokens(messages)
    }

    pub fn context_window(&self) -> usize {
        if self.profile.context_window > 0 {
            self.profile.context_window
        } else {
            self.provider.context_window()
        }
    }

    pub fn reserve_tokens(&self) -> usize {
        self.profile.reserve_tokens
    }
}

/// Registry of providers and profiles.
pub struct LlmService {
    providers: HashMap<String, Arc<dyn LlmProvider>>,
    profiles: HashMap<String, ModelProfile>,
}

impl LlmService {
    pub fn new() -> Self {
        Self {
            providers: HashMap::new(),
            profiles: HashMap::new(),
        }
    }

    pub fn register_provider(&mut self, name: impl Into<String>, provider: Arc<dyn LlmProvider>) {
        self.providers.insert(name.into(), provider);
    }

    pub fn add_profile(&mut self, name: impl Into<String>, profile: ModelProfile) {
        self.profiles.insert(name.into(), profile);
    }

    /// Bind a profile name to its provider.
    pub fn resolve(&self, profile_name: &str) -> Result<BoundModel> {
        let profile = self.profiles.get(profile_name).ok_or_else(|| {
            Error::LlmProviderUnavailable(format!("no model profile '{profile_name}'"))
        })?;
        let provider = self.providers.get(&profile.provider).ok_or_else(|| {
            Error::LlmProviderUnavailable(format!(
                "profile '{profile_name}' names unknown provider '{}'",
                profile.provider
            ))
        })?;
        Ok(BoundModel {
            profile: profile.clone(),
            provider: Arc::clone(provider),
        })
    }
}

impl Default for LlmService {
    fn default() -> Self {
        Self::new()
    }
}
