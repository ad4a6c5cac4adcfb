// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Provider routing.
//!
//! Models are addressed by a `provider/model` string.  The prefix selects
//! which environment variable supplies the API key and which endpoint the
//! OpenAI-compatible driver talks to.

use std::sync::Arc;

use anyhow::{bail, Context};

use crate::openai_compat::OpenAICompatProvider;
use crate::ModelProvider;

struct ProviderSpec {
    name: &'static str,
    /// Accepted prefixes; the first is canonical.
    aliases: &'static [&'static str],
    api_key_env: &'static str,
    base_url: &'static str,
}

const PROVIDERS: &[ProviderSpec] = &[
    ProviderSpec {
        name: "deepseek",
        aliases: &["deepseek"],
        api_key_env: "DEEPSEEK_API_KEY",
        base_url: "https://api.deepseek.com/v1",
    },
    ProviderSpec {
        name: "openai",
        aliases: &["openai"],
        api_key_env: "OPENAI_API_KEY",
        base_url: "https://api.openai.com/v1",
    },
    ProviderSpec {
        name: "anthropic",
        aliases: &["anthropic"],
        api_key_env: "ANTHROPIC_API_KEY",
        base_url: "https://api.anthropic.com/v1",
    },
    ProviderSpec {
        name: "google",
        aliases: &["google", "gemini"],
        api_key_env: "GEMINI_API_KEY",
        base_url: "https://generativelanguage.googleapis.com/v1beta/openai",
    },
    ProviderSpec {
        name: "openrouter",
        aliases: &["openrouter"],
        api_key_env: "OPENROUTER_API_KEY",
        base_url: "https://openrouter.ai/api/v1",
    },
];

/// Split a `provider/model` reference.  The model part may itself contain
/// slashes (OpenRouter ids like `openrouter/deepseek/deepseek-chat`).
pub fn split_model_ref(model_ref: &str) -> anyhow::Result<(&str, &str)> {
    match model_ref.split_once('/') {
        Some((prefix, model)) if !prefix.is_empty() && !model.is_empty() => Ok((prefix, model)),
        _ => bail!("model reference '{model_ref}' is not of the form provider/model"),
    }
}

/// Environment variable that supplies the API key for a provider prefix.
pub fn api_key_env(prefix: &str) -> Option<&'static str> {
    let lower = prefix.to_ascii_lowercase();
    PROVIDERS
        .iter()
        .find(|p| p.aliases.contains(&lower.as_str()))
        .map(|p| p.api_key_env)
}

/// Build a provider from a `provider/model` reference, resolving the API key
/// from the environment.
pub fn from_model_ref(model_ref: &str) -> anyhow::Result<Arc<dyn ModelProvider>> {
    let (prefix, model) = split_model_ref(model_ref)?;
    let lower = prefix.to_ascii_lowercase();
    let spec = PROVIDERS
        .iter()
        .find(|p| p.aliases.contains(&lower.as_str()))
        .with_context(|| format!("unknown model provider '{prefix}'"))?;
    let api_key = std::env::var(spec.api_key_env)
        .with_context(|| format!("{} is not set (required for {})", spec.api_key_env, spec.name))?;
    Ok(Arc::new(OpenAICompatProvider::new(
        spec.name,
        model.to_string(),
        api_key,
        spec.base_url,
    )))
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
