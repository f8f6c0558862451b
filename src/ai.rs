use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;
use tracing::debug;

// --- Provider trait ---

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompletionOptions {
    pub max_tokens: u32,
    pub temperature: f32,
}

pub trait AIProvider {
    fn complete(&self, system: &str, prompt: &str, options: &CompletionOptions) -> Result<String>;
    fn model_name(&self) -> &str;
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProviderKind {
    Anthropic,
    OpenAI,
    OpenRouter,
    ClaudeCode,
}

#[derive(Debug, Clone)]
pub struct ModelSpec {
    pub provider: ProviderKind,
    pub model_id: String,
    pub short_name: String,
}

pub fn resolve_model(name: &str) -> Result<ModelSpec> {
    let (provider, model_id, short_name) = match name {
        // OpenRouter (requires OPENROUTER_API_KEY)
        "deepseek" | "deepseek-chat" => (
            ProviderKind::OpenRouter,
            "deepseek/deepseek-chat-v3-0324",
            "deepseek",
        ),
        "router-sonnet" => (
            ProviderKind::OpenRouter,
            "anthropic/claude-sonnet-4.5",
            "router-sonnet",
        ),
        // Claude Code provider (uses `claude` CLI, no API key needed)
        "claude-sonnet" | "sonnet" => (
            ProviderKind::ClaudeCode,
            "claude-sonnet-4-5-20250929",
            "claude-sonnet",
        ),
        "claude-haiku" | "haiku" => (
            ProviderKind::ClaudeCode,
            "claude-haiku-4-5-20251001",
            "claude-haiku",
        ),
        // Direct Anthropic API (requires ANTHROPIC_API_KEY)
        "api-sonnet" => (
            ProviderKind::Anthropic,
            "claude-sonnet-4-5-20250929",
            "api-sonnet",
        ),
        "api-haiku" => (
            ProviderKind::Anthropic,
            "claude-haiku-4-5-20251001",
            "api-haiku",
        ),
        // OpenAI (requires OPENAI_API_KEY)
        "gpt-4o" => (ProviderKind::OpenAI, "gpt-4o", "gpt-4o"),
        "gpt-4o-mini" => (ProviderKind::OpenAI, "gpt-4o-mini", "gpt-4o-mini"),
        _ => {
            return Err(anyhow!(
                "Unknown model '{}'. Available: deepseek (default), router-sonnet, claude-sonnet, \
                 claude-haiku, api-sonnet, api-haiku, gpt-4o, gpt-4o-mini",
                name
            ));
        }
    };
    Ok(ModelSpec {
        provider,
        model_id: model_id.to_string(),
        short_name: short_name.to_string(),
    })
}

pub fn create_provider(spec: &ModelSpec) -> Result<Box<dyn AIProvider>> {
    match spec.provider {
        ProviderKind::ClaudeCode => {
            let provider = ClaudeCodeProvider::new(spec.model_id.clone())?;
            Ok(Box::new(provider))
        }
        ProviderKind::Anthropic => {
            let provider = AnthropicProvider::new(spec.model_id.clone())?;
            Ok(Box::new(provider))
        }
        ProviderKind::OpenAI => {
            let provider = ChatCompletionsProvider::openai(spec.model_id.clone())?;
            Ok(Box::new(provider))
        }
        ProviderKind::OpenRouter => {
            let provider = ChatCompletionsProvider::openrouter(spec.model_id.clone())?;
            Ok(Box::new(provider))
        }
    }
}

fn http_client() -> Result<reqwest::blocking::Client> {
    reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(300))
        .build()
        .context("Failed to build HTTP client")
}

// --- Anthropic provider ---

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";

#[derive(Debug, Serialize)]
struct AnthropicMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    system: &'a str,
    messages: Vec<AnthropicMessage<'a>>,
}

#[derive(Debug, Deserialize)]
struct AnthropicContentBlock {
    #[serde(rename = "type")]
    content_type: String,
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicContentBlock>,
}

#[derive(Debug)]
pub struct AnthropicProvider {
    api_key: String,
    model_id: String,
    url: String,
    client: reqwest::blocking::Client,
}

impl AnthropicProvider {
    pub fn new(model_id: String) -> Result<Self> {
        let api_key = env::var("ANTHROPIC_API_KEY")
            .context("ANTHROPIC_API_KEY environment variable not set. Set it with: export ANTHROPIC_API_KEY=your-key-here")?;
        Ok(Self {
            api_key,
            model_id,
            url: ANTHROPIC_API_URL.to_string(),
            client: http_client()?,
        })
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }
}

impl AIProvider for AnthropicProvider {
    fn complete(&self, system: &str, prompt: &str, options: &CompletionOptions) -> Result<String> {
        let request = AnthropicRequest {
            model: &self.model_id,
            max_tokens: options.max_tokens,
            temperature: options.temperature,
            system,
            messages: vec![AnthropicMessage {
                role: "user",
                content: prompt,
            }],
        };

        let response = self
            .client
            .post(&self.url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .context("Failed to send request to Anthropic API")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().unwrap_or_default();
            return Err(anyhow!(
                "Anthropic API request failed with status {}: {}",
                status,
                error_text
            ));
        }

        let api_response: AnthropicResponse = response
            .json()
            .context("Failed to parse Anthropic API response")?;

        api_response
            .content
            .into_iter()
            .find(|block| block.content_type == "text")
            .and_then(|block| block.text)
            .ok_or_else(|| anyhow!("No text content in Anthropic API response"))
    }

    fn model_name(&self) -> &str {
        &self.model_id
    }
}

// --- Claude Code provider (shells out to `claude` CLI) ---

#[derive(Debug)]
pub struct ClaudeCodeProvider {
    model_id: String,
}

impl ClaudeCodeProvider {
    pub fn new(model_id: String) -> Result<Self> {
        std::process::Command::new("claude")
            .arg("--version")
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .status()
            .context("'claude' CLI not found. Install it or pick an API model instead.")?;
        Ok(Self { model_id })
    }
}

impl AIProvider for ClaudeCodeProvider {
    fn complete(&self, system: &str, prompt: &str, _options: &CompletionOptions) -> Result<String> {
        let output = std::process::Command::new("claude")
            .arg("-p")
            .arg(prompt)
            .arg("--append-system-prompt")
            .arg(system)
            .arg("--model")
            .arg(&self.model_id)
            .output()
            .context("Failed to run 'claude' CLI")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("claude CLI failed: {}", stderr));
        }

        let response = String::from_utf8(output.stdout)
            .context("Invalid UTF-8 in claude CLI output")?;

        if response.trim().is_empty() {
            return Err(anyhow!("Empty response from claude CLI"));
        }

        Ok(response)
    }

    fn model_name(&self) -> &str {
        &self.model_id
    }
}

// --- OpenAI-compatible chat completions (OpenAI, OpenRouter) ---

const OPENAI_API_URL: &str = "https://api.openai.com/v1/chat/completions";
const OPENROUTER_API_URL: &str = "https://openrouter.ai/api/v1/chat/completions";

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug)]
pub struct ChatCompletionsProvider {
    api_key: String,
    model_id: String,
    url: String,
    label: &'static str,
    client: reqwest::blocking::Client,
}

impl ChatCompletionsProvider {
    pub fn openai(model_id: String) -> Result<Self> {
        let api_key = env::var("OPENAI_API_KEY")
            .context("OPENAI_API_KEY environment variable not set. Set it with: export OPENAI_API_KEY=your-key-here")?;
        Self::new(api_key, model_id, OPENAI_API_URL.to_string(), "OpenAI")
    }

    /// OPENROUTER_BASE_URL overrides the endpoint root, as in the crew config.
    pub fn openrouter(model_id: String) -> Result<Self> {
        let api_key = env::var("OPENROUTER_API_KEY")
            .context("OPENROUTER_API_KEY environment variable not set. Set it with: export OPENROUTER_API_KEY=your-key-here")?;
        let url = match env::var("OPENROUTER_BASE_URL") {
            Ok(base) if !base.trim().is_empty() => {
                format!("{}/chat/completions", base.trim_end_matches('/'))
            }
            _ => OPENROUTER_API_URL.to_string(),
        };
        Self::new(api_key, model_id, url, "OpenRouter")
    }

    pub fn new(api_key: String, model_id: String, url: String, label: &'static str) -> Result<Self> {
        Ok(Self {
            api_key,
            model_id,
            url,
            label,
            client: http_client()?,
        })
    }
}

impl AIProvider for ChatCompletionsProvider {
    fn complete(&self, system: &str, prompt: &str, options: &CompletionOptions) -> Result<String> {
        let request = ChatRequest {
            model: &self.model_id,
            max_tokens: options.max_tokens,
            temperature: options.temperature,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
        };

        debug!(model = %self.model_id, url = %self.url, "Sending chat completion request");
        let response = self
            .client
            .post(&self.url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .with_context(|| format!("Failed to send request to {} API", self.label))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().unwrap_or_default();
            return Err(anyhow!(
                "{} API request failed with status {}: {}",
                self.label,
                status,
                error_text
            ));
        }

        let api_response: ChatResponse = response
            .json()
            .with_context(|| format!("Failed to parse {} API response", self.label))?;

        api_response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| anyhow!("No choices in {} API response", self.label))
    }

    fn model_name(&self) -> &str {
        &self.model_id
    }
}
