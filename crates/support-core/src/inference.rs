//! Chat-completions client.
//!
//! [`OpenRouterClient`] talks to any OpenAI-compatible `/chat/completions`
//! endpoint (OpenRouter by default). The request carries a single system
//! message, built from the assistant prompt plus the selected knowledge
//! snippets, and the user's question. No conversation history is sent.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use support_models::KnowledgeEntry;
use tracing::{debug, trace};

use crate::config::InferenceSettings;
use crate::error::InferenceError;

/// Role and scope of the assistant.
pub const SYSTEM_PROMPT: &str = "\
You are a technical support assistant for Gitinsky, an IT company.
Your role is to help company employees with technical questions related to the technology stacks used in projects.

Your responsibilities:
- Provide accurate, concise technical assistance
- Focus on practical solutions and best practices
- Use clear, professional language
- If you're unsure, acknowledge it and suggest alternative resources
- Format code snippets clearly with proper syntax
- Provide step-by-step instructions when appropriate

Technology areas you support:
- Orchestration: Ansible, Kubernetes, OpenShift, Puppet
- Containerization: Docker, Docker Swarm, Docker Compose
- Infrastructure as Code: Terraform
- CI/CD: Argo CD, GitLab CI
- Monitoring & Logging: ELK Stack, Zabbix, Grafana, Prometheus
- Databases: MySQL, PostgreSQL
- Networking: Cisco, Mikrotik, Keenetic
- Operating Systems: Linux, Windows Administration
- Programming: Python
- System Administration
";

/// A knowledge entry as attached to a question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextSnippet {
    pub technology: String,
    pub category: String,
    pub content: String,
}

impl From<&KnowledgeEntry> for ContextSnippet {
    fn from(entry: &KnowledgeEntry) -> Self {
        Self {
            technology: entry.technology_name.clone(),
            category: entry.category.to_string(),
            content: entry.content.clone(),
        }
    }
}

/// A model answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub text: String,
    pub tokens_used: u32,
}

/// Produces an answer for one question.
#[async_trait]
pub trait InferenceClient: Send + Sync {
    async fn complete(
        &self,
        system_prompt: &str,
        user_query: &str,
        context: &[ContextSnippet],
    ) -> Result<Completion, InferenceError>;
}

/// Appends the snippets to `base` under a knowledge base heading.
pub fn build_system_prompt(base: &str, context: &[ContextSnippet]) -> String {
    if context.is_empty() {
        return base.to_string();
    }

    let sections: Vec<String> = context
        .iter()
        .map(|s| format!("## {} ({})\n{}", s.technology, s.category, s.content))
        .collect();

    format!(
        "{}\n\nRelevant company knowledge base:\n{}",
        base.trim_end(),
        sections.join("\n\n")
    )
}

/// Client for OpenAI-compatible chat completions.
#[derive(Clone)]
pub struct OpenRouterClient {
    client: reqwest::Client,
    api_key: Option<String>,
    endpoint: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
}

impl OpenRouterClient {
    /// Builds a client from settings. A missing API key is not an error here;
    /// every call then fails with [`InferenceError::Unavailable`].
    pub fn new(settings: &InferenceSettings) -> Result<Self, InferenceError> {
        // Backstop in case the caller does not bound the call itself.
        let client = reqwest::Client::builder()
            .timeout(settings.timeout + Duration::from_secs(5))
            .build()
            .map_err(|e| InferenceError::Unavailable(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_key: settings.api_key.clone(),
            endpoint: format!("{}/chat/completions", settings.api_url.trim_end_matches('/')),
            model: settings.model.clone(),
            max_tokens: settings.max_tokens,
            temperature: settings.temperature,
        })
    }
}

#[async_trait]
impl InferenceClient for OpenRouterClient {
    async fn complete(
        &self,
        system_prompt: &str,
        user_query: &str,
        context: &[ContextSnippet],
    ) -> Result<Completion, InferenceError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| InferenceError::Unavailable("OPENROUTER_API_KEY is not set".to_string()))?;

        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage::system(build_system_prompt(system_prompt, context)),
                ChatMessage::user(user_query),
            ],
            max_tokens: Some(self.max_tokens),
            temperature: Some(self.temperature),
            stream: false,
        };

        trace!("Sending chat request: {:?}", request);

        let response = self
            .client
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {}", api_key))
            .header("Content-Type", "application/json")
            .header("X-Title", "Gitinsky Support Bot")
            .json(&request)
            .send()
            .await
            .map_err(|e| InferenceError::Unavailable(format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(InferenceError::Unavailable(format!(
                "API error {}: {}",
                status, text
            )));
        }

        let response: ChatResponse = response
            .json()
            .await
            .map_err(|e| InferenceError::MalformedResponse(format!("failed to parse response: {}", e)))?;

        let tokens_used = response.usage.as_ref().map_or(0, |u| u.total_tokens);
        let text = response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| InferenceError::MalformedResponse("response has no content".to_string()))?;

        debug!(tokens_used, "Chat response received");
        Ok(Completion { text, tokens_used })
    }
}

/// Chat completion request.
#[derive(Debug, Clone, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    stream: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    #[serde(default)]
    content: Option<String>,
}

impl ChatMessage {
    fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: Some(content.into()),
        }
    }

    fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: Some(content.into()),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Clone, Deserialize)]
struct Usage {
    #[serde(default)]
    total_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snippet(tech: &str) -> ContextSnippet {
        ContextSnippet {
            technology: tech.to_string(),
            category: "orchestration".to_string(),
            content: format!("{tech} notes"),
        }
    }

    #[test]
    fn test_prompt_without_context() {
        assert_eq!(build_system_prompt(SYSTEM_PROMPT, &[]), SYSTEM_PROMPT);
    }

    #[test]
    fn test_prompt_with_context() {
        let prompt = build_system_prompt("Base.", &[snippet("Kubernetes"), snippet("Ansible")]);
        assert_eq!(
            prompt,
            "Base.\n\nRelevant company knowledge base:\n\
             ## Kubernetes (orchestration)\nKubernetes notes\n\n\
             ## Ansible (orchestration)\nAnsible notes"
        );
    }

    #[test]
    fn test_request_serialization() {
        let request = ChatRequest {
            model: "deepseek/deepseek-chat".into(),
            messages: vec![ChatMessage::system("sys"), ChatMessage::user("hi")],
            max_tokens: Some(2000),
            temperature: None,
            stream: false,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["messages"][1]["role"], "user");
        assert_eq!(json["max_tokens"], 2000);
        assert!(json.get("temperature").is_none());
    }

    #[test]
    fn test_response_parsing() {
        let json = r#"{
            "id": "gen-1",
            "choices": [{"index": 0, "message": {"role": "assistant", "content": "Use kubectl."}, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}
        }"#;
        let response: ChatResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.choices[0].message.content.as_deref(), Some("Use kubectl."));
        assert_eq!(response.usage.unwrap().total_tokens, 15);
    }

    #[tokio::test]
    async fn test_missing_key_is_unavailable() {
        let client = OpenRouterClient::new(&InferenceSettings {
            api_key: None,
            api_url: "http://127.0.0.1:9".into(),
            model: "m".into(),
            max_tokens: 10,
            temperature: 0.7,
            timeout: Duration::from_secs(1),
        })
        .unwrap();

        let err = client.complete(SYSTEM_PROMPT, "hi", &[]).await.unwrap_err();
        assert!(matches!(err, InferenceError::Unavailable(_)));
    }
}
