//! OpenAI 兼容 API 客户端
//!
//! 通过 async_openai 调用任意 OpenAI 兼容端点（可配置 base_url）。请求体直接按 Chat Completions
//! 格式构造（tools / tool_choice / response_format / web_search_options），经 byot 接口发送。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_openai::config::OpenAIConfig;
use async_openai::Client;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::llm::{
    LlmError, ModelClient, ObjectRequest, Source, TextRequest, TextResponse, ToolCallRequest,
    ToolChoice,
};
use crate::memory::{Message, Role};

/// Token 使用统计（累计值）
#[derive(Debug, Clone, Default)]
pub struct TokenUsage {
    pub prompt_tokens: Arc<AtomicU64>,
    pub completion_tokens: Arc<AtomicU64>,
    pub total_tokens: Arc<AtomicU64>,
}

impl TokenUsage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, prompt: u64, completion: u64) {
        self.prompt_tokens.fetch_add(prompt, Ordering::Relaxed);
        self.completion_tokens.fetch_add(completion, Ordering::Relaxed);
        self.total_tokens.fetch_add(prompt + completion, Ordering::Relaxed);
    }

    pub fn get(&self) -> (u64, u64, u64) {
        (
            self.prompt_tokens.load(Ordering::Relaxed),
            self.completion_tokens.load(Ordering::Relaxed),
            self.total_tokens.load(Ordering::Relaxed),
        )
    }
}

/// OpenAI 兼容客户端：默认模型用于工具调用与结构化输出，search_model 用于联网搜索请求
pub struct OpenAiClient {
    client: Client<OpenAIConfig>,
    model: String,
    search_model: String,
    /// 累计 token 使用统计
    pub usage: TokenUsage,
}

impl OpenAiClient {
    pub fn new(base_url: Option<&str>, model: &str, api_key: Option<&str>) -> Self {
        let api_key = api_key
            .map(String::from)
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .unwrap_or_default();

        let config = match base_url {
            Some(url) => OpenAIConfig::new().with_api_base(url).with_api_key(api_key),
            None => OpenAIConfig::new().with_api_key(api_key),
        };

        Self {
            client: Client::with_config(config),
            model: model.to_string(),
            search_model: model.to_string(),
            usage: TokenUsage::new(),
        }
    }

    pub fn with_search_model(mut self, model: impl Into<String>) -> Self {
        self.search_model = model.into();
        self
    }

    /// 单次 HTTP 请求超时
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        if let Ok(http) = reqwest::Client::builder().timeout(timeout).build() {
            self.client = self.client.with_http_client(http);
        }
        self
    }

    fn build_text_body(&self, request: &TextRequest) -> Value {
        let model = match (&request.model, request.web_search) {
            (Some(m), _) => m.as_str(),
            (None, true) => self.search_model.as_str(),
            (None, false) => self.model.as_str(),
        };

        let mut body = json!({
            "model": model,
            "messages": to_openai_messages(request.system.as_deref(), &request.messages),
        });

        if !request.tools.is_empty() {
            let tools: Vec<Value> = request
                .tools
                .iter()
                .map(|t| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.parameters,
                        }
                    })
                })
                .collect();
            body["tools"] = json!(tools);
            body["tool_choice"] = tool_choice_to_openai(&request.tool_choice);
            body["parallel_tool_calls"] = json!(request.parallel_tool_calls);
        }

        if request.web_search {
            body["web_search_options"] = json!({
                "user_location": {
                    "type": "approximate",
                    "approximate": { "country": "US" }
                }
            });
        }

        body
    }

    fn build_object_body(&self, request: &ObjectRequest) -> Value {
        let model = request.model.as_deref().unwrap_or(&self.model);
        let messages = to_openai_messages(
            request.system.as_deref(),
            &[Message::user(request.prompt.clone())],
        );
        json!({
            "model": model,
            "messages": messages,
            "response_format": {
                "type": "json_schema",
                "json_schema": {
                    "name": request.schema_name,
                    "schema": request.schema,
                    "strict": false,
                }
            }
        })
    }

    async fn send(&self, body: Value) -> Result<OpenAIResponse, LlmError> {
        let response: OpenAIResponse = self
            .client
            .chat()
            .create_byot(body)
            .await
            .map_err(|e| LlmError::Request(e.to_string()))?;

        if let Some(usage) = &response.usage {
            self.usage
                .add(usage.prompt_tokens as u64, usage.completion_tokens as u64);
        }
        Ok(response)
    }
}

#[async_trait]
impl ModelClient for OpenAiClient {
    async fn generate_text(&self, request: TextRequest) -> Result<TextResponse, LlmError> {
        let body = self.build_text_body(&request);
        let response = self.send(body).await?;
        parse_text_response(response)
    }

    async fn generate_object(&self, request: ObjectRequest) -> Result<Value, LlmError> {
        let body = self.build_object_body(&request);
        let response = self.send(body).await?;
        let text = parse_text_response(response)?.text;
        serde_json::from_str(strip_code_fence(&text))
            .map_err(|e| LlmError::Schema(format!("{e}: {text}")))
    }

    fn token_usage(&self) -> (u64, u64, u64) {
        self.usage.get()
    }
}

fn tool_choice_to_openai(choice: &ToolChoice) -> Value {
    match choice {
        ToolChoice::Auto => json!("auto"),
        ToolChoice::Required => json!("required"),
        ToolChoice::None => json!("none"),
        ToolChoice::Tool { name } => json!({
            "type": "function",
            "function": { "name": name }
        }),
    }
}

fn to_openai_messages(system: Option<&str>, messages: &[Message]) -> Vec<Value> {
    let mut out = Vec::with_capacity(messages.len() + 1);
    if let Some(sys) = system {
        out.push(json!({ "role": "system", "content": sys }));
    }
    out.extend(messages.iter().map(message_to_openai));
    out
}

fn message_to_openai(message: &Message) -> Value {
    match message.role {
        Role::Tool => json!({
            "role": "tool",
            "tool_call_id": message.tool_call_id.clone().unwrap_or_default(),
            "content": message.content,
        }),
        Role::Assistant if !message.tool_calls.is_empty() => {
            let calls: Vec<Value> = message
                .tool_calls
                .iter()
                .map(|c| {
                    let arguments = match &c.arguments {
                        Value::String(raw) => raw.clone(),
                        other => other.to_string(),
                    };
                    json!({
                        "id": c.id,
                        "type": "function",
                        "function": { "name": c.name, "arguments": arguments }
                    })
                })
                .collect();
            let mut msg = json!({ "role": "assistant", "tool_calls": calls });
            if !message.content.is_empty() {
                msg["content"] = json!(message.content);
            }
            msg
        }
        Role::Assistant => json!({ "role": "assistant", "content": message.content }),
        Role::User => json!({ "role": "user", "content": message.content }),
        Role::System => json!({ "role": "system", "content": message.content }),
    }
}

fn parse_text_response(response: OpenAIResponse) -> Result<TextResponse, LlmError> {
    let message = response
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message)
        .ok_or_else(|| LlmError::MalformedResponse("response has no choices".into()))?;

    let tool_calls = message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .map(|tc| {
            let arguments = serde_json::from_str(&tc.function.arguments)
                .unwrap_or(Value::String(tc.function.arguments));
            ToolCallRequest::new(tc.id, tc.function.name, arguments)
        })
        .collect();

    let sources = message
        .annotations
        .unwrap_or_default()
        .into_iter()
        .filter_map(|a| a.url_citation)
        .map(|c| Source {
            url: c.url,
            title: c.title.unwrap_or_default(),
        })
        .collect();

    Ok(TextResponse {
        text: message.content.unwrap_or_default(),
        tool_calls,
        sources,
    })
}

/// 部分兼容端点会把 JSON 包在 ```json 代码块里
fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.strip_suffix("```"))
        .map(str::trim)
        .unwrap_or(trimmed)
}

#[derive(Debug, Deserialize)]
struct OpenAIResponse {
    choices: Vec<Choice>,
    usage: Option<ResponseUsage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Option<ResponseMessage>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
    tool_calls: Option<Vec<ResponseToolCall>>,
    annotations: Option<Vec<ResponseAnnotation>>,
}

#[derive(Debug, Deserialize)]
struct ResponseToolCall {
    id: String,
    function: ResponseFunction,
}

#[derive(Debug, Deserialize)]
struct ResponseFunction {
    name: String,
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct ResponseAnnotation {
    url_citation: Option<UrlCitation>,
}

#[derive(Debug, Deserialize)]
struct UrlCitation {
    url: String,
    title: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}
