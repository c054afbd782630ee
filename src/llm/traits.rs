//! 模型调用边界
//!
//! 所有后端（OpenAI 兼容 / Scripted）实现 ModelClient：generate_text（可带工具与联网搜索）、
//! generate_object（按 JSON Schema 生成结构化对象）、stream_text（流式文本）。

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{stream, Stream};
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::memory::Message;
use crate::tools::json_schema_for;

/// 模型调用错误；在步骤循环中属于致命错误
#[derive(Error, Debug)]
pub enum LlmError {
    #[error("Model request failed: {0}")]
    Request(String),

    #[error("Malformed provider response: {0}")]
    MalformedResponse(String),

    #[error("Structured output failed schema validation: {0}")]
    Schema(String),

    #[error("Model request timed out after {0:?}")]
    Timeout(Duration),

    #[error("No scripted response left for {0}")]
    Exhausted(&'static str),
}

/// 每一步的工具选择策略
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolChoice {
    /// 模型自行决定是否调用工具
    #[default]
    Auto,
    /// 必须至少调用一个工具
    Required,
    /// 禁止调用工具
    None,
    /// 必须调用指定工具
    Tool { name: String },
}

/// 暴露给模型的工具声明（name / description / 参数 JSON Schema）
#[derive(Debug, Clone, Serialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// 模型请求的一次工具调用；arguments 为已解析的 JSON（解析失败时保留原始字符串）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

impl ToolCallRequest {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }
}

/// 联网搜索返回的引用来源
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    pub url: String,
    pub title: String,
}

/// 文本生成请求
#[derive(Debug, Clone, Default)]
pub struct TextRequest {
    /// 覆盖客户端默认模型
    pub model: Option<String>,
    pub system: Option<String>,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDefinition>,
    pub tool_choice: ToolChoice,
    /// 同一步内是否允许并行工具调用；步骤循环固定传 false
    pub parallel_tool_calls: bool,
    /// 是否启用联网搜索
    pub web_search: bool,
}

impl TextRequest {
    /// 单条 user 消息的请求
    pub fn prompt(prompt: impl Into<String>) -> Self {
        Self {
            messages: vec![Message::user(prompt)],
            ..Self::default()
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_model(mut self, model: Option<&str>) -> Self {
        self.model = model.map(String::from);
        self
    }

    pub fn with_web_search(mut self) -> Self {
        self.web_search = true;
        self
    }
}

/// 文本生成结果
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TextResponse {
    pub text: String,
    pub tool_calls: Vec<ToolCallRequest>,
    pub sources: Vec<Source>,
}

impl TextResponse {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    pub fn tool_calls(tool_calls: Vec<ToolCallRequest>) -> Self {
        Self {
            tool_calls,
            ..Self::default()
        }
    }
}

/// 结构化生成请求；schema 由 generate_structured 按目标类型填充
#[derive(Debug, Clone, Default)]
pub struct ObjectRequest {
    pub model: Option<String>,
    pub system: Option<String>,
    pub prompt: String,
    pub schema_name: String,
    pub schema: Value,
}

impl ObjectRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Self::default()
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_model(mut self, model: Option<&str>) -> Self {
        self.model = model.map(String::from);
        self
    }
}

pub type TextStream = Pin<Box<dyn Stream<Item = Result<String, LlmError>> + Send>>;

/// 模型客户端 trait
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// 文本生成，可带工具声明与工具选择
    async fn generate_text(&self, request: TextRequest) -> Result<TextResponse, LlmError>;

    /// 按 request.schema 生成 JSON 对象
    async fn generate_object(&self, request: ObjectRequest) -> Result<Value, LlmError>;

    /// 流式文本；默认实现把 generate_text 的结果作为单个分片返回
    async fn stream_text(&self, request: TextRequest) -> Result<TextStream, LlmError> {
        let response = self.generate_text(request).await?;
        Ok(Box::pin(stream::iter(vec![Ok(response.text)])))
    }

    /// 累计 token 使用：(prompt, completion, total)
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}

/// 生成并反序列化为 T；不符合 schema 时返回 LlmError::Schema
pub async fn generate_structured<T>(
    client: &dyn ModelClient,
    mut request: ObjectRequest,
) -> Result<T, LlmError>
where
    T: JsonSchema + DeserializeOwned,
{
    request.schema_name = schema_name::<T>();
    request.schema = json_schema_for::<T>();
    let value = client.generate_object(request).await?;
    serde_json::from_value(value).map_err(|e| LlmError::Schema(e.to_string()))
}

/// Provider 要求 schema 名只含字母、数字、下划线与连字符
fn schema_name<T: JsonSchema>() -> String {
    T::schema_name()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedModelClient;

    #[derive(Debug, Deserialize, JsonSchema)]
    struct Topics {
        topics: Vec<String>,
    }

    #[tokio::test]
    async fn test_generate_structured_deserializes() {
        let client = ScriptedModelClient::new()
            .with_object(serde_json::json!({"topics": ["a", "b"]}));
        let topics: Topics = generate_structured(&client, ObjectRequest::new("go"))
            .await
            .unwrap();
        assert_eq!(topics.topics, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_generate_structured_schema_mismatch() {
        let client =
            ScriptedModelClient::new().with_object(serde_json::json!({"topics": "not a list"}));
        let err = generate_structured::<Topics>(&client, ObjectRequest::new("go"))
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::Schema(_)));
    }

    #[tokio::test]
    async fn test_default_stream_yields_single_chunk() {
        use futures_util::StreamExt;

        let client = ScriptedModelClient::new().with_text(TextResponse::text("hello"));
        let mut stream = client.stream_text(TextRequest::prompt("hi")).await.unwrap();
        assert_eq!(stream.next().await.unwrap().unwrap(), "hello");
        assert!(stream.next().await.is_none());
    }
}
