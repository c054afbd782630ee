//! Scripted 模型客户端（用于测试与无 API Key 的本地运行）
//!
//! 按队列依次回放预设响应：带工具的请求取 steps，不带工具的文本请求取 texts，结构化请求取 objects。

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use serde_json::Value;

use crate::llm::{
    LlmError, ModelClient, ObjectRequest, TextRequest, TextResponse, ToolCallRequest, ToolChoice,
};
use crate::memory::Role;

#[derive(Debug, Default)]
pub struct ScriptedModelClient {
    steps: Mutex<VecDeque<Result<TextResponse, String>>>,
    texts: Mutex<VecDeque<TextResponse>>,
    objects: Mutex<VecDeque<Result<Value, String>>>,
    /// 每个带工具请求收到的 tool_choice，按调用顺序
    choices: Mutex<Vec<ToolChoice>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

impl ScriptedModelClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加一步：模型在这一步发出的工具调用
    pub fn with_step(self, calls: Vec<ToolCallRequest>) -> Self {
        lock(&self.steps).push_back(Ok(TextResponse::tool_calls(calls)));
        self
    }

    /// 追加一步：只输出文本、不调用工具
    pub fn with_final_text(self, text: impl Into<String>) -> Self {
        lock(&self.steps).push_back(Ok(TextResponse::text(text)));
        self
    }

    /// 追加一步：模型调用失败
    pub fn with_step_error(self, message: impl Into<String>) -> Self {
        lock(&self.steps).push_back(Err(message.into()));
        self
    }

    pub fn with_text(self, response: TextResponse) -> Self {
        lock(&self.texts).push_back(response);
        self
    }

    pub fn with_object(self, value: Value) -> Self {
        lock(&self.objects).push_back(Ok(value));
        self
    }

    pub fn with_object_error(self, message: impl Into<String>) -> Self {
        lock(&self.objects).push_back(Err(message.into()));
        self
    }

    pub fn recorded_choices(&self) -> Vec<ToolChoice> {
        lock(&self.choices).clone()
    }
}

#[async_trait]
impl ModelClient for ScriptedModelClient {
    async fn generate_text(&self, request: TextRequest) -> Result<TextResponse, LlmError> {
        if !request.tools.is_empty() {
            lock(&self.choices).push(request.tool_choice.clone());
            return match lock(&self.steps).pop_front() {
                Some(Ok(response)) => Ok(response),
                Some(Err(message)) => Err(LlmError::Request(message)),
                None => Ok(TextResponse::text("done")),
            };
        }

        if let Some(response) = lock(&self.texts).pop_front() {
            return Ok(response);
        }
        let last_user = request
            .messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .unwrap_or("(no input)");
        Ok(TextResponse::text(format!("(mock) {last_user}")))
    }

    async fn generate_object(&self, _request: ObjectRequest) -> Result<Value, LlmError> {
        match lock(&self.objects).pop_front() {
            Some(Ok(value)) => Ok(value),
            Some(Err(message)) => Err(LlmError::Request(message)),
            None => Err(LlmError::Exhausted("generate_object")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ToolDefinition;

    #[tokio::test]
    async fn test_steps_replayed_in_order_then_finish() {
        let client = ScriptedModelClient::new()
            .with_step(vec![ToolCallRequest::new("1", "a", Value::Null)])
            .with_step_error("boom");
        let request = TextRequest {
            tools: vec![ToolDefinition {
                name: "a".into(),
                description: String::new(),
                parameters: Value::Null,
            }],
            tool_choice: ToolChoice::Required,
            ..TextRequest::default()
        };

        let first = client.generate_text(request.clone()).await.unwrap();
        assert_eq!(first.tool_calls.len(), 1);
        assert!(client.generate_text(request.clone()).await.is_err());
        let last = client.generate_text(request).await.unwrap();
        assert!(last.tool_calls.is_empty());
        assert_eq!(client.recorded_choices().len(), 3);
    }

    #[tokio::test]
    async fn test_plain_text_echoes_prompt() {
        let client = ScriptedModelClient::new();
        let response = client.generate_text(TextRequest::prompt("hello")).await.unwrap();
        assert_eq!(response.text, "(mock) hello");
    }

    #[tokio::test]
    async fn test_objects_exhausted() {
        let client = ScriptedModelClient::new();
        let err = client.generate_object(ObjectRequest::new("x")).await.unwrap_err();
        assert!(matches!(err, LlmError::Exhausted(_)));
    }
}
