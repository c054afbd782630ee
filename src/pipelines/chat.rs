//! 流式对话：把消息列表交给模型，按分片返回回复

use crate::core::RunError;
use crate::llm::{TextRequest, TextStream};
use crate::memory::Message;
use crate::pipelines::PipelineContext;

const WEB_SEARCH_SYSTEM: &str = "You have access to web search. When the user asks about websites, companies, \
current events, or anything that requires up-to-date information, search the internet first before responding. \
Always provide accurate, current information from your search results.";

#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    pub messages: Vec<Message>,
    pub web_search: bool,
    pub model: Option<String>,
}

pub async fn stream_chat(ctx: &PipelineContext<'_>, request: ChatRequest) -> Result<TextStream, RunError> {
    if request.messages.is_empty() {
        return Err(RunError::InvalidRequest("Messages array is required".into()));
    }
    tracing::info!(
        web_search = request.web_search,
        model = request.model.as_deref().unwrap_or("default"),
        messages = request.messages.len(),
        "chat started"
    );

    let mut text_request = TextRequest {
        messages: request.messages,
        ..TextRequest::default()
    }
    .with_model(request.model.as_deref());
    if request.web_search {
        text_request = text_request
            .with_system(ctx.prompts.render("chat_web_search", WEB_SEARCH_SYSTEM, &[]))
            .with_web_search();
    }
    Ok(ctx.model.stream_text(text_request).await?)
}
