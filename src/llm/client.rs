use crate::error::{LlmError, Result};
use crate::llm::types::{ChatCompletionRequest, ChatCompletionResponse};
use reqwest::Client;
use reqwest::header::HeaderMap;
use std::time::Duration;
use tracing::debug;

/// 发送一次 `/chat/completions` 请求
///
/// 非 2xx 状态返回 [`LlmError::ApiError`]，响应体无法解析返回 [`LlmError::InvalidResponse`]。
pub async fn post(
    client: &Client,
    request_body: &ChatCompletionRequest,
    header_map: HeaderMap,
    url: &str,
    timeout: Duration,
) -> Result<ChatCompletionResponse> {
    debug!(model = %request_body.model, messages = request_body.messages.len(), "发送 LLM 请求");
    let response = client
        .post(url)
        .headers(header_map)
        .timeout(timeout)
        .json(request_body)
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        let message = response
            .text()
            .await
            .unwrap_or_else(|e| format!("<unreadable body: {e}>"));
        return Err(LlmError::ApiError {
            status: status.as_u16(),
            message,
        }
        .into());
    }

    let parsed: ChatCompletionResponse = response
        .json()
        .await
        .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;
    if let Some(usage) = parsed.usage {
        debug!(
            prompt_tokens = usage.prompt_tokens,
            completion_tokens = usage.completion_tokens,
            "LLM 响应已解析"
        );
    }
    Ok(parsed)
}
