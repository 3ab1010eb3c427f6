//! 测试基础设施
//!
//! 在不依赖真实 LLM 和 Telegram 的情况下测试各组件。
//!
//! | 类型 | 用途 |
//! |------|------|
//! | [`MockLlmClient`] | 替代 HTTP 模型接口，测试 [`LlmInference`](crate::inference::LlmInference) |
//! | [`MockInference`] | 替代推理层，测试缓存、画像、调度和 Bot |
//! | [`MockTransport`] | 替代聊天通道，预置入站消息并记录出站消息 |
//!
//! 所有 Mock 都完全在内存中运行，内部用 `Mutex` 记录调用，可在多任务测试中共享。

mod mock_inference;
mod mock_llm;
mod mock_transport;

pub use mock_inference::{MockInference, ReplyCall, SummarizeCall};
pub use mock_llm::MockLlmClient;
pub use mock_transport::{MockTransport, SentMessage};
