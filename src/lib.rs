pub mod bot;
pub mod config;
pub mod context;
pub mod conversation;
pub mod error;
pub mod history;
pub mod inference;
pub mod llm;
pub mod profile;
pub mod scheduler;
pub mod state;
pub mod storage;
pub mod testing;
pub mod transport;

pub mod prelude {
    pub use crate::bot::ChatBot;
    pub use crate::config::{Config, ResponseStyle};
    pub use crate::context::{ContextCache, ContextLookup, RegenerateScope};
    pub use crate::conversation::{ConversationBuffer, Turn};
    pub use crate::error::{RecallError, Result};
    pub use crate::history::{ChatId, LogEntry, LogStore, UserId, UserSnapshot};
    pub use crate::inference::{Inference, LlmInference};
    pub use crate::profile::{ProfileStore, UserProfile};
    pub use crate::state::ChatState;
    pub use crate::transport::{InboundTurn, Transport};
}
