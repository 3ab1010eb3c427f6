use chat_recall::bot::ChatBot;
use chat_recall::config::Config;
use chat_recall::error::Result;
use chat_recall::inference::{Inference, LlmInference};
use chat_recall::llm::DefaultLlmClient;
use chat_recall::state::ChatState;
use chat_recall::transport::TelegramTransport;
use clap::Parser;
use futures::future::join_all;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// 记住群聊内容并按需回答的聊天助手
#[derive(Parser, Debug)]
#[command(name = "chat-recall", version)]
struct Cli {
    /// YAML 配置文件
    #[arg(short, long, env = "RECALL_CONFIG")]
    config: Option<PathBuf>,

    /// 每日日志目录
    #[arg(long, env = "RECALL_LOG_DIR")]
    log_dir: Option<PathBuf>,

    /// 画像、快照和上下文缓存目录
    #[arg(long, env = "RECALL_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// 上下文缓存的新鲜窗口（秒）
    #[arg(long)]
    freshness_window_secs: Option<u64>,

    /// 每个 chat 的会话缓冲容量
    #[arg(long)]
    buffer_capacity: Option<usize>,

    /// 跳过启动时的画像分析
    #[arg(long)]
    skip_initial_profile_analysis: bool,
}

impl Cli {
    fn apply(&self, mut config: Config) -> Config {
        if let Some(dir) = &self.log_dir {
            config.log_dir = dir.clone();
        }
        if let Some(dir) = &self.data_dir {
            config.data_dir = dir.clone();
        }
        if let Some(secs) = self.freshness_window_secs {
            config.freshness_window_secs = secs;
        }
        if let Some(capacity) = self.buffer_capacity {
            config.buffer_capacity = capacity;
        }
        if self.skip_initial_profile_analysis {
            config.skip_initial_profile_analysis = true;
        }
        config
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("chat_recall=info")),
        )
        .init();

    let cli = Cli::parse();
    let config = cli.apply(Config::load(cli.config.as_deref())?.with_env()?);
    config.validate()?;
    let token = config.require_bot_token()?.to_string();

    let http = reqwest::Client::new();
    let llm = Arc::new(DefaultLlmClient::new(
        Arc::new(http.clone()),
        config.model_config(),
    ));
    let inference: Arc<dyn Inference> = Arc::new(LlmInference::new(llm));

    let state = Arc::new(ChatState::open(Arc::new(config), inference).await?);
    state.warm_up().await?;

    let transport = Arc::new(TelegramTransport::new(http, &token));
    let bot = ChatBot::connect(state.clone(), transport).await?;

    let shutdown = CancellationToken::new();
    let background = state.spawn_background(&shutdown);

    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "无法监听退出信号");
            return;
        }
        info!("收到退出信号，正在停止");
        signal_token.cancel();
    });

    let result = bot.run(shutdown.clone()).await;

    shutdown.cancel();
    join_all(background).await;
    state.flush().await;
    result
}
