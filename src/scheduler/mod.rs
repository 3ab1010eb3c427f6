//! 后台周期任务
//!
//! 每个任务一个 tokio task：首轮等待 → 执行一轮 → 睡眠 → 下一轮。
//! 一轮在独立的 task 中执行，panic 和错误都只会让循环进入退避等待，不会结束循环。
//! 所有等待都与 [`CancellationToken`] 竞争，取消后当前轮被中止、循环退出。

mod tasks;

pub use tasks::{Autosave, ContextRefresh, ProfileRefresh};

use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// 一轮执行的统计
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PassReport {
    pub processed: usize,
    pub skipped: usize,
    pub failed: usize,
}

#[async_trait]
pub trait PeriodicTask: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    /// 执行一轮；单个条目的失败应计入 `failed` 而不是返回错误
    async fn run_pass(&self) -> Result<PassReport>;
}

#[derive(Debug, Clone, Copy)]
pub struct Schedule {
    pub first_delay: Duration,
    pub interval: Duration,
    /// 一轮整体失败后的等待
    pub backoff: Duration,
}

pub fn spawn(
    task: Arc<dyn PeriodicTask>,
    schedule: Schedule,
    token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(run_loop(task, schedule, token))
}

async fn run_loop(task: Arc<dyn PeriodicTask>, schedule: Schedule, token: CancellationToken) {
    let name = task.name();
    info!(task = name, interval = ?schedule.interval, "⏱️ 后台任务已启动");

    if !sleep_or_cancel(schedule.first_delay, &token).await {
        info!(task = name, "后台任务已停止");
        return;
    }

    loop {
        let pass_task = task.clone();
        let mut pass = tokio::spawn(async move { pass_task.run_pass().await });

        let outcome = tokio::select! {
            _ = token.cancelled() => {
                pass.abort();
                break;
            }
            outcome = &mut pass => outcome,
        };

        let wait = match outcome {
            Ok(Ok(report)) => {
                info!(
                    task = name,
                    processed = report.processed,
                    skipped = report.skipped,
                    failed = report.failed,
                    "后台任务本轮完成"
                );
                schedule.interval
            }
            Ok(Err(e)) => {
                warn!(task = name, error = %e, backoff = ?schedule.backoff, "后台任务本轮失败");
                schedule.backoff
            }
            Err(e) => {
                error!(task = name, error = %e, backoff = ?schedule.backoff, "后台任务本轮 panic");
                schedule.backoff
            }
        };

        if !sleep_or_cancel(wait, &token).await {
            break;
        }
    }
    info!(task = name, "后台任务已停止");
}

/// 睡眠 `duration`；被取消时返回 `false`
pub async fn sleep_or_cancel(duration: Duration, token: &CancellationToken) -> bool {
    tokio::select! {
        _ = token.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RecallError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Flaky {
        runs: AtomicUsize,
    }

    #[async_trait]
    impl PeriodicTask for Flaky {
        fn name(&self) -> &'static str {
            "flaky"
        }

        async fn run_pass(&self) -> Result<PassReport> {
            match self.runs.fetch_add(1, Ordering::SeqCst) {
                0 => panic!("first pass explodes"),
                1 => Err(RecallError::Other("second pass fails".to_string())),
                _ => Ok(PassReport::default()),
            }
        }
    }

    #[tokio::test]
    async fn test_loop_survives_panic_and_error() {
        let task = Arc::new(Flaky {
            runs: AtomicUsize::new(0),
        });
        let token = CancellationToken::new();
        let schedule = Schedule {
            first_delay: Duration::ZERO,
            interval: Duration::from_millis(5),
            backoff: Duration::from_millis(5),
        };
        let handle = spawn(task.clone(), schedule, token.clone());

        for _ in 0..200 {
            if task.runs.load(Ordering::SeqCst) >= 4 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(task.runs.load(Ordering::SeqCst) >= 4);

        token.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_cancel_during_first_delay() {
        let task = Arc::new(Flaky {
            runs: AtomicUsize::new(2),
        });
        let token = CancellationToken::new();
        let schedule = Schedule {
            first_delay: Duration::from_secs(3600),
            interval: Duration::from_secs(3600),
            backoff: Duration::from_secs(3600),
        };
        let handle = spawn(task.clone(), schedule, token.clone());
        token.cancel();
        handle.await.unwrap();
        assert_eq!(task.runs.load(Ordering::SeqCst), 2);
    }
}
