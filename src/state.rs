use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::task::JoinSet;

use crate::config::Config;
use crate::rate_limit::{IssuanceRateLimiter, TokenAttemptLimiter};
use crate::recovery::ResetCoordinator;

pub type SharedState = Arc<AppState>;

pub struct AppState {
    pub config: Config,
    pub recovery: Arc<ResetCoordinator>,
    pub issuance_limiter: IssuanceRateLimiter,
    pub attempt_limiter: TokenAttemptLimiter,
    pub background: BackgroundTasks,
}

/// Work that outlives the request that started it. Drained on shutdown so an
/// accepted recovery request is not dropped.
#[derive(Default)]
pub struct BackgroundTasks {
    tasks: Mutex<JoinSet<()>>,
}

impl BackgroundTasks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut tasks = self.lock();
        // Reap finished tasks so the set only holds in-flight work
        while let Some(result) = tasks.try_join_next() {
            if let Err(e) = result {
                tracing::error!("Background task failed: {e}");
            }
        }
        tasks.spawn(task);
    }

    /// Wait for every task spawned so far.
    pub async fn drain(&self) {
        let mut tasks = std::mem::take(&mut *self.lock());
        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                tracing::error!("Background task failed: {e}");
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, JoinSet<()>> {
        self.tasks.lock().unwrap_or_else(|e| e.into_inner())
    }
}
