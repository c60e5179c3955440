use std::sync::atomic::Ordering::Relaxed;
use std::sync::{atomic::AtomicBool, Arc};
use tokio::time::Duration;

use leaky_bucket::RateLimiter;

use crate::server_config::PromptLimits;

const BACKOFF_DURATION: Duration = Duration::from_secs(60);

/// Throttles outgoing calls to the model provider.
#[derive(Clone)]
pub struct RateLimiters {
    prompt: Arc<RateLimiter>,
    backoff: Arc<AtomicBool>,
    backoff_duration: Duration,
}

impl RateLimiters {
    pub fn new(prompt_limit_per_sec: usize, prompt_interval_ms: usize, prompt_refill: usize) -> Self {
        let prompt = RateLimiter::builder()
            .initial(prompt_limit_per_sec)
            .interval(Duration::from_millis(prompt_interval_ms as u64))
            .max(prompt_limit_per_sec)
            .refill(prompt_refill)
            .build();

        Self {
            prompt: Arc::new(prompt),
            backoff: Arc::new(AtomicBool::new(false)),
            backoff_duration: BACKOFF_DURATION,
        }
    }

    pub fn from_config(limits: &PromptLimits) -> Self {
        Self::new(
            limits.rate_limit_per_sec,
            limits.refill_interval_ms,
            limits.refill_amount,
        )
    }

    pub async fn acquire_one(&self) {
        if self.is_backing_off() {
            tokio::time::sleep(self.backoff_duration).await;
        }
        self.prompt.acquire_one().await;
    }

    pub fn is_backing_off(&self) -> bool {
        self.backoff.load(Relaxed)
    }

    pub fn trigger_backoff(&self) {
        // Already backing off, the running timer will clear it
        if self.backoff.swap(true, Relaxed) {
            return;
        }
        tracing::info!("Triggering backoff...");
        let self_ = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(self_.backoff_duration).await;
            tracing::info!("Backoff expired");
            self_.backoff.store(false, Relaxed);
        });
    }

    pub fn get_status(&self) -> String {
        let prompt_bucket = format!("{}/{}", self.prompt.balance(), self.prompt.max());
        if self.backoff.load(Relaxed) {
            format!("prompts: {} (BACKOFF)", prompt_bucket)
        } else {
            format!("prompts: {}", prompt_bucket)
        }
    }
}
