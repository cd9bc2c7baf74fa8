use std::future::Future;
use std::time::Duration;

/// Bounded exponential backoff with jitter. Used to replay optimistic
/// writes that lost a version race.
#[derive(Clone)]
pub struct RetryConfig {
    pub max_attempts: usize,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
    pub jitter_max: Option<Duration>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_backoff: Duration::from_millis(20),
            max_backoff: Duration::from_millis(500),
            jitter_max: Some(Duration::from_millis(50)),
        }
    }
}

impl RetryConfig {
    /// More attempts with longer backoff, for contended profile writes.
    pub fn aggressive() -> Self {
        Self {
            max_attempts: 7,
            base_backoff: Duration::from_millis(50),
            max_backoff: Duration::from_millis(1000),
            jitter_max: Some(Duration::from_millis(100)),
        }
    }
}

/// Run `f` until it succeeds or the attempt budget is spent, sleeping a
/// doubling (capped, jittered) backoff between tries. The last error is
/// returned verbatim.
pub async fn retry_async_with_config<F, Fut, T, E>(config: RetryConfig, mut f: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut remaining = config.max_attempts.max(1);
    let mut backoff = config.base_backoff;

    loop {
        match f().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                remaining -= 1;
                if remaining == 0 {
                    return Err(err);
                }
                tokio::time::sleep(with_jitter(backoff, config.jitter_max)).await;
                backoff = std::cmp::min(backoff * 2, config.max_backoff);
            }
        }
    }
}

fn with_jitter(backoff: Duration, jitter_max: Option<Duration>) -> Duration {
    match jitter_max {
        Some(max) if !max.is_zero() => {
            let extra = rand::random_range(0..=max.as_millis() as u64);
            backoff + Duration::from_millis(extra)
        }
        _ => backoff,
    }
}
