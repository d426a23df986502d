use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::debug;

const MAX_RETRIES: usize = 2;

/// Run `op` up to 1 + MAX_RETRIES times, sleeping 200–500 ms (jittered)
/// between attempts. Returns the last error if every attempt fails.
pub(crate) async fn with_retries<T, E, F, Fut>(label: &str, mut op: F) -> Result<T, E>
where
    E: std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < MAX_RETRIES => {
                attempt += 1;
                let jitter_ms = rand::rng().random_range(200..=500);
                debug!(label, attempt, error = %err, "fetch attempt failed, retrying");
                tokio::time::sleep(Duration::from_millis(jitter_ms)).await;
            }
            Err(err) => return Err(err),
        }
    }
}
