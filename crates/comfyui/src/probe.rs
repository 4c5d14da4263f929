//! Availability probing for a ComfyUI instance.
//!
//! ComfyUI is started out-of-band and can take minutes to load models.
//! [`wait_until_available`] polls its root endpoint with a fixed delay
//! until it answers `200 OK` or the attempt budget runs out.

use std::time::Duration;

/// Attempt budget and pacing for [`wait_until_available`].
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    /// Total number of health requests before giving up.
    pub max_attempts: u32,
    /// Fixed delay between consecutive attempts.
    pub interval: Duration,
    /// Timeout applied to each individual health request.
    pub request_timeout: Duration,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            max_attempts: 180,
            interval: Duration::from_secs(1),
            request_timeout: Duration::from_secs(5),
        }
    }
}

/// Poll `url` until it returns `200 OK`.
///
/// Returns `true` on the first successful response and `false` once
/// `max_attempts` requests have failed. Network errors count as failed
/// attempts.
pub async fn wait_until_available(client: &reqwest::Client, url: &str, config: &ProbeConfig) -> bool {
    for attempt in 1..=config.max_attempts {
        match client
            .get(url)
            .timeout(config.request_timeout)
            .send()
            .await
        {
            Ok(response) if response.status() == reqwest::StatusCode::OK => {
                tracing::info!(url = %url, attempt, "ComfyUI is reachable");
                return true;
            }
            Ok(response) => {
                tracing::debug!(
                    url = %url,
                    attempt,
                    status = response.status().as_u16(),
                    "ComfyUI not ready",
                );
            }
            Err(e) => {
                tracing::debug!(url = %url, attempt, error = %e, "ComfyUI not reachable");
            }
        }

        if attempt % 10 == 0 {
            tracing::info!(
                url = %url,
                attempt,
                max_attempts = config.max_attempts,
                "Still waiting for ComfyUI",
            );
        }

        if attempt < config.max_attempts {
            tokio::time::sleep(config.interval).await;
        }
    }

    tracing::warn!(
        url = %url,
        max_attempts = config.max_attempts,
        "ComfyUI did not become reachable",
    );
    false
}
