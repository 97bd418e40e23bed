use std::time::Duration;

use tracing::debug;
use ureq::Agent;

use fieldup_update::{FetchError, TrackedFile, UpdateSource};

use crate::config::UpdaterConfig;

/// Update source retrieving tracked files over HTTP(S).
pub struct HttpSource {
    agent: Agent,
    config: UpdaterConfig,
}

impl HttpSource {
    pub fn new(config: &UpdaterConfig) -> Self {
        let agent_config = Agent::config_builder()
            .timeout_global(Some(Duration::from_secs(config.fetch.timeout_secs)))
            .build();
        Self {
            agent: agent_config.into(),
            config: config.clone(),
        }
    }
}

impl UpdateSource for HttpSource {
    fn fetch(&mut self, file: &TrackedFile) -> Result<Vec<u8>, FetchError> {
        let url = self.config.file_url(file);
        debug!("fetching {url}");
        let mut response = self
            .agent
            .get(url.as_str())
            .header("User-Agent", self.config.fetch.user_agent.as_str())
            .call()
            .map_err(classify)?;
        let status = response.status().as_u16();
        if status != 200 {
            return Err(FetchError::Status { status });
        }
        // Bodies of exactly `max-size` bytes are accepted.
        let limit = self.config.fetch.max_size;
        let content = response
            .body_mut()
            .with_config()
            .limit(limit.saturating_add(1))
            .read_to_vec()
            .map_err(|error| match error {
                ureq::Error::BodyExceedsLimit(_) => FetchError::TooLarge { limit },
                error => classify(error),
            })?;
        if content.is_empty() {
            return Err(FetchError::Empty);
        }
        Ok(content)
    }
}

fn classify(error: ureq::Error) -> FetchError {
    match error {
        ureq::Error::StatusCode(status) => FetchError::Status { status },
        ureq::Error::HostNotFound | ureq::Error::ConnectionFailed => FetchError::NotConnected,
        error => FetchError::Transport(Box::new(error)),
    }
}
