use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::task::JoinHandle;

use crate::{
    constants::{
        CODE_TOO_LARGE_MSG, MAX_CODE_BYTES, MISSING_FIELDS_MSG, RATE_LIMIT_MAX,
        RATE_LIMIT_WINDOW, UNSUPPORTED_LANGUAGE_MSG,
    },
    core::{
        domain::{ExecutionJob, Language},
        language::LanguageRegistry,
    },
};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AdmissionError {
    #[error("{}", MISSING_FIELDS_MSG)]
    MissingFields,
    #[error("{}", CODE_TOO_LARGE_MSG)]
    CodeTooLarge { len: usize },
    #[error("{}", UNSUPPORTED_LANGUAGE_MSG)]
    UnsupportedLanguage { language: String },
    #[error("Rate limit exceeded. Maximum {max} requests per minute. Please try again later.")]
    RateLimited { max: usize },
}

/// Gate in front of the job queue: request validation plus a per-client
/// sliding-window rate limit. Clients are identified by whatever string the
/// caller passes (the peer address for HTTP), so this is advisory only.
#[derive(Debug)]
pub struct AdmissionController {
    windows: DashMap<String, VecDeque<Instant>>,
    window: Duration,
    max_requests: usize,
    max_code_bytes: usize,
    languages: Arc<LanguageRegistry>,
}

impl AdmissionController {
    pub fn new(languages: Arc<LanguageRegistry>) -> Self {
        Self {
            windows: DashMap::new(),
            window: RATE_LIMIT_WINDOW,
            max_requests: RATE_LIMIT_MAX,
            max_code_bytes: MAX_CODE_BYTES,
            languages,
        }
    }

    #[cfg(test)]
    pub fn with_rate_limit(mut self, window: Duration, max_requests: usize) -> Self {
        self.window = window;
        self.max_requests = max_requests;
        self
    }

    /// Validates the request and checks the client's rate window. Both gates
    /// run for every request; validation errors are reported first.
    pub fn admit(
        &self,
        client_id: &str,
        code: Option<String>,
        language: Option<String>,
        stdin: Option<String>,
    ) -> Result<ExecutionJob, AdmissionError> {
        let allowed = self.check_and_record(client_id);
        let job = self.validate(code, language, stdin)?;
        if !allowed {
            tracing::info!("Rate limit exceeded for {}", client_id);
            return Err(AdmissionError::RateLimited {
                max: self.max_requests,
            });
        }
        Ok(job)
    }

    pub fn validate(
        &self,
        code: Option<String>,
        language: Option<String>,
        stdin: Option<String>,
    ) -> Result<ExecutionJob, AdmissionError> {
        let code = code.filter(|c| !c.is_empty());
        let language = language.filter(|l| !l.trim().is_empty());
        let (Some(code), Some(language)) = (code, language) else {
            return Err(AdmissionError::MissingFields);
        };

        if code.len() > self.max_code_bytes {
            return Err(AdmissionError::CodeTooLarge { len: code.len() });
        }

        let parsed = language
            .parse::<Language>()
            .ok()
            .filter(|l| self.languages.supports(l))
            .ok_or(AdmissionError::UnsupportedLanguage { language })?;

        Ok(ExecutionJob::new(code, parsed, stdin))
    }

    pub fn check_and_record(&self, client_id: &str) -> bool {
        self.check_and_record_at(client_id, Instant::now())
    }

    pub fn check_and_record_at(&self, client_id: &str, now: Instant) -> bool {
        let mut timestamps = self.windows.entry(client_id.to_string()).or_default();
        prune(&mut timestamps, now, self.window);

        if timestamps.len() >= self.max_requests {
            return false;
        }
        timestamps.push_back(now);
        true
    }

    /// Drops clients whose window is empty after pruning. Returns how many
    /// were removed.
    pub fn sweep_at(&self, now: Instant) -> usize {
        let before = self.windows.len();
        self.windows.retain(|_, timestamps| {
            prune(timestamps, now, self.window);
            !timestamps.is_empty()
        });
        before.saturating_sub(self.windows.len())
    }

    pub fn tracked_clients(&self) -> usize {
        self.windows.len()
    }

    pub fn spawn_sweeper(self: Arc<Self>, every: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let removed = self.sweep_at(Instant::now());
                tracing::debug!(
                    "Rate limit sweep removed {} clients, {} tracked",
                    removed,
                    self.tracked_clients()
                );
            }
        })
    }
}

fn prune(timestamps: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while let Some(oldest) = timestamps.front() {
        if now.saturating_duration_since(*oldest) < window {
            break;
        }
        timestamps.pop_front();
    }
}
