use thiserror::Error;
use tracing::{debug, warn};
use url::{Origin, Url};

use crate::bridge::{BridgeClient, BridgeFailure};
use crate::config::{resolve_origin, ConfigError, RuntimeConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum UsageError {
    #[error("send() called before open()")]
    SendBeforeOpen,
    #[error("open() called on a request that was already opened")]
    AlreadyOpened,
    #[error("send() called on a request that was already sent")]
    AlreadySent,
}

#[derive(Debug, Error)]
pub enum RequestError {
    #[error("asynchronous requests are not supported")]
    UnsupportedMode,
    #[error(transparent)]
    Usage(#[from] UsageError),
    #[error(transparent)]
    Bridge(#[from] BridgeFailure),
    #[error("failed to resolve request URL `{url}`: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("cross-origin request to `{url}` blocked")]
    CrossOrigin { url: String },
    #[error("request to `{url}` blocked: origin is not in the allow-list")]
    OriginNotAllowed { url: String },
}

/// Where a request may go. Without a base URL, URLs are handed to the host verbatim.
///
/// `same_origin_only` without a base URL blocks every request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestPolicy {
    pub base_url: Option<Url>,
    pub same_origin_only: bool,
    /// When set, only these origins may be requested. An empty list blocks everything.
    pub allowed_origins: Option<Vec<Origin>>,
}

impl RequestPolicy {
    pub fn from_config(config: &RuntimeConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            base_url: config.base_url.clone(),
            same_origin_only: config.same_origin_only,
            allowed_origins: config.allowed_origins()?,
        })
    }

    fn resolve(&self, url: &str) -> Result<String, RequestError> {
        match &self.base_url {
            Some(base) => base
                .join(url)
                .map(String::from)
                .map_err(|source| RequestError::InvalidUrl {
                    url: url.to_string(),
                    source,
                }),
            None => Ok(url.to_string()),
        }
    }

    fn check(&self, url: &str) -> Result<(), RequestError> {
        // Unparseable targets have no origin and fail every check.
        let target = Url::parse(url).ok().map(|target| target.origin());

        if let Some(allowed) = &self.allowed_origins {
            if !target.as_ref().is_some_and(|origin| allowed.contains(origin)) {
                return Err(RequestError::OriginNotAllowed {
                    url: url.to_string(),
                });
            }
        }

        if self.same_origin_only {
            let same = match (&self.base_url, &target) {
                (Some(base), Some(origin)) => base.origin() == *origin,
                _ => false,
            };
            if !same {
                return Err(RequestError::CrossOrigin {
                    url: url.to_string(),
                });
            }
        }
        Ok(())
    }
}

/// Origins a page's `Content-Security-Policy` lets it request.
///
/// Reads `connect-src`, falling back to `default-src`; `None` when the header
/// restricts neither. `'self'` maps to the origin of `page`. Sources that are
/// neither `'self'` nor an absolute URL are skipped.
pub fn allowed_origins_from_csp(header: &str, page: &Url) -> Option<Vec<Origin>> {
    let directive = |name: &str| {
        header.split(';').find_map(|directive| {
            let mut words = directive.split_whitespace();
            (words.next() == Some(name)).then(|| words.collect::<Vec<_>>())
        })
    };
    let sources = directive("connect-src").or_else(|| directive("default-src"))?;

    Some(
        sources
            .into_iter()
            .filter_map(|source| match resolve_origin(source, Some(page)) {
                Ok(origin) => Some(origin),
                Err(err) => {
                    debug!(target: "request", source, error = %err, "ignoring CSP source");
                    None
                }
            })
            .collect(),
    )
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestState {
    Unconfigured,
    Configured { method: String, url: String },
    Completed { method: String, url: String },
    Failed { method: String, url: String },
}

/// Single-shot blocking request: opened once, sent once.
#[derive(Debug)]
pub struct SyncRequest {
    client: BridgeClient,
    policy: RequestPolicy,
    state: RequestState,
    response_text: Option<String>,
}

impl SyncRequest {
    pub fn new(client: BridgeClient) -> Self {
        Self::with_policy(client, RequestPolicy::default())
    }

    pub fn with_policy(client: BridgeClient, policy: RequestPolicy) -> Self {
        Self {
            client,
            policy,
            state: RequestState::Unconfigured,
            response_text: None,
        }
    }

    pub fn state(&self) -> &RequestState {
        &self.state
    }

    pub fn open(&mut self, method: &str, url: &str, is_async: bool) -> Result<(), RequestError> {
        if is_async {
            return Err(RequestError::UnsupportedMode);
        }
        if !matches!(self.state, RequestState::Unconfigured) {
            return Err(UsageError::AlreadyOpened.into());
        }

        let url = self.policy.resolve(url)?;
        debug!(target: "request", method, %url, "request opened");
        self.state = RequestState::Configured {
            method: method.to_string(),
            url,
        };
        Ok(())
    }

    /// Perform the round trip, blocking until the host answers.
    pub fn send(&mut self, body: Option<&str>) -> Result<&str, RequestError> {
        let (method, url) = match &self.state {
            RequestState::Configured { method, url } => (method.clone(), url.clone()),
            RequestState::Unconfigured => return Err(UsageError::SendBeforeOpen.into()),
            RequestState::Completed { .. } | RequestState::Failed { .. } => {
                return Err(UsageError::AlreadySent.into())
            }
        };

        let outcome = self
            .policy
            .check(&url)
            .and_then(|()| {
                self.client
                    .send_request(&method, &url, body)
                    .map_err(RequestError::from)
            });

        match outcome {
            Ok(response_text) => {
                debug!(target: "request", %method, %url, bytes = response_text.len(), "request completed");
                self.state = RequestState::Completed { method, url };
                Ok(self.response_text.insert(response_text).as_str())
            }
            Err(err) => {
                warn!(target: "request", %method, %url, error = %err, "request failed");
                self.state = RequestState::Failed { method, url };
                Err(err)
            }
        }
    }

    pub fn response_text(&self) -> Option<&str> {
        self.response_text.as_deref()
    }
}
