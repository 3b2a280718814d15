//! HTTP-01 challenge responder
//!
//! Answers `/.well-known/acme-challenge/<token>` from the record store, so
//! whichever node the validator reaches serves the material published by the
//! node running the order. Everything else passes through to the next
//! handler untouched.

use std::sync::Arc;

use bytes::Bytes;
use http::{header, Request, Response, StatusCode};
use tracing::{debug, trace, warn};

use crate::metrics::CertdMetrics;
use crate::store::{RecordFilter, RecordStore};

/// HTTP-01 challenge path prefix
pub const ACME_CHALLENGE_PREFIX: &str = "/.well-known/acme-challenge/";

/// Segments of a challenge path split on `/`: `""`, `.well-known`,
/// `acme-challenge`, token
const CHALLENGE_PATH_SEGMENTS: usize = 4;

/// What to do with a request
#[derive(Debug)]
pub enum ChallengeOutcome<B> {
    /// Answer the validator with the key authorization
    Respond(Response<Bytes>),
    /// Not a servable challenge; hand the request on
    Forward(Request<B>),
}

impl<B> ChallengeOutcome<B> {
    /// Whether the request was answered here
    pub fn is_respond(&self) -> bool {
        matches!(self, ChallengeOutcome::Respond(_))
    }
}

/// Serves HTTP-01 challenge responses from the record store
#[derive(Clone)]
pub struct ChallengeResponder {
    store: Arc<dyn RecordStore>,
    metrics: Option<Arc<CertdMetrics>>,
}

impl ChallengeResponder {
    /// Create a responder that looks tokens up in `store`
    ///
    /// Every node builds one over the shared store, so whichever node the
    /// CA reaches can answer.
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self {
            store,
            metrics: None,
        }
    }

    /// Count served, unknown and failed lookups in `metrics`
    pub fn with_metrics(mut self, metrics: Arc<CertdMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Extract the token from a challenge path
    ///
    /// Returns `None` unless the path is exactly the prefix followed by one
    /// non-empty segment.
    pub fn extract_token(path: &str) -> Option<&str> {
        if !path.starts_with(ACME_CHALLENGE_PREFIX) {
            return None;
        }
        if path.split('/').count() != CHALLENGE_PATH_SEGMENTS {
            return None;
        }
        path.strip_prefix(ACME_CHALLENGE_PREFIX)
            .filter(|token| !token.is_empty())
    }

    /// Handle a request, answering it if it asks for a published challenge
    pub async fn handle<B>(&self, request: Request<B>) -> ChallengeOutcome<B> {
        let token = match Self::extract_token(request.uri().path()) {
            Some(token) => token.to_string(),
            None => return ChallengeOutcome::Forward(request),
        };

        match self.lookup(&token).await {
            Some(content) => {
                debug!(token = %token, "Serving ACME challenge response");
                self.record("served");
                ChallengeOutcome::Respond(challenge_response(content))
            }
            None => ChallengeOutcome::Forward(request),
        }
    }

    /// Key authorization for `token`, if a record publishes it
    async fn lookup(&self, token: &str) -> Option<String> {
        let records = match self
            .store
            .search(&RecordFilter::ChallengeToken(token.to_string()))
            .await
        {
            Ok(records) => records,
            Err(e) => {
                warn!(token = %token, error = %e, "Challenge lookup failed");
                self.record("error");
                return None;
            }
        };

        let content = records
            .into_iter()
            .find_map(|record| record.challenge_content.filter(|c| !c.is_empty()));

        if content.is_none() {
            trace!(token = %token, "ACME challenge token not found");
            self.record("unknown");
        }
        content
    }

    fn record(&self, outcome: &str) {
        if let Some(ref metrics) = self.metrics {
            metrics.record_challenge_request(outcome);
        }
    }
}

impl std::fmt::Debug for ChallengeResponder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChallengeResponder")
            .field("has_metrics", &self.metrics.is_some())
            .finish_non_exhaustive()
    }
}

fn challenge_response(content: String) -> Response<Bytes> {
    let mut response = Response::new(Bytes::from(content));
    *response.status_mut() = StatusCode::OK;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        header::HeaderValue::from_static("text/plain"),
    );
    response
}
