//! Prometheus metrics for certificate issuance and challenge serving.

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};

/// Issuance duration buckets in seconds; an attempt includes the settle delay
const ISSUANCE_DURATION_BUCKETS: &[f64] = &[10.0, 30.0, 60.0, 90.0, 120.0, 180.0, 300.0, 600.0];

/// Coordinator metrics, registered in their own [`Registry`]
#[derive(Clone)]
pub struct CertdMetrics {
    registry: Registry,
    /// Issuance attempts started, by mode
    issuance_attempts: IntCounterVec,
    /// Issuance attempts that produced a certificate, by mode
    issuance_success: IntCounterVec,
    /// Issuance attempts that failed, by mode
    issuance_failures: IntCounterVec,
    /// Fresh issuances that used up every retry
    retries_exhausted: IntCounter,
    /// Challenge requests, by outcome (`served`, `unknown`, `error`)
    challenge_requests: IntCounterVec,
    /// Duration of successful attempts, by mode
    issuance_duration: HistogramVec,
}

impl CertdMetrics {
    /// Create the metrics on a fresh registry
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let issuance_attempts = IntCounterVec::new(
            Opts::new(
                "certd_issuance_attempts_total",
                "Certificate issuance attempts started",
            ),
            &["mode"],
        )?;
        registry.register(Box::new(issuance_attempts.clone()))?;

        let issuance_success = IntCounterVec::new(
            Opts::new(
                "certd_issuance_success_total",
                "Certificate issuance attempts that succeeded",
            ),
            &["mode"],
        )?;
        registry.register(Box::new(issuance_success.clone()))?;

        let issuance_failures = IntCounterVec::new(
            Opts::new(
                "certd_issuance_failures_total",
                "Certificate issuance attempts that failed",
            ),
            &["mode"],
        )?;
        registry.register(Box::new(issuance_failures.clone()))?;

        let retries_exhausted = IntCounter::new(
            "certd_retries_exhausted_total",
            "Issuances abandoned after exhausting every retry",
        )?;
        registry.register(Box::new(retries_exhausted.clone()))?;

        let challenge_requests = IntCounterVec::new(
            Opts::new(
                "certd_challenge_requests_total",
                "HTTP-01 challenge requests by outcome",
            ),
            &["outcome"],
        )?;
        registry.register(Box::new(challenge_requests.clone()))?;

        let issuance_duration = HistogramVec::new(
            HistogramOpts::new(
                "certd_issuance_duration_seconds",
                "Duration of successful issuance attempts",
            )
            .buckets(ISSUANCE_DURATION_BUCKETS.to_vec()),
            &["mode"],
        )?;
        registry.register(Box::new(issuance_duration.clone()))?;

        Ok(Self {
            registry,
            issuance_attempts,
            issuance_success,
            issuance_failures,
            retries_exhausted,
            challenge_requests,
            issuance_duration,
        })
    }

    /// Count an issuance attempt starting in `mode`
    pub fn record_attempt(&self, mode: &str) {
        self.issuance_attempts.with_label_values(&[mode]).inc();
    }

    /// Count a successful attempt and observe its duration
    pub fn record_success(&self, mode: &str, duration_secs: f64) {
        self.issuance_success.with_label_values(&[mode]).inc();
        self.issuance_duration
            .with_label_values(&[mode])
            .observe(duration_secs);
    }

    /// Count a failed attempt
    pub fn record_failure(&self, mode: &str) {
        self.issuance_failures.with_label_values(&[mode]).inc();
    }

    /// Count a new-domain issuance that ran out of retries
    pub fn record_retries_exhausted(&self) {
        self.retries_exhausted.inc();
    }

    /// Count one challenge request by `outcome`
    pub fn record_challenge_request(&self, outcome: &str) {
        self.challenge_requests.with_label_values(&[outcome]).inc();
    }

    /// Registry holding every certd metric
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Encode every metric in the Prometheus text format
    pub fn gather_text(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

impl std::fmt::Debug for CertdMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertdMetrics").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_render() {
        let metrics = CertdMetrics::new().unwrap();
        metrics.record_attempt("fresh");
        metrics.record_attempt("fresh");
        metrics.record_success("fresh", 75.0);
        metrics.record_failure("renewal");
        metrics.record_retries_exhausted();
        metrics.record_challenge_request("served");

        let text = metrics.gather_text().unwrap();
        assert!(text.contains("certd_issuance_attempts_total{mode=\"fresh\"} 2"));
        assert!(text.contains("certd_issuance_success_total{mode=\"fresh\"} 1"));
        assert!(text.contains("certd_issuance_failures_total{mode=\"renewal\"} 1"));
        assert!(text.contains("certd_retries_exhausted_total 1"));
        assert!(text.contains("certd_challenge_requests_total{outcome=\"served\"} 1"));
        assert!(text.contains("certd_issuance_duration_seconds_count{mode=\"fresh\"} 1"));
    }

    #[test]
    fn test_instances_are_independent() {
        let a = CertdMetrics::new().unwrap();
        let b = CertdMetrics::new().unwrap();
        a.record_retries_exhausted();
        assert!(b.gather_text().unwrap().contains("certd_retries_exhausted_total 0"));
    }
}
