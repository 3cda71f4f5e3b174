//! Attestation report providers.
//!
//! The handshake only needs [`AttestationProvider::fetch_report`]; the
//! report is forwarded to the client untouched.

use async_trait::async_trait;
use lucia_core::messages::{now_millis, AttestationReport, Measurements, TdxReport};
use lucia_core::{LuciaError, LuciaResult};
use rand::RngCore;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// Image hash reported for the development image.
pub const MOCK_IMAGE_HASH: &str = "sha256:mock_image_hash_for_dev_environment";

/// Source of attestation reports.
#[async_trait]
pub trait AttestationProvider: Send + Sync {
    async fn fetch_report(&self) -> LuciaResult<AttestationReport>;
}

/// Which provider the server uses, from the `[attestation]` config section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    Mock,
    Http,
    Unavailable,
}

/// Generates plausible-looking TDX reports in-process.
#[derive(Debug, Clone, Default)]
pub struct MockAttestation {
    verification_url: Option<String>,
}

impl MockAttestation {
    pub fn new(verification_url: Option<String>) -> Self {
        Self { verification_url }
    }

    fn random_digest() -> String {
        // 48 bytes → 96 hex chars, the size of a TDX measurement register.
        let mut bytes = [0u8; 48];
        rand::thread_rng().fill_bytes(&mut bytes);
        hex::encode(bytes)
    }
}

#[async_trait]
impl AttestationProvider for MockAttestation {
    async fn fetch_report(&self) -> LuciaResult<AttestationReport> {
        let now = now_millis();
        Ok(AttestationReport {
            tdx: TdxReport {
                quote: format!("MOCK_TDX_QUOTE_BASE64_GENERATED_{now}"),
                measurements: Measurements {
                    mrtd: Self::random_digest(),
                    rtmr0: Self::random_digest(),
                    rtmr1: Self::random_digest(),
                    rtmr2: Self::random_digest(),
                    rtmr3: Self::random_digest(),
                },
                collateral: None,
            },
            generated_at: now,
            image_hash: MOCK_IMAGE_HASH.to_string(),
            verification_url: self.verification_url.clone(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct AttestResponse {
    report: AttestationReport,
}

/// Fetches reports from an attestation service via `POST {base_url}/attest`.
#[derive(Debug, Clone)]
pub struct HttpAttestation {
    client: reqwest::Client,
    base_url: String,
    verification_url: Option<String>,
}

impl HttpAttestation {
    pub fn new(
        base_url: &str,
        timeout: Duration,
        verification_url: Option<String>,
    ) -> LuciaResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LuciaError::Config(format!("attestation client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            verification_url,
        })
    }
}

#[async_trait]
impl AttestationProvider for HttpAttestation {
    async fn fetch_report(&self) -> LuciaResult<AttestationReport> {
        let url = format!("{}/attest", self.base_url);
        debug!(url = %url, "requesting attestation report");

        let unavailable = |e: reqwest::Error| {
            LuciaError::CollaboratorUnavailable(format!("attestation service: {e}"))
        };
        let resp = self
            .client
            .post(&url)
            .send()
            .await
            .map_err(unavailable)?
            .error_for_status()
            .map_err(unavailable)?;
        let body: AttestResponse = resp.json().await.map_err(unavailable)?;

        let mut report = body.report;
        if report.verification_url.is_none() {
            report.verification_url = self.verification_url.clone();
        }
        Ok(report)
    }
}

/// A provider that never answers successfully.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnavailableAttestation;

#[async_trait]
impl AttestationProvider for UnavailableAttestation {
    async fn fetch_report(&self) -> LuciaResult<AttestationReport> {
        Err(LuciaError::CollaboratorUnavailable(
            "attestation provider disabled".into(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_report_has_all_measurements() {
        let provider = MockAttestation::new(Some("http://localhost:8081/verify".into()));
        let report = provider.fetch_report().await.unwrap();

        for (name, digest) in report.tdx.measurements.fields() {
            assert_eq!(digest.len(), 96, "{name}");
            assert!(digest.chars().all(|c| c.is_ascii_hexdigit()), "{name}");
        }
        assert!(report.tdx.quote.starts_with("MOCK_TDX_QUOTE_BASE64_GENERATED_"));
        assert_eq!(report.image_hash, MOCK_IMAGE_HASH);
        assert_eq!(
            report.verification_url.as_deref(),
            Some("http://localhost:8081/verify")
        );
    }

    #[tokio::test]
    async fn mock_reports_are_not_reused() {
        let provider = MockAttestation::default();
        let a = provider.fetch_report().await.unwrap();
        let b = provider.fetch_report().await.unwrap();
        assert_ne!(a.tdx.measurements.mrtd, b.tdx.measurements.mrtd);
    }

    #[tokio::test]
    async fn unavailable_provider_fails() {
        let err = UnavailableAttestation.fetch_report().await.unwrap_err();
        assert!(matches!(err, LuciaError::CollaboratorUnavailable(_)));
    }

    #[tokio::test]
    async fn unreachable_http_service_is_unavailable() {
        // Port 9 (discard) on loopback is closed in test environments.
        let provider =
            HttpAttestation::new("http://127.0.0.1:9/", Duration::from_millis(500), None).unwrap();
        let err = provider.fetch_report().await.unwrap_err();
        assert!(matches!(err, LuciaError::CollaboratorUnavailable(_)));
    }

    #[test]
    fn attest_response_shape_matches_service() {
        let body = serde_json::json!({
            "report": {
                "tdx": {
                    "quote": "MOCK_TDX_QUOTE_BASE64_GENERATED_1",
                    "measurements": {
                        "mrtd": "a", "rtmr0": "b", "rtmr1": "c", "rtmr2": "d", "rtmr3": "e"
                    }
                },
                "generatedAt": 1,
                "imageHash": MOCK_IMAGE_HASH
            }
        });
        let parsed: AttestResponse = serde_json::from_value(body).unwrap();
        assert_eq!(parsed.report.tdx.measurements.rtmr3, "e");
        assert_eq!(parsed.report.tdx.collateral, None);
    }
}
