//! Cross-origin redirect repair
//!
//! Infrastructure rewriting can land the browser on the return page served
//! from a foreign origin (the gateway's configured return URL points at the
//! backend rather than the application). Recovery:
//!
//! - any return signal present on the foreign origin (gateway fields,
//!   `error`, `backendProcessed`, `noParams`): rebuild the same return URL on
//!   the canonical origin, keep the query string byte-for-byte
//! - no params: wait for the interstitial to render, look for the backend's
//!   `redirect:<url>` marker, rewrite stale application hosts, navigate
//!
//! Only a fallback. On the canonical origin it never runs.

use std::borrow::Cow;
use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use quick_xml::escape::unescape;
use regex::Regex;
use tracing::{debug, info, warn};
use url::Url;

use super::error::ApiError;
use super::return_params::url_has_return_params;

static REDIRECT_MARKER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"redirect:\s*([^\s"'<>]+)"#).expect("redirect marker pattern is valid")
});

/// Rendered body of the page currently displayed
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn body(&self) -> Result<String, ApiError>;
}

/// What to do with the current location
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepairPlan {
    /// Canonical (or unknown) origin: parse parameters normally
    NotApplicable,
    /// Foreign origin with a return signal: go to this URL
    Navigate(Url),
    /// Foreign origin without parameters: inspect the body
    InspectBody,
}

/// Origin mapping injected from configuration
#[derive(Debug, Clone)]
pub struct RedirectRepair {
    canonical_origin: Url,
    return_path: String,
    foreign_origins: Vec<String>,
    stale_origins: Vec<String>,
    inspect_delay: Duration,
}

impl RedirectRepair {
    pub fn new(canonical_origin: Url, return_path: impl Into<String>) -> Self {
        Self {
            canonical_origin,
            return_path: return_path.into(),
            foreign_origins: Vec::new(),
            stale_origins: Vec::new(),
            inspect_delay: Duration::from_millis(1500),
        }
    }

    /// Origins that may serve the return page instead of the application
    pub fn with_foreign_origins<I, S>(mut self, origins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.foreign_origins = origins.into_iter().filter_map(|o| normalize(o.as_ref())).collect();
        self
    }

    /// Outdated application origins that may appear inside redirect markers
    pub fn with_stale_origins<I, S>(mut self, origins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.stale_origins = origins.into_iter().filter_map(|o| normalize(o.as_ref())).collect();
        self
    }

    pub fn with_inspect_delay(mut self, delay: Duration) -> Self {
        self.inspect_delay = delay;
        self
    }

    pub fn canonical_origin(&self) -> &Url {
        &self.canonical_origin
    }

    pub fn is_foreign(&self, current: &Url) -> bool {
        let origin = current.origin().ascii_serialization();
        self.foreign_origins.iter().any(|o| *o == origin)
    }

    pub fn plan(&self, current: &Url) -> RepairPlan {
        if !self.is_foreign(current) {
            return RepairPlan::NotApplicable;
        }
        // Any recognized signal is handled by parameter parsing on the canonical page
        if url_has_return_params(current) {
            let target = self.canonical_return_url(current.query());
            info!(from = %current, to = %target, "Repairing cross-origin return");
            RepairPlan::Navigate(target)
        } else {
            debug!(target: "SETTLE", url = %current, "Foreign origin without params, inspecting body");
            RepairPlan::InspectBody
        }
    }

    /// Canonical return page with the given query string
    pub fn canonical_return_url(&self, query: Option<&str>) -> Url {
        let mut target = self.canonical_origin.clone();
        target.set_path(&self.return_path);
        target.set_query(query);
        target.set_fragment(None);
        target
    }

    /// Find the `redirect:<url>` marker and point it at the canonical origin
    pub fn extract_redirect(&self, body: &str) -> Option<Url> {
        let captured = REDIRECT_MARKER.captures(body)?.get(1)?.as_str();
        // The marker sits in HTML, so `&` between query params arrives as `&amp;`
        let raw = match unescape(captured) {
            Ok(decoded) => decoded,
            Err(e) => {
                debug!(target: "SETTLE", marker = %captured, error = %e, "Marker not entity-decoded");
                Cow::Borrowed(captured)
            }
        };
        let raw = raw.as_ref();
        let embedded = match Url::parse(raw) {
            Ok(url) => url,
            // Relative marker: resolve against the canonical origin
            Err(url::ParseError::RelativeUrlWithoutBase) => self.canonical_origin.join(raw).ok()?,
            Err(e) => {
                warn!(marker = %raw, error = %e, "Unparseable redirect marker");
                return None;
            }
        };

        let origin = embedded.origin().ascii_serialization();
        if self.stale_origins.iter().any(|o| *o == origin) {
            let mut rebuilt = self.canonical_origin.clone();
            rebuilt.set_path(embedded.path());
            rebuilt.set_query(embedded.query());
            rebuilt.set_fragment(embedded.fragment());
            debug!(target: "SETTLE", from = %embedded, to = %rebuilt, "Rewrote stale host");
            return Some(rebuilt);
        }
        Some(embedded)
    }

    /// Wait for the interstitial to render, then look for the marker.
    pub async fn inspect(&self, page: &dyn PageSource) -> Option<Url> {
        if !self.inspect_delay.is_zero() {
            tokio::time::sleep(self.inspect_delay).await;
        }
        match page.body().await {
            Ok(body) => {
                let found = self.extract_redirect(&body);
                if found.is_none() {
                    warn!("No redirect marker on foreign-origin return page");
                }
                found
            }
            Err(e) => {
                warn!(error = %e, "Could not read foreign-origin return page");
                None
            }
        }
    }
}

fn normalize(origin: &str) -> Option<String> {
    match Url::parse(origin.trim()) {
        Ok(url) => Some(url.origin().ascii_serialization()),
        Err(e) => {
            warn!(origin = %origin, error = %e, "Ignoring invalid origin");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settlement::return_params::{BackendOutcome, ReturnSignal};

    struct StaticPage(Result<String, ApiError>);

    #[async_trait]
    impl PageSource for StaticPage {
        async fn body(&self) -> Result<String, ApiError> {
            self.0.clone()
        }
    }

    fn repair() -> RedirectRepair {
        RedirectRepair::new(Url::parse("https://app.example.com").unwrap(), "/payment/return")
            .with_foreign_origins(["https://api.example.com"])
            .with_stale_origins(["http://localhost:3000", "https://old-app.example.com/"])
            .with_inspect_delay(Duration::ZERO)
    }

    #[test]
    fn test_canonical_origin_is_left_alone() {
        let url = Url::parse("https://app.example.com/payment/return?responseCode=00").unwrap();
        assert_eq!(repair().plan(&url), RepairPlan::NotApplicable);
    }

    #[test]
    fn test_foreign_origin_with_params_keeps_query() {
        let query = "responseCode=00&transactionId=14012345&amount=10000000&txnRef=TX%2D1";
        let url = Url::parse(&format!(
            "https://api.example.com/api/payments/gateway-return?{query}"
        ))
        .unwrap();

        let RepairPlan::Navigate(target) = repair().plan(&url) else {
            panic!("expected navigation");
        };
        assert_eq!(
            target.as_str(),
            format!("https://app.example.com/payment/return?{query}")
        );
        assert_eq!(target.query(), url.query());
    }

    #[test]
    fn test_foreign_origin_without_params_inspects() {
        let url = Url::parse("https://api.example.com/api/payments/gateway-return").unwrap();
        assert_eq!(repair().plan(&url), RepairPlan::InspectBody);
    }

    #[test]
    fn test_extract_marker_rewrites_stale_host() {
        let body = r#"<html><body><pre>redirect:http://localhost:3000/payment/return?backendProcessed=true&success=true</pre></body></html>"#;
        let target = repair().extract_redirect(body).unwrap();
        assert_eq!(
            target.as_str(),
            "https://app.example.com/payment/return?backendProcessed=true&success=true"
        );
    }

    #[test]
    fn test_extract_html_escaped_marker() {
        let body = "<p>redirect:http://localhost:3000/payment/return?backendProcessed=true&amp;success=true&amp;amount=120000</p>";
        let target = repair().extract_redirect(body).unwrap();
        assert_eq!(
            target.as_str(),
            "https://app.example.com/payment/return?backendProcessed=true&success=true&amount=120000"
        );
        assert_eq!(
            ReturnSignal::from_url(&target),
            ReturnSignal::BackendProcessed(BackendOutcome {
                success: true,
                amount: Some(rust_decimal::Decimal::from(120000)),
                ..Default::default()
            })
        );
    }

    #[test]
    fn test_foreign_origin_defers_to_every_signal_kind() {
        for query in [
            "responseCode=24&amount=500000",
            "error=Invalid%20signature",
            "backendProcessed=true&success=true",
            "noParams=true&message=Nothing%20to%20show",
        ] {
            let url = Url::parse(&format!("https://api.example.com/api/payments/return?{query}"))
                .unwrap();
            let RepairPlan::Navigate(target) = repair().plan(&url) else {
                panic!("{query} must navigate, not inspect");
            };
            assert_eq!(target.query(), Some(query));
            assert_eq!(ReturnSignal::from_url(&target), ReturnSignal::from_url(&url));
        }
    }

    #[test]
    fn test_extract_marker_keeps_unknown_host() {
        let body = "redirect: https://partner.example.org/done";
        let target = repair().extract_redirect(body).unwrap();
        assert_eq!(target.as_str(), "https://partner.example.org/done");
    }

    #[test]
    fn test_extract_relative_marker() {
        let target = repair()
            .extract_redirect("redirect:/payment/return?noParams=true")
            .unwrap();
        assert_eq!(
            target.as_str(),
            "https://app.example.com/payment/return?noParams=true"
        );
    }

    #[test]
    fn test_no_marker() {
        assert!(repair().extract_redirect("<html>Processing...</html>").is_none());
    }

    #[tokio::test]
    async fn test_inspect_reads_page() {
        let page = StaticPage(Ok(
            "redirect:https://old-app.example.com/payment/return?noParams=true".into(),
        ));
        let target = repair().inspect(&page).await.unwrap();
        assert_eq!(target.host_str(), Some("app.example.com"));

        let broken = StaticPage(Err(ApiError::Transport("reset".into())));
        assert!(repair().inspect(&broken).await.is_none());
    }
}
