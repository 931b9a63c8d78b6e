//! Client for the proxy engine's loopback control API.

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

/// Extra time allowed on top of the engine-side probe timeout, so the
/// HTTP call outlives the probe it triggers
const PROBE_HEADROOM_MS: u64 = 2_000;

/// Proxy-layer failures callers may want to act on
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("no proxy identity has a passing health sample")]
    NoHealthyProxy,

    #[error("proxy ingress {0} is not accepting connections")]
    IngressUnreachable(String),
}

/// One configured egress option as reported by the control API
#[derive(Debug, Clone, Deserialize)]
pub struct ProxyIdentity {
    #[serde(default)]
    pub alive: bool,

    #[serde(default)]
    pub history: Vec<DelaySample>,

    pub name: String,

    #[serde(rename = "type")]
    pub kind: String,

    #[serde(default)]
    pub udp: bool,
}

/// One latency measurement in an identity's probe history
#[derive(Debug, Clone, Deserialize)]
pub struct DelaySample {
    pub time: DateTime<Utc>,

    pub delay: u32,

    #[serde(rename = "meanDelay", default)]
    pub mean_delay: u32,
}

impl ProxyIdentity {
    /// Usable means the most recent probe produced a non-zero delay
    pub fn is_usable(&self) -> bool {
        self.history.last().map(|sample| sample.delay > 0).unwrap_or(false)
    }
}

#[derive(Debug, Deserialize)]
struct ProxyListing {
    proxies: HashMap<String, ProxyIdentity>,
}

/// Talks to the engine's control API: listing identities, triggering
/// health probes and switching the active egress.
#[derive(Debug, Clone)]
pub struct ControlClient {
    base: String,
    probe_url: String,
    probe_timeout_ms: u64,
    http: reqwest::Client,
}

impl ControlClient {
    pub fn new(
        base: impl Into<String>,
        probe_url: impl Into<String>,
        probe_timeout_ms: u64,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("failed to build control API client")?;
        Ok(Self {
            base: base.into().trim_end_matches('/').to_string(),
            probe_url: probe_url.into(),
            probe_timeout_ms,
            http,
        })
    }

    /// All configured identities with their probe histories
    pub async fn identities(&self) -> Result<Vec<ProxyIdentity>> {
        let url = format!("{}/proxies", self.base);
        let listing: ProxyListing = self
            .http
            .get(&url)
            .send()
            .await
            .context("proxy control API unreachable")?
            .error_for_status()
            .context("proxy listing request rejected")?
            .json()
            .await
            .context("malformed proxy listing")?;
        Ok(listing.proxies.into_values().collect())
    }

    /// Probe every identity concurrently and wait for all probes to
    /// settle. The engine records delay samples as a side effect; an
    /// individual probe failure just leaves that identity unsampled.
    pub async fn probe_all(&self) -> Result<()> {
        let identities = self.identities().await?;
        info!("probing {} proxy identities", identities.len());

        let timeout = Duration::from_millis(self.probe_timeout_ms + PROBE_HEADROOM_MS);
        let mut probes = Vec::with_capacity(identities.len());
        for identity in &identities {
            let url = self.probe_url_for(&identity.name)?;
            let http = self.http.clone();
            probes.push(tokio::spawn(async move {
                if let Err(err) = http.get(&url).timeout(timeout).send().await {
                    debug!("health probe failed: {}", err);
                }
            }));
        }
        futures::future::join_all(probes).await;
        Ok(())
    }

    /// Identities whose latest sample passed
    pub async fn healthy(&self) -> Result<Vec<ProxyIdentity>> {
        Ok(self
            .identities()
            .await?
            .into_iter()
            .filter(|identity| identity.is_usable())
            .collect())
    }

    /// Pick a healthy identity uniformly at random, make it the active
    /// egress and return its name. Errors with [`ProxyError::NoHealthyProxy`]
    /// when nothing passed its probe; an unhealthy egress is never used.
    pub async fn select_random(&self) -> Result<String> {
        let healthy = self.healthy().await?;
        let chosen = healthy
            .choose(&mut rand::thread_rng())
            .ok_or(ProxyError::NoHealthyProxy)?;
        self.switch_to(&chosen.name).await?;
        info!("switched egress to proxy '{}'", chosen.name);
        Ok(chosen.name.clone())
    }

    /// Point the engine's global selector at the named identity
    pub async fn switch_to(&self, name: &str) -> Result<()> {
        let url = format!("{}/proxies/GLOBAL", self.base);
        self.http
            .put(&url)
            .json(&serde_json::json!({ "name": name }))
            .send()
            .await
            .with_context(|| format!("egress switch to '{}' failed", name))?
            .error_for_status()
            .context("control API refused the egress switch")?;
        Ok(())
    }

    fn probe_url_for(&self, name: &str) -> Result<String> {
        let mut url = Url::parse(&format!("{}/proxies", self.base))
            .context("invalid control API base URL")?;
        url.path_segments_mut()
            .map_err(|_| anyhow!("control API base URL cannot carry paths"))?
            .push(name)
            .push("delay");
        url.query_pairs_mut()
            .append_pair("timeout", &self.probe_timeout_ms.to_string())
            .append_pair("url", &self.probe_url);
        Ok(url.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn listing_body() -> serde_json::Value {
        json!({
            "proxies": {
                "alpha": {
                    "alive": true,
                    "history": [
                        {"time": "2024-01-10T09:00:00Z", "delay": 0, "meanDelay": 0},
                        {"time": "2024-01-10T09:05:00Z", "delay": 142, "meanDelay": 151}
                    ],
                    "name": "alpha",
                    "type": "Shadowsocks",
                    "udp": true
                },
                "beta": {
                    "alive": false,
                    "history": [
                        {"time": "2024-01-10T09:05:00Z", "delay": 0, "meanDelay": 0}
                    ],
                    "name": "beta",
                    "type": "Vmess",
                    "udp": false
                },
                "gamma": {
                    "alive": false,
                    "history": [],
                    "name": "gamma",
                    "type": "Trojan",
                    "udp": false
                }
            }
        })
    }

    async fn control_for(server: &MockServer) -> ControlClient {
        ControlClient::new(server.uri(), "https://probe.example", 5000).unwrap()
    }

    #[tokio::test]
    async fn selection_never_picks_an_unprobed_identity() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/proxies"))
            .respond_with(ResponseTemplate::new(200).set_body_json(listing_body()))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/proxies/GLOBAL"))
            .and(body_json(json!({"name": "alpha"})))
            .respond_with(ResponseTemplate::new(204))
            .expect(20)
            .mount(&server)
            .await;

        let control = control_for(&server).await;
        for _ in 0..20 {
            let name = control.select_random().await.unwrap();
            assert_eq!(name, "alpha");
        }
    }

    #[tokio::test]
    async fn selection_fails_without_healthy_identities() {
        let server = MockServer::start().await;
        let mut listing = listing_body();
        listing["proxies"]
            .as_object_mut()
            .unwrap()
            .remove("alpha");
        Mock::given(method("GET"))
            .and(path("/proxies"))
            .respond_with(ResponseTemplate::new(200).set_body_json(listing))
            .mount(&server)
            .await;

        let control = control_for(&server).await;
        let err = control.select_random().await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ProxyError>(),
            Some(ProxyError::NoHealthyProxy)
        ));
    }

    #[tokio::test]
    async fn probe_all_hits_every_identity_and_tolerates_failures() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/proxies"))
            .respond_with(ResponseTemplate::new(200).set_body_json(listing_body()))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/proxies/alpha/delay"))
            .and(query_param("timeout", "5000"))
            .and(query_param("url", "https://probe.example"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"delay": 142})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/proxies/beta/delay"))
            .respond_with(ResponseTemplate::new(504))
            .expect(1)
            .mount(&server)
            .await;
        // gamma gets no mock at all; the 404 is swallowed like any
        // other probe failure

        let control = control_for(&server).await;
        control.probe_all().await.unwrap();
    }

    #[tokio::test]
    async fn usability_requires_a_passing_last_sample() {
        let listing: ProxyListing = serde_json::from_value(listing_body()).unwrap();
        let usable: Vec<bool> = ["alpha", "beta", "gamma"]
            .iter()
            .map(|name| listing.proxies[*name].is_usable())
            .collect();
        assert_eq!(usable, vec![true, false, false]);
    }
}
