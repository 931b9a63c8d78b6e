//! Lifecycle and egress plumbing for the external proxy engine.
//!
//! The engine is an opaque process; this side only launches it, checks
//! its local ingress and rebuilds its configuration file.

use anyhow::{Context, Result, anyhow};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tracing::{debug, info};
use url::Url;

use crate::cli::config::ProxySettings;
use crate::proxy::control::{ControlClient, ProxyError};
use crate::scrape::site;

/// Handle on the external proxy engine process and its local ports
pub struct ProxyEngine {
    settings: ProxySettings,
    child: Option<Child>,
}

impl ProxyEngine {
    pub fn new(settings: ProxySettings) -> Self {
        Self { settings, child: None }
    }

    /// Start the engine binary when one is configured, then wait the
    /// settle period before anything talks to its ports.
    pub async fn launch(&mut self) -> Result<()> {
        let Some(bin) = self.settings.engine_bin.clone() else {
            debug!("No engine binary configured; expecting an externally managed engine");
            return Ok(());
        };

        let control_addr = authority(&self.settings.control_url)?;
        let child = Command::new(&bin)
            .arg("-f")
            .arg(&self.settings.engine_config)
            .arg("-ext-ctl")
            .arg(&control_addr)
            .kill_on_drop(true)
            .spawn()
            .context(format!("Failed to start proxy engine: {}", bin))?;
        info!("Proxy engine started (pid {:?})", child.id());
        self.child = Some(child);

        tokio::time::sleep(Duration::from_secs(self.settings.settle_secs)).await;
        Ok(())
    }

    /// Probe every identity, then switch to a random healthy one.
    /// Returns the selected identity's name.
    pub async fn ensure_egress(&self, control: &ControlClient) -> Result<String> {
        control.probe_all().await?;
        control.select_random().await
    }

    /// HTTP client routed through the local ingress.
    ///
    /// The ingress port is connect-checked first, so a dead engine
    /// fails closed here instead of timing out on every fetch.
    pub async fn proxied_client(&self, request_timeout: Duration) -> Result<reqwest::Client> {
        let addr = authority(&self.settings.ingress_url)?;
        let check = tokio::time::timeout(
            Duration::from_secs(self.settings.connect_check_secs),
            TcpStream::connect(&addr),
        )
        .await;
        match check {
            Ok(Ok(_)) => debug!("Proxy ingress {} is reachable", addr),
            _ => return Err(ProxyError::IngressUnreachable(addr).into()),
        }

        reqwest::Client::builder()
            .proxy(
                reqwest::Proxy::all(&self.settings.ingress_url)
                    .context("invalid proxy ingress URL")?,
            )
            .cookie_store(true)
            .timeout(request_timeout)
            .user_agent(site::USER_AGENT)
            .build()
            .context("Failed to build proxied HTTP client")
    }

    /// Rebuild the engine's configuration file by running the stored
    /// subscription through the converter service.
    pub async fn refresh_engine_config(&self, subscription: &str) -> Result<()> {
        let encoded: String =
            url::form_urlencoded::byte_serialize(subscription.as_bytes()).collect();
        let convert_url = format!(
            "{}/sub?target=clash&url={}",
            self.settings.converter_url.trim_end_matches('/'),
            encoded
        );

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to build converter client")?;
        let response = client
            .get(&convert_url)
            .send()
            .await
            .context("subscription converter unreachable")?;
        if !response.status().is_success() {
            anyhow::bail!("subscription converter returned status {}", response.status());
        }

        let body = response
            .bytes()
            .await
            .context("Failed to read converted configuration")?;
        tokio::fs::write(&self.settings.engine_config, &body)
            .await
            .context(format!(
                "Failed to write engine configuration: {}",
                self.settings.engine_config
            ))?;

        info!("Engine configuration refreshed at {}", self.settings.engine_config);
        Ok(())
    }

    /// Stop a launched engine; no-op when externally managed
    pub async fn shutdown(&mut self) -> Result<()> {
        if let Some(mut child) = self.child.take() {
            child.kill().await.context("Failed to stop proxy engine")?;
            info!("Proxy engine stopped");
        }
        Ok(())
    }
}

/// host:port part of a local service URL
fn authority(url: &str) -> Result<String> {
    let parsed = Url::parse(url).context(format!("invalid URL: {}", url))?;
    let host = parsed
        .host_str()
        .ok_or_else(|| anyhow!("URL has no host: {}", url))?;
    let port = parsed
        .port_or_known_default()
        .ok_or_else(|| anyhow!("URL has no port: {}", url))?;
    Ok(format!("{}:{}", host, port))
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn settings() -> ProxySettings {
        crate::cli::config::ScraperConfig::default().proxy
    }

    #[test]
    fn authority_extracts_host_and_port() {
        assert_eq!(authority("http://127.0.0.1:7890").unwrap(), "127.0.0.1:7890");
        assert_eq!(authority("https://example.com").unwrap(), "example.com:443");
        assert!(authority("not a url").is_err());
    }

    #[tokio::test]
    async fn proxied_client_fails_closed_when_ingress_is_down() {
        let mut settings = settings();
        settings.ingress_url = "http://127.0.0.1:1".to_string();
        settings.connect_check_secs = 1;

        let engine = ProxyEngine::new(settings);
        let err = engine
            .proxied_client(Duration::from_secs(30))
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ProxyError>(),
            Some(ProxyError::IngressUnreachable(_))
        ));
    }

    #[tokio::test]
    async fn proxied_client_builds_when_ingress_accepts() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let mut settings = settings();
        settings.ingress_url = format!("http://127.0.0.1:{}", port);

        let engine = ProxyEngine::new(settings);
        engine.proxied_client(Duration::from_secs(30)).await.unwrap();
        drop(listener);
    }

    #[tokio::test]
    async fn refresh_writes_the_converted_configuration() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/sub"))
            .and(query_param("target", "clash"))
            .and(query_param("url", "https://sub.example/token123"))
            .respond_with(ResponseTemplate::new(200).set_body_string("proxies: []\n"))
            .expect(1)
            .mount(&server)
            .await;

        let config_path = std::env::temp_dir().join(format!(
            "engine-config-refresh-{}.yaml",
            std::process::id()
        ));
        let mut settings = settings();
        settings.converter_url = server.uri();
        settings.engine_config = config_path.to_string_lossy().to_string();

        let engine = ProxyEngine::new(settings);
        engine
            .refresh_engine_config("https://sub.example/token123")
            .await
            .unwrap();

        let written = tokio::fs::read_to_string(&config_path).await.unwrap();
        assert_eq!(written, "proxies: []\n");
        tokio::fs::remove_file(&config_path).await.unwrap();
    }

    #[tokio::test]
    async fn refresh_rejects_converter_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/sub"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let mut settings = settings();
        settings.converter_url = server.uri();

        let engine = ProxyEngine::new(settings);
        let err = engine
            .refresh_engine_config("https://sub.example/token123")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("500"));
    }
}
