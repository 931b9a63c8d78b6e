use anyhow::{bail, Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use crate::cli::config::{ScraperConfig, StorageSettings};
use crate::proxy::control::ControlClient;
use crate::proxy::engine::ProxyEngine;
use crate::scrape::registry::TaskRegistry;
use crate::scrape::runner::TaskRunner;
use crate::scrape::site::{self, Site};
use crate::scrape::task::{Task, TaskStatus, TaskType};
use crate::storage::configs::ConfigStore;
use crate::storage::sink::{dispatch, ResultSink, SinkFactory};

/// Execute a single scraping task end to end
pub async fn run(mut task: Task) -> Result<()> {
    validate(&task)?;

    let config = ScraperConfig::load_default()?;
    let timeout = Duration::from_secs(config.http.request_timeout_secs);
    let site = Site::for_country(&task.country);
    let registry = TaskRegistry::new();

    // Appearance checks hit the storefront directly; everything else is
    // routed through the proxy ingress after an egress has been chosen.
    let mut engine = ProxyEngine::new(config.proxy.clone());
    let client = if task.task_type == TaskType::KeywordAppear {
        reqwest::Client::builder()
            .cookie_store(true)
            .timeout(timeout)
            .user_agent(site::USER_AGENT)
            .build()
            .context("Failed to build HTTP client")?
    } else {
        engine.launch().await?;
        let control = ControlClient::new(
            &config.proxy.control_url,
            &config.proxy.probe_url,
            config.proxy.probe_timeout_ms,
        )?;
        let selected = engine.ensure_egress(&control).await?;
        info!("Routing task {} through proxy '{}'", task.task_id, selected);
        engine.proxied_client(timeout).await?
    };

    let runner = TaskRunner::new(site, client, registry.clone())?;
    runner.run(&mut task).await;

    // Search results go downstream; a sink failure is logged and never
    // folded into the task outcome.
    if task.task_type == TaskType::SearchProducts {
        match connect_sink(&config.storage).await {
            Ok(sink) => dispatch(sink.as_ref(), &task).await,
            Err(err) => error!("Failed to connect the result sink: {:#}", err),
        }
        task.status = TaskStatus::Done;
    }

    engine.shutdown().await?;

    let (in_flight, handled, rejected) = registry.counts().await;
    info!(
        "Registry after task {}: {} in flight, {} handled, {} rejected",
        task.task_id, in_flight, handled, rejected
    );
    println!("Task result: {}", task.status);

    Ok(())
}

async fn connect_sink(storage: &StorageSettings) -> Result<Arc<dyn ResultSink>> {
    let configs = ConfigStore::connect(&storage.postgres_url).await?;
    SinkFactory::create(storage, &configs).await
}

/// Ensure the task carries the fields its type needs
fn validate(task: &Task) -> Result<()> {
    if task.task_id.is_empty() {
        bail!("a task id is required (--id)");
    }
    match task.task_type {
        TaskType::SearchProducts if task.keyword.is_empty() => {
            bail!("search_products tasks require a keyword (--keyword)")
        }
        TaskType::AsinPage if task.asin.is_empty() => {
            bail!("asin_page tasks require an ASIN (--asin)")
        }
        TaskType::KeywordAppear if task.keyword.is_empty() || task.asin.is_empty() => {
            bail!("keyword_appear tasks require a keyword (--keyword) and an ASIN (--asin)")
        }
        _ => Ok(()),
    }
}

/// Probe every proxy identity and print the sampled delays
pub async fn probe() -> Result<()> {
    let config = ScraperConfig::load_default()?;
    let control = ControlClient::new(
        &config.proxy.control_url,
        &config.proxy.probe_url,
        config.proxy.probe_timeout_ms,
    )?;

    control.probe_all().await?;
    let mut identities = control.identities().await?;
    identities.sort_by(|a, b| a.name.cmp(&b.name));

    println!("{} proxies configured:", identities.len());
    for identity in &identities {
        let delay = identity
            .history
            .last()
            .map(|sample| sample.delay)
            .unwrap_or(0);
        let state = if identity.is_usable() { "ok" } else { "unusable" };
        println!("  {:<40} {:>6} ms  {}", identity.name, delay, state);
    }

    Ok(())
}

/// Pull the subscription from the configuration store and rewrite the
/// proxy engine configuration through the converter
pub async fn refresh_config() -> Result<()> {
    let config = ScraperConfig::load_default()?;
    let configs = ConfigStore::connect(&config.storage.postgres_url).await?;
    let subscription = configs.proxy_subscription().await?;

    let engine = ProxyEngine::new(config.proxy.clone());
    engine.refresh_engine_config(&subscription).await?;

    println!(
        "Proxy engine configuration written to {}",
        config.proxy.engine_config
    );

    Ok(())
}

/// Show the current configuration
pub async fn show_config() -> Result<()> {
    let config = ScraperConfig::load_default()?;
    println!("Current configuration:");
    println!("{:#?}", config);

    Ok(())
}
