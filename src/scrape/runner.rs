//! Executes tasks: the paginated search crawl, detail-page fetch and
//! keyword-appearance check.

use anyhow::{Context, Result, bail};
use reqwest::StatusCode;
use tracing::{error, info, warn};

use crate::scrape::extract::{Extractor, NextPage};
use crate::scrape::registry::{RejectedRequest, TaskRegistry};
use crate::scrape::site::Site;
use crate::scrape::task::{Appearance, Task, TaskStatus, TaskType};

/// Runs tasks against one storefront with one HTTP client.
///
/// The client is injected by the caller, which decides whether traffic
/// goes through the proxy ingress; the runner itself never touches
/// proxy state. Status and results are written into the task in place.
pub struct TaskRunner {
    site: Site,
    client: reqwest::Client,
    registry: TaskRegistry,
    extractor: Extractor,
}

impl TaskRunner {
    pub fn new(site: Site, client: reqwest::Client, registry: TaskRegistry) -> Result<Self> {
        Ok(Self {
            site,
            client,
            registry,
            extractor: Extractor::new()?,
        })
    }

    /// Execute the task according to its type
    pub async fn run(&self, task: &mut Task) {
        match task.task_type {
            TaskType::SearchProducts => self.search_products(task).await,
            TaskType::AsinPage => self.asin_page(task).await,
            TaskType::KeywordAppear => self.keyword_appear(task).await,
        }
    }

    /// Page-by-page keyword crawl, accumulating products until the page
    /// bound, the last page or a stop condition ends the loop.
    pub async fn search_products(&self, task: &mut Task) {
        let max_page = if task.max_page <= 0 { 1 } else { task.max_page };
        let min_page = if task.min_page <= 0 { 1 } else { task.min_page };
        let key = task.registry_key();
        self.registry.mark_started(&key).await;

        self.submit_zip_code(task).await;

        let mut current_page = min_page;
        let mut page_count = 0;
        let mut url = self.site.search_url(&task.keyword, &task.category, current_page);

        while current_page <= max_page && page_count < max_page {
            info!(
                "Searching keyword '{}' page {}: {}",
                task.keyword, current_page, url
            );

            let response = match self.client.get(&url).send().await {
                Ok(response) => response,
                Err(err) => {
                    error!("keyword '{}' page {}: {}", task.keyword, current_page, err);
                    break;
                }
            };

            let status = response.status();
            if status == StatusCode::SERVICE_UNAVAILABLE {
                self.registry
                    .mark_rejected(RejectedRequest::new(&url, status.as_u16()))
                    .await;
                error!("upstream rejected page {} with status {}", current_page, status);
                break;
            }
            if status != StatusCode::OK {
                error!("unexpected status {} fetching page {}", status, current_page);
                break;
            }

            let body = match response.text().await {
                Ok(body) => body,
                Err(err) => {
                    error!("failed reading page {} body: {}", current_page, err);
                    break;
                }
            };

            let extract =
                self.extractor
                    .search_page(&body, current_page, &task.country, &self.site);
            info!(
                "====== keyword '{}' page {} done, {} products ======",
                task.keyword,
                current_page,
                extract.products.len()
            );

            if task.total_products.is_none() {
                if let Some(count) = extract.total_result_count {
                    task.total_products = Some(serde_json::Value::String(count));
                }
            }
            task.result.extend(extract.products);
            self.registry
                .mark_handled(format!("{}_{}", task.keyword, current_page))
                .await;

            current_page += 1;
            page_count += 1;
            if current_page > max_page {
                break;
            }

            url = match extract.next {
                NextPage::End => break,
                NextPage::Link(href) => self.site.absolutize(&href),
                NextPage::Unlinked => {
                    self.site.search_url(&task.keyword, &task.category, current_page)
                }
            };
        }

        task.status = if task.result.is_empty() {
            TaskStatus::Error
        } else {
            TaskStatus::Success
        };
        info!(
            "====== task keyword '{}' complete, max_page {}, total {} products, status {} ======",
            task.keyword,
            max_page,
            task.result.len(),
            task.status
        );
        self.registry.finish(&key).await;
    }

    /// Single fetch of a product detail page
    pub async fn asin_page(&self, task: &mut Task) {
        let key = task.registry_key();
        self.registry.mark_started(&key).await;
        info!("Fetching detail page for ASIN {}", task.asin);

        self.submit_zip_code(task).await;

        let url = self.site.detail_url(&task.asin);
        task.status = self.fetch_detail(&url, &task.asin).await;

        self.registry
            .mark_handled(format!("asin_page_{}", task.asin))
            .await;
        self.registry.finish(&key).await;
        info!(
            "====== ASIN task {} complete, status {} ======",
            task.asin, task.status
        );
    }

    async fn fetch_detail(&self, url: &str, asin: &str) -> TaskStatus {
        let response = match self.client.get(url).send().await {
            Ok(response) => response,
            Err(err) => {
                error!("ASIN {}: {}", asin, err);
                return TaskStatus::Error;
            }
        };

        let status = response.status();
        if status == StatusCode::SERVICE_UNAVAILABLE {
            self.registry
                .mark_rejected(RejectedRequest::new(url, status.as_u16()))
                .await;
            error!("upstream rejected ASIN {} with status {}", asin, status);
            return TaskStatus::Error;
        }
        if status != StatusCode::OK {
            error!("unexpected status {} fetching ASIN {}", status, asin);
            return TaskStatus::Error;
        }

        match response.text().await {
            Ok(_body) => {
                info!("====== ASIN {} fetched ======", asin);
                TaskStatus::Success
            }
            Err(err) => {
                error!("failed reading ASIN {} body: {}", asin, err);
                TaskStatus::Error
            }
        }
    }

    /// Check whether an ASIN appears in a keyword's search results
    pub async fn keyword_appear(&self, task: &mut Task) {
        let key = task.registry_key();
        self.registry.mark_started(&key).await;
        info!(
            "Checking keyword '{}' for ASIN {}",
            task.keyword, task.asin
        );

        let url = format!(
            "{}&field-asin={}",
            self.site.search_url(&task.keyword, "", 1),
            task.asin
        );
        match self.fetch_appearance(&url, task).await {
            Some((appear, count)) => {
                task.appear = Some(appear);
                task.total_result_count = count;
                task.status = TaskStatus::Success;
            }
            None => task.status = TaskStatus::Error,
        }

        self.registry
            .mark_handled(format!("keyword_appear_{}_{}", task.keyword, task.asin))
            .await;
        self.registry.finish(&key).await;
        info!(
            "====== keyword '{}' / ASIN {} complete, status {}, appear {:?} ======",
            task.keyword, task.asin, task.status, task.appear
        );
    }

    async fn fetch_appearance(&self, url: &str, task: &Task) -> Option<(Appearance, usize)> {
        let response = match self.client.get(url).send().await {
            Ok(response) => response,
            Err(err) => {
                error!(
                    "keyword '{}' ASIN {}: {}",
                    task.keyword, task.asin, err
                );
                return None;
            }
        };

        let status = response.status();
        if status == StatusCode::SERVICE_UNAVAILABLE {
            self.registry
                .mark_rejected(RejectedRequest::new(url, status.as_u16()))
                .await;
            error!("upstream rejected appearance check with status {}", status);
            return None;
        }
        if status != StatusCode::OK {
            error!("unexpected status {} on appearance check", status);
            return None;
        }

        match response.text().await {
            Ok(body) => Some(self.extractor.appearance(&body)),
            Err(err) => {
                error!("failed reading appearance body: {}", err);
                None
            }
        }
    }

    /// Best-effort delivery postal code step; failure never stops a task
    async fn submit_zip_code(&self, task: &Task) {
        let Some(zip) = task.effective_zip_code() else {
            return;
        };
        match self.set_zip_code(&zip).await {
            Ok(()) => info!("Delivery postal code set to {}", zip),
            Err(err) => warn!("Failed to set delivery postal code: {:#}", err),
        }
    }

    async fn set_zip_code(&self, zip: &str) -> Result<()> {
        let form = [
            ("locationType", "LOCATION_INPUT"),
            ("zipCode", zip),
            ("storeContext", "generic"),
            ("deviceType", "web"),
            ("pageType", "Gateway"),
            ("actionSource", "glow"),
        ];
        let response = self
            .client
            .post(self.site.zip_endpoint())
            .header("Accept", "text/html,*/*")
            .header("X-Requested-With", "XMLHttpRequest")
            .form(&form)
            .send()
            .await
            .context("address-change request failed")?;

        if response.status() != StatusCode::OK {
            bail!("address-change returned status {}", response.status());
        }
        Ok(())
    }
}
