use anyhow::{Context, Result};
use redis::{aio::MultiplexedConnection, Client};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::scrape::site;
use crate::scrape::task::{Product, Task, TaskType};

/// Result payload pushed onto the downstream Redis queue.
/// The field layout is what the consumer on the other side expects;
/// renaming anything here breaks that contract.
#[derive(Debug, Serialize, Deserialize)]
pub struct TaskEnvelope {
    pub task_id: String,
    pub country: String,
    pub max_page: i32,
    pub category: String,
    pub task_type: String,
    pub brand: String,
    pub asin: String,
    pub parse_type: String,
    pub postcode: String,
    pub task_key: String,
    pub queue_key: String,
    pub keyword: String,
    pub total_products: usize,
    pub result: Vec<Product>,
}

impl TaskEnvelope {
    /// Build the queue payload for a finished task
    pub fn from_task(task: &Task) -> Self {
        // Search results are consumed by the share parser; the other
        // task types pass through under their own name.
        let parse_type = match task.task_type {
            TaskType::SearchProducts => "product_shares".to_string(),
            other => other.as_str().to_string(),
        };
        let postcode = task
            .effective_zip_code()
            .unwrap_or_else(|| site::default_zip_code(&task.country).to_string());

        Self {
            task_id: task.task_id.clone(),
            country: task.country.clone(),
            max_page: task.max_page,
            category: task.category.clone(),
            task_type: task.task_type.to_string(),
            brand: String::new(),
            asin: task.asin.clone(),
            parse_type,
            postcode,
            task_key: format!("ads_assembler:amz_scraper_task_{}", task.task_id),
            queue_key: format!("amazon:scraper_execute_tasks:{}", task.country),
            keyword: task.keyword.clone(),
            total_products: task.result.len(),
            result: task.result.clone(),
        }
    }
}

/// Redis sink pushing task envelopes onto a fixed result queue
pub struct QueueSink {
    queue: String,
    conn: Arc<Mutex<MultiplexedConnection>>,
}

impl QueueSink {
    /// Connect to Redis and bind to the result queue name
    pub async fn connect(redis_url: &str, queue: &str) -> Result<Self> {
        let client = Client::open(redis_url)
            .context(format!("Failed to connect to Redis at {}", redis_url))?;

        let conn = client
            .get_multiplexed_async_connection()
            .await
            .context("Failed to get Redis connection")?;

        debug!("Connected to Redis, result queue: {}", queue);

        Ok(Self {
            queue: queue.to_string(),
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Serialize the task envelope and push it onto the queue
    pub async fn push(&self, task: &Task) -> Result<()> {
        let envelope = TaskEnvelope::from_task(task);
        let payload =
            serde_json::to_string(&envelope).context("Failed to serialize task envelope")?;

        let mut conn = self.conn.lock().await;

        redis::cmd("RPUSH")
            .arg(&self.queue)
            .arg(&payload)
            .query_async::<_, ()>(&mut *conn)
            .await
            .context("Failed to push task envelope to Redis queue")?;

        info!(
            "Stored {} products on Redis queue {}",
            envelope.result.len(),
            self.queue
        );

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_reshapes_the_task_for_the_consumer() {
        let task = Task {
            task_id: "task123".to_string(),
            task_type: TaskType::SearchProducts,
            keyword: "wireless headphones".to_string(),
            max_page: 3,
            country: "US".to_string(),
            ..Default::default()
        };

        let envelope = TaskEnvelope::from_task(&task);
        assert_eq!(envelope.parse_type, "product_shares");
        assert_eq!(envelope.task_type, "search_products");
        assert_eq!(envelope.task_key, "ads_assembler:amz_scraper_task_task123");
        assert_eq!(envelope.queue_key, "amazon:scraper_execute_tasks:US");
        assert_eq!(envelope.postcode, "10001");
        assert_eq!(envelope.brand, "");
        assert_eq!(envelope.total_products, 0);
    }

    #[test]
    fn non_search_tasks_keep_their_own_parse_type() {
        let task = Task {
            task_id: "t2".to_string(),
            task_type: TaskType::KeywordAppear,
            keyword: "usb hub".to_string(),
            asin: "B0TESTASIN".to_string(),
            zip_code: "90210".to_string(),
            ..Default::default()
        };

        let envelope = TaskEnvelope::from_task(&task);
        assert_eq!(envelope.parse_type, "keyword_appear");
        assert_eq!(envelope.postcode, "90210");
    }
}
