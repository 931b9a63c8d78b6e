use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{error, info};

use crate::cli::config::StorageSettings;
use crate::scrape::task::Task;
use crate::storage::configs::ConfigStore;
use crate::storage::document::DocumentSink;
use crate::storage::queue::QueueSink;

/// Destination for finished task results
#[async_trait]
pub trait ResultSink: Send + Sync {
    /// Deliver the task's results downstream
    async fn deliver(&self, task: &Task) -> Result<()>;

    /// Short name used in logs
    fn name(&self) -> &'static str;
}

#[async_trait]
impl ResultSink for DocumentSink {
    async fn deliver(&self, task: &Task) -> Result<()> {
        self.store(task).await
    }

    fn name(&self) -> &'static str {
        "mongo"
    }
}

#[async_trait]
impl ResultSink for QueueSink {
    async fn deliver(&self, task: &Task) -> Result<()> {
        self.push(task).await
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}

/// Factory resolving the configured sink kind to a connected sink
pub struct SinkFactory;

impl SinkFactory {
    /// Create the sink named by the settings, reading its connection
    /// string from the configuration store. An empty kind means the
    /// document sink.
    pub async fn create(
        settings: &StorageSettings,
        configs: &ConfigStore,
    ) -> Result<Arc<dyn ResultSink>> {
        match settings.sink.as_str() {
            "mongo" | "" => {
                let url = configs.mongo_url().await?;
                let sink = DocumentSink::connect(&url, &settings.fallback_database).await?;
                Ok(Arc::new(sink))
            }
            "redis" => {
                let url = configs.redis_url().await?;
                let sink = QueueSink::connect(&url, &settings.queue).await?;
                Ok(Arc::new(sink))
            }
            other => {
                bail!("Unsupported result sink: {}", other);
            }
        }
    }
}

/// Hand results to the sink. Delivery failure is logged and never fails
/// the task that produced them.
pub async fn dispatch(sink: &dyn ResultSink, task: &Task) {
    match sink.deliver(task).await {
        Ok(()) => info!(
            "Delivered task {} results to the {} sink",
            task.task_id,
            sink.name()
        ),
        Err(err) => error!(
            "Failed to deliver task {} results to the {} sink: {:#}",
            task.task_id,
            sink.name(),
            err
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scrape::task::TaskStatus;
    use anyhow::anyhow;
    use mockall::mock;

    mock! {
        pub Sink {}

        #[async_trait]
        impl ResultSink for Sink {
            async fn deliver(&self, task: &Task) -> Result<()>;
            fn name(&self) -> &'static str;
        }
    }

    fn finished_task() -> Task {
        Task {
            task_id: "task123".to_string(),
            status: TaskStatus::Success,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn dispatch_delivers_once() {
        let mut sink = MockSink::new();
        sink.expect_deliver().times(1).returning(|_| Ok(()));
        sink.expect_name().return_const("redis");

        let task = finished_task();
        dispatch(&sink, &task).await;
    }

    #[tokio::test]
    async fn dispatch_swallows_delivery_failures() {
        let mut sink = MockSink::new();
        sink.expect_deliver()
            .times(1)
            .returning(|_| Err(anyhow!("connection refused")));
        sink.expect_name().return_const("mongo");

        let task = finished_task();
        dispatch(&sink, &task).await;
        // The task is unchanged; the failure only shows up in the logs.
        assert_eq!(task.status, TaskStatus::Success);
    }
}
