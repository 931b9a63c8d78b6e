use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use mongodb::options::ClientOptions;
use mongodb::{Client, Database};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::scrape::task::{Position, Product, Reviews, Task};

/// Product document as stored in MongoDB, one per scraped listing.
/// Differs from the wire product in carrying the owning task id, an
/// insert timestamp and a nullable pre-discount price.
#[derive(Debug, Serialize, Deserialize)]
pub struct ProductDocument {
    pub position: Position,
    pub price: DocumentPrice,
    pub reviews: Reviews,
    pub amazon_prime: bool,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub asin: String,
    pub url: String,
    pub sponsored: bool,
    pub amazon_choice: bool,
    pub best_seller: bool,
    pub thumbnail: String,
    pub task_id: String,
}

/// Pricing with the pre-discount value nulled out when absent
#[derive(Debug, Serialize, Deserialize)]
pub struct DocumentPrice {
    pub discounted: bool,
    pub current_price: f64,
    pub before_price: Option<f64>,
}

impl ProductDocument {
    fn new(product: &Product, task_id: &str) -> Self {
        let before_price =
            (product.price.before_price > 0.0).then_some(product.price.before_price);

        Self {
            position: product.position.clone(),
            price: DocumentPrice {
                discounted: product.price.discounted,
                current_price: product.price.current_price,
                before_price,
            },
            reviews: product.reviews.clone(),
            amazon_prime: product.amazon_prime,
            title: product.title.clone(),
            created_at: Utc::now(),
            asin: product.asin.clone(),
            url: product.url.clone(),
            sponsored: product.sponsored,
            amazon_choice: product.amazon_choice,
            best_seller: product.best_seller,
            thumbnail: product.thumbnail.clone(),
            task_id: task_id.to_string(),
        }
    }
}

/// MongoDB sink writing one collection of product documents per task
pub struct DocumentSink {
    database: Database,
}

impl DocumentSink {
    /// Connect using the connection string, taking the database name
    /// from the URI path when present
    pub async fn connect(connection_string: &str, fallback_database: &str) -> Result<Self> {
        let options = ClientOptions::parse(connection_string)
            .await
            .context("Failed to parse MongoDB connection string")?;

        let database_name = options
            .default_database
            .clone()
            .unwrap_or_else(|| fallback_database.to_string());

        let client = Client::with_options(options).context("Failed to create MongoDB client")?;
        let database = client.database(&database_name);

        // Test connection
        database
            .list_collection_names(None)
            .await
            .context("Failed to connect to MongoDB")?;

        debug!("Connected to MongoDB database: {}", database_name);

        Ok(Self { database })
    }

    /// Insert every product of the task into a collection named after
    /// the task id. Tasks without results write nothing.
    pub async fn store(&self, task: &Task) -> Result<()> {
        if task.result.is_empty() {
            return Ok(());
        }

        let documents: Vec<ProductDocument> = task
            .result
            .iter()
            .map(|product| ProductDocument::new(product, &task.task_id))
            .collect();

        let collection = self.database.collection::<ProductDocument>(&task.task_id);
        collection
            .insert_many(&documents, None)
            .await
            .context("Failed to insert product documents into MongoDB")?;

        info!(
            "Stored {} products in MongoDB collection {}",
            documents.len(),
            task.task_id
        );

        Ok(())
    }
}
