use serde::{Serialize, Deserialize};
use std::fmt;
use std::str::FromStr;

use crate::scrape::site;

/// The kind of work a task performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    /// Paginated keyword search crawl collecting product listings
    #[default]
    SearchProducts,

    /// Single fetch of a product detail page by ASIN
    AsinPage,

    /// Check whether an ASIN appears in the results for a keyword
    KeywordAppear,
}

impl TaskType {
    /// Wire/CLI name of the task type
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::SearchProducts => "search_products",
            TaskType::AsinPage => "asin_page",
            TaskType::KeywordAppear => "keyword_appear",
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "search_products" => Ok(TaskType::SearchProducts),
            "asin_page" => Ok(TaskType::AsinPage),
            "keyword_appear" => Ok(TaskType::KeywordAppear),
            other => Err(format!(
                "unsupported task type '{}' (expected search_products, asin_page or keyword_appear)",
                other
            )),
        }
    }
}

/// Lifecycle status of a task; terminal once success, error or done
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Not yet executed
    #[default]
    Pending,

    /// Completed with at least one usable result
    Success,

    /// Completed without usable results (blocked, unreachable, empty)
    Error,

    /// Results handed to the configured sink
    Done,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Success => "success",
            TaskStatus::Error => "error",
            TaskStatus::Done => "done",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a keyword-appearance check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Appearance {
    #[serde(rename = "Y")]
    Yes,

    #[serde(rename = "N")]
    No,
}

impl fmt::Display for Appearance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Appearance::Yes => "Y",
            Appearance::No => "N",
        })
    }
}

/// A single scraping task to be executed
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Task {
    /// Unique identifier assigned by the submitting side
    pub task_id: String,

    /// What kind of work this task performs
    pub task_type: TaskType,

    /// Search keyword (search_products, keyword_appear)
    #[serde(default)]
    pub keyword: String,

    /// Target ASIN (asin_page, keyword_appear)
    #[serde(default)]
    pub asin: String,

    /// Optional search category filter (the `i=` query parameter)
    #[serde(default)]
    pub category: String,

    /// Last page to fetch, 1-indexed inclusive; values <= 0 mean 1
    #[serde(default)]
    pub max_page: i32,

    /// First page to fetch, 1-indexed; values <= 0 mean 1
    #[serde(default)]
    pub min_page: i32,

    /// Raw `totalResultCount` capture from the first page exposing it
    #[serde(default)]
    pub total_products: Option<serde_json::Value>,

    /// Products accumulated across all fetched pages
    #[serde(default)]
    pub result: Vec<Product>,

    /// Current lifecycle status
    #[serde(default)]
    pub status: TaskStatus,

    /// Whether the ASIN appeared in the keyword results (keyword_appear)
    #[serde(default)]
    pub appear: Option<Appearance>,

    /// Number of result items found by a keyword-appearance check
    #[serde(default)]
    pub total_result_count: usize,

    /// Marketplace country code (US, DE, UK, ...)
    #[serde(rename = "code", default)]
    pub country: String,

    /// Delivery postal code override for this task
    #[serde(default)]
    pub zip_code: String,
}

impl Task {
    /// Key identifying this task in the in-flight registry
    pub fn registry_key(&self) -> String {
        match self.task_type {
            TaskType::SearchProducts => format!("{}_{}", self.task_id, self.keyword),
            TaskType::AsinPage => format!("{}_{}", self.task_id, self.asin),
            TaskType::KeywordAppear => {
                format!("{}_{}_{}", self.task_id, self.keyword, self.asin)
            }
        }
    }

    /// Postal code to submit before fetching: the explicit override when
    /// set, otherwise the per-country default
    pub fn effective_zip_code(&self) -> Option<String> {
        if !self.zip_code.is_empty() {
            Some(self.zip_code.clone())
        } else if !self.country.is_empty() {
            Some(site::default_zip_code(&self.country).to_string())
        } else {
            None
        }
    }
}

/// Where a product sat in the search results
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    /// Search result page the product was found on, 1-indexed
    pub page: i32,

    /// Rank within that page, 1-indexed
    pub position: i32,

    /// Rank across pages: items-per-page * (page - 1) + in-page rank.
    /// Assumes uniform page sizes, so this is an approximation when the
    /// site varies the item count per page.
    pub global_position: i32,
}

/// Pricing as rendered on the listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Price {
    /// A strikethrough pre-discount price was present
    pub discounted: bool,

    /// Price currently asked, 0.0 when missing or unparsable
    pub current_price: f64,

    /// Pre-discount price, 0.0 when the listing is not discounted
    pub before_price: f64,
}

/// Review summary as rendered on the listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reviews {
    /// Total review count, 0 when missing or unparsable
    pub total_reviews: u32,

    /// Average star rating, 0.0 when missing or unparsable
    pub rating: f64,
}

/// One scraped product listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    /// Placement of the listing in the search results
    pub position: Position,

    /// ASIN from the result container; empty when the attribute is absent
    pub asin: String,

    /// Listed pricing
    pub price: Price,

    /// Review summary
    pub reviews: Reviews,

    /// Detail-page URL from the listing, or a synthesized /dp/ URL
    pub url: String,

    /// Listing is a paid placement
    pub sponsored: bool,

    /// Carries the Amazon's Choice badge
    pub amazon_choice: bool,

    /// Carries the Best Seller badge
    pub best_seller: bool,

    /// Prime-eligible badge present
    pub amazon_prime: bool,

    /// Listing title
    pub title: String,

    /// Thumbnail image URL
    pub thumbnail: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_type_round_trips_through_str() {
        for t in [TaskType::SearchProducts, TaskType::AsinPage, TaskType::KeywordAppear] {
            assert_eq!(t.as_str().parse::<TaskType>().unwrap(), t);
        }
        assert!("browse_node".parse::<TaskType>().is_err());
    }

    #[test]
    fn registry_key_includes_type_specific_fields() {
        let task = Task {
            task_id: "t1".to_string(),
            task_type: TaskType::KeywordAppear,
            keyword: "usb hub".to_string(),
            asin: "B00TEST123".to_string(),
            ..Default::default()
        };
        assert_eq!(task.registry_key(), "t1_usb hub_B00TEST123");

        let task = Task { task_type: TaskType::AsinPage, ..task };
        assert_eq!(task.registry_key(), "t1_B00TEST123");
    }

    #[test]
    fn effective_zip_code_prefers_explicit_override() {
        let mut task = Task {
            country: "DE".to_string(),
            ..Default::default()
        };
        assert_eq!(task.effective_zip_code().as_deref(), Some("10115"));

        task.zip_code = "80331".to_string();
        assert_eq!(task.effective_zip_code().as_deref(), Some("80331"));

        let blank = Task::default();
        assert_eq!(blank.effective_zip_code(), None);
    }

    #[test]
    fn status_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&TaskStatus::Success).unwrap(), "\"success\"");
        assert_eq!(serde_json::to_string(&Appearance::No).unwrap(), "\"N\"");
        assert_eq!(
            serde_json::to_string(&TaskType::SearchProducts).unwrap(),
            "\"search_products\""
        );
    }
}
