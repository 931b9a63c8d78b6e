//! Turns raw search-result HTML into structured product records.

use anyhow::{Result, anyhow};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::warn;

use crate::scrape::site::{self, Site};
use crate::scrape::task::{Appearance, Position, Price, Product, Reviews};

/// Where the crawl goes after the current page
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NextPage {
    /// No enabled next-page control; the result set ends here
    End,

    /// Href of the next-page control, as found on the page
    Link(String),

    /// A next-page control exists but carries no href; the caller
    /// falls back to a constructed page URL
    Unlinked,
}

/// Everything extracted from one search-results response
#[derive(Debug)]
pub struct PageExtract {
    pub products: Vec<Product>,
    pub next: NextPage,
    /// Raw `totalResultCount` capture, when the page embeds one
    pub total_result_count: Option<String>,
}

/// Compiled selectors for the search-results template.
///
/// Built once and reused across pages; the per-ASIN badge selectors are
/// the only ones compiled per item.
pub struct Extractor {
    search_results: Selector,
    price_tiers: [Selector; 3],
    strike_price: Selector,
    inner_span: Selector,
    product_link: Selector,
    reviews_link: Selector,
    star_label: Selector,
    sponsored_icon: Selector,
    prime_badge: Selector,
    title_primary: Selector,
    title_fallback: Selector,
    thumbnail: Selector,
    next_page: Selector,
    results_container: Selector,
    total_count_re: Regex,
}

impl Extractor {
    pub fn new() -> Result<Self> {
        Ok(Self {
            search_results: selector(".s-search-results [data-component-type='s-search-result']")?,
            price_tiers: [
                selector("span[data-a-size='xl']")?,
                selector("span[data-a-size='l']")?,
                selector("span[data-a-size='m']")?,
            ],
            strike_price: selector("span.a-price.a-text-price")?,
            inner_span: selector("span")?,
            product_link: selector("span[data-component-type='s-product-image'] a")?,
            reviews_link: selector("[data-csa-c-slot-id='alf-reviews'] a")?,
            star_label: selector("a.mvt-review-star-mini-popover,.a-icon-star-small")?,
            sponsored_icon: selector("span.puis-sponsored-label-info-icon")?,
            prime_badge: selector(".s-prime")?,
            title_primary: selector("[data-cy='title-recipe'] span.a-text-normal")?,
            title_fallback: selector("[data-cy='title-recipe'] h2.a-size-base-plus span")?,
            thumbnail: selector("img[data-image-source-density='1']")?,
            next_page: selector(".s-pagination-item.s-pagination-next:not(.s-pagination-disabled)")?,
            results_container: selector("[data-component-type='s-search-results']")?,
            total_count_re: Regex::new(r#""totalResultCount":(\w+.[0-9])"#)?,
        })
    }

    /// Extract one search-results page: products, the next-page state
    /// and the embedded total-result-count capture
    pub fn search_page(&self, body: &str, page: i32, country: &str, site: &Site) -> PageExtract {
        let doc = Html::parse_document(body);
        PageExtract {
            products: self.products(&doc, page, country, site),
            next: self.next_page(&doc),
            total_result_count: self.total_result_count(body),
        }
    }

    /// Classify a keyword-appearance response body.
    /// Returns the appear flag and the number of result items found.
    pub fn appearance(&self, body: &str) -> (Appearance, usize) {
        let doc = Html::parse_document(body);
        let container_text = doc
            .select(&self.results_container)
            .next()
            .map(inner_text)
            .unwrap_or_default();
        if site::no_results(&container_text) {
            (Appearance::No, 0)
        } else {
            (Appearance::Yes, doc.select(&self.search_results).count())
        }
    }

    /// Raw value of the `totalResultCount` field embedded in page scripts
    pub fn total_result_count(&self, body: &str) -> Option<String> {
        self.total_count_re
            .captures(body)
            .map(|caps| caps[1].to_string())
    }

    fn products(&self, doc: &Html, page: i32, country: &str, site: &Site) -> Vec<Product> {
        let items: Vec<ElementRef<'_>> = doc.select(&self.search_results).collect();
        let page_size = items.len() as i32;
        let mut products = Vec::with_capacity(items.len());
        for (idx, item) in items.iter().enumerate() {
            // A faulting item aborts the page but keeps what was already
            // extracted; the task carries on with partial results.
            match self.product(*item, page, page_size, idx as i32, country, site) {
                Ok(product) => products.push(product),
                Err(err) => {
                    warn!(
                        "extraction fault on page {} item {}: {:#}",
                        page,
                        idx + 1,
                        err
                    );
                    break;
                }
            }
        }
        products
    }

    fn product(
        &self,
        item: ElementRef<'_>,
        page: i32,
        page_size: i32,
        idx: i32,
        country: &str,
        site: &Site,
    ) -> Result<Product> {
        let comma_locale = uses_comma_decimal(country);
        let asin = item
            .value()
            .attr("data-asin")
            .unwrap_or_default()
            .to_string();

        let price_el = self
            .price_tiers
            .iter()
            .find_map(|tier| item.select(tier).next());
        let current_text = price_el
            .and_then(|el| el.select(&self.inner_span).next())
            .map(inner_text)
            .unwrap_or_default();

        let strike_el = item.select(&self.strike_price).next();
        let before_text = strike_el
            .and_then(|el| el.select(&self.inner_span).next())
            .map(inner_text)
            .unwrap_or_default();

        let url = item
            .select(&self.product_link)
            .next()
            .and_then(|a| a.value().attr("href"))
            .map(str::to_string)
            .unwrap_or_else(|| site.detail_url(&asin));

        let reviews_text = item
            .select(&self.reviews_link)
            .next()
            .and_then(|a| a.value().attr("aria-label"))
            .unwrap_or_default();
        let star_text = item
            .select(&self.star_label)
            .next()
            .and_then(|el| el.value().attr("aria-label"))
            .unwrap_or_default();

        let choice_badge = badge_selector(&asin, "amazons-choice")?;
        let seller_badge = badge_selector(&asin, "best-seller")?;

        let title = item
            .select(&self.title_primary)
            .next()
            .or_else(|| item.select(&self.title_fallback).next())
            .map(inner_text)
            .unwrap_or_default();

        let thumbnail = item
            .select(&self.thumbnail)
            .next()
            .and_then(|img| img.value().attr("src"))
            .unwrap_or_default()
            .to_string();

        let sponsored =
            item.select(&self.sponsored_icon).next().is_some() || url.contains("/sspa/");

        Ok(Product {
            position: Position {
                page,
                position: idx + 1,
                global_position: page_size * (page - 1) + idx + 1,
            },
            asin,
            price: Price {
                discounted: strike_el.is_some(),
                current_price: parse_price(&current_text, comma_locale),
                before_price: parse_price(&before_text, comma_locale),
            },
            reviews: Reviews {
                total_reviews: parse_review_count(reviews_text, comma_locale),
                rating: parse_rating(star_text, comma_locale),
            },
            url,
            sponsored,
            amazon_choice: item.select(&choice_badge).next().is_some(),
            best_seller: item.select(&seller_badge).next().is_some(),
            amazon_prime: item.select(&self.prime_badge).next().is_some(),
            title,
            thumbnail,
        })
    }

    fn next_page(&self, doc: &Html) -> NextPage {
        match doc.select(&self.next_page).next() {
            None => NextPage::End,
            Some(el) => match el.value().attr("href") {
                Some(href) => NextPage::Link(href.to_string()),
                None => NextPage::Unlinked,
            },
        }
    }
}

fn selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|err| anyhow!("invalid selector '{}': {}", css, err))
}

/// Badge spans carry ids templated with the item's ASIN
fn badge_selector(asin: &str, suffix: &str) -> Result<Selector> {
    let css = format!("span[id='{}-{}']", asin, suffix);
    Selector::parse(&css).map_err(|err| anyhow!("invalid badge selector '{}': {}", css, err))
}

fn inner_text(el: ElementRef<'_>) -> String {
    el.text().collect::<String>().trim().to_string()
}

/// The DE and IT storefronts render comma-decimal numbers
fn uses_comma_decimal(country: &str) -> bool {
    matches!(country, "DE" | "IT")
}

/// Parse a rendered price to a decimal amount.
///
/// Comma-decimal locales are normalized first, gated on a comma being
/// present so an already-normalized string passes through unchanged.
/// After normalization everything but digits and the decimal point is
/// stripped; unparsable text yields 0 rather than an error.
fn parse_price(text: &str, comma_locale: bool) -> f64 {
    let text = if comma_locale && text.contains(',') {
        text.replace('.', "").replace(',', ".")
    } else {
        text.to_string()
    };
    let cleaned: String = text
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    cleaned.parse().unwrap_or(0.0)
}

/// Parse a review-count label, stripping thousands separators and
/// taking the leading digit run. Unparsable text yields 0.
fn parse_review_count(text: &str, comma_locale: bool) -> u32 {
    let text = if comma_locale {
        text.replace('.', "")
    } else {
        text.to_string()
    };
    let digits: String = text
        .replace(',', "")
        .trim_start()
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().unwrap_or(0)
}

/// Parse the leading numeric token of a star-rating label, e.g.
/// "4.5 out of 5 stars". Unparsable text yields 0.0.
fn parse_rating(text: &str, comma_locale: bool) -> f64 {
    let text = if comma_locale {
        text.replace(',', ".")
    } else {
        text.to_string()
    };
    text.split_whitespace()
        .next()
        .and_then(|token| token.parse().ok())
        .unwrap_or(0.0)
}
