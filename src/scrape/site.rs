//! Marketplace-specific constants and URL construction.

/// Browser identity presented on every outbound request
pub const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Result-page phrases that mean the keyword produced no listings
const NO_RESULTS_PHRASES: [&str; 7] = [
    "No results for",
    "Aucun résultat pour",
    "Keine Ergebnisse für",
    "Nessun risultato per",
    "No hay resultados para",
    "没有",
    "の検索に一致する商品はありませんでした",
];

/// Storefront base URL for a marketplace country code.
/// Unknown codes fall back to the US storefront.
pub fn marketplace_domain(country: &str) -> &'static str {
    match country {
        "US" => "https://www.amazon.com",
        "DE" => "https://www.amazon.de",
        "UK" => "https://www.amazon.co.uk",
        "CA" => "https://www.amazon.ca",
        "JP" => "https://www.amazon.co.jp",
        "FR" => "https://www.amazon.fr",
        "IT" => "https://www.amazon.it",
        "ES" => "https://www.amazon.es",
        "AU" => "https://www.amazon.com.au",
        "MX" => "https://www.amazon.com.mx",
        _ => "https://www.amazon.com",
    }
}

/// Default delivery postal code for a marketplace country code.
/// Unknown codes fall back to the US default.
pub fn default_zip_code(country: &str) -> &'static str {
    match country {
        "US" => "10001",
        "DE" => "10115",
        "UK" => "SW1A 1AA",
        "CA" => "M5V 2A8",
        "JP" => "100-0001",
        "FR" => "75001",
        "IT" => "00100",
        "ES" => "28001",
        "AU" => "2000",
        "MX" => "06000",
        "AE" => "00000",
        _ => "10001",
    }
}

/// True when the page body announces an empty result set in any
/// supported storefront language
pub fn no_results(body: &str) -> bool {
    NO_RESULTS_PHRASES.iter().any(|phrase| body.contains(phrase))
}

/// URL builder bound to one storefront base.
///
/// Normally constructed from a country code; tests swap in a local
/// server base instead.
#[derive(Debug, Clone)]
pub struct Site {
    base: String,
}

impl Site {
    /// Site for the storefront serving the given country code
    pub fn for_country(country: &str) -> Self {
        Self { base: marketplace_domain(country).to_string() }
    }

    /// Site rooted at an arbitrary base URL, no trailing slash
    pub fn with_base(base: impl Into<String>) -> Self {
        Self { base: base.into() }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    /// Search results URL for a keyword, with optional category filter
    /// and an explicit page number for entries past the first page
    pub fn search_url(&self, keyword: &str, category: &str, page: i32) -> String {
        let escaped: String = url::form_urlencoded::byte_serialize(keyword.as_bytes()).collect();
        let mut url = format!("{}/s?k={}", self.base, escaped);
        if !category.is_empty() {
            url.push_str("&i=");
            url.push_str(category);
        }
        if page > 1 {
            url.push_str(&format!("&page={}", page));
        }
        url
    }

    /// Product detail page URL for an ASIN
    pub fn detail_url(&self, asin: &str) -> String {
        format!("{}/dp/{}", self.base, asin)
    }

    /// Delivery-address endpoint used to pin a postal code on the session
    pub fn zip_endpoint(&self) -> String {
        format!("{}/gp/delivery/ajax/address-change.html", self.base)
    }

    /// Resolve an href scraped from a page against this site.
    /// Absolute URLs pass through, rooted paths append to the base and
    /// anything else is treated as relative to the base.
    pub fn absolutize(&self, href: &str) -> String {
        if href.starts_with('/') {
            format!("{}{}", self.base, href)
        } else if href.starts_with("http") {
            href.to_string()
        } else {
            format!("{}/{}", self.base, href)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_country_falls_back_to_us() {
        assert_eq!(marketplace_domain("BR"), "https://www.amazon.com");
        assert_eq!(default_zip_code("BR"), "10001");
    }

    #[test]
    fn search_url_escapes_keyword_and_appends_filters() {
        let site = Site::for_country("DE");
        assert_eq!(
            site.search_url("usb hub", "", 1),
            "https://www.amazon.de/s?k=usb+hub"
        );
        assert_eq!(
            site.search_url("usb hub", "electronics", 3),
            "https://www.amazon.de/s?k=usb+hub&i=electronics&page=3"
        );
    }

    #[test]
    fn absolutize_handles_rooted_absolute_and_bare_hrefs() {
        let site = Site::with_base("https://www.amazon.com");
        assert_eq!(
            site.absolutize("/s?k=x&page=2"),
            "https://www.amazon.com/s?k=x&page=2"
        );
        assert_eq!(
            site.absolutize("https://elsewhere.example/page"),
            "https://elsewhere.example/page"
        );
        assert_eq!(
            site.absolutize("s?k=x&page=2"),
            "https://www.amazon.com/s?k=x&page=2"
        );
    }

    #[test]
    fn no_results_matches_any_storefront_language() {
        assert!(no_results("<span>No results for gibberishquery</span>"));
        assert!(no_results("<span>Keine Ergebnisse für foo</span>"));
        assert!(!no_results("<span>1-16 of 3,000 results</span>"));
    }
}
