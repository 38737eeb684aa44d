//! Catalog: the premium products, the bundles built from them, and the
//! sales regions they are priced in.
//!
//! A purchase always names exactly one `ProductOrBundle`; `products()` expands
//! it to the concrete product list that premium generation must deliver.

pub mod handlers;
pub mod pricing;

use std::fmt;

use serde::{Deserialize, Serialize};

// ────────────────────────────────────────────────────────────────────────────
// Products
// ────────────────────────────────────────────────────────────────────────────

/// A single premium product. Each maps to one LLM prompt/response shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductId {
    ResumeAnalysis,
    JobFitAnalysis,
    CoverLetter,
    ResumeRewrite,
    MockInterview,
}

impl ProductId {
    pub const ALL: [ProductId; 5] = [
        ProductId::ResumeAnalysis,
        ProductId::JobFitAnalysis,
        ProductId::CoverLetter,
        ProductId::ResumeRewrite,
        ProductId::MockInterview,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ProductId::ResumeAnalysis => "resume_analysis",
            ProductId::JobFitAnalysis => "job_fit_analysis",
            ProductId::CoverLetter => "cover_letter",
            ProductId::ResumeRewrite => "resume_rewrite",
            ProductId::MockInterview => "mock_interview",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.as_str() == raw.trim())
    }

    pub fn display_name(self) -> &'static str {
        match self {
            ProductId::ResumeAnalysis => "Detailed Resume Analysis",
            ProductId::JobFitAnalysis => "Job Fit Analysis",
            ProductId::CoverLetter => "Cover Letter",
            ProductId::ResumeRewrite => "Resume Rewrite",
            ProductId::MockInterview => "Mock Interview Prep",
        }
    }

    /// Products that cannot be generated without the target job posting.
    pub fn requires_job_posting(self) -> bool {
        matches!(self, ProductId::JobFitAnalysis | ProductId::CoverLetter)
    }
}

impl fmt::Display for ProductId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Bundles
// ────────────────────────────────────────────────────────────────────────────

/// A named, fixed set of two or more products sold at a combined price.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Bundle {
    CompletePackage,
    InterviewReady,
    CareerAccelerator,
}

impl Bundle {
    pub const ALL: [Bundle; 3] = [
        Bundle::CompletePackage,
        Bundle::InterviewReady,
        Bundle::CareerAccelerator,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Bundle::CompletePackage => "complete_package",
            Bundle::InterviewReady => "interview_ready",
            Bundle::CareerAccelerator => "career_accelerator",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|b| b.as_str() == raw.trim())
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Bundle::CompletePackage => "Complete Package",
            Bundle::InterviewReady => "Interview Ready",
            Bundle::CareerAccelerator => "Career Accelerator",
        }
    }

    pub fn members(self) -> &'static [ProductId] {
        match self {
            Bundle::CompletePackage => &[
                ProductId::ResumeAnalysis,
                ProductId::JobFitAnalysis,
                ProductId::CoverLetter,
            ],
            Bundle::InterviewReady => &[ProductId::ResumeAnalysis, ProductId::MockInterview],
            Bundle::CareerAccelerator => &ProductId::ALL,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Purchase item
// ────────────────────────────────────────────────────────────────────────────

/// What a checkout purchases: one product or one bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProductOrBundle {
    Product(ProductId),
    Bundle(Bundle),
}

impl ProductOrBundle {
    pub fn parse(raw: &str) -> Option<Self> {
        ProductId::parse(raw)
            .map(ProductOrBundle::Product)
            .or_else(|| Bundle::parse(raw).map(ProductOrBundle::Bundle))
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ProductOrBundle::Product(p) => p.as_str(),
            ProductOrBundle::Bundle(b) => b.as_str(),
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            ProductOrBundle::Product(p) => p.display_name(),
            ProductOrBundle::Bundle(b) => b.display_name(),
        }
    }

    /// The full list of products this item delivers, in catalog order.
    pub fn products(self) -> Vec<ProductId> {
        match self {
            ProductOrBundle::Product(p) => vec![p],
            ProductOrBundle::Bundle(b) => b.members().to_vec(),
        }
    }

    pub fn all() -> impl Iterator<Item = ProductOrBundle> {
        ProductId::ALL
            .into_iter()
            .map(ProductOrBundle::Product)
            .chain(Bundle::ALL.into_iter().map(ProductOrBundle::Bundle))
    }
}

impl fmt::Display for ProductOrBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for ProductOrBundle {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ProductOrBundle {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        ProductOrBundle::parse(&raw).ok_or_else(|| {
            serde::de::Error::custom(format!("unknown product or bundle '{raw}'"))
        })
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Regions
// ────────────────────────────────────────────────────────────────────────────

/// Sales region; selects the price row and the checkout currency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Region {
    Us,
    Eu,
    Uk,
    In,
}

const EU_COUNTRIES: &[&str] = &[
    "AT", "BE", "BG", "HR", "CY", "CZ", "DK", "EE", "FI", "FR", "DE", "GR", "HU", "IE", "IT",
    "LV", "LT", "LU", "MT", "NL", "PL", "PT", "RO", "SK", "SI", "ES", "SE",
];

impl Region {
    pub fn as_str(self) -> &'static str {
        match self {
            Region::Us => "us",
            Region::Eu => "eu",
            Region::Uk => "uk",
            Region::In => "in",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "us" => Some(Region::Us),
            "eu" => Some(Region::Eu),
            "uk" | "gb" => Some(Region::Uk),
            "in" => Some(Region::In),
            _ => None,
        }
    }

    /// Maps an ISO 3166 alpha-2 country code (e.g. from `CF-IPCountry`).
    pub fn from_country(country: &str) -> Option<Self> {
        let country = country.trim().to_ascii_uppercase();
        match country.as_str() {
            "US" => Some(Region::Us),
            "GB" => Some(Region::Uk),
            "IN" => Some(Region::In),
            c if EU_COUNTRIES.contains(&c) => Some(Region::Eu),
            _ => None,
        }
    }

    /// ISO 4217 currency code, lowercase as the payment provider expects.
    pub fn currency(self) -> &'static str {
        match self {
            Region::Us => "usd",
            Region::Eu => "eur",
            Region::Uk => "gbp",
            Region::In => "inr",
        }
    }

    /// Resolution order: explicit request value, then the geo header, then the default.
    pub fn resolve(explicit: Option<&str>, country_header: Option<&str>, default: Region) -> Self {
        explicit
            .and_then(Region::parse)
            .or_else(|| country_header.and_then(Region::from_country))
            .unwrap_or(default)
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bundle_expands_to_every_member() {
        let item = ProductOrBundle::parse("complete_package").unwrap();
        assert_eq!(
            item.products(),
            vec![
                ProductId::ResumeAnalysis,
                ProductId::JobFitAnalysis,
                ProductId::CoverLetter
            ]
        );
    }

    #[test]
    fn test_product_expands_to_single_element() {
        let item = ProductOrBundle::parse("cover_letter").unwrap();
        assert_eq!(item.products(), vec![ProductId::CoverLetter]);
    }

    #[test]
    fn test_every_bundle_has_at_least_two_members() {
        for bundle in Bundle::ALL {
            assert!(bundle.members().len() >= 2, "{bundle:?} is too small");
        }
    }

    #[test]
    fn test_unknown_item_is_rejected() {
        assert!(ProductOrBundle::parse("premium_everything").is_none());
        assert!(ProductOrBundle::parse("").is_none());
    }

    #[test]
    fn test_product_or_bundle_serde_uses_wire_names() {
        let item: ProductOrBundle = serde_json::from_str(r#""interview_ready""#).unwrap();
        assert_eq!(item, ProductOrBundle::Bundle(Bundle::InterviewReady));
        assert_eq!(
            serde_json::to_string(&ProductOrBundle::Product(ProductId::MockInterview)).unwrap(),
            r#""mock_interview""#
        );
        assert!(serde_json::from_str::<ProductOrBundle>(r#""nope""#).is_err());
    }

    #[test]
    fn test_product_id_serde_matches_as_str() {
        for product in ProductId::ALL {
            let json = serde_json::to_string(&product).unwrap();
            assert_eq!(json, format!("\"{}\"", product.as_str()));
        }
    }

    #[test]
    fn test_region_resolution_order() {
        assert_eq!(Region::resolve(Some("eu"), Some("US"), Region::Us), Region::Eu);
        assert_eq!(Region::resolve(None, Some("de"), Region::Us), Region::Eu);
        assert_eq!(Region::resolve(None, Some("GB"), Region::Us), Region::Uk);
        assert_eq!(Region::resolve(Some("mars"), Some("XX"), Region::In), Region::In);
        assert_eq!(Region::resolve(None, None, Region::Us), Region::Us);
    }
}
