//! Regional price table, keyed by (region, product-or-bundle), amounts in minor units.

use std::collections::HashMap;

use anyhow::{bail, Context, Result};
use serde::Serialize;
use tracing::info;

use crate::catalog::{ProductOrBundle, Region};
use crate::errors::AppError;

/// Built-in prices. US is the reference column; the other regions are set
/// by hand rather than converted.
const DEFAULT_PRICES: &[(Region, &str, i64)] = &[
    (Region::Us, "resume_analysis", 1000),
    (Region::Us, "job_fit_analysis", 1200),
    (Region::Us, "cover_letter", 800),
    (Region::Us, "resume_rewrite", 1500),
    (Region::Us, "mock_interview", 1200),
    (Region::Us, "complete_package", 2200),
    (Region::Us, "interview_ready", 1800),
    (Region::Us, "career_accelerator", 3900),
    (Region::Eu, "resume_analysis", 900),
    (Region::Eu, "job_fit_analysis", 1100),
    (Region::Eu, "cover_letter", 700),
    (Region::Eu, "resume_rewrite", 1400),
    (Region::Eu, "mock_interview", 1100),
    (Region::Eu, "complete_package", 2000),
    (Region::Eu, "interview_ready", 1600),
    (Region::Eu, "career_accelerator", 3500),
    (Region::Uk, "resume_analysis", 800),
    (Region::Uk, "job_fit_analysis", 1000),
    (Region::Uk, "cover_letter", 600),
    (Region::Uk, "resume_rewrite", 1200),
    (Region::Uk, "mock_interview", 1000),
    (Region::Uk, "complete_package", 1800),
    (Region::Uk, "interview_ready", 1500),
    (Region::Uk, "career_accelerator", 3200),
    (Region::In, "resume_analysis", 29900),
    (Region::In, "job_fit_analysis", 39900),
    (Region::In, "cover_letter", 24900),
    (Region::In, "resume_rewrite", 49900),
    (Region::In, "mock_interview", 39900),
    (Region::In, "complete_package", 69900),
    (Region::In, "interview_ready", 59900),
    (Region::In, "career_accelerator", 119900),
];

/// A resolved price.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Price {
    pub amount: i64,
    pub currency: &'static str,
}

#[derive(Debug, Clone)]
pub struct PricingTable {
    prices: HashMap<(Region, ProductOrBundle), i64>,
}

impl Default for PricingTable {
    fn default() -> Self {
        let prices = DEFAULT_PRICES
            .iter()
            .filter_map(|(region, item, amount)| {
                ProductOrBundle::parse(item).map(|item| ((*region, item), *amount))
            })
            .collect();
        Self { prices }
    }
}

impl PricingTable {
    pub fn from_entries(entries: impl IntoIterator<Item = (Region, ProductOrBundle, i64)>) -> Self {
        Self {
            prices: entries
                .into_iter()
                .map(|(region, item, amount)| ((region, item), amount))
                .collect(),
        }
    }

    /// Loads the table from `PRICING_FILE` when set, otherwise the built-in table.
    ///
    /// File shape: `{"us": {"resume_analysis": 1000, "complete_package": 2200}, ...}`.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };

        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read pricing file '{path}'"))?;
        let table = Self::from_json(&raw).with_context(|| format!("Invalid pricing file '{path}'"))?;
        info!("Loaded {} price entries from {path}", table.prices.len());
        Ok(table)
    }

    fn from_json(raw: &str) -> Result<Self> {
        let parsed: HashMap<String, HashMap<String, i64>> = serde_json::from_str(raw)?;
        let mut prices = HashMap::new();
        for (region_key, items) in parsed {
            let Some(region) = Region::parse(&region_key) else {
                bail!("unknown region '{region_key}'");
            };
            for (item_key, amount) in items {
                let Some(item) = ProductOrBundle::parse(&item_key) else {
                    bail!("unknown product or bundle '{item_key}'");
                };
                if amount < 0 {
                    bail!("negative price for {region_key}/{item_key}");
                }
                prices.insert((region, item), amount);
            }
        }
        Ok(Self { prices })
    }

    /// Looks up the base price. A missing row is an operator problem, not a user one.
    pub fn price(&self, region: Region, item: ProductOrBundle) -> Result<Price, AppError> {
        self.prices
            .get(&(region, item))
            .map(|amount| Price {
                amount: *amount,
                currency: region.currency(),
            })
            .ok_or_else(|| {
                AppError::Configuration(format!("no price configured for {item} in region {region}"))
            })
    }
}
