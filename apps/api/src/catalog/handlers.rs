use axum::{
    extract::{Query, State},
    http::HeaderMap,
    Json,
};
use serde::{Deserialize, Serialize};

use crate::catalog::{ProductId, ProductOrBundle, Region};
use crate::errors::AppError;
use crate::state::AppState;

/// Header set by the CDN with the caller's ISO country code.
pub const COUNTRY_HEADER: &str = "cf-ipcountry";

#[derive(Debug, Deserialize)]
pub struct CatalogQuery {
    pub region: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CatalogItem {
    pub id: ProductOrBundle,
    pub name: &'static str,
    pub kind: &'static str,
    pub products: Vec<ProductId>,
    pub requires_job_posting: bool,
    pub amount: i64,
    pub currency: &'static str,
}

#[derive(Debug, Serialize)]
pub struct CatalogResponse {
    pub region: Region,
    pub items: Vec<CatalogItem>,
}

pub fn country_from_headers(headers: &HeaderMap) -> Option<&str> {
    headers.get(COUNTRY_HEADER).and_then(|v| v.to_str().ok())
}

/// GET /catalog
///
/// Lists every product and bundle with its price for the caller's region.
pub async fn handle_catalog(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<CatalogQuery>,
) -> Result<Json<CatalogResponse>, AppError> {
    let region = Region::resolve(
        query.region.as_deref(),
        country_from_headers(&headers),
        state.config.default_region,
    );

    let items = ProductOrBundle::all()
        .map(|item| {
            let price = state.pricing.price(region, item)?;
            let products = item.products();
            Ok(CatalogItem {
                id: item,
                name: item.display_name(),
                kind: match item {
                    ProductOrBundle::Product(_) => "product",
                    ProductOrBundle::Bundle(_) => "bundle",
                },
                requires_job_posting: products.iter().any(|p| p.requires_job_posting()),
                products,
                amount: price.amount,
                currency: price.currency,
            })
        })
        .collect::<Result<Vec<_>, AppError>>()?;

    Ok(Json(CatalogResponse { region, items }))
}
