use dashmap::DashMap;
use rust_decimal::Decimal;

use crate::config::CatalogEntry;
use crate::errors::ServiceError;
use crate::models::LineItem;

/// Server-held product truth used to re-snapshot cart lines.
pub trait ProductCatalog: Send + Sync {
    /// Replaces name, price and image of each line with catalog values.
    ///
    /// Unknown products are an `InvalidCart`.
    fn snapshot(&self, items: &[LineItem]) -> Result<Vec<LineItem>, ServiceError>;
}

#[derive(Debug, Clone)]
struct CatalogProduct {
    name: String,
    price: Decimal,
    image: Option<String>,
}

/// Catalog loaded from configuration
#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    products: DashMap<String, CatalogProduct>,
}

impl InMemoryCatalog {
    pub fn from_entries(entries: &[CatalogEntry]) -> Self {
        let products = DashMap::new();
        for entry in entries {
            products.insert(
                entry.product_id.clone(),
                CatalogProduct {
                    name: entry.name.clone(),
                    price: entry.price,
                    image: entry.image.clone(),
                },
            );
        }
        Self { products }
    }
}

impl ProductCatalog for InMemoryCatalog {
    fn snapshot(&self, items: &[LineItem]) -> Result<Vec<LineItem>, ServiceError> {
        items
            .iter()
            .map(|item| {
                let product = self.products.get(&item.product_id).ok_or_else(|| {
                    ServiceError::InvalidCart(format!("unknown product {}", item.product_id))
                })?;
                Ok(LineItem {
                    product_id: item.product_id.clone(),
                    name: product.name.clone(),
                    price: product.price,
                    quantity: item.quantity,
                    image: product.image.clone().or_else(|| item.image.clone()),
                })
            })
            .collect()
    }
}
