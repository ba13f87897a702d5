use serde::{Deserialize, Serialize};

use crate::types::ProductType;

/// One sellable item as the try-on sees it: an overlay source and the rule used
/// to place it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: String,
    pub name: String,
    /// URL, file path or data URI of the transparent overlay image.
    pub overlay: String,
    pub product_type: ProductType,
}

impl Product {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        overlay: impl Into<String>,
        product_type: ProductType,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            overlay: overlay.into(),
            product_type,
        }
    }
}

/// Frame presets offered when no catalog is configured.
pub fn default_catalog() -> Vec<Product> {
    [
        ("aviator", "Aviator", "assets/products/sunglasses1.png"),
        ("bluelight", "Blue Light", "assets/products/bluelight1.png"),
        ("round", "Round", "assets/products/round1.png"),
        ("classic", "Classic", "assets/products/classic1.png"),
    ]
    .into_iter()
    .map(|(id, name, overlay)| Product::new(id, name, overlay, ProductType::Glasses))
    .collect()
}

pub fn find<'a>(catalog: &'a [Product], id: &str) -> Option<&'a Product> {
    catalog.iter().find(|product| product.id == id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_presets_are_glasses() {
        let catalog = default_catalog();
        assert_eq!(catalog.len(), 4);
        assert!(catalog.iter().all(|p| p.product_type == ProductType::Glasses));
        assert_eq!(find(&catalog, "round").map(|p| p.name.as_str()), Some("Round"));
        assert!(find(&catalog, "monocle").is_none());
    }
}
