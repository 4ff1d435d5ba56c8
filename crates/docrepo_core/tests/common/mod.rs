#![allow(dead_code)]

use docrepo_core::{
    ContainerOptions, DocumentStore, EmbeddingBackend, EmbeddingError, FnEmbeddingBackend, Item,
    ItemHeader, RepositoryFactory, RepositoryOptions, Timestamps, VectorSearchItem,
    VectorSearchOptions,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    #[serde(flatten)]
    pub header: ItemHeader,
    #[serde(flatten)]
    pub timestamps: Timestamps,
    #[serde(default)]
    pub customer_id: String,
    #[serde(default)]
    pub total: f64,
    #[serde(default)]
    pub status: String,
}

impl Item for Order {
    const TYPE_NAME: &'static str = "Order";

    fn header(&self) -> &ItemHeader {
        &self.header
    }

    fn header_mut(&mut self) -> &mut ItemHeader {
        &mut self.header
    }

    fn partition_key_value(&self) -> String {
        self.customer_id.clone()
    }

    fn timestamps(&self) -> Option<&Timestamps> {
        Some(&self.timestamps)
    }

    fn timestamps_mut(&mut self) -> Option<&mut Timestamps> {
        Some(&mut self.timestamps)
    }
}

pub fn order(id: &str, customer_id: &str, total: f64) -> Order {
    Order {
        header: ItemHeader::with_id::<Order>(id),
        timestamps: Timestamps::default(),
        customer_id: customer_id.to_string(),
        total,
        status: "open".to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Invoice {
    #[serde(flatten)]
    pub header: ItemHeader,
    pub customer_id: String,
    pub total: f64,
}

impl Item for Invoice {
    const TYPE_NAME: &'static str = "Invoice";

    fn header(&self) -> &ItemHeader {
        &self.header
    }

    fn header_mut(&mut self) -> &mut ItemHeader {
        &mut self.header
    }

    fn partition_key_value(&self) -> String {
        self.customer_id.clone()
    }
}

pub fn invoice(id: &str, customer_id: &str, total: f64) -> Invoice {
    Invoice {
        header: ItemHeader::with_id::<Invoice>(id),
        customer_id: customer_id.to_string(),
        total,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    #[serde(flatten)]
    pub header: ItemHeader,
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub embeddings: Vec<f32>,
}

impl VectorSearchItem for Product {
    fn text(&self) -> String {
        format!("{} {}", self.name, self.description)
    }

    fn embeddings(&self) -> &[f32] {
        &self.embeddings
    }

    fn set_embeddings(&mut self, embeddings: Vec<f32>) {
        self.embeddings = embeddings;
    }
}

impl Item for Product {
    const TYPE_NAME: &'static str = "Product";

    fn header(&self) -> &ItemHeader {
        &self.header
    }

    fn header_mut(&mut self) -> &mut ItemHeader {
        &mut self.header
    }

    fn as_vector_search(&self) -> Option<&dyn VectorSearchItem> {
        Some(self)
    }

    fn as_vector_search_mut(&mut self) -> Option<&mut dyn VectorSearchItem> {
        Some(self)
    }
}

pub fn product(id: &str, name: &str, description: &str) -> Product {
    Product {
        header: ItemHeader::with_id::<Product>(id),
        name: name.to_string(),
        description: description.to_string(),
        embeddings: Vec::new(),
    }
}

/// Orders and invoices share `sales`; products carry 3-d embeddings.
pub fn shop_options() -> RepositoryOptions {
    RepositoryOptions::builder("shop")
        .container::<Order>(ContainerOptions::new("sales").with_partition_key_path("/customerId"))
        .container::<Invoice>(ContainerOptions::new("sales").with_partition_key_path("/customerId"))
        .container::<Product>(
            ContainerOptions::new("products")
                .with_vector_search(
                    "/embeddings",
                    VectorSearchOptions::default().with_dimensions(3),
                )
                .unwrap(),
        )
        .build()
        .unwrap()
}

/// Counts colour words: `[red, blue, green]`, offset so no vector is zero.
pub fn colour_embedding(text: &str) -> Result<Vec<f32>, EmbeddingError> {
    let text = text.to_ascii_lowercase();
    let count = |word: &str| text.matches(word).count() as f32 + 0.1;
    Ok(vec![count("red"), count("blue"), count("green")])
}

pub fn colour_backend() -> Arc<dyn EmbeddingBackend> {
    Arc::new(FnEmbeddingBackend::new(colour_embedding))
}

pub fn factory(store: Arc<dyn DocumentStore>) -> RepositoryFactory {
    RepositoryFactory::new(store, shop_options()).with_embedding_backend(colour_backend())
}
