use crate::domain::cart::Product;
use crate::domain::money::Money;
use crate::error::{CheckoutError, Result};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::io::Read;

#[derive(Debug, Deserialize)]
struct CatalogRow {
    id: String,
    name: String,
    price: Decimal,
    stock: u32,
}

impl TryFrom<CatalogRow> for Product {
    type Error = CheckoutError;

    fn try_from(row: CatalogRow) -> Result<Self> {
        if row.id.is_empty() {
            return Err(CheckoutError::InvalidProduct(format!(
                "'{}' has no product id",
                row.name
            )));
        }
        let price = Money::from_decimal(row.price)?;
        if price.is_negative() {
            return Err(CheckoutError::InvalidProduct(format!(
                "{} has a negative price",
                row.id
            )));
        }
        Ok(Product::new(row.id, row.name, price, row.stock))
    }
}

/// Reads a product catalog from CSV with columns `id, name, price, stock`.
///
/// Prices are major units (`120.50`). Whitespace around fields is trimmed.
pub struct CatalogReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> CatalogReader<R> {
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(source);
        Self { reader }
    }

    /// Lazily yields one product per row. A bad row does not stop the rest.
    pub fn products(self) -> impl Iterator<Item = Result<Product>> {
        self.reader
            .into_deserialize::<CatalogRow>()
            .map(|row| row.map_err(CheckoutError::from).and_then(Product::try_from))
    }
}
