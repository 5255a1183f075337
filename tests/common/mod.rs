#![allow(dead_code)]

use std::fs::File;
use std::io::Error;
use std::path::Path;
use std::sync::Arc;
use till::application::session::CheckoutSession;
use till::domain::cart::{Product, ProductId};
use till::domain::money::Money;
use till::infrastructure::in_memory::{InMemoryBackend, InMemoryGateway, ScriptStep};

/// The three products the checkout scenarios ring up.
pub fn products() -> Vec<Product> {
    vec![
        Product::new("P1", "Cooking oil 1L", Money::from_minor(10_000), 10),
        Product::new("P2", "Bar soap", Money::from_minor(5_000), 10),
        Product::new("P7", "Bread 400g", Money::from_minor(5_500), 1),
    ]
}

pub fn backend() -> InMemoryBackend {
    InMemoryBackend::with_catalog(products())
}

pub struct Till {
    pub session: CheckoutSession,
    pub backend: InMemoryBackend,
    pub gateway: InMemoryGateway,
}

pub fn till(script: Vec<ScriptStep>) -> Till {
    let backend = backend();
    let gateway = InMemoryGateway::scripted(script);
    let session = CheckoutSession::new(Arc::new(backend.clone()), Arc::new(gateway.clone()));
    Till {
        session,
        backend,
        gateway,
    }
}

/// Rings up 2 x P1 and 1 x P2: subtotal 250.00, VAT 40.00, total 290.00.
pub async fn ring_up_standard_basket(till: &mut Till) {
    for (id, qty) in [("P1", 2), ("P2", 1)] {
        let product = till.backend.product(&ProductId::new(id)).await.unwrap();
        till.session.add_item(&product).unwrap();
        till.session.set_quantity(&product.id, qty).unwrap();
    }
}

pub fn write_catalog(path: &Path, products: &[Product]) -> Result<(), Error> {
    let file = File::create(path)?;
    let mut wtr = csv::WriterBuilder::new().from_writer(file);

    wtr.write_record(["id", "name", "price", "stock"])?;
    for product in products {
        wtr.write_record([
            product.id.as_str(),
            product.name.as_str(),
            &product.price.to_string(),
            &product.stock.to_string(),
        ])?;
    }

    wtr.flush()?;
    Ok(())
}
