use crate::domain::money::{Money, TaxRate};
use crate::domain::order::CustomerRef;
use crate::error::{CheckoutError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Catalog identifier of a product.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductId(String);

impl ProductId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProductId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProductId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// A product as last seen by the terminal.
///
/// `stock` is whatever count the caller last fetched; the cart never asks
/// the backend for fresher numbers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub price: Money,
    pub stock: u32,
}

impl Product {
    pub fn new(id: impl Into<String>, name: impl Into<String>, price: Money, stock: u32) -> Self {
        Self {
            id: ProductId::new(id),
            name: name.into(),
            price,
            stock,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    pub product_id: ProductId,
    pub name: String,
    pub unit_price: Money,
    /// Always at least 1 while the line is in a cart.
    pub quantity: u32,
    pub line_discount: Money,
}

impl LineItem {
    pub fn gross(&self) -> Money {
        self.unit_price.times(self.quantity)
    }

    /// Line amount after discount.
    pub fn net(&self) -> Money {
        self.gross() - self.line_discount
    }

    fn checked_net(&self) -> Option<Money> {
        self.unit_price
            .checked_times(self.quantity)?
            .checked_sub(self.line_discount)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Totals {
    pub subtotal: Money,
    pub tax: Money,
    pub total: Money,
}

impl Totals {
    /// Like [`Totals::of_lines`], but fails with `InvalidAmount` when any
    /// amount would not fit in `Money`.
    pub fn try_of_lines(lines: &[LineItem]) -> Result<Self> {
        let overflow = || CheckoutError::InvalidAmount("sale total is too large".into());
        let subtotal = lines.iter().try_fold(Money::ZERO, |sum, line| {
            line.checked_net().and_then(|net| sum.checked_add(net))
        });
        let subtotal = subtotal.ok_or_else(overflow)?;
        let tax = TaxRate::STANDARD.apply(subtotal);
        let total = subtotal.checked_add(tax).ok_or_else(overflow)?;
        Ok(Self {
            subtotal,
            tax,
            total,
        })
    }

    /// Derives tax and total from the given lines at the standard rate.
    ///
    /// Saturates on overflow; a [`Cart`] never holds lines for which that
    /// can happen.
    pub fn of_lines(lines: &[LineItem]) -> Self {
        let subtotal: Money = lines.iter().map(LineItem::net).sum();
        let tax = TaxRate::STANDARD.apply(subtotal);
        Self {
            subtotal,
            tax,
            total: subtotal + tax,
        }
    }
}

/// The line items of the sale being rung up.
///
/// Lines keep insertion order and each product appears at most once.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Cart {
    items: Vec<LineItem>,
    customer: Option<CustomerRef>,
}

impl Cart {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn items(&self) -> &[LineItem] {
        &self.items
    }

    pub fn customer(&self) -> Option<CustomerRef> {
        self.customer
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn line(&self, product_id: &ProductId) -> Option<&LineItem> {
        self.items.iter().find(|l| &l.product_id == product_id)
    }

    /// Adds one unit of `product` at `price_at_add`, merging into an
    /// existing line for the same product.
    pub fn add(&mut self, product: &Product, price_at_add: Money) -> Result<()> {
        if price_at_add.is_negative() {
            return Err(CheckoutError::InvalidProduct(format!(
                "{} has a negative price {price_at_add}",
                product.id
            )));
        }
        if product.stock == 0 {
            return Err(CheckoutError::InvalidProduct(format!(
                "{} is out of stock",
                product.id
            )));
        }

        let mut items = self.items.clone();
        match items.iter_mut().find(|l| l.product_id == product.id) {
            Some(line) => {
                line.quantity = line.quantity.checked_add(1).ok_or_else(|| {
                    CheckoutError::InvalidAmount(format!("quantity of {} is too large", product.id))
                })?;
            }
            None => items.push(LineItem {
                product_id: product.id.clone(),
                name: product.name.clone(),
                unit_price: price_at_add,
                quantity: 1,
                line_discount: Money::ZERO,
            }),
        }
        self.commit(items)
    }

    /// Replaces the quantity of a line; `qty <= 0` removes it.
    pub fn set_quantity(&mut self, product_id: &ProductId, qty: i64) -> Result<()> {
        if qty <= 0 {
            self.remove(product_id);
            return Ok(());
        }
        let quantity = u32::try_from(qty)
            .map_err(|_| CheckoutError::InvalidAmount(format!("quantity {qty} is too large")))?;
        let mut items = self.items.clone();
        let line = items
            .iter_mut()
            .find(|l| &l.product_id == product_id)
            .ok_or_else(|| CheckoutError::LineNotFound(product_id.clone()))?;
        line.quantity = quantity;
        let gross = line.unit_price.checked_times(quantity).ok_or_else(|| {
            CheckoutError::InvalidAmount(format!("quantity {qty} of {product_id} is too large"))
        })?;
        // Keep the discount within the (possibly smaller) line.
        line.line_discount = line.line_discount.min(gross);
        self.commit(items)
    }

    /// Sets a flat discount on one line.
    pub fn set_line_discount(&mut self, product_id: &ProductId, discount: Money) -> Result<()> {
        let line = self
            .items
            .iter_mut()
            .find(|l| &l.product_id == product_id)
            .ok_or_else(|| CheckoutError::LineNotFound(product_id.clone()))?;
        if discount.is_negative() || discount > line.gross() {
            return Err(CheckoutError::InvalidAmount(format!(
                "discount {discount} must be between 0 and {}",
                line.gross()
            )));
        }
        // A smaller net never overflows the totals the cart already holds.
        line.line_discount = discount;
        Ok(())
    }

    /// Removes a line. Returns whether a line was removed.
    pub fn remove(&mut self, product_id: &ProductId) -> bool {
        let before = self.items.len();
        self.items.retain(|l| &l.product_id != product_id);
        self.items.len() != before
    }

    pub fn set_customer(&mut self, customer: Option<CustomerRef>) {
        self.customer = customer;
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.customer = None;
    }

    /// Computed on every call so edits show up immediately.
    pub fn totals(&self) -> Totals {
        Totals::of_lines(&self.items)
    }

    // Every edit that can grow an amount goes through here, so the totals
    // of a cart always fit in `Money`.
    fn commit(&mut self, items: Vec<LineItem>) -> Result<()> {
        Totals::try_of_lines(&items)?;
        self.items = items;
        Ok(())
    }
}
