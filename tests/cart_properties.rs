use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use std::collections::HashSet;
use till::domain::cart::{Cart, Product, ProductId};
use till::domain::money::Money;

fn random_catalog(rng: &mut StdRng) -> Vec<Product> {
    (0..8)
        .map(|i| {
            Product::new(
                format!("P{i}"),
                format!("Item {i}"),
                Money::from_minor(rng.gen_range(0..50_000)),
                rng.gen_range(1..20),
            )
        })
        .collect()
}

// Tax worked out in major units, the way a cashier would on paper.
fn expected_total(cart: &Cart) -> Money {
    let subtotal: Decimal = cart
        .items()
        .iter()
        .map(|l| {
            l.unit_price.to_decimal() * Decimal::from(l.quantity) - l.line_discount.to_decimal()
        })
        .sum();
    let tax = (subtotal * dec!(0.16))
        .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    Money::from_decimal(subtotal + tax).unwrap()
}

#[test]
fn test_random_edits_keep_cart_invariants() {
    let mut rng = StdRng::seed_from_u64(0x7111);

    for _ in 0..200 {
        let catalog = random_catalog(&mut rng);
        let mut cart = Cart::new();

        for _ in 0..30 {
            let product = &catalog[rng.gen_range(0..catalog.len())];
            match rng.gen_range(0..5) {
                0 | 1 => cart.add(product, product.price).unwrap(),
                2 => {
                    let qty = rng.gen_range(-2..6);
                    let present = cart.line(&product.id).is_some();
                    let result = cart.set_quantity(&product.id, qty);
                    assert_eq!(result.is_ok(), present || qty <= 0);
                }
                3 => {
                    if let Some(line) = cart.line(&product.id) {
                        let discount = Money::from_minor(rng.gen_range(0..=line.gross().minor()));
                        cart.set_line_discount(&product.id, discount).unwrap();
                    }
                }
                _ => {
                    cart.remove(&product.id);
                }
            }

            let mut seen = HashSet::new();
            for line in cart.items() {
                assert!(line.quantity >= 1);
                assert!(line.line_discount <= line.gross());
                assert!(seen.insert(line.product_id.clone()), "duplicate line");
            }
            let totals = cart.totals();
            assert_eq!(totals.subtotal + totals.tax, totals.total);
            assert_eq!(totals.total, expected_total(&cart));
        }
    }
}

#[test]
fn test_tax_rounds_to_nearest_cent() {
    let gum = Product::new("P1", "Gum", Money::from_minor(1), 100);
    let mut cart = Cart::new();
    cart.add(&gum, gum.price).unwrap();

    // Subtotal in cents -> VAT in cents.
    for (qty, tax) in [(3, 0), (4, 1), (15, 2), (22, 4), (28, 4)] {
        cart.set_quantity(&ProductId::new("P1"), qty).unwrap();
        assert_eq!(cart.totals().tax, Money::from_minor(tax), "subtotal {qty}");
    }
}
