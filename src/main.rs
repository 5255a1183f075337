use clap::Parser;
use miette::{IntoDiagnostic, Result, miette};
use std::fs::File;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use till::application::poller::PollPolicy;
use till::application::session::CheckoutSession;
use till::config::TillConfig;
use till::domain::cart::ProductId;
use till::domain::money::Money;
use till::domain::order::CustomerRef;
use till::domain::payment::PaymentMethod;
use till::infrastructure::in_memory::{InMemoryBackend, InMemoryGateway, ScriptStep};
use till::interfaces::csv::catalog_reader::CatalogReader;
use till::interfaces::text::receipt_printer::ReceiptPrinter;
use till::telemetry;

/// Rings up a sale against a product catalog and prints the receipt.
#[derive(Parser)]
#[command(name = "till", author, version, about, long_about = None)]
struct Cli {
    /// Product catalog CSV (id, name, price, stock)
    catalog: PathBuf,

    /// Item to sell, as ID or ID:QTY. Repeat for more lines.
    #[arg(long = "item", value_name = "ID[:QTY]", required = true)]
    items: Vec<String>,

    /// Attach a customer account to the order
    #[arg(long)]
    customer: Option<u64>,

    /// Pay in cash with this tendered amount
    #[arg(long, value_name = "AMOUNT", conflicts_with = "mobile", required_unless_present = "mobile")]
    cash: Option<String>,

    /// Pay by mobile money from this phone number
    #[arg(long, value_name = "PHONE")]
    mobile: Option<String>,

    /// Answers the simulated gateway gives to status queries, e.g. pending,error,0
    #[arg(long, value_delimiter = ',', default_value = "0")]
    gateway_script: Vec<ScriptStep>,

    /// Print the receipt as JSON
    #[arg(long)]
    json: bool,

    /// Settings file (TOML)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Overrides the configured log level
    #[arg(long)]
    log_level: Option<String>,
}

fn parse_item(arg: &str) -> Result<(ProductId, i64)> {
    match arg.split_once(':') {
        None => Ok((ProductId::new(arg.trim()), 1)),
        Some((id, qty)) => {
            let qty = qty
                .trim()
                .parse::<i64>()
                .map_err(|e| miette!("invalid quantity in --item {arg}: {e}"))?;
            Ok((ProductId::new(id.trim()), qty))
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = TillConfig::load(cli.config.as_deref()).into_diagnostic()?;
    telemetry::init(cli.log_level.as_deref().unwrap_or(&config.log_level));

    let backend = InMemoryBackend::new();
    let file = File::open(&cli.catalog).into_diagnostic()?;
    for product in CatalogReader::new(file).products() {
        match product {
            Ok(product) => backend.add_product(product).await,
            Err(e) => tracing::warn!(error = %e, "skipping catalog row"),
        }
    }
    let gateway = InMemoryGateway::scripted(cli.gateway_script);

    let mut session = CheckoutSession::new(Arc::new(backend.clone()), Arc::new(gateway))
        .with_country_code(config.country_code.clone());

    for arg in &cli.items {
        let (id, qty) = parse_item(arg)?;
        let product = backend
            .product(&id)
            .await
            .ok_or_else(|| miette!("product {id} is not in the catalog"))?;
        if session.cart().line(&id).is_none() {
            session.add_item(&product).into_diagnostic()?;
            session.set_quantity(&id, qty).into_diagnostic()?;
        } else {
            let current = session.cart().line(&id).map_or(0, |l| i64::from(l.quantity));
            session.set_quantity(&id, current.saturating_add(qty)).into_diagnostic()?;
        }
    }
    session
        .set_customer(cli.customer.map(CustomerRef))
        .into_diagnostic()?;

    let receipt = match (cli.cash, cli.mobile) {
        (Some(tendered), _) => {
            let tendered = Money::parse_major(&tendered).into_diagnostic()?;
            session.checkout(PaymentMethod::Cash).await.into_diagnostic()?;
            session.pay_cash(tendered).await.into_diagnostic()?
        }
        (None, Some(phone)) => {
            session
                .checkout(PaymentMethod::MobileMoney)
                .await
                .into_diagnostic()?;
            session.send_push(&phone).await.into_diagnostic()?;
            let policy = PollPolicy::from(&config.poll);
            session.await_payment(&policy).await.into_diagnostic()?
        }
        (None, None) => return Err(miette!("choose a payment method with --cash or --mobile")),
    };

    let mut printer = ReceiptPrinter::new(io::stdout().lock(), config.currency.clone());
    if cli.json {
        printer.print_json(&receipt).into_diagnostic()?;
    } else {
        printer.print_text(&receipt).into_diagnostic()?;
    }

    Ok(())
}
