use crate::domain::money::TaxRate;
use crate::domain::receipt::Receipt;
use crate::error::Result;
use std::io::Write;

const WIDTH: usize = 40;

/// Writes receipts for the customer, as text or JSON.
pub struct ReceiptPrinter<W: Write> {
    writer: W,
    currency: String,
}

impl<W: Write> ReceiptPrinter<W> {
    pub fn new(writer: W, currency: impl Into<String>) -> Self {
        Self {
            writer,
            currency: currency.into(),
        }
    }

    pub fn print_text(&mut self, receipt: &Receipt) -> Result<()> {
        let rule = "-".repeat(WIDTH);
        let w = &mut self.writer;

        writeln!(w, "Order {}", receipt.order_number)?;
        writeln!(w, "{}", receipt.issued_at.format("%Y-%m-%d %H:%M:%S UTC"))?;
        if let Some(customer) = receipt.customer {
            writeln!(w, "Customer #{}", customer.0)?;
        }
        writeln!(w, "{rule}")?;
        for line in &receipt.lines {
            writeln!(w, "{}", line.name)?;
            let detail = format!("  {} x {}", line.quantity, line.unit_price);
            writeln!(w, "{}", columns(&detail, &line.gross().format(&self.currency)))?;
            if line.line_discount.minor() > 0 {
                let discount = format!("-{}", line.line_discount.format(&self.currency));
                writeln!(w, "{}", columns("  discount", &discount))?;
            }
        }
        writeln!(w, "{rule}")?;
        writeln!(w, "{}", columns("Subtotal", &receipt.subtotal.format(&self.currency)))?;
        let vat = format!("VAT {}", TaxRate::STANDARD);
        writeln!(w, "{}", columns(&vat, &receipt.tax.format(&self.currency)))?;
        writeln!(w, "{}", columns("TOTAL", &receipt.total.format(&self.currency)))?;
        writeln!(w, "{rule}")?;

        let paid = format!("Paid ({})", receipt.method);
        writeln!(w, "{}", columns(&paid, &receipt.tendered.format(&self.currency)))?;
        if let Some(change) = receipt.change {
            writeln!(w, "{}", columns("Change", &change.format(&self.currency)))?;
        }
        if let Some(external_ref) = &receipt.external_ref {
            writeln!(w, "{}", columns("Reference", external_ref.as_str()))?;
        }
        w.flush()?;
        Ok(())
    }

    pub fn print_json(&mut self, receipt: &Receipt) -> Result<()> {
        serde_json::to_writer_pretty(&mut self.writer, receipt).map_err(std::io::Error::from)?;
        writeln!(self.writer)?;
        self.writer.flush()?;
        Ok(())
    }
}

fn columns(left: &str, right: &str) -> String {
    let pad = WIDTH.saturating_sub(left.chars().count() + right.chars().count()).max(1);
    format!("{left}{}{right}", " ".repeat(pad))
}
