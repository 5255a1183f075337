pub mod receipt_printer;
