//! Output formatting for CLI
//!
//! Provides consistent output formatting across all commands:
//! - Human-readable default output
//! - JSON output (--json flag)
//! - Quiet mode for scripting (--quiet flag)

use std::io::{self, Write};

use anyhow::Result;
use serde::Serialize;

use casefile_core::{format_size, ConnectionEndpoint, Customer, FileAttachment, Order};

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable output (default)
    Human,
    /// JSON output
    Json,
    /// Quiet mode - minimal output
    Quiet,
}

impl OutputFormat {
    /// Create format from CLI flags
    pub fn from_flags(json: bool, quiet: bool) -> Self {
        if quiet {
            OutputFormat::Quiet
        } else if json {
            OutputFormat::Json
        } else {
            OutputFormat::Human
        }
    }
}

/// Output helper for consistent formatting
pub struct Output {
    /// The output format
    pub format: OutputFormat,
}

impl Output {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Check if output is in quiet mode
    pub fn is_quiet(&self) -> bool {
        matches!(self.format, OutputFormat::Quiet)
    }

    /// Print a single customer with its orders
    pub fn print_customer(&self, customer: &Customer) -> Result<()> {
        match self.format {
            OutputFormat::Human => {
                println!("ID:       {}", customer.id);
                println!("Name:     {}", customer.name);
                print_field("Address:", &customer.address);
                print_field("Phone:", &customer.phone);
                print_field("Email:", &customer.email);
                print_field("NHI:", &customer.national_health_insurance_id);
                print_field("Note:", &customer.note);

                if !customer.orders.is_empty() {
                    println!();
                    println!(
                        "── Orders ({}, {} file(s)) ──",
                        customer.orders.len(),
                        customer.file_count()
                    );
                    for order in &customer.orders {
                        println!(
                            "{} | {} | {} | {} file(s)",
                            short_id(&order.id.to_string()),
                            order.start_date.format("%Y-%m-%d"),
                            truncate(&order.order_number, 20),
                            order.files.len()
                        );
                    }
                }
            }
            OutputFormat::Json => print_json(&serde_json::json!({
                "customer": customer,
                "orders": customer.orders,
            }))?,
            OutputFormat::Quiet => println!("{}", customer.id),
        }
        Ok(())
    }

    /// Print a list of customers
    pub fn print_customers(&self, customers: &[Customer]) -> Result<()> {
        match self.format {
            OutputFormat::Human => {
                if customers.is_empty() {
                    println!("No customers found.");
                    return Ok(());
                }
                for customer in customers {
                    let orders_indicator = if customer.orders.is_empty() {
                        String::new()
                    } else {
                        format!(" [{}]", customer.orders.len())
                    };
                    println!(
                        "{} | {}{} | {}",
                        short_id(&customer.id.to_string()),
                        truncate(&customer.name, 30),
                        orders_indicator,
                        truncate(&customer.phone, 20)
                    );
                }
                println!("\n{} customer(s)", customers.len());
            }
            OutputFormat::Json => print_json(customers)?,
            OutputFormat::Quiet => {
                for customer in customers {
                    println!("{}", customer.id);
                }
            }
        }
        Ok(())
    }

    /// Print a single order with its files and customer
    pub fn print_order(&self, order: &Order) -> Result<()> {
        match self.format {
            OutputFormat::Human => {
                println!("ID:       {}", order.id);
                println!("Number:   {}", order.order_number);
                println!("Started:  {}", order.start_date.format("%Y-%m-%d %H:%M"));
                match &order.customer {
                    Some(customer) => println!("Customer: {} ({})", customer.name, customer.id),
                    None => println!("Customer: (unassigned)"),
                }
                print_field("Note:", &order.note);

                if !order.files.is_empty() {
                    println!();
                    println!("── Files ({}) ──", order.files.len());
                    for file in &order.files {
                        println!(
                            "{} | {} | {}",
                            short_id(&file.id.to_string()),
                            truncate(&file.name, 40),
                            file.content_type
                        );
                    }
                }
            }
            OutputFormat::Json => print_json(&serde_json::json!({
                "order": order,
                "customer": order.customer,
                "files": order.files,
            }))?,
            OutputFormat::Quiet => println!("{}", order.id),
        }
        Ok(())
    }

    /// Print a list of orders
    pub fn print_orders(&self, orders: &[Order]) -> Result<()> {
        match self.format {
            OutputFormat::Human => {
                if orders.is_empty() {
                    println!("No orders found.");
                    return Ok(());
                }
                for order in orders {
                    let customer = order
                        .customer
                        .as_ref()
                        .map(|c| c.name.as_str())
                        .unwrap_or("-");
                    println!(
                        "{} | {} | {} | {} | {} file(s)",
                        short_id(&order.id.to_string()),
                        order.start_date.format("%Y-%m-%d"),
                        truncate(&order.order_number, 20),
                        truncate(customer, 25),
                        order.files.len()
                    );
                }
                println!("\n{} order(s)", orders.len());
            }
            OutputFormat::Json => print_json(orders)?,
            OutputFormat::Quiet => {
                for order in orders {
                    println!("{}", order.id);
                }
            }
        }
        Ok(())
    }

    /// Print file metadata; the payload itself is never printed
    pub fn print_file(&self, file: &FileAttachment) -> Result<()> {
        let size = file.content.as_ref().map_or(0, |c| c.len() as u64);
        match self.format {
            OutputFormat::Human => {
                println!("ID:       {}", file.id);
                println!("Name:     {}", file.name);
                println!("Order:    {}", file.order_id);
                print_field("Type:", &file.content_type);
                print_field("Hash:", &file.hash_code);
                print_field("Note:", &file.note);
                println!("Size:     {}", format_size(size));
            }
            OutputFormat::Json => print_json(&serde_json::json!({
                "id": file.id,
                "order_id": file.order_id,
                "name": file.name,
                "content_type": file.content_type,
                "note": file.note,
                "hash_code": file.hash_code,
                "size": size,
            }))?,
            OutputFormat::Quiet => println!("{}", file.id),
        }
        Ok(())
    }

    /// Print a list of connection endpoints
    pub fn print_connections(&self, endpoints: &[ConnectionEndpoint]) -> Result<()> {
        match self.format {
            OutputFormat::Human => {
                if endpoints.is_empty() {
                    println!("No connections found.");
                    return Ok(());
                }
                for endpoint in endpoints {
                    println!(
                        "{} | {} | server {} | device {}",
                        short_id(&endpoint.id.to_string()),
                        truncate(&endpoint.url, 40),
                        truncate(&endpoint.server_key, 16),
                        truncate(&endpoint.device_key, 16)
                    );
                }
                println!("\n{} connection(s)", endpoints.len());
            }
            OutputFormat::Json => print_json(endpoints)?,
            OutputFormat::Quiet => {
                for endpoint in endpoints {
                    println!("{}", endpoint.id);
                }
            }
        }
        Ok(())
    }

    /// Print a success message
    pub fn success(&self, message: &str) {
        match self.format {
            OutputFormat::Human => println!("✓ {}", message),
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::json!({"status": "success", "message": message})
                );
            }
            OutputFormat::Quiet => {}
        }
    }

    /// Check if we should prompt for confirmation
    pub fn should_prompt(&self) -> bool {
        self.format == OutputFormat::Human
    }

    /// Print an informational message
    pub fn message(&self, msg: &str) {
        match self.format {
            OutputFormat::Human => println!("{}", msg),
            OutputFormat::Json => {
                println!("{}", serde_json::json!({"message": msg}));
            }
            OutputFormat::Quiet => {}
        }
    }

    /// Progress reporter for long transfers, if this format shows one
    ///
    /// Writes a single updating line to stderr.
    pub fn progress(&self, label: &'static str) -> Option<impl FnMut(f32) + Send> {
        if self.format != OutputFormat::Human {
            return None;
        }
        let mut shown = None;
        Some(move |percent: f32| {
            let whole = percent.round() as u32;
            if shown != Some(whole) {
                shown = Some(whole);
                eprint!("\r{}... {:>3}%", label, whole);
                let _ = io::stderr().flush();
            }
        })
    }

    /// End the progress line started by [`Output::progress`]
    pub fn finish_progress(&self) {
        if self.format == OutputFormat::Human {
            eprintln!();
        }
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_field(label: &str, value: &str) {
    if !value.is_empty() {
        println!("{:<9} {}", label, value);
    }
}

/// First eight characters of an ID
fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}

/// Truncate a string to max length, adding "..." if truncated
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_from_flags() {
        assert_eq!(OutputFormat::from_flags(false, false), OutputFormat::Human);
        assert_eq!(OutputFormat::from_flags(true, false), OutputFormat::Json);
        assert_eq!(OutputFormat::from_flags(false, true), OutputFormat::Quiet);
        // Quiet takes precedence
        assert_eq!(OutputFormat::from_flags(true, true), OutputFormat::Quiet);
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("this is a long string", 10), "this is...");
        assert_eq!(truncate("Åsa Öberg-Lindqvist", 8), "Åsa Ö...");
    }

    #[test]
    fn test_short_id() {
        assert_eq!(short_id("0123456789abcdef"), "01234567");
        assert_eq!(short_id("abc"), "abc");
    }

    #[test]
    fn test_progress_only_for_humans() {
        assert!(Output::new(OutputFormat::Json).progress("Exporting").is_none());
        assert!(Output::new(OutputFormat::Quiet).progress("Exporting").is_none());
        assert!(Output::new(OutputFormat::Human).progress("Exporting").is_some());
    }
}
