//! Command handlers

pub mod config;
pub mod connection;
pub mod customer;
pub mod file;
pub mod order;
pub mod status;
pub mod transfer;

use std::io::{self, IsTerminal, Write};

use anyhow::{bail, Context, Result};
use uuid::Uuid;

use casefile_core::Page;

/// Resolve a full UUID or a unique prefix against `known` IDs
pub fn resolve_id(id: &str, kind: &str, known: impl IntoIterator<Item = Uuid>) -> Result<Uuid> {
    // Try full UUID first
    if let Ok(uuid) = Uuid::parse_str(id) {
        return Ok(uuid);
    }

    let prefix = id.to_lowercase();
    let matches: Vec<Uuid> = known
        .into_iter()
        .filter(|known| known.to_string().starts_with(&prefix))
        .collect();

    match matches.len() {
        0 => bail!("No {} found matching: {}", kind, id),
        1 => Ok(matches[0]),
        _ => {
            eprintln!("Multiple {}s match '{}':", kind, id);
            for uuid in &matches {
                eprintln!("  {}", uuid);
            }
            bail!("Ambiguous ID. Please provide more characters.");
        }
    }
}

/// Parse a full UUID
pub fn parse_full_id(id: &str, kind: &str) -> Result<Uuid> {
    Uuid::parse_str(id).with_context(|| format!("Invalid {} ID (expected a full UUID): {}", kind, id))
}

/// Validate a 1-based `--page` argument
pub fn parse_page(page: Option<u32>) -> Result<Option<Page>> {
    match page {
        None => Ok(None),
        Some(n) => match Page::new(n) {
            Some(page) => Ok(Some(page)),
            None => bail!("Pages start at 1"),
        },
    }
}

/// Ask a yes/no question; non-interactive stdin answers no
pub fn confirm(prompt: &str) -> Result<bool> {
    if !io::stdin().is_terminal() {
        return Ok(false);
    }

    print!("{} [y/N] ", prompt);
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;

    let input = input.trim().to_lowercase();
    Ok(input == "y" || input == "yes")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_full_uuid() {
        let id = Uuid::new_v4();
        assert_eq!(resolve_id(&id.to_string(), "customer", []).unwrap(), id);
    }

    #[test]
    fn test_resolve_prefix() {
        let a = Uuid::parse_str("aaaaaaaa-0000-4000-8000-000000000001").unwrap();
        let b = Uuid::parse_str("abbbbbbb-0000-4000-8000-000000000002").unwrap();

        assert_eq!(resolve_id("AB", "order", [a, b]).unwrap(), b);
        assert!(resolve_id("a", "order", [a, b]).is_err());
        assert!(resolve_id("c", "order", [a, b]).is_err());
    }

    #[test]
    fn test_parse_page() {
        assert_eq!(parse_page(None).unwrap(), None);
        assert_eq!(parse_page(Some(2)).unwrap().map(|p| p.number()), Some(2));
        assert!(parse_page(Some(0)).is_err());
    }
}
