use anyhow::{Context, Result, bail};
use csv::ReaderBuilder;
use serde::Deserialize;
use std::path::Path;

pub const SYMBOL_COLUMN: &str = "Symbol";
pub const COMPANY_COLUMN: &str = "Company Name";

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct TickerListing {
    #[serde(rename = "Symbol")]
    pub symbol: String,
    #[serde(rename = "Company Name", default)]
    pub company_name: Option<String>,
}

impl TickerListing {
    /// Company name when the list has one, otherwise the symbol.
    pub fn display_name(&self) -> &str {
        self.company_name
            .as_deref()
            .filter(|n| !n.is_empty())
            .unwrap_or(&self.symbol)
    }
}

fn verify_required_columns(headers: &csv::StringRecord, required: &[&str], path: &Path) -> Result<()> {
    for column in required {
        if !headers.iter().any(|h| h == *column) {
            bail!("{} must contain a '{}' column", path.display(), column);
        }
    }
    Ok(())
}

/// Reads one ticker list. Extra columns are ignored; blank symbols are
/// dropped.
pub fn load_ticker_file(path: &Path, required: &[&str]) -> Result<Vec<TickerListing>> {
    let mut rdr = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .with_context(|| format!("failed to open ticker list {}", path.display()))?;

    let headers = rdr.headers()?.clone();
    verify_required_columns(&headers, required, path)?;

    let mut listings = Vec::new();
    for record in rdr.deserialize::<TickerListing>() {
        let listing = record.with_context(|| format!("bad row in {}", path.display()))?;
        if !listing.symbol.is_empty() {
            listings.push(listing);
        }
    }
    Ok(listings)
}

/// Concatenates several ticker lists in order.
pub fn load_ticker_files<P: AsRef<Path>>(paths: &[P], required: &[&str]) -> Result<Vec<TickerListing>> {
    let mut all = Vec::new();
    for path in paths {
        all.extend(load_ticker_file(path.as_ref(), required)?);
    }
    Ok(all)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn reads_and_concatenates_lists() {
        let tmp = TempDir::new().unwrap();
        let a = tmp.path().join("large.csv");
        let b = tmp.path().join("small.csv");
        fs::write(&a, "Company Name,Industry,Symbol,Series\nRail Vikas Nigam Ltd.,Construction,RVNL,EQ\n").unwrap();
        fs::write(&b, "Symbol,Company Name\nTITAGARH, Titagarh Rail Systems Ltd. \n,\n").unwrap();

        let listings = load_ticker_files(&[&a, &b], &[SYMBOL_COLUMN, COMPANY_COLUMN]).unwrap();
        assert_eq!(listings.len(), 2);
        assert_eq!(listings[0].symbol, "RVNL");
        assert_eq!(listings[1].display_name(), "Titagarh Rail Systems Ltd.");
    }

    #[test]
    fn missing_required_column_is_named() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("list.csv");
        fs::write(&path, "Symbol\nRVNL\n").unwrap();

        assert!(load_ticker_file(&path, &[SYMBOL_COLUMN]).is_ok());
        let err = load_ticker_file(&path, &[SYMBOL_COLUMN, COMPANY_COLUMN]).unwrap_err();
        assert!(err.to_string().contains("Company Name"));
    }

    #[test]
    fn display_name_falls_back_to_symbol() {
        let listing = TickerListing {
            symbol: "JWL".to_string(),
            company_name: None,
        };
        assert_eq!(listing.display_name(), "JWL");
    }
}
