//! Probe: Kalshi market listing
//!
//! Walks GET {KALSHI_API_BASE}/markets?status=open page by page and documents:
//! - Response shape and fields of a sample market
//! - Page count and cursor behaviour
//! - How many markets match the crypto keyword filter
//! - Latency per page

use std::collections::BTreeSet;
use std::time::Instant;

use anyhow::Result;
use kalshi_whale::KALSHI_API_BASE;
use kalshi_whale::source::{UpstreamMarket, filter_crypto};
use serde_json::Value;

/// Stop after this many pages so the probe stays quick.
const MAX_PAGES: usize = 10;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let base = std::env::var("KALSHI_API_BASE").unwrap_or_else(|_| KALSHI_API_BASE.to_string());
    let url = format!("{}/markets", base.trim_end_matches('/'));
    let client = reqwest::Client::new();

    println!("=== Probe: Kalshi markets ===");
    println!("URL: {url}");
    println!();

    let mut cursor: Option<String> = None;
    let mut all: Vec<UpstreamMarket> = Vec::new();
    let mut fields: BTreeSet<String> = BTreeSet::new();
    let mut sample: Option<Value> = None;

    for page in 1..=MAX_PAGES {
        let mut query = vec![("status", "open".to_string()), ("limit", "100".to_string())];
        if let Some(c) = &cursor {
            query.push(("cursor", c.clone()));
        }

        let start = Instant::now();
        let resp = client.get(&url).query(&query).send().await?;
        let latency = start.elapsed();
        let status = resp.status();
        let body: Value = resp.json().await?;

        let markets = body
            .get("markets")
            .and_then(|m| m.as_array())
            .cloned()
            .unwrap_or_default();
        println!(
            "Page {page}: status={status} markets={} latency={latency:?}",
            markets.len()
        );

        for m in &markets {
            if let Some(obj) = m.as_object() {
                fields.extend(obj.keys().cloned());
            }
            if sample.is_none() {
                sample = Some(m.clone());
            }
            if let Ok(parsed) = serde_json::from_value::<UpstreamMarket>(m.clone()) {
                all.push(parsed);
            }
        }

        cursor = body
            .get("cursor")
            .and_then(|c| c.as_str())
            .filter(|c| !c.is_empty())
            .map(str::to_string);
        if cursor.is_none() || markets.is_empty() {
            println!("No further cursor after page {page}");
            break;
        }
    }
    println!();

    println!("--- Fields present ---");
    for f in &fields {
        println!("  - {f}");
    }
    println!();

    if let Some(s) = &sample {
        println!("--- Sample market ---");
        println!("{}", serde_json::to_string_pretty(s)?);
        println!();
    }

    let total = all.len();
    let crypto = filter_crypto(all, chrono::Utc::now());
    println!("--- Crypto filter ---");
    println!("Matched {} of {total} markets", crypto.len());
    for m in crypto.iter().take(10) {
        println!(
            "  {:<30} vol={:>12.0} close={:>5.1}  {}",
            m.ticker, m.volume, m.close_price, m.title
        );
    }

    Ok(())
}
