use std::time::Duration;

use tracing::{debug, info};

use crate::config::Config;
use crate::error::{AppError, Result};
use crate::types::Market;

#[derive(Debug, Default)]
pub struct FetchStats {
    pub api_total: usize,
    pub rejected_no_condition_id: usize,
    pub rejected_no_question: usize,
    pub qualified: usize,
}

/// Fetch active markets from the Gamma REST API, newest first, paging until
/// `max_markets` or the API runs dry. Markets are kept raw-payload-and-all so
/// future inference versions can reprocess without refetching.
pub async fn fetch_markets(cfg: &Config, max_markets: usize) -> Result<(Vec<Market>, FetchStats)> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()?;

    let mut markets = Vec::new();
    let mut stats = FetchStats::default();
    let mut offset = 0usize;
    let page_size = 500usize;

    'outer: loop {
        let url = format!(
            "{}/markets?active=true&closed=false&limit={}&offset={}&order=startDate&ascending=false",
            cfg.gamma_api_url, page_size, offset
        );
        debug!(url = %url, "Fetching Gamma page");

        let resp: serde_json::Value = client.get(&url).send().await?.json().await?;
        let items = match resp.as_array() {
            Some(a) => a.clone(),
            None => {
                return Err(AppError::Ingest(
                    "Gamma /markets response was not an array".to_string(),
                ))
            }
        };

        if items.is_empty() {
            break;
        }
        stats.api_total += items.len();

        for item in &items {
            match parse_gamma_market(item) {
                Ok(market) => {
                    markets.push(market);
                    if markets.len() >= max_markets {
                        break 'outer;
                    }
                }
                Err(Rejection::NoConditionId) => stats.rejected_no_condition_id += 1,
                Err(Rejection::NoQuestion) => stats.rejected_no_question += 1,
            }
        }

        if items.len() < page_size {
            break;
        }
        offset += page_size;
    }

    stats.qualified = markets.len();
    info!(
        api_total = stats.api_total,
        qualified = stats.qualified,
        "Fetched markets from Gamma"
    );
    Ok((markets, stats))
}

enum Rejection {
    NoConditionId,
    NoQuestion,
}

/// Parse one Gamma market object. Numeric fields arrive as either JSON
/// numbers or strings depending on the endpoint vintage, so both are
/// accepted.
fn parse_gamma_market(v: &serde_json::Value) -> std::result::Result<Market, Rejection> {
    let condition_id = v
        .get("conditionId")
        .and_then(|s| s.as_str())
        .unwrap_or("")
        .to_string();
    if condition_id.is_empty() {
        return Err(Rejection::NoConditionId);
    }

    let question = v
        .get("question")
        .and_then(|q| q.as_str())
        .unwrap_or("")
        .to_string();
    if question.is_empty() {
        return Err(Rejection::NoQuestion);
    }

    let description = v
        .get("description")
        .and_then(|d| d.as_str())
        .filter(|d| !d.is_empty())
        .map(|d| d.to_string());

    let market_slug = v.get("slug").and_then(|s| s.as_str()).map(|s| s.to_string());

    let category = v
        .get("events")
        .and_then(|e| e.as_array())
        .and_then(|a| a.first())
        .and_then(|e| e.get("category"))
        .and_then(|c| c.as_str())
        .or_else(|| v.get("category").and_then(|c| c.as_str()))
        .map(|c| c.to_string());

    let end_date_iso = v
        .get("endDateIso")
        .and_then(|e| e.as_str())
        .map(|s| s.to_string());

    let tags = v
        .get("tags")
        .and_then(|t| t.as_array())
        .map(|a| {
            a.iter()
                .filter_map(|t| {
                    t.as_str()
                        .map(|s| s.to_string())
                        .or_else(|| t.get("label").and_then(|l| l.as_str()).map(|s| s.to_string()))
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(Market {
        condition_id,
        question,
        description,
        market_slug,
        category,
        end_date_iso,
        active: v.get("active").and_then(|a| a.as_bool()).unwrap_or(true),
        closed: v.get("closed").and_then(|c| c.as_bool()).unwrap_or(false),
        volume: num_field(v, "volume"),
        liquidity: num_field(v, "liquidityNum").or_else(|| num_field(v, "liquidity")),
        tags,
        raw_payload: v.clone(),
    })
}

fn num_field(v: &serde_json::Value, key: &str) -> Option<f64> {
    v.get(key)
        .and_then(|x| x.as_f64().or_else(|| x.as_str().and_then(|s| s.parse().ok())))
}
