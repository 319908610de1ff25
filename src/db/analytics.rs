//! Read-side aggregates over persisted events
//!
//! Backs `GET /v1/analytics` and the `stats` subcommand. All queries run on
//! a separate read connection so they never hold up batch commits (WAL).

use crate::error::DbResult;
use crate::event::EventType;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;

/// Summary of the funnel and purchase values
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalyticsSummary {
    pub total_page_views: u64,
    pub total_add_to_carts: u64,
    pub total_purchases: u64,
    /// Purchases per page view, in percent, two decimals
    pub conversion_rate: f64,
    pub average_purchase_value: f64,
    pub max_purchase_value: f64,
    pub min_purchase_value: f64,
    /// Most viewed product, if any page view carried a product id
    pub top_product_id: Option<String>,
}

/// Aggregate purchase amounts
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct PurchaseStats {
    pub avg: f64,
    pub max: f64,
    pub min: f64,
}

/// A persisted event row
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventRecord {
    pub id: i64,
    pub event_type: String,
    pub timestamp: DateTime<Utc>,
    pub product_id: Option<String>,
    pub order_amount: Option<f64>,
    pub created_at: String,
}

/// Round to two decimal places
fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Count events of one type
pub fn count_by_type(conn: &Connection, event_type: EventType) -> DbResult<u64> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM events WHERE event_type = ?1",
        params![event_type.as_str()],
        |row| row.get(0),
    )?;
    Ok(count as u64)
}

/// Average/max/min over purchases that carry an amount; zeros when none do
pub fn purchase_stats(conn: &Connection) -> DbResult<PurchaseStats> {
    let (avg, max, min): (Option<f64>, Option<f64>, Option<f64>) = conn.query_row(
        "SELECT AVG(order_amount), MAX(order_amount), MIN(order_amount)
         FROM events
         WHERE event_type = 'purchase' AND order_amount IS NOT NULL",
        [],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
    )?;

    Ok(PurchaseStats {
        avg: avg.map(round2).unwrap_or(0.0),
        max: max.map(round2).unwrap_or(0.0),
        min: min.map(round2).unwrap_or(0.0),
    })
}

/// Product with the most page views
pub fn top_viewed_product(conn: &Connection) -> DbResult<Option<String>> {
    let product = conn
        .query_row(
            "SELECT product_id
             FROM events
             WHERE event_type = 'page_view' AND product_id IS NOT NULL
             GROUP BY product_id
             ORDER BY COUNT(*) DESC, product_id ASC
             LIMIT 1",
            [],
            |row| row.get(0),
        )
        .optional()?;
    Ok(product)
}

/// Compute the full summary
pub fn summarize(conn: &Connection) -> DbResult<AnalyticsSummary> {
    let page_views = count_by_type(conn, EventType::PageView)?;
    let add_to_carts = count_by_type(conn, EventType::AddToCart)?;
    let purchases = count_by_type(conn, EventType::Purchase)?;
    let stats = purchase_stats(conn)?;
    let top_product_id = top_viewed_product(conn)?;

    let conversion_rate = if page_views > 0 {
        round2(purchases as f64 / page_views as f64 * 100.0)
    } else {
        0.0
    };

    Ok(AnalyticsSummary {
        total_page_views: page_views,
        total_add_to_carts: add_to_carts,
        total_purchases: purchases,
        conversion_rate,
        average_purchase_value: stats.avg,
        max_purchase_value: stats.max,
        min_purchase_value: stats.min,
        top_product_id,
    })
}

/// Total number of persisted events
pub fn total_events(conn: &Connection) -> DbResult<u64> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM events", [], |row| row.get(0))?;
    Ok(count as u64)
}

/// Most recent events, newest first
pub fn recent_events(conn: &Connection, limit: usize) -> DbResult<Vec<EventRecord>> {
    let mut stmt = conn.prepare(
        "SELECT id, event_type, timestamp, product_id, order_amount, created_at
         FROM events ORDER BY id DESC LIMIT ?1",
    )?;

    let rows = stmt.query_map(params![limit as i64], |row| {
        let raw_ts: String = row.get(2)?;
        let timestamp = DateTime::parse_from_rfc3339(&raw_ts)
            .map(|ts| ts.with_timezone(&Utc))
            .map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
            })?;

        Ok(EventRecord {
            id: row.get(0)?,
            event_type: row.get(1)?,
            timestamp,
            product_id: row.get(3)?,
            order_amount: row.get(4)?,
            created_at: row.get(5)?,
        })
    })?;

    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}
