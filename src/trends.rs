// Price trends for one apartment size

use crate::db::{amount_as_string, TrendPoint};
use chrono::{Datelike, Months, NaiveDate};
use serde::Serialize;
use std::collections::BTreeMap;

pub const DEFAULT_LOOKBACK_YEARS: u32 = 2;
pub const MAX_LOOKBACK_YEARS: u32 = 10;

/// Same calendar day `years` back; Feb 29 lands on Feb 28
pub fn lookback_start(today: NaiveDate, years: u32) -> NaiveDate {
    today
        .checked_sub_months(Months::new(years.saturating_mul(12)))
        .unwrap_or(NaiveDate::MIN)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthlyAverage {
    /// `YYYY-MM`
    pub month: String,
    #[serde(serialize_with = "amount_as_string")]
    pub average_amount: i64,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrendSummary {
    pub count: usize,
    pub first_date: NaiveDate,
    pub last_date: NaiveDate,
    #[serde(serialize_with = "amount_as_string")]
    pub first_amount: i64,
    #[serde(serialize_with = "amount_as_string")]
    pub last_amount: i64,
    #[serde(serialize_with = "amount_as_string")]
    pub min_amount: i64,
    #[serde(serialize_with = "amount_as_string")]
    pub max_amount: i64,
    /// Percent change from the first to the last trade
    pub change_rate: f64,
}

/// Average price per month, oldest month first
pub fn monthly_average(points: &[TrendPoint]) -> Vec<MonthlyAverage> {
    let mut buckets: BTreeMap<(i32, u32), (i128, usize)> = BTreeMap::new();
    for p in points {
        let entry = buckets
            .entry((p.deal_date.year(), p.deal_date.month()))
            .or_default();
        entry.0 += i128::from(p.deal_amount);
        entry.1 += 1;
    }

    buckets
        .into_iter()
        .map(|((year, month), (sum, count))| MonthlyAverage {
            month: format!("{:04}-{:02}", year, month),
            average_amount: (sum / count as i128) as i64,
            count,
        })
        .collect()
}

/// `None` for an empty series. Points are expected in date order.
pub fn summarize(points: &[TrendPoint]) -> Option<TrendSummary> {
    let first = points.first()?;
    let last = points.last()?;
    let min_amount = points.iter().map(|p| p.deal_amount).min()?;
    let max_amount = points.iter().map(|p| p.deal_amount).max()?;

    let change_rate = if first.deal_amount == 0 {
        0.0
    } else {
        let rate = (last.deal_amount - first.deal_amount) as f64 / first.deal_amount as f64 * 100.0;
        (rate * 100.0).round() / 100.0
    };

    Some(TrendSummary {
        count: points.len(),
        first_date: first.deal_date,
        last_date: last.deal_date,
        first_amount: first.deal_amount,
        last_amount: last.deal_amount,
        min_amount,
        max_amount,
        change_rate,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn point(d: &str, amount: i64) -> TrendPoint {
        TrendPoint {
            deal_date: date(d),
            deal_amount: amount,
        }
    }

    #[test]
    fn test_lookback_start() {
        assert_eq!(lookback_start(date("2024-06-15"), 2), date("2022-06-15"));
        assert_eq!(lookback_start(date("2024-02-29"), 1), date("2023-02-28"));
        assert_eq!(lookback_start(date("2024-02-29"), 4), date("2020-02-29"));
    }

    #[test]
    fn test_monthly_average() {
        let points = vec![
            point("2023-12-30", 900),
            point("2024-01-03", 1000),
            point("2024-01-20", 1100),
            point("2024-03-01", 1300),
        ];
        let months = monthly_average(&points);
        assert_eq!(months.len(), 3);
        assert_eq!(months[0].month, "2023-12");
        assert_eq!(months[1].average_amount, 1050);
        assert_eq!(months[1].count, 2);
        assert_eq!(months[2].month, "2024-03");
    }

    #[test]
    fn test_summarize() {
        assert!(summarize(&[]).is_none());

        let summary = summarize(&[
            point("2024-01-01", 1_000_000_000),
            point("2024-02-01", 900_000_000),
            point("2024-03-01", 1_150_000_000),
        ])
        .unwrap();
        assert_eq!(summary.count, 3);
        assert_eq!(summary.min_amount, 900_000_000);
        assert_eq!(summary.max_amount, 1_150_000_000);
        assert_eq!(summary.last_date, date("2024-03-01"));
        assert!((summary.change_rate - 15.0).abs() < 1e-9);
    }

    #[test]
    fn test_summary_serializes_amounts_as_strings() {
        let summary = summarize(&[point("2024-01-01", 5)]).unwrap();
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["firstAmount"], "5");
        assert_eq!(json["firstDate"], "2024-01-01");
        assert_eq!(json["changeRate"], 0.0);
    }
}
