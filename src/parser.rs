// Upstream payload parsing - data.go.kr JSON envelopes → store rows
//
// Two feeds:
// - StanReginCd (legal-dong codes): {"StanReginCd":[{"head":[...]},{"row":[...]}]}
// - RTMSDataSvcAptTrade (apartment sales): {"response":{"header":{...},"body":{"items":{"item":...}}}}

use crate::db::{ApartmentTrade, Region};
use crate::error::{ImportError, ImportResult, RecordError};
use chrono::NaiveDate;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tracing::{debug, warn};

/// Upstream `dealAmount` is quoted in units of 10,000 won
pub const MANWON: i64 = 10_000;

// ============================================================================
// RAW RECORDS
// ============================================================================

/// Accept `"123"`, `123` or `" 12.5 "` and keep the trimmed text; blank → None
fn flexible_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value: Option<Value> = Option::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(s)) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        }
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RawRegionRow {
    #[serde(default, deserialize_with = "flexible_string")]
    pub region_cd: Option<String>,
    #[serde(default, deserialize_with = "flexible_string")]
    pub sido_cd: Option<String>,
    #[serde(default, deserialize_with = "flexible_string")]
    pub sgg_cd: Option<String>,
    #[serde(default, deserialize_with = "flexible_string")]
    pub umd_cd: Option<String>,
    #[serde(default, deserialize_with = "flexible_string")]
    pub ri_cd: Option<String>,
    #[serde(default, deserialize_with = "flexible_string")]
    pub locatjumin_cd: Option<String>,
    #[serde(default, deserialize_with = "flexible_string")]
    pub locatjijuk_cd: Option<String>,
    #[serde(default, deserialize_with = "flexible_string")]
    pub locatadd_nm: Option<String>,
    #[serde(default, deserialize_with = "flexible_string")]
    pub locat_order: Option<String>,
    #[serde(default, deserialize_with = "flexible_string")]
    pub locat_rm: Option<String>,
    #[serde(default, deserialize_with = "flexible_string")]
    pub locathigh_cd: Option<String>,
    #[serde(default, deserialize_with = "flexible_string")]
    pub locallow_nm: Option<String>,
    #[serde(default, deserialize_with = "flexible_string")]
    pub adpt_de: Option<String>,
}

/// One `item` of the RTMS apartment trade feed
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawTradeItem {
    #[serde(default, deserialize_with = "flexible_string")]
    pub apt_nm: Option<String>,
    #[serde(default, deserialize_with = "flexible_string")]
    pub deal_amount: Option<String>,
    #[serde(default, deserialize_with = "flexible_string")]
    pub deal_year: Option<String>,
    #[serde(default, deserialize_with = "flexible_string")]
    pub deal_month: Option<String>,
    #[serde(default, deserialize_with = "flexible_string")]
    pub deal_day: Option<String>,
    #[serde(default, deserialize_with = "flexible_string")]
    pub build_year: Option<String>,
    #[serde(default, deserialize_with = "flexible_string")]
    pub floor: Option<String>,
    #[serde(default, deserialize_with = "flexible_string")]
    pub exclu_use_ar: Option<String>,
    #[serde(default, deserialize_with = "flexible_string")]
    pub jibun: Option<String>,
    #[serde(default, deserialize_with = "flexible_string")]
    pub umd_nm: Option<String>,
}

// ============================================================================
// ENVELOPES
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RegionPage {
    /// Only reported in the head block; present on every page but read from page 1
    pub total_count: Option<u64>,
    pub rows: Vec<RawRegionRow>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TradePage {
    pub items: Vec<RawTradeItem>,
    /// Items whose JSON shape could not be read at all
    pub unreadable: usize,
}

/// Parse one StanReginCd page.
///
/// "No data" (`INFO-200`) is an empty page, other RESULT codes are errors.
pub fn parse_region_page(body: &str) -> ImportResult<RegionPage> {
    let json: Value = serde_json::from_str(body)?;

    if let Some(result) = json.get("RESULT") {
        let code = result["resultCode"].as_str().unwrap_or_default();
        let message = result["resultMsg"].as_str().unwrap_or_default();
        return match code {
            "INFO-200" => Ok(RegionPage::default()),
            _ => Err(ImportError::Api {
                code: code.to_string(),
                message: message.to_string(),
            }),
        };
    }

    let Some(sections) = json.get("StanReginCd").and_then(Value::as_array) else {
        return Ok(RegionPage::default());
    };

    let mut page = RegionPage::default();
    for section in sections {
        if let Some(head) = section.get("head").and_then(Value::as_array) {
            page.total_count = head
                .iter()
                .find_map(|h| h.get("totalCount"))
                .and_then(|v| v.as_u64().or_else(|| v.as_str()?.parse().ok()));
        }
        if let Some(rows) = section.get("row").and_then(Value::as_array) {
            for row in rows {
                match RawRegionRow::deserialize(row) {
                    Ok(r) => page.rows.push(r),
                    Err(e) => warn!("Skipping unreadable region row: {}", e),
                }
            }
        }
    }

    Ok(page)
}

fn is_success_code(code: &str) -> bool {
    matches!(code, "00" | "000")
}

/// RTMS answers an empty month with NODATA_ERROR
fn is_no_data_code(code: &str) -> bool {
    code == "03"
}

/// Parse the RTMS trade response.
///
/// The feed sometimes answers with something that is not JSON at all (XML
/// error pages, truncated bodies); that is treated as an empty month, as is
/// the no-data result code.
pub fn parse_trade_response(body: &str) -> ImportResult<TradePage> {
    let json: Value = match serde_json::from_str(body) {
        Ok(v) => v,
        Err(e) => {
            let snippet: String = body.chars().take(100).collect();
            warn!(error = %e, snippet = %snippet, "Trade response is not JSON, treating as empty");
            return Ok(TradePage::default());
        }
    };

    if let Some(header) = json.pointer("/response/header") {
        let code = header["resultCode"]
            .as_str()
            .map(str::to_string)
            .or_else(|| header["resultCode"].as_i64().map(|c| format!("{:02}", c)))
            .unwrap_or_default();
        if is_no_data_code(&code) {
            debug!(code = %code, "No trades reported for this month");
            return Ok(TradePage::default());
        }
        if !code.is_empty() && !is_success_code(&code) {
            return Err(ImportError::Api {
                code,
                message: header["resultMsg"].as_str().unwrap_or_default().to_string(),
            });
        }
    }

    let items = match json.pointer("/response/body/items/item") {
        Some(Value::Array(list)) => list.iter().collect::<Vec<_>>(),
        Some(obj @ Value::Object(_)) => vec![obj],
        _ => Vec::new(),
    };

    let mut page = TradePage::default();
    for item in items {
        match RawTradeItem::deserialize(item) {
            Ok(t) => page.items.push(t),
            Err(e) => {
                warn!("Skipping unreadable trade item: {}", e);
                page.unreadable += 1;
            }
        }
    }
    Ok(page)
}

// ============================================================================
// RECORD TRANSFORMS
// ============================================================================

/// Rows without a region code are dropped
pub fn region_from_row(row: RawRegionRow) -> Option<Region> {
    let region_cd = row.region_cd.filter(|c| !c.is_empty())?;
    Some(Region {
        region_cd,
        sido_cd: row.sido_cd,
        sgg_cd: row.sgg_cd,
        umd_cd: row.umd_cd,
        ri_cd: row.ri_cd,
        locatjumin_cd: row.locatjumin_cd,
        locatjijuk_cd: row.locatjijuk_cd,
        locatadd_nm: row.locatadd_nm,
        locat_order: row.locat_order.and_then(|o| o.parse().ok()),
        locat_rm: row.locat_rm,
        locathigh_cd: row.locathigh_cd,
        locallow_nm: row.locallow_nm,
        adpt_de: row.adpt_de,
    })
}

/// `"115,000"` (만원) → 1_150_000_000 won. A sale always has a positive price.
pub fn parse_deal_amount(raw: &str) -> Option<i64> {
    let digits: String = raw.chars().filter(|c| !matches!(c, ',' | ' ')).collect();
    digits
        .parse::<i64>()
        .ok()
        .filter(|&manwon| manwon > 0)?
        .checked_mul(MANWON)
}

fn required<'a>(value: &'a Option<String>, field: &'static str) -> Result<&'a str, RecordError> {
    value.as_deref().ok_or(RecordError::MissingField(field))
}

fn optional_int(value: &Option<String>, field: &'static str) -> Result<Option<i32>, RecordError> {
    match value.as_deref() {
        None => Ok(None),
        Some(v) => v.parse().map(Some).map_err(|_| RecordError::InvalidNumber {
            field,
            value: v.to_string(),
        }),
    }
}

/// Map an upstream trade item to a row for the given district
pub fn trade_from_item(
    item: &RawTradeItem,
    sgg_cd: &str,
    sgg_nm: &str,
) -> Result<ApartmentTrade, RecordError> {
    let amount_raw = required(&item.deal_amount, "dealAmount")?;
    let deal_amount = parse_deal_amount(amount_raw).ok_or_else(|| RecordError::InvalidNumber {
        field: "dealAmount",
        value: amount_raw.to_string(),
    })?;

    let year = required(&item.deal_year, "dealYear")?;
    let month = required(&item.deal_month, "dealMonth")?;
    let day = required(&item.deal_day, "dealDay")?;
    let invalid_date = || RecordError::InvalidDate {
        year: year.to_string(),
        month: month.to_string(),
        day: day.to_string(),
    };
    let (deal_year, deal_month, deal_day) = match (year.parse::<i32>(), month.parse::<u32>(), day.parse::<u32>()) {
        (Ok(y), Ok(m), Ok(d)) => (y, m, d),
        _ => return Err(invalid_date()),
    };
    let deal_date = NaiveDate::from_ymd_opt(deal_year, deal_month, deal_day).ok_or_else(invalid_date)?;

    let apt_name = required(&item.apt_nm, "aptNm")?.to_string();

    let area_raw = required(&item.exclu_use_ar, "excluUseAr")?;
    let exclu_use_ar: f64 = area_raw
        .parse()
        .ok()
        .filter(|a: &f64| a.is_finite() && *a > 0.0)
        .ok_or_else(|| RecordError::InvalidNumber {
            field: "excluUseAr",
            value: area_raw.to_string(),
        })?;

    Ok(ApartmentTrade {
        id: 0,
        deal_amount,
        deal_year,
        deal_month,
        deal_day,
        deal_date,
        apt_name,
        build_year: optional_int(&item.build_year, "buildYear")?,
        floor: optional_int(&item.floor, "floor")?,
        exclu_use_ar,
        jibun: item.jibun.clone().unwrap_or_default(),
        sgg_cd: sgg_cd.to_string(),
        sgg_nm: sgg_nm.to_string(),
        umd_nm: item.umd_nm.clone().unwrap_or_default(),
    })
}

/// Transform a page of items, logging and dropping the malformed ones
pub fn transform_trades(
    items: &[RawTradeItem],
    sgg_cd: &str,
    sgg_nm: &str,
) -> (Vec<ApartmentTrade>, usize) {
    let mut trades = Vec::with_capacity(items.len());
    let mut skipped = 0;
    for item in items {
        match trade_from_item(item, sgg_cd, sgg_nm) {
            Ok(trade) => trades.push(trade),
            Err(e) => {
                warn!(sgg_cd, apt = ?item.apt_nm, "Skipping trade record: {}", e);
                skipped += 1;
            }
        }
    }
    (trades, skipped)
}
