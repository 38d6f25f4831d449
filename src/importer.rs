// Batch import: public-data API → SQLite
//
// Plain loops with fixed delays. Trade months are fetched in fixed-size
// concurrent batches, everything is written from the driving task.

use crate::client::{RegionSource, TradeSource};
use crate::config::ImporterConfig;
use crate::db::{self, GradeDefinition, Region};
use crate::parser::{region_from_row, transform_trades, RawRegionRow, TradePage};
use crate::error::ImportResult;
use anyhow::{Context, Result};
use chrono::{Datelike, Local, NaiveDate};
use rusqlite::Connection;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn};

/// Above this many rows the region table is treated as fully seeded
pub const REGION_SEEDED_THRESHOLD: i64 = 20_000;

/// Counters reported by every import command
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportReport {
    pub requests: usize,
    pub failed_requests: usize,
    /// Records received from upstream
    pub fetched: usize,
    /// Records that survived parsing
    pub parsed: usize,
    pub skipped_records: usize,
    pub inserted: usize,
    pub duplicates: usize,
    /// Nothing was fetched because the table already looked complete
    pub already_seeded: bool,
}

// ============================================================================
// REGIONS
// ============================================================================

#[derive(Debug, Clone)]
pub struct RegionImportSettings {
    pub page_size: u32,
    pub delay: Duration,
    pub insert_batch: usize,
    pub seeded_threshold: i64,
}

impl From<&ImporterConfig> for RegionImportSettings {
    fn from(config: &ImporterConfig) -> Self {
        Self {
            page_size: config.page_size.max(1),
            delay: config.region_delay(),
            insert_batch: 1000,
            seeded_threshold: REGION_SEEDED_THRESHOLD,
        }
    }
}

/// Fetch every legal-dong code page and replace the region table.
///
/// A failing page aborts the region import; nothing is deleted in that case.
#[instrument(skip_all)]
pub async fn seed_regions<S>(
    conn: &Connection,
    source: &S,
    settings: &RegionImportSettings,
) -> Result<ImportReport>
where
    S: RegionSource + ?Sized,
{
    let mut report = ImportReport::default();

    let existing = db::count_regions(conn)?;
    if existing > settings.seeded_threshold {
        info!(existing, "Region data already seeded, skipping");
        report.already_seeded = true;
        return Ok(report);
    }

    let mut rows: Vec<RawRegionRow> = Vec::new();
    let mut total_count: Option<u64> = None;
    let mut page_no: u32 = 1;

    loop {
        debug!(page_no, "Fetching region page");
        let page = source
            .fetch_region_page(page_no, settings.page_size)
            .await
            .with_context(|| format!("Failed to fetch region page {}", page_no))?;
        report.requests += 1;

        if page.rows.is_empty() {
            info!(page_no, "No more region data");
            break;
        }

        if page_no == 1 {
            total_count = page.total_count.filter(|&t| t > 0);
            if let Some(total) = total_count {
                info!(total, "Total regions to fetch");
            }
        }

        rows.extend(page.rows);
        info!(page_no, so_far = rows.len(), "Fetched region page");

        if matches!(total_count, Some(total) if rows.len() as u64 >= total) {
            info!("Fetched all regions");
            break;
        }

        page_no += 1;
        tokio::time::sleep(settings.delay).await;
    }

    report.fetched = rows.len();
    let regions: Vec<Region> = rows.into_iter().filter_map(region_from_row).collect();
    report.parsed = regions.len();
    report.skipped_records = report.fetched - report.parsed;

    if existing > 0 {
        info!(existing, "Replacing partially seeded regions");
    }

    let (_, stats) = db::replace_regions(conn, &regions, settings.insert_batch)?;
    report.inserted = stats.inserted;
    report.duplicates = stats.duplicates;

    info!(
        inserted = report.inserted,
        skipped = report.skipped_records,
        "Region data seeded"
    );
    Ok(report)
}

// ============================================================================
// APARTMENT TRADES
// ============================================================================

#[derive(Debug, Clone)]
pub struct TradeImportSettings {
    pub years: Vec<i32>,
    pub concurrency: usize,
    pub delay: Duration,
    /// Months after this date have no trades yet and are not requested
    pub today: NaiveDate,
}

impl TradeImportSettings {
    pub fn from_config(config: &ImporterConfig) -> Self {
        Self {
            years: config.years.clone(),
            concurrency: config.concurrency.max(1),
            delay: config.trade_delay(),
            today: Local::now().date_naive(),
        }
    }
}

/// One upstream request: a district and a month
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TradeJob {
    pub sgg_cd: String,
    pub sgg_nm: String,
    pub deal_ymd: String,
}

pub fn deal_ymd(year: i32, month: u32) -> String {
    format!("{}{:02}", year, month)
}

/// Districts × years × months, skipping months that have not started yet
pub fn trade_jobs(definitions: &[GradeDefinition], years: &[i32], today: NaiveDate) -> Vec<TradeJob> {
    let current = (today.year(), today.month());
    let mut jobs = Vec::new();

    for def in definitions {
        for &year in years {
            for month in 1..=12u32 {
                if (year, month) > current {
                    break;
                }
                jobs.push(TradeJob {
                    sgg_cd: def.sgg_cd.clone(),
                    sgg_nm: def.sgg_nm.clone(),
                    deal_ymd: deal_ymd(year, month),
                });
            }
        }
    }

    jobs
}

/// Fetch trades for every graded district and insert them, skipping duplicates.
///
/// Request failures are logged and counted, they never abort the run.
#[instrument(skip_all, fields(years = ?settings.years))]
pub async fn seed_trades<S>(
    conn: &Connection,
    source: Arc<S>,
    settings: &TradeImportSettings,
) -> Result<ImportReport>
where
    S: TradeSource + 'static,
{
    let mut report = ImportReport::default();

    let definitions = db::list_grade_definitions(conn)?;
    if definitions.is_empty() {
        warn!("No grade definitions found, run seed-grades first");
        return Ok(report);
    }

    let jobs = trade_jobs(&definitions, &settings.years, settings.today);
    let batch_count = jobs.len().div_ceil(settings.concurrency.max(1));
    info!(
        districts = definitions.len(),
        requests = jobs.len(),
        "Starting apartment trade import"
    );

    for (batch_no, batch) in jobs.chunks(settings.concurrency.max(1)).enumerate() {
        let mut set: JoinSet<(TradeJob, ImportResult<TradePage>)> = JoinSet::new();
        for job in batch {
            let source = Arc::clone(&source);
            let job = job.clone();
            set.spawn(async move {
                let result = source.fetch_trades(&job.sgg_cd, &job.deal_ymd).await;
                (job, result)
            });
        }

        let mut results = Vec::with_capacity(batch.len());
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(outcome) => results.push(outcome),
                Err(e) => {
                    error!("Trade fetch task failed: {}", e);
                    report.requests += 1;
                    report.failed_requests += 1;
                }
            }
        }
        // Insert in request order so logs read district by district
        results.sort_by(|a, b| (&a.0.sgg_cd, &a.0.deal_ymd).cmp(&(&b.0.sgg_cd, &b.0.deal_ymd)));

        for (job, result) in results {
            report.requests += 1;
            let page = match result {
                Ok(page) => page,
                Err(e) => {
                    report.failed_requests += 1;
                    error!(sgg_cd = %job.sgg_cd, deal_ymd = %job.deal_ymd, "Trade request failed: {}", e);
                    continue;
                }
            };

            report.fetched += page.items.len() + page.unreadable;
            let (trades, skipped) = transform_trades(&page.items, &job.sgg_cd, &job.sgg_nm);
            report.skipped_records += skipped + page.unreadable;
            report.parsed += trades.len();

            if trades.is_empty() {
                debug!(sgg_cd = %job.sgg_cd, deal_ymd = %job.deal_ymd, "No valid trades");
                continue;
            }

            let stats = db::insert_trades(conn, &trades)?;
            report.inserted += stats.inserted;
            report.duplicates += stats.duplicates;
            info!(
                sgg = %job.sgg_nm,
                deal_ymd = %job.deal_ymd,
                saved = stats.inserted,
                "Trades saved"
            );
        }

        // Fixed pause between batches keeps us under the API rate limit
        if batch_no + 1 < batch_count {
            tokio::time::sleep(settings.delay).await;
        }
    }

    info!(
        inserted = report.inserted,
        failed_requests = report.failed_requests,
        "Apartment trade import complete"
    );
    Ok(report)
}

/// Drop every stored trade before a fresh import
pub fn purge_trades(conn: &Connection) -> Result<usize> {
    let deleted = db::delete_trades(conn)?;
    info!(deleted, "Deleted stored apartment trades");
    Ok(deleted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{RegionSource, TradeSource};
    use crate::db::tests::test_conn;
    use crate::error::ImportError;
    use crate::grades::seed_grades_from;
    use crate::grades::DistrictGrade;
    use crate::parser::{RawTradeItem, RegionPage};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    // ------------------------------------------------------------------
    // Fakes
    // ------------------------------------------------------------------

    struct FakeRegions {
        pages: Vec<RegionPage>,
        calls: Mutex<Vec<u32>>,
    }

    #[async_trait]
    impl RegionSource for FakeRegions {
        async fn fetch_region_page(&self, page_no: u32, _rows: u32) -> ImportResult<RegionPage> {
            self.calls.lock().unwrap().push(page_no);
            Ok(self
                .pages
                .get(page_no as usize - 1)
                .cloned()
                .unwrap_or_default())
        }
    }

    struct FailingRegions;

    #[async_trait]
    impl RegionSource for FailingRegions {
        async fn fetch_region_page(&self, _page_no: u32, _rows: u32) -> ImportResult<RegionPage> {
            Err(ImportError::Status {
                status: 503,
                url: "test".to_string(),
            })
        }
    }

    #[derive(Default)]
    struct FakeTrades {
        pages: HashMap<(String, String), Vec<RawTradeItem>>,
        failing: Vec<(String, String)>,
        calls: Mutex<usize>,
    }

    #[async_trait]
    impl TradeSource for FakeTrades {
        async fn fetch_trades(&self, sgg_cd: &str, deal_ymd: &str) -> ImportResult<TradePage> {
            *self.calls.lock().unwrap() += 1;
            let key = (sgg_cd.to_string(), deal_ymd.to_string());
            if self.failing.contains(&key) {
                return Err(ImportError::Api {
                    code: "22".to_string(),
                    message: "LIMITED_NUMBER_OF_SERVICE_REQUESTS_EXCEEDS_ERROR".to_string(),
                });
            }
            Ok(TradePage {
                items: self.pages.get(&key).cloned().unwrap_or_default(),
                unreadable: 0,
            })
        }
    }

    fn region_row(code: &str) -> RawRegionRow {
        RawRegionRow {
            region_cd: Some(code.to_string()),
            locatadd_nm: Some(format!("지역 {}", code)),
            ..Default::default()
        }
    }

    fn region_page(codes: &[&str], total: u64) -> RegionPage {
        RegionPage {
            total_count: Some(total),
            rows: codes.iter().map(|c| region_row(c)).collect(),
        }
    }

    fn region_settings() -> RegionImportSettings {
        RegionImportSettings {
            page_size: 2,
            delay: Duration::ZERO,
            insert_batch: 2,
            seeded_threshold: REGION_SEEDED_THRESHOLD,
        }
    }

    fn trade_item(name: &str, amount: &str, month: u32, day: u32) -> RawTradeItem {
        RawTradeItem {
            apt_nm: Some(name.to_string()),
            deal_amount: Some(amount.to_string()),
            deal_year: Some("2024".to_string()),
            deal_month: Some(month.to_string()),
            deal_day: Some(day.to_string()),
            build_year: Some("2010".to_string()),
            floor: Some("7".to_string()),
            exclu_use_ar: Some("84.99".to_string()),
            jibun: Some("12".to_string()),
            umd_nm: Some("대치동".to_string()),
        }
    }

    fn seed_two_districts(conn: &Connection) {
        let row = |cd: &str, nm: &str, grade: &str| DistrictGrade {
            sgg_cd: cd.to_string(),
            sgg_nm: nm.to_string(),
            sido_nm: "서울특별시".to_string(),
            grade: grade.to_string(),
        };
        seed_grades_from(
            conn,
            &[
                row("11680", "서울특별시 강남구", "1급지"),
                row("11320", "서울특별시 도봉구", "4급지"),
            ],
        )
        .unwrap();
    }

    fn trade_settings(today: NaiveDate) -> TradeImportSettings {
        TradeImportSettings {
            years: vec![2024],
            concurrency: 3,
            delay: Duration::ZERO,
            today,
        }
    }

    // ------------------------------------------------------------------
    // Regions
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn test_region_import_stops_at_total_count() {
        let conn = test_conn();
        let source = FakeRegions {
            pages: vec![
                region_page(&["1100000000", "1111000000"], 3),
                region_page(&["1111010100", ""], 3),
                region_page(&["9999999999"], 3),
            ],
            calls: Mutex::new(Vec::new()),
        };

        let report = seed_regions(&conn, &source, &region_settings()).await.unwrap();

        assert_eq!(*source.calls.lock().unwrap(), vec![1, 2]);
        assert_eq!(report.fetched, 4);
        assert_eq!(report.parsed, 3);
        assert_eq!(report.skipped_records, 1);
        assert_eq!(report.inserted, 3);
        assert_eq!(db::count_regions(&conn).unwrap(), 3);
    }

    #[tokio::test]
    async fn test_region_import_stops_on_empty_page() {
        let conn = test_conn();
        let source = FakeRegions {
            pages: vec![RegionPage {
                total_count: None,
                rows: vec![region_row("1100000000")],
            }],
            calls: Mutex::new(Vec::new()),
        };

        let report = seed_regions(&conn, &source, &region_settings()).await.unwrap();
        assert_eq!(*source.calls.lock().unwrap(), vec![1, 2]);
        assert_eq!(report.inserted, 1);
    }

    #[tokio::test]
    async fn test_region_import_skips_when_seeded() {
        let conn = test_conn();
        let existing: Vec<Region> = ["1", "2", "3"]
            .iter()
            .filter_map(|c| region_from_row(region_row(c)))
            .collect();
        db::insert_regions(&conn, &existing).unwrap();

        let source = FakeRegions {
            pages: vec![region_page(&["1100000000"], 1)],
            calls: Mutex::new(Vec::new()),
        };
        let settings = RegionImportSettings {
            seeded_threshold: 2,
            ..region_settings()
        };

        let report = seed_regions(&conn, &source, &settings).await.unwrap();
        assert!(report.already_seeded);
        assert!(source.calls.lock().unwrap().is_empty());
        assert_eq!(db::count_regions(&conn).unwrap(), 3);
    }

    #[tokio::test]
    async fn test_region_import_replaces_partial_data() {
        let conn = test_conn();
        let stale = region_from_row(region_row("0000000000")).unwrap();
        db::insert_regions(&conn, &[stale]).unwrap();

        let source = FakeRegions {
            pages: vec![region_page(&["1100000000", "1111000000"], 2)],
            calls: Mutex::new(Vec::new()),
        };

        let report = seed_regions(&conn, &source, &region_settings()).await.unwrap();
        assert_eq!(report.inserted, 2);
        assert_eq!(db::count_regions(&conn).unwrap(), 2);
    }

    #[tokio::test]
    async fn test_region_fetch_failure_keeps_existing_rows() {
        let conn = test_conn();
        let stale = region_from_row(region_row("0000000000")).unwrap();
        db::insert_regions(&conn, &[stale]).unwrap();

        let err = seed_regions(&conn, &FailingRegions, &region_settings())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("region page 1"));
        assert_eq!(db::count_regions(&conn).unwrap(), 1);
    }

    // ------------------------------------------------------------------
    // Trades
    // ------------------------------------------------------------------

    #[test]
    fn test_trade_jobs_skip_future_months() {
        let defs = vec![GradeDefinition {
            sgg_cd: "11680".to_string(),
            sgg_nm: "서울특별시 강남구".to_string(),
            sido_nm: "서울특별시".to_string(),
            grade_id: 1,
        }];
        let today = NaiveDate::from_ymd_opt(2024, 3, 10).unwrap();

        let jobs = trade_jobs(&defs, &[2023, 2024], today);
        assert_eq!(jobs.len(), 12 + 3);
        assert_eq!(jobs[0].deal_ymd, "202301");
        assert_eq!(jobs.last().unwrap().deal_ymd, "202403");

        assert!(trade_jobs(&defs, &[2025], today).is_empty());
    }

    #[tokio::test]
    async fn test_trade_import_is_idempotent() {
        let conn = test_conn();
        seed_two_districts(&conn);

        let mut fake = FakeTrades::default();
        fake.pages.insert(
            ("11680".to_string(), "202401".to_string()),
            vec![trade_item("래미안", "250,000", 1, 5), trade_item("자이", "180,000", 1, 9)],
        );
        fake.pages.insert(
            ("11320".to_string(), "202402".to_string()),
            vec![trade_item("북한산아이파크", "55,000", 2, 1)],
        );
        let source = Arc::new(fake);
        let settings = trade_settings(NaiveDate::from_ymd_opt(2024, 12, 31).unwrap());

        let first = seed_trades(&conn, Arc::clone(&source), &settings).await.unwrap();
        let second = seed_trades(&conn, Arc::clone(&source), &settings).await.unwrap();

        assert_eq!(first.requests, 24);
        assert_eq!(first.inserted, 3);
        assert_eq!(second.inserted, 0);
        assert_eq!(second.duplicates, 3);
        assert_eq!(db::count_trades(&conn).unwrap(), 3);
        assert_eq!(*source.calls.lock().unwrap(), 48);
    }

    #[tokio::test]
    async fn test_trade_import_excludes_malformed_and_survives_failures() {
        let conn = test_conn();
        seed_two_districts(&conn);

        let mut broken_date = trade_item("깨진날짜", "90,000", 2, 30);
        broken_date.deal_day = Some("30".to_string());
        let mut no_amount = trade_item("가격없음", "1", 1, 1);
        no_amount.deal_amount = None;

        let mut fake = FakeTrades::default();
        fake.pages.insert(
            ("11680".to_string(), "202402".to_string()),
            vec![trade_item("래미안", "250,000", 2, 3), broken_date, no_amount],
        );
        fake.failing.push(("11680".to_string(), "202401".to_string()));
        let source = Arc::new(fake);
        let settings = trade_settings(NaiveDate::from_ymd_opt(2024, 2, 15).unwrap());

        let report = seed_trades(&conn, source, &settings).await.unwrap();

        assert_eq!(report.requests, 4);
        assert_eq!(report.failed_requests, 1);
        assert_eq!(report.fetched, 3);
        assert_eq!(report.parsed, 1);
        assert_eq!(report.skipped_records, 2);
        assert_eq!(report.inserted, 1);

        let stored = db::list_trades(
            &conn,
            &db::TradeFilter {
                sgg_cd: None,
                page: 1,
                limit: 10,
            },
        )
        .unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].apt_name, "래미안");
        assert_eq!(stored[0].sgg_nm, "서울특별시 강남구");
        assert_eq!(stored[0].deal_amount, 2_500_000_000);
    }

    #[tokio::test]
    async fn test_trade_import_without_grades_does_nothing() {
        let conn = test_conn();
        let source = Arc::new(FakeTrades::default());
        let settings = trade_settings(NaiveDate::from_ymd_opt(2024, 12, 31).unwrap());

        let report = seed_trades(&conn, Arc::clone(&source), &settings).await.unwrap();
        assert_eq!(report, ImportReport::default());
        assert_eq!(*source.calls.lock().unwrap(), 0);
    }

    #[test]
    fn test_purge_trades() {
        let conn = test_conn();
        db::insert_trades(
            &conn,
            &[crate::db::tests::create_test_trade("A", "11680", 1, "2024-01-01", 84.0)],
        )
        .unwrap();
        assert_eq!(purge_trades(&conn).unwrap(), 1);
        assert_eq!(db::count_trades(&conn).unwrap(), 0);
    }
}
