use anyhow::{Context, Result};
use chrono::NaiveDate;
use rusqlite::{params, Connection, Row, Statement};
use serde::{Serialize, Serializer};
use sha2::{Digest, Sha256};

/// Legal-dong code record (StanReginCd)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Region {
    pub region_cd: String,
    pub sido_cd: Option<String>,
    pub sgg_cd: Option<String>,
    pub umd_cd: Option<String>,
    pub ri_cd: Option<String>,
    pub locatjumin_cd: Option<String>,
    pub locatjijuk_cd: Option<String>,
    pub locatadd_nm: Option<String>,
    pub locat_order: Option<i64>,
    pub locat_rm: Option<String>,
    pub locathigh_cd: Option<String>,
    pub locallow_nm: Option<String>,
    pub adpt_de: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Grade {
    pub id: i64,
    pub name: String,
}

/// Maps an SGG district to a grade
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeDefinition {
    pub sgg_cd: String,
    pub sgg_nm: String,
    pub sido_nm: String,
    pub grade_id: i64,
}

/// One apartment sale from the RTMS feed. `id` is 0 until the row is stored.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApartmentTrade {
    pub id: i64,
    /// Price in won
    #[serde(serialize_with = "amount_as_string")]
    pub deal_amount: i64,
    pub deal_year: i32,
    pub deal_month: u32,
    pub deal_day: u32,
    pub deal_date: NaiveDate,
    pub apt_name: String,
    pub build_year: Option<i32>,
    pub floor: Option<i32>,
    /// Exclusive use area in square meters
    pub exclu_use_ar: f64,
    pub jibun: String,
    pub sgg_cd: String,
    pub sgg_nm: String,
    pub umd_nm: String,
}

/// Prices go out as strings so JavaScript clients never round them
pub fn amount_as_string<S: Serializer>(amount: &i64, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&amount.to_string())
}

impl ApartmentTrade {
    /// Key for duplicate detection: the same sale reported twice hashes the same.
    /// Area keeps the feed's four decimals; unit types in one complex can
    /// differ only past the second.
    pub fn compute_dedupe_key(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(format!(
            "{}|{}|{}|{}|{}|{:.4}|{}",
            self.sgg_cd,
            self.apt_name,
            self.deal_date,
            self.deal_amount,
            self.floor.map(|f| f.to_string()).unwrap_or_default(),
            self.exclu_use_ar,
            self.jibun
        ));
        format!("{:x}", hasher.finalize())
    }
}

/// Date/price pair for trend charts
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrendPoint {
    pub deal_date: NaiveDate,
    #[serde(serialize_with = "amount_as_string")]
    pub deal_amount: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: i64,
    pub email: String,
    pub name: Option<String>,
    pub created_at: String,
}

/// Paging and filtering for the trade listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TradeFilter {
    pub sgg_cd: Option<String>,
    pub page: u32,
    pub limit: u32,
}

impl TradeFilter {
    pub fn offset(&self) -> i64 {
        i64::from(self.page.saturating_sub(1)) * i64::from(self.limit)
    }
}

/// Result of a batch insert
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InsertStats {
    pub inserted: usize,
    pub duplicates: usize,
}

impl InsertStats {
    fn add(&mut self, other: InsertStats) {
        self.inserted += other.inserted;
        self.duplicates += other.duplicates;
    }
}

// ============================================================================
// Schema
// ============================================================================

/// Open (or create) the database file and make sure the schema exists
pub fn open_database(path: &std::path::Path) -> Result<Connection> {
    let conn = Connection::open(path)
        .with_context(|| format!("Failed to open database at {}", path.display()))?;
    setup_database(&conn)?;
    Ok(conn)
}

pub fn setup_database(conn: &Connection) -> Result<()> {
    // WAL lets the API read while an import is writing
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;

    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS regions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            region_cd TEXT UNIQUE NOT NULL,
            sido_cd TEXT,
            sgg_cd TEXT,
            umd_cd TEXT,
            ri_cd TEXT,
            locatjumin_cd TEXT,
            locatjijuk_cd TEXT,
            locatadd_nm TEXT,
            locat_order INTEGER,
            locat_rm TEXT,
            locathigh_cd TEXT,
            locallow_nm TEXT,
            adpt_de TEXT
        );

        CREATE TABLE IF NOT EXISTS grades (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT UNIQUE NOT NULL
        );

        CREATE TABLE IF NOT EXISTS grade_definitions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            sgg_cd TEXT UNIQUE NOT NULL,
            sgg_nm TEXT NOT NULL,
            sido_nm TEXT NOT NULL,
            grade_id INTEGER NOT NULL REFERENCES grades(id)
        );

        CREATE TABLE IF NOT EXISTS apartment_trades (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            dedupe_key TEXT UNIQUE NOT NULL,
            deal_amount INTEGER NOT NULL,
            deal_year INTEGER NOT NULL,
            deal_month INTEGER NOT NULL,
            deal_day INTEGER NOT NULL,
            deal_date TEXT NOT NULL,
            apt_name TEXT NOT NULL,
            build_year INTEGER,
            floor INTEGER,
            exclu_use_ar REAL NOT NULL,
            jibun TEXT NOT NULL,
            sgg_cd TEXT NOT NULL,
            sgg_nm TEXT NOT NULL,
            umd_nm TEXT NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        );

        CREATE TABLE IF NOT EXISTS users (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            email TEXT UNIQUE NOT NULL,
            name TEXT,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        );

        CREATE INDEX IF NOT EXISTS idx_trades_sgg_date ON apartment_trades(sgg_cd, deal_date);
        CREATE INDEX IF NOT EXISTS idx_trades_amount ON apartment_trades(deal_amount);
        CREATE INDEX IF NOT EXISTS idx_trades_apt ON apartment_trades(apt_name, sgg_cd);
        CREATE INDEX IF NOT EXISTS idx_regions_sgg ON regions(sgg_cd);",
    )?;

    Ok(())
}

// ============================================================================
// Inserts (skip duplicates)
// ============================================================================

/// Run one insert; a unique-key hit counts as a skipped duplicate.
/// Other constraint failures (NOT NULL, triggers) are real errors.
fn insert_or_skip(stmt: &mut Statement<'_>, params: impl rusqlite::Params) -> Result<bool> {
    match stmt.execute(params) {
        Ok(_) => Ok(true),
        Err(rusqlite::Error::SqliteFailure(err, _))
            if matches!(
                err.extended_code,
                rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE | rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
            ) =>
        {
            Ok(false)
        }
        Err(e) => Err(e.into()),
    }
}

/// Insert without opening a transaction; callers own the transaction
fn insert_region_rows(conn: &Connection, regions: &[Region]) -> Result<InsertStats> {
    let mut stats = InsertStats::default();
    let mut stmt = conn.prepare(
        "INSERT INTO regions (
            region_cd, sido_cd, sgg_cd, umd_cd, ri_cd, locatjumin_cd, locatjijuk_cd,
            locatadd_nm, locat_order, locat_rm, locathigh_cd, locallow_nm, adpt_de
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
    )?;

    for r in regions {
        let inserted = insert_or_skip(
            &mut stmt,
            params![
                r.region_cd,
                r.sido_cd,
                r.sgg_cd,
                r.umd_cd,
                r.ri_cd,
                r.locatjumin_cd,
                r.locatjijuk_cd,
                r.locatadd_nm,
                r.locat_order,
                r.locat_rm,
                r.locathigh_cd,
                r.locallow_nm,
                r.adpt_de,
            ],
        )?;
        if inserted {
            stats.inserted += 1;
        } else {
            stats.duplicates += 1;
        }
    }
    Ok(stats)
}

pub fn insert_regions(conn: &Connection, regions: &[Region]) -> Result<InsertStats> {
    let tx = conn.unchecked_transaction()?;
    let stats = insert_region_rows(&tx, regions)?;
    tx.commit().context("Failed to commit region batch")?;
    Ok(stats)
}

/// Delete every region and insert `regions` in one transaction, so a failed
/// batch leaves the previous table untouched
pub fn replace_regions(
    conn: &Connection,
    regions: &[Region],
    batch_size: usize,
) -> Result<(usize, InsertStats)> {
    let tx = conn.unchecked_transaction()?;
    let deleted = delete_regions(&tx)?;
    let mut total = InsertStats::default();
    for (i, batch) in regions.chunks(batch_size.max(1)).enumerate() {
        let stats = insert_region_rows(&tx, batch)?;
        tracing::debug!(batch = i + 1, inserted = stats.inserted, "Inserted region batch");
        total.add(stats);
    }
    tx.commit().context("Failed to commit region replacement")?;
    Ok((deleted, total))
}

/// Create the grade if missing and return its id
pub fn upsert_grade(conn: &Connection, name: &str) -> Result<i64> {
    conn.execute(
        "INSERT INTO grades (name) VALUES (?1) ON CONFLICT(name) DO NOTHING",
        [name],
    )?;
    let id = conn.query_row("SELECT id FROM grades WHERE name = ?1", [name], |row| row.get(0))?;
    Ok(id)
}

pub fn insert_grade_definitions(
    conn: &Connection,
    definitions: &[GradeDefinition],
) -> Result<InsertStats> {
    let tx = conn.unchecked_transaction()?;
    let mut stats = InsertStats::default();
    {
        let mut stmt = tx.prepare(
            "INSERT INTO grade_definitions (sgg_cd, sgg_nm, sido_nm, grade_id)
             VALUES (?1, ?2, ?3, ?4)",
        )?;
        for def in definitions {
            if insert_or_skip(
                &mut stmt,
                params![def.sgg_cd, def.sgg_nm, def.sido_nm, def.grade_id],
            )? {
                stats.inserted += 1;
            } else {
                stats.duplicates += 1;
            }
        }
    }
    tx.commit().context("Failed to commit grade definitions")?;
    Ok(stats)
}

pub fn insert_trades(conn: &Connection, trades: &[ApartmentTrade]) -> Result<InsertStats> {
    let tx = conn.unchecked_transaction()?;
    let mut stats = InsertStats::default();
    {
        let mut stmt = tx.prepare(
            "INSERT INTO apartment_trades (
                dedupe_key, deal_amount, deal_year, deal_month, deal_day, deal_date,
                apt_name, build_year, floor, exclu_use_ar, jibun, sgg_cd, sgg_nm, umd_nm
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
        )?;

        for t in trades {
            let inserted = insert_or_skip(
                &mut stmt,
                params![
                    t.compute_dedupe_key(),
                    t.deal_amount,
                    t.deal_year,
                    t.deal_month,
                    t.deal_day,
                    t.deal_date,
                    t.apt_name,
                    t.build_year,
                    t.floor,
                    t.exclu_use_ar,
                    t.jibun,
                    t.sgg_cd,
                    t.sgg_nm,
                    t.umd_nm,
                ],
            )?;
            if inserted {
                stats.inserted += 1;
            } else {
                stats.duplicates += 1;
            }
        }
    }
    tx.commit().context("Failed to commit trade batch")?;
    Ok(stats)
}

pub fn insert_user(conn: &Connection, email: &str, name: Option<&str>) -> Result<i64> {
    conn.execute(
        "INSERT INTO users (email, name) VALUES (?1, ?2)",
        params![email, name],
    )?;
    Ok(conn.last_insert_rowid())
}

// ============================================================================
// Deletes and counts
// ============================================================================

pub fn delete_regions(conn: &Connection) -> Result<usize> {
    Ok(conn.execute("DELETE FROM regions", [])?)
}

/// Removes definitions first so the grade foreign key never dangles
pub fn delete_grades(conn: &Connection) -> Result<(usize, usize)> {
    let definitions = conn.execute("DELETE FROM grade_definitions", [])?;
    let grades = conn.execute("DELETE FROM grades", [])?;
    Ok((definitions, grades))
}

pub fn delete_trades(conn: &Connection) -> Result<usize> {
    Ok(conn.execute("DELETE FROM apartment_trades", [])?)
}

fn count_table(conn: &Connection, table: &str) -> Result<i64> {
    let count = conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))?;
    Ok(count)
}

pub fn count_regions(conn: &Connection) -> Result<i64> {
    count_table(conn, "regions")
}

pub fn count_grade_definitions(conn: &Connection) -> Result<i64> {
    count_table(conn, "grade_definitions")
}

pub fn count_trades(conn: &Connection) -> Result<i64> {
    count_table(conn, "apartment_trades")
}

pub fn count_trades_filtered(conn: &Connection, sgg_cd: Option<&str>) -> Result<i64> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM apartment_trades WHERE (?1 IS NULL OR sgg_cd = ?1)",
        [sgg_cd],
        |row| row.get(0),
    )?;
    Ok(count)
}

// ============================================================================
// Queries
// ============================================================================

const TRADE_COLUMNS: &str = "id, deal_amount, deal_year, deal_month, deal_day, deal_date, apt_name,
    build_year, floor, exclu_use_ar, jibun, sgg_cd, sgg_nm, umd_nm";

fn trade_from_row(row: &Row<'_>) -> rusqlite::Result<ApartmentTrade> {
    Ok(ApartmentTrade {
        id: row.get(0)?,
        deal_amount: row.get(1)?,
        deal_year: row.get(2)?,
        deal_month: row.get(3)?,
        deal_day: row.get(4)?,
        deal_date: row.get(5)?,
        apt_name: row.get(6)?,
        build_year: row.get(7)?,
        floor: row.get(8)?,
        exclu_use_ar: row.get(9)?,
        jibun: row.get(10)?,
        sgg_cd: row.get(11)?,
        sgg_nm: row.get(12)?,
        umd_nm: row.get(13)?,
    })
}

/// Newest trades first, optionally for one district
pub fn list_trades(conn: &Connection, filter: &TradeFilter) -> Result<Vec<ApartmentTrade>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {TRADE_COLUMNS}
         FROM apartment_trades
         WHERE (?1 IS NULL OR sgg_cd = ?1)
         ORDER BY deal_date DESC, id DESC
         LIMIT ?2 OFFSET ?3"
    ))?;

    let trades = stmt
        .query_map(
            params![filter.sgg_cd, filter.limit, filter.offset()],
            trade_from_row,
        )?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(trades)
}

/// The `per_grade` most expensive graded-district trades priced within
/// `[min, max]` won, for every grade. Ties go to the newer sale.
pub fn top_trades_in_budget(
    conn: &Connection,
    min: i64,
    max: i64,
    per_grade: usize,
) -> Result<Vec<ApartmentTrade>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {TRADE_COLUMNS}
         FROM (
             SELECT t.*,
                    ROW_NUMBER() OVER (
                        PARTITION BY d.grade_id
                        ORDER BY t.deal_amount DESC, t.deal_date DESC, t.id DESC
                    ) AS grade_rank
             FROM apartment_trades t
             JOIN grade_definitions d ON d.sgg_cd = t.sgg_cd
             WHERE t.deal_amount BETWEEN ?1 AND ?2
         )
         WHERE grade_rank <= ?3
         ORDER BY deal_amount DESC, deal_date DESC, id DESC"
    ))?;

    let per_grade = i64::try_from(per_grade).unwrap_or(i64::MAX);
    let trades = stmt
        .query_map(params![min, max, per_grade], trade_from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(trades)
}

/// Area tolerance when matching a float column against user input
const AREA_EPSILON: f64 = 0.005;

/// Price history for one apartment size since `since`, oldest first
pub fn trade_trend(
    conn: &Connection,
    apt_name: &str,
    sgg_cd: &str,
    exclu_use_ar: f64,
    since: NaiveDate,
) -> Result<Vec<TrendPoint>> {
    let mut stmt = conn.prepare(
        "SELECT deal_date, deal_amount
         FROM apartment_trades
         WHERE apt_name = ?1
           AND sgg_cd = ?2
           AND ABS(exclu_use_ar - ?3) < ?4
           AND deal_date >= ?5
         ORDER BY deal_date ASC, id ASC",
    )?;

    let points = stmt
        .query_map(
            params![apt_name, sgg_cd, exclu_use_ar, AREA_EPSILON, since],
            |row| {
                Ok(TrendPoint {
                    deal_date: row.get(0)?,
                    deal_amount: row.get(1)?,
                })
            },
        )?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(points)
}

pub fn list_grades(conn: &Connection) -> Result<Vec<Grade>> {
    let mut stmt = conn.prepare("SELECT id, name FROM grades ORDER BY name ASC")?;
    let grades = stmt
        .query_map([], |row| {
            Ok(Grade {
                id: row.get(0)?,
                name: row.get(1)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(grades)
}

pub fn list_grade_definitions(conn: &Connection) -> Result<Vec<GradeDefinition>> {
    let mut stmt = conn.prepare(
        "SELECT sgg_cd, sgg_nm, sido_nm, grade_id FROM grade_definitions ORDER BY grade_id, id",
    )?;
    let definitions = stmt
        .query_map([], |row| {
            Ok(GradeDefinition {
                sgg_cd: row.get(0)?,
                sgg_nm: row.get(1)?,
                sido_nm: row.get(2)?,
                grade_id: row.get(3)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(definitions)
}

pub fn list_users(conn: &Connection) -> Result<Vec<User>> {
    let mut stmt = conn.prepare("SELECT id, email, name, created_at FROM users ORDER BY id")?;
    let users = stmt
        .query_map([], |row| {
            Ok(User {
                id: row.get(0)?,
                email: row.get(1)?,
                name: row.get(2)?,
                created_at: row.get(3)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(users)
}
