// District grades - the fixed 급지 classification of Seoul / Gyeonggi-do SGG districts

use crate::db::{self, GradeDefinition};
use anyhow::{bail, Context, Result};
use rusqlite::Connection;
use serde::Deserialize;
use std::collections::HashMap;
use tracing::info;

/// Grade master data, best first
pub const GRADE_NAMES: [&str; 4] = ["1급지", "2급지", "3급지", "4급지"];

const GRADE_TABLE_CSV: &str = include_str!("../data/grade_definitions.csv");

/// One row of the embedded classification table
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DistrictGrade {
    pub sgg_cd: String,
    pub sgg_nm: String,
    pub sido_nm: String,
    pub grade: String,
}

/// Tier number of a grade name: "2급지" → 2
pub fn grade_rank(name: &str) -> Option<u8> {
    let rank = name.chars().next()?.to_digit(10)?;
    (1..=4).contains(&rank).then_some(rank as u8)
}

pub fn builtin_grade_table() -> Result<Vec<DistrictGrade>> {
    parse_grade_table(GRADE_TABLE_CSV)
}

pub fn parse_grade_table(csv_text: &str) -> Result<Vec<DistrictGrade>> {
    let mut rdr = csv::Reader::from_reader(csv_text.as_bytes());
    let mut rows = Vec::new();

    for (line, result) in rdr.deserialize().enumerate() {
        let row: DistrictGrade =
            result.with_context(|| format!("Failed to read grade table row {}", line + 1))?;
        if !GRADE_NAMES.contains(&row.grade.as_str()) {
            bail!("Unknown grade {:?} for district {}", row.grade, row.sgg_cd);
        }
        rows.push(row);
    }

    Ok(rows)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GradeSeedReport {
    pub deleted_definitions: usize,
    pub deleted_grades: usize,
    pub grades: usize,
    pub definitions_inserted: usize,
    pub definitions_skipped: usize,
}

/// Replace grades and definitions with the built-in table
pub fn seed_grades_and_definitions(conn: &Connection) -> Result<GradeSeedReport> {
    seed_grades_from(conn, &builtin_grade_table()?)
}

pub fn seed_grades_from(conn: &Connection, table: &[DistrictGrade]) -> Result<GradeSeedReport> {
    info!("Deleting old grade data");
    let (deleted_definitions, deleted_grades) = db::delete_grades(conn)?;

    let mut grade_ids = HashMap::new();
    for name in GRADE_NAMES {
        grade_ids.insert(name, db::upsert_grade(conn, name)?);
    }
    info!(grades = grade_ids.len(), "Grade master data created");

    let definitions: Vec<GradeDefinition> = table
        .iter()
        .filter_map(|row| {
            grade_ids.get(row.grade.as_str()).map(|&grade_id| GradeDefinition {
                sgg_cd: row.sgg_cd.clone(),
                sgg_nm: row.sgg_nm.clone(),
                sido_nm: row.sido_nm.clone(),
                grade_id,
            })
        })
        .collect();

    let stats = db::insert_grade_definitions(conn, &definitions)?;
    info!(
        inserted = stats.inserted,
        skipped = stats.duplicates,
        "Grade definitions inserted"
    );

    Ok(GradeSeedReport {
        deleted_definitions,
        deleted_grades,
        grades: grade_ids.len(),
        definitions_inserted: stats.inserted,
        definitions_skipped: stats.duplicates,
    })
}
