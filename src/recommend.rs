// Budget recommendations - best trades per district grade

use crate::db::{self, ApartmentTrade, Grade, GradeDefinition};
use crate::error::RecommendError;
use anyhow::Result;
use rusqlite::Connection;
use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap};

pub const DEFAULT_TOP_N: usize = 3;
pub const MAX_TOP_N: usize = 20;

/// Budget-only queries look at `[budget * 80%, budget]`
const BUDGET_FLOOR_PERCENT: i64 = 80;

/// Grade name → best matching trades. Grade names sort in tier order.
pub type Recommendations = BTreeMap<String, Vec<ApartmentTrade>>;

/// Inclusive price window in won
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BudgetRange {
    pub min: i64,
    pub max: i64,
}

fn present(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn parse_amount(value: &str) -> Result<i64, RecommendError> {
    match value.parse::<i64>() {
        Ok(amount) if amount >= 0 => Ok(amount),
        _ => Err(RecommendError::InvalidBudget(value.to_string())),
    }
}

impl BudgetRange {
    pub fn new(min: i64, max: i64) -> Result<Self, RecommendError> {
        if min > max {
            return Err(RecommendError::InvertedRange);
        }
        Ok(Self { min, max })
    }

    /// An explicit `minBudget`/`maxBudget` pair wins over `budget`
    pub fn from_params(
        budget: Option<&str>,
        min_budget: Option<&str>,
        max_budget: Option<&str>,
    ) -> Result<Self, RecommendError> {
        match (present(min_budget), present(max_budget), present(budget)) {
            (Some(min), Some(max), _) => Self::new(parse_amount(min)?, parse_amount(max)?),
            (_, _, Some(budget)) => {
                let max = parse_amount(budget)?;
                Self::new(max / 100 * BUDGET_FLOOR_PERCENT + max % 100 * BUDGET_FLOOR_PERCENT / 100, max)
            }
            _ => Err(RecommendError::MissingBudget),
        }
    }

    pub fn contains(&self, amount: i64) -> bool {
        (self.min..=self.max).contains(&amount)
    }
}

/// `limit` query value → number of trades per grade
pub fn top_n_from_param(raw: Option<&str>) -> usize {
    present(raw)
        .and_then(|v| v.parse::<usize>().ok())
        .map(|n| n.clamp(1, MAX_TOP_N))
        .unwrap_or(DEFAULT_TOP_N)
}

/// Group trades by the grade of their district and keep the `top_n` most
/// expensive ones inside the range. Every grade gets an entry.
pub fn recommend(
    grades: &[Grade],
    definitions: &[GradeDefinition],
    trades: &[ApartmentTrade],
    range: BudgetRange,
    top_n: usize,
) -> Recommendations {
    let grade_names: HashMap<i64, &str> = grades.iter().map(|g| (g.id, g.name.as_str())).collect();
    let districts: HashMap<&str, &GradeDefinition> =
        definitions.iter().map(|d| (d.sgg_cd.as_str(), d)).collect();

    let mut result: Recommendations = grades.iter().map(|g| (g.name.clone(), Vec::new())).collect();

    for trade in trades.iter().filter(|t| range.contains(t.deal_amount)) {
        let Some(def) = districts.get(trade.sgg_cd.as_str()) else {
            continue;
        };
        let Some(&grade) = grade_names.get(&def.grade_id) else {
            continue;
        };
        if let Some(bucket) = result.get_mut(grade) {
            let mut trade = trade.clone();
            trade.sgg_nm = def.sgg_nm.clone();
            bucket.push(trade);
        }
    }

    let top_n = top_n.clamp(1, MAX_TOP_N);
    for bucket in result.values_mut() {
        bucket.sort_by_key(|t| (Reverse(t.deal_amount), Reverse(t.deal_date), Reverse(t.id)));
        bucket.truncate(top_n);
    }

    result
}

/// Load grades, definitions and each grade's best in-range trades, then group them
pub fn recommend_from_db(conn: &Connection, range: BudgetRange, top_n: usize) -> Result<Recommendations> {
    let top_n = top_n.clamp(1, MAX_TOP_N);
    let grades = db::list_grades(conn)?;
    let definitions = db::list_grade_definitions(conn)?;
    let trades = db::top_trades_in_budget(conn, range.min, range.max, top_n)?;
    Ok(recommend(&grades, &definitions, &trades, range, top_n))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::tests::{create_test_trade, test_conn};
    use crate::grades::seed_grades_and_definitions;

    const EOK: i64 = 100_000_000;

    fn grades() -> Vec<Grade> {
        ["1급지", "2급지", "3급지", "4급지"]
            .iter()
            .enumerate()
            .map(|(i, name)| Grade {
                id: i as i64 + 1,
                name: name.to_string(),
            })
            .collect()
    }

    fn definition(sgg_cd: &str, sgg_nm: &str, grade_id: i64) -> GradeDefinition {
        GradeDefinition {
            sgg_cd: sgg_cd.to_string(),
            sgg_nm: sgg_nm.to_string(),
            sido_nm: "서울특별시".to_string(),
            grade_id,
        }
    }

    #[test]
    fn test_budget_range_from_params() {
        assert_eq!(
            BudgetRange::from_params(Some("1000000000"), None, None),
            Ok(BudgetRange { min: 800_000_000, max: 1_000_000_000 })
        );
        assert_eq!(
            BudgetRange::from_params(Some("5"), Some("100"), Some("200")),
            Ok(BudgetRange { min: 100, max: 200 })
        );
        // Half a range falls back to budget
        assert_eq!(
            BudgetRange::from_params(Some("1000"), Some("100"), None),
            Ok(BudgetRange { min: 800, max: 1000 })
        );
    }

    #[test]
    fn test_budget_range_rejects_bad_input() {
        assert_eq!(BudgetRange::from_params(None, None, None), Err(RecommendError::MissingBudget));
        assert_eq!(
            BudgetRange::from_params(Some(" "), Some("100"), None),
            Err(RecommendError::MissingBudget)
        );
        assert_eq!(
            BudgetRange::from_params(Some("10억"), None, None),
            Err(RecommendError::InvalidBudget("10억".to_string()))
        );
        assert_eq!(
            BudgetRange::from_params(None, Some("-1"), Some("10")),
            Err(RecommendError::InvalidBudget("-1".to_string()))
        );
        assert_eq!(
            BudgetRange::from_params(None, Some("300"), Some("200")),
            Err(RecommendError::InvertedRange)
        );
    }

    #[test]
    fn test_budget_floor_does_not_overflow() {
        let range = BudgetRange::from_params(Some(i64::MAX.to_string().as_str()), None, None).unwrap();
        assert_eq!(range.max, i64::MAX);
        assert!(range.min > 0 && range.min < range.max);
    }

    #[test]
    fn test_top_n_from_param() {
        assert_eq!(top_n_from_param(None), DEFAULT_TOP_N);
        assert_eq!(top_n_from_param(Some("abc")), DEFAULT_TOP_N);
        assert_eq!(top_n_from_param(Some("0")), 1);
        assert_eq!(top_n_from_param(Some("5")), 5);
        assert_eq!(top_n_from_param(Some("999")), MAX_TOP_N);
    }

    #[test]
    fn test_recommend_one_entry_per_grade_sorted_and_bounded() {
        let defs = vec![
            definition("11680", "서울특별시 강남구", 1),
            definition("11440", "서울특별시 마포구", 2),
        ];
        let trades = vec![
            create_test_trade("래미안", "11680", 9 * EOK, "2024-01-10", 84.0),
            create_test_trade("자이", "11680", 10 * EOK, "2024-02-10", 84.0),
            create_test_trade("아이파크", "11680", 12 * EOK, "2024-02-11", 84.0),
            create_test_trade("마포래미안", "11440", 8 * EOK + 5_000 * 10_000, "2024-03-01", 59.0),
            create_test_trade("미분류", "99999", 9 * EOK, "2024-03-01", 59.0),
        ];
        let range = BudgetRange::new(8 * EOK, 10 * EOK).unwrap();

        let result = recommend(&grades(), &defs, &trades, range, 3);

        assert_eq!(
            result.keys().cloned().collect::<Vec<_>>(),
            vec!["1급지", "2급지", "3급지", "4급지"]
        );
        let first: Vec<&str> = result["1급지"].iter().map(|t| t.apt_name.as_str()).collect();
        assert_eq!(first, vec!["자이", "래미안"]);
        assert_eq!(result["1급지"][0].sgg_nm, "서울특별시 강남구");
        assert_eq!(result["2급지"].len(), 1);
        assert!(result["3급지"].is_empty());
        assert!(result.values().flatten().all(|t| range.contains(t.deal_amount)));
    }

    #[test]
    fn test_recommend_truncates_and_breaks_ties_by_date() {
        let defs = vec![definition("11680", "서울특별시 강남구", 1)];
        let trades = vec![
            create_test_trade("A", "11680", 5 * EOK, "2024-01-01", 84.0),
            create_test_trade("B", "11680", 5 * EOK, "2024-05-01", 84.0),
            create_test_trade("C", "11680", 4 * EOK, "2024-05-01", 84.0),
        ];
        let result = recommend(&grades(), &defs, &trades, BudgetRange::new(0, 10 * EOK).unwrap(), 2);
        let names: Vec<&str> = result["1급지"].iter().map(|t| t.apt_name.as_str()).collect();
        assert_eq!(names, vec!["B", "A"]);
    }

    #[test]
    fn test_recommend_from_db() {
        let conn = test_conn();
        seed_grades_and_definitions(&conn).unwrap();
        db::insert_trades(
            &conn,
            &[
                create_test_trade("은마", "11680", 20 * EOK, "2024-04-01", 76.79),
                create_test_trade("은마", "11680", 9 * EOK, "2024-04-02", 76.79),
                create_test_trade("외곽", "99999", 9 * EOK, "2024-04-02", 76.79),
            ],
        )
        .unwrap();

        let range = BudgetRange::from_params(Some((10 * EOK).to_string().as_str()), None, None).unwrap();
        let result = recommend_from_db(&conn, range, DEFAULT_TOP_N).unwrap();

        assert_eq!(result.len(), 4);
        assert_eq!(result["1급지"].len(), 1);
        assert_eq!(result["1급지"][0].deal_amount, 9 * EOK);
        assert_eq!(result["1급지"][0].sgg_nm, "서울특별시 강남구");
        assert_eq!(result.values().map(Vec::len).sum::<usize>(), 1);
    }

    #[test]
    fn test_recommend_from_db_keeps_top_n_per_grade() {
        let conn = test_conn();
        seed_grades_and_definitions(&conn).unwrap();
        let trades: Vec<ApartmentTrade> = (1..=6)
            .map(|i| create_test_trade(&format!("강남{}", i), "11680", i * EOK, "2024-04-01", 84.0))
            .collect();
        db::insert_trades(&conn, &trades).unwrap();

        let result = recommend_from_db(&conn, BudgetRange::new(0, 10 * EOK).unwrap(), 2).unwrap();
        let names: Vec<&str> = result["1급지"].iter().map(|t| t.apt_name.as_str()).collect();
        assert_eq!(names, vec!["강남6", "강남5"]);
    }
}
