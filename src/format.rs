// Korean price and area formatting

pub const WON_PER_MANWON: i64 = 10_000;
pub const MANWON_PER_EOK: i64 = 10_000;
pub const SQM_PER_PYEONG: f64 = 3.3058;

fn group_thousands(n: i64) -> String {
    let digits = n.unsigned_abs().to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

/// Won → "11억 5,000만원", "3억", "9,500만원"
pub fn format_price(won: i64) -> String {
    let sign = if won < 0 { "-" } else { "" };
    let manwon = (won / WON_PER_MANWON).abs();
    let eok = manwon / MANWON_PER_EOK;
    let rest = manwon % MANWON_PER_EOK;

    match (eok, rest) {
        (0, _) => format!("{}{}만원", sign, group_thousands(rest)),
        (_, 0) => format!("{}{}억", sign, group_thousands(eok)),
        _ => format!("{}{}억 {}만원", sign, group_thousands(eok), group_thousands(rest)),
    }
}

/// ㎡ → 평, rounded to a whole number
pub fn to_pyeong(square_meters: f64) -> i64 {
    (square_meters / SQM_PER_PYEONG).round() as i64
}

pub fn manwon_to_won(manwon: i64) -> i64 {
    manwon.saturating_mul(WON_PER_MANWON)
}
