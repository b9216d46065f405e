use crate::schema::CellValue;
use chrono::{Days, NaiveDate, NaiveDateTime, Weekday};

/// Outcome of coercing a cell to a number.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NumberCoercion {
    Missing,
    Valid(f64),
    Invalid,
}

impl NumberCoercion {
    /// Lenient reading used by the primary pipeline: anything unusable is 0.
    pub fn or_zero(self) -> f64 {
        match self {
            NumberCoercion::Valid(v) => v,
            _ => 0.0,
        }
    }
}

pub fn coerce_number(cell: Option<&CellValue>) -> NumberCoercion {
    match cell {
        None | Some(CellValue::Empty) => NumberCoercion::Missing,
        Some(CellValue::Number(n)) => {
            if n.is_finite() {
                NumberCoercion::Valid(*n)
            } else {
                NumberCoercion::Invalid
            }
        }
        Some(CellValue::Text(s)) => {
            if s.trim().is_empty() {
                NumberCoercion::Missing
            } else {
                parse_number(s).map_or(NumberCoercion::Invalid, NumberCoercion::Valid)
            }
        }
        Some(CellValue::Bool(_)) | Some(CellValue::Date(_)) => NumberCoercion::Invalid,
    }
}

/// Parses numbers as they show up in spreadsheets exported from Brazilian and
/// US locales: "R$ 1.234,56", "1,234.56", "-12,5", "(30,00)".
pub fn parse_number(raw: &str) -> Option<f64> {
    let mut text: String = raw
        .trim()
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '\u{a0}')
        .collect();

    let mut negative = false;
    if text.starts_with('(') && text.ends_with(')') && text.len() > 2 {
        negative = true;
        text = text[1..text.len() - 1].to_string();
    }

    let text = text
        .trim_start_matches("R$")
        .trim_start_matches("US$")
        .trim_start_matches('$')
        .trim_end_matches('%');

    let (sign, body) = match text.strip_prefix('-') {
        Some(rest) => (-1.0, rest.trim_start_matches("R$").trim_start_matches('$')),
        None => (1.0, text),
    };

    if body.is_empty() || !body.chars().all(|c| c.is_ascii_digit() || c == '.' || c == ',') {
        return None;
    }

    let last_comma = body.rfind(',');
    let last_dot = body.rfind('.');
    let normalized = match (last_comma, last_dot) {
        (Some(c), Some(d)) if c > d => body.replace('.', "").replace(',', "."),
        (Some(_), Some(_)) => body.replace(',', ""),
        (Some(_), None) => {
            if body.matches(',').count() == 1 {
                body.replace(',', ".")
            } else {
                body.replace(',', "")
            }
        }
        (None, Some(_)) => {
            if body.matches('.').count() > 1 {
                body.replace('.', "")
            } else {
                body.to_string()
            }
        }
        (None, None) => body.to_string(),
    };

    let value: f64 = normalized.parse().ok()?;
    if !value.is_finite() {
        return None;
    }
    let value = sign * value;
    Some(if negative { -value } else { value })
}

const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d", "%d/%m/%Y", "%d/%m/%y", "%d-%m-%Y", "%Y/%m/%d", "%d.%m.%Y",
];

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%d/%m/%Y %H:%M:%S",
    "%d/%m/%Y %H:%M",
];

/// Spreadsheet serial dates count days from 1899-12-30.
const EXCEL_SERIAL_MAX: f64 = 2_958_465.0;

pub fn coerce_date(cell: Option<&CellValue>) -> Option<NaiveDate> {
    match cell? {
        CellValue::Date(d) => Some(*d),
        CellValue::Text(s) => parse_date(s),
        CellValue::Number(n) => excel_serial_to_date(*n),
        CellValue::Empty | CellValue::Bool(_) => None,
    }
}

pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let text = raw.trim();
    if text.is_empty() {
        return None;
    }

    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(text, format) {
            return Some(date);
        }
    }

    for format in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(text, format) {
            return Some(dt.date());
        }
    }

    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(text) {
        return Some(dt.date_naive());
    }

    None
}

pub fn excel_serial_to_date(serial: f64) -> Option<NaiveDate> {
    if !serial.is_finite() || serial < 1.0 || serial > EXCEL_SERIAL_MAX {
        return None;
    }
    NaiveDate::from_ymd_opt(1899, 12, 30)?.checked_add_days(Days::new(serial.trunc() as u64))
}

/// Reads a cell as a grouping label. Blank cells have no label.
pub fn coerce_label(cell: Option<&CellValue>) -> Option<String> {
    let cell = cell?;
    if cell.is_empty() {
        return None;
    }
    let label = match cell {
        CellValue::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => format!("{}", *n as i64),
        other => other.to_string(),
    };
    let label = label.trim().to_string();
    if label.is_empty() {
        None
    } else {
        Some(label)
    }
}

pub fn round_to(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (value * factor).round() / factor
}

pub fn round2(value: f64) -> f64 {
    round_to(value, 2)
}

/// Amounts are kept to the cent and never negative.
pub fn sanitize_amount(value: f64) -> f64 {
    let value = round2(value);
    if value > 0.0 {
        value
    } else {
        0.0
    }
}

/// Quantities are whole units and never negative.
pub fn sanitize_units(quantity: f64) -> f64 {
    let quantity = quantity.round();
    if quantity > 0.0 {
        quantity
    } else {
        0.0
    }
}

/// `part / total * 100`, or 0 when the total is not positive.
pub fn percentage_of(part: f64, total: f64) -> f64 {
    if total > 0.0 {
        part / total * 100.0
    } else {
        0.0
    }
}

/// Lowercases and folds Portuguese accents so "Preço" compares equal to "preco".
pub fn fold_text(text: &str) -> String {
    text.trim()
        .to_lowercase()
        .chars()
        .map(|c| match c {
            'á' | 'à' | 'â' | 'ã' | 'ä' => 'a',
            'é' | 'è' | 'ê' | 'ë' => 'e',
            'í' | 'ì' | 'î' | 'ï' => 'i',
            'ó' | 'ò' | 'ô' | 'õ' | 'ö' => 'o',
            'ú' | 'ù' | 'û' | 'ü' => 'u',
            'ç' => 'c',
            'ñ' => 'n',
            other => other,
        })
        .collect()
}

/// `fold_text` with spaces, underscores and hyphens removed.
pub fn compact_text(text: &str) -> String {
    fold_text(text)
        .chars()
        .filter(|c| !matches!(c, ' ' | '_' | '-'))
        .collect()
}

/// Weekdays in business-week display order.
pub const BUSINESS_WEEK: [Weekday; 7] = [
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
    Weekday::Sat,
    Weekday::Sun,
];

pub fn weekday_name(day: Weekday) -> &'static str {
    match day {
        Weekday::Sun => "Sunday",
        Weekday::Mon => "Monday",
        Weekday::Tue => "Tuesday",
        Weekday::Wed => "Wednesday",
        Weekday::Thu => "Thursday",
        Weekday::Fri => "Friday",
        Weekday::Sat => "Saturday",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_number_locales() {
        assert_eq!(parse_number("1234.56"), Some(1234.56));
        assert_eq!(parse_number("1.234,56"), Some(1234.56));
        assert_eq!(parse_number("1,234.56"), Some(1234.56));
        assert_eq!(parse_number("R$ 1.234,56"), Some(1234.56));
        assert_eq!(parse_number("12,5"), Some(12.5));
        assert_eq!(parse_number("1.234.567"), Some(1234567.0));
        assert_eq!(parse_number("-50"), Some(-50.0));
        assert_eq!(parse_number("(30,00)"), Some(-30.0));
        assert_eq!(parse_number("abc"), None);
        assert_eq!(parse_number(""), None);
        assert_eq!(parse_number("12a"), None);
    }

    #[test]
    fn test_coerce_number_outcomes() {
        assert_eq!(coerce_number(None), NumberCoercion::Missing);
        assert_eq!(
            coerce_number(Some(&CellValue::Text("  ".to_string()))),
            NumberCoercion::Missing
        );
        assert_eq!(
            coerce_number(Some(&CellValue::Number(3.5))),
            NumberCoercion::Valid(3.5)
        );
        assert_eq!(
            coerce_number(Some(&CellValue::Number(f64::NAN))),
            NumberCoercion::Invalid
        );
        assert_eq!(
            coerce_number(Some(&CellValue::Text("n/a".to_string()))),
            NumberCoercion::Invalid
        );
        assert_eq!(NumberCoercion::Invalid.or_zero(), 0.0);
    }

    #[test]
    fn test_parse_date_formats() {
        let expected = NaiveDate::from_ymd_opt(2024, 3, 15).unwrap();
        assert_eq!(parse_date("2024-03-15"), Some(expected));
        assert_eq!(parse_date("15/03/2024"), Some(expected));
        assert_eq!(parse_date("15-03-2024"), Some(expected));
        assert_eq!(parse_date("2024-03-15T10:30:00"), Some(expected));
        assert_eq!(parse_date("15/03/2024 08:00"), Some(expected));
        assert_eq!(parse_date("2024-03-15T10:30:00-03:00"), Some(expected));
        assert_eq!(parse_date("not a date"), None);
    }

    #[test]
    fn test_excel_serial_dates() {
        assert_eq!(
            excel_serial_to_date(45366.0),
            NaiveDate::from_ymd_opt(2024, 3, 15)
        );
        assert_eq!(excel_serial_to_date(0.0), None);
        assert_eq!(excel_serial_to_date(f64::INFINITY), None);
    }

    #[test]
    fn test_coerce_label() {
        assert_eq!(
            coerce_label(Some(&CellValue::Number(42.0))),
            Some("42".to_string())
        );
        assert_eq!(
            coerce_label(Some(&CellValue::Text("  Bebidas ".to_string()))),
            Some("Bebidas".to_string())
        );
        assert_eq!(coerce_label(Some(&CellValue::Empty)), None);
        assert_eq!(coerce_label(None), None);
    }

    #[test]
    fn test_text_folding() {
        assert_eq!(fold_text("Preço Unitário"), "preco unitario");
        assert_eq!(compact_text("Data_Venda - Loja"), "datavendaloja");
    }

    #[test]
    fn test_sanitize_amount_and_units() {
        assert_eq!(sanitize_amount(10.456), 10.46);
        assert_eq!(sanitize_amount(-50.0), 0.0);
        assert!(sanitize_amount(-0.001).is_sign_positive());
        assert_eq!(sanitize_units(1.5), 2.0);
        assert_eq!(sanitize_units(0.4), 0.0);
        assert_eq!(sanitize_units(-3.0), 0.0);
    }

    #[test]
    fn test_round2() {
        assert_eq!(round2(10.005_1), 10.01);
        assert_eq!(round2(-3.333), -3.33);
        assert_eq!(percentage_of(25.0, 0.0), 0.0);
        assert_eq!(percentage_of(25.0, 100.0), 25.0);
    }
}
