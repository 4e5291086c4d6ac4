//! Best-effort extraction of structured fuel-report fields from free-form
//! chat text. The parser never fails: it pulls out whatever it recognizes
//! and leaves completeness judgment to the validation pipeline.

use ffl_core::{normalize_entity, ParsedFields};
use regex::Regex;

/// Field extractor with one ordered pattern list per canonical field.
/// Earlier patterns are more specific; the first match wins.
pub struct FieldParser {
    driver: Vec<Regex>,
    entity: Vec<Regex>,
    liters: Vec<Regex>,
    amount: Vec<Regex>,
    fuel_type: Vec<Regex>,
    odometer: Vec<Regex>,
    department: Vec<Regex>,
}

impl Default for FieldParser {
    fn default() -> Self {
        Self::new()
    }
}

// Free-text fields (driver, department) stop at the next known label or
// line end so a run-on line does not swallow the rest of the message.
// Consuming stop groups, not look-ahead; only capture group 1 is read.
const TEXT_STOP: &str = r"(?:\n|DRIVER|CAR|LITERS|LITRES|AMOUNT|TYPE|ODOMETER|$)";

// Registration format: 2-4 letters, 2-4 digits, optional trailing letter.
const PLATE: &str = r"([A-Z]{2,4}\s*\d{2,4}\s*[A-Z]?)";

fn patterns(raw: &[String]) -> Vec<Regex> {
    raw.iter()
        .map(|p| Regex::new(&format!("(?im){p}")).expect("valid regex"))
        .collect()
}

impl FieldParser {
    pub fn new() -> Self {
        let sep = r"\s*[:\-=]\s*";
        Self {
            driver: patterns(&[
                format!(r"DRIVER{sep}(.+?){TEXT_STOP}"),
                format!(r"JINA{sep}(.+?){TEXT_STOP}"),
                format!(r"NAME{sep}(.+?){TEXT_STOP}"),
            ]),
            entity: patterns(&[
                format!(r"CAR{sep}{PLATE}(?:\s|$|\n|LITERS|LITRES|AMOUNT|TYPE|ODOMETER)"),
                format!(r"REG\s*(?:NO)?\.?{sep}{PLATE}(?:\s|$|\n)"),
                format!(r"VEHICLE{sep}{PLATE}(?:\s|$|\n)"),
                format!(r"PLATE{sep}{PLATE}(?:\s|$|\n)"),
                format!(r"GARI{sep}{PLATE}(?:\s|$|\n)"),
                // Bare registration anywhere in the text.
                r"\b([A-Z]{2,4}\s*\d{3,4}\s*[A-Z])\b".to_string(),
            ]),
            liters: patterns(&[
                format!(r"LITERS?{sep}([\d,\.]+)"),
                format!(r"LITRES?{sep}([\d,\.]+)"),
                format!(r"LTR?S?{sep}([\d,\.]+)"),
                format!(r"FUEL{sep}([\d,\.]+)\s*(?:L|LTR)"),
                format!(r"([\d,\.]+)\s*(?:LITERS?|LITRES?|LTR?S?)\b"),
            ]),
            amount: patterns(&[
                format!(r"AMOUNT{sep}(?:KSH?\.?\s*)?([\d,\.]+)"),
                format!(r"COST{sep}(?:KSH?\.?\s*)?([\d,\.]+)"),
                format!(r"PRICE{sep}(?:KSH?\.?\s*)?([\d,\.]+)"),
                format!(r"KSH?\.?\s*[:\-=]?\s*([\d,\.]+)"),
                format!(r"TOTAL{sep}(?:KSH?\.?\s*)?([\d,\.]+)"),
                format!(r"PESA{sep}([\d,\.]+)"),
            ]),
            fuel_type: patterns(&[
                format!(r"TYPE{sep}(DIESEL|PETROL|SUPER|V-?POWER|UNLEADED|AGO)"),
                format!(r"FUEL\s*TYPE{sep}(DIESEL|PETROL|SUPER|V-?POWER|UNLEADED|AGO)"),
                format!(r"\b(DIESEL|PETROL|SUPER|V-?POWER|UNLEADED|AGO)\b"),
            ]),
            odometer: patterns(&[
                format!(r"ODOMETER{sep}([\d,\.]+)"),
                format!(r"ODO{sep}([\d,\.]+)"),
                format!(r"KM{sep}([\d,\.]+)"),
                format!(r"MILEAGE{sep}([\d,\.]+)"),
                format!(r"READING{sep}([\d,\.]+)"),
            ]),
            department: patterns(&[
                format!(r"DEPARTMENT{sep}(.+?){TEXT_STOP}"),
                format!(r"DEPT{sep}(.+?){TEXT_STOP}"),
                format!(r"SECTION{sep}(.+?){TEXT_STOP}"),
            ]),
        }
    }

    /// Extract whatever the text yields. Matching runs against the
    /// upper-cased body with line structure preserved, then against a
    /// single-line collapse as a fallback for run-together messages.
    pub fn parse(&self, body: &str) -> ParsedFields {
        let with_newlines = body.to_uppercase().trim().replace("\r\n", "\n").replace('\r', "\n");
        let collapsed = collapse_whitespace(&with_newlines);

        let extract = |set: &[Regex]| -> Option<String> {
            first_capture(set, &with_newlines).or_else(|| first_capture(set, &collapsed))
        };

        ParsedFields {
            entity: extract(&self.entity).map(|v| normalize_entity(&v)),
            driver: extract(&self.driver).map(|v| title_case(&v)),
            department: extract(&self.department).map(|v| collapse_whitespace(&v)),
            liters: extract(&self.liters).and_then(|v| parse_number(&v)),
            amount: extract(&self.amount).and_then(|v| parse_number(&v)),
            fuel_type: extract(&self.fuel_type).map(|v| normalize_fuel_type(&v)),
            odometer: extract(&self.odometer)
                .and_then(|v| parse_number(&v))
                .map(|n| n as u64),
        }
    }
}

fn first_capture(patterns: &[Regex], text: &str) -> Option<String> {
    for pattern in patterns {
        if let Some(captures) = pattern.captures(text) {
            if let Some(value) = captures.get(1) {
                let value = value.as_str().trim();
                if !value.is_empty() {
                    return Some(value.to_string());
                }
            }
        }
    }
    None
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Numeric fields arrive with thousands separators; a value that still
/// fails to parse is treated as absent.
fn parse_number(value: &str) -> Option<f64> {
    let cleaned = value.replace(',', "");
    let cleaned = cleaned.trim().trim_end_matches('.');
    cleaned.parse::<f64>().ok().filter(|n| n.is_finite() && *n >= 0.0)
}

fn normalize_fuel_type(value: &str) -> String {
    match value.to_uppercase().as_str() {
        "VPOWER" => "V-POWER".to_string(),
        // AGO (automotive gas oil) is diesel.
        "AGO" => "DIESEL".to_string(),
        other => other.to_string(),
    }
}

fn title_case(value: &str) -> String {
    value
        .split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => {
                    first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase()
                }
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(body: &str) -> ParsedFields {
        FieldParser::new().parse(body)
    }

    #[test]
    fn every_pattern_compiles() {
        // Construction panics if any pattern uses unsupported syntax.
        let _ = FieldParser::new();
    }

    #[test]
    fn well_formed_report_yields_every_field() {
        let parsed = parse(
            "FUEL UPDATE\n\
             DEPARTMENT: Logistics\n\
             DRIVER: jane wanjiru\n\
             CAR: KCA 542Q\n\
             LITERS: 45.5\n\
             AMOUNT: KSH 7,280\n\
             TYPE: DIESEL\n\
             ODOMETER: 120,450",
        );
        assert!(parsed.is_complete());
        assert_eq!(parsed.entity.as_deref(), Some("KCA542Q"));
        assert_eq!(parsed.driver.as_deref(), Some("Jane Wanjiru"));
        assert_eq!(parsed.department.as_deref(), Some("LOGISTICS"));
        assert_eq!(parsed.liters, Some(45.5));
        assert_eq!(parsed.amount, Some(7_280.0));
        assert_eq!(parsed.fuel_type.as_deref(), Some("DIESEL"));
        assert_eq!(parsed.odometer, Some(120_450));
    }

    #[test]
    fn alternate_labels_and_separators_are_accepted() {
        let parsed = parse(
            "Jina - Peter Otieno\n\
             Reg No = KDB 323M\n\
             Ltrs: 30\n\
             Total: 4,500\n\
             Dept: transport\n\
             Odo: 88000\n\
             petrol",
        );
        assert_eq!(parsed.driver.as_deref(), Some("Peter Otieno"));
        assert_eq!(parsed.entity.as_deref(), Some("KDB323M"));
        assert_eq!(parsed.liters, Some(30.0));
        assert_eq!(parsed.amount, Some(4_500.0));
        assert_eq!(parsed.department.as_deref(), Some("TRANSPORT"));
        assert_eq!(parsed.odometer, Some(88_000));
        assert_eq!(parsed.fuel_type.as_deref(), Some("PETROL"));
    }

    #[test]
    fn bare_plate_is_picked_up_without_a_label() {
        let parsed = parse("refueled KDV 064S today, 20 liters");
        assert_eq!(parsed.entity.as_deref(), Some("KDV064S"));
        assert_eq!(parsed.liters, Some(20.0));
    }

    #[test]
    fn fuel_type_aliases_normalize() {
        assert_eq!(parse("TYPE: AGO").fuel_type.as_deref(), Some("DIESEL"));
        assert_eq!(parse("TYPE: VPOWER").fuel_type.as_deref(), Some("V-POWER"));
        assert_eq!(parse("TYPE: V-POWER").fuel_type.as_deref(), Some("V-POWER"));
    }

    #[test]
    fn unrelated_chatter_yields_nothing_numeric() {
        let parsed = parse("good morning everyone, meeting at ten");
        assert_eq!(parsed.liters, None);
        assert_eq!(parsed.amount, None);
        assert_eq!(parsed.odometer, None);
        assert!(!parsed.is_complete());
    }

    #[test]
    fn malformed_numbers_are_treated_as_absent() {
        let parsed = parse("LITERS: abc\nODOMETER: 1.2.3");
        assert_eq!(parsed.liters, None);
        assert_eq!(parsed.odometer, None);
    }

    #[test]
    fn driver_stops_at_the_next_label_on_one_line() {
        let parsed = parse("DRIVER: Mary Akinyi CAR: KCZ 154S LITERS: 35");
        assert_eq!(parsed.driver.as_deref(), Some("Mary Akinyi"));
        assert_eq!(parsed.entity.as_deref(), Some("KCZ154S"));
    }
}
