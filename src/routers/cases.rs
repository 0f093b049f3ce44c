//! The case tests a switch router can apply to its operand.

use chrono::NaiveDate;
use regex::Regex;
use serde_json::Value as Json;

use crate::envs::{DateFormat, Environment};
use crate::utils::tokenize;
use crate::values::Value;

/// A successful test: the value extracted from the operand plus any extra
/// detail (e.g. regex groups).
#[derive(Debug, Clone, PartialEq)]
pub struct TestResult {
    pub matched: Value,
    pub extra: Option<Json>,
}

impl TestResult {
    fn text(s: impl Into<String>) -> Self {
        TestResult {
            matched: Value::Text(s.into()),
            extra: None,
        }
    }

    fn number(n: f64) -> Self {
        TestResult {
            matched: Value::Number(n),
            extra: None,
        }
    }
}

/// Applies the named test to the operand. `Ok(None)` means no match;
/// `Err` means the test itself was unusable (unknown name, bad arguments).
pub fn evaluate_case_test(
    name: &str,
    operand: &Value,
    args: &[String],
    env: &Environment,
) -> Result<Option<TestResult>, String> {
    match name {
        "has_any_word" => Ok(has_any_word(&operand.to_repr(), first_arg(args, name)?)),
        "has_all_words" => Ok(has_all_words(&operand.to_repr(), first_arg(args, name)?)),
        "has_phrase" => Ok(has_phrase(&operand.to_repr(), first_arg(args, name)?)),
        "has_only_phrase" => Ok(has_only_phrase(&operand.to_repr(), first_arg(args, name)?)),
        "has_beginning" => Ok(has_beginning(&operand.to_repr(), first_arg(args, name)?)),
        "has_text" => Ok(has_text(&operand.to_repr())),
        "has_number" => Ok(extract_number(&operand.to_repr()).map(TestResult::number)),
        "has_number_eq" => has_number_compare(operand, args, name, |n, a| n == a),
        "has_number_lt" => has_number_compare(operand, args, name, |n, a| n < a),
        "has_number_gt" => has_number_compare(operand, args, name, |n, a| n > a),
        "has_number_between" => {
            if args.len() < 2 {
                return Err(format!("{} requires two arguments", name));
            }
            let min = parse_number(&args[0], name)?;
            let max = parse_number(&args[1], name)?;
            Ok(extract_number(&operand.to_repr())
                .filter(|n| *n >= min && *n <= max)
                .map(TestResult::number))
        }
        "has_date" => Ok(extract_date(&operand.to_repr(), env).map(date_result)),
        "has_date_gt" => has_date_compare(operand, args, env, name, |d, a| d > a),
        "has_date_lt" => has_date_compare(operand, args, env, name, |d, a| d < a),
        "has_email" => Ok(has_email(&operand.to_repr())),
        "has_phone" => Ok(has_phone(&operand.to_repr())),
        "has_pattern" => has_pattern(&operand.to_repr(), first_arg(args, name)?),
        "has_intent" => has_intent(operand, args, name),
        "has_top_intent" => has_top_intent(operand, args, name),
        other => Err(format!("unknown test type: '{}'", other)),
    }
}

fn first_arg<'a>(args: &'a [String], name: &str) -> Result<&'a str, String> {
    args.first()
        .map(|s| s.as_str())
        .ok_or_else(|| format!("{} requires one argument", name))
}

fn parse_number(arg: &str, name: &str) -> Result<f64, String> {
    arg.trim()
        .parse::<f64>()
        .map_err(|_| format!("{} argument '{}' is not a number", name, arg))
}

fn has_any_word(text: &str, words: &str) -> Option<TestResult> {
    let wanted: Vec<String> = tokenize(words)
        .into_iter()
        .map(|w| w.to_lowercase())
        .collect();
    let matched: Vec<&str> = tokenize(text)
        .into_iter()
        .filter(|t| wanted.contains(&t.to_lowercase()))
        .collect();
    if matched.is_empty() {
        None
    } else {
        Some(TestResult::text(matched.join(" ")))
    }
}

fn has_all_words(text: &str, words: &str) -> Option<TestResult> {
    let wanted: Vec<String> = tokenize(words)
        .into_iter()
        .map(|w| w.to_lowercase())
        .collect();
    let tokens: Vec<String> = tokenize(text)
        .into_iter()
        .map(|t| t.to_lowercase())
        .collect();
    if wanted.iter().all(|w| tokens.contains(w)) && !wanted.is_empty() {
        let matched: Vec<&str> = tokenize(text)
            .into_iter()
            .filter(|t| wanted.contains(&t.to_lowercase()))
            .collect();
        Some(TestResult::text(matched.join(" ")))
    } else {
        None
    }
}

fn has_phrase(text: &str, phrase: &str) -> Option<TestResult> {
    let tokens: Vec<String> = tokenize(text)
        .into_iter()
        .map(|t| t.to_lowercase())
        .collect();
    let wanted: Vec<String> = tokenize(phrase)
        .into_iter()
        .map(|t| t.to_lowercase())
        .collect();
    if wanted.is_empty() {
        return Some(TestResult::text(""));
    }
    if wanted.len() > tokens.len() {
        return None;
    }
    for start in 0..=(tokens.len() - wanted.len()) {
        if tokens[start..start + wanted.len()] == wanted[..] {
            let original: Vec<&str> = tokenize(text)[start..start + wanted.len()].to_vec();
            return Some(TestResult::text(original.join(" ")));
        }
    }
    None
}

fn has_only_phrase(text: &str, phrase: &str) -> Option<TestResult> {
    let tokens: Vec<String> = tokenize(text)
        .into_iter()
        .map(|t| t.to_lowercase())
        .collect();
    let wanted: Vec<String> = tokenize(phrase)
        .into_iter()
        .map(|t| t.to_lowercase())
        .collect();
    if tokens == wanted {
        Some(TestResult::text(text.trim()))
    } else {
        None
    }
}

fn has_beginning(text: &str, beginning: &str) -> Option<TestResult> {
    let trimmed = text.trim();
    let wanted = beginning.trim();
    if wanted.is_empty() {
        return None;
    }
    let head: String = trimmed.chars().take(wanted.chars().count()).collect();
    if head.to_lowercase() == wanted.to_lowercase() {
        Some(TestResult::text(head))
    } else {
        None
    }
}

fn has_text(text: &str) -> Option<TestResult> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(TestResult::text(trimmed))
    }
}

fn extract_number(text: &str) -> Option<f64> {
    for token in text.split_whitespace() {
        let cleaned: String = token
            .chars()
            .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
            .collect();
        if let Ok(n) = cleaned.parse::<f64>() {
            return Some(n);
        }
    }
    None
}

fn has_number_compare(
    operand: &Value,
    args: &[String],
    name: &str,
    cmp: fn(f64, f64) -> bool,
) -> Result<Option<TestResult>, String> {
    let arg = parse_number(first_arg(args, name)?, name)?;
    Ok(extract_number(&operand.to_repr())
        .filter(|n| cmp(*n, arg))
        .map(TestResult::number))
}

fn date_result(date: NaiveDate) -> TestResult {
    TestResult {
        matched: Value::Text(date.format("%Y-%m-%d").to_string()),
        extra: None,
    }
}

/// Finds the first date-looking token in the text, interpreted per the
/// environment's date format.
fn extract_date(text: &str, env: &Environment) -> Option<NaiveDate> {
    let re = Regex::new(r"(\d{1,4})[-/\.](\d{1,2})[-/\.](\d{1,4})").expect("valid regex");
    let caps = re.captures(text)?;
    let a: i32 = caps[1].parse().ok()?;
    let b: u32 = caps[2].parse().ok()?;
    let c: i32 = caps[3].parse().ok()?;

    match env.date_format {
        DateFormat::YearMonthDay => NaiveDate::from_ymd_opt(a, b, c as u32),
        DateFormat::DayMonthYear => NaiveDate::from_ymd_opt(c, b, a as u32),
        DateFormat::MonthDayYear => NaiveDate::from_ymd_opt(c, a as u32, b),
    }
}

fn has_date_compare(
    operand: &Value,
    args: &[String],
    env: &Environment,
    name: &str,
    cmp: fn(NaiveDate, NaiveDate) -> bool,
) -> Result<Option<TestResult>, String> {
    let arg_text = first_arg(args, name)?;
    let arg = extract_date(arg_text, env)
        .ok_or_else(|| format!("{} argument '{}' is not a date", name, arg_text))?;
    Ok(extract_date(&operand.to_repr(), env)
        .filter(|d| cmp(*d, arg))
        .map(date_result))
}

fn has_email(text: &str) -> Option<TestResult> {
    let re = Regex::new(r"[\w+\.\-]+@[\w\-]+(\.[\w\-]+)+").expect("valid regex");
    re.find(text).map(|m| TestResult::text(m.as_str()))
}

fn has_phone(text: &str) -> Option<TestResult> {
    let re = Regex::new(r"\+?[\d\s\-\(\)]{7,}").expect("valid regex");
    let m = re.find(text)?;
    let digits: String = m.as_str().chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() < 7 {
        return None;
    }
    let normalized = if m.as_str().trim_start().starts_with('+') {
        format!("+{}", digits)
    } else {
        digits
    };
    Some(TestResult::text(normalized))
}

fn has_pattern(text: &str, pattern: &str) -> Result<Option<TestResult>, String> {
    let re = Regex::new(&format!("(?i){}", pattern))
        .map_err(|e| format!("invalid regex '{}': {}", pattern, e))?;
    Ok(re.captures(text).map(|caps| {
        let groups: serde_json::Map<String, Json> = caps
            .iter()
            .enumerate()
            .filter_map(|(i, m)| m.map(|m| (i.to_string(), Json::String(m.as_str().to_string()))))
            .collect();
        TestResult {
            matched: Value::text(caps.get(0).map(|m| m.as_str()).unwrap_or("")),
            extra: Some(Json::Object(groups)),
        }
    }))
}

// intent tests operate on a classification result object:
// {"intents": [{"name": "book_flight", "confidence": 0.5}, ...]}
fn intents_of(operand: &Value) -> Vec<(String, f64)> {
    let Some(Value::Array(intents)) = operand.property("intents") else {
        return Vec::new();
    };
    intents
        .iter()
        .filter_map(|i| {
            let name = i.property("name")?.to_repr();
            let confidence = i.property("confidence")?.as_number()?;
            Some((name, confidence))
        })
        .collect()
}

fn has_intent(
    operand: &Value,
    args: &[String],
    name: &str,
) -> Result<Option<TestResult>, String> {
    if args.len() < 2 {
        return Err(format!("{} requires two arguments", name));
    }
    let wanted = &args[0];
    let threshold = parse_number(&args[1], name)?;
    Ok(intents_of(operand)
        .into_iter()
        .find(|(n, c)| n == wanted && *c >= threshold)
        .map(|(n, c)| TestResult {
            matched: Value::text(n),
            extra: Some(serde_json::json!({ "confidence": c })),
        }))
}

fn has_top_intent(
    operand: &Value,
    args: &[String],
    name: &str,
) -> Result<Option<TestResult>, String> {
    if args.len() < 2 {
        return Err(format!("{} requires two arguments", name));
    }
    let wanted = &args[0];
    let threshold = parse_number(&args[1], name)?;
    let intents = intents_of(operand);
    let top = intents
        .iter()
        .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
    Ok(top
        .filter(|(n, c)| n == wanted && *c >= threshold)
        .map(|(n, c)| TestResult {
            matched: Value::text(n.clone()),
            extra: Some(serde_json::json!({ "confidence": c })),
        }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env() -> Environment {
        Environment::default()
    }

    fn run_test(name: &str, operand: &str, args: &[&str]) -> Option<TestResult> {
        let args: Vec<String> = args.iter().map(|s| s.to_string()).collect();
        evaluate_case_test(name, &Value::text(operand), &args, &env()).unwrap()
    }

    #[test]
    fn test_has_any_word() {
        let result = run_test("has_any_word", "I love RED!", &["red blue"]).unwrap();
        assert_eq!(result.matched, Value::text("RED"));

        assert!(run_test("has_any_word", "I love green", &["red blue"]).is_none());
        assert!(run_test("has_any_word", "reddish", &["red"]).is_none());
    }

    #[test]
    fn test_has_all_words() {
        let result = run_test("has_all_words", "the quick brown FOX", &["quick fox"]).unwrap();
        assert_eq!(result.matched, Value::text("quick FOX"));
        assert!(run_test("has_all_words", "the quick brown", &["quick fox"]).is_none());
    }

    #[test]
    fn test_has_phrase() {
        let result = run_test("has_phrase", "you are a nice person", &["a nice"]).unwrap();
        assert_eq!(result.matched, Value::text("a nice"));
        assert!(run_test("has_phrase", "nice a you are", &["a nice"]).is_none());
    }

    #[test]
    fn test_has_only_phrase() {
        assert!(run_test("has_only_phrase", " Red ", &["red"]).is_some());
        assert!(run_test("has_only_phrase", "bright red", &["red"]).is_none());
    }

    #[test]
    fn test_has_beginning() {
        let result = run_test("has_beginning", "The quick brown", &["the quick"]).unwrap();
        assert_eq!(result.matched, Value::text("The quick"));
        assert!(run_test("has_beginning", "quick the brown", &["the quick"]).is_none());
    }

    #[test]
    fn test_has_number() {
        let result = run_test("has_number", "I am 25 years old", &[]).unwrap();
        assert_eq!(result.matched, Value::Number(25.0));
        assert!(run_test("has_number", "no numbers here", &[]).is_none());
    }

    #[test]
    fn test_has_number_between() {
        assert!(run_test("has_number_between", "I am 25", &["18", "65"]).is_some());
        assert!(run_test("has_number_between", "I am 12", &["18", "65"]).is_none());
        // bad arguments are an error, not a non-match
        let args = vec!["x".to_string(), "y".to_string()];
        assert!(
            evaluate_case_test("has_number_between", &Value::text("25"), &args, &env()).is_err()
        );
    }

    #[test]
    fn test_has_dates() {
        let result = run_test("has_date", "it was 2017-01-15 I think", &[]).unwrap();
        assert_eq!(result.matched, Value::text("2017-01-15"));

        assert!(run_test("has_date_gt", "2017-01-15", &["2017-01-01"]).is_some());
        assert!(run_test("has_date_gt", "2016-12-31", &["2017-01-01"]).is_none());
        assert!(run_test("has_date_lt", "2016-12-31", &["2017-01-01"]).is_some());
    }

    #[test]
    fn test_has_email() {
        let result = run_test("has_email", "write me at bob@nyaruka.com please", &[]).unwrap();
        assert_eq!(result.matched, Value::text("bob@nyaruka.com"));
        assert!(run_test("has_email", "no email here", &[]).is_none());
    }

    #[test]
    fn test_has_phone() {
        let result = run_test("has_phone", "call +1 206 555 1212 today", &[]).unwrap();
        assert_eq!(result.matched, Value::text("+12065551212"));
        assert!(run_test("has_phone", "call 12", &[]).is_none());
    }

    #[test]
    fn test_has_pattern() {
        let result = run_test("has_pattern", "My code is AB-1234", &["([A-Z]{2})-(\\d+)"]).unwrap();
        assert_eq!(result.matched, Value::text("AB-1234"));
        let extra = result.extra.unwrap();
        assert_eq!(extra["1"], "AB");
        assert_eq!(extra["2"], "1234");

        assert!(evaluate_case_test(
            "has_pattern",
            &Value::text("x"),
            &["(".to_string()],
            &env()
        )
        .is_err());
    }

    #[test]
    fn test_has_intent() {
        let classification = Value::from_json(&serde_json::json!({
            "intents": [
                {"name": "book_flight", "confidence": 0.75},
                {"name": "book_hotel", "confidence": 0.2}
            ]
        }));
        let args = vec!["book_flight".to_string(), "0.5".to_string()];
        let result = evaluate_case_test("has_intent", &classification, &args, &env())
            .unwrap()
            .unwrap();
        assert_eq!(result.matched, Value::text("book_flight"));

        let args = vec!["book_hotel".to_string(), "0.5".to_string()];
        assert!(evaluate_case_test("has_intent", &classification, &args, &env())
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_unknown_test() {
        assert!(evaluate_case_test("has_vibes", &Value::text("x"), &[], &env()).is_err());
    }
}
