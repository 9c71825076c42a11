use serde::Serialize;
use std::fmt;

/// A script variable.
///
/// Coercions never fail: reading the wrong shape yields an empty string,
/// zero or an empty list.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Scalar(String),
    Number(f64),
    List(Vec<String>),
}

impl Default for Value {
    fn default() -> Self {
        Value::Scalar(String::new())
    }
}

impl Value {
    /// Lists are joined with `", "`.
    pub fn as_string(&self) -> String {
        match self {
            Value::Scalar(s) => s.clone(),
            Value::Number(n) => format_number(*n),
            Value::List(items) => items.join(", "),
        }
    }

    pub fn as_number(&self) -> f64 {
        match self {
            Value::Number(n) => *n,
            Value::Scalar(s) => s.trim().parse().unwrap_or(0.0),
            Value::List(_) => 0.0,
        }
    }

    /// A scalar is a one-element list; an empty scalar is an empty list.
    pub fn as_list(&self) -> Vec<String> {
        match self {
            Value::List(items) => items.clone(),
            Value::Scalar(s) if s.is_empty() => Vec::new(),
            other => vec![other.as_string()],
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Value::Scalar(s) => s.trim().is_empty(),
            Value::Number(_) => false,
            Value::List(items) => items.is_empty(),
        }
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Scalar(s) => !(s.is_empty() || s.eq_ignore_ascii_case("false")),
            Value::Number(n) => *n != 0.0,
            Value::List(items) => !items.is_empty(),
        }
    }

    /// Convert a YAML value from a script's `vars` block.
    pub fn from_yaml(value: &serde_yaml::Value) -> Value {
        use serde_yaml::Value as Y;
        match value {
            Y::Null => Value::default(),
            Y::Bool(b) => Value::Scalar(b.to_string()),
            Y::Number(n) => n.as_f64().map_or_else(|| Value::Scalar(n.to_string()), Value::Number),
            Y::String(s) => Value::Scalar(s.clone()),
            Y::Sequence(items) => {
                Value::List(items.iter().map(|v| Value::from_yaml(v).as_string()).collect())
            }
            Y::Mapping(_) | Y::Tagged(_) => {
                Value::Scalar(serde_yaml::to_string(value).unwrap_or_default().trim().to_string())
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_string())
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Scalar(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Scalar(s)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<Vec<String>> for Value {
    fn from(items: Vec<String>) -> Self {
        Value::List(items)
    }
}

/// Integers print without a fractional part.
pub fn format_number(n: f64) -> String {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

/// True iff `text` is an optionally negative decimal literal such as `42`
/// or `-3.5`.
pub fn is_numeric_literal(text: &str) -> bool {
    let digits = text.strip_prefix('-').unwrap_or(text);
    let (int, frac) = match digits.split_once('.') {
        Some((int, frac)) => (int, Some(frac)),
        None => (digits, None),
    };
    let all_digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
    all_digits(int) && frac.is_none_or(all_digits)
}

/// Parse `text` as a number only if it is a plain numeric literal.
pub fn parse_numeric(text: &str) -> Option<f64> {
    let text = text.trim();
    if is_numeric_literal(text) { text.parse().ok() } else { None }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coercions() {
        assert_eq!(Value::Number(3.0).as_string(), "3");
        assert_eq!(Value::Number(2.5).as_string(), "2.5");
        assert_eq!(Value::from("12").as_number(), 12.0);
        assert_eq!(Value::from("abc").as_number(), 0.0);
        assert_eq!(Value::List(vec!["a".into(), "b".into()]).as_string(), "a, b");
        assert_eq!(Value::from("x").as_list(), vec!["x"]);
        assert!(Value::from("").as_list().is_empty());
    }

    #[test]
    fn test_truthiness() {
        assert!(!Value::from("").is_truthy());
        assert!(!Value::from("FALSE").is_truthy());
        assert!(Value::from("no").is_truthy());
        assert!(!Value::Number(0.0).is_truthy());
        assert!(Value::Number(-1.0).is_truthy());
        assert!(!Value::List(vec![]).is_truthy());
    }

    #[test]
    fn test_numeric_literal_grammar() {
        assert!(is_numeric_literal("42"));
        assert!(is_numeric_literal("-3.25"));
        assert!(!is_numeric_literal("1e5"));
        assert!(!is_numeric_literal("1."));
        assert!(!is_numeric_literal(".5"));
        assert!(!is_numeric_literal(" 1"));
        assert!(!is_numeric_literal("0x10"));
        assert_eq!(parse_numeric(" 7 "), Some(7.0));
        assert_eq!(parse_numeric("7a"), None);
    }

    #[test]
    fn test_from_yaml() {
        let yaml: serde_yaml::Value = serde_yaml::from_str("[a, 2, true]").unwrap();
        assert_eq!(
            Value::from_yaml(&yaml),
            Value::List(vec!["a".into(), "2".into(), "true".into()])
        );
        let yaml: serde_yaml::Value = serde_yaml::from_str("5").unwrap();
        assert_eq!(Value::from_yaml(&yaml), Value::Number(5.0));
    }
}
