//! Operator registry
//!
//! Operators are named binary predicates used infix in firewall expressions,
//! e.g. `http.query contains "union"`. The right-hand side is the expression
//! operand and the left-hand side the request-derived variable operand. Each
//! operator declares at registration whether its failures count as a
//! non-match or surface as an error.

use super::error::{FirewallError, FirewallResult};
use crate::modules::waf::{PatternMatcher, RegexMatcher};
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Operand and result value of expressions
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// Text
    Str(String),
    /// Integer
    Int(i64),
    /// Boolean
    Bool(bool),
}

impl Value {
    /// Type name used in diagnostics
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Str(_) => "string",
            Self::Int(_) => "integer",
            Self::Bool(_) => "boolean",
        }
    }

    /// Textual form; integers and booleans use their decimal or literal form
    pub fn as_text(&self) -> Cow<'_, str> {
        match self {
            Self::Str(s) => Cow::Borrowed(s),
            Self::Int(n) => Cow::Owned(n.to_string()),
            Self::Bool(b) => Cow::Owned(b.to_string()),
        }
    }

    /// Integer form. Text must be a bare decimal integer; booleans have none.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(n) => Some(*n),
            Self::Str(s) => s.parse().ok(),
            Self::Bool(_) => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Str(s) => write!(f, "{:?}", s),
            Self::Int(n) => write!(f, "{}", n),
            Self::Bool(b) => write!(f, "{}", b),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Self::Int(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

/// How an operator failure is resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnFailure {
    /// Failure evaluates to `false`
    NoMatch,
    /// Failure is reported as [`FirewallError::Operator`]
    Error,
}

/// Operator function: `(expression operand, variable operand)`
pub type OperatorFn = dyn Fn(&Value, &Value) -> Result<bool, String> + Send + Sync;

#[derive(Clone)]
struct Operator {
    func: Arc<OperatorFn>,
    on_failure: OnFailure,
    literal_only: bool,
}

/// Registry of named operators, built once and shared by `Arc`
#[derive(Clone, Default)]
pub struct OperatorRegistry {
    operators: HashMap<String, Operator>,
}

impl fmt::Debug for OperatorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperatorRegistry")
            .field("operators", &self.names())
            .finish()
    }
}

impl OperatorRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in operators
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();

        registry.register("le", OnFailure::NoMatch, |e, v| numeric(e, v, |v, e| v <= e));
        registry.register("lt", OnFailure::NoMatch, |e, v| numeric(e, v, |v, e| v < e));
        registry.register("ge", OnFailure::NoMatch, |e, v| numeric(e, v, |v, e| v >= e));
        registry.register("gt", OnFailure::NoMatch, |e, v| numeric(e, v, |v, e| v > e));

        registry.register("contains", OnFailure::NoMatch, |e, v| {
            Ok(v.as_text().contains(e.as_text().as_ref()))
        });
        registry.register("starts_with", OnFailure::NoMatch, |e, v| {
            Ok(v.as_text().starts_with(e.as_text().as_ref()))
        });
        registry.register("ends_with", OnFailure::NoMatch, |e, v| {
            Ok(v.as_text().ends_with(e.as_text().as_ref()))
        });

        // Compiled patterns are cached per distinct source, so the pattern
        // must come from the rule text and never from the request.
        let matcher = RegexMatcher::new();
        registry.register_literal("matches", OnFailure::Error, move |e, v| {
            matcher
                .is_match(&e.as_text(), &v.as_text())
                .map_err(|err| err.to_string())
        });

        registry
    }

    /// Register or replace an operator
    pub fn register<F>(&mut self, name: impl Into<String>, on_failure: OnFailure, func: F)
    where
        F: Fn(&Value, &Value) -> Result<bool, String> + Send + Sync + 'static,
    {
        self.insert(name.into(), on_failure, false, Arc::new(func));
    }

    /// Register or replace an operator whose expression operand must be a
    /// literal in the rule source
    pub fn register_literal<F>(&mut self, name: impl Into<String>, on_failure: OnFailure, func: F)
    where
        F: Fn(&Value, &Value) -> Result<bool, String> + Send + Sync + 'static,
    {
        self.insert(name.into(), on_failure, true, Arc::new(func));
    }

    fn insert(&mut self, name: String, on_failure: OnFailure, literal_only: bool, func: Arc<OperatorFn>) {
        self.operators.insert(
            name,
            Operator {
                func,
                on_failure,
                literal_only,
            },
        );
    }

    /// Whether `name` is registered
    pub fn contains(&self, name: &str) -> bool {
        self.operators.contains_key(name)
    }

    /// Whether operator `name` only accepts a literal expression operand
    pub fn requires_literal(&self, name: &str) -> bool {
        self.operators.get(name).is_some_and(|op| op.literal_only)
    }

    /// Registered operator names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.operators.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Number of registered operators
    pub fn len(&self) -> usize {
        self.operators.len()
    }

    /// Whether the registry is empty
    pub fn is_empty(&self) -> bool {
        self.operators.is_empty()
    }

    /// Apply operator `name`.
    ///
    /// # Errors
    ///
    /// [`FirewallError::UnknownOperator`] if `name` is not registered, or
    /// [`FirewallError::Operator`] if the operator fails and was registered
    /// with [`OnFailure::Error`].
    pub fn call(&self, name: &str, expression: &Value, variable: &Value) -> FirewallResult<bool> {
        let operator = self
            .operators
            .get(name)
            .ok_or_else(|| FirewallError::UnknownOperator(name.to_string()))?;

        match (operator.func)(expression, variable) {
            Ok(result) => Ok(result),
            Err(_) if operator.on_failure == OnFailure::NoMatch => Ok(false),
            Err(message) => Err(FirewallError::Operator {
                name: name.to_string(),
                message,
            }),
        }
    }
}

/// Integer comparison; either operand failing to parse is an error
fn numeric(
    expression: &Value,
    variable: &Value,
    compare: impl Fn(i64, i64) -> bool,
) -> Result<bool, String> {
    let e = expression
        .as_int()
        .ok_or_else(|| format!("expression operand {} is not an integer", expression))?;
    let v = variable
        .as_int()
        .ok_or_else(|| format!("variable operand {} is not an integer", variable))?;
    Ok(compare(v, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_le() {
        let registry = OperatorRegistry::with_defaults();
        let ten = Value::from("10");

        assert!(registry.call("le", &ten, &Value::Int(5)).unwrap());
        assert!(registry.call("le", &ten, &Value::from("10")).unwrap());
        assert!(!registry.call("le", &ten, &Value::Int(11)).unwrap());
        assert!(!registry.call("le", &ten, &Value::from("abc")).unwrap());
        assert!(!registry.call("le", &Value::from("ten"), &Value::Int(1)).unwrap());
        assert!(!registry.call("le", &ten, &Value::Bool(true)).unwrap());
    }

    #[test]
    fn test_numeric_text_is_exact() {
        let registry = OperatorRegistry::with_defaults();
        let ten = Value::Int(10);

        assert_eq!(Value::from(" 5").as_int(), None);
        assert_eq!(Value::from("5\n").as_int(), None);
        assert_eq!(Value::from("-5").as_int(), Some(-5));
        assert!(!registry.call("le", &ten, &Value::from(" 5")).unwrap());
        assert!(!registry.call("ge", &Value::from("5 "), &ten).unwrap());
    }

    #[test]
    fn test_numeric_family() {
        let registry = OperatorRegistry::with_defaults();
        let five = Value::Int(5);

        assert!(registry.call("lt", &five, &Value::Int(4)).unwrap());
        assert!(!registry.call("lt", &five, &Value::Int(5)).unwrap());
        assert!(registry.call("ge", &five, &Value::Int(5)).unwrap());
        assert!(registry.call("gt", &five, &Value::from("6")).unwrap());
        assert!(!registry.call("gt", &five, &Value::from("x")).unwrap());
    }

    #[test]
    fn test_text_operators() {
        let registry = OperatorRegistry::with_defaults();
        let query = Value::from("id=1 union select");

        assert!(registry.call("contains", &Value::from("union"), &query).unwrap());
        assert!(registry.call("starts_with", &Value::from("id="), &query).unwrap());
        assert!(registry.call("ends_with", &Value::from("select"), &query).unwrap());
        assert!(registry.call("contains", &Value::Int(42), &Value::from("a42b")).unwrap());
    }

    #[test]
    fn test_matches_reports_bad_pattern() {
        let registry = OperatorRegistry::with_defaults();

        assert!(registry
            .call("matches", &Value::from(r"^/admin"), &Value::from("/admin/users"))
            .unwrap());

        let err = registry
            .call("matches", &Value::from("(oops"), &Value::from("x"))
            .unwrap_err();
        assert!(matches!(err, FirewallError::Operator { ref name, .. } if name == "matches"));
    }

    #[test]
    fn test_literal_only_operators() {
        let registry = OperatorRegistry::with_defaults();
        assert!(registry.requires_literal("matches"));
        assert!(!registry.requires_literal("contains"));
        assert!(!registry.requires_literal("le"));
        assert!(!registry.requires_literal("missing"));
    }

    #[test]
    fn test_unknown_operator() {
        let registry = OperatorRegistry::new();
        assert!(registry.is_empty());
        let err = registry.call("le", &Value::Int(1), &Value::Int(1)).unwrap_err();
        assert_eq!(err, FirewallError::UnknownOperator("le".to_string()));
    }

    #[test]
    fn test_custom_operator() {
        let mut registry = OperatorRegistry::new();
        registry.register("strict_eq", OnFailure::Error, |e, v| {
            if e.type_name() != v.type_name() {
                return Err(format!("{} vs {}", e.type_name(), v.type_name()));
            }
            Ok(e == v)
        });

        assert!(registry.contains("strict_eq"));
        assert!(!registry.requires_literal("strict_eq"));
        assert!(registry.call("strict_eq", &Value::Int(1), &Value::Int(1)).unwrap());
        assert!(registry.call("strict_eq", &Value::Int(1), &Value::from("1")).is_err());
        assert_eq!(registry.names(), vec!["strict_eq"]);
    }
}
