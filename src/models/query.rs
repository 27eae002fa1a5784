//! Label / property query

use super::ModelError;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Op {
    #[serde(rename = "==")]
    Equal,
    #[serde(rename = "!=")]
    NotEqual,
    #[serde(rename = "in")]
    In,
    #[serde(rename = "notin")]
    NotIn,
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Op::Equal => "==",
            Op::NotEqual => "!=",
            Op::In => "in",
            Op::NotIn => "notin",
        };
        f.write_str(s)
    }
}

/// `(key, op, values)`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Query {
    pub key: String,
    pub op: Op,
    #[serde(default)]
    pub values: Vec<String>,
}

impl Query {
    pub fn new(key: &str, op: Op, values: &[&str]) -> Self {
        Self {
            key: key.to_string(),
            op,
            values: values.iter().map(|v| v.to_string()).collect(),
        }
    }

    pub fn eq(key: &str, value: &str) -> Self {
        Self::new(key, Op::Equal, &[value])
    }

    pub fn validate(&self) -> Result<(), ModelError> {
        if self.key.trim().is_empty() {
            return Err(ModelError::QueryInvalid("query key must not be empty".into()));
        }
        match self.op {
            Op::Equal | Op::NotEqual if self.values.len() != 1 => {
                Err(ModelError::QueryInvalid(format!(
                    "{} {} takes exactly one value, got {}",
                    self.key,
                    self.op,
                    self.values.len()
                )))
            }
            _ => Ok(()),
        }
    }

    /// Evaluates the query against the value bound to `key` on one candidate;
    /// `None` means the candidate lacks the key.
    pub fn matches(&self, candidate: Option<&str>) -> bool {
        match (self.op, candidate) {
            (Op::Equal, Some(v)) => self.values.first().is_some_and(|want| want == v),
            (Op::NotEqual, Some(v)) => self.values.first().is_some_and(|want| want != v),
            (Op::In, Some(v)) => self.values.iter().any(|want| want == v),
            (Op::NotIn, Some(v)) => !self.values.iter().any(|want| want == v),
            (_, None) => false,
        }
    }

    /// `notin` with no values keeps every candidate, present key or not.
    pub fn selects_everything(&self) -> bool {
        self.op == Op::NotIn && self.values.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equal_requires_single_value() {
        let q = Query::new("system.group", Op::Equal, &["a", "b"]);
        assert!(matches!(q.validate(), Err(ModelError::QueryInvalid(_))));
        assert!(Query::new("system.group", Op::NotEqual, &[]).validate().is_err());
        assert!(Query::eq("system.group", "a").validate().is_ok());
        assert!(Query::new("system.group", Op::In, &["a", "b", "c"]).validate().is_ok());
    }

    #[test]
    fn test_op_wire_names() {
        let q: Query =
            serde_json::from_str(r#"{"key":"k","op":"notin","values":["x"]}"#).unwrap();
        assert_eq!(q.op, Op::NotIn);
        assert_eq!(serde_json::to_value(Op::Equal).unwrap(), "==");
        assert_eq!(serde_json::to_value(Op::NotEqual).unwrap(), "!=");

        let bad: Result<Query, _> = serde_json::from_str(r#"{"key":"k","op":"~=","values":[]}"#);
        assert!(bad.is_err());
    }

    #[test]
    fn test_missing_key_never_matches() {
        for op in [Op::Equal, Op::NotEqual, Op::In, Op::NotIn] {
            let q = Query::new("k", op, &["v"]);
            assert!(!q.matches(None), "{} matched a missing key", op);
        }
    }

    #[test]
    fn test_match_table() {
        assert!(Query::eq("k", "a").matches(Some("a")));
        assert!(!Query::eq("k", "a").matches(Some("b")));
        assert!(Query::new("k", Op::NotEqual, &["a"]).matches(Some("b")));
        assert!(Query::new("k", Op::In, &["a", "b"]).matches(Some("b")));
        assert!(!Query::new("k", Op::In, &[]).matches(Some("b")));
        assert!(Query::new("k", Op::NotIn, &["a"]).matches(Some("b")));
        assert!(!Query::new("k", Op::NotIn, &["a"]).matches(Some("a")));
        assert!(Query::new("k", Op::NotIn, &[]).selects_everything());
    }
}
