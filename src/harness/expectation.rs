//! Structural comparison of step results against expected values.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Value};

use super::{BoxError, CheckFn, TestContext};

/// Expected shape of a step result.
///
/// Both sides are serialised to JSON and compared field by field, so only
/// fields present on the expected side need to be meaningful. Top-level
/// fields listed through [`Expectation::ignore`] are skipped.
#[derive(Clone, Debug, PartialEq)]
pub struct Expectation {
    expected: Value,
    ignored: BTreeSet<String>,
}

impl Expectation {
    /// Expects values equal to `expected`.
    ///
    /// # Errors
    ///
    /// Returns the serialisation error when `expected` cannot be turned
    /// into JSON.
    pub fn new(expected: &impl Serialize) -> Result<Self, serde_json::Error> {
        Ok(Self {
            expected: serde_json::to_value(expected)?,
            ignored: BTreeSet::new(),
        })
    }

    /// Skips the named top-level fields. Use this for server-assigned
    /// values such as identifiers or timestamps.
    #[must_use]
    pub fn ignore<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ignored.extend(fields.into_iter().map(Into::into));
        self
    }

    /// Compares `actual` with the expected value.
    ///
    /// # Errors
    ///
    /// Returns a message listing every mismatching field.
    pub fn check(&self, actual: &impl Serialize) -> Result<(), BoxError> {
        let actual_value = serde_json::to_value(actual)?;
        let mismatches = self.mismatches(&actual_value);
        if mismatches.is_empty() {
            return Ok(());
        }
        Err(format!("unexpected field values: {}", mismatches.join("; ")).into())
    }

    /// Wraps the expectation as a step check.
    #[must_use]
    pub fn into_check<T: Serialize + 'static>(self) -> CheckFn<T> {
        Arc::new(move |_ctx: &TestContext, actual: &T| self.check(actual))
    }

    fn mismatches(&self, actual: &Value) -> Vec<String> {
        match (&self.expected, actual) {
            (Value::Object(expected), Value::Object(found)) => {
                object_mismatches(expected, found, &self.ignored)
            }
            (expected, found) if expected == found => Vec::new(),
            (expected, found) => vec![format!("expected {expected}, got {found}")],
        }
    }
}

fn object_mismatches(
    expected: &Map<String, Value>,
    found: &Map<String, Value>,
    ignored: &BTreeSet<String>,
) -> Vec<String> {
    expected
        .iter()
        .filter(|(field, _)| !ignored.contains(field.as_str()))
        .filter_map(|(field, want)| {
            let got = found.get(field).unwrap_or(&Value::Null);
            (got != want).then(|| format!("{field}: expected {want}, got {got}"))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use serde::Serialize;

    use super::*;

    #[derive(Serialize)]
    struct Shape {
        #[serde(rename = "ID")]
        id: u64,
        name: &'static str,
        tags: Vec<&'static str>,
    }

    #[test]
    fn ignored_fields_are_skipped() {
        let expectation = Expectation::new(&Shape {
            id: 0,
            name: "web",
            tags: vec!["a"],
        })
        .expect("serialise")
        .ignore(["ID"]);

        expectation
            .check(&Shape {
                id: 42,
                name: "web",
                tags: vec!["a"],
            })
            .expect("only the ignored field differs");
    }

    #[test]
    fn mismatches_name_each_field() {
        let expectation = Expectation::new(&Shape {
            id: 1,
            name: "web",
            tags: vec![],
        })
        .expect("serialise");

        let err = expectation
            .check(&Shape {
                id: 2,
                name: "db",
                tags: vec![],
            })
            .expect_err("two fields differ");
        let message = err.to_string();
        assert!(message.contains("ID: expected 1, got 2"), "{message}");
        assert!(message.contains(r#"name: expected "web", got "db""#), "{message}");
        assert!(!message.contains("tags"), "{message}");
    }

    #[test]
    fn fields_missing_from_expected_value_are_not_compared() {
        let expectation = Expectation::new(&serde_json::json!({ "name": "web" })).expect("serialise");
        expectation
            .check(&Shape {
                id: 9,
                name: "web",
                tags: vec!["x"],
            })
            .expect("extra actual fields are fine");
    }
}
