//! Intent shape discrimination.
//!
//! The `intent` field of a request carries one of three shapes:
//!
//! 1. *Explicit*: a JSON object naming a `skill` and carrying `data` for it.
//! 2. *Task*: a JSON object with a free-text `task` description.
//! 3. *Freeform*: anything unparseable, treated as a task description.
//!
//! The caller being specific matters downstream: an explicit skill name that
//! is unknown must fail rather than fall back to description matching.

use serde_json::Value;

/// A parsed intent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    /// The caller named the skill to run and supplied its input.
    Explicit { skill: String, data: String },
    /// A free-text description of the work, to be matched to a skill.
    Task(String),
}

impl Intent {
    /// Classify an intent string.
    ///
    /// Never fails: anything that is not a JSON object with a `skill` or
    /// `task` key folds into [`Intent::Task`] carrying the raw string.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        let value: Value = match serde_json::from_str(raw) {
            Ok(v) => v,
            Err(_) => return Self::Task(raw.to_owned()),
        };
        let obj = match value.as_object() {
            Some(o) => o,
            None => return Self::Task(raw.to_owned()),
        };

        if let Some(skill) = obj.get("skill").and_then(Value::as_str) {
            let data = obj.get("data").map(value_text).unwrap_or_default();
            return Self::Explicit {
                skill: skill.to_owned(),
                data,
            };
        }

        if let Some(task) = obj.get("task") {
            return Self::Task(value_text(task));
        }

        Self::Task(raw.to_owned())
    }

    /// The text handed to the child process: `data` for explicit intents,
    /// the task description otherwise.
    #[must_use]
    pub fn input(&self) -> &str {
        match self {
            Self::Explicit { data, .. } => data,
            Self::Task(task) => task,
        }
    }
}

/// String values pass through; anything else is carried as compact JSON so
/// structured caller input survives the trip to the child process.
fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_intent() {
        let intent = Intent::parse(r#"{"skill":"echo","data":"hello"}"#);
        assert_eq!(
            intent,
            Intent::Explicit {
                skill: "echo".into(),
                data: "hello".into()
            }
        );
        assert_eq!(intent.input(), "hello");
    }

    #[test]
    fn explicit_intent_without_data() {
        let intent = Intent::parse(r#"{"skill":"echo"}"#);
        assert_eq!(
            intent,
            Intent::Explicit {
                skill: "echo".into(),
                data: String::new()
            }
        );
    }

    #[test]
    fn explicit_intent_with_structured_data() {
        let intent = Intent::parse(r#"{"skill":"csv-analyzer","data":{"rows":3}}"#);
        assert_eq!(
            intent,
            Intent::Explicit {
                skill: "csv-analyzer".into(),
                data: r#"{"rows":3}"#.into()
            }
        );
    }

    #[test]
    fn task_intent() {
        let intent = Intent::parse(r#"{"task":"summarize this article"}"#);
        assert_eq!(intent, Intent::Task("summarize this article".into()));
    }

    #[test]
    fn freeform_intent() {
        let intent = Intent::parse("please summarize this article about databases");
        assert_eq!(
            intent,
            Intent::Task("please summarize this article about databases".into())
        );
    }

    #[test]
    fn json_scalar_is_freeform() {
        // Parseable JSON, but not an object; treated as raw task text.
        let intent = Intent::parse("42");
        assert_eq!(intent, Intent::Task("42".into()));
    }

    #[test]
    fn object_without_known_keys_is_task_text() {
        let raw = r#"{"foo":"bar"}"#;
        let intent = Intent::parse(raw);
        assert_eq!(intent, Intent::Task(raw.into()));
    }

    #[test]
    fn skill_key_wins_over_task_key() {
        let intent = Intent::parse(r#"{"skill":"echo","task":"ignored","data":"x"}"#);
        assert!(matches!(intent, Intent::Explicit { .. }));
    }
}
