//! Pulls the assistant reply out of a flow run response.
//!
//! The reply lives at `outputs[0].outputs[0].outputs.message.message.text`.
//! Each hop is checked; the first one that fails is named in the error.

use serde_json::Value;
use thiserror::Error;

use crate::session::Message;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unexpected flow response: {reason}")]
pub struct ExtractionError {
    pub reason: String,
}

#[derive(Debug, Clone, Copy)]
enum Step {
    Field(&'static str),
    Index(usize),
}

impl std::fmt::Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Step::Field(name) => write!(f, ".{name}"),
            Step::Index(i) => write!(f, "[{i}]"),
        }
    }
}

const REPLY_PATH: &[Step] = &[
    Step::Field("outputs"),
    Step::Index(0),
    Step::Field("outputs"),
    Step::Index(0),
    Step::Field("outputs"),
    Step::Field("message"),
    Step::Field("message"),
    Step::Field("text"),
];

fn walk<'a>(root: &'a Value, path: &[Step]) -> Result<&'a Value, ExtractionError> {
    let mut current = root;
    let mut seen = String::new();
    for step in path {
        seen.push_str(&step.to_string());
        let next = match step {
            Step::Field(name) => current.as_object().and_then(|o| o.get(*name)),
            Step::Index(i) => current.as_array().and_then(|a| a.get(*i)),
        };
        current = next.ok_or_else(|| ExtractionError { reason: format!("missing {seen}") })?;
    }
    Ok(current)
}

pub fn extract(response: &Value) -> Result<Message, ExtractionError> {
    let text = walk(response, REPLY_PATH)?
        .as_str()
        .ok_or_else(|| ExtractionError { reason: "reply text is not a string".into() })?;
    if text.is_empty() {
        return Err(ExtractionError { reason: "reply text is empty".into() });
    }
    Ok(Message::assistant(text))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Role;
    use serde_json::json;

    fn wrap(text: Value) -> Value {
        json!({"outputs": [{"outputs": [{"outputs": {"message": {"message": {"text": text}}}}]}]})
    }

    #[test]
    fn extracts_reply_text() {
        let m = extract(&wrap(json!("42"))).unwrap();
        assert_eq!(m.role, Role::Assistant);
        assert_eq!(m.content, "42");
    }

    #[test]
    fn empty_outputs_is_an_error() {
        let err = extract(&json!({"outputs": []})).unwrap_err();
        assert_eq!(err.reason, "missing .outputs[0]");
    }

    #[test]
    fn wrong_types_and_empty_text_are_errors() {
        assert!(extract(&json!(null)).is_err());
        assert!(extract(&json!({"outputs": {"0": {}}})).is_err());
        assert!(extract(&wrap(json!(7))).is_err());
        assert_eq!(extract(&wrap(json!(""))).unwrap_err().reason, "reply text is empty");
    }

    #[test]
    fn does_not_fall_back_to_other_branches() {
        let v = json!({"outputs": [
            {"outputs": [{"outputs": {}}, {"outputs": {"message": {"message": {"text": "later"}}}}]}
        ]});
        let err = extract(&v).unwrap_err();
        assert!(err.reason.ends_with(".message"), "{}", err.reason);
    }
}
