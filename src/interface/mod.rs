pub mod telegram;
pub mod terminal;

use crate::api::types::ExtractedInfo;
use crate::chat::field_label;
use crate::session::SessionState;
use serde_json::Value;

/// Buttons in display order: plain options, then document options. Both
/// front ends address a choice by its position in this list.
pub fn choice_labels(state: &SessionState) -> Vec<String> {
    state
        .options
        .iter()
        .chain(state.document_options.iter())
        .cloned()
        .collect()
}

pub fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// `Field Label (field): value` rows in server order.
pub fn format_fields(info: &ExtractedInfo) -> Vec<String> {
    info.iter()
        .map(|(field, value)| format!("{} ({}): {}", field_label(field), field, value_text(value)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_choice_labels_order() {
        let mut state = SessionState::default();
        state.options = vec!["Yes".into(), "No".into()];
        state.document_options = vec!["quote.pdf".into()];
        assert_eq!(choice_labels(&state), vec!["Yes", "No", "quote.pdf"]);
    }

    #[test]
    fn test_format_fields() {
        let Value::Object(info) = json!({"policy_number": "P-1", "year": 2020, "notes": null}) else {
            unreachable!()
        };
        assert_eq!(
            format_fields(&info),
            vec![
                "Policy Number (policy_number): P-1",
                "Year (year): 2020",
                "Notes (notes): ",
            ]
        );
    }
}
