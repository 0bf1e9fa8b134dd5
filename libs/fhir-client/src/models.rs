//! Response models shared by the clients

use serde_json::Value;

/// Outcome of a write (PUT or transaction POST).
///
/// Non-2xx statuses are not errors at this level: callers inspect the status
/// and the OperationOutcome to decide how to react.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteResponse {
    pub status: u16,
    /// Parsed JSON body, if the server returned one
    pub body: Option<Value>,
    /// Raw body text (kept for non-JSON error pages)
    pub text: String,
}

impl WriteResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status)
    }

    /// Human-readable diagnostics: every `issue[].diagnostics` and
    /// `issue[].details.text` of an OperationOutcome body, or the raw text.
    pub fn diagnostics(&self) -> String {
        let Some(issues) = self
            .body
            .as_ref()
            .and_then(|b| b.get("issue"))
            .and_then(Value::as_array)
        else {
            return self.text.clone();
        };

        let parts: Vec<&str> = issues
            .iter()
            .flat_map(|issue| {
                [
                    issue.get("diagnostics").and_then(Value::as_str),
                    issue
                        .get("details")
                        .and_then(|d| d.get("text"))
                        .and_then(Value::as_str),
                ]
            })
            .flatten()
            .collect();

        if parts.is_empty() {
            self.text.clone()
        } else {
            parts.join("; ")
        }
    }
}

/// Resources collected from all pages of a search.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchResults {
    /// Entries with `search.mode = match` (or no mode)
    pub matches: Vec<Value>,
    /// Entries pulled in by `_include`
    pub included: Vec<Value>,
    /// Paging stopped at the page cap while a `next` link remained
    pub truncated: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn diagnostics_from_operation_outcome() {
        let response = WriteResponse {
            status: 412,
            body: Some(json!({
                "resourceType": "OperationOutcome",
                "issue": [
                    {"severity": "error", "code": "processing",
                     "diagnostics": "Resource Medication/42 not found, specified in path: MedicationRequest.medication"},
                    {"severity": "error", "code": "invalid", "details": {"text": "second issue"}}
                ]
            })),
            text: String::new(),
        };
        assert!(response.is_client_error());
        assert_eq!(
            response.diagnostics(),
            "Resource Medication/42 not found, specified in path: MedicationRequest.medication; second issue"
        );
    }

    #[test]
    fn diagnostics_fall_back_to_text() {
        let response = WriteResponse {
            status: 400,
            body: None,
            text: "<html>Bad Request</html>".to_string(),
        };
        assert_eq!(response.diagnostics(), "<html>Bad Request</html>");
        assert!(!response.is_success());
    }
}
