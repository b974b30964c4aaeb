use serde::{Deserialize, Serialize};

/// Outcome envelope carried by every authority response.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ResponseStatus {
    pub success: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
}

impl ResponseStatus {
    /// A successful status with no message.
    pub fn ok() -> Self {
        Self {
            success: true,
            message: String::new(),
        }
    }

    /// A failed status carrying `message`.
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Request payloads
// ---------------------------------------------------------------------------

/// Asks for the storage budget of a principal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryQuotaRequest {
    pub principal: String,
}

/// Asks whether content exists and whether the principal references it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryExistenceRequest {
    pub file_hash: String,
    pub principal: String,
}

/// Links already-stored content to a principal without transferring bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterReferenceRequest {
    pub file_hash: String,
    pub principal: String,
}

/// Metadata sent ahead of an upload's byte stream.
///
/// `file_hash` is the client's claim; the store answers with the digest it
/// actually computed over the received bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadContentRequest {
    pub file_hash: String,
    pub file_name: String,
    pub file_size: u64,
    pub principal: String,
}

// ---------------------------------------------------------------------------
// Response payloads
// ---------------------------------------------------------------------------

/// Storage budget of a principal, in bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryQuotaResponse {
    pub response: ResponseStatus,
    #[serde(default)]
    pub total_quota: u64,
    #[serde(default)]
    pub used_quota: u64,
    #[serde(default)]
    pub available_quota: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryExistenceResponse {
    pub response: ResponseStatus,
    #[serde(default)]
    pub exists: bool,
    #[serde(default)]
    pub referenced_by_principal: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterReferenceResponse {
    pub response: ResponseStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadContentResponse {
    pub response: ResponseStatus,
    /// Digest computed by the store over the bytes it received.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub file_hash: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn existence_request_uses_camel_case() {
        let req = QueryExistenceRequest {
            file_hash: "ab".into(),
            principal: "alice".into(),
        };
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("\"fileHash\":\"ab\""));
        assert!(json.contains("\"principal\":\"alice\""));
    }

    #[test]
    fn status_omits_empty_message() {
        let json = serde_json::to_string(&ResponseStatus::ok()).unwrap();
        assert_eq!(json, r#"{"success":true}"#);

        let json = serde_json::to_string(&ResponseStatus::failed("denied")).unwrap();
        assert!(json.contains("denied"));
    }

    #[test]
    fn quota_response_defaults_missing_counters() {
        let parsed: QueryQuotaResponse =
            serde_json::from_str(r#"{"response":{"success":false,"message":"bad key"}}"#).unwrap();
        assert!(!parsed.response.success);
        assert_eq!(parsed.response.message, "bad key");
        assert_eq!(parsed.total_quota, 0);
        assert_eq!(parsed.available_quota, 0);
    }

    #[test]
    fn existence_response_field_names() {
        let json = r#"{"response":{"success":true},"exists":true,"referencedByPrincipal":false}"#;
        let parsed: QueryExistenceResponse = serde_json::from_str(json).unwrap();
        assert!(parsed.exists);
        assert!(!parsed.referenced_by_principal);
    }

    #[test]
    fn upload_response_without_hash() {
        let parsed: UploadContentResponse =
            serde_json::from_str(r#"{"response":{"success":false,"message":"disk full"}}"#)
                .unwrap();
        assert!(parsed.file_hash.is_empty());
    }
}
