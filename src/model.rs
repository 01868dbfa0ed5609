//! Domain model shared by every stage of the pipeline
//!
//! These types double as the wire format for the three queues: they
//! serialize to the PascalCase JSON payloads the stages exchange
//! (`{"Id":…,"Url":…}` for sites, the `{Int64,Valid}` object for
//! nullable integers). Unknown fields are ignored on parse.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A monitored URL with a stable numeric id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Site {
    pub id: i64,
    pub url: String,
}

/// A nullable integer that survives the JSON round trip as
/// `{"Int64":<n>,"Valid":<bool>}`, mirroring how the nullable
/// `latency` and `code` columns are stored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NullableInt {
    #[serde(rename = "Int64")]
    pub value: i64,
    #[serde(rename = "Valid")]
    pub valid: bool,
}

impl NullableInt {
    /// The absent value (`Valid: false`).
    pub const NONE: NullableInt = NullableInt {
        value: 0,
        valid: false,
    };

    pub fn some(value: i64) -> Self {
        Self { value, valid: true }
    }

    pub fn get(&self) -> Option<i64> {
        self.valid.then_some(self.value)
    }
}

impl From<Option<i64>> for NullableInt {
    fn from(value: Option<i64>) -> Self {
        match value {
            Some(value) => NullableInt::some(value),
            None => NullableInt::NONE,
        }
    }
}

impl From<NullableInt> for Option<i64> {
    fn from(value: NullableInt) -> Self {
        value.get()
    }
}

/// The persisted outcome of one probe.
///
/// `latency` and `code` are either both present (an HTTP response came
/// back, whatever its status) or both absent (transport failure).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CheckResult {
    pub site: Site,
    pub time: DateTime<Utc>,
    pub latency: NullableInt,
    pub code: NullableInt,
}

impl CheckResult {
    /// A result counts as successful only on a literal 200.
    pub fn is_successful(&self) -> bool {
        self.code.get() == Some(200)
    }
}

/// A chat known to the bot. `is_subscribed = false` mutes
/// notifications while the chat's site bindings survive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chat {
    pub id: i64,
    pub is_subscribed: bool,
}

/// A health-transition message addressed to every subscriber of `url`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Notification {
    pub url: String,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn nullable_int_wire_shape() {
        let present = serde_json::to_value(NullableInt::some(347)).unwrap();
        assert_eq!(
            present,
            serde_json::json!({ "Int64": 347, "Valid": true })
        );

        let absent = serde_json::to_value(NullableInt::NONE).unwrap();
        assert_eq!(absent, serde_json::json!({ "Int64": 0, "Valid": false }));
    }

    #[test]
    fn check_result_parses_wire_payload() {
        let payload = r#"{
            "Site": { "Id": 7, "Url": "http://a", "Extra": "ignored" },
            "Time": "2025-03-01T12:00:00Z",
            "Latency": { "Int64": 120, "Valid": true },
            "Code": { "Int64": 200, "Valid": true },
            "Unknown": 1
        }"#;

        let result: CheckResult = serde_json::from_str(payload).unwrap();
        assert_eq!(result.site.id, 7);
        assert_eq!(result.site.url, "http://a");
        assert_eq!(
            result.time,
            Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
        );
        assert_eq!(result.latency.get(), Some(120));
        assert!(result.is_successful());
    }

    #[test]
    fn transport_failure_has_no_code_and_is_not_successful() {
        let result = CheckResult {
            site: Site {
                id: 1,
                url: "http://a".to_string(),
            },
            time: Utc::now(),
            latency: NullableInt::NONE,
            code: NullableInt::NONE,
        };

        assert!(!result.is_successful());
        assert_eq!(result.code.get(), None);
        assert_eq!(result.latency.get(), None);
    }

    #[test]
    fn non_200_is_not_successful() {
        let result = CheckResult {
            site: Site {
                id: 1,
                url: "http://a".to_string(),
            },
            time: Utc::now(),
            latency: NullableInt::some(50),
            code: NullableInt::some(301),
        };

        assert!(!result.is_successful());
    }
}
