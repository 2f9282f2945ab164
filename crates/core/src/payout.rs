//! Payout records and their upstream wire representation.

use chrono::{DateTime, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};
use crate::id::TransactionId;

/// Textual layout of upstream timestamps, without the weekday prefix and
/// the zone suffix.
///
/// Upstream sends `"Mon, 01 Jan 2024 00:00:00 GMT"`; the zone is always UTC
/// in practice but is carried as a name.
const UPSTREAM_TIME_LAYOUT: &str = "%d %b %Y %H:%M:%S";

/// Lifecycle state reported by upstream for a payout.
///
/// Only [`PayoutState::Notifying`] is actionable; everything else is either
/// already handled or not ready yet.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum PayoutState {
    Notifying,
    Processing,
    Other(String),
}

impl PayoutState {
    pub fn as_str(&self) -> &str {
        match self {
            PayoutState::Notifying => "notifying",
            PayoutState::Processing => "processing",
            PayoutState::Other(s) => s,
        }
    }

    pub fn is_actionable(&self) -> bool {
        matches!(self, PayoutState::Notifying)
    }
}

impl From<String> for PayoutState {
    fn from(value: String) -> Self {
        match value.as_str() {
            "notifying" => PayoutState::Notifying,
            "processing" => PayoutState::Processing,
            _ => PayoutState::Other(value),
        }
    }
}

impl From<PayoutState> for String {
    fn from(value: PayoutState) -> Self {
        value.as_str().to_string()
    }
}

/// A record without a state is never actionable.
impl Default for PayoutState {
    fn default() -> Self {
        PayoutState::Other(String::new())
    }
}

impl core::fmt::Display for PayoutState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One element of the upstream "pending payouts" response.
///
/// Decoding never rejects a field value: text fields take any JSON value,
/// missing fields default, and an unusable amount becomes `None`. A malformed
/// element then fails on its own in [`PayoutRecord::try_from`] instead of
/// failing the whole batch during decode.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamPayout {
    #[serde(deserialize_with = "lenient::text")]
    pub id: String,
    #[serde(deserialize_with = "lenient::text")]
    pub create_time: String,
    #[serde(deserialize_with = "lenient::decimal")]
    pub amount: Option<Decimal>,
    #[serde(deserialize_with = "lenient::text")]
    pub recipient_account_identifier: String,
    #[serde(deserialize_with = "lenient::state")]
    pub state: PayoutState,
}

mod lenient {
    use rust_decimal::Decimal;
    use serde::{Deserialize, Deserializer};
    use serde_json::Value;

    use super::PayoutState;

    /// Strings verbatim, `null` as empty, anything else as its JSON text.
    pub fn text<'de, D: Deserializer<'de>>(de: D) -> Result<String, D::Error> {
        Ok(match Value::deserialize(de)? {
            Value::String(s) => s,
            Value::Null => String::new(),
            other => other.to_string(),
        })
    }

    /// A JSON number or numeric string; anything else is `None`.
    pub fn decimal<'de, D: Deserializer<'de>>(de: D) -> Result<Option<Decimal>, D::Error> {
        let raw = match Value::deserialize(de)? {
            Value::String(s) => s.trim().to_string(),
            Value::Number(n) => n.to_string(),
            _ => return Ok(None),
        };
        Ok(raw
            .parse::<Decimal>()
            .or_else(|_| Decimal::from_scientific(&raw))
            .ok())
    }

    pub fn state<'de, D: Deserializer<'de>>(de: D) -> Result<PayoutState, D::Error> {
        text(de).map(PayoutState::from)
    }
}

/// A payout as recorded locally.
///
/// Created once per `external_id` and never modified afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayoutRecord {
    pub external_id: TransactionId,
    pub create_time: DateTime<Utc>,
    pub amount: Decimal,
    pub recipient_account_identifier: String,
}

impl TryFrom<UpstreamPayout> for PayoutRecord {
    type Error = DomainError;

    fn try_from(value: UpstreamPayout) -> DomainResult<Self> {
        let external_id = value.id.parse::<TransactionId>()?;
        let create_time = parse_upstream_time(&value.create_time)?;

        let amount = value.amount.ok_or_else(|| {
            DomainError::validation(format!("payout {external_id} has a missing or non-numeric amount"))
        })?;

        if value.recipient_account_identifier.trim().is_empty() {
            return Err(DomainError::validation(format!(
                "payout {external_id} has an empty recipient_account_identifier"
            )));
        }

        Ok(Self {
            external_id,
            create_time,
            amount,
            recipient_account_identifier: value.recipient_account_identifier,
        })
    }
}

/// Parse an upstream timestamp (`"Day, DD Mon YYYY HH:MM:SS TZ"`) into UTC.
///
/// The weekday name is required but not checked against the date. RFC 2822
/// zone names (`GMT`, `UT`, numeric offsets) are handled by chrono; `UTC`
/// and `Z` are accepted as well since upstream emits them on some hosts.
pub fn parse_upstream_time(value: &str) -> DomainResult<DateTime<Utc>> {
    let trimmed = strip_weekday(value.trim())
        .ok_or_else(|| DomainError::invalid_timestamp(value, "missing weekday prefix"))?;

    match DateTime::parse_from_rfc2822(trimmed) {
        Ok(dt) => Ok(dt.with_timezone(&Utc)),
        Err(rfc_err) => {
            let (local, zone) = trimmed
                .rsplit_once(' ')
                .ok_or_else(|| DomainError::invalid_timestamp(value, rfc_err))?;

            if !matches!(zone, "UTC" | "Z") {
                return Err(DomainError::invalid_timestamp(value, rfc_err));
            }

            NaiveDateTime::parse_from_str(local, UPSTREAM_TIME_LAYOUT)
                .map(|naive| naive.and_utc())
                .map_err(|e| DomainError::invalid_timestamp(value, e))
        }
    }
}

/// `"Tue, 01 Jan ..."` to `"01 Jan ..."`, if the prefix is a weekday-like word.
fn strip_weekday(value: &str) -> Option<&str> {
    let (day, rest) = value.split_once(',')?;
    let day = day.trim();
    if day.len() < 3 || !day.chars().all(|c| c.is_ascii_alphabetic()) {
        return None;
    }
    Some(rest.trim_start())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn upstream(id: &str, create_time: &str, state: &str) -> UpstreamPayout {
        UpstreamPayout {
            id: id.to_string(),
            create_time: create_time.to_string(),
            amount: Some(Decimal::from(100)),
            recipient_account_identifier: "acc_001".to_string(),
            state: PayoutState::from(state.to_string()),
        }
    }

    #[test]
    fn parses_gmt_timestamp() {
        let parsed = parse_upstream_time("Mon, 01 Jan 2024 00:00:00 GMT").unwrap();
        assert_eq!(parsed, Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn parses_utc_suffix() {
        let parsed = parse_upstream_time("Tue, 02 Jan 2024 13:45:10 UTC").unwrap();
        assert_eq!(parsed, Utc.with_ymd_and_hms(2024, 1, 2, 13, 45, 10).unwrap());
    }

    #[test]
    fn ignores_a_weekday_that_does_not_match_the_date() {
        // 2024-01-01 was a Monday.
        let parsed = parse_upstream_time("Tue, 01 Jan 2024 00:00:00 GMT").unwrap();
        assert_eq!(parsed, Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());

        let parsed = parse_upstream_time("Friday, 01 Jan 2024 08:30:00 UTC").unwrap();
        assert_eq!(parsed, Utc.with_ymd_and_hms(2024, 1, 1, 8, 30, 0).unwrap());
    }

    #[test]
    fn rejects_missing_weekday() {
        assert!(parse_upstream_time("01 Jan 2024 00:00:00 GMT").is_err());
        assert!(parse_upstream_time("12, 01 Jan 2024 00:00:00 GMT").is_err());
    }

    #[test]
    fn rejects_iso_timestamp() {
        let err = parse_upstream_time("2024-01-01T00:00:00Z").unwrap_err();
        assert!(matches!(err, DomainError::InvalidTimestamp { .. }));
    }

    #[test]
    fn rejects_unknown_zone_name() {
        assert!(parse_upstream_time("Mon, 01 Jan 2024 00:00:00 CEST").is_err());
    }

    #[test]
    fn converts_valid_payout() {
        let id = "6c1e3b0a-0d8e-4f6e-9a55-6b2f0f3d7c11";
        let record = PayoutRecord::try_from(upstream(id, "Mon, 01 Jan 2024 00:00:00 GMT", "notifying"))
            .unwrap();

        assert_eq!(record.external_id.to_string(), id);
        assert_eq!(record.amount, Decimal::from(100));
        assert_eq!(record.recipient_account_identifier, "acc_001");
    }

    #[test]
    fn malformed_timestamp_fails_the_record() {
        let err = PayoutRecord::try_from(upstream(
            "6c1e3b0a-0d8e-4f6e-9a55-6b2f0f3d7c11",
            "yesterday",
            "notifying",
        ))
        .unwrap_err();
        assert!(matches!(err, DomainError::InvalidTimestamp { .. }));
    }

    #[test]
    fn malformed_id_fails_the_record() {
        let err = PayoutRecord::try_from(upstream("nope", "Mon, 01 Jan 2024 00:00:00 GMT", "notifying"))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidId(_)));
    }

    #[test]
    fn decodes_wire_payload_with_numeric_and_string_amounts() {
        let json = serde_json::json!([
            {
                "id": "6c1e3b0a-0d8e-4f6e-9a55-6b2f0f3d7c11",
                "create_time": "Mon, 01 Jan 2024 00:00:00 GMT",
                "amount": 100,
                "recipient_account_identifier": "acc_001",
                "state": "notifying"
            },
            {
                "id": "0b9e2a53-5a59-4f3e-8d7a-3e64b1f0f7aa",
                "create_time": "Mon, 01 Jan 2024 00:00:00 GMT",
                "amount": "12.50",
                "recipient_account_identifier": "acc_002",
                "state": "settled"
            }
        ]);

        let payouts: Vec<UpstreamPayout> = serde_json::from_value(json).unwrap();
        assert_eq!(payouts[0].state, PayoutState::Notifying);
        assert!(payouts[0].state.is_actionable());
        assert_eq!(payouts[1].amount, Some("12.50".parse::<Decimal>().unwrap()));
        assert_eq!(payouts[1].state, PayoutState::Other("settled".to_string()));
        assert!(!payouts[1].state.is_actionable());
    }

    #[test]
    fn malformed_field_values_fail_only_their_element() {
        let json = serde_json::json!([
            {
                "id": "6c1e3b0a-0d8e-4f6e-9a55-6b2f0f3d7c11",
                "create_time": "Mon, 01 Jan 2024 00:00:00 GMT",
                "amount": "10.00",
                "recipient_account_identifier": "acc_001",
                "state": "notifying"
            },
            {
                "id": "0b9e2a53-5a59-4f3e-8d7a-3e64b1f0f7aa",
                "create_time": null,
                "amount": "10.00",
                "recipient_account_identifier": "acc_002",
                "state": "notifying"
            },
            {
                "id": 17,
                "create_time": 1704067200,
                "amount": "ten",
                "state": null
            }
        ]);

        let payouts: Vec<UpstreamPayout> = serde_json::from_value(json).unwrap();
        assert_eq!(payouts.len(), 3);
        assert!(PayoutRecord::try_from(payouts[0].clone()).is_ok());
        assert!(matches!(
            PayoutRecord::try_from(payouts[1].clone()),
            Err(DomainError::InvalidTimestamp { .. })
        ));
        assert_eq!(payouts[2].id, "17");
        assert_eq!(payouts[2].amount, None);
        assert_eq!(payouts[2].recipient_account_identifier, "");
        assert!(!payouts[2].state.is_actionable());
        assert!(PayoutRecord::try_from(payouts[2].clone()).is_err());
    }

    #[test]
    fn missing_amount_fails_the_record() {
        let mut payout = upstream(
            "6c1e3b0a-0d8e-4f6e-9a55-6b2f0f3d7c11",
            "Mon, 01 Jan 2024 00:00:00 GMT",
            "notifying",
        );
        payout.amount = None;
        assert!(matches!(
            PayoutRecord::try_from(payout),
            Err(DomainError::Validation(_))
        ));
    }

    #[test]
    fn keeps_full_amount_precision() {
        let json = serde_json::json!({
            "id": "6c1e3b0a-0d8e-4f6e-9a55-6b2f0f3d7c11",
            "create_time": "Mon, 01 Jan 2024 00:00:00 GMT",
            "amount": "100.123456",
            "recipient_account_identifier": "acc_001",
            "state": "notifying"
        });
        let payout: UpstreamPayout = serde_json::from_value(json).unwrap();
        let record = PayoutRecord::try_from(payout).unwrap();
        assert_eq!(record.amount, "100.123456".parse::<Decimal>().unwrap());
    }
}
