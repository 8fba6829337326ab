use chrono::{NaiveDate, NaiveTime, Timelike};
use serde_json::{Map, Value};

use super::error::TicketsError;

/// Reads an entry id given either as a JSON integer or as a numeric string.
pub fn parse_entry_id(value: &Value) -> Result<i64, TicketsError> {
    let parsed = match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    };
    parsed.ok_or_else(|| TicketsError::InvalidArgument {
        name: "id".to_string(),
        reason: format!("expected an integer, got {}", value),
    })
}

/// Column filters accepted by `count_entries` and `get_entries`.
///
/// Every condition is a case-insensitive substring match; all present conditions
/// must hold.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct EntryFilter {
    pub date: Option<String>,
    pub time: Option<String>,
    pub datetime: Option<String>,
    pub policy_identity: Option<String>,
    pub internal_ip: Option<String>,
    pub external_ip: Option<String>,
    pub action: Option<String>,
    pub destination: Option<String>,
}

impl EntryFilter {
    /// Builds a filter from tool-call arguments. Unknown keys are ignored and
    /// numeric values are accepted in place of strings.
    pub fn from_args(args: &Map<String, Value>) -> Self {
        let get = |key: &str| -> Option<String> {
            let value = match args.get(key)? {
                Value::String(s) => s.trim().to_string(),
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                _ => return None,
            };
            Some(value).filter(|s| !s.is_empty())
        };

        Self {
            date: get("date"),
            time: get("time"),
            datetime: get("datetime"),
            policy_identity: get("policy_identity"),
            internal_ip: get("internal_ip"),
            external_ip: get("external_ip"),
            action: get("action"),
            destination: get("destination"),
        }
    }

    /// `(column, LIKE pattern)` pairs in evaluation order.
    pub fn conditions(&self) -> Vec<(&'static str, String)> {
        let mut conditions = Vec::new();

        if let Some((date, hour)) = self.datetime.as_deref().and_then(parse_datetime) {
            conditions.push(("date", contains(&date)));
            if let Some(hour) = hour {
                conditions.push(("time", format!("%{}:%", hour)));
            }
        }

        if let Some(date) = &self.date {
            conditions.push(("date", contains(date)));
        }
        if let Some(time) = &self.time {
            if time.contains(':') {
                conditions.push(("time", contains(time)));
            } else {
                conditions.push(("time", format!("%{}:%", time)));
            }
        }

        let columns = [
            ("policy_identity", &self.policy_identity),
            ("internal_ip", &self.internal_ip),
            ("external_ip", &self.external_ip),
            ("action", &self.action),
            ("destination", &self.destination),
        ];
        for (column, value) in columns {
            if let Some(value) = value {
                conditions.push((column, contains(value)));
            }
        }

        conditions
    }
}

fn contains(value: &str) -> String {
    format!("%{}%", value)
}

/// Parses `DD/MM/YYYY[ HH[:MM]]` (two-digit years allowed) into a normalized
/// `DD/MM/YYYY` date and an optional two-digit hour.
pub fn parse_datetime(input: &str) -> Option<(String, Option<String>)> {
    let mut parts = input.split_whitespace();
    let date_part = parts.next()?;
    let time_part = parts.next();
    if parts.next().is_some() {
        return None;
    }

    let year_len = date_part.rsplit('/').next()?.len();
    let date_format = match year_len {
        4 => "%d/%m/%Y",
        2 => "%d/%m/%y",
        _ => return None,
    };
    let date = NaiveDate::parse_from_str(date_part, date_format).ok()?;

    let hour = match time_part {
        None => None,
        Some(t) if t.contains(':') => Some(NaiveTime::parse_from_str(t, "%H:%M").ok()?.hour()),
        Some(t) => Some(t.parse::<u32>().ok().filter(|h| *h < 24)?),
    };

    Some((
        date.format("%d/%m/%Y").to_string(),
        hour.map(|h| format!("{:02}", h)),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn args(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn entry_ids_accept_integers_and_numeric_strings() {
        assert_eq!(parse_entry_id(&json!(42)).unwrap(), 42);
        assert_eq!(parse_entry_id(&json!(" 7 ")).unwrap(), 7);

        for bad in [json!("seven"), json!(1.5), json!(null), json!([1])] {
            let err = parse_entry_id(&bad).unwrap_err();
            assert!(matches!(err, TicketsError::InvalidArgument { ref name, .. } if name == "id"));
        }
        assert_eq!(
            parse_entry_id(&json!("x")).unwrap_err().to_string(),
            "Invalid argument 'id': expected an integer, got \"x\""
        );
    }

    #[test]
    fn parses_supported_datetime_formats() {
        assert_eq!(
            parse_datetime("27/07/2025 13:30"),
            Some(("27/07/2025".to_string(), Some("13".to_string())))
        );
        assert_eq!(
            parse_datetime("27/07/2025 9"),
            Some(("27/07/2025".to_string(), Some("09".to_string())))
        );
        assert_eq!(
            parse_datetime("27/07/2025"),
            Some(("27/07/2025".to_string(), None))
        );
        assert_eq!(
            parse_datetime("27/07/25 13:30"),
            Some(("27/07/2025".to_string(), Some("13".to_string())))
        );
        assert_eq!(parse_datetime("2025-07-27"), None);
        assert_eq!(parse_datetime("27/07/2025 25"), None);
        assert_eq!(parse_datetime("27/07/2025 13:30 extra"), None);
    }

    #[test]
    fn hour_only_time_matches_any_minute() {
        let filter = EntryFilter::from_args(&args(json!({"time": "13"})));
        assert_eq!(filter.conditions(), vec![("time", "%13:%".to_string())]);

        let filter = EntryFilter::from_args(&args(json!({"time": "13:13"})));
        assert_eq!(filter.conditions(), vec![("time", "%13:13%".to_string())]);
    }

    #[test]
    fn combines_datetime_and_column_filters_in_order() {
        let filter = EntryFilter::from_args(&args(json!({
            "datetime": "29/07/25 13:13",
            "action": "Blocked",
            "internal_ip": "107.78.99.191",
            "unknown": "ignored"
        })));

        assert_eq!(
            filter.conditions(),
            vec![
                ("date", "%29/07/2025%".to_string()),
                ("time", "%13:%".to_string()),
                ("internal_ip", "%107.78.99.191%".to_string()),
                ("action", "%Blocked%".to_string()),
            ]
        );
    }

    #[test]
    fn accepts_numbers_and_skips_empty_values() {
        let filter = EntryFilter::from_args(&args(json!({"time": 13, "action": "  "})));
        assert_eq!(filter.time.as_deref(), Some("13"));
        assert_eq!(filter.action, None);
    }

    #[test]
    fn unparseable_datetime_adds_no_condition() {
        let filter = EntryFilter::from_args(&args(json!({"datetime": "yesterday"})));
        assert!(filter.conditions().is_empty());
    }
}
