use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

/// Attendance state for one duty role on one day. UNCONFIRMED is the
/// starting point; either confirmed state can be edited back by an admin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DutyStatus {
    Unconfirmed,
    Attended,
    Absent,
}

impl DutyStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            DutyStatus::Unconfirmed => "UNCONFIRMED",
            DutyStatus::Attended => "ATTENDED",
            DutyStatus::Absent => "ABSENT",
        }
    }

    pub fn parse(raw: &str) -> Option<DutyStatus> {
        match raw {
            "UNCONFIRMED" => Some(DutyStatus::Unconfirmed),
            "ATTENDED" => Some(DutyStatus::Attended),
            "ABSENT" => Some(DutyStatus::Absent),
            _ => None,
        }
    }
}

/// Canonicalize a client-supplied date to its UTC calendar day.
///
/// Calendars on both sides of UTC send the same day as different instants;
/// everything must collapse to one stored `YYYY-MM-DD` or a single duty day
/// splits into two rows. Accepted forms:
/// - `YYYY-MM-DD` (taken literally),
/// - RFC 3339 with offset or `Z` (converted to UTC, then truncated),
/// - a bare `YYYY-MM-DDTHH:MM:SS[.fff]` timestamp (treated as UTC).
pub fn normalize_date(raw: &str) -> Result<NaiveDate, String> {
    let t = raw.trim();
    if let Ok(d) = NaiveDate::parse_from_str(t, "%Y-%m-%d") {
        return Ok(d);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(t) {
        return Ok(dt.with_timezone(&Utc).date_naive());
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(t, fmt) {
            return Ok(dt.date());
        }
    }
    Err(format!("unrecognized date: {}", raw))
}

pub fn date_key(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// Presentation hint derived from the two role statuses; never persisted.
pub fn color_for_duty(senior: DutyStatus, junior: DutyStatus) -> &'static str {
    if senior == DutyStatus::Attended && junior == DutyStatus::Attended {
        "confirmed"
    } else if senior == DutyStatus::Absent || junior == DutyStatus::Absent {
        "attention"
    } else {
        "pending"
    }
}

/// One duty row as stored: the planned pair, whoever actually covered,
/// and per-role attendance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DutyRecord {
    pub original_senior_id: String,
    pub original_junior_id: String,
    pub actual_senior_id: String,
    pub actual_junior_id: String,
    pub senior_status: DutyStatus,
    pub junior_status: DutyStatus,
}

/// Incoming upsert payload after parameter parsing. Original ids and
/// statuses are optional; the resolution rules fill them in.
#[derive(Debug, Clone)]
pub struct DutyChange {
    pub actual_senior_id: String,
    pub actual_junior_id: String,
    pub original_senior_id: Option<String>,
    pub original_junior_id: Option<String>,
    pub senior_status: Option<DutyStatus>,
    pub junior_status: Option<DutyStatus>,
}

/// Apply an upsert to an existing row (or none) and produce the row to
/// store, enforcing every rota rule before anything touches the store:
///
/// - senior and junior must be different people, planned and actual;
/// - the original assignment is written once, on creation, and is
///   immutable afterwards;
/// - a role cannot be marked ABSENT while the original assignee is still
///   down as covering it; the caller must name a replacement first.
pub fn resolve_upsert(
    change: &DutyChange,
    existing: Option<&DutyRecord>,
) -> Result<DutyRecord, String> {
    if change.actual_senior_id == change.actual_junior_id {
        return Err("duty senior and duty junior cannot be the same person".to_string());
    }

    let (original_senior_id, original_junior_id) = match existing {
        None => {
            let senior = change
                .original_senior_id
                .clone()
                .unwrap_or_else(|| change.actual_senior_id.clone());
            let junior = change
                .original_junior_id
                .clone()
                .unwrap_or_else(|| change.actual_junior_id.clone());
            if senior == junior {
                return Err(
                    "original duty senior and duty junior cannot be the same person".to_string(),
                );
            }
            (senior, junior)
        }
        Some(stored) => {
            if let Some(supplied) = &change.original_senior_id {
                if *supplied != stored.original_senior_id {
                    return Err("original duty senior cannot be changed once set".to_string());
                }
            }
            if let Some(supplied) = &change.original_junior_id {
                if *supplied != stored.original_junior_id {
                    return Err("original duty junior cannot be changed once set".to_string());
                }
            }
            (
                stored.original_senior_id.clone(),
                stored.original_junior_id.clone(),
            )
        }
    };

    let senior_status = change
        .senior_status
        .or_else(|| existing.map(|d| d.senior_status))
        .unwrap_or(DutyStatus::Unconfirmed);
    let junior_status = change
        .junior_status
        .or_else(|| existing.map(|d| d.junior_status))
        .unwrap_or(DutyStatus::Unconfirmed);

    if senior_status == DutyStatus::Absent && change.actual_senior_id == original_senior_id {
        return Err(
            "duty senior marked ABSENT: assign a replacement before confirming the absence"
                .to_string(),
        );
    }
    if junior_status == DutyStatus::Absent && change.actual_junior_id == original_junior_id {
        return Err(
            "duty junior marked ABSENT: assign a replacement before confirming the absence"
                .to_string(),
        );
    }

    Ok(DutyRecord {
        original_senior_id,
        original_junior_id,
        actual_senior_id: change.actual_senior_id.clone(),
        actual_junior_id: change.actual_junior_id.clone(),
        senior_status,
        junior_status,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn change(senior: &str, junior: &str) -> DutyChange {
        DutyChange {
            actual_senior_id: senior.to_string(),
            actual_junior_id: junior.to_string(),
            original_senior_id: None,
            original_junior_id: None,
            senior_status: None,
            junior_status: None,
        }
    }

    #[test]
    fn normalize_plain_date() {
        assert_eq!(
            normalize_date("2025-03-01").unwrap(),
            NaiveDate::from_ymd_opt(2025, 3, 1).unwrap()
        );
    }

    #[test]
    fn normalize_collapses_offsets_to_one_utc_day() {
        // The same calendar instant sent from a UTC-negative and a
        // UTC-positive client clock.
        let west = normalize_date("2025-03-01T23:30:00-05:00").unwrap();
        let east = normalize_date("2025-03-02T05:30:00+01:00").unwrap();
        assert_eq!(west, east);
        assert_eq!(date_key(west), "2025-03-02");
    }

    #[test]
    fn normalize_across_dst_boundary() {
        // Europe DST starts 2025-03-30; UK clients emit +01:00 afterwards.
        let before = normalize_date("2025-03-30T00:30:00+00:00").unwrap();
        let after = normalize_date("2025-03-30T23:30:00+01:00").unwrap();
        assert_eq!(date_key(before), "2025-03-30");
        assert_eq!(date_key(after), "2025-03-30");
    }

    #[test]
    fn normalize_bare_timestamp_is_utc() {
        let d = normalize_date("2025-11-05T18:00:00").unwrap();
        assert_eq!(date_key(d), "2025-11-05");
    }

    #[test]
    fn normalize_rejects_garbage() {
        assert!(normalize_date("next tuesday").is_err());
        assert!(normalize_date("2025-13-40").is_err());
    }

    #[test]
    fn color_follows_status_pairs() {
        use DutyStatus::*;
        assert_eq!(color_for_duty(Attended, Attended), "confirmed");
        assert_eq!(color_for_duty(Absent, Attended), "attention");
        assert_eq!(color_for_duty(Attended, Absent), "attention");
        assert_eq!(color_for_duty(Unconfirmed, Attended), "pending");
        assert_eq!(color_for_duty(Unconfirmed, Unconfirmed), "pending");
    }

    #[test]
    fn create_defaults_originals_to_actuals() {
        let resolved = resolve_upsert(&change("u1", "u2"), None).unwrap();
        assert_eq!(resolved.original_senior_id, "u1");
        assert_eq!(resolved.original_junior_id, "u2");
        assert_eq!(resolved.senior_status, DutyStatus::Unconfirmed);
        assert_eq!(resolved.junior_status, DutyStatus::Unconfirmed);
    }

    #[test]
    fn same_person_both_roles_is_rejected() {
        let err = resolve_upsert(&change("u7", "u7"), None).unwrap_err();
        assert!(err.contains("same person"));
    }

    #[test]
    fn originals_are_immutable_after_creation() {
        let stored = resolve_upsert(&change("u1", "u2"), None).unwrap();
        let mut attempt = change("u1", "u2");
        attempt.original_senior_id = Some("u9".to_string());
        let err = resolve_upsert(&attempt, Some(&stored)).unwrap_err();
        assert!(err.contains("cannot be changed"));

        // Re-supplying the stored value is fine.
        let mut same = change("u1", "u2");
        same.original_senior_id = Some("u1".to_string());
        assert!(resolve_upsert(&same, Some(&stored)).is_ok());
    }

    #[test]
    fn absent_without_replacement_is_rejected() {
        let stored = resolve_upsert(&change("u1", "u2"), None).unwrap();
        let mut attempt = change("u1", "u2");
        attempt.senior_status = Some(DutyStatus::Absent);
        let err = resolve_upsert(&attempt, Some(&stored)).unwrap_err();
        assert!(err.contains("replacement"));
    }

    #[test]
    fn absent_with_replacement_keeps_original() {
        let stored = resolve_upsert(&change("u1", "u2"), None).unwrap();
        let mut attempt = change("u3", "u2");
        attempt.senior_status = Some(DutyStatus::Absent);
        let resolved = resolve_upsert(&attempt, Some(&stored)).unwrap();
        assert_eq!(resolved.original_senior_id, "u1");
        assert_eq!(resolved.actual_senior_id, "u3");
        assert_eq!(resolved.senior_status, DutyStatus::Absent);
        assert_eq!(resolved.junior_status, DutyStatus::Unconfirmed);
    }

    #[test]
    fn statuses_stay_editable_in_both_directions() {
        let mut stored = resolve_upsert(&change("u1", "u2"), None).unwrap();
        let mut attend = change("u1", "u2");
        attend.senior_status = Some(DutyStatus::Attended);
        attend.junior_status = Some(DutyStatus::Attended);
        stored = resolve_upsert(&attend, Some(&stored)).unwrap();
        assert_eq!(stored.senior_status, DutyStatus::Attended);

        let mut back = change("u1", "u2");
        back.senior_status = Some(DutyStatus::Unconfirmed);
        stored = resolve_upsert(&back, Some(&stored)).unwrap();
        assert_eq!(stored.senior_status, DutyStatus::Unconfirmed);
        // Untouched role keeps its previous state.
        assert_eq!(stored.junior_status, DutyStatus::Attended);
    }
}
