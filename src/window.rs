//! Time-of-day selection of archive members.
//!
//! Member names carry their snapshot time before the first `.`, e.g.
//! `2016-06-20-1930Z.json` or `19:30.json`. Only the time of day matters.

use chrono::{DateTime, NaiveDateTime, NaiveTime};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WindowError {
    #[error("Cannot parse a time from member name {member}")]
    MalformedMemberName { member: String },
    #[error("Cannot parse time of day: {0}")]
    InvalidTime(String),
}

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%d-%H%M%S",
    "%Y-%m-%d-%H%M",
];

const OFFSET_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%:z",
    "%Y-%m-%d %H:%M:%S%:z",
    "%Y-%m-%dT%H:%M:%S%z",
    "%Y-%m-%d %H:%M:%S%z",
    "%Y-%m-%dT%H:%M%:z",
    "%Y-%m-%d %H:%M%:z",
];

const TIME_FORMATS: &[&str] = &["%H:%M:%S", "%H:%M", "%H%M%S", "%H%M"];

/// Parse a time of day from a bare time or a full date-time. A trailing `Z`
/// is accepted and ignored. With a numeric offset the local wall-clock time
/// is kept, not converted to UTC.
pub fn parse_time_of_day(s: &str) -> Option<NaiveTime> {
    let s = s.trim();
    let s = s.strip_suffix(['Z', 'z']).unwrap_or(s);
    if s.is_empty() {
        return None;
    }

    DATETIME_FORMATS
        .iter()
        .find_map(|f| NaiveDateTime::parse_from_str(s, f).ok())
        .map(|dt| dt.time())
        .or_else(|| {
            OFFSET_FORMATS
                .iter()
                .find_map(|f| DateTime::parse_from_str(s, f).ok())
                .map(|dt| dt.time())
        })
        .or_else(|| {
            TIME_FORMATS
                .iter()
                .find_map(|f| NaiveTime::parse_from_str(s, f).ok())
        })
}

/// Time of day encoded in a member name.
pub fn member_time(member: &str) -> Result<NaiveTime, WindowError> {
    let file_name = member.rsplit('/').next().unwrap_or(member);
    let stem = file_name.split('.').next().unwrap_or(file_name);
    parse_time_of_day(stem).ok_or_else(|| WindowError::MalformedMemberName {
        member: member.to_string(),
    })
}

/// Inclusive `[start, end]` time-of-day window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl TimeWindow {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Self {
        Self { start, end }
    }

    /// Build from user-supplied bounds such as `"19:00"`.
    pub fn parse(start: &str, end: &str) -> Result<Self, WindowError> {
        let start =
            parse_time_of_day(start).ok_or_else(|| WindowError::InvalidTime(start.to_string()))?;
        let end = parse_time_of_day(end).ok_or_else(|| WindowError::InvalidTime(end.to_string()))?;
        Ok(Self { start, end })
    }

    pub fn contains(&self, time: NaiveTime) -> bool {
        self.start <= time && time <= self.end
    }
}

/// A member retained by the window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedMember {
    pub name: String,
    pub time: NaiveTime,
}

/// Members inside the window, in archive order. Any unparsable name fails
/// the whole selection.
pub fn select<S: AsRef<str>>(
    members: &[S],
    window: &TimeWindow,
) -> Result<Vec<SelectedMember>, WindowError> {
    let mut selected = Vec::new();
    for member in members {
        let name = member.as_ref();
        let time = member_time(name)?;
        if window.contains(time) {
            selected.push(SelectedMember {
                name: name.to_string(),
                time,
            });
        }
    }
    Ok(selected)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hm(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn test_member_time_formats() {
        assert_eq!(member_time("19:30.json").unwrap(), hm(19, 30));
        assert_eq!(member_time("2016-06-20-1930Z.json").unwrap(), hm(19, 30));
        assert_eq!(member_time("2016-06-20T19:30:00.json").unwrap(), hm(19, 30));
        assert_eq!(member_time("2016-06-20T19:30:00.123Z.json").unwrap(), hm(19, 30));
        assert_eq!(member_time("2016-06-20 19:30.json").unwrap(), hm(19, 30));
        assert_eq!(member_time("1930.json").unwrap(), hm(19, 30));
        assert_eq!(
            member_time("19:30:15.json").unwrap(),
            NaiveTime::from_hms_opt(19, 30, 15).unwrap()
        );
        assert_eq!(member_time("2016-06-20/2016-06-20-1930Z.json").unwrap(), hm(19, 30));
    }

    #[test]
    fn test_member_time_with_utc_offset() {
        assert_eq!(member_time("2016-06-20T19:30:00+00:00.json").unwrap(), hm(19, 30));
        assert_eq!(member_time("2016-06-20 19:30:00-0400.json").unwrap(), hm(19, 30));
        assert_eq!(member_time("2016-06-20T19:30+05:30.json").unwrap(), hm(19, 30));
        assert!(matches!(
            member_time("2016-06-20T19:30:00+99:99.json"),
            Err(WindowError::MalformedMemberName { .. })
        ));

        let window = TimeWindow::parse("19:00", "20:00").unwrap();
        let members = [
            "2016-06-20T19:30:00+00:00.json",
            "2016-06-20T20:30:00+00:00.json",
        ];
        let selected = select(&members, &window).unwrap();
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].name, "2016-06-20T19:30:00+00:00.json");
    }

    #[test]
    fn test_malformed_member_name() {
        for bad in ["readme.txt", ".json", "25:99.json", ""] {
            assert!(
                matches!(member_time(bad), Err(WindowError::MalformedMemberName { .. })),
                "{bad:?}"
            );
        }
    }

    #[test]
    fn test_window_is_inclusive_at_both_bounds() {
        let window = TimeWindow::parse("19:00", "20:00").unwrap();
        let members = ["19:00.json", "19:00:01.json", "20:00.json", "20:00:01.json"];

        let selected: Vec<_> = select(&members, &window)
            .unwrap()
            .into_iter()
            .map(|m| m.name)
            .collect();
        assert_eq!(selected, vec!["19:00.json", "19:00:01.json", "20:00.json"]);
    }

    #[test]
    fn test_selects_only_members_inside_window() {
        let window = TimeWindow::parse("19:00", "20:00").unwrap();
        let members = vec![
            "18:59.json".to_string(),
            "19:30.json".to_string(),
            "20:01.json".to_string(),
        ];

        let selected = select(&members, &window).unwrap();
        assert_eq!(
            selected,
            vec![SelectedMember {
                name: "19:30.json".into(),
                time: hm(19, 30)
            }]
        );
    }

    #[test]
    fn test_bad_member_fails_selection() {
        let window = TimeWindow::parse("19:00", "20:00").unwrap();
        let err = select(&["19:30.json", "notes.txt"], &window).unwrap_err();
        assert!(matches!(err, WindowError::MalformedMemberName { ref member } if member == "notes.txt"));
    }

    #[test]
    fn test_invalid_bounds() {
        assert!(matches!(
            TimeWindow::parse("7pm", "20:00"),
            Err(WindowError::InvalidTime(_))
        ));
    }
}
