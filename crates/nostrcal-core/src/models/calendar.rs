use chrono::NaiveDate;
use nostr_sdk::prelude::Event;

use super::tag_utils::{extract_all_tag_values, extract_tag_str};
use crate::constants::kinds;
use crate::nostr::bunker::EventTemplate;

/// When a calendar entry starts or ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CalendarTime {
    /// All-day, kind 31922
    Date(NaiveDate),
    /// Unix seconds, kind 31923
    Timestamp(u64),
}

impl CalendarTime {
    fn parse(kind: u16, value: &str) -> Option<Self> {
        match kind {
            kinds::DATE_CALENDAR_EVENT => NaiveDate::parse_from_str(value, "%Y-%m-%d")
                .ok()
                .map(CalendarTime::Date),
            kinds::TIME_CALENDAR_EVENT => value.parse().ok().map(CalendarTime::Timestamp),
            _ => None,
        }
    }

    fn to_tag_value(&self) -> String {
        match self {
            CalendarTime::Date(d) => d.format("%Y-%m-%d").to_string(),
            CalendarTime::Timestamp(ts) => ts.to_string(),
        }
    }
}

/// NIP-52 calendar entry - kind:31922 (date-based) or kind:31923 (time-based)
#[derive(Debug, Clone, PartialEq)]
pub struct CalendarEntry {
    /// `d` tag
    pub identifier: String,
    pub kind: u16,
    pub title: String,
    pub summary: Option<String>,
    pub start: CalendarTime,
    pub end: Option<CalendarTime>,
    pub start_tzid: Option<String>,
    pub location: Option<String>,
    pub hashtags: Vec<String>,
    pub participants: Vec<String>,
    pub author: String,
    pub created_at: u64,
    pub event_id: String,
}

impl CalendarEntry {
    /// A new, unsigned entry. The kind follows `start`; author, id and
    /// timestamp stay empty until an event is signed from it.
    pub fn draft(
        identifier: impl Into<String>,
        title: impl Into<String>,
        start: CalendarTime,
    ) -> Self {
        let kind = match start {
            CalendarTime::Date(_) => kinds::DATE_CALENDAR_EVENT,
            CalendarTime::Timestamp(_) => kinds::TIME_CALENDAR_EVENT,
        };
        CalendarEntry {
            identifier: identifier.into(),
            kind,
            title: title.into(),
            summary: None,
            start,
            end: None,
            start_tzid: None,
            location: None,
            hashtags: Vec::new(),
            participants: Vec::new(),
            author: String::new(),
            created_at: 0,
            event_id: String::new(),
        }
    }

    /// Decode a calendar entry. Events of other kinds, or missing a `d` tag
    /// or a parseable `start`, yield `None`.
    pub fn from_event(event: &Event) -> Option<Self> {
        let kind = event.kind.as_u16();
        if kind != kinds::DATE_CALENDAR_EVENT && kind != kinds::TIME_CALENDAR_EVENT {
            return None;
        }

        let identifier = extract_tag_str(event, "d")?.to_string();
        let start = CalendarTime::parse(kind, extract_tag_str(event, "start")?)?;
        let end = extract_tag_str(event, "end").and_then(|v| CalendarTime::parse(kind, v));

        // older clients use "name" instead of "title"
        let title = extract_tag_str(event, "title")
            .or_else(|| extract_tag_str(event, "name"))
            .map(str::to_string)
            .unwrap_or_else(|| "Untitled event".to_string());

        Some(CalendarEntry {
            identifier,
            kind,
            title,
            summary: extract_tag_str(event, "summary")
                .map(str::to_string)
                .or_else(|| (!event.content.is_empty()).then(|| event.content.clone())),
            start,
            end,
            start_tzid: extract_tag_str(event, "start_tzid").map(str::to_string),
            location: extract_tag_str(event, "location").map(str::to_string),
            hashtags: extract_all_tag_values(event, "t"),
            participants: extract_all_tag_values(event, "p"),
            author: event.pubkey.to_hex(),
            created_at: event.created_at.as_u64(),
            event_id: event.id.to_hex(),
        })
    }

    /// `kind:pubkey:d` address other events use to reference this entry
    pub fn coordinate(&self) -> String {
        format!("{}:{}:{}", self.kind, self.author, self.identifier)
    }

    pub fn is_all_day(&self) -> bool {
        matches!(self.start, CalendarTime::Date(_))
    }

    /// Unsigned template for publishing (a new revision of) this entry.
    pub fn to_template(&self) -> EventTemplate {
        let mut template = EventTemplate::new(self.kind, self.summary.clone().unwrap_or_default())
            .tag(["d", self.identifier.as_str()])
            .tag(["title", self.title.as_str()])
            .tag(["start".to_string(), self.start.to_tag_value()]);
        if let Some(end) = &self.end {
            template = template.tag(["end".to_string(), end.to_tag_value()]);
        }
        if let Some(tzid) = &self.start_tzid {
            template = template.tag(["start_tzid", tzid.as_str()]);
        }
        if let Some(location) = &self.location {
            template = template.tag(["location", location.as_str()]);
        }
        for t in &self.hashtags {
            template = template.tag(["t", t.as_str()]);
        }
        for p in &self.participants {
            template = template.tag(["p", p.as_str()]);
        }
        template
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signer::sign_template;
    use nostr_sdk::prelude::*;

    fn signed(kind: u16, tags: &[&[&str]], content: &str) -> Event {
        let keys = Keys::generate();
        let mut template = EventTemplate::new(kind, content);
        for tag in tags {
            template = template.tag(tag.iter().copied());
        }
        sign_template(&keys, &template).unwrap()
    }

    #[test]
    fn test_time_based_entry() {
        let event = signed(
            kinds::TIME_CALENDAR_EVENT,
            &[
                &["d", "standup"],
                &["title", "Standup"],
                &["start", "1700000000"],
                &["end", "1700001800"],
                &["start_tzid", "Europe/Berlin"],
                &["location", "Room 4"],
                &["t", "work"],
                &["t", "daily"],
            ],
            "Quick sync",
        );

        let entry = CalendarEntry::from_event(&event).unwrap();
        assert_eq!(entry.identifier, "standup");
        assert_eq!(entry.title, "Standup");
        assert_eq!(entry.start, CalendarTime::Timestamp(1_700_000_000));
        assert_eq!(entry.end, Some(CalendarTime::Timestamp(1_700_001_800)));
        assert_eq!(entry.start_tzid.as_deref(), Some("Europe/Berlin"));
        assert_eq!(entry.location.as_deref(), Some("Room 4"));
        assert_eq!(entry.hashtags, vec!["work", "daily"]);
        assert_eq!(entry.summary.as_deref(), Some("Quick sync"));
        assert!(!entry.is_all_day());
        assert_eq!(
            entry.coordinate(),
            format!("31923:{}:standup", event.pubkey.to_hex())
        );
    }

    #[test]
    fn test_date_based_entry_with_legacy_name() {
        let event = signed(
            kinds::DATE_CALENDAR_EVENT,
            &[&["d", "trip"], &["name", "Trip"], &["start", "2024-05-01"]],
            "",
        );

        let entry = CalendarEntry::from_event(&event).unwrap();
        assert_eq!(entry.title, "Trip");
        assert!(entry.is_all_day());
        assert_eq!(
            entry.start,
            CalendarTime::Date(NaiveDate::from_ymd_opt(2024, 5, 1).unwrap())
        );
        assert_eq!(entry.summary, None);
    }

    #[test]
    fn test_rejects_other_kinds_and_bad_start() {
        let note = signed(kinds::TEXT_NOTE, &[&["d", "x"], &["start", "1"]], "");
        assert!(CalendarEntry::from_event(&note).is_none());

        let no_d = signed(kinds::TIME_CALENDAR_EVENT, &[&["start", "1"]], "");
        assert!(CalendarEntry::from_event(&no_d).is_none());

        let bad_date = signed(
            kinds::DATE_CALENDAR_EVENT,
            &[&["d", "x"], &["start", "tomorrow"]],
            "",
        );
        assert!(CalendarEntry::from_event(&bad_date).is_none());
    }

    #[test]
    fn test_draft_kind_follows_start() {
        let all_day = CalendarEntry::draft(
            "trip",
            "Trip",
            CalendarTime::Date(NaiveDate::from_ymd_opt(2024, 5, 1).unwrap()),
        );
        assert_eq!(all_day.kind, kinds::DATE_CALENDAR_EVENT);

        let timed = CalendarEntry::draft("call", "Call", CalendarTime::Timestamp(1_700_000_000));
        assert_eq!(timed.kind, kinds::TIME_CALENDAR_EVENT);

        let event = sign_template(&Keys::generate(), &timed.to_template()).unwrap();
        let decoded = CalendarEntry::from_event(&event).unwrap();
        assert_eq!(decoded.title, "Call");
        assert_eq!(decoded.author, event.pubkey.to_hex());
    }

    #[test]
    fn test_template_decodes_back() {
        let event = signed(
            kinds::TIME_CALENDAR_EVENT,
            &[
                &["d", "review"],
                &["title", "Review"],
                &["start", "1700000000"],
                &["t", "work"],
            ],
            "Quarterly",
        );
        let entry = CalendarEntry::from_event(&event).unwrap();

        let republished = sign_template(&Keys::generate(), &entry.to_template()).unwrap();
        let decoded = CalendarEntry::from_event(&republished).unwrap();
        assert_eq!(decoded.identifier, entry.identifier);
        assert_eq!(decoded.title, entry.title);
        assert_eq!(decoded.start, entry.start);
        assert_eq!(decoded.hashtags, entry.hashtags);
        assert_eq!(decoded.summary, entry.summary);
    }
}
