//! Tag extraction helpers for signed events.

use nostr_sdk::prelude::Event;

/// First value of the first tag named `tag_name`.
pub fn extract_tag_str<'a>(event: &'a Event, tag_name: &str) -> Option<&'a str> {
    event
        .tags
        .iter()
        .map(|t| t.as_slice())
        .find(|t| t.first().map(String::as_str) == Some(tag_name))
        .and_then(|t| t.get(1))
        .map(String::as_str)
}

/// Values of every tag named `tag_name` (e.g. "t", "p").
pub fn extract_all_tag_values(event: &Event, tag_name: &str) -> Vec<String> {
    event
        .tags
        .iter()
        .map(|t| t.as_slice())
        .filter(|t| t.first().map(String::as_str) == Some(tag_name))
        .filter_map(|t| t.get(1).cloned())
        .collect()
}

pub fn has_tag(event: &Event, tag_name: &str) -> bool {
    event
        .tags
        .iter()
        .any(|t| t.as_slice().first().map(String::as_str) == Some(tag_name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use nostr_sdk::prelude::*;

    fn event_with_tags(tags: Vec<Vec<&str>>) -> Event {
        let keys = Keys::generate();
        let tags = tags.into_iter().map(|t| Tag::parse(t).unwrap());
        EventBuilder::new(Kind::Custom(31923), "")
            .tags(tags)
            .sign_with_keys(&keys)
            .unwrap()
    }

    #[test]
    fn test_extract_tag_str_returns_first() {
        let event = event_with_tags(vec![vec!["d", "standup"], vec!["d", "later"]]);
        assert_eq!(extract_tag_str(&event, "d"), Some("standup"));
        assert_eq!(extract_tag_str(&event, "title"), None);
    }

    #[test]
    fn test_extract_all_tag_values() {
        let event = event_with_tags(vec![vec!["t", "work"], vec!["d", "x"], vec!["t", "daily"]]);
        assert_eq!(extract_all_tag_values(&event, "t"), vec!["work", "daily"]);
    }

    #[test]
    fn test_has_tag_without_value() {
        let event = event_with_tags(vec![vec!["d"]]);
        assert!(has_tag(&event, "d"));
        assert_eq!(extract_tag_str(&event, "d"), None);
        assert!(!has_tag(&event, "p"));
    }
}
