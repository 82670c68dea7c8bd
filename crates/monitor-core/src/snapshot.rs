//! Snapshot extraction
//!
//! A [`Snapshot`] is every call visible in one channel listing, keyed by
//! [`SnapshotKey`] and kept in listing order so that reconciliation output
//! is deterministic.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use tracing::trace;

use crate::call::{CallRecord, CallerId, SnapshotKey};
use crate::parser::{CallerIdStrategy, LineParser};

/// Calls observed at one poll instant
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    calls: IndexMap<SnapshotKey, CallRecord>,
}

impl Snapshot {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a snapshot from keyed records; the first record wins on duplicate keys
    pub fn from_records<I>(records: I) -> Self
    where
        I: IntoIterator<Item = (SnapshotKey, CallRecord)>,
    {
        let mut calls = IndexMap::new();
        for (key, record) in records {
            calls.entry(key).or_insert(record);
        }
        Self { calls }
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    pub fn get(&self, key: &SnapshotKey) -> Option<&CallRecord> {
        self.calls.get(key)
    }

    pub fn contains(&self, key: &SnapshotKey) -> bool {
        self.calls.contains_key(key)
    }

    /// Keys in extraction order
    pub fn keys(&self) -> impl Iterator<Item = &SnapshotKey> {
        self.calls.keys()
    }

    /// Entries in extraction order
    pub fn iter(&self) -> impl Iterator<Item = (&SnapshotKey, &CallRecord)> {
        self.calls.iter()
    }

    /// This snapshot with first-seen times carried over from `previous`
    ///
    /// Used by the controller to build the snapshot it retains for the next
    /// cycle; keys absent from `previous` keep their own first-seen time.
    pub fn continued_from(self, previous: &Snapshot) -> Snapshot {
        let calls = self
            .calls
            .into_iter()
            .map(|(key, record)| match previous.get(&key) {
                Some(prior) => {
                    let record = record.continuing_from(prior.first_seen_at);
                    (key, record)
                }
                None => (key, record),
            })
            .collect();
        Snapshot { calls }
    }
}

/// Turns raw listing output into snapshots
#[derive(Debug, Clone, Copy, Default)]
pub struct SnapshotExtractor {
    parser: LineParser,
}

impl SnapshotExtractor {
    pub fn new(strategy: CallerIdStrategy) -> Self {
        Self {
            parser: LineParser::new(strategy),
        }
    }

    /// Parse a full listing
    ///
    /// The first line is the column header and the last one the channel
    /// count summary; with fewer than three lines there are no call rows.
    pub fn extract(&self, raw_output: &str, observed_at: DateTime<Utc>) -> Snapshot {
        let lines: Vec<&str> = raw_output.lines().collect();
        if lines.len() < 3 {
            return Snapshot::empty();
        }

        let mut calls = IndexMap::new();
        let mut unidentified = 0usize;

        for line in &lines[1..lines.len() - 1] {
            let Some(fields) = self.parser.parse(line) else {
                trace!(line = %line, "Skipping non-call line");
                continue;
            };

            let key = match &fields.caller_id {
                CallerId::Number(number) => SnapshotKey::Caller(number.clone()),
                CallerId::Unknown => {
                    let key = SnapshotKey::Unidentified(unidentified);
                    unidentified += 1;
                    key
                }
            };

            if calls.contains_key(&key) {
                trace!(key = %key, "Caller already listed on an earlier line");
                continue;
            }

            let record = CallRecord::new(fields.caller_id, fields.state, fields.duration, observed_at);
            calls.insert(key, record);
        }

        Snapshot { calls }
    }
}

/// Extract with the default scanning strategy
pub fn extract(raw_output: &str, observed_at: DateTime<Utc>) -> Snapshot {
    SnapshotExtractor::default().extract(raw_output, observed_at)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call::CallState;
    use pretty_assertions::assert_eq;

    const HEADER: &str = "Channel              Context              Extension        Prio State   Application  Data                 CallerID        Duration Accountcode PeerAccount BridgeID";

    fn listing(rows: &[&str]) -> String {
        let mut out = vec![HEADER.to_string()];
        out.extend(rows.iter().map(|r| r.to_string()));
        out.push(format!("{} active channels", rows.len()));
        out.join("\n")
    }

    #[test]
    fn test_single_up_call() {
        let now = Utc::now();
        let raw = listing(&["SIP/trunk-0001 from-pstn 100 1 Up Dial SIP/100 5551234567 00:45"]);

        let snapshot = extract(&raw, now);

        assert_eq!(snapshot.len(), 1);
        let record = snapshot.get(&SnapshotKey::caller("5551234567")).unwrap();
        assert_eq!(record.state, CallState::Up);
        assert_eq!(record.duration, "00:45");
        assert_eq!(record.observed_at, now);
        assert_eq!(record.first_seen_at, now);
    }

    #[test]
    fn test_header_and_footer_only() {
        let raw = format!("{}\n0 active channels", HEADER);
        assert!(extract(&raw, Utc::now()).is_empty());
        assert!(extract("", Utc::now()).is_empty());
        assert!(extract("only one line", Utc::now()).is_empty());
    }

    #[test]
    fn test_header_and_footer_are_never_parsed() {
        // both lines are wide enough to parse and contain a number
        let raw = "h1 h2 h3 h4 Up h6 h7 9990001111 00:01\n\
                   SIP/a ctx 100 1 Ringing Dial x 5550001111 00:02\n\
                   f1 f2 f3 f4 Up f6 f7 9990002222 00:03";
        let snapshot = extract(raw, Utc::now());
        let keys: Vec<_> = snapshot.keys().cloned().collect();
        assert_eq!(keys, vec![SnapshotKey::caller("5550001111")]);
    }

    #[test]
    fn test_unknown_callers_stay_distinct() {
        let raw = listing(&[
            "SIP/a-1 ctx s 1 Ringing Dial x anonymous 00:01",
            "SIP/b-2 ctx 100 1 Up Dial x 5551234567 00:30",
            "SIP/c-3 ctx s 1 Up Dial x anonymous 00:10",
        ]);

        let snapshot = extract(&raw, Utc::now());
        let keys: Vec<_> = snapshot.keys().cloned().collect();
        assert_eq!(
            keys,
            vec![
                SnapshotKey::Unidentified(0),
                SnapshotKey::caller("5551234567"),
                SnapshotKey::Unidentified(1),
            ]
        );
        assert_eq!(snapshot.get(&SnapshotKey::Unidentified(1)).unwrap().duration, "00:10");
    }

    #[test]
    fn test_short_rows_skipped() {
        let raw = listing(&[
            "garbage",
            "SIP/a-1 ctx 100 1 Up Dial x 5551234567 00:30",
            "-- -- --",
        ]);
        assert_eq!(extract(&raw, Utc::now()).len(), 1);
    }

    #[test]
    fn test_duplicate_caller_first_line_wins() {
        let raw = listing(&[
            "SIP/trunk-1 ctx 100 1 Ringing Dial x 5551234567 00:05",
            "SIP/100-2 ctx 100 1 Up AppDial x 5551234567 00:04",
        ]);
        let snapshot = extract(&raw, Utc::now());
        assert_eq!(snapshot.len(), 1);
        assert_eq!(
            snapshot.get(&SnapshotKey::caller("5551234567")).unwrap().state,
            CallState::Ringing
        );
    }

    #[test]
    fn test_crlf_output() {
        let raw = listing(&["SIP/a-1 ctx 100 1 Up Dial x 5551234567 00:30"]).replace('\n', "\r\n");
        let snapshot = extract(&raw, Utc::now());
        assert_eq!(
            snapshot.get(&SnapshotKey::caller("5551234567")).unwrap().duration,
            "00:30"
        );
    }

    #[test]
    fn test_continued_from_keeps_first_seen() {
        let earlier = Utc::now() - chrono::Duration::seconds(30);
        let now = Utc::now();
        let row = "SIP/a-1 ctx 100 1 Up Dial x 5551234567 00:30";
        let previous = extract(&listing(&[row]), earlier);
        let current = extract(
            &listing(&[row, "SIP/b-1 ctx 100 1 Ringing Dial x 5559876543 00:01"]),
            now,
        );

        let retained = current.continued_from(&previous);

        let kept = retained.get(&SnapshotKey::caller("5551234567")).unwrap();
        assert_eq!(kept.first_seen_at, earlier);
        assert_eq!(kept.observed_at, now);
        let fresh = retained.get(&SnapshotKey::caller("5559876543")).unwrap();
        assert_eq!(fresh.first_seen_at, now);
    }
}
