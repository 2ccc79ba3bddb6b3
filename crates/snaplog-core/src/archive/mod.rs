//! Paginated archival of events.
//!
//! Archived events live in pages: closed, non-overlapping id ranges stored
//! at `events/{name}.json.gz`. A page name encodes the boundary events:
//!
//! ```text
//! {firstTimestamp}_{firstId}-{lastTimestamp}_{lastId}
//! ```
//!
//! Names written here are unpadded. Zero-padded names from other writers
//! parse too and keep their spelling, so their archive paths still resolve.
//!
//! The [`FileArchiver`] decides whether a new batch extends the latest page
//! or starts a fresh one; [`PageIndex`] keeps the set of live pages.

pub mod codec;
pub mod dir;
pub mod files;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{CoreError, Result};
use crate::event::Event;

/// Archive directory holding event pages.
pub const EVENTS_DIR: &str = "events";

/// File suffix of an archived page.
pub const PAGE_SUFFIX: &str = ".json.gz";

/// File suffix of the manifest stored next to a page.
pub const MANIFEST_SUFFIX: &str = ".manifest.json";

/// Default merge ceiling for the serialized size of a page.
pub const DEFAULT_MAX_PAGE_BYTES: u64 = 10_000_000;

// ---------------------------------------------------------------------------
// PageName
// ---------------------------------------------------------------------------

/// Name of an archived page, derived from its first and last events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PageName {
    pub first_ts: i64,
    pub first_id: u64,
    pub last_ts: i64,
    pub last_id: u64,
    /// Digit count of each component as spelled; 0 prints unpadded.
    widths: [u8; 4],
}

impl PageName {
    /// Unpadded name for the given boundaries.
    #[must_use]
    pub const fn new(first_ts: i64, first_id: u64, last_ts: i64, last_id: u64) -> Self {
        Self {
            first_ts,
            first_id,
            last_ts,
            last_id,
            widths: [0; 4],
        }
    }

    /// Name the page spanning `first..=last`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Validation`] when `last` precedes `first` or a
    /// timestamp is negative (the name format has no sign).
    pub fn for_range(first: &Event, last: &Event) -> Result<Self> {
        if last.id < first.id {
            return Err(CoreError::Validation(format!(
                "page range {}..{} is inverted",
                first.id, last.id
            )));
        }
        if first.timestamp < 0 || last.timestamp < 0 {
            return Err(CoreError::Validation(
                "page boundary timestamps must be non-negative".into(),
            ));
        }
        Ok(Self::new(first.timestamp, first.id, last.timestamp, last.id))
    }

    /// Path of this page inside the archive.
    #[must_use]
    pub fn archive_path(&self) -> String {
        format!("{EVENTS_DIR}/{self}{PAGE_SUFFIX}")
    }

    /// Path of this page's [`codec::PageManifest`] inside the archive.
    #[must_use]
    pub fn manifest_path(&self) -> String {
        format!("{EVENTS_DIR}/{self}{MANIFEST_SUFFIX}")
    }

    /// Parse `events/{name}.json.gz` back into a page name.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::CorruptPageName`] for anything else.
    pub fn from_archive_path(path: &str) -> Result<Self> {
        path.strip_prefix(EVENTS_DIR)
            .and_then(|rest| rest.strip_prefix('/'))
            .and_then(|rest| rest.strip_suffix(PAGE_SUFFIX))
            .ok_or_else(|| CoreError::CorruptPageName(path.to_string()))?
            .parse()
    }

    /// Whether the id ranges of `self` and `other` intersect.
    #[must_use]
    pub const fn overlaps(&self, other: &Self) -> bool {
        self.first_id <= other.last_id && other.first_id <= self.last_id
    }
}

impl fmt::Display for PageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [w0, w1, w2, w3] = self.widths.map(usize::from);
        write!(
            f,
            "{:0w0$}_{:0w1$}-{:0w2$}_{:0w3$}",
            self.first_ts, self.first_id, self.last_ts, self.last_id
        )
    }
}

impl FromStr for PageName {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        let corrupt = || CoreError::CorruptPageName(s.to_string());

        let (first, last) = s.split_once('-').ok_or_else(corrupt)?;
        let (first_ts, first_id) = first.split_once('_').ok_or_else(corrupt)?;
        let (last_ts, last_id) = last.split_once('_').ok_or_else(corrupt)?;

        let name = Self {
            first_ts: parse_component(first_ts).ok_or_else(corrupt)?,
            first_id: parse_component(first_id).ok_or_else(corrupt)?,
            last_ts: parse_component(last_ts).ok_or_else(corrupt)?,
            last_id: parse_component(last_id).ok_or_else(corrupt)?,
            widths: [
                padded_width(first_ts).ok_or_else(corrupt)?,
                padded_width(first_id).ok_or_else(corrupt)?,
                padded_width(last_ts).ok_or_else(corrupt)?,
                padded_width(last_id).ok_or_else(corrupt)?,
            ],
        };
        if name.last_id < name.first_id {
            return Err(corrupt());
        }
        Ok(name)
    }
}

impl TryFrom<String> for PageName {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<PageName> for String {
    fn from(name: PageName) -> Self {
        name.to_string()
    }
}

/// Unsigned decimal digits, leading zeros allowed.
fn parse_component<T: FromStr>(raw: &str) -> Option<T> {
    let digits = !raw.is_empty() && raw.bytes().all(|b| b.is_ascii_digit());
    if digits { raw.parse().ok() } else { None }
}

/// Width to print `raw` back with: 0 when it has no leading zero.
fn padded_width(raw: &str) -> Option<u8> {
    if raw.len() > 1 && raw.starts_with('0') {
        u8::try_from(raw.len()).ok()
    } else {
        Some(0)
    }
}

// ---------------------------------------------------------------------------
// Page batches and planning
// ---------------------------------------------------------------------------

/// Events destined for one page, with their serialized JSON size.
#[derive(Debug, Clone, PartialEq)]
pub struct PageBatch {
    events: Vec<Event>,
    byte_len: u64,
}

impl PageBatch {
    /// Wrap `events`, which must be non-empty and strictly ascending by id.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Validation`] for an empty or unordered batch.
    pub fn new(events: Vec<Event>) -> Result<Self> {
        if events.is_empty() {
            return Err(CoreError::Validation("a page needs at least one event".into()));
        }
        if events.windows(2).any(|pair| pair[0].id >= pair[1].id) {
            return Err(CoreError::Validation(
                "page events must be strictly ascending by id".into(),
            ));
        }
        let byte_len = serde_json::to_vec(&events)?.len() as u64;
        Ok(Self { events, byte_len })
    }

    #[must_use]
    pub fn events(&self) -> &[Event] {
        &self.events
    }

    #[must_use]
    pub fn into_events(self) -> Vec<Event> {
        self.events
    }

    /// Length of the page's serialized JSON.
    #[must_use]
    pub const fn byte_len(&self) -> u64 {
        self.byte_len
    }

    /// Name of the page holding exactly these events.
    ///
    /// # Errors
    ///
    /// See [`PageName::for_range`].
    pub fn name(&self) -> Result<PageName> {
        match (self.events.first(), self.events.last()) {
            (Some(first), Some(last)) => PageName::for_range(first, last),
            _ => Err(CoreError::Validation("a page needs at least one event".into())),
        }
    }

    #[cfg(test)]
    pub(crate) fn with_byte_len(mut self, byte_len: u64) -> Self {
        self.byte_len = byte_len;
        self
    }
}

/// The most recent archived page and its content.
#[derive(Debug, Clone)]
pub struct LatestPage {
    pub name: PageName,
    pub batch: PageBatch,
}

/// Outcome of [`FileArchiver::plan_page`].
#[derive(Debug, Clone, PartialEq)]
pub struct PagePlan {
    pub name: PageName,
    pub events: Vec<Event>,
    pub byte_len: u64,
    /// Latest page absorbed into this one; delete it once the plan is
    /// uploaded.
    pub superseded: Option<PageName>,
}

impl PagePlan {
    #[must_use]
    pub const fn merges(&self) -> bool {
        self.superseded.is_some()
    }
}

/// Page sizing policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileArchiver {
    max_page_bytes: u64,
}

impl Default for FileArchiver {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PAGE_BYTES)
    }
}

impl FileArchiver {
    #[must_use]
    pub const fn new(max_page_bytes: u64) -> Self {
        Self { max_page_bytes }
    }

    #[must_use]
    pub const fn max_page_bytes(&self) -> u64 {
        self.max_page_bytes
    }

    /// Decide where `candidate` goes.
    ///
    /// The candidate extends `latest` iff the two serialized sizes add up to
    /// strictly less than `max_page_bytes`; the merged page lists the old
    /// page's events first. Otherwise the candidate becomes its own page.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Precondition`] if the candidate does not start
    /// after the latest page.
    pub fn plan_page(&self, candidate: PageBatch, latest: Option<LatestPage>) -> Result<PagePlan> {
        let Some(latest) = latest else {
            return standalone(candidate);
        };

        let first_new = candidate.events.first().map_or(0, |e| e.id);
        if first_new <= latest.name.last_id {
            return Err(CoreError::Precondition(format!(
                "batch starting at event {first_new} overlaps page {}",
                latest.name
            )));
        }

        let combined = latest.batch.byte_len.saturating_add(candidate.byte_len);
        if combined >= self.max_page_bytes {
            debug!(combined, limit = self.max_page_bytes, "starting a new page");
            return standalone(candidate);
        }

        let mut events = latest.batch.into_events();
        events.extend(candidate.events);
        let merged = PageBatch::new(events)?;
        debug!(superseded = %latest.name, "extending latest page");
        Ok(PagePlan {
            name: merged.name()?,
            byte_len: merged.byte_len,
            events: merged.events,
            superseded: Some(latest.name),
        })
    }
}

fn standalone(candidate: PageBatch) -> Result<PagePlan> {
    Ok(PagePlan {
        name: candidate.name()?,
        byte_len: candidate.byte_len,
        events: candidate.events,
        superseded: None,
    })
}

// ---------------------------------------------------------------------------
// PageIndex
// ---------------------------------------------------------------------------

/// Live archived pages, in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PageIndex {
    pages: Vec<PageName>,
}

impl PageIndex {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an index from raw names.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::CorruptPageName`] for an unparseable name, or
    /// [`CoreError::CorruptPage`] if two ranges overlap.
    pub fn from_names<I, S>(names: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut index = Self::new();
        for name in names {
            index.insert(name.as_ref().parse()?)?;
        }
        Ok(index)
    }

    /// Check that no two pages overlap.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::CorruptPage`] naming the first overlapping page.
    pub fn validate(&self) -> Result<()> {
        let sorted = self.sorted();
        match sorted.windows(2).find(|pair| pair[0].overlaps(&pair[1])) {
            Some(pair) => Err(overlap(&pair[1], &pair[0])),
            None => Ok(()),
        }
    }

    /// Pages in ascending order of first event id.
    #[must_use]
    pub fn sorted(&self) -> Vec<PageName> {
        let mut pages = self.pages.clone();
        pages.sort_by_key(|name| name.first_id);
        pages
    }

    /// Page with the highest boundary id.
    #[must_use]
    pub fn latest(&self) -> Option<&PageName> {
        self.pages.iter().max_by_key(|name| name.last_id)
    }

    #[must_use]
    pub fn contains(&self, name: &PageName) -> bool {
        self.pages.contains(name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.pages.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PageName> {
        self.pages.iter()
    }

    /// Record a newly uploaded page.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::CorruptPage`] if it overlaps a live page.
    pub fn insert(&mut self, name: PageName) -> Result<()> {
        if let Some(existing) = self.pages.iter().find(|p| p.overlaps(&name)) {
            return Err(overlap(&name, existing));
        }
        self.pages.push(name);
        Ok(())
    }

    /// Drop the page `plan` supersedes and record the planned page.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::CorruptPage`] if the planned page overlaps a
    /// page that stays live. The index is unchanged on error.
    pub fn apply(&mut self, plan: &PagePlan) -> Result<()> {
        let mut next = self.clone();
        if let Some(old) = &plan.superseded {
            next.pages.retain(|p| p != old);
        }
        next.insert(plan.name)?;
        *self = next;
        Ok(())
    }
}

fn overlap(name: &PageName, existing: &PageName) -> CoreError {
    CoreError::CorruptPage {
        name: name.to_string(),
        reason: format!("overlaps live page {existing}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use serde_json::json;

    fn event(id: u64, timestamp: i64) -> Event {
        Event {
            id,
            timestamp,
            actor: "ada@example.com".into(),
            payload: json!({"post": {"n": id}}).as_object().cloned().expect("object"),
        }
    }

    fn batch(ids: std::ops::RangeInclusive<u64>) -> PageBatch {
        PageBatch::new(ids.map(|id| event(id, 1_000 + id as i64)).collect()).expect("batch")
    }

    fn name(s: &str) -> PageName {
        s.parse().expect("page name")
    }

    #[test]
    fn page_name_format() {
        let n = PageName::for_range(&event(1, 1_700_000_000), &event(5, 1_700_000_090))
            .expect("name");
        assert_eq!(n.to_string(), "1700000000_1-1700000090_5");
        assert_eq!(n.archive_path(), "events/1700000000_1-1700000090_5.json.gz");
        assert_eq!(
            n.manifest_path(),
            "events/1700000000_1-1700000090_5.manifest.json"
        );
        assert!(PageName::from_archive_path(&n.manifest_path()).is_err());
        assert_eq!(
            PageName::from_archive_path(&n.archive_path()).expect("parse path"),
            n
        );
    }

    #[test]
    fn corrupt_page_names_are_rejected() {
        for raw in [
            "",
            "1_1",
            "1_1-2",
            "a_1-2_3",
            "1_2-3_1",
            "1_1-2_2-3_3",
            "+1_1-2_2",
            "_1-2_2",
            "1_1-2_ 2",
            "1_1-2_2.json.gz",
            "-1_1-2_2",
        ] {
            let err = raw.parse::<PageName>().unwrap_err();
            assert_eq!(err.code(), ErrorCode::CorruptPageName, "{raw:?}");
        }
        assert!(PageName::from_archive_path("files/1_1-2_2.json.gz").is_err());
    }

    #[test]
    fn zero_padded_names_parse_and_keep_their_spelling() {
        let raw = "0001700000000_0001-0001700000100_0041";
        let n = name(raw);
        assert_eq!(
            (n.first_ts, n.first_id, n.last_ts, n.last_id),
            (1_700_000_000, 1, 1_700_000_100, 41)
        );
        assert_eq!(n.to_string(), raw);
        assert_eq!(n.archive_path(), format!("events/{raw}.json.gz"));
        assert_eq!(PageName::from_archive_path(&n.archive_path()).expect("path"), n);
        assert_eq!(serde_json::to_value(n).expect("ser"), json!(raw));

        let index = PageIndex::from_names(["0000000001_0010-0000000002_0012", "5_2-5_9"])
            .expect("index");
        let firsts: Vec<u64> = index.sorted().iter().map(|n| n.first_id).collect();
        assert_eq!(firsts, vec![2, 10]);
        assert!(index.validate().is_ok());
    }

    #[test]
    fn single_event_page_is_valid() {
        let n = name("5_3-5_3");
        assert_eq!(n.first_id, n.last_id);
    }

    #[test]
    fn serde_uses_string_form() {
        let n = name("10_1-20_4");
        assert_eq!(serde_json::to_value(n).expect("ser"), json!("10_1-20_4"));
        let err = serde_json::from_value::<PageName>(json!("garbage"));
        assert!(err.is_err());
    }

    #[test]
    fn batch_requires_ascending_events() {
        assert!(PageBatch::new(Vec::new()).is_err());
        assert!(PageBatch::new(vec![event(2, 1), event(1, 1)]).is_err());
        let b = batch(1..=3);
        assert_eq!(
            b.byte_len(),
            serde_json::to_vec(b.events()).expect("json").len() as u64
        );
    }

    #[test]
    fn merges_below_limit() {
        let archiver = FileArchiver::default();
        let latest = LatestPage {
            name: name("1001_1-1003_3"),
            batch: batch(1..=3).with_byte_len(9_000_000),
        };
        let plan = archiver
            .plan_page(batch(4..=5).with_byte_len(900_000), Some(latest))
            .expect("plan");
        assert!(plan.merges());
        assert_eq!(plan.superseded, Some(name("1001_1-1003_3")));
        assert_eq!(plan.name, name("1001_1-1005_5"));
        let ids: Vec<u64> = plan.events.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn splits_at_or_above_limit() {
        let archiver = FileArchiver::default();
        let latest = LatestPage {
            name: name("1001_1-1003_3"),
            batch: batch(1..=3).with_byte_len(9_000_000),
        };
        let plan = archiver
            .plan_page(batch(4..=5).with_byte_len(1_100_000), Some(latest.clone()))
            .expect("plan");
        assert!(!plan.merges());
        assert_eq!(plan.name, name("1004_4-1005_5"));
        assert_eq!(plan.byte_len, 1_100_000);

        // exactly at the limit does not merge either
        let plan = archiver
            .plan_page(batch(4..=5).with_byte_len(1_000_000), Some(latest))
            .expect("plan");
        assert!(!plan.merges());
    }

    #[test]
    fn first_page_stands_alone() {
        let plan = FileArchiver::new(100)
            .plan_page(batch(1..=2), None)
            .expect("plan");
        assert_eq!(plan.name, name("1001_1-1002_2"));
        assert!(plan.superseded.is_none());
    }

    #[test]
    fn overlapping_candidate_is_refused() {
        let latest = LatestPage {
            name: name("1001_1-1003_3"),
            batch: batch(1..=3),
        };
        let err = FileArchiver::default()
            .plan_page(batch(3..=4), Some(latest))
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::Precondition);
    }

    #[test]
    fn index_sorts_numerically_not_lexically() {
        let index = PageIndex::from_names(["9_9-9_9", "1_10-1_12", "1_1-1_8"]).expect("index");
        let firsts: Vec<u64> = index.sorted().iter().map(|n| n.first_id).collect();
        assert_eq!(firsts, vec![1, 9, 10]);
        assert_eq!(index.latest(), Some(&name("1_10-1_12")));
        assert!(index.validate().is_ok());
    }

    #[test]
    fn index_rejects_overlaps() {
        let err = PageIndex::from_names(["1_1-1_5", "1_5-1_7"]).unwrap_err();
        assert_eq!(err.code(), ErrorCode::CorruptPage);
    }

    #[test]
    fn apply_replaces_superseded_page() {
        let mut index = PageIndex::from_names(["1_1-1_3"]).expect("index");
        let plan = PagePlan {
            name: name("1_1-1_5"),
            events: Vec::new(),
            byte_len: 0,
            superseded: Some(name("1_1-1_3")),
        };
        index.apply(&plan).expect("apply");
        assert_eq!(index.sorted(), vec![name("1_1-1_5")]);

        let clash = PagePlan {
            name: name("1_4-1_9"),
            events: Vec::new(),
            byte_len: 0,
            superseded: None,
        };
        assert!(index.apply(&clash).is_err());
        assert_eq!(index.len(), 1, "index unchanged after failed apply");
    }
}
