//! Filtered, sorted, paginated listing of a scope's records.

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::{fmt, str::FromStr};

use crate::config::ViewConfig;
use crate::model::{ParseEnumError, Status, TaskRecord};
use crate::scope::Scope;

/// Calendar window a due date must fall into, evaluated in UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DueWindow {
    Today,
    /// ISO week, Monday first.
    Week,
    Month,
    Year,
}

impl DueWindow {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Today => "today",
            Self::Week => "week",
            Self::Month => "month",
            Self::Year => "year",
        }
    }

    #[must_use]
    pub fn contains(self, due: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        match self {
            Self::Today => due.date_naive() == now.date_naive(),
            Self::Week => due.iso_week() == now.iso_week(),
            Self::Month => due.year() == now.year() && due.month() == now.month(),
            Self::Year => due.year() == now.year(),
        }
    }
}

impl fmt::Display for DueWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DueWindow {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "today" => Ok(Self::Today),
            "week" => Ok(Self::Week),
            "month" => Ok(Self::Month),
            "year" => Ok(Self::Year),
            _ => Err(ParseEnumError {
                expected: "due window",
                got: s.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SharingFilter {
    /// Only records shared with their space.
    Shared,
    /// Only records not shared with a space.
    Personal,
}

/// Conjunctive record filter. Every `None` field matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewFilter {
    #[serde(default)]
    pub status: Option<Status>,
    #[serde(default)]
    pub due: Option<DueWindow>,
    #[serde(default)]
    pub search: Option<String>,
    #[serde(default)]
    pub sharing: Option<SharingFilter>,
}

impl ViewFilter {
    #[must_use]
    pub const fn with_status(mut self, status: Status) -> Self {
        self.status = Some(status);
        self
    }

    #[must_use]
    pub const fn due_within(mut self, window: DueWindow) -> Self {
        self.due = Some(window);
        self
    }

    #[must_use]
    pub fn searching(mut self, query: impl Into<String>) -> Self {
        self.search = Some(query.into());
        self
    }

    #[must_use]
    pub const fn sharing(mut self, sharing: SharingFilter) -> Self {
        self.sharing = Some(sharing);
        self
    }

    #[must_use]
    pub fn matches(&self, record: &TaskRecord, now: DateTime<Utc>) -> bool {
        if self.status.is_some_and(|status| status != record.status) {
            return false;
        }
        if let Some(window) = self.due {
            match record.due_date {
                Some(due) if window.contains(due, now) => {}
                _ => return false,
            }
        }
        if let Some(sharing) = self.sharing {
            let shared = record.is_space_shared();
            match sharing {
                SharingFilter::Shared if !shared => return false,
                SharingFilter::Personal if shared => return false,
                _ => {}
            }
        }
        match self.search.as_deref().map(str::trim) {
            Some(query) if !query.is_empty() => {
                let needle = query.to_lowercase();
                record.title.to_lowercase().contains(&needle)
                    || record
                        .description
                        .as_deref()
                        .is_some_and(|d| d.to_lowercase().contains(&needle))
            }
            _ => true,
        }
    }
}

/// Requested window of the sorted result. A missing limit means the
/// configured default page size.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    #[serde(default)]
    pub offset: usize,
    #[serde(default)]
    pub limit: Option<usize>,
}

impl Page {
    #[must_use]
    pub const fn new(offset: usize, limit: usize) -> Self {
        Self {
            offset,
            limit: Some(limit),
        }
    }

    #[must_use]
    pub const fn first(limit: usize) -> Self {
        Self::new(0, limit)
    }

    /// The page after this one at the same effective size.
    #[must_use]
    pub const fn next(self, effective_limit: usize) -> Self {
        Self {
            offset: self.offset + effective_limit,
            limit: self.limit,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListPage {
    pub items: Vec<TaskRecord>,
    /// Matching records before pagination.
    pub total: usize,
    pub offset: usize,
    /// Effective limit after defaulting and clamping.
    pub limit: usize,
}

impl ListPage {
    #[must_use]
    pub const fn has_more(&self) -> bool {
        self.offset + self.items.len() < self.total
    }
}

/// Due date ascending with undated records last, then id.
#[must_use]
pub fn display_order(a: &TaskRecord, b: &TaskRecord) -> Ordering {
    match (a.due_date, b.due_date) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
    .then_with(|| a.id.cmp(&b.id))
}

/// Select the records of `scope` passing `filter` and cut out one page.
pub fn list<'a>(
    records: impl IntoIterator<Item = &'a TaskRecord>,
    scope: &Scope,
    filter: &ViewFilter,
    page: Page,
    now: DateTime<Utc>,
    config: &ViewConfig,
) -> ListPage {
    let limit = page
        .limit
        .unwrap_or(config.default_page_size)
        .min(config.max_page_size)
        .max(1);

    let mut matching: Vec<&TaskRecord> = records
        .into_iter()
        .filter(|record| scope.matches(record) && filter.matches(record, now))
        .collect();
    matching.sort_by(|a, b| display_order(a, b));

    let total = matching.len();
    let items = matching
        .into_iter()
        .skip(page.offset)
        .take(limit)
        .cloned()
        .collect();
    ListPage {
        items,
        total,
        offset: page.offset,
        limit,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{NewTask, RecordId};
    use crate::scope::ScopeContext;
    use chrono::{Duration, TimeZone};

    // Wednesday.
    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 18, 15, 30, 0).unwrap()
    }

    fn rec(id: &str, due: Option<DateTime<Utc>>) -> TaskRecord {
        let mut new = NewTask::new(format!("task {id}"), "alice");
        new.due_date = due;
        new.to_record(RecordId::new(id), now())
    }

    #[test]
    fn today_is_the_utc_calendar_day() {
        let start = Utc.with_ymd_and_hms(2026, 3, 18, 0, 0, 0).unwrap();
        assert!(DueWindow::Today.contains(start, now()));
        assert!(!DueWindow::Today.contains(start - Duration::seconds(1), now()));
        assert!(!DueWindow::Today.contains(start + Duration::days(1), now()));
    }

    #[test]
    fn week_runs_monday_to_sunday() {
        let monday = Utc.with_ymd_and_hms(2026, 3, 16, 0, 0, 0).unwrap();
        let sunday = Utc.with_ymd_and_hms(2026, 3, 22, 23, 59, 59).unwrap();
        assert!(DueWindow::Week.contains(monday, now()));
        assert!(DueWindow::Week.contains(sunday, now()));
        assert!(!DueWindow::Week.contains(monday - Duration::seconds(1), now()));
        assert!(!DueWindow::Week.contains(sunday + Duration::seconds(1), now()));
    }

    #[test]
    fn month_and_year_are_calendar_bounded() {
        let march_end = Utc.with_ymd_and_hms(2026, 3, 31, 23, 0, 0).unwrap();
        let april = Utc.with_ymd_and_hms(2026, 4, 1, 0, 0, 0).unwrap();
        assert!(DueWindow::Month.contains(march_end, now()));
        assert!(!DueWindow::Month.contains(april, now()));
        assert!(DueWindow::Year.contains(april, now()));
        let next_year = Utc.with_ymd_and_hms(2027, 1, 1, 0, 0, 0).unwrap();
        assert!(!DueWindow::Year.contains(next_year, now()));
    }

    #[test]
    fn undated_records_never_match_a_due_window() {
        let filter = ViewFilter::default().due_within(DueWindow::Year);
        assert!(!filter.matches(&rec("a", None), now()));
    }

    #[test]
    fn search_is_case_insensitive_over_title_and_description() {
        let mut record = rec("a", None);
        record.description = Some("Bring the Projector".to_string());
        assert!(ViewFilter::default().searching("projector").matches(&record, now()));
        assert!(ViewFilter::default().searching("TASK A").matches(&record, now()));
        assert!(ViewFilter::default().searching("   ").matches(&record, now()));
        assert!(!ViewFilter::default().searching("slides").matches(&record, now()));
    }

    #[test]
    fn sharing_filter_uses_space_rule() {
        let mut shared_without_space = rec("a", None);
        shared_without_space.is_shared = true;
        let personal = ViewFilter::default().sharing(SharingFilter::Personal);
        assert!(personal.matches(&shared_without_space, now()));
    }

    #[test]
    fn ordering_puts_undated_last_and_breaks_ties_by_id() {
        let scope = ScopeContext::personal("alice").resolve();
        let early = now() - Duration::days(2);
        let records = [
            rec("d", None),
            rec("c", Some(now())),
            rec("b", Some(early)),
            rec("a", None),
            rec("e", Some(now())),
        ];
        let page = list(&records, &scope, &ViewFilter::default(), Page::default(), now(), &ViewConfig::default());
        let ids: Vec<&str> = page.items.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, ["b", "c", "e", "a", "d"]);
        assert_eq!(page.limit, 25);
    }

    #[test]
    fn pages_partition_the_result() {
        let scope = ScopeContext::personal("alice").resolve();
        let records: Vec<TaskRecord> = (0..7).map(|i| rec(&format!("r{i}"), None)).collect();
        let cfg = ViewConfig::default();

        let first = list(&records, &scope, &ViewFilter::default(), Page::first(3), now(), &cfg);
        let second = list(&records, &scope, &ViewFilter::default(), Page::first(3).next(3), now(), &cfg);
        let third = list(&records, &scope, &ViewFilter::default(), Page::new(6, 3), now(), &cfg);
        assert_eq!(first.total, 7);
        assert!(first.has_more());
        assert_eq!(second.items[0].id.as_str(), "r3");
        assert_eq!(third.items.len(), 1);
        assert!(!third.has_more());
    }

    #[test]
    fn limit_is_clamped_to_max_page_size() {
        let scope = ScopeContext::personal("alice").resolve();
        let cfg = ViewConfig {
            default_page_size: 2,
            max_page_size: 4,
        };
        let records: Vec<TaskRecord> = (0..10).map(|i| rec(&format!("r{i}"), None)).collect();
        let page = list(&records, &scope, &ViewFilter::default(), Page::first(50), now(), &cfg);
        assert_eq!(page.limit, 4);
        assert_eq!(page.items.len(), 4);
    }

    #[test]
    fn due_window_parses() {
        assert_eq!("Week".parse::<DueWindow>().unwrap(), DueWindow::Week);
        assert!("fortnight".parse::<DueWindow>().is_err());
    }
}
