//! Core domain types for bill and sponsor records.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Character budget for long free-text fields (titles, committees, subjects).
pub const LONG_TEXT_LIMIT: usize = 999;

/// Character budget for titles once the keyword stage has run.
pub const KEYWORD_TITLE_LIMIT: usize = 250;

/// Cut `text` to at most `limit` characters (not bytes).
pub fn truncate_chars(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((byte_idx, _)) => text[..byte_idx].to_string(),
        None => text.to_string(),
    }
}

// ---------------------------------------------------------------------------
// RunId
// ---------------------------------------------------------------------------

/// A UUID v7 wrapper for sync run identifiers (time-sortable).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub Uuid);

impl RunId {
    /// Generate a new time-sortable run identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for RunId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

// ---------------------------------------------------------------------------
// API-side records
// ---------------------------------------------------------------------------

/// One entry from a collection listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageSummary {
    pub package_id: String,
    pub title: Option<String>,
    /// Raw `dateIssued` as published (usually `YYYY-MM-DD`).
    pub date_issued: String,
    /// Detail endpoint for this package.
    pub package_link: String,
    pub doc_class: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<String>,
}

/// Whether a legislator is the bill's sponsor or a cosponsor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SponsorRole {
    Sponsor,
    Cosponsor,
}

impl SponsorRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sponsor => "sponsor",
            Self::Cosponsor => "cosponsor",
        }
    }
}

/// A sponsor or cosponsor entry parsed from a bill-status document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SponsorRecord {
    pub full_name: String,
    pub role: SponsorRole,
    pub party: String,
    /// Two-letter state abbreviation.
    pub state: String,
    /// Raw sponsorship date; the introduced date for the primary sponsor.
    pub sponsor_date: Option<String>,
    /// Biographical directory identifier, stable across congresses.
    pub bioguide_id: String,
    pub original_cosponsor: bool,
}

impl SponsorRecord {
    /// Public biography page for this member.
    pub fn bio_url(&self) -> String {
        format!(
            "https://bioguideretro.congress.gov/Home/MemberDetails?memIndex={}",
            self.bioguide_id
        )
    }
}

/// Bill-level fields shared by every sponsor row of one package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillRecord {
    pub package_id: String,
    pub bill_number: String,
    pub title: String,
    pub committees: String,
    pub other_title: String,
    pub latest_action: String,
    /// Raw `latestAction/actionDate`.
    pub latest_action_date: String,
    pub policy_area: Option<String>,
    pub subjects: String,
    /// Document download link.
    pub link: String,
    /// Raw `dateIssued` from the collection summary.
    pub date_issued: String,
    pub doc_class: String,
}

/// A package whose detail and status document were both resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPackage {
    pub bill: BillRecord,
    pub sponsors: Vec<SponsorRecord>,
}

// ---------------------------------------------------------------------------
// Tabular rows
// ---------------------------------------------------------------------------

/// One sponsor joined with its bill, ready for reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrichedRow {
    /// `bioguide_id` followed by `package_id`.
    pub unique_id: String,
    pub package_id: String,
    pub bill_number: String,
    pub bill_type: String,
    pub title: String,
    pub committees: String,
    pub other_title: String,
    pub latest_action: String,
    pub latest_action_date: NaiveDate,
    pub policy_area: Option<String>,
    pub subjects: String,
    pub link: String,
    pub date_issued: NaiveDate,
    pub full_name: String,
    pub role: SponsorRole,
    pub party: String,
    pub state: String,
    pub sponsor_date: Option<NaiveDate>,
    pub bioguide_id: String,
    pub bio_url: String,
    pub original_cosponsor: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keyword: Option<String>,
}

/// Build the reconciliation key for a sponsor on a package.
pub fn unique_id(bioguide_id: &str, package_id: &str) -> String {
    format!("{bioguide_id}{package_id}")
}

/// An [`EnrichedRow`] matched to a state reference entry.
#[derive(Debug, Clone, PartialEq)]
pub struct GeoJoinRow {
    pub row: EnrichedRow,
    pub state_name: String,
    /// Opaque state geometry carried through to the store, if known.
    pub geometry: Option<serde_json::Value>,
}

/// The flattened sponsor table produced by one assembly pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Dataset {
    pub rows: Vec<EnrichedRow>,
}

impl Dataset {
    pub fn new(rows: Vec<EnrichedRow>) -> Self {
        Self { rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Distinct package ids, in first-seen order.
    pub fn package_ids(&self) -> Vec<&str> {
        let mut seen = std::collections::HashSet::new();
        self.rows
            .iter()
            .map(|r| r.package_id.as_str())
            .filter(|id| seen.insert(*id))
            .collect()
    }

    /// Append another dataset's rows.
    pub fn extend(&mut self, other: Dataset) {
        self.rows.extend(other.rows);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_id_roundtrip() {
        let id = RunId::new();
        let parsed: RunId = id.to_string().parse().expect("parse RunId");
        assert_eq!(id, parsed);
    }

    #[test]
    fn truncate_counts_characters() {
        let long = "é".repeat(1200);
        let cut = truncate_chars(&long, LONG_TEXT_LIMIT);
        assert_eq!(cut.chars().count(), LONG_TEXT_LIMIT);

        assert_eq!(truncate_chars("short", 250), "short");
        assert_eq!(truncate_chars("abcdef", 3), "abc");
        assert_eq!(truncate_chars("", 3), "");
    }

    #[test]
    fn unique_id_is_deterministic() {
        let a = unique_id("S000148", "BILLS-118s1234is");
        let b = unique_id("S000148", "BILLS-118s1234is");
        assert_eq!(a, b);
        assert_eq!(a, "S000148BILLS-118s1234is");
        assert_ne!(a, unique_id("S000148", "BILLS-118s1235is"));
    }

    #[test]
    fn sponsor_bio_url() {
        let sponsor = SponsorRecord {
            full_name: "Sen. Example [D-NY]".into(),
            role: SponsorRole::Sponsor,
            party: "D".into(),
            state: "NY".into(),
            sponsor_date: None,
            bioguide_id: "S000148".into(),
            original_cosponsor: true,
        };
        assert!(sponsor.bio_url().ends_with("memIndex=S000148"));
        assert_eq!(sponsor.role.as_str(), "sponsor");
    }

    #[test]
    fn dataset_package_ids_are_distinct() {
        let row = |pkg: &str, bio: &str| EnrichedRow {
            unique_id: unique_id(bio, pkg),
            package_id: pkg.into(),
            bill_number: "hr1".into(),
            bill_type: "House Bill".into(),
            title: "t".into(),
            committees: String::new(),
            other_title: String::new(),
            latest_action: String::new(),
            latest_action_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            policy_area: None,
            subjects: String::new(),
            link: String::new(),
            date_issued: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            full_name: bio.into(),
            role: SponsorRole::Cosponsor,
            party: "R".into(),
            state: "TX".into(),
            sponsor_date: None,
            bioguide_id: bio.into(),
            bio_url: String::new(),
            original_cosponsor: false,
            category: None,
            keyword: None,
        };
        let ds = Dataset::new(vec![row("P1", "A"), row("P1", "B"), row("P2", "A")]);
        assert_eq!(ds.package_ids(), vec!["P1", "P2"]);
        assert_eq!(ds.len(), 3);
    }
}
