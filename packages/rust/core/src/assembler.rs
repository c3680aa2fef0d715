//! Dataset assembly: resolved packages → flat sponsor rows.
//!
//! Each sponsor of each package becomes one [`EnrichedRow`] carrying the
//! bill-level fields. Raw API dates are normalized to `NaiveDate` here, and
//! rows whose latest action predates the window are dropped.

use std::collections::HashSet;

use billsync_shared::{
    Dataset, EnrichedRow, ResolvedPackage, TimeWindow, parse_api_date, unique_id,
};
use tracing::{debug, info, warn};

/// Flatten `packages` of one bill type into a dataset.
///
/// The collection endpoint filters on last-modified time, which is coarser
/// than the latest-action date, so rows with a latest action strictly
/// before `window.cutoff_date()` are excluded here.
pub fn assemble(packages: &[ResolvedPackage], bill_type: &str, window: &TimeWindow) -> Dataset {
    let cutoff = window.cutoff_date();
    let mut rows = Vec::new();
    let mut stale = 0usize;

    for package in packages {
        let bill = &package.bill;
        let Some(latest_action_date) = parse_api_date(&bill.latest_action_date) else {
            warn!(
                package_id = %bill.package_id,
                raw = %bill.latest_action_date,
                "unparseable latest action date, skipping package"
            );
            continue;
        };
        if latest_action_date < cutoff {
            stale += package.sponsors.len();
            continue;
        }
        let date_issued = parse_api_date(&bill.date_issued).unwrap_or(latest_action_date);

        for sponsor in &package.sponsors {
            rows.push(EnrichedRow {
                unique_id: unique_id(&sponsor.bioguide_id, &bill.package_id),
                package_id: bill.package_id.clone(),
                bill_number: bill.bill_number.clone(),
                bill_type: bill_type.to_string(),
                title: bill.title.clone(),
                committees: bill.committees.clone(),
                other_title: bill.other_title.clone(),
                latest_action: bill.latest_action.clone(),
                latest_action_date,
                policy_area: bill.policy_area.clone(),
                subjects: bill.subjects.clone(),
                link: bill.link.clone(),
                date_issued,
                full_name: sponsor.full_name.clone(),
                role: sponsor.role,
                party: sponsor.party.clone(),
                state: sponsor.state.clone(),
                sponsor_date: sponsor.sponsor_date.as_deref().and_then(parse_api_date),
                bioguide_id: sponsor.bioguide_id.clone(),
                bio_url: sponsor.bio_url(),
                original_cosponsor: sponsor.original_cosponsor,
                category: None,
                keyword: None,
            });
        }
    }

    if stale > 0 {
        debug!(stale, %cutoff, "rows outside window dropped");
    }
    info!(bill_type, rows = rows.len(), "dataset assembled");
    Dataset::new(rows)
}

/// Keep the first row for each `unique_id`.
pub fn dedupe_unique_ids(dataset: Dataset) -> Dataset {
    let mut seen = HashSet::new();
    let before = dataset.len();
    let rows: Vec<EnrichedRow> = dataset
        .rows
        .into_iter()
        .filter(|row| !row.unique_id.is_empty() && seen.insert(row.unique_id.clone()))
        .collect();

    if rows.len() != before {
        warn!(dropped = before - rows.len(), "duplicate or empty unique ids dropped");
    }
    Dataset::new(rows)
}

/// One representative row per bill for the bills table.
///
/// A bill number already in `seen` (from an earlier bill type or an earlier
/// package in this run) keeps its first occurrence.
pub fn bill_rows<'a>(dataset: &'a Dataset, seen: &mut HashSet<String>) -> Vec<&'a EnrichedRow> {
    let mut out = Vec::new();
    let mut packages = HashSet::new();

    for row in &dataset.rows {
        if !packages.insert(row.package_id.as_str()) {
            continue;
        }
        let key = format!("{}:{}", row.bill_type, row.bill_number);
        if seen.insert(key) {
            out.push(row);
        } else {
            debug!(
                package_id = %row.package_id,
                bill_number = %row.bill_number,
                "bill already collected, skipping"
            );
        }
    }
    out
}
