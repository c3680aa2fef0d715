//! Package detail resolution.
//!
//! Each package needs two requests: the detail JSON behind its
//! `packageLink`, then the bill-status XML named by `related.billStatusLink`.
//! Payloads that lack a required field become [`Resolution::Skipped`]
//! instead of errors, so one bad package never sinks a run.

use billsync_shared::{
    BillRecord, LONG_TEXT_LIMIT, PackageSummary, ResolvedPackage, Result, SponsorRecord,
    SponsorRole, truncate_chars,
};
use futures::StreamExt;
use serde::Deserialize;
use tracing::{debug, info, instrument, warn};

use crate::GovInfoClient;
use crate::status::{BillStatus, StatusMember, parse_bill_status};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireDetail {
    title: Option<String>,
    package_id: Option<String>,
    bill_number: Option<String>,
    download: Option<WireDownload>,
    #[serde(default)]
    committees: Vec<WireCommittee>,
    #[serde(default)]
    short_title: Vec<WireShortTitle>,
    related: Option<WireRelated>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireDownload {
    pdf_link: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireCommittee {
    committee_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireShortTitle {
    title: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireRelated {
    bill_status_link: Option<String>,
}

/// Fields of a detail payload that every resolved package must carry.
struct ValidDetail {
    package_id: String,
    bill_number: String,
    title: String,
    pdf_link: String,
    status_link: String,
    committees: String,
    other_title: String,
}

impl WireDetail {
    /// Check required keys; `Err` holds the name of the first one missing.
    fn validate(self) -> std::result::Result<ValidDetail, &'static str> {
        fn required(
            value: Option<String>,
            key: &'static str,
        ) -> std::result::Result<String, &'static str> {
            value.filter(|v| !v.trim().is_empty()).ok_or(key)
        }

        let committees = self
            .committees
            .into_iter()
            .filter_map(|c| c.committee_name)
            .collect::<Vec<_>>()
            .join(", ");
        let other_title = self
            .short_title
            .into_iter()
            .filter_map(|t| t.title)
            .collect::<Vec<_>>()
            .join(", ");

        Ok(ValidDetail {
            status_link: required(
                self.related.and_then(|r| r.bill_status_link),
                "related.billStatusLink",
            )?,
            package_id: required(self.package_id, "packageId")?,
            bill_number: required(self.bill_number, "billNumber")?,
            title: required(self.title, "title")?,
            pdf_link: required(self.download.and_then(|d| d.pdf_link), "download.pdfLink")?,
            committees: truncate_chars(&committees, LONG_TEXT_LIMIT),
            other_title: truncate_chars(&other_title, LONG_TEXT_LIMIT),
        })
    }
}

/// Result of resolving one package.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Resolved(ResolvedPackage),
    /// The package is left out of this run; `reason` is logged.
    Skipped { package_id: String, reason: String },
}

/// Everything `resolve_all` produced, sorted by package id.
#[derive(Debug, Default)]
pub struct ResolveOutcome {
    pub packages: Vec<ResolvedPackage>,
    /// `(package_id, reason)` for each package left out.
    pub skipped: Vec<(String, String)>,
}

impl GovInfoClient {
    /// Resolve one package into its bill record and sponsor rows.
    ///
    /// Missing keys and malformed status documents come back as
    /// [`Resolution::Skipped`]; transport failures are returned as errors.
    #[instrument(skip_all, fields(package_id = %summary.package_id))]
    pub async fn resolve(&self, summary: &PackageSummary) -> Result<Resolution> {
        let skip = |reason: String| {
            warn!(package_id = %summary.package_id, %reason, "skipping package");
            Ok(Resolution::Skipped {
                package_id: summary.package_id.clone(),
                reason,
            })
        };

        let wire: WireDetail = self.get_json(&summary.package_link, &[]).await?;
        let detail = match wire.validate() {
            Ok(detail) => detail,
            Err(key) => return skip(format!("package detail is missing '{key}'")),
        };

        let xml = self.get_text(&detail.status_link, &[]).await?;
        let status = match parse_bill_status(&xml) {
            Ok(status) => status,
            Err(e) => return skip(e.to_string()),
        };

        debug!(
            bill_number = %detail.bill_number,
            cosponsors = status.cosponsors.len(),
            "package resolved"
        );
        Ok(Resolution::Resolved(build_package(summary, detail, status)))
    }

    /// Resolve `summaries` with at most `concurrency` packages in flight.
    ///
    /// Transport errors are folded into the skipped list. `on_done` is called
    /// after each package with `(completed, total)`. Output order does not
    /// depend on completion order.
    pub async fn resolve_all<F>(
        &self,
        summaries: &[PackageSummary],
        concurrency: usize,
        mut on_done: F,
    ) -> ResolveOutcome
    where
        F: FnMut(usize, usize),
    {
        let total = summaries.len();
        let mut outcome = ResolveOutcome::default();

        let stream = futures::stream::iter(summaries)
            .map(|summary| async move { (summary, self.resolve(summary).await) })
            .buffer_unordered(concurrency.max(1));
        let mut stream = std::pin::pin!(stream);

        let mut completed = 0usize;
        while let Some((summary, result)) = stream.next().await {
            match result {
                Ok(Resolution::Resolved(package)) => outcome.packages.push(package),
                Ok(Resolution::Skipped { package_id, reason }) => {
                    outcome.skipped.push((package_id, reason));
                }
                Err(e) => {
                    warn!(
                        package_id = %summary.package_id,
                        error = %e,
                        "package fetch failed, skipping"
                    );
                    outcome
                        .skipped
                        .push((summary.package_id.clone(), e.to_string()));
                }
            }
            completed += 1;
            on_done(completed, total);
        }

        outcome
            .packages
            .sort_by(|a, b| a.bill.package_id.cmp(&b.bill.package_id));
        outcome.skipped.sort();

        info!(
            resolved = outcome.packages.len(),
            skipped = outcome.skipped.len(),
            "packages resolved"
        );
        outcome
    }
}

fn build_package(
    summary: &PackageSummary,
    detail: ValidDetail,
    status: BillStatus,
) -> ResolvedPackage {
    let bill = BillRecord {
        package_id: detail.package_id,
        bill_number: detail.bill_number,
        title: truncate_chars(&detail.title, LONG_TEXT_LIMIT),
        committees: detail.committees,
        other_title: detail.other_title,
        latest_action: status.latest_action,
        latest_action_date: status.latest_action_date,
        policy_area: status.policy_area,
        subjects: status.subjects,
        link: detail.pdf_link,
        date_issued: summary.date_issued.clone(),
        doc_class: summary.doc_class.clone(),
    };

    let mut sponsors: Vec<SponsorRecord> = status
        .cosponsors
        .into_iter()
        .map(|m| sponsor_record(m, SponsorRole::Cosponsor, None))
        .collect();
    sponsors.push(sponsor_record(
        status.sponsor,
        SponsorRole::Sponsor,
        Some(status.introduced_date),
    ));

    ResolvedPackage { bill, sponsors }
}

/// The primary sponsor is always an original cosponsor dated at introduction.
fn sponsor_record(
    member: StatusMember,
    role: SponsorRole,
    introduced: Option<String>,
) -> SponsorRecord {
    let (sponsor_date, original_cosponsor) = match (role, introduced) {
        (SponsorRole::Sponsor, introduced) => (introduced, true),
        (SponsorRole::Cosponsor, _) => (member.sponsorship_date, member.is_original_cosponsor),
    };
    SponsorRecord {
        full_name: member.full_name,
        role,
        party: member.party,
        state: member.state,
        sponsor_date,
        bioguide_id: member.bioguide_id,
        original_cosponsor,
    }
}
