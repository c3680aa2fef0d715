//! Cursor-following collection fetcher.
//!
//! The first request carries the congress, doc class and page size; each
//! response names the next page as a complete URL, which only needs the API
//! key added. Paging stops when the response has no `nextPage`.

use std::collections::HashSet;

use billsync_shared::{BillSyncError, PackageSummary, Result, TimeWindow};
use serde::Deserialize;
use tracing::{info, instrument, warn};

use crate::GovInfoClient;

/// One page of a collection listing as returned by the API.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CollectionPage {
    #[serde(default)]
    packages: Option<Vec<WirePackage>>,
    #[serde(default)]
    next_page: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WirePackage {
    package_id: Option<String>,
    title: Option<String>,
    date_issued: Option<String>,
    package_link: Option<String>,
    doc_class: Option<String>,
    last_modified: Option<String>,
}

impl WirePackage {
    /// Validate into a [`PackageSummary`]; `None` when id or link is missing.
    fn into_summary(self, fallback_doc_class: &str) -> Option<PackageSummary> {
        let package_id = self.package_id.filter(|s| !s.is_empty())?;
        let package_link = self.package_link.filter(|s| !s.is_empty())?;
        Some(PackageSummary {
            package_id,
            title: self.title,
            date_issued: self.date_issued.unwrap_or_default(),
            package_link,
            doc_class: self
                .doc_class
                .unwrap_or_else(|| fallback_doc_class.to_string()),
            last_modified: self.last_modified,
        })
    }
}

impl GovInfoClient {
    /// Fetch every package of `doc_class` modified since the window start.
    ///
    /// Any transport or decode failure aborts the whole class; callers treat
    /// that as zero results for the class and carry on with the others.
    #[instrument(skip_all, fields(doc_class = %doc_class, since = %window.query_param()))]
    pub async fn fetch_collection(
        &self,
        doc_class: &str,
        window: &TimeWindow,
    ) -> Result<Vec<PackageSummary>> {
        let first_url = format!(
            "{}/{}/{}",
            self.opts.base_url.trim_end_matches('/'),
            self.opts.collection,
            window.query_param()
        );
        let query = [
            ("congress", self.opts.congress.to_string()),
            ("docClass", doc_class.to_string()),
            ("pageSize", self.opts.page_size.to_string()),
            ("offset", "0".to_string()),
        ];

        let mut page: CollectionPage = self.get_json(&first_url, &query).await?;
        let mut packages = Vec::new();
        let mut seen_cursors = HashSet::new();
        let mut pages = 1usize;

        loop {
            for wire in page.packages.take().unwrap_or_default() {
                match wire.into_summary(doc_class) {
                    Some(summary) => packages.push(summary),
                    None => warn!("collection entry without packageId/packageLink, skipping"),
                }
            }

            let Some(next) = page.next_page.take().filter(|n| !n.trim().is_empty()) else {
                break;
            };

            url::Url::parse(&next).map_err(|e| {
                BillSyncError::parse(format!("nextPage '{next}' is not a URL: {e}"))
            })?;

            if !seen_cursors.insert(next.clone()) {
                return Err(BillSyncError::parse(format!(
                    "nextPage cursor repeated: {next}"
                )));
            }

            page = self.get_json(&next, &[]).await?;
            pages += 1;
        }

        info!(found = packages.len(), pages, "collection fetched");
        Ok(packages)
    }
}
