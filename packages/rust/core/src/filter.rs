//! Keyword/category filter over bill titles.

use std::collections::HashMap;

use billsync_shared::{
    BillSyncError, Dataset, FilterConfig, KEYWORD_TITLE_LIMIT, Result, truncate_chars,
};
use regex::{Regex, RegexBuilder};
use tracing::{info, warn};

struct Rule {
    category: String,
    keyword: String,
    pattern: Regex,
}

/// Case-insensitive substring matcher built from `[filter]` config.
///
/// Rules are tried in configured order (categories, then keywords within a
/// category) and the first hit tags the package.
pub struct KeywordFilter {
    rules: Vec<Rule>,
}

impl KeywordFilter {
    /// `None` when filtering is disabled.
    pub fn from_config(config: &FilterConfig) -> Result<Option<Self>> {
        if !config.enabled {
            return Ok(None);
        }

        let mut rules = Vec::new();
        for category in &config.categories {
            for keyword in category.keywords.iter().filter(|k| !k.trim().is_empty()) {
                let pattern = RegexBuilder::new(&regex::escape(keyword.trim()))
                    .case_insensitive(true)
                    .build()
                    .map_err(|e| {
                        BillSyncError::validation(format!("bad keyword '{keyword}': {e}"))
                    })?;
                rules.push(Rule {
                    category: category.name.clone(),
                    keyword: keyword.trim().to_string(),
                    pattern,
                });
            }
        }

        if rules.is_empty() {
            return Err(BillSyncError::config(
                "filter is enabled but no keywords are configured",
            ));
        }
        Ok(Some(Self { rules }))
    }

    /// First `(category, keyword)` matching `title`.
    pub fn matches(&self, title: &str) -> Option<(&str, &str)> {
        self.rules
            .iter()
            .find(|rule| rule.pattern.is_match(title))
            .map(|rule| (rule.category.as_str(), rule.keyword.as_str()))
    }

    /// Keep rows of packages whose title matches, tagged with the match.
    ///
    /// Packages with a blank title are dropped with a warning. Surviving
    /// titles are cut to the keyword-stage limit.
    pub fn apply(&self, dataset: Dataset) -> Dataset {
        let mut verdicts: HashMap<String, Option<(String, String)>> = HashMap::new();
        let before = dataset.package_ids().len();

        let rows: Vec<_> = dataset
            .rows
            .into_iter()
            .filter_map(|mut row| {
                let verdict = verdicts.entry(row.package_id.clone()).or_insert_with(|| {
                    if row.title.trim().is_empty() {
                        warn!(package_id = %row.package_id, "package has no title, dropping");
                        return None;
                    }
                    self.matches(&row.title)
                        .map(|(c, k)| (c.to_string(), k.to_string()))
                });
                let (category, keyword) = verdict.clone()?;
                row.title = truncate_chars(&row.title, KEYWORD_TITLE_LIMIT);
                row.category = Some(category);
                row.keyword = Some(keyword);
                Some(row)
            })
            .collect();

        let kept = Dataset::new(rows);
        info!(
            packages_in = before,
            packages_kept = kept.package_ids().len(),
            rows = kept.len(),
            "keyword filter applied"
        );
        kept
    }
}
