//! State reference table and the inner join onto sponsor rows.
//!
//! Geometry is carried opaquely; nothing here interprets it.

use std::collections::HashMap;

use billsync_shared::{Dataset, GeoJoinRow};
use billsync_storage::Feature;
use serde_json::Value;
use tracing::{debug, warn};

/// Abbreviation attribute on a states layer.
pub const STATE_ABBR_FIELD: &str = "STATE_ABBR";

/// Name attribute on a states layer.
pub const STATE_NAME_FIELD: &str = "STATE_NAME";

const BUILTIN_STATES: &[(&str, &str)] = &[
    ("AL", "Alabama"),
    ("AK", "Alaska"),
    ("AZ", "Arizona"),
    ("AR", "Arkansas"),
    ("CA", "California"),
    ("CO", "Colorado"),
    ("CT", "Connecticut"),
    ("DE", "Delaware"),
    ("DC", "District of Columbia"),
    ("FL", "Florida"),
    ("GA", "Georgia"),
    ("HI", "Hawaii"),
    ("ID", "Idaho"),
    ("IL", "Illinois"),
    ("IN", "Indiana"),
    ("IA", "Iowa"),
    ("KS", "Kansas"),
    ("KY", "Kentucky"),
    ("LA", "Louisiana"),
    ("ME", "Maine"),
    ("MD", "Maryland"),
    ("MA", "Massachusetts"),
    ("MI", "Michigan"),
    ("MN", "Minnesota"),
    ("MS", "Mississippi"),
    ("MO", "Missouri"),
    ("MT", "Montana"),
    ("NE", "Nebraska"),
    ("NV", "Nevada"),
    ("NH", "New Hampshire"),
    ("NJ", "New Jersey"),
    ("NM", "New Mexico"),
    ("NY", "New York"),
    ("NC", "North Carolina"),
    ("ND", "North Dakota"),
    ("OH", "Ohio"),
    ("OK", "Oklahoma"),
    ("OR", "Oregon"),
    ("PA", "Pennsylvania"),
    ("RI", "Rhode Island"),
    ("SC", "South Carolina"),
    ("SD", "South Dakota"),
    ("TN", "Tennessee"),
    ("TX", "Texas"),
    ("UT", "Utah"),
    ("VT", "Vermont"),
    ("VA", "Virginia"),
    ("WA", "Washington"),
    ("WV", "West Virginia"),
    ("WI", "Wisconsin"),
    ("WY", "Wyoming"),
    ("AS", "American Samoa"),
    ("GU", "Guam"),
    ("MP", "Northern Mariana Islands"),
    ("PR", "Puerto Rico"),
    ("VI", "Virgin Islands"),
];

#[derive(Debug, Clone)]
struct StateEntry {
    name: String,
    geometry: Option<Value>,
}

/// Two-letter abbreviation → state name and optional geometry.
#[derive(Debug, Clone, Default)]
pub struct StateTable {
    by_abbr: HashMap<String, StateEntry>,
}

impl StateTable {
    /// US states, DC and the territories, without geometry.
    pub fn builtin() -> Self {
        let by_abbr = BUILTIN_STATES
            .iter()
            .map(|(abbr, name)| {
                (
                    (*abbr).to_string(),
                    StateEntry {
                        name: (*name).to_string(),
                        geometry: None,
                    },
                )
            })
            .collect();
        Self { by_abbr }
    }

    /// Build from a states layer snapshot.
    pub fn from_features(features: &[Feature]) -> Self {
        let mut by_abbr = HashMap::new();
        for feature in features {
            let (Some(abbr), Some(name)) =
                (feature.key(STATE_ABBR_FIELD), feature.key(STATE_NAME_FIELD))
            else {
                warn!(object_id = ?feature.object_id, "state feature without abbreviation or name");
                continue;
            };
            by_abbr
                .entry(abbr.trim().to_ascii_uppercase())
                .or_insert(StateEntry {
                    name,
                    geometry: feature.geometry.clone(),
                });
        }
        Self { by_abbr }
    }

    pub fn len(&self) -> usize {
        self.by_abbr.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_abbr.is_empty()
    }

    pub fn name(&self, abbr: &str) -> Option<&str> {
        self.by_abbr
            .get(&abbr.trim().to_ascii_uppercase())
            .map(|e| e.name.as_str())
    }

    /// Inner join on the sponsor's state; unmatched rows are dropped.
    pub fn join(&self, dataset: Dataset) -> Vec<GeoJoinRow> {
        let before = dataset.len();
        let joined: Vec<GeoJoinRow> = dataset
            .rows
            .into_iter()
            .filter_map(|row| {
                let entry = self.by_abbr.get(&row.state.trim().to_ascii_uppercase())?;
                Some(GeoJoinRow {
                    state_name: entry.name.clone(),
                    geometry: entry.geometry.clone(),
                    row,
                })
            })
            .collect();

        let dropped = before - joined.len();
        if dropped > 0 {
            debug!(dropped, "rows without a matching state dropped");
        }
        joined
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::row;
    use serde_json::json;

    #[test]
    fn builtin_covers_states_and_territories() {
        let table = StateTable::builtin();
        assert_eq!(table.len(), 56);
        assert_eq!(table.name("ny"), Some("New York"));
        assert_eq!(table.name("PR"), Some("Puerto Rico"));
        assert_eq!(table.name("ZZ"), None);
    }

    #[test]
    fn join_is_inner() {
        let mut unmatched = row("P1", "B", "t");
        unmatched.state = "XX".into();
        let dataset = Dataset::new(vec![row("P1", "A", "t"), unmatched]);

        let joined = StateTable::builtin().join(dataset);
        assert_eq!(joined.len(), 1);
        assert_eq!(joined[0].state_name, "California");
        assert_eq!(joined[0].geometry, None);
    }

    #[test]
    fn from_features_carries_geometry() {
        let Value::Object(attributes) = json!({ "STATE_ABBR": "CA", "STATE_NAME": "California" })
        else {
            unreachable!()
        };
        let Value::Object(bad) = json!({ "STATE_NAME": "Nowhere" }) else {
            unreachable!()
        };
        let features = vec![
            Feature::new(attributes).with_geometry(Some(json!({ "rings": [] }))),
            Feature::new(bad),
        ];

        let table = StateTable::from_features(&features);
        assert_eq!(table.len(), 1);

        let joined = table.join(Dataset::new(vec![row("P1", "A", "t")]));
        assert_eq!(joined[0].geometry, Some(json!({ "rings": [] })));
    }
}
