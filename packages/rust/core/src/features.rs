//! Conversion of assembled rows into store features.
//!
//! Dates go out as epoch milliseconds at UTC midnight. Every feature carries
//! a `row_hash` over its other attributes so reconciliation can tell an
//! unchanged row from a changed one without comparing field by field.

use billsync_shared::{EnrichedRow, GeoJoinRow, date_to_epoch_millis};
use billsync_storage::{Attributes, Feature};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Reconciliation key of the members layer.
pub const MEMBER_KEY_FIELD: &str = "unique_id";

/// Reconciliation key of the bills table.
pub const BILL_KEY_FIELD: &str = "package_id";

/// Fingerprint attribute written with every feature.
pub const ROW_HASH_FIELD: &str = "row_hash";

fn text(value: &str) -> Value {
    Value::String(value.to_string())
}

fn optional(value: Option<&str>) -> Value {
    value.map_or(Value::Null, text)
}

fn bill_attributes(row: &EnrichedRow) -> Attributes {
    let mut a = Attributes::new();
    a.insert("package_id".into(), text(&row.package_id));
    a.insert("bill_number".into(), text(&row.bill_number));
    a.insert("bill_type".into(), text(&row.bill_type));
    a.insert("title".into(), text(&row.title));
    a.insert("committees".into(), text(&row.committees));
    a.insert("other_title".into(), text(&row.other_title));
    a.insert("latest_action".into(), text(&row.latest_action));
    a.insert(
        "latest_action_date".into(),
        date_to_epoch_millis(row.latest_action_date).into(),
    );
    a.insert("policy_area".into(), optional(row.policy_area.as_deref()));
    a.insert("subjects".into(), text(&row.subjects));
    a.insert("link".into(), text(&row.link));
    a.insert("date_issued".into(), date_to_epoch_millis(row.date_issued).into());
    a.insert("category".into(), optional(row.category.as_deref()));
    a.insert("keyword".into(), optional(row.keyword.as_deref()));
    a
}

/// Hex SHA-256 of the attributes, excluding any existing hash.
pub fn row_hash(attributes: &Attributes) -> String {
    let mut hasher = Sha256::new();
    for (field, value) in attributes {
        if field == ROW_HASH_FIELD {
            continue;
        }
        hasher.update(field.as_bytes());
        hasher.update([0u8]);
        hasher.update(value.to_string().as_bytes());
        hasher.update([0u8]);
    }
    format!("{:x}", hasher.finalize())
}

fn with_hash(mut attributes: Attributes) -> Attributes {
    let hash = row_hash(&attributes);
    attributes.insert(ROW_HASH_FIELD.into(), Value::String(hash));
    attributes
}

/// A sponsor row for the members layer.
pub fn member_feature(joined: &GeoJoinRow) -> Feature {
    let row = &joined.row;
    let mut a = bill_attributes(row);
    a.insert(MEMBER_KEY_FIELD.into(), text(&row.unique_id));
    a.insert("full_name".into(), text(&row.full_name));
    a.insert("role".into(), text(row.role.as_str()));
    a.insert("party".into(), text(&row.party));
    a.insert("state".into(), text(&row.state));
    a.insert("state_name".into(), text(&joined.state_name));
    a.insert(
        "sponsor_date".into(),
        row.sponsor_date
            .map_or(Value::Null, |d| date_to_epoch_millis(d).into()),
    );
    a.insert("bioguide_id".into(), text(&row.bioguide_id));
    a.insert("bio_url".into(), text(&row.bio_url));
    a.insert(
        "original_cosponsor".into(),
        text(if row.original_cosponsor { "True" } else { "False" }),
    );

    Feature::new(with_hash(a)).with_geometry(joined.geometry.clone())
}

/// A bill-level row for the bills table.
pub fn bill_feature(row: &EnrichedRow) -> Feature {
    Feature::new(with_hash(bill_attributes(row)))
}
