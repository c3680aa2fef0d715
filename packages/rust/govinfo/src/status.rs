//! Bill-status document parser.
//!
//! Only these paths are read, relative to `billStatus > bill`:
//! - `introducedDate`
//! - `sponsors > item` (first item is the primary sponsor)
//! - `cosponsors > item`
//! - `subjects > billSubjects > legislativeSubjects > item`, or the newer
//!   `subjects > legislativeSubjects > item`
//! - `policyArea` (used only when it has exactly one child element)
//! - `latestAction > text` and `latestAction > actionDate`
//!
//! A document that does not match fails closed with a parse error; the
//! resolver turns that into a skipped package.

use billsync_shared::{BillSyncError, LONG_TEXT_LIMIT, Result, truncate_chars};
use roxmltree::{Document, Node};

/// A member entry under `sponsors` or `cosponsors`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusMember {
    pub bioguide_id: String,
    pub full_name: String,
    pub party: String,
    pub state: String,
    pub sponsorship_date: Option<String>,
    pub is_original_cosponsor: bool,
}

/// The fields of a bill-status document the pipeline uses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BillStatus {
    pub introduced_date: String,
    pub sponsor: StatusMember,
    pub cosponsors: Vec<StatusMember>,
    /// Legislative subject names joined with `", "`, capped at 999 chars.
    pub subjects: String,
    pub policy_area: Option<String>,
    pub latest_action: String,
    pub latest_action_date: String,
}

/// Parse a bill-status XML document.
pub fn parse_bill_status(xml: &str) -> Result<BillStatus> {
    let doc = Document::parse(xml)
        .map_err(|e| BillSyncError::parse(format!("bill status is not valid XML: {e}")))?;

    let root = doc.root_element();
    let bill = if root.has_tag_name("bill") {
        root
    } else {
        child(root, "bill").ok_or_else(|| missing("billStatus > bill"))?
    };

    let introduced_date =
        child_text(bill, "introducedDate").ok_or_else(|| missing("bill > introducedDate"))?;

    let sponsor = child(bill, "sponsors")
        .and_then(|s| child(s, "item"))
        .and_then(parse_member)
        .ok_or_else(|| missing("bill > sponsors > item > bioguideId"))?;

    let cosponsors = child(bill, "cosponsors")
        .map(|c| {
            c.children()
                .filter(|n| n.has_tag_name("item"))
                .filter_map(parse_member)
                .collect()
        })
        .unwrap_or_default();

    let latest = child(bill, "latestAction").ok_or_else(|| missing("bill > latestAction"))?;
    let latest_action = child(latest, "text")
        .map(descendant_text)
        .ok_or_else(|| missing("bill > latestAction > text"))?;
    let latest_action_date = child_text(latest, "actionDate")
        .ok_or_else(|| missing("bill > latestAction > actionDate"))?;

    Ok(BillStatus {
        introduced_date,
        sponsor,
        cosponsors,
        subjects: parse_subjects(bill),
        policy_area: parse_policy_area(bill),
        latest_action,
        latest_action_date,
    })
}

fn missing(path: &str) -> BillSyncError {
    BillSyncError::parse(format!("bill status is missing {path}"))
}

/// First direct child element named `name`.
fn child<'a, 'input>(node: Node<'a, 'input>, name: &str) -> Option<Node<'a, 'input>> {
    node.children().find(|n| n.has_tag_name(name))
}

/// Trimmed, non-empty text of the direct child `name`.
fn child_text(node: Node<'_, '_>, name: &str) -> Option<String> {
    child(node, name)
        .and_then(|n| n.text())
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}

/// All text beneath `node`, trimmed. Action text may carry inline markup.
fn descendant_text(node: Node<'_, '_>) -> String {
    node.descendants()
        .filter(Node::is_text)
        .filter_map(|n| n.text())
        .collect::<String>()
        .trim()
        .to_string()
}

/// A member item; `None` when it has no bioguide id to key on.
fn parse_member(item: Node<'_, '_>) -> Option<StatusMember> {
    let bioguide_id = child_text(item, "bioguideId")?;
    Some(StatusMember {
        bioguide_id,
        full_name: child_text(item, "fullName").unwrap_or_default(),
        party: child_text(item, "party").unwrap_or_default(),
        state: child_text(item, "state").unwrap_or_default(),
        sponsorship_date: child_text(item, "sponsorshipDate"),
        is_original_cosponsor: child_text(item, "isOriginalCosponsor")
            .is_some_and(|v| v.eq_ignore_ascii_case("true") || v == "1"),
    })
}

fn parse_subjects(bill: Node<'_, '_>) -> String {
    let Some(subjects) = child(bill, "subjects") else {
        return String::new();
    };
    let legislative = child(subjects, "billSubjects")
        .and_then(|b| child(b, "legislativeSubjects"))
        .or_else(|| child(subjects, "legislativeSubjects"));
    let Some(legislative) = legislative else {
        return String::new();
    };

    let names: Vec<String> = legislative
        .children()
        .filter(|n| n.has_tag_name("item"))
        .filter_map(|item| item.first_element_child())
        .filter_map(|leaf| leaf.text().map(|t| t.trim().to_string()))
        .filter(|t| !t.is_empty())
        .collect();

    truncate_chars(&names.join(", "), LONG_TEXT_LIMIT)
}

/// The single policy-area leaf; several children are ambiguous and yield `None`.
fn parse_policy_area(bill: Node<'_, '_>) -> Option<String> {
    let policy = child(bill, "policyArea")?;
    let mut leaves = policy.children().filter(Node::is_element);
    let only = leaves.next()?;
    if leaves.next().is_some() {
        return None;
    }
    only.text()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::fixture;

    #[test]
    fn parses_fixture_document() {
        let status = parse_bill_status(&fixture("xml/bill_status.xml")).unwrap();

        assert_eq!(status.introduced_date, "2024-02-27");
        assert_eq!(status.sponsor.bioguide_id, "S000148");
        assert_eq!(status.sponsor.state, "NY");
        assert_eq!(status.cosponsors.len(), 2);
        assert!(status.cosponsors[0].is_original_cosponsor);
        assert!(!status.cosponsors[1].is_original_cosponsor);
        assert_eq!(
            status.cosponsors[1].sponsorship_date.as_deref(),
            Some("2024-03-01")
        );
        assert_eq!(status.subjects, "Solar energy, Wind energy, Energy storage");
        assert_eq!(status.policy_area.as_deref(), Some("Energy"));
        assert_eq!(status.latest_action_date, "2024-03-02");
        assert!(status.latest_action.starts_with("Read twice and referred"));
    }

    #[test]
    fn newer_subject_layout_is_accepted() {
        let xml = r#"<billStatus><bill>
            <introducedDate>2024-01-10</introducedDate>
            <sponsors><item><bioguideId>A000001</bioguideId><state>CA</state></item></sponsors>
            <subjects><legislativeSubjects>
                <item><name>Water quality</name></item>
                <item><name>Wetlands</name></item>
            </legislativeSubjects></subjects>
            <latestAction><actionDate>2024-01-11</actionDate><text>Introduced.</text></latestAction>
        </bill></billStatus>"#;

        let status = parse_bill_status(xml).unwrap();
        assert_eq!(status.subjects, "Water quality, Wetlands");
        assert!(status.cosponsors.is_empty());
        assert_eq!(status.policy_area, None);
    }

    #[test]
    fn ambiguous_policy_area_resolves_to_none() {
        let xml = r#"<billStatus><bill>
            <introducedDate>2024-01-10</introducedDate>
            <sponsors><item><bioguideId>A000001</bioguideId></item></sponsors>
            <policyArea><name>Energy</name><name>Health</name></policyArea>
            <latestAction><actionDate>2024-01-11</actionDate><text>Introduced.</text></latestAction>
        </bill></billStatus>"#;

        let status = parse_bill_status(xml).unwrap();
        assert_eq!(status.policy_area, None);
    }

    #[test]
    fn subjects_are_capped_at_long_text_limit() {
        let items: String = (0..400)
            .map(|i| format!("<item><name>Subject number {i}</name></item>"))
            .collect();
        let xml = format!(
            r#"<billStatus><bill>
            <introducedDate>2024-01-10</introducedDate>
            <sponsors><item><bioguideId>A000001</bioguideId></item></sponsors>
            <subjects><billSubjects><legislativeSubjects>{items}</legislativeSubjects></billSubjects></subjects>
            <latestAction><actionDate>2024-01-11</actionDate><text>Introduced.</text></latestAction>
        </bill></billStatus>"#
        );

        let status = parse_bill_status(&xml).unwrap();
        assert_eq!(status.subjects.chars().count(), LONG_TEXT_LIMIT);
    }

    #[test]
    fn missing_sponsor_fails_closed() {
        let xml = r#"<billStatus><bill>
            <introducedDate>2024-01-10</introducedDate>
            <latestAction><actionDate>2024-01-11</actionDate><text>Introduced.</text></latestAction>
        </bill></billStatus>"#;

        let err = parse_bill_status(xml).unwrap_err();
        assert!(err.to_string().contains("sponsors"));
    }

    #[test]
    fn missing_latest_action_fails_closed() {
        let xml = r#"<billStatus><bill>
            <introducedDate>2024-01-10</introducedDate>
            <sponsors><item><bioguideId>A000001</bioguideId></item></sponsors>
        </bill></billStatus>"#;

        assert!(parse_bill_status(xml).is_err());
    }

    #[test]
    fn deeply_nested_bill_is_not_searched_for() {
        let xml = r#"<wrapper><other><bill>
            <introducedDate>2024-01-10</introducedDate>
        </bill></other></wrapper>"#;

        let err = parse_bill_status(xml).unwrap_err();
        assert!(err.to_string().contains("billStatus > bill"));
    }

    #[test]
    fn malformed_xml_is_a_parse_error() {
        let err = parse_bill_status("<billStatus><bill>").unwrap_err();
        assert!(matches!(err, BillSyncError::Parse { .. }));
    }

    #[test]
    fn cosponsor_without_bioguide_id_is_dropped() {
        let xml = r#"<billStatus><bill>
            <introducedDate>2024-01-10</introducedDate>
            <sponsors><item><bioguideId>A000001</bioguideId></item></sponsors>
            <cosponsors>
                <item><fullName>No Id</fullName></item>
                <item><bioguideId>B000002</bioguideId><isOriginalCosponsor>True</isOriginalCosponsor></item>
            </cosponsors>
            <latestAction><actionDate>2024-01-11</actionDate><text>Introduced.</text></latestAction>
        </bill></billStatus>"#;

        let status = parse_bill_status(xml).unwrap();
        assert_eq!(status.cosponsors.len(), 1);
        assert_eq!(status.cosponsors[0].bioguide_id, "B000002");
    }
}
