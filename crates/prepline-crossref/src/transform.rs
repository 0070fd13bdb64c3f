//! Crossref work JSON → wide flat row

use serde_json::Value;

use crate::row::FlatRow;

/// Columns in the preprints schema
const COLUMN_COUNT: usize = 59;

/// `{"date-parts": [[y, m, d]]}` → `YYYY-MM-DD`; month/day default to 01
fn date_from_parts(v: Option<&Value>) -> Option<String> {
    let parts = v?.get("date-parts")?.get(0)?.as_array()?;
    let year = parts.first()?.as_i64()?;
    let month = parts.get(1).and_then(Value::as_i64).unwrap_or(1);
    let day = parts.get(2).and_then(Value::as_i64).unwrap_or(1);
    Some(format!("{year:04}-{month:02}-{day:02}"))
}

/// First element of an array, or `key` of that element when it is an object
fn first(v: Option<&Value>, key: Option<&str>) -> Option<String> {
    let head = v?.as_array()?.first()?;
    let target = match key {
        Some(k) => head.get(k)?,
        None => head,
    };
    scalar_text(target)
}

fn scalar_text(v: &Value) -> Option<String> {
    match v {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        other => Some(other.to_string()),
    }
}

/// Nested value as JSON text. serde_json maps are ordered by key, so the
/// output is stable across runs.
fn json_text(v: Option<&Value>) -> Option<String> {
    match v? {
        Value::Null => None,
        other => serde_json::to_string(other).ok(),
    }
}

fn str_field(m: &Value, key: &str) -> Option<String> {
    m.get(key).and_then(scalar_text)
}

/// "Given Family; ..." falling back to `name`/`literal` per author
fn join_authors(v: Option<&Value>) -> Option<String> {
    let names: Vec<String> = v?
        .as_array()?
        .iter()
        .filter_map(|a| {
            let given = a.get("given").and_then(Value::as_str).unwrap_or("");
            let family = a.get("family").and_then(Value::as_str).unwrap_or("");
            let joined = [given, family]
                .iter()
                .filter(|s| !s.is_empty())
                .copied()
                .collect::<Vec<_>>()
                .join(" ");
            let name = joined.trim();
            if name.is_empty() {
                a.get("name")
                    .or_else(|| a.get("literal"))
                    .and_then(Value::as_str)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
            } else {
                Some(name.to_string())
            }
        })
        .collect();
    (!names.is_empty()).then(|| names.join("; "))
}

/// DOIs of one relation kind, `https://doi.org/` stripped, sorted, deduplicated
fn relation_dois(rel: Option<&Value>, kind: &str) -> Option<String> {
    let items = rel?.get(kind)?.as_array()?;
    let mut dois: Vec<String> = items
        .iter()
        .filter_map(|it| it.get("id").and_then(Value::as_str))
        .map(strip_doi_url)
        .filter(|d| !d.is_empty())
        .map(String::from)
        .collect();
    dois.sort();
    dois.dedup();
    (!dois.is_empty()).then(|| dois.join("; "))
}

fn strip_doi_url(id: &str) -> &str {
    const PREFIX: &str = "https://doi.org/";
    match id.get(..PREFIX.len()) {
        Some(head) if head.eq_ignore_ascii_case(PREFIX) => &id[PREFIX.len()..],
        _ => id,
    }
}

fn subjects(v: Option<&Value>) -> Option<String> {
    let list: Vec<&str> = v?.as_array()?.iter().filter_map(Value::as_str).collect();
    (!list.is_empty()).then(|| list.join("; "))
}

/// Flatten one Crossref work into a row of the preprints schema.
///
/// `None` when the value is not an object or carries no DOI.
pub fn work_to_row(m: &Value) -> Option<FlatRow> {
    if !m.is_object() {
        return None;
    }
    let doi = m
        .get("DOI")
        .and_then(Value::as_str)
        .filter(|d| !d.is_empty())?
        .to_string();
    let relation = m.get("relation").filter(|r| r.is_object());
    let contributors = m
        .get("container-contributor")
        .filter(|v| !is_empty_value(v))
        .or_else(|| m.get("contributor"));

    let mut row = FlatRow::with_capacity(COLUMN_COUNT);
    row.push("doi", Some(doi));
    row.push("url", str_field(m, "URL"));
    row.push(
        "primary_url",
        m.pointer("/resource/primary/URL").and_then(scalar_text),
    );
    row.push("title", first(m.get("title"), None));
    row.push("original_title", first(m.get("original-title"), None));
    row.push("short_title", first(m.get("short-title"), None));
    row.push("subtitle", first(m.get("subtitle"), None));
    row.push("type", str_field(m, "type"));
    row.push("subtype", str_field(m, "subtype"));
    row.push("prefix", str_field(m, "prefix"));
    row.push("publisher", str_field(m, "publisher"));
    row.push("container_title", first(m.get("container-title"), None));
    row.push(
        "short_container_title",
        first(m.get("short-container-title"), None),
    );
    row.push("institution_name", first(m.get("institution"), Some("name")));

    row.push("created_date", date_from_parts(m.get("created")));
    row.push("posted_date", date_from_parts(m.get("posted")));
    row.push("deposited_date", date_from_parts(m.get("deposited")));
    row.push("indexed_date", date_from_parts(m.get("indexed")));
    row.push("issued_date", date_from_parts(m.get("issued")));
    row.push(
        "published_online_date",
        date_from_parts(m.get("published-online")),
    );
    row.push(
        "published_print_date",
        date_from_parts(m.get("published-print")),
    );
    row.push("accepted_date", date_from_parts(m.get("accepted")));
    row.push("approved_date", date_from_parts(m.get("approved")));

    row.push("authors", join_authors(m.get("author")));
    row.push("authors_json", json_text(m.get("author")));
    row.push("editors_json", json_text(m.get("editor")));
    row.push("translators_json", json_text(m.get("translator")));
    row.push("chairs_json", json_text(m.get("chair")));
    row.push("contributors_json", json_text(contributors));

    row.push("license_url", first(m.get("license"), Some("URL")));
    row.push("licenses_json", json_text(m.get("license")));
    row.push("links_json", json_text(m.get("link")));
    row.push("subjects", subjects(m.get("subject")));
    row.push("subjects_json", json_text(m.get("subject")));
    row.push("language", str_field(m, "language"));
    row.push("issn_json", json_text(m.get("ISSN")));
    row.push("issn_type_json", json_text(m.get("issn-type")));
    row.push("isbn_type_json", json_text(m.get("isbn-type")));
    row.push("alternative_id_json", json_text(m.get("alternative-id")));
    row.push("funder_json", json_text(m.get("funder")));

    row.push(
        "reference_count",
        m.get("reference-count").and_then(Value::as_i64),
    );
    row.push(
        "is_referenced_by_count",
        m.get("is-referenced-by-count").and_then(Value::as_i64),
    );
    row.push("references_json", json_text(m.get("reference")));

    row.push("is_preprint_of", relation_dois(relation, "is-preprint-of"));
    row.push("has_preprint", relation_dois(relation, "has-preprint"));
    row.push("is_version_of", relation_dois(relation, "is-version-of"));
    row.push("relation_json", json_text(m.get("relation")));

    row.push("update_type", first(m.get("update-to"), Some("type")));
    row.push("update_policy", str_field(m, "update-policy"));
    row.push("update_to_json", json_text(m.get("update-to")));
    row.push("archive_json", json_text(m.get("archive")));
    row.push("content_domain_json", json_text(m.get("content-domain")));
    row.push("assertion_json", json_text(m.get("assertion")));
    row.push("institution_json", json_text(m.get("institution")));
    row.push("group_title", str_field(m, "group-title"));
    row.push("member", str_field(m, "member"));
    row.push("source", str_field(m, "source"));
    row.push("score", m.get("score").and_then(Value::as_f64));
    row.push("abstract_raw", str_field(m, "abstract"));

    Some(row)
}

fn is_empty_value(v: &Value) -> bool {
    match v {
        Value::Null => true,
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    use crate::row::{Cell, RowAccumulator};
    use crate::schema;

    fn sample() -> Value {
        json!({
            "DOI": "10.1101/2024.03.04.583123",
            "URL": "https://doi.org/10.1101/2024.03.04.583123",
            "resource": {"primary": {"URL": "https://www.biorxiv.org/content/10.1101/2024.03.04.583123v1"}},
            "title": ["Cell atlas of something"],
            "type": "posted-content",
            "subtype": "preprint",
            "prefix": "10.1101",
            "publisher": "Cold Spring Harbor Laboratory",
            "institution": [{"name": "bioRxiv"}],
            "created": {"date-parts": [[2024, 3, 6]]},
            "posted": {"date-parts": [[2024, 3, 4]]},
            "deposited": {"date-parts": [[2024, 3]]},
            "indexed": {"date-parts": [[2024]]},
            "author": [
                {"given": "Ada", "family": "Lovelace", "sequence": "first"},
                {"family": "Babbage"},
                {"name": "The Consortium"}
            ],
            "relation": {
                "is-preprint-of": [
                    {"id": "https://doi.org/10.1038/B", "id-type": "doi"},
                    {"id": "10.1038/A", "id-type": "doi"},
                    {"id": "https://doi.org/10.1038/B", "id-type": "doi"}
                ]
            },
            "license": [{"URL": "http://creativecommons.org/licenses/by/4.0/", "content-version": "vor"}],
            "subject": ["Genomics", "Bioinformatics"],
            "reference-count": 42,
            "is-referenced-by-count": 0,
            "member": "246",
            "score": 1.0,
            "abstract": "<jats:p>Text</jats:p>"
        })
    }

    fn text(row: &FlatRow, col: &str) -> Option<String> {
        row.get(col).and_then(Cell::as_str).map(String::from)
    }

    #[test]
    fn row_has_every_schema_column_in_order() {
        let row = work_to_row(&sample()).unwrap();
        let names: Vec<&str> = row.iter().map(|(n, _)| n).collect();
        let expected: Vec<&str> = schema::preprints()
            .fields()
            .iter()
            .map(|f| f.name().as_str())
            .collect();
        assert_eq!(names, expected);
        assert_eq!(row.len(), COLUMN_COUNT);
    }

    #[test]
    fn identifiers_and_titles() {
        let row = work_to_row(&sample()).unwrap();
        assert_eq!(row.doi(), Some("10.1101/2024.03.04.583123"));
        assert_eq!(text(&row, "title").as_deref(), Some("Cell atlas of something"));
        assert_eq!(text(&row, "institution_name").as_deref(), Some("bioRxiv"));
        assert!(text(&row, "primary_url").unwrap().contains("biorxiv"));
        assert!(text(&row, "subtitle").is_none());
    }

    #[test]
    fn partial_dates_padded() {
        let row = work_to_row(&sample()).unwrap();
        assert_eq!(text(&row, "posted_date").as_deref(), Some("2024-03-04"));
        assert_eq!(text(&row, "deposited_date").as_deref(), Some("2024-03-01"));
        assert_eq!(text(&row, "indexed_date").as_deref(), Some("2024-01-01"));
        assert!(text(&row, "accepted_date").is_none());
    }

    #[test]
    fn authors_joined() {
        let row = work_to_row(&sample()).unwrap();
        assert_eq!(
            text(&row, "authors").as_deref(),
            Some("Ada Lovelace; Babbage; The Consortium")
        );
        // Sorted keys in JSON text
        assert!(text(&row, "authors_json")
            .unwrap()
            .starts_with(r#"[{"family":"Lovelace","given":"Ada""#));
    }

    #[test]
    fn relations_stripped_sorted_deduped() {
        let row = work_to_row(&sample()).unwrap();
        assert_eq!(
            text(&row, "is_preprint_of").as_deref(),
            Some("10.1038/A; 10.1038/B")
        );
        assert!(text(&row, "has_preprint").is_none());
    }

    #[test]
    fn counts_and_score_typed() {
        let row = work_to_row(&sample()).unwrap();
        assert_eq!(row.get("reference_count"), Some(&Cell::Int(42)));
        assert_eq!(row.get("is_referenced_by_count"), Some(&Cell::Int(0)));
        assert_eq!(row.get("score"), Some(&Cell::Float(1.0)));
        assert_eq!(text(&row, "member").as_deref(), Some("246"));
        assert_eq!(text(&row, "subjects").as_deref(), Some("Genomics; Bioinformatics"));
        assert_eq!(
            text(&row, "license_url").as_deref(),
            Some("http://creativecommons.org/licenses/by/4.0/")
        );
    }

    #[test]
    fn numeric_member_becomes_text() {
        let row = work_to_row(&json!({"DOI": "10.1/x", "member": 78})).unwrap();
        assert_eq!(text(&row, "member").as_deref(), Some("78"));
    }

    #[test]
    fn missing_doi_rejected() {
        assert!(work_to_row(&json!({"title": ["no doi"]})).is_none());
        assert!(work_to_row(&json!({"DOI": ""})).is_none());
        assert!(work_to_row(&json!(["not", "an", "object"])).is_none());
    }

    #[test]
    fn minimal_work_accumulates() {
        let row = work_to_row(&json!({"DOI": "10.1/min"})).unwrap();
        let mut acc = RowAccumulator::new(schema::preprints().clone()).unwrap();
        acc.push(&row);
        let batch = acc.take_batch().unwrap();
        assert_eq!(batch.num_rows(), 1);
        assert_eq!(batch.num_columns(), 59);
    }

    #[test]
    fn doi_url_prefix_case_insensitive() {
        assert_eq!(strip_doi_url("HTTPS://DOI.ORG/10.1/x"), "10.1/x");
        assert_eq!(strip_doi_url("10.1/x"), "10.1/x");
    }
}
