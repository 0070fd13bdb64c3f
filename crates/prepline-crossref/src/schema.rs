//! Arrow schema of a harvested preprint row
//!
//! One wide, flat table: scalar fields as columns, nested Crossref values as
//! JSON text (sorted keys) in the `*_json` columns.

use std::sync::{Arc, LazyLock};

use arrow::datatypes::{DataType, Field, Schema, SchemaRef};

fn text(name: &str) -> Field {
    Field::new(name, DataType::Utf8, true)
}

/// crossref_preprints_*.parquet
pub fn preprints() -> &'static SchemaRef {
    static SCHEMA: LazyLock<SchemaRef> = LazyLock::new(|| {
        Arc::new(Schema::new(vec![
            // Identifiers
            Field::new("doi", DataType::Utf8, false),
            text("url"),
            text("primary_url"),
            // Titles and classification
            text("title"),
            text("original_title"),
            text("short_title"),
            text("subtitle"),
            text("type"),
            text("subtype"),
            text("prefix"),
            text("publisher"),
            text("container_title"),
            text("short_container_title"),
            text("institution_name"),
            // Dates, YYYY-MM-DD with missing parts defaulting to 01
            text("created_date"),
            text("posted_date"),
            text("deposited_date"),
            text("indexed_date"),
            text("issued_date"),
            text("published_online_date"),
            text("published_print_date"),
            text("accepted_date"),
            text("approved_date"),
            // People
            text("authors"), // "Given Family; ..."
            text("authors_json"),
            text("editors_json"),
            text("translators_json"),
            text("chairs_json"),
            text("contributors_json"),
            // Licensing and links
            text("license_url"),
            text("licenses_json"),
            text("links_json"),
            text("subjects"),
            text("subjects_json"),
            text("language"),
            text("issn_json"),
            text("issn_type_json"),
            text("isbn_type_json"),
            text("alternative_id_json"),
            text("funder_json"),
            // Citations
            Field::new("reference_count", DataType::Int64, true),
            Field::new("is_referenced_by_count", DataType::Int64, true),
            text("references_json"),
            // Relations, "; "-joined sorted DOIs
            text("is_preprint_of"),
            text("has_preprint"),
            text("is_version_of"),
            text("relation_json"),
            // Updates
            text("update_type"),
            text("update_policy"),
            text("update_to_json"),
            text("archive_json"),
            text("content_domain_json"),
            text("assertion_json"),
            text("institution_json"),
            text("group_title"),
            text("member"),
            text("source"),
            Field::new("score", DataType::Float64, true),
            text("abstract_raw"),
        ]))
    });
    &SCHEMA
}
