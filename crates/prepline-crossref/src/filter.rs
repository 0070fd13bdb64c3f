//! Crossref `filter=` query parameter

use crate::window::TimeWindow;

/// Ordered list of `name:value` clauses, immutable once built
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter {
    clauses: Vec<String>,
}

impl Filter {
    /// Posted-content records posted within `window`, optionally under one DOI prefix
    pub fn for_window(window: &TimeWindow, prefix: Option<&str>) -> Self {
        let mut clauses = vec![
            format!("from-posted-date:{}", window.start_iso()),
            format!("until-posted-date:{}", window.end_iso()),
            "type:posted-content".to_string(),
        ];
        if let Some(p) = prefix {
            clauses.push(format!("prefix:{p}"));
        }
        Self { clauses }
    }

    pub fn clauses(&self) -> &[String] {
        &self.clauses
    }

    /// Comma-joined value for the `filter` query parameter
    pub fn to_param(&self) -> String {
        self.clauses.join(",")
    }
}

impl std::fmt::Display for Filter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_param())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn week() -> TimeWindow {
        TimeWindow::for_dates(
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 1, 7).unwrap(),
        )
    }

    #[test]
    fn window_filter_param() {
        assert_eq!(
            Filter::for_window(&week(), None).to_param(),
            "from-posted-date:2024-01-01T00:00:00,until-posted-date:2024-01-07T23:59:59,type:posted-content"
        );
    }

    #[test]
    fn prefix_clause_appended_last() {
        let filter = Filter::for_window(&week(), Some("10.1101"));
        assert_eq!(filter.clauses().len(), 4);
        assert_eq!(filter.clauses()[3], "prefix:10.1101");
    }
}
