use crate::models::{Month, ProjectMetaMap, ProjectYearlyAggregate};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::BTreeSet;

pub const GRAND_TOTAL_LABEL: &str = "Grand Total";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SortKey {
    ProjectName,
    Month(Month),
    Total,
}

impl SortKey {
    pub fn parse(input: &str) -> Option<SortKey> {
        match input.trim().to_ascii_lowercase().as_str() {
            "project" | "project_name" | "name" => Some(SortKey::ProjectName),
            "total" | "total_cost" => Some(SortKey::Total),
            other => {
                let token = other.strip_suffix("_cost").unwrap_or(other);
                Month::from_token(token).map(SortKey::Month)
            }
        }
    }

    pub fn columns() -> Vec<SortKey> {
        let mut keys = vec![SortKey::ProjectName];
        keys.extend(Month::ALL.into_iter().map(SortKey::Month));
        keys.push(SortKey::Total);
        keys
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SortDirection {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SortConfig {
    pub key: SortKey,
    pub direction: SortDirection,
}

impl Default for SortConfig {
    fn default() -> Self {
        Self {
            key: SortKey::Total,
            direction: SortDirection::Descending,
        }
    }
}

impl SortConfig {
    /// Header click: same key flips ascending to descending, anything else starts ascending.
    pub fn request(self, key: SortKey) -> SortConfig {
        let direction = if self.key == key && self.direction == SortDirection::Ascending {
            SortDirection::Descending
        } else {
            SortDirection::Ascending
        };
        SortConfig { key, direction }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProjectFilter {
    pub projects: BTreeSet<String>,
    pub search: String,
    pub environment: Option<String>,
}

impl ProjectFilter {
    pub fn matches(&self, project: &ProjectYearlyAggregate, meta: &ProjectMetaMap) -> bool {
        if !self.projects.is_empty() && !self.projects.contains(&project.project_name) {
            return false;
        }
        let needle = self.search.trim().to_lowercase();
        if !needle.is_empty() && !project.project_name.to_lowercase().contains(&needle) {
            return false;
        }
        match self.environment.as_deref() {
            None | Some("all") => true,
            Some(env) => meta
                .get(&project.project_name)
                .and_then(|m| m.environment.as_deref())
                == Some(env),
        }
    }

    pub fn apply<'a>(
        &self,
        aggregates: &'a [ProjectYearlyAggregate],
        meta: &ProjectMetaMap,
    ) -> Vec<&'a ProjectYearlyAggregate> {
        aggregates.iter().filter(|p| self.matches(p, meta)).collect()
    }

    pub fn toggle_project(&mut self, name: &str) {
        if !self.projects.remove(name) {
            self.projects.insert(name.to_string());
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TableRow<'a> {
    #[serde(skip)]
    pub project: &'a ProjectYearlyAggregate,
    pub project_name: &'a str,
    pub monthly_costs: [f64; 12],
    pub total_cost: f64,
}

impl TableRow<'_> {
    fn value(&self, key: SortKey) -> f64 {
        match key {
            SortKey::ProjectName => 0.0,
            SortKey::Month(m) => self.monthly_costs[m.index()],
            SortKey::Total => self.total_cost,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GrandTotal {
    pub monthly_costs: [f64; 12],
    pub total_cost: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DerivedTable<'a> {
    pub rows: Vec<TableRow<'a>>,
    pub grand_total: GrandTotal,
    pub min_cost: f64,
    pub max_cost: f64,
}

pub fn derive_table<'a, I>(aggregates: I, sort: SortConfig) -> DerivedTable<'a>
where
    I: IntoIterator<Item = &'a ProjectYearlyAggregate>,
{
    let mut min_cost = f64::INFINITY;
    let mut max_cost = f64::NEG_INFINITY;

    let mut rows: Vec<TableRow<'a>> = aggregates
        .into_iter()
        .map(|project| {
            for cost in project.monthly_costs.iter().copied().filter(|c| *c > 0.0) {
                min_cost = min_cost.min(cost);
                max_cost = max_cost.max(cost);
            }
            TableRow {
                project,
                project_name: &project.project_name,
                monthly_costs: project.monthly_costs,
                total_cost: project.total_cost(),
            }
        })
        .collect();

    rows.sort_by(|a, b| {
        let ord = match sort.key {
            SortKey::ProjectName => a.project_name.cmp(b.project_name),
            key => a
                .value(key)
                .partial_cmp(&b.value(key))
                .unwrap_or(Ordering::Equal),
        };
        match sort.direction {
            SortDirection::Ascending => ord,
            SortDirection::Descending => ord.reverse(),
        }
    });

    let grand_total = grand_total(&rows);
    if min_cost > max_cost {
        min_cost = 0.0;
        max_cost = 0.0;
    }

    DerivedTable {
        rows,
        grand_total,
        min_cost,
        max_cost,
    }
}

pub fn grand_total(rows: &[TableRow<'_>]) -> GrandTotal {
    let mut monthly_costs = [0.0; 12];
    for row in rows {
        for (slot, cost) in monthly_costs.iter_mut().zip(row.monthly_costs) {
            *slot += cost;
        }
    }
    GrandTotal {
        total_cost: monthly_costs.iter().sum(),
        monthly_costs,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::aggregate;
    use crate::aggregator::tests::item;
    use crate::models::ProjectMeta;
    use proptest::prelude::*;

    fn sample() -> Vec<ProjectYearlyAggregate> {
        aggregate(
            &[
                item("beta", 2024, "jan", "30"),
                item("alpha", 2024, "jan", "10"),
                item("alpha", 2024, "feb", "40"),
                item("gamma", 2024, "mar", "0"),
                item("delta", 2024, "jan", "30"),
            ],
            2024,
        )
    }

    fn names<'a>(table: &'a DerivedTable<'a>) -> Vec<&'a str> {
        table.rows.iter().map(|r| r.project_name).collect()
    }

    #[test]
    fn sorts_by_total_descending_by_default() {
        let data = sample();
        let table = derive_table(&data, SortConfig::default());
        assert_eq!(names(&table), vec!["alpha", "beta", "delta", "gamma"]);
    }

    #[test]
    fn ties_keep_prior_order() {
        let data = sample();
        let sort = SortConfig {
            key: SortKey::Month(Month::Jan),
            direction: SortDirection::Descending,
        };
        let table = derive_table(&data, sort);
        assert_eq!(names(&table), vec!["beta", "delta", "alpha", "gamma"]);
    }

    #[test]
    fn sorts_names_lexicographically() {
        let data = sample();
        let sort = SortConfig::default().request(SortKey::ProjectName);
        assert_eq!(sort.direction, SortDirection::Ascending);
        let table = derive_table(&data, sort);
        assert_eq!(names(&table), vec!["alpha", "beta", "delta", "gamma"]);
    }

    #[test]
    fn request_toggles_on_same_key_and_resets_on_change() {
        let sort = SortConfig::default().request(SortKey::Month(Month::Feb));
        assert_eq!(sort.direction, SortDirection::Ascending);
        let sort = sort.request(SortKey::Month(Month::Feb));
        assert_eq!(sort.direction, SortDirection::Descending);
        let sort = sort.request(SortKey::Month(Month::Feb));
        assert_eq!(sort.direction, SortDirection::Ascending);
        let sort = sort.request(SortKey::Total);
        assert_eq!(sort.key, SortKey::Total);
        assert_eq!(sort.direction, SortDirection::Ascending);
    }

    #[test]
    fn min_max_ignore_zero_cells() {
        let data = sample();
        let table = derive_table(&data, SortConfig::default());
        assert_eq!(table.min_cost, 10.0);
        assert_eq!(table.max_cost, 40.0);
    }

    #[test]
    fn empty_table_has_flat_range_and_zero_totals() {
        let empty: Vec<ProjectYearlyAggregate> = Vec::new();
        let table = derive_table(&empty, SortConfig::default());
        assert!(table.rows.is_empty());
        assert_eq!(table.min_cost, table.max_cost);
        assert_eq!(table.grand_total, GrandTotal::default());
    }

    #[test]
    fn grand_total_follows_filter() {
        let data = sample();
        let mut filter = ProjectFilter::default();
        filter.toggle_project("alpha");
        filter.toggle_project("beta");
        let visible = filter.apply(&data, &ProjectMetaMap::new());
        let table = derive_table(visible, SortConfig::default());
        assert_eq!(table.grand_total.monthly_costs[0], 40.0);
        assert_eq!(table.grand_total.total_cost, 80.0);

        filter.toggle_project("beta");
        assert_eq!(filter.apply(&data, &ProjectMetaMap::new()).len(), 1);
    }

    #[test]
    fn filter_by_search_and_environment() {
        let data = sample();
        let meta = ProjectMetaMap::from([(
            "delta".to_string(),
            ProjectMeta {
                environment: Some("prod".into()),
                ..ProjectMeta::default()
            },
        )]);
        let filter = ProjectFilter {
            search: "ELT".into(),
            ..ProjectFilter::default()
        };
        assert_eq!(filter.apply(&data, &meta).len(), 1);

        let filter = ProjectFilter {
            environment: Some("prod".into()),
            ..ProjectFilter::default()
        };
        let visible = filter.apply(&data, &meta);
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].project_name, "delta");

        let filter = ProjectFilter {
            environment: Some("all".into()),
            ..ProjectFilter::default()
        };
        assert_eq!(filter.apply(&data, &meta).len(), 4);
    }

    #[test]
    fn parses_sort_keys() {
        assert_eq!(SortKey::parse("total"), Some(SortKey::Total));
        assert_eq!(SortKey::parse("jan_cost"), Some(SortKey::Month(Month::Jan)));
        assert_eq!(SortKey::parse("Project"), Some(SortKey::ProjectName));
        assert_eq!(SortKey::parse("week"), None);
        assert_eq!(SortKey::columns().len(), 14);
    }

    proptest! {
        #[test]
        fn grand_total_matches_row_sums(
            rows in prop::collection::vec((0usize..5, 0usize..12, -5_000i64..50_000), 0..60)
        ) {
            let items: Vec<_> = rows
                .iter()
                .map(|(p, m, cents)| item(
                    &format!("p{p}"),
                    2024,
                    Month::ALL[*m].token(),
                    &format!("{:.2}", *cents as f64 / 100.0),
                ))
                .collect();
            let data = aggregate(&items, 2024);
            let table = derive_table(&data, SortConfig::default());

            let row_total: f64 = table.rows.iter().map(|r| r.total_cost).sum();
            prop_assert!((table.grand_total.total_cost - row_total).abs() < 1e-6);
            for month in Month::ALL {
                let col: f64 = table.rows.iter().map(|r| r.monthly_costs[month.index()]).sum();
                prop_assert!((table.grand_total.monthly_costs[month.index()] - col).abs() < 1e-6);
            }
        }
    }
}
