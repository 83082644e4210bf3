use crate::models::{BillingLineItem, ProjectMetaMap, ProjectYearlyAggregate, YearlyBilling};
use std::collections::HashMap;
use tracing::{debug, warn};

/// Fold every line item of `target_year` into per-project aggregates.
///
/// Projects are keyed by exact `project_name`; two spellings of the same
/// project produce two aggregates. Output follows first-seen order.
pub fn aggregate(items: &[BillingLineItem], target_year: i32) -> Vec<ProjectYearlyAggregate> {
    let mut out: Vec<ProjectYearlyAggregate> = Vec::new();
    let mut index: HashMap<&str, usize> = HashMap::new();

    for item in items.iter().filter(|i| i.billing_year == target_year) {
        let slot = *index.entry(item.project_name.as_str()).or_insert_with(|| {
            out.push(ProjectYearlyAggregate::new(item));
            out.len() - 1
        });
        let project = &mut out[slot];

        let cost = item.cost();
        match item.month() {
            Some(month) => project.monthly_costs[month.index()] += cost,
            None => project.unbucketed_cost += cost,
        }
        project.service_breakdown.push(item.clone());
    }

    for project in out.iter().filter(|p| p.unbucketed_cost != 0.0) {
        warn!(
            project = %project.project_name,
            year = target_year,
            cost = project.unbucketed_cost,
            "line items with unrecognised billing_month left out of monthly totals"
        );
    }

    debug!(
        year = target_year,
        projects = out.len(),
        "aggregated billing line items"
    );
    out
}

pub fn attach_metadata(aggregates: &mut [ProjectYearlyAggregate], meta: &ProjectMetaMap) {
    for project in aggregates {
        if let Some(entry) = meta.get(&project.project_name) {
            project.project_code = entry.project_code.clone();
        }
    }
}

pub fn aggregate_years(
    items: &[BillingLineItem],
    year: i32,
    meta: Option<&ProjectMetaMap>,
) -> YearlyBilling {
    let mut current = aggregate(items, year);
    let mut previous = aggregate(items, year - 1);
    if let Some(meta) = meta {
        attach_metadata(&mut current, meta);
        attach_metadata(&mut previous, meta);
    }
    YearlyBilling { current, previous }
}
