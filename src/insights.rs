use crate::models::{BillingLineItem, Budget, Month, Period, ProjectYearlyAggregate};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkuCost {
    pub sku: String,
    pub cost: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceCost {
    pub service: String,
    pub total_cost: f64,
    pub skus: Vec<SkuCost>,
}

fn by_cost_desc(a: f64, b: f64) -> Ordering {
    b.partial_cmp(&a).unwrap_or(Ordering::Equal)
}

pub fn service_breakdown(items: &[BillingLineItem], month: Month) -> Vec<ServiceCost> {
    let mut services: Vec<ServiceCost> = Vec::new();
    for item in items.iter().filter(|i| i.month() == Some(month)) {
        let cost = item.cost();
        if cost <= 0.0 {
            continue;
        }
        let label = item.service_label();
        let pos = match services.iter().position(|s| s.service == label) {
            Some(pos) => pos,
            None => {
                services.push(ServiceCost {
                    service: label.to_string(),
                    total_cost: 0.0,
                    skus: Vec::new(),
                });
                services.len() - 1
            }
        };
        let service = &mut services[pos];
        service.total_cost += cost;
        service.skus.push(SkuCost {
            sku: item.sku_label().to_string(),
            cost,
        });
    }

    for service in &mut services {
        service.skus.sort_by(|a, b| by_cost_desc(a.cost, b.cost));
    }
    services.sort_by(|a, b| by_cost_desc(a.total_cost, b.total_cost));
    services
}

pub fn period_total(projects: &[&ProjectYearlyAggregate], period: Period) -> f64 {
    projects.iter().map(|p| period.cost_of(p)).sum()
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MonthTrend {
    pub percentage: i64,
    pub previous_cost: f64,
    pub is_increase: bool,
}

pub fn month_over_month(projects: &[&ProjectYearlyAggregate], period: Period) -> Option<MonthTrend> {
    let Period::Month(month) = period else {
        return None;
    };
    let prev = month.previous()?;
    let current_cost = period_total(projects, Period::Month(month));
    let previous_cost = period_total(projects, Period::Month(prev));

    if previous_cost == 0.0 {
        return Some(MonthTrend {
            percentage: if current_cost > 0.0 { 100 } else { 0 },
            previous_cost,
            is_increase: current_cost > 0.0,
        });
    }
    let pct = (current_cost - previous_cost) / previous_cost * 100.0;
    Some(MonthTrend {
        percentage: pct.round() as i64,
        previous_cost,
        is_increase: pct > 0.0,
    })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TopProject {
    pub name: String,
    pub code: Option<String>,
    pub cost: f64,
}

pub fn top_project(projects: &[&ProjectYearlyAggregate], period: Period) -> Option<TopProject> {
    let mut best: Option<TopProject> = None;
    for project in projects {
        let cost = period.cost_of(project);
        let current = best.as_ref().map_or(0.0, |b| b.cost);
        if cost > current {
            best = Some(TopProject {
                name: project.project_name.clone(),
                code: project.project_code.clone(),
                cost,
            });
        }
    }
    best
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct YearOverYear {
    pub project_name: String,
    pub current_total: f64,
    pub previous_total: f64,
    pub percentage: Option<f64>,
}

fn yoy_percentage(current: f64, previous: f64) -> Option<f64> {
    (previous != 0.0).then(|| (current - previous) / previous.abs() * 100.0)
}

/// Per-project comparison against the previous year, in current-year order.
/// Both slices must already be narrowed by the same project filter. Projects
/// that only exist in the previous year are appended at the end.
pub fn year_over_year(
    current: &[&ProjectYearlyAggregate],
    previous: &[&ProjectYearlyAggregate],
) -> Vec<YearOverYear> {
    let previous_totals: HashMap<&str, f64> = previous
        .iter()
        .map(|p| (p.project_name.as_str(), p.total_cost()))
        .collect();

    let mut out: Vec<YearOverYear> = current
        .iter()
        .map(|p| {
            let current_total = p.total_cost();
            let previous_total = previous_totals
                .get(p.project_name.as_str())
                .copied()
                .unwrap_or(0.0);
            YearOverYear {
                project_name: p.project_name.clone(),
                current_total,
                previous_total,
                percentage: yoy_percentage(current_total, previous_total),
            }
        })
        .collect();

    for p in previous.iter() {
        if !current.iter().any(|c| c.project_name == p.project_name) {
            out.push(YearOverYear {
                project_name: p.project_name.clone(),
                current_total: 0.0,
                previous_total: p.total_cost(),
                percentage: yoy_percentage(0.0, p.total_cost()),
            });
        }
    }
    out
}

pub fn year_over_year_total(
    current: &[&ProjectYearlyAggregate],
    previous: &[&ProjectYearlyAggregate],
) -> Option<f64> {
    let current_total: f64 = current.iter().map(|p| p.total_cost()).sum();
    let previous_total: f64 = previous.iter().map(|p| p.total_cost()).sum();
    yoy_percentage(current_total, previous_total)
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct BudgetCell {
    pub actual: f64,
    pub budget: f64,
    pub remaining: f64,
}

impl BudgetCell {
    fn new(actual: f64, budget: f64) -> Self {
        Self {
            actual,
            budget,
            remaining: budget - actual,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.actual == 0.0 && self.budget == 0.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BudgetRow {
    pub project_name: String,
    pub project_code: Option<String>,
    pub months: [BudgetCell; 12],
}

impl BudgetRow {
    pub fn month(&self, month: Month) -> BudgetCell {
        self.months[month.index()]
    }

    pub fn period_total(&self, period: Period) -> BudgetCell {
        let (actual, budget) = Month::ALL
            .into_iter()
            .filter(|m| period.contains(*m))
            .map(|m| self.month(m))
            .fold((0.0, 0.0), |(a, b), cell| (a + cell.actual, b + cell.budget));
        BudgetCell::new(actual, budget)
    }
}

// Ids are compared by their text so `7` and `"7"` refer to the same project.
fn budget_applies(budget: &Budget, project: &ProjectYearlyAggregate) -> bool {
    if budget.year != project.billing_year {
        return false;
    }
    match (&budget.project_id, &project.project_id) {
        (Some(a), Some(b)) => a.to_string() == b.to_string(),
        _ => budget.project_name == project.project_name,
    }
}

/// Budget against actual spend per project and month. Months without a
/// budget count as 0; a later budget line for the same month replaces an
/// earlier one.
pub fn budget_status(projects: &[&ProjectYearlyAggregate], budgets: &[Budget]) -> Vec<BudgetRow> {
    projects
        .iter()
        .map(|project| {
            let mut planned = [0.0; 12];
            for budget in budgets.iter().filter(|b| budget_applies(b, project)) {
                match budget.month() {
                    Some(month) => planned[month.index()] = budget.amount(),
                    None => tracing::warn!(
                        project = %project.project_name,
                        month = %budget.month,
                        "budget line with unrecognised month skipped"
                    ),
                }
            }
            BudgetRow {
                project_name: project.project_name.clone(),
                project_code: project.project_code.clone(),
                months: std::array::from_fn(|i| BudgetCell::new(project.monthly_costs[i], planned[i])),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::aggregate;
    use crate::aggregator::tests::item;
    use crate::models::{CostValue, ProjectId, ProjectMetaMap, Quarter};
    use crate::table::ProjectFilter;

    #[test]
    fn breakdown_groups_services_and_sorts_skus() {
        let mut items = vec![
            item("A", 2024, "jan", "5"),
            item("A", 2024, "jan", "20"),
            item("A", 2024, "jan", "0"),
            item("A", 2024, "feb", "100"),
            item("A", 2024, "jan", "7"),
        ];
        items[1].sku_description = Some("Storage".into());
        items[4].service_description = None;
        items[4].kind = None;

        let out = service_breakdown(&items, Month::Jan);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].service, "Compute Engine");
        assert_eq!(out[0].total_cost, 25.0);
        assert_eq!(out[0].skus[0].sku, "Storage");
        assert_eq!(out[0].skus[1].cost, 5.0);
        assert_eq!(out[1].service, "Uncategorized Services");
    }

    #[test]
    fn mom_trend_rules() {
        let data = aggregate(
            &[
                item("A", 2024, "jan", "100"),
                item("A", 2024, "feb", "150"),
                item("A", 2024, "apr", "10"),
            ],
            2024,
        );
        let refs: Vec<_> = data.iter().collect();

        assert_eq!(month_over_month(&refs, Period::All), None);
        assert_eq!(month_over_month(&refs, Period::Month(Month::Jan)), None);

        let feb = month_over_month(&refs, Period::Month(Month::Feb)).expect("feb trend");
        assert_eq!(feb.percentage, 50);
        assert!(feb.is_increase);

        let apr = month_over_month(&refs, Period::Month(Month::Apr)).expect("apr trend");
        assert_eq!(apr.percentage, 100);
        assert_eq!(apr.previous_cost, 0.0);

        let may = month_over_month(&refs, Period::Month(Month::May)).expect("may trend");
        assert_eq!(may.percentage, -100);
        assert!(!may.is_increase);
    }

    #[test]
    fn top_project_requires_positive_cost() {
        let mut data = aggregate(&[item("A", 2024, "jan", "10"), item("B", 2024, "jan", "30")], 2024);
        data[1].project_code = Some("B-1".into());
        let refs: Vec<_> = data.iter().collect();
        let top = top_project(&refs, Period::All).expect("top");
        assert_eq!(top.name, "B");
        assert_eq!(top.code.as_deref(), Some("B-1"));
        assert_eq!(top_project(&refs, Period::Month(Month::Mar)), None);
    }

    #[test]
    fn yoy_compares_against_previous_year() {
        let items = [
            item("A", 2024, "jan", "150"),
            item("A", 2023, "jan", "100"),
            item("B", 2024, "jan", "10"),
            item("C", 2023, "jan", "40"),
        ];
        let current = aggregate(&items, 2024);
        let previous = aggregate(&items, 2023);
        let refs: Vec<_> = current.iter().collect();
        let prev_refs: Vec<_> = previous.iter().collect();

        let yoy = year_over_year(&refs, &prev_refs);
        assert_eq!(yoy.len(), 3);
        assert_eq!(yoy[0].percentage, Some(50.0));
        assert_eq!(yoy[1].percentage, None);
        assert_eq!(yoy[2].project_name, "C");
        assert_eq!(yoy[2].percentage, Some(-100.0));

        // 160 this year against 140 last year, C included
        let total = year_over_year_total(&refs, &prev_refs).expect("previous spend");
        assert!((total - 100.0 / 7.0).abs() < 1e-9);
    }

    fn two_years() -> (Vec<ProjectYearlyAggregate>, Vec<ProjectYearlyAggregate>) {
        let items = [
            item("A", 2024, "jan", "100"),
            item("B", 2024, "jan", "50"),
            item("A", 2023, "jan", "100"),
            item("B", 2023, "jan", "50"),
            item("X", 2023, "jan", "1000"),
        ];
        (aggregate(&items, 2024), aggregate(&items, 2023))
    }

    #[test]
    fn yoy_total_counts_discontinued_projects() {
        let (current, previous) = two_years();
        let meta = ProjectMetaMap::new();
        let filter = ProjectFilter::default();
        let total = year_over_year_total(&filter.apply(&current, &meta), &filter.apply(&previous, &meta))
            .expect("previous spend");
        assert!((total - (150.0 - 1150.0) / 1150.0 * 100.0).abs() < 1e-9);
    }

    #[test]
    fn yoy_honours_the_project_filter_in_both_years() {
        let (current, previous) = two_years();
        let meta = ProjectMetaMap::new();
        let mut filter = ProjectFilter::default();
        filter.toggle_project("A");

        let cur = filter.apply(&current, &meta);
        let prev = filter.apply(&previous, &meta);
        let yoy = year_over_year(&cur, &prev);
        let names: Vec<&str> = yoy.iter().map(|y| y.project_name.as_str()).collect();
        assert_eq!(names, vec!["A"]);
        assert_eq!(yoy[0].percentage, Some(0.0));
        assert_eq!(year_over_year_total(&cur, &prev), Some(0.0));
    }

    fn budget(id: Option<ProjectId>, name: &str, month: &str, amount: f64) -> Budget {
        Budget {
            project_id: id,
            project_name: name.to_string(),
            year: 2024,
            month: month.to_string(),
            amount: Some(CostValue::Number(amount)),
        }
    }

    #[test]
    fn budget_status_derives_remaining_per_month() {
        let items = [
            item("A", 2024, "jan", "120"),
            item("A", 2024, "feb", "30"),
            item("B", 2024, "jan", "10"),
        ];
        let data = aggregate(&items, 2024);
        let refs: Vec<_> = data.iter().collect();
        let budgets = [
            budget(None, "A", "jan", 100.0),
            budget(None, "A", "feb", 50.0),
            budget(None, "A", "feb", 60.0),
        ];

        let rows = budget_status(&refs, &budgets);
        assert_eq!(rows.len(), 2);
        assert_eq!(
            rows[0].month(Month::Jan),
            BudgetCell { actual: 120.0, budget: 100.0, remaining: -20.0 }
        );
        assert_eq!(rows[0].month(Month::Feb).budget, 60.0);
        assert_eq!(rows[0].month(Month::Feb).remaining, 30.0);
        assert!(rows[0].month(Month::Mar).is_empty());
        assert_eq!(
            rows[1].month(Month::Jan),
            BudgetCell { actual: 10.0, budget: 0.0, remaining: -10.0 }
        );

        let q1 = rows[0].period_total(Period::Quarter(Quarter::Q1));
        assert_eq!(q1, BudgetCell { actual: 150.0, budget: 160.0, remaining: 10.0 });
    }

    #[test]
    fn budgets_match_by_id_before_name() {
        let mut a = item("A", 2024, "jan", "40");
        a.project_id = Some(ProjectId::Number(7));
        let data = aggregate(&[a], 2024);
        let refs: Vec<_> = data.iter().collect();
        let budgets = [
            budget(Some(ProjectId::Text("7".into())), "renamed", "jan", 50.0),
            budget(Some(ProjectId::Number(8)), "A", "jan", 999.0),
            budget(None, "A", "mar", 5.0),
            Budget {
                year: 2023,
                ..budget(None, "A", "jan", 1.0)
            },
        ];

        let rows = budget_status(&refs, &budgets);
        assert_eq!(rows[0].month(Month::Jan).budget, 50.0);
        assert_eq!(rows[0].month(Month::Mar).budget, 5.0);
    }
}
