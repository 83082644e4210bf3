use crate::models::{ForecastPoint, Month, ProjectId, ProjectYearlyAggregate};
use serde::Serialize;
use std::collections::BTreeSet;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ForecastScope {
    AllProjects,
    Project(ProjectId),
    Suppressed,
}

pub fn forecast_scope(
    selected: &BTreeSet<String>,
    aggregates: &[ProjectYearlyAggregate],
) -> ForecastScope {
    match selected.len() {
        0 => ForecastScope::AllProjects,
        1 => selected
            .iter()
            .next()
            .and_then(|name| aggregates.iter().find(|p| &p.project_name == name))
            .and_then(|p| p.project_id.clone())
            .map_or(ForecastScope::Suppressed, ForecastScope::Project),
        _ => ForecastScope::Suppressed,
    }
}

fn last_actual_month(actual: &[f64; 12]) -> Option<usize> {
    actual.iter().rposition(|c| *c != 0.0)
}

/// One value per month: the anchor is the last month with actual spend, then
/// forecast values for later months, `None` everywhere else so the chart draws a gap.
pub fn forecast_overlay(actual: &[f64; 12], forecast: &[ForecastPoint], year: i32) -> [Option<f64>; 12] {
    let mut line = [None; 12];
    let anchor = last_actual_month(actual);
    if let Some(idx) = anchor {
        line[idx] = Some(actual[idx]);
    }
    for point in forecast.iter().filter(|p| p.year == year) {
        let Some(month) = point.month() else {
            continue;
        };
        if anchor.map_or(true, |a| month.index() > a) {
            line[month.index()] = Some(point.cost());
        }
    }
    line
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ForecastTrend {
    pub from_month: Month,
    pub to_month: Month,
    pub percentage: f64,
}

pub fn forecast_trend(actual: &[f64; 12], forecast: &[ForecastPoint], year: i32) -> Option<ForecastTrend> {
    let anchor = last_actual_month(actual)?;
    let last_cost = actual[anchor];
    let first = forecast
        .iter()
        .filter(|p| p.year == year)
        .filter_map(|p| p.month().map(|m| (m, p.cost())))
        .filter(|(m, _)| m.index() > anchor)
        .min_by_key(|(m, _)| m.index())?;

    Some(ForecastTrend {
        from_month: Month::from_index(anchor)?,
        to_month: first.0,
        percentage: (first.1 - last_cost) / last_cost.abs() * 100.0,
    })
}
