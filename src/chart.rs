use crate::models::{Month, Period, ProjectMetaMap, ProjectYearlyAggregate};
use crate::table::ProjectFilter;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

pub const OTHER_LABEL: &str = "Other";
pub const DEFAULT_TOP_N: usize = 7;
pub const OTHER_EPSILON: f64 = 0.005;
pub const UNASSIGNED_GROUP: &str = "Unassigned";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartGroup {
    pub name: String,
    pub total_cost: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ChartSeries {
    pub labels: Vec<String>,
    pub data: Vec<f64>,
}

impl ChartSeries {
    pub fn total(&self) -> f64 {
        self.data.iter().sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.labels
            .iter()
            .map(String::as_str)
            .zip(self.data.iter().copied())
    }
}

/// Sort descending, keep `top_n`, and fold the tail into one "Other" bucket.
pub fn to_chart_series(mut groups: Vec<ChartGroup>, top_n: usize) -> ChartSeries {
    groups.sort_by(|a, b| {
        b.total_cost
            .partial_cmp(&a.total_cost)
            .unwrap_or(Ordering::Equal)
    });

    let split = top_n.min(groups.len());
    let tail = groups.split_off(split);
    let other: f64 = tail.iter().map(|g| g.total_cost).sum();

    let mut series = ChartSeries {
        labels: groups.iter().map(|g| g.name.clone()).collect(),
        data: groups.iter().map(|g| g.total_cost).collect(),
    };
    if other.abs() > OTHER_EPSILON {
        series.labels.push(OTHER_LABEL.to_string());
        series.data.push(other);
    }
    series
}

pub fn drill_selection(label: &str) -> Option<&str> {
    (label != OTHER_LABEL).then_some(label)
}

pub fn apply_drill(filter: &mut ProjectFilter, label: &str) -> bool {
    let Some(project) = drill_selection(label) else {
        return false;
    };
    filter.projects.clear();
    filter.projects.insert(project.to_string());
    true
}

fn push_or_add(groups: &mut Vec<ChartGroup>, name: &str, cost: f64) {
    match groups.iter_mut().find(|g| g.name == name) {
        Some(group) => group.total_cost += cost,
        None => groups.push(ChartGroup {
            name: name.to_string(),
            total_cost: cost,
        }),
    }
}

pub fn project_groups(projects: &[&ProjectYearlyAggregate], period: Period) -> Vec<ChartGroup> {
    let mut groups = Vec::new();
    for project in projects {
        push_or_add(&mut groups, &project.project_name, period.cost_of(project));
    }
    groups
}

pub fn service_groups(projects: &[&ProjectYearlyAggregate], period: Period) -> Vec<ChartGroup> {
    let mut groups = Vec::new();
    for item in projects.iter().flat_map(|p| p.service_breakdown.iter()) {
        let Some(month) = item.month() else {
            continue;
        };
        let cost = item.cost();
        if period.contains(month) && cost > 0.0 {
            push_or_add(&mut groups, item.service_label(), cost);
        }
    }
    groups
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ReportDimension {
    #[default]
    Team,
    Owner,
}

impl ReportDimension {
    pub fn parse(input: &str) -> Option<ReportDimension> {
        match input.trim().to_ascii_lowercase().as_str() {
            "team" => Some(ReportDimension::Team),
            "owner" => Some(ReportDimension::Owner),
            _ => None,
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            ReportDimension::Team => "Team",
            ReportDimension::Owner => "Owner",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ReportDimension::Team => "team",
            ReportDimension::Owner => "owner",
        }
    }
}

pub fn report_groups(
    projects: &[&ProjectYearlyAggregate],
    meta: &ProjectMetaMap,
    dimension: ReportDimension,
    period: Period,
) -> Vec<ChartGroup> {
    let mut groups = Vec::new();
    for project in projects {
        let entry = meta.get(&project.project_name);
        let value = entry.and_then(|m| match dimension {
            ReportDimension::Team => m.team.as_deref(),
            ReportDimension::Owner => m.owner.as_deref(),
        });
        let name = value.filter(|v| !v.is_empty()).unwrap_or(UNASSIGNED_GROUP);
        push_or_add(&mut groups, name, period.cost_of(project));
    }
    groups.sort_by(|a, b| {
        b.total_cost
            .partial_cmp(&a.total_cost)
            .unwrap_or(Ordering::Equal)
    });
    groups
}

pub fn breakdown_series(
    projects: &[&ProjectYearlyAggregate],
    filter: &ProjectFilter,
    period: Period,
    top_n: usize,
) -> ChartSeries {
    let groups = if filter.projects.len() == 1 {
        service_groups(projects, period)
    } else {
        project_groups(projects, period)
    };
    to_chart_series(groups, top_n)
}

pub fn monthly_bar_series(projects: &[&ProjectYearlyAggregate]) -> ChartSeries {
    let mut data = vec![0.0; 12];
    for project in projects {
        for (slot, cost) in data.iter_mut().zip(project.monthly_costs) {
            *slot += cost;
        }
    }
    ChartSeries {
        labels: Month::ALL.into_iter().map(Month::label).collect(),
        data,
    }
}
