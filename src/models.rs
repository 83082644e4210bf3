use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Month {
    Jan,
    Feb,
    Mar,
    Apr,
    May,
    Jun,
    Jul,
    Aug,
    Sep,
    Oct,
    Nov,
    Dec,
}

impl Month {
    pub const ALL: [Month; 12] = [
        Month::Jan,
        Month::Feb,
        Month::Mar,
        Month::Apr,
        Month::May,
        Month::Jun,
        Month::Jul,
        Month::Aug,
        Month::Sep,
        Month::Oct,
        Month::Nov,
        Month::Dec,
    ];

    pub fn from_token(token: &str) -> Option<Month> {
        Month::ALL.into_iter().find(|m| m.token() == token)
    }

    pub fn token(self) -> &'static str {
        match self {
            Month::Jan => "jan",
            Month::Feb => "feb",
            Month::Mar => "mar",
            Month::Apr => "apr",
            Month::May => "may",
            Month::Jun => "jun",
            Month::Jul => "jul",
            Month::Aug => "aug",
            Month::Sep => "sep",
            Month::Oct => "oct",
            Month::Nov => "nov",
            Month::Dec => "dec",
        }
    }

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Option<Month> {
        Month::ALL.get(index).copied()
    }

    pub fn previous(self) -> Option<Month> {
        self.index().checked_sub(1).and_then(Month::from_index)
    }

    pub fn label(self) -> String {
        let token = self.token();
        let mut out = token[..1].to_ascii_uppercase();
        out.push_str(&token[1..]);
        out
    }

    pub fn header(self) -> String {
        self.token().to_ascii_uppercase()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Quarter {
    Q1,
    Q2,
    Q3,
    Q4,
}

impl Quarter {
    pub fn parse(input: &str) -> Option<Quarter> {
        match input.trim().to_ascii_uppercase().as_str() {
            "Q1" => Some(Quarter::Q1),
            "Q2" => Some(Quarter::Q2),
            "Q3" => Some(Quarter::Q3),
            "Q4" => Some(Quarter::Q4),
            _ => None,
        }
    }

    pub fn months(self) -> &'static [Month] {
        let start = self as usize * 3;
        &Month::ALL[start..start + 3]
    }

    pub fn label(self) -> &'static str {
        match self {
            Quarter::Q1 => "Q1",
            Quarter::Q2 => "Q2",
            Quarter::Q3 => "Q3",
            Quarter::Q4 => "Q4",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub enum Period {
    #[default]
    All,
    Month(Month),
    Quarter(Quarter),
}

impl Period {
    pub fn contains(self, month: Month) -> bool {
        match self {
            Period::All => true,
            Period::Month(m) => m == month,
            Period::Quarter(q) => q.months().contains(&month),
        }
    }

    pub fn cost_of(self, project: &ProjectYearlyAggregate) -> f64 {
        Month::ALL
            .into_iter()
            .filter(|m| self.contains(*m))
            .map(|m| project.month_cost(m))
            .sum()
    }

    pub fn label(self) -> String {
        match self {
            Period::All => "All Months".to_string(),
            Period::Month(m) => m.label(),
            Period::Quarter(q) => q.label().to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub enum Platform {
    #[default]
    #[serde(rename = "GCP")]
    Gcp,
    #[serde(rename = "AWS")]
    Aws,
}

impl Platform {
    pub fn as_str(self) -> &'static str {
        match self {
            Platform::Gcp => "GCP",
            Platform::Aws => "AWS",
        }
    }

    pub fn parse(input: &str) -> Option<Platform> {
        match input.trim().to_ascii_uppercase().as_str() {
            "GCP" => Some(Platform::Gcp),
            "AWS" => Some(Platform::Aws),
            _ => None,
        }
    }

    pub fn toggle(self) -> Platform {
        match self {
            Platform::Gcp => Platform::Aws,
            Platform::Aws => Platform::Gcp,
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifiers arrive as integers from one backend and strings from another.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(untagged)]
pub enum ProjectId {
    Number(i64),
    Text(String),
}

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProjectId::Number(n) => write!(f, "{n}"),
            ProjectId::Text(s) => f.write_str(s),
        }
    }
}

/// A cost as it crossed the wire: a JSON number or a possibly currency-formatted string.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum CostValue {
    Number(f64),
    Text(String),
}

impl From<f64> for CostValue {
    fn from(value: f64) -> Self {
        CostValue::Number(value)
    }
}

impl From<&str> for CostValue {
    fn from(value: &str) -> Self {
        CostValue::Text(value.to_string())
    }
}

impl CostValue {
    pub fn as_raw(&self) -> String {
        match self {
            CostValue::Number(n) => n.to_string(),
            CostValue::Text(s) => s.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BillingLineItem {
    pub project_id: Option<ProjectId>,
    pub project_name: String,
    #[serde(default)]
    pub platform: Option<String>,
    pub billing_year: i32,
    #[serde(default)]
    pub billing_month: Option<String>,
    #[serde(default)]
    pub service_description: Option<String>,
    #[serde(default)]
    pub sku_description: Option<String>,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub cost: Option<CostValue>,
}

pub const UNCATEGORIZED_SERVICE: &str = "Uncategorized Services";

impl BillingLineItem {
    pub fn month(&self) -> Option<Month> {
        self.billing_month.as_deref().and_then(Month::from_token)
    }

    pub fn cost(&self) -> f64 {
        crate::normalize::normalize_number(self.cost.as_ref())
    }

    pub fn service_label(&self) -> &str {
        [&self.service_description, &self.kind]
            .into_iter()
            .filter_map(|v| v.as_deref())
            .find(|v| !v.is_empty())
            .unwrap_or(UNCATEGORIZED_SERVICE)
    }

    pub fn sku_label(&self) -> &str {
        self.sku_description
            .as_deref()
            .filter(|v| !v.is_empty())
            .unwrap_or("N/A")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ProjectMeta {
    #[serde(default)]
    pub id: Option<ProjectId>,
    #[serde(default, rename = "projectCode")]
    pub project_code: Option<String>,
    #[serde(default)]
    pub environment: Option<String>,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub team: Option<String>,
}

pub type ProjectMetaMap = HashMap<String, ProjectMeta>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProjectYearlyAggregate {
    pub project_id: Option<ProjectId>,
    pub project_name: String,
    pub platform: Option<String>,
    pub billing_year: i32,
    pub monthly_costs: [f64; 12],
    /// Cost of line items whose month token was not recognised.
    pub unbucketed_cost: f64,
    pub service_breakdown: Vec<BillingLineItem>,
    pub project_code: Option<String>,
}

impl ProjectYearlyAggregate {
    pub fn new(first: &BillingLineItem) -> Self {
        Self {
            project_id: first.project_id.clone(),
            project_name: first.project_name.clone(),
            platform: first.platform.clone(),
            billing_year: first.billing_year,
            monthly_costs: [0.0; 12],
            unbucketed_cost: 0.0,
            service_breakdown: Vec::new(),
            project_code: None,
        }
    }

    pub fn month_cost(&self, month: Month) -> f64 {
        self.monthly_costs[month.index()]
    }

    pub fn total_cost(&self) -> f64 {
        self.monthly_costs.iter().sum()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct YearlyBilling {
    pub current: Vec<ProjectYearlyAggregate>,
    pub previous: Vec<ProjectYearlyAggregate>,
}

impl YearlyBilling {
    pub fn is_empty(&self) -> bool {
        self.current.is_empty() && self.previous.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ForecastPoint {
    pub year: i32,
    pub month_str: String,
    #[serde(default)]
    pub cost: Option<CostValue>,
}

impl ForecastPoint {
    pub fn month(&self) -> Option<Month> {
        Month::from_token(&self.month_str)
    }

    pub fn cost(&self) -> f64 {
        crate::normalize::normalize_number(self.cost.as_ref())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ForecastResponse {
    #[serde(default)]
    pub historical: Vec<serde_json::Value>,
    #[serde(default)]
    pub forecast: Vec<ForecastPoint>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Budget {
    #[serde(default)]
    pub project_id: Option<ProjectId>,
    #[serde(default)]
    pub project_name: String,
    pub year: i32,
    pub month: String,
    #[serde(default)]
    pub amount: Option<CostValue>,
}

impl Budget {
    pub fn month(&self) -> Option<Month> {
        Month::from_token(&self.month)
    }

    pub fn amount(&self) -> f64 {
        crate::normalize::normalize_number(self.amount.as_ref())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Anomaly {
    pub id: i64,
    pub project_name: String,
    pub month: String,
    #[serde(default)]
    pub anomalous_cost: Option<CostValue>,
    #[serde(default)]
    pub average_cost: Option<CostValue>,
    #[serde(default)]
    pub timestamp: Option<String>,
}

impl Anomaly {
    pub fn percent_over_average(&self) -> f64 {
        let anomalous = crate::normalize::normalize_number(self.anomalous_cost.as_ref());
        let average = crate::normalize::normalize_number(self.average_cost.as_ref());
        if average > 0.0 {
            (anomalous - average) / average * 100.0
        } else {
            100.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn month_tokens_are_exact_lowercase() {
        assert_eq!(Month::from_token("mar"), Some(Month::Mar));
        assert_eq!(Month::from_token("Mar"), None);
        assert_eq!(Month::from_token("march"), None);
        assert_eq!(Month::Sep.label(), "Sep");
        assert_eq!(Month::Dec.header(), "DEC");
        assert_eq!(Month::Jan.previous(), None);
        assert_eq!(Month::Feb.previous(), Some(Month::Jan));
    }

    #[test]
    fn line_item_deserializes_wire_shape() {
        let item: BillingLineItem = serde_json::from_value(json!({
            "project_id": 12,
            "project_name": "alpha",
            "platform": "GCP",
            "billing_year": 2024,
            "billing_month": "jan",
            "cost": "$1,000.00",
            "service_description": null,
            "sku_description": "N1 core",
            "type": "Compute"
        }))
        .expect("line item should parse");

        assert_eq!(item.project_id, Some(ProjectId::Number(12)));
        assert_eq!(item.month(), Some(Month::Jan));
        assert_eq!(item.cost(), 1000.0);
        assert_eq!(item.service_label(), "Compute");
        assert_eq!(item.sku_label(), "N1 core");
    }

    #[test]
    fn service_label_falls_back_to_uncategorized() {
        let item: BillingLineItem = serde_json::from_value(json!({
            "project_id": "p-1",
            "project_name": "beta",
            "billing_year": 2024,
            "cost": 3.5
        }))
        .expect("line item should parse");
        assert_eq!(item.service_label(), UNCATEGORIZED_SERVICE);
        assert_eq!(item.sku_label(), "N/A");
        assert_eq!(item.cost(), 3.5);
    }

    #[test]
    fn project_meta_reads_camel_case_code() {
        let meta: ProjectMetaMap = serde_json::from_value(json!({
            "alpha": {"id": 1, "projectCode": "ALP-1", "environment": "prod", "owner": "dana", "team": null}
        }))
        .expect("meta should parse");
        let alpha = meta.get("alpha").expect("alpha entry");
        assert_eq!(alpha.project_code.as_deref(), Some("ALP-1"));
        assert_eq!(alpha.team, None);
    }

    #[test]
    fn budget_deserializes_wire_shape() {
        let budgets: Vec<Budget> = serde_json::from_value(json!([
            {"project_id": 7, "project_name": "alpha", "year": 2024, "month": "feb", "amount": 250.0},
            {"project_id": 7, "project_name": "alpha", "year": 2024, "month": "Feb", "amount": "1,200"}
        ]))
        .expect("budgets should parse");
        assert_eq!(budgets[0].project_id, Some(ProjectId::Number(7)));
        assert_eq!(budgets[0].month(), Some(Month::Feb));
        assert_eq!(budgets[0].amount(), 250.0);
        assert_eq!(budgets[1].month(), None);
        assert_eq!(budgets[1].amount(), 1200.0);
    }

    #[test]
    fn anomaly_percentage_defaults_to_hundred_without_average() {
        let anomaly = Anomaly {
            id: 1,
            project_name: "alpha".into(),
            month: "Mar 2024".into(),
            anomalous_cost: Some(CostValue::Number(300.0)),
            average_cost: Some(CostValue::Number(0.0)),
            timestamp: None,
        };
        assert_eq!(anomaly.percent_over_average(), 100.0);

        let anomaly = Anomaly {
            average_cost: Some(CostValue::Number(200.0)),
            ..anomaly
        };
        assert_eq!(anomaly.percent_over_average(), 50.0);
    }
}
