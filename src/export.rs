use crate::chart::{ChartGroup, ReportDimension};
use crate::insights::BudgetRow;
use crate::models::{Month, Period, ProjectMetaMap, ProjectYearlyAggregate};
use crate::normalize::format_currency;
use crate::table::{DerivedTable, GRAND_TOTAL_LABEL};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt::Write as _;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Csv,
    Print,
    Json,
}

impl ExportFormat {
    pub fn parse(input: &str) -> Option<ExportFormat> {
        match input.trim().to_ascii_lowercase().as_str() {
            "csv" => Some(ExportFormat::Csv),
            "print" | "pdf" | "txt" => Some(ExportFormat::Print),
            "json" => Some(ExportFormat::Json),
            _ => None,
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Print => "txt",
            ExportFormat::Json => "json",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ExportCell {
    Text(String),
    Money(f64),
    Blank,
}

impl ExportCell {
    fn text(value: impl Into<String>) -> Self {
        ExportCell::Text(value.into())
    }

    fn optional(value: Option<&str>) -> Self {
        ExportCell::Text(value.unwrap_or_default().to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportTable {
    pub title: String,
    pub file_stem: String,
    pub head: Vec<String>,
    pub body: Vec<Vec<ExportCell>>,
    pub foot: Vec<Vec<ExportCell>>,
    #[serde(skip)]
    pub spacer_before_foot: bool,
}

impl ExportTable {
    pub fn file_name(&self, format: ExportFormat) -> String {
        format!("{}.{}", self.file_stem, format.extension())
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExportSelection {
    pub project_names: BTreeSet<String>,
    pub project_codes: BTreeSet<String>,
}

impl ExportSelection {
    pub fn is_empty(&self) -> bool {
        self.project_names.is_empty() && self.project_codes.is_empty()
    }

    pub fn matches(&self, project: &ProjectYearlyAggregate) -> bool {
        if self.is_empty() {
            return true;
        }
        self.project_names.contains(&project.project_name)
            || project
                .project_code
                .as_ref()
                .is_some_and(|code| self.project_codes.contains(code))
    }
}

pub fn overview_table(table: &DerivedTable<'_>, selection: &ExportSelection, year: i32) -> ExportTable {
    let rows: Vec<_> = table
        .rows
        .iter()
        .filter(|row| selection.matches(row.project))
        .collect();

    let mut monthly_totals = [0.0; 12];
    let body = rows
        .iter()
        .map(|row| {
            let mut cells = vec![ExportCell::text(row.project_name)];
            for (total, cost) in monthly_totals.iter_mut().zip(row.monthly_costs) {
                *total += cost;
                cells.push(ExportCell::Money(cost));
            }
            cells.push(ExportCell::Money(row.total_cost));
            cells
        })
        .collect();

    let mut foot = vec![ExportCell::text(GRAND_TOTAL_LABEL)];
    foot.extend(monthly_totals.iter().copied().map(ExportCell::Money));
    foot.push(ExportCell::Money(monthly_totals.iter().sum()));

    let mut head = vec!["Project Name".to_string()];
    head.extend(Month::ALL.into_iter().map(Month::header));
    head.push("Total".to_string());

    ExportTable {
        title: format!("Monthly Billing Overview {year}"),
        file_stem: format!("billing_overview_{year}"),
        head,
        body,
        foot: vec![foot],
        spacer_before_foot: true,
    }
}

pub fn detail_table(
    projects: &[&ProjectYearlyAggregate],
    meta: &ProjectMetaMap,
    selection: &ExportSelection,
    period: Period,
    year: i32,
) -> ExportTable {
    let mut body = Vec::new();
    let mut grand_total = 0.0;

    for project in projects.iter().filter(|p| selection.matches(p)) {
        let mut lines: Vec<(String, String, f64)> = Vec::new();
        for item in &project.service_breakdown {
            if !item.month().is_some_and(|m| period.contains(m)) {
                continue;
            }
            let (service, sku) = (item.service_label(), item.sku_label());
            let cost = item.cost();
            match lines.iter_mut().find(|(s, k, _)| s == service && k == sku) {
                Some(line) => line.2 += cost,
                None => lines.push((service.to_string(), sku.to_string(), cost)),
            }
        }
        if lines.is_empty() {
            continue;
        }

        let info = meta.get(&project.project_name);
        let project_cells = || {
            vec![
                ExportCell::text(project.project_name.as_str()),
                ExportCell::optional(
                    project
                        .project_code
                        .as_deref()
                        .or_else(|| info.and_then(|m| m.project_code.as_deref())),
                ),
                ExportCell::optional(info.and_then(|m| m.environment.as_deref())),
                ExportCell::optional(info.and_then(|m| m.owner.as_deref())),
                ExportCell::optional(info.and_then(|m| m.team.as_deref())),
            ]
        };

        let mut subtotal = 0.0;
        for (service, sku, cost) in lines {
            subtotal += cost;
            let mut cells = project_cells();
            cells.extend([
                ExportCell::Text(service),
                ExportCell::Text(sku),
                ExportCell::Money(cost),
            ]);
            body.push(cells);
        }
        grand_total += subtotal;

        let mut cells = project_cells();
        cells.extend([
            ExportCell::text("Subtotal"),
            ExportCell::Blank,
            ExportCell::Money(subtotal),
        ]);
        body.push(cells);
    }

    let mut foot = vec![ExportCell::text(GRAND_TOTAL_LABEL)];
    foot.extend(std::iter::repeat(ExportCell::Blank).take(6));
    foot.push(ExportCell::Money(grand_total));

    let suffix = match period {
        Period::All => String::new(),
        Period::Month(m) => format!("_{}", m.token()),
        Period::Quarter(q) => format!("_{}", q.label()),
    };

    ExportTable {
        title: format!("Service Cost Detail {} {year}", period.label()),
        file_stem: format!("billing_detail_{year}{suffix}"),
        head: [
            "Project Name",
            "Project Code",
            "Environment",
            "Owner",
            "Team",
            "Service",
            "SKU",
            "Cost",
        ]
        .map(String::from)
        .to_vec(),
        body,
        foot: vec![foot],
        spacer_before_foot: true,
    }
}

pub fn report_table(
    groups: &[ChartGroup],
    dimension: ReportDimension,
    period: Period,
    year: i32,
) -> ExportTable {
    let quarter = match period {
        Period::Quarter(q) => Some(q.label()),
        _ => None,
    };
    let title = match quarter {
        Some(q) => format!("Cost Report by {} for {year} - {q}", dimension.title()),
        None => format!("Cost Report by {} for {year}", dimension.title()),
    };
    let file_stem = match quarter {
        Some(q) => format!("cost_report_{}_{year}_{q}", dimension.as_str()),
        None => format!("cost_report_{}_{year}", dimension.as_str()),
    };

    let body = groups
        .iter()
        .map(|g| vec![ExportCell::text(g.name.as_str()), ExportCell::Money(g.total_cost)])
        .collect();
    let total: f64 = groups.iter().map(|g| g.total_cost).sum();

    ExportTable {
        title,
        file_stem,
        head: vec![dimension.title().to_string(), "TotalCost".to_string()],
        body,
        foot: vec![vec![ExportCell::text(GRAND_TOTAL_LABEL), ExportCell::Money(total)]],
        spacer_before_foot: false,
    }
}

pub fn budget_table(rows: &[BudgetRow], period: Period, year: i32) -> ExportTable {
    let mut body = Vec::new();
    for row in rows {
        for month in Month::ALL.into_iter().filter(|m| period.contains(*m)) {
            let cell = row.month(month);
            if cell.is_empty() {
                continue;
            }
            body.push(vec![
                ExportCell::text(row.project_name.as_str()),
                ExportCell::optional(row.project_code.as_deref()),
                ExportCell::Text(month.header()),
                ExportCell::Money(cell.budget),
                ExportCell::Money(cell.actual),
                ExportCell::Money(cell.remaining),
            ]);
        }
    }

    let (budget, actual) = rows
        .iter()
        .map(|r| r.period_total(period))
        .fold((0.0, 0.0), |(b, a), cell| (b + cell.budget, a + cell.actual));

    let suffix = match period {
        Period::All => String::new(),
        Period::Month(m) => format!("_{}", m.token()),
        Period::Quarter(q) => format!("_{}", q.label()),
    };

    ExportTable {
        title: format!("Budget vs Actual {} {year}", period.label()),
        file_stem: format!("budget_vs_actual_{year}{suffix}"),
        head: ["Project Name", "Project Code", "Month", "Budget", "Actual", "Remaining"]
            .map(String::from)
            .to_vec(),
        body,
        foot: vec![vec![
            ExportCell::text(GRAND_TOTAL_LABEL),
            ExportCell::Blank,
            ExportCell::Blank,
            ExportCell::Money(budget),
            ExportCell::Money(actual),
            ExportCell::Money(budget - actual),
        ]],
        spacer_before_foot: true,
    }
}

pub fn csv_text(raw: &str) -> String {
    format!("\"{}\"", raw.replace('"', "\"\""))
}

fn csv_cell(cell: &ExportCell) -> String {
    match cell {
        ExportCell::Text(s) => csv_text(s),
        ExportCell::Money(n) => n.to_string(),
        ExportCell::Blank => String::new(),
    }
}

pub fn to_csv(table: &ExportTable) -> String {
    let mut lines = vec![table.head.join(",")];
    let row = |cells: &Vec<ExportCell>| cells.iter().map(csv_cell).collect::<Vec<_>>().join(",");
    lines.extend(table.body.iter().map(row));
    if table.spacer_before_foot && !table.foot.is_empty() {
        lines.push(String::new());
    }
    lines.extend(table.foot.iter().map(row));
    lines.join("\n")
}

fn print_cell(cell: &ExportCell) -> String {
    match cell {
        ExportCell::Text(s) => s.clone(),
        ExportCell::Money(n) => format_currency(*n),
        ExportCell::Blank => String::new(),
    }
}

pub fn to_printable(table: &ExportTable, generated_on: &str) -> String {
    let rendered: Vec<Vec<String>> = table
        .body
        .iter()
        .chain(table.foot.iter())
        .map(|cells| cells.iter().map(print_cell).collect())
        .collect();

    let mut widths: Vec<usize> = table.head.iter().map(|h| h.chars().count()).collect();
    for row in &rendered {
        for (i, cell) in row.iter().enumerate() {
            if let Some(w) = widths.get_mut(i) {
                *w = (*w).max(cell.chars().count());
            }
        }
    }

    let numeric: Vec<bool> = (0..widths.len())
        .map(|i| {
            table
                .body
                .iter()
                .chain(table.foot.iter())
                .any(|r| matches!(r.get(i), Some(ExportCell::Money(_))))
        })
        .collect();

    let line = |cells: &[String]| {
        let mut out = String::new();
        for (i, cell) in cells.iter().enumerate() {
            let width = widths.get(i).copied().unwrap_or(0);
            if i > 0 {
                out.push_str("  ");
            }
            if numeric.get(i).copied().unwrap_or(false) {
                let _ = write!(out, "{cell:>width$}");
            } else {
                let _ = write!(out, "{cell:<width$}");
            }
        }
        out.trim_end().to_string()
    };

    let rule = "-".repeat(widths.iter().sum::<usize>() + 2 * widths.len().saturating_sub(1));
    let body_len = table.body.len();

    let mut out = Vec::new();
    out.push(table.title.clone());
    out.push(format!("Generated on: {generated_on}"));
    out.push(String::new());
    out.push(line(&table.head));
    out.push(rule.clone());
    out.extend(rendered[..body_len].iter().map(|r| line(r)));
    if !table.foot.is_empty() {
        out.push(rule);
        out.extend(rendered[body_len..].iter().map(|r| line(r)));
    }
    out.join("\n")
}

pub fn to_json(table: &ExportTable) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(table)
}

// Everything `encodeURI` leaves untouched besides alphanumerics.
const ENCODE_URI: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b';')
    .remove(b',')
    .remove(b'/')
    .remove(b'?')
    .remove(b':')
    .remove(b'@')
    .remove(b'&')
    .remove(b'=')
    .remove(b'+')
    .remove(b'$')
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')')
    .remove(b'#');

pub fn csv_data_uri(csv: &str) -> String {
    format!("data:text/csv;charset=utf-8,{}", utf8_percent_encode(csv, ENCODE_URI))
}
