use crate::chart::ReportDimension;
use crate::models::{
    Anomaly, ForecastPoint, Month, Period, Platform, ProjectYearlyAggregate, Quarter,
};
use crate::service::{FetchKey, LoadedBilling};
use crate::table::{ProjectFilter, SortConfig, SortKey};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tab {
    Billing,
    Dashboard,
    Reports,
}

impl Tab {
    pub const ALL: [Tab; 3] = [Tab::Billing, Tab::Dashboard, Tab::Reports];

    pub fn title(self) -> &'static str {
        match self {
            Tab::Billing => "Billing",
            Tab::Dashboard => "Dashboard",
            Tab::Reports => "Reports",
        }
    }

    pub fn index(self) -> usize {
        Tab::ALL.iter().position(|t| *t == self).unwrap_or(0)
    }

    pub fn next(self) -> Tab {
        Tab::ALL[(self.index() + 1) % Tab::ALL.len()]
    }

    pub fn previous(self) -> Tab {
        Tab::ALL[(self.index() + Tab::ALL.len() - 1) % Tab::ALL.len()]
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Screen {
    Main,
    ServiceBreakdown { project: String, month: Month },
    ProjectPicker,
    Search,
    Confirm(ConfirmAction),
    ErrorDialog,
    InfoDialog,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmAction {
    Quit,
    AcknowledgeAnomaly { id: i64, project: String },
}

#[derive(Debug, Clone)]
pub struct AppState {
    pub running: bool,
    pub status: String,
    pub last_refresh: String,
    pub loading: bool,
    pub offline: bool,

    pub platform: Platform,
    pub year: i32,
    pub period: Period,
    pub dark: bool,
    pub top_n: usize,

    pub tab: Tab,
    pub screen: Screen,
    pub previous_screen: Screen,

    pub data: LoadedBilling,
    pub forecast: Vec<ForecastPoint>,
    pub anomalies: Vec<Anomaly>,

    pub sort: SortConfig,
    pub filter: ProjectFilter,
    pub report_dimension: ReportDimension,

    pub cursor_row: usize,
    /// 0 is the project column, 1..=12 the months, 13 the total.
    pub cursor_col: usize,
    pub segment_selected: usize,
    pub anomaly_selected: usize,
    pub picker_selected: usize,
    pub search_draft: String,
    pub confirm_selected: usize,
    pub error_message: String,
    pub info_message: String,
}

impl AppState {
    pub fn new(platform: Platform, year: i32, dark: bool, top_n: usize) -> Self {
        Self {
            running: true,
            status: "ready".into(),
            last_refresh: "never".into(),
            loading: false,
            offline: false,
            platform,
            year,
            period: Period::All,
            dark,
            top_n,
            tab: Tab::Billing,
            screen: Screen::Main,
            previous_screen: Screen::Main,
            data: LoadedBilling::default(),
            forecast: Vec::new(),
            anomalies: Vec::new(),
            sort: SortConfig::default(),
            filter: ProjectFilter::default(),
            report_dimension: ReportDimension::Team,
            cursor_row: 0,
            cursor_col: 0,
            segment_selected: 0,
            anomaly_selected: 0,
            picker_selected: 0,
            search_draft: String::new(),
            confirm_selected: 0,
            error_message: String::new(),
            info_message: String::new(),
        }
    }

    pub fn fetch_key(&self, data_version: u64) -> FetchKey {
        FetchKey {
            platform: self.platform,
            year: self.year,
            data_version,
        }
    }

    pub fn visible_projects(&self) -> Vec<&ProjectYearlyAggregate> {
        self.filter.apply(&self.data.billing.current, &self.data.meta)
    }

    pub fn visible_previous_projects(&self) -> Vec<&ProjectYearlyAggregate> {
        self.filter.apply(&self.data.billing.previous, &self.data.meta)
    }

    pub fn environments(&self) -> Vec<String> {
        self.data
            .meta
            .values()
            .filter_map(|m| m.environment.clone())
            .filter(|e| !e.is_empty())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn cycle_environment(&mut self) {
        let envs = self.environments();
        self.filter.environment = match self.filter.environment.as_deref() {
            None => envs.first().cloned(),
            Some(current) => envs
                .iter()
                .position(|e| e == current)
                .and_then(|i| envs.get(i + 1))
                .cloned(),
        };
        self.cursor_row = 0;
    }

    pub fn cycle_period(&mut self) {
        self.period = next_period(self.period);
        self.segment_selected = 0;
    }

    pub fn sort_key_at_cursor(&self) -> SortKey {
        match self.cursor_col {
            0 => SortKey::ProjectName,
            col if col <= 12 => Month::from_index(col - 1).map_or(SortKey::Total, SortKey::Month),
            _ => SortKey::Total,
        }
    }

    pub fn month_at_cursor(&self) -> Option<Month> {
        match self.cursor_col {
            col @ 1..=12 => Month::from_index(col - 1),
            _ => None,
        }
    }

    pub fn clamp_cursor(&mut self, rows: usize) {
        self.cursor_row = self.cursor_row.min(rows.saturating_sub(1));
        self.cursor_col = self.cursor_col.min(13);
    }

    pub fn clear_filters(&mut self) {
        self.filter = ProjectFilter::default();
        self.cursor_row = 0;
        self.segment_selected = 0;
    }

    pub fn change_platform(&mut self) {
        self.platform = self.platform.toggle();
        self.clear_filters();
    }

    pub fn change_year(&mut self, delta: i32) {
        self.year += delta;
        self.clear_filters();
    }

    pub fn open(&mut self, screen: Screen) {
        self.previous_screen = self.screen.clone();
        self.screen = screen;
    }
}

pub fn next_period(period: Period) -> Period {
    match period {
        Period::All => Period::Month(Month::Jan),
        Period::Month(m) => match Month::from_index(m.index() + 1) {
            Some(next) => Period::Month(next),
            None => Period::Quarter(Quarter::Q1),
        },
        Period::Quarter(Quarter::Q1) => Period::Quarter(Quarter::Q2),
        Period::Quarter(Quarter::Q2) => Period::Quarter(Quarter::Q3),
        Period::Quarter(Quarter::Q3) => Period::Quarter(Quarter::Q4),
        Period::Quarter(Quarter::Q4) => Period::All,
    }
}
