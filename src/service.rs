use crate::aggregator::aggregate_years;
use crate::client::{BillingSource, HttpBillingApi};
use crate::config::{get_access_token, AppConfig};
use crate::error::AppError;
use crate::forecast::ForecastScope;
use crate::models::{Anomaly, ForecastPoint, Platform, ProjectMetaMap, YearlyBilling};
use crate::storage::Storage;
use chrono::{DateTime, Utc};
use reqwest::Client;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Monotonic sequence for fetch requests. A response is applied only when
/// its generation is still the latest one issued.
#[derive(Debug, Default)]
pub struct RequestGeneration(AtomicU64);

impl RequestGeneration {
    pub fn issue(&self) -> u64 {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn is_current(&self, generation: u64) -> bool {
        self.0.load(Ordering::SeqCst) == generation
    }
}

#[derive(Debug, Default)]
pub struct DataVersion(AtomicU64);

impl DataVersion {
    pub fn new(start: u64) -> Self {
        Self(AtomicU64::new(start))
    }

    pub fn current(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }

    pub fn bump(&self) -> u64 {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchKey {
    pub platform: Platform,
    pub year: i32,
    pub data_version: u64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadedBilling {
    pub billing: YearlyBilling,
    pub meta: ProjectMetaMap,
}

pub struct RefreshReport {
    pub platform: Platform,
    pub line_items: usize,
    pub projects: usize,
    pub data_version: u64,
    pub fetched_at: DateTime<Utc>,
    pub duration_ms: u128,
}

pub struct BillingService {
    client: Client,
}

impl BillingService {
    pub fn new() -> Result<Self, AppError> {
        let client = Client::builder()
            .connect_timeout(std::time::Duration::from_secs(10))
            .timeout(std::time::Duration::from_secs(30))
            .build()?;
        Ok(Self { client })
    }

    pub fn source(&self, cfg: &AppConfig) -> Result<HttpBillingApi, AppError> {
        let token = get_access_token()?;
        HttpBillingApi::new(self.client.clone(), &cfg.api_base_url, token)
    }
}

/// Dashboard fetch cycle: one line-item fetch covering every year, then
/// metadata. Never fails; a broken fetch degrades to empty collections.
pub async fn load_yearly<S: BillingSource + ?Sized>(
    source: &S,
    platform: Platform,
    year: i32,
) -> LoadedBilling {
    let items = match source.fetch_line_items(platform).await {
        Ok(items) => items,
        Err(e) => {
            tracing::error!(%platform, year, error = %e, "billing fetch failed");
            return LoadedBilling::default();
        }
    };

    let meta = match source.fetch_project_meta(platform).await {
        Ok(meta) => meta,
        Err(e) => {
            tracing::warn!(%platform, error = %e, "project metadata fetch failed");
            ProjectMetaMap::new()
        }
    };

    let billing = aggregate_years(&items, year, Some(&meta));
    tracing::debug!(
        %platform,
        year,
        projects = billing.current.len(),
        "billing loaded"
    );
    LoadedBilling { billing, meta }
}

pub fn load_snapshot(storage: &Storage, platform: Platform, year: i32) -> Result<LoadedBilling, AppError> {
    let items = storage.load_line_items(platform, &[year, year - 1])?;
    let meta = storage.load_meta(platform)?;
    let billing = aggregate_years(&items, year, Some(&meta));
    Ok(LoadedBilling { billing, meta })
}

pub async fn load_forecast<S: BillingSource + ?Sized>(
    source: &S,
    scope: &ForecastScope,
    year: i32,
) -> Vec<ForecastPoint> {
    match source.fetch_forecast(scope, year).await {
        Ok(points) => points,
        Err(e) => {
            tracing::warn!(year, error = %e, "forecast fetch failed");
            Vec::new()
        }
    }
}

pub async fn load_anomalies<S: BillingSource + ?Sized>(source: &S, platform: Platform) -> Vec<Anomaly> {
    match source.fetch_anomalies(platform).await {
        Ok(anomalies) => anomalies,
        Err(e) => {
            tracing::warn!(%platform, error = %e, "anomaly fetch failed");
            Vec::new()
        }
    }
}

pub async fn acknowledge_anomaly<S: BillingSource + ?Sized>(
    source: &S,
    id: i64,
    version: &DataVersion,
) -> Result<u64, AppError> {
    source.acknowledge_anomaly(id).await?;
    let next = version.bump();
    tracing::info!(id, data_version = next, "anomaly acknowledged");
    Ok(next)
}

/// Explicit refresh: unlike the dashboard cycle, fetch errors propagate.
pub async fn refresh<S: BillingSource + ?Sized>(
    source: &S,
    platform: Platform,
    year: i32,
    storage: &mut Storage,
) -> Result<RefreshReport, AppError> {
    let started = Instant::now();
    let items = source.fetch_line_items(platform).await?;
    let meta = source.fetch_project_meta(platform).await?;

    let fetched_at = Utc::now();
    let data_version = storage.replace_snapshot(platform, &items, &meta, fetched_at)?;
    tracing::info!(%platform, year, rows = items.len(), data_version, "snapshot stored");

    Ok(RefreshReport {
        platform,
        line_items: items.len(),
        projects: meta.len(),
        data_version,
        fetched_at,
        duration_ms: started.elapsed().as_millis(),
    })
}
