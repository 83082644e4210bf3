use crate::error::AppError;
use crate::forecast::ForecastScope;
use crate::models::{
    Anomaly, BillingLineItem, Budget, ForecastPoint, ForecastResponse, Platform, ProjectMetaMap,
};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use url::Url;

pub const TOKEN_HEADER: &str = "x-access-token";

#[async_trait]
pub trait BillingSource: Send + Sync {
    /// Every stored year for the platform in one response.
    async fn fetch_line_items(&self, platform: Platform) -> Result<Vec<BillingLineItem>, AppError>;

    async fn fetch_project_meta(&self, platform: Platform) -> Result<ProjectMetaMap, AppError>;

    async fn fetch_forecast(
        &self,
        scope: &ForecastScope,
        year: i32,
    ) -> Result<Vec<ForecastPoint>, AppError>;

    async fn fetch_budgets(&self, year: i32) -> Result<Vec<Budget>, AppError>;

    async fn fetch_anomalies(&self, platform: Platform) -> Result<Vec<Anomaly>, AppError>;

    async fn acknowledge_anomaly(&self, id: i64) -> Result<(), AppError>;
}

pub struct HttpBillingApi {
    client: Client,
    base: Url,
    token: String,
}

impl HttpBillingApi {
    pub fn new(client: Client, base_url: &str, token: String) -> Result<Self, AppError> {
        let base = Url::parse(base_url)?;
        if base.cannot_be_a_base() {
            return Err(AppError::Config(format!(
                "API base URL '{base_url}' cannot carry a path."
            )));
        }
        Ok(Self {
            client,
            base,
            token,
        })
    }

    fn endpoint(&self, segments: &[&str], query: &[(&str, &str)]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }
        url
    }

    async fn send(&self, request: RequestBuilder, endpoint: &Url) -> Result<reqwest::Response, AppError> {
        let response = request.header(TOKEN_HEADER, &self.token).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(AppError::Api {
                endpoint: endpoint.path().to_string(),
                status: status.as_u16(),
            });
        }
        Ok(response)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, AppError> {
        tracing::debug!(url = %url, "GET");
        let response = self.send(self.client.get(url.clone()), &url).await?;
        Ok(response.json().await?)
    }
}

#[async_trait]
impl BillingSource for HttpBillingApi {
    async fn fetch_line_items(&self, platform: Platform) -> Result<Vec<BillingLineItem>, AppError> {
        let url = self.endpoint(&["billing", "services"], &[("platform", platform.as_str())]);
        self.get_json(url).await
    }

    async fn fetch_project_meta(&self, platform: Platform) -> Result<ProjectMetaMap, AppError> {
        let url = self.endpoint(&["projects", "meta", "all"], &[("platform", platform.as_str())]);
        self.get_json(url).await
    }

    async fn fetch_forecast(
        &self,
        scope: &ForecastScope,
        year: i32,
    ) -> Result<Vec<ForecastPoint>, AppError> {
        let year = year.to_string();
        let url = match scope {
            ForecastScope::Suppressed => return Ok(Vec::new()),
            ForecastScope::AllProjects => self.endpoint(&["forecasting", "all", &year], &[]),
            ForecastScope::Project(id) => {
                let id = id.to_string();
                self.endpoint(&["forecasting", "project", &id, &year], &[])
            }
        };
        let body: ForecastResponse = self.get_json(url).await?;
        Ok(body.forecast)
    }

    async fn fetch_budgets(&self, year: i32) -> Result<Vec<Budget>, AppError> {
        let year = year.to_string();
        let url = self.endpoint(&["budgets", &year], &[]);
        self.get_json(url).await
    }

    async fn fetch_anomalies(&self, platform: Platform) -> Result<Vec<Anomaly>, AppError> {
        let url = self.endpoint(&["anomalies", "unread"], &[("platform", platform.as_str())]);
        self.get_json(url).await
    }

    async fn acknowledge_anomaly(&self, id: i64) -> Result<(), AppError> {
        let id = id.to_string();
        let url = self.endpoint(&["anomalies", &id, "acknowledge"], &[]);
        tracing::debug!(url = %url, "PUT");
        self.send(self.client.put(url.clone()), &url).await?;
        Ok(())
    }
}
