//! Typed access to the backend collections
//!
//! Each operation is a single request through the [`RequestExecutor`];
//! errors come back unchanged and nothing is retried. Payload types are
//! chosen by the caller: `serde_json::Value` passes records through
//! untouched, the structs in `sentinel_core::types` give typed access.

use reqwest::Method;
use sentinel_core::{ApiError, DashboardStats};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

use crate::executor::RequestExecutor;

pub const USERS_PATH: &str = "/users/";
pub const RESOURCES_PATH: &str = "/resources/";
pub const RESTRICTED_AREAS_PATH: &str = "/restricted-areas/";
pub const ACCESS_LOGS_PATH: &str = "/access-logs/";
pub const DASHBOARD_STATS_PATH: &str = "/dashboard/stats";
pub const HEALTH_PATH: &str = "/health";

/// CRUD handle for one backend collection such as `/resources/`
#[derive(Debug, Clone)]
pub struct Collection {
    executor: Arc<RequestExecutor>,
    path: &'static str,
}

impl Collection {
    pub fn new(executor: Arc<RequestExecutor>, path: &'static str) -> Self {
        Self { executor, path }
    }

    pub fn path(&self) -> &'static str {
        self.path
    }

    fn item(&self, id: i64) -> String {
        format!("{}{}", self.path, id)
    }

    pub async fn list<T: DeserializeOwned>(&self) -> Result<Vec<T>, ApiError> {
        let body = self.executor.get(self.path).await?;
        decode(body)
    }

    /// List with the backend's `skip`/`limit` paging parameters
    pub async fn list_page<T: DeserializeOwned>(
        &self,
        skip: u32,
        limit: u32,
    ) -> Result<Vec<T>, ApiError> {
        let endpoint = format!("{}?skip={}&limit={}", self.path, skip, limit);
        let body = self.executor.get(&endpoint).await?;
        decode(body)
    }

    pub async fn get<T: DeserializeOwned>(&self, id: i64) -> Result<T, ApiError> {
        let body = self.executor.get(&self.item(id)).await?;
        decode(body)
    }

    pub async fn create<T, B>(&self, payload: &B) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let payload = serde_json::to_value(payload)?;
        debug!(collection = self.path, "Creating record");
        let body = self.executor.post(self.path, Some(&payload)).await?;
        decode(body)
    }

    pub async fn update<T, B>(&self, id: i64, payload: &B) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let payload = serde_json::to_value(payload)?;
        debug!(collection = self.path, id, "Updating record");
        let body = self
            .executor
            .request(&self.item(id), Method::PUT, Some(&payload), None)
            .await?;
        decode(body)
    }

    /// Delete a record, returning whatever acknowledgement the backend sent
    pub async fn remove(&self, id: i64) -> Result<Value, ApiError> {
        debug!(collection = self.path, id, "Deleting record");
        self.executor
            .request(&self.item(id), Method::DELETE, None, None)
            .await
    }
}

/// Operation set for every entity the console manages
#[derive(Debug, Clone)]
pub struct ResourceClient {
    executor: Arc<RequestExecutor>,
    users: Collection,
    resources: Collection,
    restricted_areas: Collection,
    access_logs: Collection,
}

impl ResourceClient {
    pub fn new(executor: Arc<RequestExecutor>) -> Self {
        Self {
            users: Collection::new(executor.clone(), USERS_PATH),
            resources: Collection::new(executor.clone(), RESOURCES_PATH),
            restricted_areas: Collection::new(executor.clone(), RESTRICTED_AREAS_PATH),
            access_logs: Collection::new(executor.clone(), ACCESS_LOGS_PATH),
            executor,
        }
    }

    pub fn users(&self) -> &Collection {
        &self.users
    }

    pub fn resources(&self) -> &Collection {
        &self.resources
    }

    pub fn restricted_areas(&self) -> &Collection {
        &self.restricted_areas
    }

    pub fn access_logs(&self) -> &Collection {
        &self.access_logs
    }

    pub async fn grant_area_access(&self, area_id: i64, user_id: i64) -> Result<Value, ApiError> {
        self.area_relation(area_id, "grant-access", user_id).await
    }

    pub async fn revoke_area_access(&self, area_id: i64, user_id: i64) -> Result<Value, ApiError> {
        self.area_relation(area_id, "revoke-access", user_id).await
    }

    async fn area_relation(
        &self,
        area_id: i64,
        relation: &str,
        user_id: i64,
    ) -> Result<Value, ApiError> {
        let endpoint = format!("{}{}/{}/{}", RESTRICTED_AREAS_PATH, area_id, relation, user_id);
        self.executor.post(&endpoint, None).await
    }

    /// Access history of one user
    pub async fn user_access_logs<T: DeserializeOwned>(
        &self,
        user_id: i64,
    ) -> Result<Vec<T>, ApiError> {
        let endpoint = format!("{}user/{}", ACCESS_LOGS_PATH, user_id);
        decode(self.executor.get(&endpoint).await?)
    }

    pub async fn dashboard_stats(&self) -> Result<DashboardStats, ApiError> {
        decode(self.executor.get(DASHBOARD_STATS_PATH).await?)
    }

    /// Unauthenticated liveness probe
    pub async fn health(&self) -> Result<Value, ApiError> {
        self.executor.get(HEALTH_PATH).await
    }
}

fn decode<T: DeserializeOwned>(body: Value) -> Result<T, ApiError> {
    serde_json::from_value(body).map_err(|e| {
        ApiError::contract_violation(200, format!("Unexpected response payload: {}", e))
    })
}
