use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::config::Config;

/// File-backed registry for alert preferences, notification channels, and
/// sponsored-post requests. The store is the sole source of truth: handlers
/// hold no copy of any record beyond the duration of one request.
#[derive(Clone)]
pub struct RegistryStore {
    state: Arc<RwLock<RegistryState>>,
    path: Option<PathBuf>,
}

#[derive(Debug, Error)]
pub enum RegistryStoreError {
    #[error("record not found")]
    NotFound,
    #[error("forbidden")]
    Forbidden,
    #[error("{field}: {message}")]
    Validation {
        field: &'static str,
        message: String,
    },
    #[error("{message}")]
    Persistence { message: String },
}

pub fn alert_key(fid: &str, token_address: &str) -> String {
    format!("marketcap-alert{fid}:{token_address}")
}

pub fn sponsored_request_key(request_id: &str) -> String {
    format!("sponsored-request:{request_id}")
}

pub fn incoming_requests_key(fid: &str) -> String {
    format!("user:{fid}:sponsored-requests")
}

pub fn sent_requests_key(fid: &str) -> String {
    format!("user:{fid}:sent-requests")
}

pub fn notification_channel_key(fid: &str) -> String {
    format!("user:{fid}")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertPreference {
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub token_address: String,
    pub token_name: String,
    pub market_cap_target: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationChannel {
    pub token: String,
    pub url: String,
}

/// Lifecycle of a sponsored-post request. `Accepted` is declared but no
/// transition produces it: `accept` goes straight to `Posted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Pending,
    Accepted,
    Rejected,
    Posted,
}

impl RequestStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
            Self::Posted => "posted",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SponsoredRequest {
    pub request_id: String,
    pub target_fid: String,
    pub requester_fid: String,
    pub content: String,
    /// USDC amount as the caller supplied it. Kept as a string end to end so
    /// the value survives round-trips without numeric coercion.
    pub amount: String,
    pub requester_username: String,
    /// Unix milliseconds.
    pub created_at: i64,
    pub status: RequestStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cast_hash: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CreateSponsoredRequestInput {
    pub target_fid: String,
    pub requester_fid: String,
    pub content: String,
    pub amount: String,
    pub requester_username: String,
}

/// Which per-user index a listing reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestDirection {
    Incoming,
    Sent,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct RegistryState {
    #[serde(default)]
    alerts: HashMap<String, AlertPreference>,
    #[serde(default)]
    notification_channels: HashMap<String, NotificationChannel>,
    #[serde(default)]
    sponsored_requests: HashMap<String, SponsoredRequest>,
    /// Ordered id lists keyed by `user:{fid}:sponsored-requests` and
    /// `user:{fid}:sent-requests`; newest id sits at the head.
    #[serde(default)]
    request_indexes: HashMap<String, Vec<String>>,
}

impl RegistryStore {
    pub fn from_config(config: &Config) -> Self {
        let path = config.store_path.clone();
        let state = Self::load_state(path.as_ref());

        Self {
            state: Arc::new(RwLock::new(state)),
            path,
        }
    }

    pub async fn set_alert(
        &self,
        fid: &str,
        preference: AlertPreference,
    ) -> Result<AlertPreference, RegistryStoreError> {
        if preference.enabled && preference.market_cap_target.trim().is_empty() {
            return Err(RegistryStoreError::Validation {
                field: "marketCapTarget",
                message: "required when the alert is enabled".to_string(),
            });
        }

        let key = alert_key(fid, &preference.token_address);
        self.mutate(|state| {
            state.alerts.insert(key, preference.clone());
            Ok(preference.clone())
        })
        .await
    }

    pub async fn alert(&self, fid: &str, token_address: &str) -> Option<AlertPreference> {
        let state = self.state.read().await;
        state.alerts.get(&alert_key(fid, token_address)).cloned()
    }

    pub async fn remove_alert(
        &self,
        fid: &str,
        token_address: &str,
    ) -> Result<(), RegistryStoreError> {
        let key = alert_key(fid, token_address);
        self.mutate(|state| {
            state.alerts.remove(&key);
            Ok(())
        })
        .await
    }

    /// All of a user's alerts with `enabled=true`, in key order.
    pub async fn enabled_alerts(&self, fid: &str) -> Vec<AlertPreference> {
        let prefix = format!("marketcap-alert{fid}:");
        let state = self.state.read().await;
        let mut entries: Vec<(&String, &AlertPreference)> = state
            .alerts
            .iter()
            .filter(|(key, alert)| key.starts_with(&prefix) && alert.enabled)
            .collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        entries.into_iter().map(|(_, alert)| alert.clone()).collect()
    }

    pub async fn set_notification_channel(
        &self,
        fid: &str,
        channel: NotificationChannel,
    ) -> Result<(), RegistryStoreError> {
        let key = notification_channel_key(fid);
        self.mutate(|state| {
            state.notification_channels.insert(key, channel);
            Ok(())
        })
        .await
    }

    pub async fn notification_channel(&self, fid: &str) -> Option<NotificationChannel> {
        let state = self.state.read().await;
        state
            .notification_channels
            .get(&notification_channel_key(fid))
            .cloned()
    }

    /// Writes the pending record and pushes its id onto the target's incoming
    /// index and the requester's sent index. All three writes happen under one
    /// lock and one persist, so a crash cannot leave the record and its index
    /// entries out of sync.
    pub async fn create_sponsored_request(
        &self,
        input: CreateSponsoredRequestInput,
    ) -> Result<SponsoredRequest, RegistryStoreError> {
        let request_id = Uuid::new_v4().to_string();
        let created_at = Utc::now().timestamp_millis();

        let record = SponsoredRequest {
            request_id: request_id.clone(),
            target_fid: input.target_fid.trim().to_string(),
            requester_fid: input.requester_fid.trim().to_string(),
            content: input.content,
            amount: input.amount,
            requester_username: input.requester_username,
            created_at,
            status: RequestStatus::Pending,
            cast_hash: None,
        };

        self.mutate(|state| {
            state
                .sponsored_requests
                .insert(sponsored_request_key(&record.request_id), record.clone());
            state
                .request_indexes
                .entry(incoming_requests_key(&record.target_fid))
                .or_default()
                .insert(0, record.request_id.clone());
            state
                .request_indexes
                .entry(sent_requests_key(&record.requester_fid))
                .or_default()
                .insert(0, record.request_id.clone());
            Ok(record.clone())
        })
        .await
    }

    pub async fn sponsored_request(&self, request_id: &str) -> Option<SponsoredRequest> {
        let state = self.state.read().await;
        state
            .sponsored_requests
            .get(&sponsored_request_key(request_id))
            .cloned()
    }

    /// Resolves a user's index list, dropping ids that no longer point at a
    /// record, newest first.
    pub async fn requests_for_user(
        &self,
        fid: &str,
        direction: RequestDirection,
    ) -> Vec<SponsoredRequest> {
        let index_key = match direction {
            RequestDirection::Incoming => incoming_requests_key(fid),
            RequestDirection::Sent => sent_requests_key(fid),
        };

        let state = self.state.read().await;
        let Some(ids) = state.request_indexes.get(&index_key) else {
            return Vec::new();
        };

        let mut requests: Vec<SponsoredRequest> = ids
            .iter()
            .filter_map(|id| state.sponsored_requests.get(&sponsored_request_key(id)))
            .cloned()
            .collect();
        // Ids are already head-pushed newest first; the stable sort keeps that
        // order for equal timestamps.
        requests.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        requests
    }

    /// Applies a status transition. Only the record's target may respond; the
    /// comparison is against the trimmed fid string, since callers deliver
    /// fids as either numbers or strings.
    pub async fn respond_to_request(
        &self,
        request_id: &str,
        responder_fid: &str,
        status: RequestStatus,
        cast_hash: Option<String>,
    ) -> Result<SponsoredRequest, RegistryStoreError> {
        let key = sponsored_request_key(request_id);
        let responder = responder_fid.trim().to_string();

        self.mutate(|state| {
            let record = state
                .sponsored_requests
                .get_mut(&key)
                .ok_or(RegistryStoreError::NotFound)?;

            if record.target_fid.trim() != responder {
                return Err(RegistryStoreError::Forbidden);
            }

            record.status = status;
            if let Some(cast_hash) = cast_hash {
                record.cast_hash = Some(cast_hash);
            }
            Ok(record.clone())
        })
        .await
    }

    fn load_state(path: Option<&PathBuf>) -> RegistryState {
        let Some(path) = path else {
            return RegistryState::default();
        };

        let raw = match std::fs::read_to_string(path) {
            Ok(value) => value,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                return RegistryState::default();
            }
            Err(error) => {
                tracing::warn!(
                    target: "coincast.registry",
                    path = %path.display(),
                    error = %error,
                    "failed to read registry store; booting with empty state",
                );
                return RegistryState::default();
            }
        };

        match serde_json::from_str::<RegistryState>(&raw) {
            Ok(state) => state,
            Err(error) => {
                tracing::warn!(
                    target: "coincast.registry",
                    path = %path.display(),
                    error = %error,
                    "failed to parse registry store; booting with empty state",
                );
                RegistryState::default()
            }
        }
    }

    async fn persist_state(&self, snapshot: &RegistryState) -> Result<(), RegistryStoreError> {
        let Some(path) = self.path.as_ref() else {
            return Ok(());
        };

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|error| {
                RegistryStoreError::Persistence {
                    message: format!("failed to prepare registry store directory: {error}"),
                }
            })?;
        }

        let payload =
            serde_json::to_vec(snapshot).map_err(|error| RegistryStoreError::Persistence {
                message: format!("failed to encode registry store payload: {error}"),
            })?;

        let temp_path = path.with_extension(format!("{}.tmp", Uuid::new_v4().simple()));
        tokio::fs::write(&temp_path, payload)
            .await
            .map_err(|error| RegistryStoreError::Persistence {
                message: format!("failed to write registry store payload: {error}"),
            })?;

        tokio::fs::rename(&temp_path, path).await.map_err(|error| {
            RegistryStoreError::Persistence {
                message: format!("failed to finalize registry store payload: {error}"),
            }
        })?;

        Ok(())
    }

    async fn mutate<T, F>(&self, operation: F) -> Result<T, RegistryStoreError>
    where
        F: FnOnce(&mut RegistryState) -> Result<T, RegistryStoreError>,
    {
        let (result, snapshot) = {
            let mut state = self.state.write().await;
            let result = operation(&mut state)?;
            (result, state.clone())
        };

        self.persist_state(&snapshot).await?;
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with_path(path: Option<PathBuf>) -> RegistryStore {
        let mut config = Config::for_tests();
        config.store_path = path;
        RegistryStore::from_config(&config)
    }

    fn sample_alert(enabled: bool) -> AlertPreference {
        AlertPreference {
            enabled,
            token: None,
            url: None,
            token_address: "0xabc".to_string(),
            token_name: "DEGEN".to_string(),
            market_cap_target: "1000000".to_string(),
        }
    }

    fn sample_request_input() -> CreateSponsoredRequestInput {
        CreateSponsoredRequestInput {
            target_fid: "200".to_string(),
            requester_fid: "100".to_string(),
            content: "gm, sponsor me".to_string(),
            amount: "25".to_string(),
            requester_username: "alice".to_string(),
        }
    }

    #[tokio::test]
    async fn set_alert_rejects_enabled_without_target() {
        let store = store_with_path(None);
        let mut alert = sample_alert(true);
        alert.market_cap_target = String::new();

        let error = store
            .set_alert("7", alert)
            .await
            .expect_err("enabled alert without target must fail");
        assert!(matches!(error, RegistryStoreError::Validation { .. }));
    }

    #[tokio::test]
    async fn alert_round_trips_through_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("registry.json");

        let store = store_with_path(Some(path.clone()));
        let written = store
            .set_alert("7", sample_alert(true))
            .await
            .expect("set alert");

        let reloaded = store_with_path(Some(path));
        let read_back = reloaded.alert("7", "0xabc").await.expect("alert present");
        assert_eq!(read_back, written);
        assert_eq!(read_back.market_cap_target, "1000000");
    }

    #[tokio::test]
    async fn corrupt_store_file_boots_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("registry.json");
        std::fs::write(&path, "not json at all").expect("write corrupt file");

        let store = store_with_path(Some(path));
        assert!(store.alert("7", "0xabc").await.is_none());
        assert!(store.enabled_alerts("7").await.is_empty());
    }

    #[tokio::test]
    async fn enabled_alerts_skips_disabled_and_other_users() {
        let store = store_with_path(None);
        store
            .set_alert("7", sample_alert(true))
            .await
            .expect("enabled alert");
        let mut disabled = sample_alert(false);
        disabled.token_address = "0xdef".to_string();
        store.set_alert("7", disabled).await.expect("disabled alert");
        let mut other_user = sample_alert(true);
        other_user.token_address = "0x999".to_string();
        store
            .set_alert("8", other_user)
            .await
            .expect("other user's alert");

        let alerts = store.enabled_alerts("7").await;
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].token_address, "0xabc");
    }

    #[tokio::test]
    async fn create_request_indexes_both_users() {
        let store = store_with_path(None);
        let record = store
            .create_sponsored_request(sample_request_input())
            .await
            .expect("create request");

        assert_eq!(record.status, RequestStatus::Pending);

        let incoming = store
            .requests_for_user("200", RequestDirection::Incoming)
            .await;
        assert_eq!(incoming.len(), 1);
        assert_eq!(incoming[0].request_id, record.request_id);

        let sent = store.requests_for_user("100", RequestDirection::Sent).await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].request_id, record.request_id);

        assert!(
            store
                .requests_for_user("100", RequestDirection::Incoming)
                .await
                .is_empty()
        );
    }

    #[tokio::test]
    async fn listing_drops_dangling_index_entries() {
        let store = store_with_path(None);
        store
            .create_sponsored_request(sample_request_input())
            .await
            .expect("create request");

        {
            let mut state = store.state.write().await;
            state.sponsored_requests.clear();
        }

        assert!(
            store
                .requests_for_user("200", RequestDirection::Incoming)
                .await
                .is_empty()
        );
    }

    #[tokio::test]
    async fn newest_request_lists_first() {
        let store = store_with_path(None);
        store
            .create_sponsored_request(sample_request_input())
            .await
            .expect("first request");
        let mut second = sample_request_input();
        second.content = "second".to_string();
        let second = store
            .create_sponsored_request(second)
            .await
            .expect("second request");

        let incoming = store
            .requests_for_user("200", RequestDirection::Incoming)
            .await;
        assert_eq!(incoming.len(), 2);
        assert_eq!(incoming[0].request_id, second.request_id);
    }

    #[tokio::test]
    async fn respond_enforces_target_ownership() {
        let store = store_with_path(None);
        let record = store
            .create_sponsored_request(sample_request_input())
            .await
            .expect("create request");

        let error = store
            .respond_to_request(&record.request_id, "999", RequestStatus::Posted, None)
            .await
            .expect_err("non-target must be rejected");
        assert!(matches!(error, RegistryStoreError::Forbidden));

        let untouched = store
            .sponsored_request(&record.request_id)
            .await
            .expect("record present");
        assert_eq!(untouched.status, RequestStatus::Pending);
    }

    #[tokio::test]
    async fn respond_merges_cast_hash() {
        let store = store_with_path(None);
        let record = store
            .create_sponsored_request(sample_request_input())
            .await
            .expect("create request");

        let updated = store
            .respond_to_request(
                &record.request_id,
                " 200 ",
                RequestStatus::Posted,
                Some("0xcast".to_string()),
            )
            .await
            .expect("target responds");
        assert_eq!(updated.status, RequestStatus::Posted);
        assert_eq!(updated.cast_hash.as_deref(), Some("0xcast"));
    }

    #[tokio::test]
    async fn respond_to_unknown_request_is_not_found() {
        let store = store_with_path(None);
        let error = store
            .respond_to_request("missing", "200", RequestStatus::Rejected, None)
            .await
            .expect_err("unknown id must fail");
        assert!(matches!(error, RegistryStoreError::NotFound));
    }
}
