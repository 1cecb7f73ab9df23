// Jellyfin HTTP client
//
// Thin wrapper over the handful of Jellyfin endpoints the notifier needs:
// reachability/key check, library listing and refresh triggers.

use reqwest::{Client, StatusCode};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{JellyfinError, Result};
use crate::folders::{sort_folders, FoldersResponse, VirtualFolder};
use jellyfin_notifier_batch::Credentials;

const TOKEN_HEADER: &str = "X-Emby-Token";

/// Per-call timeouts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientSettings {
    /// Ping and library listing
    pub request_timeout: Duration,
    /// Refresh triggers
    pub refresh_timeout: Duration,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(5),
            refresh_timeout: Duration::from_secs(10),
        }
    }
}

/// Client bound to one Jellyfin server.
#[derive(Clone)]
pub struct JellyfinClient {
    http: Client,
    base_url: String,
    api_key: String,
    settings: ClientSettings,
}

impl JellyfinClient {
    /// `http` is shared across clients so connections are pooled.
    pub fn new(http: Client, credentials: &Credentials, settings: ClientSettings) -> Self {
        Self {
            http,
            base_url: credentials.base_url().to_string(),
            api_key: credentials.api_key().to_string(),
            settings,
        }
    }

    /// Check the server is reachable and accepts the API key.
    pub async fn ping(&self) -> Result<String> {
        self.http
            .get(&self.base_url)
            .timeout(self.settings.request_timeout)
            .send()
            .await
            .map_err(|source| {
                warn!(error = %source, "Jellyfin ping failed: host unreachable");
                JellyfinError::Unreachable { source }
            })?;

        let response = self
            .http
            .get(format!("{}/System/Info", self.base_url))
            .header(TOKEN_HEADER, &self.api_key)
            .timeout(self.settings.request_timeout)
            .send()
            .await
            .map_err(|source| {
                warn!(error = %source, "Jellyfin /System/Info request failed");
                JellyfinError::Unreachable { source }
            })?;

        match response.status() {
            StatusCode::OK => Ok("Jellyfin connection and API key OK".to_string()),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                let status = response.status().as_u16();
                warn!(status, "Jellyfin API key rejected");
                Err(JellyfinError::KeyRejected { status })
            }
            other => {
                warn!(status = other.as_u16(), "Jellyfin /System/Info failed");
                Err(JellyfinError::UnexpectedStatus {
                    status: other.as_u16(),
                })
            }
        }
    }

    /// List the server's libraries, sorted by lower-cased name then id.
    pub async fn fetch_virtual_folders(&self) -> Result<Vec<VirtualFolder>> {
        let response = self
            .http
            .get(format!("{}/Library/VirtualFolders", self.base_url))
            .header(TOKEN_HEADER, &self.api_key)
            .query(&[("api_key", self.api_key.as_str())])
            .timeout(self.settings.request_timeout)
            .send()
            .await
            .map_err(|source| {
                warn!(error = %source, "Jellyfin virtual folders request failed");
                JellyfinError::FoldersUnreachable { source }
            })?;

        let status = response.status();
        if status != StatusCode::OK {
            warn!(status = status.as_u16(), "Jellyfin virtual folders request failed");
            return Err(match status {
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => JellyfinError::FoldersRejected {
                    status: status.as_u16(),
                },
                _ => JellyfinError::FoldersStatus {
                    status: status.as_u16(),
                },
            });
        }

        let mut folders = response
            .json::<FoldersResponse>()
            .await
            .map_err(|e| {
                warn!(error = %e, "Jellyfin virtual folders parse failed");
                JellyfinError::FoldersParse
            })?
            .into_vec();
        sort_folders(&mut folders);

        info!(count = folders.len(), "Jellyfin virtual folders");
        for folder in &folders {
            let locations = folder.paths();
            let locations = if locations.is_empty() {
                "-".to_string()
            } else {
                locations.join(", ")
            };
            debug!(
                name = folder.name.as_deref().unwrap_or("-"),
                item_id = folder.library_id().unwrap_or("-"),
                collection_type = folder.collection_type.as_deref().unwrap_or("-"),
                locations = %locations,
                "Virtual folder"
            );
        }

        Ok(folders)
    }

    /// Refresh the given libraries, or the whole server when `library_ids`
    /// is `None` or empty.
    pub async fn refresh(&self, library_ids: Option<&[String]>) -> Result<String> {
        match library_ids {
            Some(ids) if !ids.is_empty() => self.refresh_libraries(ids).await,
            _ => self.refresh_all().await,
        }
    }

    async fn refresh_all(&self) -> Result<String> {
        let response = self
            .http
            .post(format!("{}/Library/Refresh", self.base_url))
            .header(TOKEN_HEADER, &self.api_key)
            .timeout(self.settings.refresh_timeout)
            .send()
            .await
            .map_err(|source| {
                warn!(error = %source, "Jellyfin refresh request failed");
                JellyfinError::RefreshUnreachable { source }
            })?;

        if response.status() == StatusCode::NO_CONTENT {
            return Ok("Triggered Jellyfin refresh".to_string());
        }

        let status = response.status().as_u16();
        warn!(status, "Jellyfin refresh failed");
        Err(JellyfinError::RefreshStatus { status })
    }

    async fn refresh_libraries(&self, ids: &[String]) -> Result<String> {
        let mut failures = Vec::new();

        for id in ids {
            let result = self
                .http
                .post(format!("{}/Items/{}/Refresh", self.base_url, id))
                .header(TOKEN_HEADER, &self.api_key)
                .query(&[("Recursive", "true")])
                .timeout(self.settings.refresh_timeout)
                .send()
                .await;

            match result {
                Ok(response) if response.status() == StatusCode::NO_CONTENT => {
                    info!(library_id = %id, "Triggered Jellyfin refresh for library");
                }
                Ok(response) => {
                    let status = response.status().as_u16();
                    warn!(library_id = %id, status, "Jellyfin refresh failed for library");
                    failures.push(format!("{} (status {})", id, status));
                }
                Err(e) => {
                    warn!(library_id = %id, error = %e, "Jellyfin refresh failed for library");
                    failures.push(format!("{} (error)", id));
                }
            }
        }

        if failures.is_empty() {
            Ok("Triggered Jellyfin refresh for selected libraries".to_string())
        } else {
            Err(JellyfinError::LibraryRefresh { failures })
        }
    }
}
