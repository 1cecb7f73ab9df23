// Refresh flusher
//
// Turns a completed batch into Jellyfin refresh calls. Collection types are
// resolved against the live library list at flush time.

use async_trait::async_trait;
use jellyfin_notifier_batch::{Credentials, FlushCommand, FlushReport, Flusher, LibraryScope};
use tracing::debug;

use crate::client::{ClientSettings, JellyfinClient};
use crate::error::JellyfinError;
use crate::folders::{merge_ids, select_library_ids_by_collection};

/// Production [`Flusher`] talking to the Jellyfin server named by each batch.
#[derive(Clone)]
pub struct JellyfinFlusher {
    http: reqwest::Client,
    settings: ClientSettings,
}

impl JellyfinFlusher {
    pub fn new(http: reqwest::Client, settings: ClientSettings) -> Self {
        Self { http, settings }
    }

    pub fn client_for(&self, credentials: &Credentials) -> JellyfinClient {
        JellyfinClient::new(self.http.clone(), credentials, self.settings)
    }
}

#[async_trait]
impl Flusher for JellyfinFlusher {
    async fn flush(&self, command: &FlushCommand) -> anyhow::Result<FlushReport> {
        let client = self.client_for(command.credentials());

        let filter = match &command.scope {
            LibraryScope::All => {
                let message = client.refresh(None).await?;
                return Ok(FlushReport::new(message));
            }
            LibraryScope::Filtered(filter) => filter,
        };

        let explicit: Vec<&str> = filter.library_ids().collect();
        let mut resolved = Vec::new();
        let mut missing = Vec::new();
        let mut available = Vec::new();

        if filter.has_collection_types() {
            let requested: Vec<&str> = filter.collection_types().collect();
            let folders = client.fetch_virtual_folders().await?;
            let selection = select_library_ids_by_collection(&folders, requested.as_slice());
            debug!(
                batch_id = command.batch_id,
                requested = %requested.join(", "),
                selected = %selection.selected.join(", "),
                "resolved collection types"
            );
            resolved = selection.selected;
            missing = selection.missing;
            available = selection.available;
        }

        let ids = merge_ids([
            explicit.iter().map(|id| id.to_string()).collect::<Vec<_>>(),
            resolved,
        ]);
        if ids.is_empty() {
            return Err(JellyfinError::UnknownCollectionTypes { missing, available }.into());
        }

        let message = client.refresh(Some(&ids)).await?;
        if !missing.is_empty() {
            return Err(JellyfinError::UnknownCollectionTypes { missing, available }.into());
        }

        Ok(FlushReport::new(message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use jellyfin_notifier_batch::{FlushTrigger, ScopeKey};
    use serde_json::json;
    use tokio::time::Instant;

    fn command(server: &MockServer, scope: LibraryScope) -> FlushCommand {
        let now = Instant::now();
        FlushCommand {
            key: ScopeKey::for_server(Credentials::new(server.base_url(), "key")),
            batch_id: 1,
            scope,
            event_count: 1,
            first_seen: now,
            last_seen: now,
            trigger: FlushTrigger::Debounce,
        }
    }

    fn flusher() -> JellyfinFlusher {
        JellyfinFlusher::new(reqwest::Client::new(), ClientSettings::default())
    }

    async fn mock_folders(server: &MockServer) {
        server
            .mock_async(|when, then| {
                when.method(GET).path("/Library/VirtualFolders");
                then.status(200).json_body(json!([
                    {"Name": "Movies", "ItemId": "m1", "CollectionType": "movies"},
                    {"Name": "Shows", "ItemId": "s1", "CollectionType": "tvshows"}
                ]));
            })
            .await;
    }

    #[tokio::test]
    async fn all_scope_refreshes_everything() {
        let server = MockServer::start_async().await;
        let refresh = server
            .mock_async(|when, then| {
                when.method(POST).path("/Library/Refresh");
                then.status(204);
            })
            .await;

        let report = flusher()
            .flush(&command(&server, LibraryScope::All))
            .await
            .unwrap();
        assert_eq!(report.message, "Triggered Jellyfin refresh");
        refresh.assert_async().await;
    }

    #[tokio::test]
    async fn collection_types_resolve_and_merge_with_ids() {
        let server = MockServer::start_async().await;
        mock_folders(&server).await;
        let movies = server
            .mock_async(|when, then| {
                when.method(POST).path("/Items/m1/Refresh");
                then.status(204);
            })
            .await;
        let explicit = server
            .mock_async(|when, then| {
                when.method(POST).path("/Items/abc/Refresh");
                then.status(204);
            })
            .await;
        let shows = server
            .mock_async(|when, then| {
                when.method(POST).path("/Items/s1/Refresh");
                then.status(204);
            })
            .await;

        let scope = LibraryScope::from_parts(["abc"], ["movies"]);
        let report = flusher().flush(&command(&server, scope)).await.unwrap();
        assert_eq!(
            report.message,
            "Triggered Jellyfin refresh for selected libraries"
        );
        movies.assert_async().await;
        explicit.assert_async().await;
        assert_eq!(shows.hits_async().await, 0);
    }

    #[tokio::test]
    async fn unknown_types_fail_after_refreshing_known_ones() {
        let server = MockServer::start_async().await;
        mock_folders(&server).await;
        let movies = server
            .mock_async(|when, then| {
                when.method(POST).path("/Items/m1/Refresh");
                then.status(204);
            })
            .await;

        let scope = LibraryScope::collection_types(["movies", "music"]);
        let err = flusher().flush(&command(&server, scope)).await.unwrap_err();
        movies.assert_async().await;

        let err = err.downcast::<JellyfinError>().unwrap();
        assert_eq!(
            err.to_string(),
            "Unknown collection types: music. Available: movies, tvshows"
        );
    }

    #[tokio::test]
    async fn nothing_resolvable_skips_refresh() {
        let server = MockServer::start_async().await;
        mock_folders(&server).await;
        let refresh = server
            .mock_async(|when, then| {
                when.method(POST);
                then.status(204);
            })
            .await;

        let scope = LibraryScope::collection_types(["music"]);
        let err = flusher().flush(&command(&server, scope)).await.unwrap_err();
        assert!(err.to_string().starts_with("Unknown collection types: music"));
        assert_eq!(refresh.hits_async().await, 0);
    }
}
