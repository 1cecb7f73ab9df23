// Webhook normalization
//
// Turns request headers (with config fallbacks) into the credentials, scope
// and coalescing key an event is recorded under.

use axum::http::HeaderMap;
use jellyfin_notifier_batch::{Credentials, LibraryScope, ScopeKey};
use jellyfin_notifier_config::{JellyfinConfig, KeyGrouping};

use crate::AppError;

pub(crate) const URL_HEADER: &str = "x-jellyfin-url";
pub(crate) const API_KEY_HEADER: &str = "x-jellyfin-api-key";
pub(crate) const LIBRARY_IDS_HEADER: &str = "x-jellyfin-library-ids";
pub(crate) const COLLECTION_TYPES_HEADER: &str = "x-jellyfin-collection-types";

/// Trimmed, non-empty header value. A header that is present but not visible
/// ASCII is rejected rather than treated as absent.
pub(crate) fn header_value(headers: &HeaderMap, name: &str) -> Result<Option<String>, AppError> {
    let Some(value) = headers.get(name) else {
        return Ok(None);
    };
    let value = value
        .to_str()
        .map_err(|_| AppError::bad_request(format!("Invalid {} header", name)))?
        .trim();
    Ok((!value.is_empty()).then(|| value.to_string()))
}

/// Where a credential may come from, in priority order. Used to build the
/// "missing credentials" message.
pub(crate) struct CredentialSources {
    pub url: Option<String>,
    pub api_key: Option<String>,
    pub url_hint: &'static str,
    pub api_key_hint: &'static str,
}

impl CredentialSources {
    /// Webhook routes: header, then configured default.
    pub fn webhook(headers: &HeaderMap, defaults: &JellyfinConfig) -> Result<Self, AppError> {
        Ok(Self {
            url: header_value(headers, URL_HEADER)?.or_else(|| non_blank(&defaults.url)),
            api_key: header_value(headers, API_KEY_HEADER)?
                .or_else(|| non_blank(&defaults.api_key)),
            url_hint: "X-Jellyfin-Url or JELLYFIN_URL",
            api_key_hint: "X-Jellyfin-Api-Key or JELLYFIN_API_KEY",
        })
    }

    /// Library listing: header, then query parameter, then configured default.
    pub fn listing(
        headers: &HeaderMap,
        query_url: Option<&str>,
        query_api_key: Option<&str>,
        defaults: &JellyfinConfig,
    ) -> Result<Self, AppError> {
        let from_query = |value: Option<&str>| {
            value
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };

        Ok(Self {
            url: header_value(headers, URL_HEADER)?
                .or_else(|| from_query(query_url))
                .or_else(|| non_blank(&defaults.url)),
            api_key: header_value(headers, API_KEY_HEADER)?
                .or_else(|| from_query(query_api_key))
                .or_else(|| non_blank(&defaults.api_key)),
            url_hint: "X-Jellyfin-Url header, url query param, or JELLYFIN_URL",
            api_key_hint: "X-Jellyfin-Api-Key header, api_key query param, or JELLYFIN_API_KEY",
        })
    }

    pub fn resolve(self) -> Result<Credentials, AppError> {
        match (self.url, self.api_key) {
            (Some(url), Some(api_key)) => Ok(Credentials::new(url, api_key)),
            (url, api_key) => {
                let mut missing = Vec::new();
                if url.is_none() {
                    missing.push(self.url_hint);
                }
                if api_key.is_none() {
                    missing.push(self.api_key_hint);
                }
                Err(AppError::bad_request(format!(
                    "Missing credentials: {}",
                    missing.join(", ")
                )))
            }
        }
    }
}

fn non_blank(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn split_list(raw: Option<String>) -> Vec<String> {
    raw.map(|raw| {
        raw.split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(str::to_string)
            .collect()
    })
    .unwrap_or_default()
}

/// `X-Jellyfin-Library-Ids`: comma separated ids of ASCII letters, digits and
/// dashes.
pub(crate) fn library_ids(headers: &HeaderMap) -> Result<Vec<String>, AppError> {
    let ids = split_list(header_value(headers, LIBRARY_IDS_HEADER)?);
    if let Some(bad) = ids
        .iter()
        .find(|id| !id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-'))
    {
        return Err(AppError::bad_request(format!("Invalid library id: {}", bad)));
    }
    Ok(ids)
}

/// `X-Jellyfin-Collection-Types`: comma separated, lower-cased, ASCII letters
/// and digits only.
pub(crate) fn collection_types(headers: &HeaderMap) -> Result<Vec<String>, AppError> {
    let types: Vec<String> = split_list(header_value(headers, COLLECTION_TYPES_HEADER)?)
        .into_iter()
        .map(|t| t.to_lowercase())
        .collect();
    if let Some(bad) = types
        .iter()
        .find(|t| !t.chars().all(|c| c.is_ascii_alphanumeric()))
    {
        return Err(AppError::bad_request(format!(
            "Invalid collection type: {}",
            bad
        )));
    }
    Ok(types)
}

/// Everything a webhook asks to refresh.
#[derive(Debug, Clone)]
pub(crate) struct RefreshRequest {
    pub credentials: Credentials,
    pub library_ids: Vec<String>,
    pub collection_types: Vec<String>,
}

impl RefreshRequest {
    pub fn from_headers(headers: &HeaderMap, defaults: &JellyfinConfig) -> Result<Self, AppError> {
        let credentials = CredentialSources::webhook(headers, defaults)?.resolve()?;
        Ok(Self {
            credentials,
            library_ids: library_ids(headers)?,
            collection_types: collection_types(headers)?,
        })
    }

    pub fn scope(&self) -> LibraryScope {
        LibraryScope::from_parts(self.library_ids.clone(), self.collection_types.clone())
    }

    pub fn key(&self, grouping: KeyGrouping, scope: &LibraryScope) -> ScopeKey {
        match grouping {
            KeyGrouping::Scope => ScopeKey::for_scope(self.credentials.clone(), scope),
            KeyGrouping::Server => ScopeKey::for_server(self.credentials.clone()),
        }
    }
}
