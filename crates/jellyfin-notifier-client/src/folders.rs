// Jellyfin virtual folders (libraries)
//
// Parsing of `/Library/VirtualFolders` plus the helpers that turn requested
// collection types into concrete library ids.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};

/// One library as reported by `/Library/VirtualFolders`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct VirtualFolder {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub collection_type: Option<String>,
    #[serde(default)]
    pub locations: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub library_options: Option<LibraryOptions>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LibraryOptions {
    #[serde(default)]
    pub path_infos: Option<Vec<PathInfo>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PathInfo {
    #[serde(default)]
    pub path: Option<String>,
}

/// Jellyfin answers with a list, but older servers have been seen returning a
/// single object.
#[derive(Deserialize)]
#[serde(untagged)]
pub(crate) enum FoldersResponse {
    Many(Vec<VirtualFolder>),
    One(VirtualFolder),
}

impl FoldersResponse {
    pub fn into_vec(self) -> Vec<VirtualFolder> {
        match self {
            FoldersResponse::Many(folders) => folders,
            FoldersResponse::One(folder) => vec![folder],
        }
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

impl VirtualFolder {
    /// `ItemId`, falling back to `Id`.
    pub fn library_id(&self) -> Option<&str> {
        non_empty(&self.item_id).or_else(|| non_empty(&self.id))
    }

    pub fn collection_type_lower(&self) -> Option<String> {
        non_empty(&self.collection_type).map(str::to_lowercase)
    }

    /// `Locations`, or the `LibraryOptions.PathInfos` paths when no locations
    /// are listed.
    pub fn paths(&self) -> Vec<&str> {
        let locations: Vec<&str> = self
            .locations
            .iter()
            .flatten()
            .map(String::as_str)
            .filter(|loc| !loc.is_empty())
            .collect();
        if !locations.is_empty() {
            return locations;
        }

        self.library_options
            .iter()
            .filter_map(|options| options.path_infos.as_ref())
            .flatten()
            .filter_map(|info| non_empty(&info.path))
            .collect()
    }

    pub fn summary(&self) -> LibrarySummary {
        LibrarySummary {
            name: self.name.clone(),
            item_id: self.library_id().map(str::to_string),
            collection_type: self.collection_type.clone(),
            locations: self.paths().into_iter().map(str::to_string).collect(),
        }
    }
}

/// Library entry returned by the discovery endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LibrarySummary {
    pub name: Option<String>,
    pub item_id: Option<String>,
    pub collection_type: Option<String>,
    pub locations: Vec<String>,
}

/// Order folders by lower-cased name, then id.
pub fn sort_folders(folders: &mut [VirtualFolder]) {
    folders.sort_by(|a, b| {
        let key = |f: &VirtualFolder| {
            (
                f.name.as_deref().unwrap_or_default().to_lowercase(),
                f.item_id.clone().unwrap_or_default(),
            )
        };
        key(a).cmp(&key(b))
    });
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectionSelection {
    /// Library ids whose collection type was requested, in folder order.
    pub selected: Vec<String>,
    /// Requested types no library has, sorted.
    pub missing: Vec<String>,
    /// Every collection type present on the server, sorted.
    pub available: Vec<String>,
}

/// Resolve requested collection types (lower-case) against the server's
/// libraries.
pub fn select_library_ids_by_collection<S: AsRef<str>>(
    folders: &[VirtualFolder],
    requested_types: &[S],
) -> CollectionSelection {
    let requested: BTreeSet<&str> = requested_types.iter().map(AsRef::as_ref).collect();
    let mut available = BTreeSet::new();
    let mut selected = Vec::new();

    for folder in folders {
        let Some(ctype) = folder.collection_type_lower() else {
            continue;
        };
        if requested.contains(ctype.as_str()) {
            if let Some(id) = folder.library_id() {
                selected.push(id.to_string());
            }
        }
        available.insert(ctype);
    }

    let missing = requested
        .iter()
        .filter(|ctype| !available.contains(**ctype))
        .map(|ctype| ctype.to_string())
        .collect();

    CollectionSelection {
        selected,
        missing,
        available: available.into_iter().collect(),
    }
}

/// Order-preserving, de-duplicated union of id lists. Empty ids are dropped.
pub fn merge_ids<I, L, S>(lists: I) -> Vec<String>
where
    I: IntoIterator<Item = L>,
    L: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = HashSet::new();
    let mut merged = Vec::new();
    for list in lists {
        for id in list {
            let id = id.as_ref();
            if !id.is_empty() && seen.insert(id.to_string()) {
                merged.push(id.to_string());
            }
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn folders() -> Vec<VirtualFolder> {
        serde_json::from_value(json!([
            {"Name": "Movies", "ItemId": "m1", "CollectionType": "movies", "Locations": ["/media/movies"]},
            {"Name": "Shows", "Id": "s1", "CollectionType": "TVShows", "Locations": []},
            {"Name": "4K Movies", "ItemId": "m2", "CollectionType": "movies",
             "LibraryOptions": {"PathInfos": [{"Path": "/media/4k"}, {"Path": null}]}},
            {"Name": "Mixed", "ItemId": "x1", "CollectionType": null}
        ]))
        .unwrap()
    }

    #[test]
    fn selects_ids_by_collection_type() {
        let selection = select_library_ids_by_collection(&folders(), ["movies", "music"].as_slice());
        assert_eq!(selection.selected, vec!["m1", "m2"]);
        assert_eq!(selection.missing, vec!["music"]);
        assert_eq!(selection.available, vec!["movies", "tvshows"]);
    }

    #[test]
    fn id_falls_back_to_id_field() {
        let selection = select_library_ids_by_collection(&folders(), ["tvshows"].as_slice());
        assert_eq!(selection.selected, vec!["s1"]);
        assert!(selection.missing.is_empty());
    }

    #[test]
    fn locations_fall_back_to_path_infos() {
        let folders = folders();
        assert_eq!(folders[0].paths(), vec!["/media/movies"]);
        assert_eq!(folders[2].paths(), vec!["/media/4k"]);
        assert!(folders[3].paths().is_empty());
    }

    #[test]
    fn sorts_by_lowercase_name() {
        let mut folders = folders();
        sort_folders(&mut folders);
        let names: Vec<_> = folders.iter().filter_map(|f| f.name.as_deref()).collect();
        assert_eq!(names, vec!["4K Movies", "Mixed", "Movies", "Shows"]);
    }

    #[test]
    fn merge_preserves_first_occurrence() {
        let merged = merge_ids([vec!["a", "b"], vec!["b", "", "c", "a"]]);
        assert_eq!(merged, vec!["a", "b", "c"]);
    }

    #[test]
    fn single_object_response_becomes_list() {
        let response: FoldersResponse =
            serde_json::from_value(json!({"Name": "Movies", "ItemId": "m1"})).unwrap();
        assert_eq!(response.into_vec().len(), 1);
    }

    #[test]
    fn summary_uses_camel_case() {
        let summary = serde_json::to_value(folders()[1].summary()).unwrap();
        assert_eq!(
            summary,
            json!({"name": "Shows", "itemId": "s1", "collectionType": "TVShows", "locations": []})
        );
    }
}
