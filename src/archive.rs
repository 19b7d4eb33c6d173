// Delta image archives.
//
// An archive is a directory of JPEGs described by `optimization_map.json`:
//
//   {
//     "image_map":    { "<id>": "<file>", ... },
//     "dependencies": { "<id>": "<parent id>", ... },
//     "alpha_map":    { "<id>": "<file>", ... }
//   }
//
// An id with no dependency is a root and its file is a full image. Every
// other id's file is a diff against its parent. Rendering an id merges the
// diffs along the chain from its root down to the id itself.

use std::collections::{BTreeMap, HashSet};
use std::path::{Component, Path};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Name of the map inside an archive directory.
pub const MAP_FILE_NAME: &str = "optimization_map.json";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ChainError {
    #[error("invalid archive map: {0}")]
    Json(#[from] serde_json::Error),

    #[error("circular dependency detected involving ID '{id}'")]
    Cycle { id: String },

    #[error("could not find filename for ID '{id}'")]
    UnknownId { id: String },

    #[error("ID '{id}': '{file}' is not a relative path inside the archive")]
    UnsafePath { id: String, file: String },
}

// ---------------------------------------------------------------------------
// Map
// ---------------------------------------------------------------------------

/// Contents of `optimization_map.json`. Missing sections are empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveMap {
    #[serde(default)]
    pub image_map: BTreeMap<String, String>,
    #[serde(default)]
    pub dependencies: BTreeMap<String, String>,
    #[serde(default)]
    pub alpha_map: BTreeMap<String, String>,
}

/// One image of a resolved chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainLink {
    pub id: String,
    /// File inside the archive: a full image for the root, a diff otherwise.
    pub file: String,
    pub alpha: Option<String>,
}

impl ArchiveMap {
    pub fn from_json(text: &str) -> Result<Self, ChainError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn to_json_pretty(&self) -> Result<String, ChainError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Every id that has a file, in sorted order.
    pub fn ids(&self) -> impl Iterator<Item = &str> + '_ {
        self.image_map.keys().map(String::as_str)
    }

    pub fn is_root(&self, id: &str) -> bool {
        !self.dependencies.contains_key(id)
    }

    /// Ids from the root down to `id`, following `dependencies`.
    ///
    /// Fails on a cycle anywhere along the way. Ids without a file are not
    /// checked here; see [`ArchiveMap::chain`].
    pub fn resolve_chain(&self, id: &str) -> Result<Vec<String>, ChainError> {
        let mut visited = HashSet::new();
        let mut chain = Vec::new();
        let mut current = Some(id);

        while let Some(cur) = current {
            if !visited.insert(cur) {
                return Err(ChainError::Cycle { id: cur.to_string() });
            }
            chain.push(cur.to_string());
            current = self.dependencies.get(cur).map(String::as_str);
        }

        chain.reverse();
        Ok(chain)
    }

    /// [`resolve_chain`](Self::resolve_chain) with each id's file, root
    /// first. Every link must have a file that stays inside the archive.
    pub fn chain(&self, id: &str) -> Result<Vec<ChainLink>, ChainError> {
        self.resolve_chain(id)?
            .into_iter()
            .map(|id| {
                let file = self
                    .image_map
                    .get(&id)
                    .ok_or_else(|| ChainError::UnknownId { id: id.clone() })?;
                check_relative(&id, file)?;
                let alpha = self.alpha_map.get(&id).cloned();
                Ok(ChainLink {
                    file: file.clone(),
                    alpha,
                    id,
                })
            })
            .collect()
    }
}

fn check_relative(id: &str, file: &str) -> Result<(), ChainError> {
    let path = Path::new(file);
    let inside = !file.is_empty() && path.components().all(|c| matches!(c, Component::Normal(_)));
    if inside {
        Ok(())
    } else {
        Err(ChainError::UnsafePath {
            id: id.to_string(),
            file: file.to_string(),
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
