//! Model snapshot resolution through the Hugging Face hub cache.

use std::path::{Path, PathBuf};

use hf_hub::api::sync::ApiBuilder;
use hf_hub::{Cache, Repo, RepoType};

use super::model::VoxCpmError;

/// File every VoxCPM snapshot carries; used to locate the snapshot directory.
const MARKER_FILE: &str = "config.json";

/// Resolve `model_id` to a local directory.
///
/// An existing local directory is returned unchanged. Otherwise the id is a
/// hub repository: with `local_files_only` only the cache is consulted,
/// without it every file of the repository is fetched (already cached files
/// are not downloaded again).
pub fn resolve_model_dir(
    model_id: &str,
    cache_dir: Option<&Path>,
    local_files_only: bool,
) -> Result<PathBuf, VoxCpmError> {
    let local = Path::new(model_id);
    if local.is_dir() {
        return Ok(local.to_path_buf());
    }

    if local_files_only {
        return cached_snapshot(model_id, cache_dir);
    }

    log::info!("Fetching {model_id} from the model hub");
    let mut builder = ApiBuilder::new().with_progress(false);
    if let Some(dir) = cache_dir {
        builder = builder.with_cache_dir(dir.to_path_buf());
    }
    let api = builder.build().map_err(|e| VoxCpmError::Hub(e.to_string()))?;
    let repo = api.repo(Repo::new(model_id.to_string(), RepoType::Model));

    let info = repo
        .info()
        .map_err(|e| VoxCpmError::Hub(format!("{model_id}: {e}")))?;

    let mut snapshot: Option<PathBuf> = None;
    for sibling in &info.siblings {
        let path = repo
            .get(&sibling.rfilename)
            .map_err(|e| VoxCpmError::Hub(format!("{}: {e}", sibling.rfilename)))?;
        log::debug!("Fetched {}", sibling.rfilename);
        if sibling.rfilename == MARKER_FILE {
            snapshot = path.parent().map(Path::to_path_buf);
        }
    }

    snapshot.ok_or_else(|| VoxCpmError::Hub(format!("{model_id} has no {MARKER_FILE}")))
}

/// Look a snapshot up in the cache without touching the network.
pub fn cached_snapshot(model_id: &str, cache_dir: Option<&Path>) -> Result<PathBuf, VoxCpmError> {
    let cache = match cache_dir {
        Some(dir) => Cache::new(dir.to_path_buf()),
        None => Cache::default(),
    };
    cache
        .model(model_id.to_string())
        .get(MARKER_FILE)
        .and_then(|path| path.parent().map(Path::to_path_buf))
        .ok_or_else(|| {
            VoxCpmError::Hub(format!(
                "{model_id} is not in the local cache and offline mode is on"
            ))
        })
}

/// Whether a snapshot of `model_id` is already cached.
pub fn is_cached(model_id: &str, cache_dir: Option<&Path>) -> bool {
    cached_snapshot(model_id, cache_dir).is_ok()
}
