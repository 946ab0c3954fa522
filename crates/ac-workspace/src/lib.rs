//! The Workspace Manager (§4.3): a content-addressed repo clone cache plus a
//! disposable per-session worktree.
//!
//! Grounded on two teacher-pack sources: the `byteowlz-oqto` backend's
//! `session/workspace_locations.rs` (per-session workspace bookkeeping) and
//! `clawde-io-apps`'s `daemon/src/worktree/manager.rs` (the `git2`
//! clone-then-worktree pattern, including the blocking-git-on-a-`spawn_blocking`-thread
//! idiom this module reuses verbatim).

mod error;
mod git_ops;
mod url;

pub use error::WorkspaceError;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::SystemTime;

use ac_protocol::model::{CheckoutSpec, RepoRef, WorkspaceRef};
use chrono::Utc;
use rand::Rng;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Options that narrow a single [`WorkspaceManager::create_workspace`] call.
#[derive(Debug, Clone, Default)]
pub struct CreateWorkspaceOptions {
    pub read_only: bool,
    pub room_path: Option<String>,
    /// Credentials for a hosted provider clone (§4.3 URL derivation).
    pub token: Option<String>,
}

/// Configuration for the manager (§6 environment variables).
#[derive(Debug, Clone)]
pub struct WorkspaceManagerConfig {
    pub base_dir: PathBuf,
    pub cache_dir: PathBuf,
    pub shallow_clone: bool,
    pub shallow_depth: i32,
    pub max_cached_repos: usize,
}

impl Default for WorkspaceManagerConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("/tmp/ai-village-workspaces"),
            cache_dir: PathBuf::from("/tmp/ai-village-cache"),
            shallow_clone: true,
            shallow_depth: 1,
            max_cached_repos: 64,
        }
    }
}

struct WorkspaceEntry {
    workspace_ref: WorkspaceRef,
}

/// Repo clone cache + per-session worktree allocator.
pub struct WorkspaceManager {
    config: WorkspaceManagerConfig,
    workspaces: RwLock<HashMap<Uuid, WorkspaceEntry>>,
}

impl WorkspaceManager {
    pub fn new(config: WorkspaceManagerConfig) -> Self {
        Self {
            config,
            workspaces: RwLock::new(HashMap::new()),
        }
    }

    /// Creates `baseDir` and `cacheDir`, recursively.
    pub async fn initialize(&self) -> Result<(), WorkspaceError> {
        tokio::fs::create_dir_all(&self.config.base_dir).await?;
        tokio::fs::create_dir_all(&self.config.cache_dir).await?;
        info!(
            base_dir = %self.config.base_dir.display(),
            cache_dir = %self.config.cache_dir.display(),
            "workspace manager initialized"
        );
        Ok(())
    }

    /// §4.3 `createWorkspace`.
    pub async fn create_workspace(
        &self,
        session_id: Uuid,
        repo_ref: RepoRef,
        checkout: CheckoutSpec,
        options: CreateWorkspaceOptions,
    ) -> Result<WorkspaceRef, WorkspaceError> {
        repo_ref
            .validate()
            .map_err(|e| WorkspaceError::InvalidRepoRef(e.to_string()))?;

        let workspace_id = random_suffix(8);
        let worktree_path = self
            .config
            .base_dir
            .join(session_id.to_string())
            .join(&workspace_id);

        let cache_path = self
            .ensure_cached_clone(&repo_ref, &checkout, options.token.as_deref())
            .await?;

        let cache_path_for_blocking = cache_path.clone();
        let checkout_for_blocking = checkout.clone();
        let worktree_path_for_blocking = worktree_path.clone();
        let workspace_id_for_blocking = workspace_id.clone();

        tokio::task::spawn_blocking(move || {
            git_ops::add_detached_worktree(
                &cache_path_for_blocking,
                &workspace_id_for_blocking,
                &worktree_path_for_blocking,
                &checkout_for_blocking,
            )
        })
        .await
        .map_err(|e| WorkspaceError::Internal(format!("worktree task panicked: {e}")))??;

        let workspace_ref = WorkspaceRef {
            workspace_id,
            repo_ref,
            checkout,
            worktree_path,
            room_path: options.room_path,
            read_only: options.read_only,
            created_at: Utc::now(),
        };

        self.workspaces.write().expect("workspaces lock poisoned").insert(
            session_id,
            WorkspaceEntry {
                workspace_ref: workspace_ref.clone(),
            },
        );

        info!(%session_id, worktree = %workspace_ref.worktree_path.display(), "workspace ready");
        Ok(workspace_ref)
    }

    /// Ensures the shared cache clone exists for `repo_ref`, cloning or
    /// fetching as needed. For `RepoRef::Local`, the working copy *is* the
    /// cache path and no network operation occurs.
    async fn ensure_cached_clone(
        &self,
        repo_ref: &RepoRef,
        checkout: &CheckoutSpec,
        token: Option<&str>,
    ) -> Result<PathBuf, WorkspaceError> {
        if let RepoRef::Local { path, .. } = repo_ref {
            return Ok(path.clone());
        }

        let cache_path = self.config.cache_dir.join(repo_ref.cache_key());
        let clone_url = url::derive_clone_url(repo_ref, token)?;
        let shallow_depth = self.config.shallow_clone.then_some(self.config.shallow_depth);

        if cache_path.exists() {
            debug!(cache = %cache_path.display(), "fetching existing cache clone");
            let cache_path_for_blocking = cache_path.clone();
            tokio::task::spawn_blocking(move || git_ops::fetch_prune(&cache_path_for_blocking))
                .await
                .map_err(|e| WorkspaceError::Internal(format!("fetch task panicked: {e}")))??;
        } else {
            // Single-branch restriction only makes sense when we already know
            // which branch to narrow to: the repo's declared default branch,
            // or an explicit `CheckoutSpec::Branch`. A commit sha or tag
            // checkout gives no branch name, so the clone is left unrestricted
            // (still shallow, just not `--single-branch`).
            let branch = repo_ref.default_branch().or_else(|| match checkout {
                CheckoutSpec::Branch { r#ref } => Some(r#ref.as_str()),
                _ => None,
            });
            debug!(
                cache = %cache_path.display(),
                url = %clone_url,
                branch = branch.unwrap_or("<none, unrestricted>"),
                "cloning bare cache repo"
            );
            let cache_path_for_blocking = cache_path.clone();
            let branch_for_blocking = branch.map(str::to_string);
            tokio::task::spawn_blocking(move || {
                git_ops::clone_bare(
                    &clone_url,
                    &cache_path_for_blocking,
                    shallow_depth,
                    branch_for_blocking.as_deref(),
                )
            })
            .await
            .map_err(|e| WorkspaceError::Internal(format!("clone task panicked: {e}")))??;
        }

        Ok(cache_path)
    }

    /// §4.3 `destroyWorkspace`. Best-effort; never raises.
    pub async fn destroy_workspace(&self, session_id: Uuid) {
        let entry = self
            .workspaces
            .write()
            .expect("workspaces lock poisoned")
            .remove(&session_id);

        let Some(entry) = entry else {
            return;
        };

        let worktree_path = entry.workspace_ref.worktree_path.clone();
        let cache_path = match &entry.workspace_ref.repo_ref {
            RepoRef::Local { path, .. } => path.clone(),
            other => self.config.cache_dir.join(other.cache_key()),
        };

        let worktree_path_for_blocking = worktree_path.clone();
        let result = tokio::task::spawn_blocking(move || {
            git_ops::remove_worktree(&cache_path, &worktree_path_for_blocking)
        })
        .await;

        if !matches!(result, Ok(Ok(()))) {
            warn!(%session_id, path = %worktree_path.display(), "git worktree removal failed, deleting directory manually");
        }

        // The per-session directory is `base_dir/session_id/` — remove it
        // wholesale even if the worktree prune above already cleaned most of
        // it, tolerating the case where it never existed.
        let session_dir = self.config.base_dir.join(session_id.to_string());
        if let Err(e) = tokio::fs::remove_dir_all(&session_dir).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(%session_id, err = %e, "failed to remove session workspace directory");
            }
        }

        debug!(%session_id, "workspace destroyed");
    }

    /// §4.3 `pruneCache`. Returns the number of cached repos removed.
    pub async fn prune_cache(&self) -> Result<usize, WorkspaceError> {
        let mut entries = Vec::new();
        let mut read_dir = tokio::fs::read_dir(&self.config.cache_dir).await?;
        while let Some(entry) = read_dir.next_entry().await? {
            let metadata = entry.metadata().await?;
            let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            entries.push((entry.path(), modified));
        }

        if entries.len() <= self.config.max_cached_repos {
            return Ok(0);
        }

        entries.sort_by_key(|(_, modified)| *modified);
        let excess = entries.len() - self.config.max_cached_repos;
        let mut removed = 0;
        for (path, _) in entries.into_iter().take(excess) {
            if tokio::fs::remove_dir_all(&path).await.is_ok() {
                removed += 1;
            }
        }
        info!(removed, "pruned cached repo clones");
        Ok(removed)
    }

    pub fn get_workspace(&self, session_id: Uuid) -> Option<WorkspaceRef> {
        self.workspaces
            .read()
            .expect("workspaces lock poisoned")
            .get(&session_id)
            .map(|e| e.workspace_ref.clone())
    }

    pub fn get_file_path(&self, session_id: Uuid, relative: &str) -> Option<PathBuf> {
        self.get_workspace(session_id)
            .map(|w| w.worktree_path.join(relative))
    }

    pub fn get_room_path(&self, session_id: Uuid) -> Option<String> {
        self.get_workspace(session_id).and_then(|w| w.room_path)
    }

    /// Returns a `git2::Repository` handle bound to the session's worktree.
    pub fn get_git(&self, session_id: Uuid) -> Result<git2::Repository, WorkspaceError> {
        let workspace = self
            .get_workspace(session_id)
            .ok_or(WorkspaceError::NotFound(session_id))?;
        git2::Repository::open(&workspace.worktree_path)
            .map_err(|e| WorkspaceError::Git(e.to_string()))
    }

    pub fn config(&self) -> &WorkspaceManagerConfig {
        &self.config
    }
}

fn random_suffix(len: usize) -> String {
    const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::rng();
    (0..len)
        .map(|_| {
            let idx = rng.random_range(0..ALPHABET.len());
            ALPHABET[idx] as char
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_suffix_is_expected_length_and_alphabet() {
        let s = random_suffix(8);
        assert_eq!(s.len(), 8);
        assert!(s.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
    }

    #[tokio::test]
    async fn initialize_creates_directories() {
        let tmp = tempfile::tempdir().unwrap();
        let config = WorkspaceManagerConfig {
            base_dir: tmp.path().join("base"),
            cache_dir: tmp.path().join("cache"),
            ..Default::default()
        };
        let manager = WorkspaceManager::new(config);
        manager.initialize().await.unwrap();
        assert!(manager.config().base_dir.is_dir());
        assert!(manager.config().cache_dir.is_dir());
    }

    #[tokio::test]
    async fn local_repo_ref_uses_path_as_cache_without_network() {
        let tmp = tempfile::tempdir().unwrap();
        let repo_dir = tmp.path().join("repo");
        std::fs::create_dir_all(&repo_dir).unwrap();
        let repo = git2::Repository::init(&repo_dir).unwrap();
        let sig = git2::Signature::now("test", "test@example.com").unwrap();
        let tree_id = {
            let mut index = repo.index().unwrap();
            index.write_tree().unwrap()
        };
        let tree = repo.find_tree(tree_id).unwrap();
        repo.commit(Some("HEAD"), &sig, &sig, "init", &tree, &[])
            .unwrap();

        let manager = WorkspaceManager::new(WorkspaceManagerConfig {
            base_dir: tmp.path().join("base"),
            cache_dir: tmp.path().join("cache"),
            ..Default::default()
        });
        manager.initialize().await.unwrap();

        let session_id = Uuid::new_v4();
        let repo_ref = RepoRef::Local {
            path: repo_dir.clone(),
            name: None,
        };
        let head_name = {
            let head = repo.head().unwrap();
            head.shorthand().unwrap().to_string()
        };
        let workspace = manager
            .create_workspace(
                session_id,
                repo_ref,
                CheckoutSpec::Branch { r#ref: head_name },
                CreateWorkspaceOptions::default(),
            )
            .await
            .unwrap();

        assert!(workspace.worktree_path.exists());
        assert!(manager.get_workspace(session_id).is_some());

        manager.destroy_workspace(session_id).await;
        assert!(manager.get_workspace(session_id).is_none());
        assert!(!workspace.worktree_path.exists());
    }
}
