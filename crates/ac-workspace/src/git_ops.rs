//! Blocking `git2` operations, always run on a `spawn_blocking` thread by the
//! caller — `git2` has no async story and the teacher's `worktree/manager.rs`
//! isolates every git2 call behind `tokio::task::spawn_blocking` for exactly
//! this reason.

use std::path::Path;

use ac_protocol::model::CheckoutSpec;
use tracing::debug;

use crate::WorkspaceError;

/// `branch`, when set, restricts the clone to that one branch — the
/// `--single-branch` half of spec.md:108's "`--depth 1 --single-branch` when
/// `shallowClone`". Narrowing the remote's fetch refspec to a single
/// `refs/heads/<branch>` (rather than the default `refs/heads/*`) is what
/// actually keeps a shallow clone to one branch's history; `RepoBuilder`
/// alone only controls which branch HEAD is checked out to.
pub fn clone_bare(
    url: &str,
    dest: &Path,
    shallow_depth: Option<i32>,
    branch: Option<&str>,
) -> Result<(), WorkspaceError> {
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut fetch_options = git2::FetchOptions::new();
    if let Some(depth) = shallow_depth {
        fetch_options.depth(depth);
    }

    let mut builder = git2::build::RepoBuilder::new();
    builder.bare(true);
    builder.fetch_options(fetch_options);

    if let Some(branch) = branch {
        builder.branch(branch);
        let single_branch_refspec = format!("+refs/heads/{branch}:refs/remotes/origin/{branch}");
        builder.remote_create(move |repo, name, url| {
            repo.remote_with_fetch(name, url, &single_branch_refspec)
        });
    }

    let repo = builder.clone(url, dest)?;

    // Flip `core.bare = false` so worktrees can be attached to this cache
    // repo (§4.3 step 2) even though it holds no checked-out tree itself.
    let mut config = repo.config()?;
    config.set_bool("core.bare", false)?;

    Ok(())
}

pub fn fetch_prune(cache_path: &Path) -> Result<(), WorkspaceError> {
    let repo = git2::Repository::open(cache_path)?;
    let mut remote = repo.find_remote("origin")?;

    let mut fetch_options = git2::FetchOptions::new();
    fetch_options.prune(git2::FetchPrune::On);
    remote.fetch(&[] as &[&str], Some(&mut fetch_options), None)?;
    Ok(())
}

fn resolve_checkout_oid(repo: &git2::Repository, checkout: &CheckoutSpec) -> Result<git2::Oid, git2::Error> {
    match checkout {
        CheckoutSpec::Branch { r#ref } => {
            let local = repo
                .find_branch(r#ref, git2::BranchType::Local)
                .and_then(|b| b.get().peel_to_commit());
            match local {
                Ok(commit) => Ok(commit.id()),
                Err(_) => repo
                    .find_reference(&format!("refs/remotes/origin/{r#ref}"))
                    .and_then(|r| r.peel_to_commit())
                    .map(|c| c.id()),
            }
        }
        CheckoutSpec::Commit { sha } => repo
            .revparse_single(sha)
            .and_then(|o| o.peel_to_commit())
            .map(|c| c.id()),
        CheckoutSpec::Tag { tag } => repo
            .revparse_single(&format!("refs/tags/{tag}"))
            .and_then(|o| o.peel_to_commit())
            .map(|c| c.id()),
    }
}

/// §4.3 step 3: create a worktree at `checkout`, detached HEAD, fetching
/// from origin and retrying once if the ref isn't available locally yet.
pub fn add_detached_worktree(
    cache_path: &Path,
    workspace_id: &str,
    worktree_path: &Path,
    checkout: &CheckoutSpec,
) -> Result<(), WorkspaceError> {
    let repo = git2::Repository::open(cache_path)?;

    let oid = match resolve_checkout_oid(&repo, checkout) {
        Ok(oid) => oid,
        Err(_) => {
            debug!(ref_ = checkout.revision(), "checkout ref not found locally, fetching from origin");
            if let Ok(mut remote) = repo.find_remote("origin") {
                let mut fetch_options = git2::FetchOptions::new();
                let _ = remote.fetch(&[] as &[&str], Some(&mut fetch_options), None);
                drop(fetch_options);
            }
            resolve_checkout_oid(&repo, checkout)
                .map_err(|_| WorkspaceError::RefNotFound(checkout.revision().to_string()))?
        }
    };

    if let Some(parent) = worktree_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    repo.worktree(workspace_id, worktree_path, None)?;

    let worktree_repo = git2::Repository::open(worktree_path)?;
    worktree_repo.set_head_detached(oid)?;
    let mut checkout_builder = git2::build::CheckoutBuilder::new();
    checkout_builder.force();
    worktree_repo.checkout_head(Some(&mut checkout_builder))?;

    Ok(())
}

/// §4.3 `destroyWorkspace`: best-effort `worktree remove --force`. Never
/// raises to the caller — the caller always falls back to directory deletion.
pub fn remove_worktree(cache_path: &Path, worktree_path: &Path) -> Result<(), WorkspaceError> {
    let repo = git2::Repository::open(cache_path)?;

    if let Ok(names) = repo.worktrees() {
        for name in names.iter().flatten() {
            if let Ok(wt) = repo.find_worktree(name) {
                if wt.path() == worktree_path {
                    wt.prune(Some(git2::WorktreePruneOptions::new().working_tree(true)))?;
                    if worktree_path.exists() {
                        std::fs::remove_dir_all(worktree_path)?;
                    }
                    return Ok(());
                }
            }
        }
    }

    if worktree_path.exists() {
        std::fs::remove_dir_all(worktree_path)?;
    }
    Ok(())
}
