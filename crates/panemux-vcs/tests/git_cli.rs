//! Integration tests for the git CLI working copy against real repositories.

use std::path::Path;
use std::process::Command;

use panemux_vcs::{GitCli, MergeOutcome, VcsError, WorkingCopy};
use tempfile::TempDir;

fn git(dir: &Path, args: &[&str]) {
    let status = Command::new("git")
        .args(args)
        .current_dir(dir)
        .status()
        .expect("spawn git");
    assert!(status.success(), "git {args:?} failed in {dir:?}");
}

fn write(dir: &Path, name: &str, contents: &str) {
    std::fs::write(dir.join(name), contents).expect("write file");
}

/// Fresh repo on `main` with one commit.
fn init_repo() -> TempDir {
    let tmp = TempDir::new().expect("tempdir");
    let dir = tmp.path();
    git(dir, &["init", "--initial-branch=main"]);
    git(dir, &["config", "user.email", "panemux@example.com"]);
    git(dir, &["config", "user.name", "panemux"]);
    write(dir, "README.md", "hello\n");
    git(dir, &["add", "-A"]);
    git(dir, &["commit", "-m", "initial"]);
    tmp
}

/// Bare origin plus a clone with one pushed commit on `main`.
fn init_repo_with_remote() -> (TempDir, std::path::PathBuf) {
    let tmp = TempDir::new().expect("tempdir");
    let origin = tmp.path().join("origin.git");
    std::fs::create_dir(&origin).expect("mkdir origin");
    git(&origin, &["init", "--bare", "--initial-branch=main"]);

    let work = tmp.path().join("work");
    git(
        tmp.path(),
        &["clone", origin.to_str().unwrap(), work.to_str().unwrap()],
    );
    git(&work, &["config", "user.email", "panemux@example.com"]);
    git(&work, &["config", "user.name", "panemux"]);
    git(&work, &["checkout", "-B", "main"]);
    write(&work, "README.md", "hello\n");
    git(&work, &["add", "-A"]);
    git(&work, &["commit", "-m", "initial"]);
    git(&work, &["push", "-u", "origin", "main"]);
    (tmp, work)
}

#[tokio::test]
async fn commit_all_skips_clean_tree() {
    let repo = init_repo();
    let vcs = GitCli::default();

    let committed = vcs.commit_all(repo.path(), "noop").await.unwrap();
    assert_eq!(committed, None);
}

#[tokio::test]
async fn commit_all_commits_untracked_files() {
    let repo = init_repo();
    let vcs = GitCli::default();

    write(repo.path(), "new.txt", "fresh\n");
    assert!(vcs.is_dirty(repo.path()).await.unwrap());

    let sha = vcs
        .commit_all(repo.path(), "Add dark mode toggle to the header")
        .await
        .unwrap()
        .expect("commit created");
    assert_eq!(sha.len(), 40);
    assert!(!vcs.is_dirty(repo.path()).await.unwrap());
}

#[tokio::test]
async fn create_branch_and_current_branch() {
    let repo = init_repo();
    let vcs = GitCli::default();

    vcs.create_branch(repo.path(), "tmp-1-abc123").await.unwrap();
    assert_eq!(
        vcs.current_branch(repo.path()).await.unwrap(),
        "tmp-1-abc123"
    );

    vcs.checkout(repo.path(), "main").await.unwrap();
    vcs.delete_branch(repo.path(), "tmp-1-abc123").await.unwrap();
}

#[tokio::test]
async fn merge_no_ff_clean() {
    let repo = init_repo();
    let vcs = GitCli::default();

    vcs.create_branch(repo.path(), "topic").await.unwrap();
    write(repo.path(), "feature.txt", "feature\n");
    vcs.commit_all(repo.path(), "add feature").await.unwrap();

    vcs.checkout(repo.path(), "main").await.unwrap();
    let outcome = vcs
        .merge_no_ff(repo.path(), "topic", "Merge topic")
        .await
        .unwrap();
    assert!(outcome.is_clean());
    assert!(repo.path().join("feature.txt").exists());
}

#[tokio::test]
async fn merge_no_ff_reports_conflict_files() {
    let repo = init_repo();
    let vcs = GitCli::default();

    vcs.create_branch(repo.path(), "topic").await.unwrap();
    write(repo.path(), "README.md", "topic version\n");
    vcs.commit_all(repo.path(), "topic edit").await.unwrap();

    vcs.checkout(repo.path(), "main").await.unwrap();
    write(repo.path(), "README.md", "main version\n");
    vcs.commit_all(repo.path(), "main edit").await.unwrap();

    let outcome = vcs
        .merge_no_ff(repo.path(), "topic", "Merge topic")
        .await
        .unwrap();
    match outcome {
        MergeOutcome::Conflict { files } => assert_eq!(files, vec!["README.md".to_string()]),
        MergeOutcome::Clean => panic!("expected conflict"),
    }

    assert!(vcs.has_conflict_markers(repo.path()).await.unwrap());
    assert_eq!(
        vcs.unmerged_paths(repo.path()).await.unwrap(),
        vec!["README.md".to_string()]
    );

    vcs.abort_merge(repo.path()).await.unwrap();
    assert!(!vcs.has_conflict_markers(repo.path()).await.unwrap());
    assert!(!vcs.is_dirty(repo.path()).await.unwrap());
}

#[tokio::test]
async fn merge_of_unknown_branch_is_an_error_not_a_conflict() {
    let repo = init_repo();
    let vcs = GitCli::default();

    let err = vcs
        .merge_no_ff(repo.path(), "no-such-branch", "Merge nothing")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "vcs_command");
}

#[tokio::test]
async fn discard_changes_restores_clean_tree() {
    let repo = init_repo();
    let vcs = GitCli::default();

    write(repo.path(), "README.md", "scribbles\n");
    write(repo.path(), "junk.txt", "junk\n");
    vcs.discard_changes(repo.path()).await.unwrap();
    assert!(!vcs.is_dirty(repo.path()).await.unwrap());
    assert!(!repo.path().join("junk.txt").exists());
}

#[tokio::test]
async fn commit_count_over_range() {
    let repo = init_repo();
    let vcs = GitCli::default();

    vcs.create_branch(repo.path(), "topic").await.unwrap();
    write(repo.path(), "a.txt", "a\n");
    vcs.commit_all(repo.path(), "one").await.unwrap();
    write(repo.path(), "b.txt", "b\n");
    vcs.commit_all(repo.path(), "two").await.unwrap();

    let ahead = vcs.commit_count(repo.path(), "main..topic").await.unwrap();
    assert_eq!(ahead, 2);
    let behind = vcs.commit_count(repo.path(), "topic..main").await.unwrap();
    assert_eq!(behind, 0);
}

#[tokio::test]
async fn push_pull_and_fetch_against_origin() {
    let (_tmp, work) = init_repo_with_remote();
    let vcs = GitCli::default();

    write(&work, "pushed.txt", "payload\n");
    vcs.commit_all(&work, "local work").await.unwrap();
    assert_eq!(vcs.commit_count(&work, "origin/main..main").await.unwrap(), 1);

    vcs.push(&work, "main").await.unwrap();
    vcs.fetch(&work).await.unwrap();
    assert_eq!(vcs.commit_count(&work, "origin/main..main").await.unwrap(), 0);

    vcs.pull(&work, "main").await.unwrap();
}

#[tokio::test]
async fn missing_worktree_is_reported() {
    let vcs = GitCli::default();
    let err = vcs
        .current_branch(Path::new("/no/such/panemux/tree"))
        .await
        .unwrap_err();
    assert!(matches!(err, VcsError::MissingWorkTree(_)));
}
