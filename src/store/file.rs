//! File-backed document store.
//!
//! One JSON document per key:
//!
//! ```text
//! <root>/users/<workspace>/<chat-user>.json
//! <root>/repos/<owner>%2F<repo>.json
//! <root>/messages/<owner>%2F<repo>/<pr>/<channel>.json
//! <root>/pull_requests/<owner>%2F<repo>/<pr>.json
//! ```
//!
//! Key segments are percent-encoded so IDs can never escape their
//! directory. Writes go through [`write_atomic`]; message inserts publish a
//! per-call temp file with a hard link, which fails if the target already
//! exists. Temp files end in `.tmp` and are never read back as documents.

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::persistence::{fsync_dir, temp_path_for, write_atomic};
use crate::types::{
    ChannelId, ChatUserId, PrNumber, PullRequestRecord, Repo, RepoName, TrackedMessage, User,
    WorkspaceId,
};

use super::{DocumentStore, InsertOutcome, Result, StoreError};

#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

/// Encodes a key segment as a safe file name.
fn encode_segment(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    for byte in segment.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' => {
                out.push(byte as char);
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    // "." and ".." are encoded so they can't name a directory.
    if out.chars().all(|c| c == '.') {
        return out.replace('.', "%2E");
    }
    out
}

fn read_doc<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match std::fs::read(path) {
        Ok(bytes) => serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|source| StoreError::Corrupt {
                path: path.display().to_string(),
                source,
            }),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn write_doc<T: Serialize>(path: &Path, doc: &T) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(doc)?;
    Ok(write_atomic(path, &bytes)?)
}

/// Reads every `.json` document directly inside `dir`.
fn read_dir_docs<T: DeserializeOwned>(dir: &Path) -> Result<Vec<T>> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut docs = Vec::new();
    for entry in entries {
        let path = entry?.path();
        if path.extension().is_some_and(|e| e == "json")
            && let Some(doc) = read_doc(&path)?
        {
            docs.push(doc);
        }
    }
    Ok(docs)
}

/// Runs blocking file IO off the async executor.
async fn blocking<T, F>(f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        FileStore { root: root.into() }
    }

    fn users_dir(&self) -> PathBuf {
        self.root.join("users")
    }

    fn user_path(&self, workspace: &WorkspaceId, user: &ChatUserId) -> PathBuf {
        self.users_dir()
            .join(encode_segment(workspace.as_str()))
            .join(format!("{}.json", encode_segment(user.as_str())))
    }

    fn repo_path(&self, name: &RepoName) -> PathBuf {
        self.root
            .join("repos")
            .join(format!("{}.json", encode_segment(name.as_str())))
    }

    fn pr_messages_dir(&self, repo: &RepoName, pr: PrNumber) -> PathBuf {
        self.root
            .join("messages")
            .join(encode_segment(repo.as_str()))
            .join(pr.0.to_string())
    }

    fn message_path(&self, repo: &RepoName, pr: PrNumber, channel: &ChannelId) -> PathBuf {
        self.pr_messages_dir(repo, pr)
            .join(format!("{}.json", encode_segment(channel.as_str())))
    }

    fn pull_request_path(&self, repo: &RepoName, pr: PrNumber) -> PathBuf {
        self.root
            .join("pull_requests")
            .join(encode_segment(repo.as_str()))
            .join(format!("{}.json", pr.0))
    }

    /// Every user document, across workspaces.
    fn all_users(&self) -> Result<Vec<User>> {
        let workspaces = match std::fs::read_dir(self.users_dir()) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut users = Vec::new();
        for entry in workspaces {
            let path = entry?.path();
            if path.is_dir() {
                users.extend(read_dir_docs::<User>(&path)?);
            }
        }
        Ok(users)
    }
}

fn insert_if_absent(path: &Path, message: &TrackedMessage) -> Result<InsertOutcome> {
    if let Some(existing) = read_doc::<TrackedMessage>(path)? {
        return Ok(InsertOutcome::Existing(existing));
    }

    let parent = path
        .parent()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no parent"))?;
    std::fs::create_dir_all(parent)?;

    let bytes = serde_json::to_vec_pretty(message)?;
    let tmp = temp_path_for(path);
    let written = std::fs::File::create_new(&tmp).and_then(|mut file| {
        io::Write::write_all(&mut file, &bytes)?;
        file.sync_all()
    });
    if let Err(e) = written {
        let _ = std::fs::remove_file(&tmp);
        return Err(e.into());
    }

    let linked = std::fs::hard_link(&tmp, path);
    let _ = std::fs::remove_file(&tmp);
    match linked {
        Ok(()) => {
            fsync_dir(parent)?;
            Ok(InsertOutcome::Inserted)
        }
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => match read_doc(path)? {
            Some(existing) => Ok(InsertOutcome::Existing(existing)),
            None => Err(e.into()),
        },
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl DocumentStore for FileStore {
    async fn get_user(&self, workspace: &WorkspaceId, user: &ChatUserId) -> Result<Option<User>> {
        let path = self.user_path(workspace, user);
        blocking(move || read_doc(&path)).await
    }

    async fn put_user(&self, user: &User) -> Result<()> {
        let path = self.user_path(&user.workspace_id, &user.chat_user_id);
        let user = user.clone();
        blocking(move || write_doc(&path, &user)).await
    }

    async fn find_user_by_link_token(&self, token: &str) -> Result<Option<User>> {
        let store = self.clone();
        let token = token.to_string();
        blocking(move || {
            Ok(store.all_users()?.into_iter().find(|u| {
                u.pending_link
                    .as_ref()
                    .is_some_and(|p| p.token == token)
            }))
        })
        .await
    }

    async fn find_verified_user_by_login(&self, login: &str) -> Result<Option<User>> {
        let store = self.clone();
        let login = login.to_string();
        blocking(move || {
            Ok(store.all_users()?.into_iter().find(|u| {
                u.verified_login()
                    .is_some_and(|l| l.eq_ignore_ascii_case(&login))
            }))
        })
        .await
    }

    async fn get_repo(&self, name: &RepoName) -> Result<Option<Repo>> {
        let path = self.repo_path(name);
        blocking(move || read_doc(&path)).await
    }

    async fn put_repo(&self, repo: &Repo) -> Result<()> {
        let path = self.repo_path(&repo.full_name);
        let repo = repo.clone();
        blocking(move || write_doc(&path, &repo)).await
    }

    async fn get_message(
        &self,
        repo: &RepoName,
        pr: PrNumber,
        channel: &ChannelId,
    ) -> Result<Option<TrackedMessage>> {
        let path = self.message_path(repo, pr, channel);
        blocking(move || read_doc(&path)).await
    }

    async fn list_messages(&self, repo: &RepoName, pr: PrNumber) -> Result<Vec<TrackedMessage>> {
        let dir = self.pr_messages_dir(repo, pr);
        blocking(move || {
            let mut messages: Vec<TrackedMessage> = read_dir_docs(&dir)?;
            messages.sort_by(|a, b| a.channel.cmp(&b.channel));
            Ok(messages)
        })
        .await
    }

    async fn insert_message(&self, message: &TrackedMessage) -> Result<InsertOutcome> {
        let path = self.message_path(&message.repo, message.pr_number, &message.channel);
        let message = message.clone();
        blocking(move || insert_if_absent(&path, &message)).await
    }

    async fn put_message(&self, message: &TrackedMessage) -> Result<()> {
        let path = self.message_path(&message.repo, message.pr_number, &message.channel);
        let message = message.clone();
        blocking(move || write_doc(&path, &message)).await
    }

    async fn get_pull_request(
        &self,
        repo: &RepoName,
        pr: PrNumber,
    ) -> Result<Option<PullRequestRecord>> {
        let path = self.pull_request_path(repo, pr);
        blocking(move || read_doc(&path)).await
    }

    async fn put_pull_request(&self, record: &PullRequestRecord) -> Result<()> {
        let path = self.pull_request_path(&record.repo, record.pr_number);
        let record = record.clone();
        blocking(move || write_doc(&path, &record)).await
    }
}
