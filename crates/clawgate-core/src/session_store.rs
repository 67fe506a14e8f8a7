//! Per-agent session storage.
//!
//! [`SessionStore`] keeps the sessions of one agent in memory behind a
//! read-write lock and hands copies out, so downstream readers never
//! race the single writer (the agent loop). Persistence is delegated
//! to an optional [`SessionSink`]; the provided [`FileSessionSink`]
//! writes one JSONL file per session with a metadata header line and
//! one line per message, filenames percent-encoded so any key is a
//! safe filename.
//!
//! The lock is held only around map access -- never across sink I/O.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use percent_encoding::{percent_decode_str, percent_encode, NON_ALPHANUMERIC};
use tracing::{debug, warn};

use clawgate_types::session::{Message, Session, HEARTBEAT_SESSION, MAIN_SESSION};
use clawgate_types::GateError;

use crate::routing::parse_internal_key;

/// Persistence sink for sessions.
#[async_trait]
pub trait SessionSink: Send + Sync {
    /// Persist a full session snapshot.
    async fn save(&self, session: &Session) -> clawgate_types::Result<()>;

    /// Load every persisted session.
    async fn load_all(&self) -> clawgate_types::Result<Vec<Session>>;

    /// Remove a persisted session.
    async fn remove(&self, key: &str) -> clawgate_types::Result<()>;
}

/// Metadata snapshot of one session, as listed to clients.
#[derive(Debug, Clone)]
pub struct SessionMeta {
    /// Internal session key.
    pub key: String,
    /// Human-facing label.
    pub label: String,
    /// Last mutation time.
    pub updated_at: chrono::DateTime<chrono::Utc>,
    /// Number of messages in the history.
    pub message_count: usize,
    /// The most recent message, if any.
    pub last_message: Option<Message>,
}

/// In-memory session map for one agent, with optional persistence.
pub struct SessionStore {
    agent_id: String,
    sessions: RwLock<HashMap<String, Session>>,
    sink: Option<Arc<dyn SessionSink>>,
}

impl SessionStore {
    /// Create a store for `agent_id` without persistence.
    pub fn new(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            sessions: RwLock::new(HashMap::new()),
            sink: None,
        }
    }

    /// Create a store backed by `sink`.
    pub fn with_sink(agent_id: impl Into<String>, sink: Arc<dyn SessionSink>) -> Self {
        Self {
            agent_id: agent_id.into(),
            sessions: RwLock::new(HashMap::new()),
            sink: Some(sink),
        }
    }

    /// The owning agent's id.
    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    /// Populate the map from the sink. Sessions belonging to other
    /// agents (by key prefix) are skipped.
    pub async fn load_from_sink(&self) -> clawgate_types::Result<usize> {
        let Some(sink) = self.sink.clone() else {
            return Ok(0);
        };
        let loaded = sink.load_all().await?;
        let mut count = 0;
        let mut sessions = self.sessions.write().unwrap();
        for session in loaded {
            match parse_internal_key(&session.key) {
                Some((agent, _)) if agent == self.agent_id => {
                    sessions.insert(session.key.clone(), session);
                    count += 1;
                }
                _ => {}
            }
        }
        debug!(agent = %self.agent_id, count, "loaded sessions from sink");
        Ok(count)
    }

    /// Get a copy of the session for `key`, creating it when absent.
    /// Returns `(session, created)`.
    pub fn get_or_create(&self, key: &str) -> (Session, bool) {
        {
            let sessions = self.sessions.read().unwrap();
            if let Some(session) = sessions.get(key) {
                return (session.clone(), false);
            }
        }
        let mut sessions = self.sessions.write().unwrap();
        // Double-checked: another writer may have raced us here.
        if let Some(session) = sessions.get(key) {
            return (session.clone(), false);
        }
        let session = Session::new(key);
        sessions.insert(key.to_string(), session.clone());
        debug!(agent = %self.agent_id, key, "session created");
        (session, true)
    }

    /// Whether `key` exists.
    pub fn contains(&self, key: &str) -> bool {
        self.sessions.read().unwrap().contains_key(key)
    }

    /// Append a message to `key`, creating the session when absent.
    pub fn append_message(&self, key: &str, msg: Message) {
        let mut sessions = self.sessions.write().unwrap();
        let session = sessions
            .entry(key.to_string())
            .or_insert_with(|| Session::new(key));
        session.push(msg);
    }

    /// A copy of the full history of `key`. Empty when absent.
    pub fn history(&self, key: &str) -> Vec<Message> {
        self.sessions
            .read()
            .unwrap()
            .get(key)
            .map(|s| s.messages.clone())
            .unwrap_or_default()
    }

    /// Set the label of `key`, creating the session when absent.
    pub fn set_label(&self, key: &str, label: &str) {
        let mut sessions = self.sessions.write().unwrap();
        let session = sessions
            .entry(key.to_string())
            .or_insert_with(|| Session::new(key));
        session.label = label.to_string();
        session.touch();
    }

    /// Metadata for every session, newest first. The distinguished
    /// heartbeat session is never listed.
    pub fn list(&self) -> Vec<SessionMeta> {
        let sessions = self.sessions.read().unwrap();
        let mut metas: Vec<SessionMeta> = sessions
            .values()
            .filter(|s| !is_heartbeat(&s.key))
            .map(|s| SessionMeta {
                key: s.key.clone(),
                label: s.label.clone(),
                updated_at: s.updated_at,
                message_count: s.messages.len(),
                last_message: s.messages.last().cloned(),
            })
            .collect();
        metas.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        metas
    }

    /// Delete `key`. The per-agent `main` and `heartbeat` sessions are
    /// undeletable; state is unchanged on error.
    pub fn delete(&self, key: &str) -> clawgate_types::Result<()> {
        if let Some((_, display)) = parse_internal_key(key) {
            if display == MAIN_SESSION {
                return Err(GateError::Session {
                    reason: "the main session cannot be deleted".into(),
                });
            }
            if display == HEARTBEAT_SESSION {
                return Err(GateError::Session {
                    reason: "the heartbeat session cannot be deleted".into(),
                });
            }
        }
        let removed = self.sessions.write().unwrap().remove(key).is_some();
        if !removed {
            return Err(GateError::Session {
                reason: format!("no such session: {key}"),
            });
        }
        debug!(agent = %self.agent_id, key, "session deleted");
        Ok(())
    }

    /// Persist `key` through the sink, if one is configured. The
    /// snapshot is taken under the read lock; the write happens after
    /// the lock is released.
    pub async fn save(&self, key: &str) -> clawgate_types::Result<()> {
        let Some(sink) = self.sink.clone() else {
            return Ok(());
        };
        let snapshot = {
            let sessions = self.sessions.read().unwrap();
            sessions.get(key).cloned()
        };
        match snapshot {
            Some(session) => sink.save(&session).await,
            None => Ok(()),
        }
    }

    /// Remove the persisted copy of `key` through the sink.
    pub async fn remove_persisted(&self, key: &str) -> clawgate_types::Result<()> {
        match self.sink.clone() {
            Some(sink) => sink.remove(key).await,
            None => Ok(()),
        }
    }

    /// Number of sessions (including heartbeat).
    pub fn len(&self) -> usize {
        self.sessions.read().unwrap().len()
    }

    /// Whether the store holds no sessions.
    pub fn is_empty(&self) -> bool {
        self.sessions.read().unwrap().is_empty()
    }
}

fn is_heartbeat(key: &str) -> bool {
    matches!(parse_internal_key(key), Some((_, display)) if display == HEARTBEAT_SESSION)
}

// ---------------------------------------------------------------------------
// File sink
// ---------------------------------------------------------------------------

/// JSONL file persistence: `<dir>/<percent-encoded key>.jsonl`, first
/// line metadata, then one line per message.
pub struct FileSessionSink {
    dir: PathBuf,
}

impl FileSessionSink {
    /// Create a sink rooted at `dir`, creating the directory.
    pub fn new(dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let encoded = percent_encode(key.as_bytes(), NON_ALPHANUMERIC).to_string();
        self.dir.join(format!("{encoded}.jsonl"))
    }
}

#[async_trait]
impl SessionSink for FileSessionSink {
    async fn save(&self, session: &Session) -> clawgate_types::Result<()> {
        let meta = serde_json::json!({
            "_type": "metadata",
            "key": session.key,
            "label": session.label,
            "created_at": session.created_at.to_rfc3339(),
            "updated_at": session.updated_at.to_rfc3339(),
        });
        let mut content = serde_json::to_string(&meta)?;
        content.push('\n');
        for msg in &session.messages {
            content.push_str(&serde_json::to_string(msg)?);
            content.push('\n');
        }
        let path = self.path_for(&session.key);
        tokio::fs::write(&path, content).await?;
        debug!(key = %session.key, path = %path.display(), "session saved");
        Ok(())
    }

    async fn load_all(&self) -> clawgate_types::Result<Vec<Session>> {
        let mut sessions = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            let Some(stem) = name.strip_suffix(".jsonl") else {
                continue;
            };
            let key = match percent_decode_str(stem).decode_utf8() {
                Ok(decoded) => decoded.into_owned(),
                Err(e) => {
                    warn!(filename = %name, error = %e, "skipping undecodable session filename");
                    continue;
                }
            };
            let content = tokio::fs::read_to_string(entry.path()).await?;
            match parse_session(&key, &content) {
                Ok(session) => sessions.push(session),
                Err(e) => {
                    warn!(key = %key, error = %e, "skipping unparsable session file");
                }
            }
        }
        Ok(sessions)
    }

    async fn remove(&self, key: &str) -> clawgate_types::Result<()> {
        let path = self.path_for(key);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

fn parse_session(key: &str, content: &str) -> clawgate_types::Result<Session> {
    let mut lines = content.lines();
    let meta_line = lines.next().ok_or_else(|| GateError::Session {
        reason: format!("empty session file for {key}"),
    })?;
    let meta: serde_json::Value = serde_json::from_str(meta_line)?;

    let mut session = Session::new(key);
    if let Some(label) = meta.get("label").and_then(|v| v.as_str()) {
        session.label = label.to_string();
    }
    if let Some(created) = meta
        .get("created_at")
        .and_then(|v| v.as_str())
        .and_then(|s| s.parse().ok())
    {
        session.created_at = created;
    }
    if let Some(updated) = meta
        .get("updated_at")
        .and_then(|v| v.as_str())
        .and_then(|s| s.parse().ok())
    {
        session.updated_at = updated;
    }

    for line in lines {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        match serde_json::from_str::<Message>(trimmed) {
            Ok(msg) => session.messages.push(msg),
            Err(e) => warn!(key, error = %e, "skipping malformed message line"),
        }
    }
    Ok(session)
}
