//! Turn engine: fingerprint lookup, session creation, relay, and commit.

use std::{path::PathBuf, sync::Arc};

use {
    relaygate_agent::{AgentBackend, Invocation, InvocationMode, TurnHandle},
    relaygate_common::ChatMessage,
    relaygate_config::RelayConfig,
    relaygate_sessions::{
        Fingerprint, KeyGuard, KeyedLocks, SessionRecord, SessionStore, StoreError,
        WorkspaceManager,
        extract_directives, next_fingerprint, prefix_fingerprint,
    },
    tracing::{debug, info, warn},
};

use crate::{error::ChatError, translate::TurnStream};

/// Characters of the newest message kept as the session title.
const TITLE_CHARS: usize = 50;

/// One chat completion request, already authenticated and parsed.
#[derive(Debug, Clone)]
pub struct TurnRequest {
    /// Model id in the agent's naming.
    pub model: String,
    pub api_key: Option<String>,
    pub messages: Vec<ChatMessage>,
}

/// Result of a buffered turn.
#[derive(Debug, Clone)]
pub struct TurnOutput {
    pub content: String,
    pub session_id: String,
    pub mode: InvocationMode,
}

/// Lock on a history prefix. The slot carries the session created under it
/// to callers that were waiting on the same prefix.
type CreationGuard = KeyGuard<Option<SessionRecord>>;

/// A turn whose process is running.
struct ActiveTurn {
    record: SessionRecord,
    mode: InvocationMode,
    handle: TurnHandle,
    messages: Vec<ChatMessage>,
    /// Held by the turn that created its session, until the commit.
    creation: Option<CreationGuard>,
}

/// Shared, cheaply cloneable engine. One per process.
#[derive(Clone)]
pub struct ChatEngine {
    store: SessionStore,
    locks: KeyedLocks<Option<SessionRecord>>,
    workspaces: WorkspaceManager,
    backend: Arc<dyn AgentBackend>,
}

impl ChatEngine {
    pub fn new(
        store: SessionStore,
        workspaces: WorkspaceManager,
        backend: Arc<dyn AgentBackend>,
    ) -> Self {
        Self {
            store,
            locks: KeyedLocks::new(),
            workspaces,
            backend,
        }
    }

    pub fn from_config(
        config: &RelayConfig,
        backend: Arc<dyn AgentBackend>,
    ) -> Result<Self, ChatError> {
        let store = SessionStore::open(
            config.sessions.storage_path.clone(),
            config.sessions.lock_path(),
        )?;
        let workspaces = WorkspaceManager::new(
            config.sessions.workspace_base.clone(),
            config.workspace.whitelist.clone(),
        );
        Ok(Self::new(store, workspaces, backend))
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    pub fn workspaces(&self) -> &WorkspaceManager {
        &self.workspaces
    }

    /// Run a turn and return the whole reply. The session is committed
    /// before this returns.
    pub async fn run_buffered(&self, request: TurnRequest) -> Result<TurnOutput, ChatError> {
        let ActiveTurn {
            record,
            mode,
            handle,
            messages,
            creation,
        } = self.begin(request).await?;
        let content = handle.collect().await?;
        let committed = self.commit(&record, &messages, &content).await?;
        drop(creation);
        Ok(TurnOutput {
            content,
            session_id: committed.session_id,
            mode,
        })
    }

    /// Start a turn and return its increments. Setup failures (empty
    /// request, spawn failure, store errors) are returned before any
    /// increment; later failures arrive as the stream's last item. The
    /// session is committed before the stream ends.
    pub async fn run_streaming(&self, request: TurnRequest) -> Result<TurnStream, ChatError> {
        let ActiveTurn {
            record,
            mode: _,
            mut handle,
            messages,
            creation,
        } = self.begin(request).await?;
        let engine = self.clone();
        Ok(Box::pin(async_stream::stream! {
            let _creation = creation;
            let mut full = String::new();
            while let Some(event) = handle.next().await {
                match event {
                    Ok(text) => {
                        full.push_str(&text);
                        yield Ok(text);
                    },
                    Err(e) => {
                        yield Err(ChatError::from(e));
                        return;
                    },
                }
            }
            if let Err(e) = engine.commit(&record, &messages, &full).await {
                yield Err(e);
            }
        }))
    }

    // ── Turn setup ──────────────────────────────────────────────────────

    async fn begin(&self, request: TurnRequest) -> Result<ActiveTurn, ChatError> {
        let TurnRequest {
            model,
            api_key,
            messages,
        } = request;
        if messages.is_empty() {
            return Err(ChatError::EmptyMessages);
        }

        let (directives, cleaned) = extract_directives(&messages);
        let prefix = prefix_fingerprint(&messages);

        let directed = match directives.session_id.as_deref() {
            Some(id) => {
                let id = id.to_string();
                let found = self
                    .blocking(move |store| store.find_by_session_id(&id))
                    .await?;
                if found.is_none() {
                    debug!(session_id = ?directives.session_id, "session_id directive names no stored session");
                }
                found
            },
            None => None,
        };

        let (record, creation) = match directed {
            Some(record) => {
                info!(session_id = %record.session_id, "resuming session named by directive");
                (record, None)
            },
            None => {
                self.lookup_or_create(
                    &prefix,
                    &messages,
                    directives.workspace.as_deref(),
                    api_key.as_deref(),
                )
                .await?
            },
        };

        let mode = if record.needs_priming() {
            InvocationMode::New
        } else {
            InvocationMode::Resume
        };
        self.workspaces.ensure(&record.workspace_dir)?;

        let invocation = Invocation {
            mode,
            model,
            api_key,
            session_id: record.session_id.clone(),
            workspace: record.workspace_dir.clone(),
            messages: cleaned,
        };
        debug!(
            session_id = %record.session_id,
            fingerprint = %prefix.short(),
            mode = mode.as_str(),
            "dispatching turn"
        );
        let handle = self.backend.start(invocation).await?;
        Ok(ActiveTurn {
            record,
            mode,
            handle,
            messages,
            creation,
        })
    }

    /// Find the session for `prefix` or create one. Concurrent callers with
    /// the same prefix serialize here. A caller that creates a session keeps
    /// the prefix locked until its turn commits; callers that waited on it
    /// resume that session.
    async fn lookup_or_create(
        &self,
        prefix: &Fingerprint,
        messages: &[ChatMessage],
        workspace_override: Option<&str>,
        api_key: Option<&str>,
    ) -> Result<(SessionRecord, Option<CreationGuard>), ChatError> {
        let mut guard = self.locks.lock(prefix.as_str()).await;

        let handoff = guard.as_ref().map(|created| created.session_id.clone());
        if let Some(id) = handoff {
            let found = self
                .blocking(move |store| store.find_by_session_id(&id))
                .await?;
            if let Some(mut record) = found {
                debug!(
                    session_id = %record.session_id,
                    fingerprint = %prefix.short(),
                    "resuming session created by a concurrent turn"
                );
                // Commit as a branch off the prefix; the creator's entry stays put.
                record.history_fingerprint = prefix.clone();
                return Ok((record, None));
            }
        }

        let key = prefix.clone();
        if let Some(record) = self.blocking(move |store| store.get(&key)).await? {
            debug!(session_id = %record.session_id, fingerprint = %prefix.short(), "session hit");
            return Ok((record, None));
        }

        let custom = workspace_override.and_then(|raw| self.workspaces.validate_override(raw));
        let managed = custom.is_none();
        let (session_id, workspace_dir) = match custom {
            Some(dir) => {
                self.workspaces.ensure(&dir)?;
                let id = self.backend.create_chat(&dir, api_key).await?;
                (id, dir)
            },
            None => self.create_managed(api_key).await?,
        };

        let title: String = messages
            .last()
            .map(|m| m.content.chars().take(TITLE_CHARS).collect())
            .unwrap_or_default();
        let record = SessionRecord::new(session_id, prefix.clone(), title, workspace_dir.clone());
        let (stored, inserted) = self
            .blocking(move |store| store.insert_if_absent(record))
            .await?;
        if inserted {
            info!(session_id = %stored.session_id, fingerprint = %prefix.short(), "session created");
        } else {
            warn!(
                session_id = %stored.session_id,
                fingerprint = %prefix.short(),
                "another process created this session first, resuming it"
            );
            if managed && stored.workspace_dir != workspace_dir {
                self.workspaces.discard(&workspace_dir);
            }
        }
        *guard = Some(stored.clone());
        Ok((stored, Some(guard)))
    }

    async fn create_managed(&self, api_key: Option<&str>) -> Result<(String, PathBuf), ChatError> {
        let temp = self.workspaces.allocate_temp()?;
        let id = match self.backend.create_chat(&temp, api_key).await {
            Ok(id) => id,
            Err(e) => {
                self.workspaces.discard(&temp);
                return Err(e.into());
            },
        };
        match self.workspaces.finalize(&temp, &id) {
            Ok(dir) => Ok((id, dir)),
            Err(e) => {
                self.workspaces.discard(&temp);
                Err(e.into())
            },
        }
    }

    async fn commit(
        &self,
        record: &SessionRecord,
        messages: &[ChatMessage],
        reply: &str,
    ) -> Result<SessionRecord, ChatError> {
        let next = next_fingerprint(messages, reply);
        let record = record.clone();
        let committed = self
            .blocking(move |store| store.commit(&record, next))
            .await?;
        debug!(
            session_id = %committed.session_id,
            fingerprint = %committed.history_fingerprint.short(),
            turns = committed.turns,
            "session advanced"
        );
        Ok(committed)
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T, ChatError>
    where
        T: Send + 'static,
        F: FnOnce(&SessionStore) -> Result<T, StoreError> + Send + 'static,
    {
        let store = self.store.clone();
        Ok(tokio::task::spawn_blocking(move || f(&store)).await??)
    }
}
