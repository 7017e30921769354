//! SQLite-backed durable conversation store.
//!
//! One row per conversation in `conversations`, one row per message in
//! `messages`. Live and evicted messages share the table and are told apart
//! by the `erased` flag; `position` keeps each list's order.
use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use chatloom_core::{
    ChatError, Conversation, ConversationConfig, ConversationParts, ConversationStatus,
    ConversationStore, Message, Model, Role,
};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS conversations (
        id                     TEXT PRIMARY KEY,
        user_id                TEXT NOT NULL,
        status                 TEXT NOT NULL,
        token_usage            INTEGER NOT NULL,
        model_name             TEXT NOT NULL,
        model_max_tokens       INTEGER NOT NULL,
        temperature            REAL NOT NULL,
        top_p                  REAL NOT NULL,
        n                      INTEGER NOT NULL,
        stop_json              TEXT NOT NULL,
        max_tokens             INTEGER NOT NULL,
        presence_penalty       REAL NOT NULL,
        frequency_penalty      REAL NOT NULL,
        initial_system_message TEXT NOT NULL,
        created_at             TEXT NOT NULL,
        updated_at             TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS messages (
        id              TEXT NOT NULL,
        conversation_id TEXT NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
        content         TEXT NOT NULL,
        role            TEXT NOT NULL,
        tokens          INTEGER NOT NULL,
        model_json      TEXT,
        created_at      TEXT NOT NULL,
        position        INTEGER NOT NULL,
        erased          INTEGER NOT NULL,
        PRIMARY KEY (conversation_id, erased, position)
    );
    CREATE INDEX IF NOT EXISTS idx_messages_conversation ON messages(conversation_id);";

pub struct SqliteConversationStore {
    conn: Mutex<Connection>,
}

impl SqliteConversationStore {
    /// Create or open a database at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref())
            .context("Failed to open SQLite conversation database")?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
            .context("Failed to configure SQLite")?;
        conn.execute_batch(SCHEMA)
            .context("Failed to initialize conversation schema")?;

        info!("SqliteConversationStore opened at {:?}", path.as_ref());
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// Open an in-memory database (for tests).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn: Mutex::new(conn) })
    }
}

fn storage_err(e: anyhow::Error) -> ChatError {
    ChatError::storage(format!("{e:#}"))
}

#[async_trait]
impl ConversationStore for SqliteConversationStore {
    async fn find_by_id(&self, id: &str) -> Result<Conversation, ChatError> {
        let conn = self.conn.lock().await;
        match load_conversation(&conn, id).map_err(storage_err)? {
            Some(parts) => Ok(Conversation::restore(parts)),
            None => Err(ChatError::NotFound(id.to_string())),
        }
    }

    async fn create(&self, conversation: &Conversation) -> Result<(), ChatError> {
        let mut conn = self.conn.lock().await;
        insert_conversation(&mut conn, conversation).map_err(storage_err)?;
        debug!(id = %conversation.id(), "Inserted conversation");
        Ok(())
    }

    async fn save(&self, conversation: &Conversation) -> Result<(), ChatError> {
        let mut conn = self.conn.lock().await;
        let found = update_conversation(&mut conn, conversation).map_err(storage_err)?;
        if !found {
            return Err(ChatError::NotFound(conversation.id().to_string()));
        }
        debug!(
            id = %conversation.id(),
            live = conversation.messages().len(),
            erased = conversation.erased_messages().len(),
            "Saved conversation"
        );
        Ok(())
    }
}

fn insert_conversation(conn: &mut Connection, conversation: &Conversation) -> Result<()> {
    let tx = conn.transaction()?;
    let config = conversation.config();
    let now = Utc::now().to_rfc3339();
    tx.execute(
        "INSERT INTO conversations (
             id, user_id, status, token_usage, model_name, model_max_tokens,
             temperature, top_p, n, stop_json, max_tokens, presence_penalty,
             frequency_penalty, initial_system_message, created_at, updated_at
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?15)",
        params![
            conversation.id(),
            conversation.user_id(),
            conversation.status().as_str(),
            conversation.token_usage(),
            config.model.name,
            config.model.max_tokens,
            config.temperature as f64,
            config.top_p as f64,
            config.n,
            serde_json::to_string(&config.stop)?,
            config.max_tokens,
            config.presence_penalty as f64,
            config.frequency_penalty as f64,
            serde_json::to_string(conversation.initial_system_message())?,
            now,
        ],
    )
    .with_context(|| format!("Failed to insert conversation {}", conversation.id()))?;
    write_messages(&tx, conversation)?;
    tx.commit()?;
    Ok(())
}

/// Returns `false` when no row exists for the conversation.
fn update_conversation(conn: &mut Connection, conversation: &Conversation) -> Result<bool> {
    let tx = conn.transaction()?;
    let updated = tx.execute(
        "UPDATE conversations SET status = ?2, token_usage = ?3, updated_at = ?4 WHERE id = ?1",
        params![
            conversation.id(),
            conversation.status().as_str(),
            conversation.token_usage(),
            Utc::now().to_rfc3339(),
        ],
    )?;
    if updated == 0 {
        return Ok(false);
    }

    tx.execute(
        "DELETE FROM messages WHERE conversation_id = ?1",
        params![conversation.id()],
    )?;
    write_messages(&tx, conversation)?;
    tx.commit()
        .with_context(|| format!("Failed to commit conversation {}", conversation.id()))?;
    Ok(true)
}

fn write_messages(tx: &Transaction<'_>, conversation: &Conversation) -> Result<()> {
    let mut stmt = tx.prepare(
        "INSERT INTO messages (
             id, conversation_id, content, role, tokens, model_json, created_at, position, erased
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
    )?;
    let lists = [
        (conversation.messages(), false),
        (conversation.erased_messages(), true),
    ];
    for (messages, erased) in lists {
        for (position, message) in messages.iter().enumerate() {
            let model_json = message.model.as_ref().map(serde_json::to_string).transpose()?;
            stmt.execute(params![
                message.id.to_string(),
                conversation.id(),
                message.content,
                message.role.as_str(),
                message.tokens,
                model_json,
                message.created_at.to_rfc3339(),
                position as i64,
                erased,
            ])?;
        }
    }
    Ok(())
}

struct ConversationRow {
    user_id: String,
    status: String,
    model_name: String,
    model_max_tokens: u32,
    temperature: f64,
    top_p: f64,
    n: u32,
    stop_json: String,
    max_tokens: u32,
    presence_penalty: f64,
    frequency_penalty: f64,
    initial_system_message: String,
}

struct MessageRow {
    id: String,
    content: String,
    role: String,
    tokens: u32,
    model_json: Option<String>,
    created_at: String,
    erased: bool,
}

fn load_conversation(conn: &Connection, id: &str) -> Result<Option<ConversationParts>> {
    let row = conn
        .query_row(
            "SELECT user_id, status, model_name, model_max_tokens, temperature, top_p, n,
                    stop_json, max_tokens, presence_penalty, frequency_penalty,
                    initial_system_message
             FROM conversations WHERE id = ?1",
            params![id],
            |row| {
                Ok(ConversationRow {
                    user_id: row.get(0)?,
                    status: row.get(1)?,
                    model_name: row.get(2)?,
                    model_max_tokens: row.get(3)?,
                    temperature: row.get(4)?,
                    top_p: row.get(5)?,
                    n: row.get(6)?,
                    stop_json: row.get(7)?,
                    max_tokens: row.get(8)?,
                    presence_penalty: row.get(9)?,
                    frequency_penalty: row.get(10)?,
                    initial_system_message: row.get(11)?,
                })
            },
        )
        .optional()
        .with_context(|| format!("Failed to query conversation {id}"))?;
    let Some(row) = row else {
        return Ok(None);
    };

    let mut stmt = conn.prepare(
        "SELECT id, content, role, tokens, model_json, created_at, erased
         FROM messages WHERE conversation_id = ?1
         ORDER BY erased, position",
    )?;
    let rows = stmt
        .query_map(params![id], |row| {
            Ok(MessageRow {
                id: row.get(0)?,
                content: row.get(1)?,
                role: row.get(2)?,
                tokens: row.get(3)?,
                model_json: row.get(4)?,
                created_at: row.get(5)?,
                erased: row.get(6)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut messages = Vec::new();
    let mut erased_messages = Vec::new();
    for row in rows {
        let erased = row.erased;
        let message = message_from_row(row)?;
        if erased {
            erased_messages.push(message);
        } else {
            messages.push(message);
        }
    }

    let config = ConversationConfig {
        model: Model::new(row.model_name, row.model_max_tokens),
        temperature: row.temperature as f32,
        top_p: row.top_p as f32,
        n: row.n,
        stop: serde_json::from_str(&row.stop_json).context("Corrupt stop list")?,
        max_tokens: row.max_tokens,
        presence_penalty: row.presence_penalty as f32,
        frequency_penalty: row.frequency_penalty as f32,
    };

    Ok(Some(ConversationParts {
        id: id.to_string(),
        user_id: row.user_id,
        initial_system_message: serde_json::from_str(&row.initial_system_message)
            .context("Corrupt initial system message")?,
        messages,
        erased_messages,
        status: row.status.parse::<ConversationStatus>()?,
        config,
    }))
}

fn message_from_row(row: MessageRow) -> Result<Message> {
    let model: Option<Model> = row
        .model_json
        .as_deref()
        .map(serde_json::from_str)
        .transpose()
        .context("Corrupt message model")?;
    Ok(Message {
        id: Uuid::parse_str(&row.id).context("Corrupt message id")?,
        role: row.role.parse::<Role>()?,
        content: row.content,
        tokens: row.tokens,
        created_at: DateTime::parse_from_rfc3339(&row.created_at)
            .context("Corrupt message timestamp")?
            .with_timezone(&Utc),
        model,
    })
}
