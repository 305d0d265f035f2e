//! Transactional relational store backing the conversation tree.
//!
//! One `rusqlite::Connection` behind a `Mutex`, following the same
//! open/open_in_memory/init_schema shape as `lanegrid-agtrace`'s index
//! database; queries are grouped by entity in sibling modules.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use ts_domain::error::{Error, Result};
use ts_domain::model::{Chat, Turn, TurnBlock, TurnStatus};

use crate::rows::{
    block_type_to_str, chat_from_row, role_to_str, status_to_str, turn_block_from_row,
    turn_from_row,
};
use crate::schema;

/// Direction for `get_paginated_turns` relative to `from_turn_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Before,
    After,
    Both,
}

pub struct TurnStore {
    conn: Mutex<Connection>,
}

impl TurnStore {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        schema::init_schema(&conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        schema::init_schema(&conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// Run `f` against a single sqlite transaction; rolled back on `Err`.
    pub fn transaction<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let result = f(&tx)?;
        tx.commit()?;
        Ok(result)
    }

    // ── Chats ────────────────────────────────────────────────────────

    pub fn create_chat(&self, chat: &Chat) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        create_chat_with(&conn, chat)
    }

    pub fn get_chat(&self, chat_id: Uuid) -> Result<Option<Chat>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, project_id, user_id, title, last_viewed_turn_id, created_at, updated_at, deleted_at
             FROM chats WHERE id = ?1",
            params![chat_id.to_string()],
            chat_from_row,
        )
        .optional()
        .map_err(Error::from)
    }

    pub fn update_chat_last_viewed(&self, chat_id: Uuid, turn_id: Option<Uuid>) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE chats SET last_viewed_turn_id = ?1, updated_at = ?2 WHERE id = ?3",
            params![
                turn_id.map(|t| t.to_string()),
                chrono::Utc::now().to_rfc3339(),
                chat_id.to_string()
            ],
        )?;
        Ok(())
    }

    // ── Turns ────────────────────────────────────────────────────────

    pub fn create_turn(&self, turn: &Turn) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        create_turn_with(&conn, turn)
    }

    pub fn get_turn(&self, turn_id: Uuid) -> Result<Option<Turn>> {
        let conn = self.conn.lock().unwrap();
        get_turn_with(&conn, turn_id)
    }

    pub fn update_turn_status(
        &self,
        turn_id: Uuid,
        status: TurnStatus,
        error: Option<&str>,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let completed_at = status.is_terminal().then(|| chrono::Utc::now().to_rfc3339());
        conn.execute(
            "UPDATE turns SET status = ?1, error = ?2, completed_at = COALESCE(?3, completed_at) WHERE id = ?4",
            params![status_to_str(status), error, completed_at, turn_id.to_string()],
        )?;
        Ok(())
    }

    pub fn update_turn_metadata(
        &self,
        turn_id: Uuid,
        model: Option<&str>,
        input_tokens: Option<i64>,
        output_tokens: Option<i64>,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE turns SET
                model = COALESCE(?1, model),
                input_tokens = COALESCE(?2, input_tokens),
                output_tokens = COALESCE(?3, output_tokens)
             WHERE id = ?4",
            params![model, input_tokens, output_tokens, turn_id.to_string()],
        )?;
        Ok(())
    }

    /// Ordered turns from the chat root to `turn_id` inclusive, via a
    /// recursive walk of `prev_turn_id`. Does not load blocks.
    pub fn get_turn_path(&self, turn_id: Uuid) -> Result<Vec<Turn>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            r#"
            WITH RECURSIVE path(id, chat_id, prev_turn_id, role, status, error, model,
                                 input_tokens, output_tokens, created_at, completed_at, depth) AS (
                SELECT id, chat_id, prev_turn_id, role, status, error, model,
                       input_tokens, output_tokens, created_at, completed_at, 0
                FROM turns WHERE id = ?1
                UNION ALL
                SELECT t.id, t.chat_id, t.prev_turn_id, t.role, t.status, t.error, t.model,
                       t.input_tokens, t.output_tokens, t.created_at, t.completed_at, p.depth + 1
                FROM turns t JOIN path p ON t.id = p.prev_turn_id
            )
            SELECT id, chat_id, prev_turn_id, role, status, error, model,
                   input_tokens, output_tokens, created_at, completed_at
            FROM path ORDER BY depth DESC
            "#,
        )?;
        let turns = stmt
            .query_map(params![turn_id.to_string()], turn_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(turns)
    }

    pub fn get_turn_blocks(&self, turn_id: Uuid) -> Result<Vec<TurnBlock>> {
        let conn = self.conn.lock().unwrap();
        get_turn_blocks_with(&conn, turn_id)
    }

    pub fn get_turn_with_blocks(&self, turn_id: Uuid) -> Result<Option<(Turn, Vec<TurnBlock>)>> {
        let conn = self.conn.lock().unwrap();
        let Some(turn) = get_turn_with(&conn, turn_id)? else {
            return Ok(None);
        };
        let blocks = get_turn_blocks_with(&conn, turn_id)?;
        Ok(Some((turn, blocks)))
    }

    /// All turns sharing `prev_turn_id` with `turn_id` (its siblings,
    /// `turn_id` included), for branch navigation.
    pub fn get_siblings(&self, turn_id: Uuid) -> Result<Vec<Turn>> {
        let conn = self.conn.lock().unwrap();
        let Some(turn) = get_turn_with(&conn, turn_id)? else {
            return Ok(Vec::new());
        };
        let mut stmt = conn.prepare(
            "SELECT id, chat_id, prev_turn_id, role, status, error, model,
                    input_tokens, output_tokens, created_at, completed_at
             FROM turns WHERE chat_id = ?1 AND prev_turn_id IS ?2
             ORDER BY created_at ASC",
        )?;
        let siblings = stmt
            .query_map(
                params![turn.chat_id.to_string(), turn.prev_turn_id.map(|t| t.to_string())],
                turn_from_row,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(siblings)
    }

    /// Paginate a chat's turns by creation order relative to `from_turn_id`,
    /// batch-loading blocks for the returned page (no N+1).
    pub fn get_paginated_turns(
        &self,
        chat_id: Uuid,
        from_turn_id: Option<Uuid>,
        limit: usize,
        direction: Direction,
    ) -> Result<Vec<(Turn, Vec<TurnBlock>)>> {
        let conn = self.conn.lock().unwrap();

        let anchor_created_at = match from_turn_id {
            Some(id) => match get_turn_with(&conn, id)? {
                Some(t) => Some(t.created_at.to_rfc3339()),
                None => return Err(Error::NotFound(format!("turn {id} not found"))),
            },
            None => None,
        };

        let turns: Vec<Turn> = match (anchor_created_at, direction) {
            (None, _) => {
                let mut stmt = conn.prepare(
                    "SELECT id, chat_id, prev_turn_id, role, status, error, model,
                            input_tokens, output_tokens, created_at, completed_at
                     FROM turns WHERE chat_id = ?1 ORDER BY created_at ASC LIMIT ?2",
                )?;
                let rows = stmt
                    .query_map(params![chat_id.to_string(), limit as i64], turn_from_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                rows
            }
            (Some(anchor), Direction::Before) => {
                let mut stmt = conn.prepare(
                    "SELECT id, chat_id, prev_turn_id, role, status, error, model,
                            input_tokens, output_tokens, created_at, completed_at
                     FROM turns WHERE chat_id = ?1 AND created_at < ?2
                     ORDER BY created_at DESC LIMIT ?3",
                )?;
                let mut rows = stmt
                    .query_map(params![chat_id.to_string(), anchor, limit as i64], turn_from_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                rows.reverse();
                rows
            }
            (Some(anchor), Direction::After) => {
                let mut stmt = conn.prepare(
                    "SELECT id, chat_id, prev_turn_id, role, status, error, model,
                            input_tokens, output_tokens, created_at, completed_at
                     FROM turns WHERE chat_id = ?1 AND created_at > ?2
                     ORDER BY created_at ASC LIMIT ?3",
                )?;
                let rows = stmt
                    .query_map(params![chat_id.to_string(), anchor, limit as i64], turn_from_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                rows
            }
            (Some(anchor), Direction::Both) => {
                let half = (limit / 2).max(1);
                let mut before_stmt = conn.prepare(
                    "SELECT id, chat_id, prev_turn_id, role, status, error, model,
                            input_tokens, output_tokens, created_at, completed_at
                     FROM turns WHERE chat_id = ?1 AND created_at < ?2
                     ORDER BY created_at DESC LIMIT ?3",
                )?;
                let mut before = before_stmt
                    .query_map(params![chat_id.to_string(), anchor, half as i64], turn_from_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                before.reverse();

                let mut after_stmt = conn.prepare(
                    "SELECT id, chat_id, prev_turn_id, role, status, error, model,
                            input_tokens, output_tokens, created_at, completed_at
                     FROM turns WHERE chat_id = ?1 AND created_at >= ?2
                     ORDER BY created_at ASC LIMIT ?3",
                )?;
                let after = after_stmt
                    .query_map(params![chat_id.to_string(), anchor, (limit - before.len()) as i64], turn_from_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;

                before.extend(after);
                before
            }
        };

        turns
            .into_iter()
            .map(|t| {
                let blocks = get_turn_blocks_with(&conn, t.id)?;
                Ok((t, blocks))
            })
            .collect()
    }

    // ── Turn blocks ──────────────────────────────────────────────────

    pub fn create_turn_block(&self, block: &TurnBlock) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        create_turn_block_with(&conn, block)
    }

    /// Startup reconciliation: any turn left `streaming` when the process
    /// last exited could not have had an Executor still running. Transition
    /// each to `error` so subscribers observe a terminal state.
    pub fn sweep_abandoned_streaming_turns(&self) -> Result<u64> {
        let conn = self.conn.lock().unwrap();
        let affected = conn.execute(
            "UPDATE turns SET status = ?1, error = ?2, completed_at = ?3
             WHERE status = ?4",
            params![
                status_to_str(TurnStatus::Error),
                "process restarted while streaming",
                chrono::Utc::now().to_rfc3339(),
                status_to_str(TurnStatus::Streaming),
            ],
        )?;
        Ok(affected as u64)
    }
}

/// Insert a chat row against an open connection or transaction. Exposed so
/// callers can compose it inside `TurnStore::transaction` (e.g. the
/// Streaming Service's atomic user-turn + assistant-turn creation).
pub fn create_chat_with(conn: &Connection, chat: &Chat) -> Result<()> {
    conn.execute(
        "INSERT INTO chats (id, project_id, user_id, title, last_viewed_turn_id, created_at, updated_at, deleted_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            chat.id.to_string(),
            chat.project_id.to_string(),
            chat.user_id.to_string(),
            chat.title,
            chat.last_viewed_turn_id.map(|t| t.to_string()),
            chat.created_at.to_rfc3339(),
            chat.updated_at.to_rfc3339(),
            chat.deleted_at.map(|d| d.to_rfc3339()),
        ],
    )?;
    Ok(())
}

/// Insert a turn row against an open connection or transaction.
pub fn create_turn_with(conn: &Connection, turn: &Turn) -> Result<()> {
    conn.execute(
        "INSERT INTO turns (id, chat_id, prev_turn_id, role, status, error, model,
                             input_tokens, output_tokens, created_at, completed_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            turn.id.to_string(),
            turn.chat_id.to_string(),
            turn.prev_turn_id.map(|t| t.to_string()),
            role_to_str(turn.role),
            status_to_str(turn.status),
            turn.error,
            turn.model,
            turn.input_tokens,
            turn.output_tokens,
            turn.created_at.to_rfc3339(),
            turn.completed_at.map(|d| d.to_rfc3339()),
        ],
    )?;
    Ok(())
}

fn get_turn_with(conn: &Connection, turn_id: Uuid) -> Result<Option<Turn>> {
    conn.query_row(
        "SELECT id, chat_id, prev_turn_id, role, status, error, model,
                input_tokens, output_tokens, created_at, completed_at
         FROM turns WHERE id = ?1",
        params![turn_id.to_string()],
        turn_from_row,
    )
    .optional()
    .map_err(Error::from)
}

fn get_turn_blocks_with(conn: &Connection, turn_id: Uuid) -> Result<Vec<TurnBlock>> {
    let mut stmt = conn.prepare(
        "SELECT id, turn_id, sequence, block_type, text_content, content, created_at
         FROM turn_blocks WHERE turn_id = ?1 ORDER BY sequence ASC",
    )?;
    let blocks = stmt
        .query_map(params![turn_id.to_string()], turn_block_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(blocks)
}

/// Insert a turn block against an open connection or transaction. Returns
/// [`Error::Conflict`] if `(turn_id, sequence)` already exists.
pub fn create_turn_block_with(conn: &Connection, block: &TurnBlock) -> Result<()> {
    let content = block
        .content
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;
    let result = conn.execute(
        "INSERT INTO turn_blocks (id, turn_id, sequence, block_type, text_content, content, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            block.id.to_string(),
            block.turn_id.to_string(),
            block.sequence,
            block_type_to_str(block.block_type),
            block.text_content,
            content,
            block.created_at.to_rfc3339(),
        ],
    );
    match result {
        Ok(_) => Ok(()),
        Err(rusqlite::Error::SqliteFailure(e, _))
            if e.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            Err(Error::Conflict(format!(
                "block already exists at turn {} sequence {}",
                block.turn_id, block.sequence
            )))
        }
        Err(e) => Err(Error::from(e)),
    }
}
