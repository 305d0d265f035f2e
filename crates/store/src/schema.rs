//! Schema DDL for the turn store.
//!
//! Three relations: `chats`, `turns`, `turn_blocks`. `turns.prev_turn_id` is
//! a self-reference forming the conversation tree; deleting a turn cascades
//! to its descendants. `chats.last_viewed_turn_id` closes the cycle back
//! into `turns` and is set null if its referent is deleted.

use rusqlite::Connection;

use ts_domain::error::Result;

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        PRAGMA foreign_keys = ON;

        CREATE TABLE IF NOT EXISTS chats (
            id                  TEXT PRIMARY KEY,
            project_id          TEXT NOT NULL,
            user_id             TEXT NOT NULL,
            title               TEXT,
            last_viewed_turn_id TEXT REFERENCES turns(id) ON DELETE SET NULL,
            created_at          TEXT NOT NULL,
            updated_at          TEXT NOT NULL,
            deleted_at          TEXT
        );

        CREATE TABLE IF NOT EXISTS turns (
            id             TEXT PRIMARY KEY,
            chat_id        TEXT NOT NULL REFERENCES chats(id) ON DELETE CASCADE,
            prev_turn_id   TEXT REFERENCES turns(id) ON DELETE CASCADE,
            role           TEXT NOT NULL,
            status         TEXT NOT NULL,
            error          TEXT,
            model          TEXT,
            input_tokens   INTEGER,
            output_tokens  INTEGER,
            created_at     TEXT NOT NULL,
            completed_at   TEXT
        );

        CREATE TABLE IF NOT EXISTS turn_blocks (
            id           TEXT PRIMARY KEY,
            turn_id      TEXT NOT NULL REFERENCES turns(id) ON DELETE CASCADE,
            sequence     INTEGER NOT NULL,
            block_type   TEXT NOT NULL,
            text_content TEXT,
            content      TEXT,
            created_at   TEXT NOT NULL,
            UNIQUE(turn_id, sequence)
        );

        CREATE INDEX IF NOT EXISTS idx_turns_chat ON turns(chat_id);
        CREATE INDEX IF NOT EXISTS idx_turns_prev ON turns(prev_turn_id);
        CREATE INDEX IF NOT EXISTS idx_turns_status ON turns(status);
        CREATE INDEX IF NOT EXISTS idx_turn_blocks_turn ON turn_blocks(turn_id, sequence);
        "#,
    )?;
    Ok(())
}
