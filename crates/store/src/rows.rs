//! String <-> enum mapping for the columns stored as TEXT, and row -> domain
//! struct conversions shared by every query module.

use chrono::{DateTime, Utc};
use rusqlite::{Error as SqlError, Row};
use uuid::Uuid;

use ts_domain::model::{BlockType, Chat, Role, Turn, TurnBlock, TurnStatus};

pub fn role_to_str(role: Role) -> &'static str {
    match role {
        Role::User => "user",
        Role::Assistant => "assistant",
    }
}

pub fn role_from_str(s: &str) -> Role {
    match s {
        "assistant" => Role::Assistant,
        _ => Role::User,
    }
}

pub fn status_to_str(status: TurnStatus) -> &'static str {
    match status {
        TurnStatus::Pending => "pending",
        TurnStatus::Streaming => "streaming",
        TurnStatus::WaitingSubagents => "waiting_subagents",
        TurnStatus::Complete => "complete",
        TurnStatus::Cancelled => "cancelled",
        TurnStatus::Error => "error",
    }
}

pub fn status_from_str(s: &str) -> TurnStatus {
    match s {
        "streaming" => TurnStatus::Streaming,
        "waiting_subagents" => TurnStatus::WaitingSubagents,
        "complete" => TurnStatus::Complete,
        "cancelled" => TurnStatus::Cancelled,
        "error" => TurnStatus::Error,
        _ => TurnStatus::Pending,
    }
}

pub fn block_type_to_str(bt: BlockType) -> &'static str {
    match bt {
        BlockType::Text => "text",
        BlockType::Thinking => "thinking",
        BlockType::ToolUse => "tool_use",
        BlockType::ToolResult => "tool_result",
        BlockType::Image => "image",
        BlockType::Reference => "reference",
        BlockType::PartialReference => "partial_reference",
        BlockType::WebSearchUse => "web_search_use",
        BlockType::WebSearchResult => "web_search_result",
    }
}

pub fn block_type_from_str(s: &str) -> BlockType {
    match s {
        "thinking" => BlockType::Thinking,
        "tool_use" => BlockType::ToolUse,
        "tool_result" => BlockType::ToolResult,
        "image" => BlockType::Image,
        "reference" => BlockType::Reference,
        "partial_reference" => BlockType::PartialReference,
        "web_search_use" => BlockType::WebSearchUse,
        "web_search_result" => BlockType::WebSearchResult,
        _ => BlockType::Text,
    }
}

fn parse_uuid(s: String) -> Result<Uuid, SqlError> {
    Uuid::parse_str(&s).map_err(|e| SqlError::InvalidColumnType(0, e.to_string(), rusqlite::types::Type::Text))
}

fn parse_dt(s: String) -> Result<DateTime<Utc>, SqlError> {
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| SqlError::InvalidColumnType(0, e.to_string(), rusqlite::types::Type::Text))
}

pub fn chat_from_row(row: &Row) -> rusqlite::Result<Chat> {
    Ok(Chat {
        id: parse_uuid(row.get(0)?)?,
        project_id: parse_uuid(row.get(1)?)?,
        user_id: parse_uuid(row.get(2)?)?,
        title: row.get(3)?,
        last_viewed_turn_id: row.get::<_, Option<String>>(4)?.map(parse_uuid).transpose()?,
        created_at: parse_dt(row.get(5)?)?,
        updated_at: parse_dt(row.get(6)?)?,
        deleted_at: row.get::<_, Option<String>>(7)?.map(parse_dt).transpose()?,
    })
}

pub fn turn_from_row(row: &Row) -> rusqlite::Result<Turn> {
    Ok(Turn {
        id: parse_uuid(row.get(0)?)?,
        chat_id: parse_uuid(row.get(1)?)?,
        prev_turn_id: row.get::<_, Option<String>>(2)?.map(parse_uuid).transpose()?,
        role: role_from_str(&row.get::<_, String>(3)?),
        status: status_from_str(&row.get::<_, String>(4)?),
        error: row.get(5)?,
        model: row.get(6)?,
        input_tokens: row.get(7)?,
        output_tokens: row.get(8)?,
        created_at: parse_dt(row.get(9)?)?,
        completed_at: row.get::<_, Option<String>>(10)?.map(parse_dt).transpose()?,
    })
}

pub fn turn_block_from_row(row: &Row) -> rusqlite::Result<TurnBlock> {
    let content: Option<String> = row.get(5)?;
    Ok(TurnBlock {
        id: parse_uuid(row.get(0)?)?,
        turn_id: parse_uuid(row.get(1)?)?,
        sequence: row.get(2)?,
        block_type: block_type_from_str(&row.get::<_, String>(3)?),
        text_content: row.get(4)?,
        content: content
            .map(|c| serde_json::from_str(&c))
            .transpose()
            .map_err(|e: serde_json::Error| {
                SqlError::InvalidColumnType(5, e.to_string(), rusqlite::types::Type::Text)
            })?,
        created_at: parse_dt(row.get(6)?)?,
    })
}
