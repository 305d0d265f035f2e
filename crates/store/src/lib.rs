//! Durable persistence of chats, turns, and turn blocks. One `rusqlite`
//! connection behind a mutex; every write goes through typed errors rather
//! than raw `rusqlite::Error`.

mod db;
mod rows;
mod schema;

pub use db::{create_chat_with, create_turn_block_with, create_turn_with, Direction, TurnStore};

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use ts_domain::model::{BlockType, Chat, Turn, TurnBlock, TurnStatus};
    use uuid::Uuid;

    fn new_chat() -> Chat {
        let now = Utc::now();
        Chat {
            id: Uuid::new_v4(),
            project_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            title: Some("test chat".into()),
            last_viewed_turn_id: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    fn block(turn_id: Uuid, sequence: i64, text: &str) -> TurnBlock {
        TurnBlock {
            id: Uuid::new_v4(),
            turn_id,
            sequence,
            block_type: BlockType::Text,
            text_content: Some(text.into()),
            content: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn create_and_fetch_turn_path() {
        let store = TurnStore::open_in_memory().unwrap();
        let chat = new_chat();
        store.create_chat(&chat).unwrap();

        let root = Turn::new_user(Uuid::new_v4(), chat.id, None);
        store.create_turn(&root).unwrap();

        let reply = Turn::new_assistant(Uuid::new_v4(), chat.id, root.id, "m1".into());
        store.create_turn(&reply).unwrap();

        let path = store.get_turn_path(reply.id).unwrap();
        assert_eq!(path.len(), 2);
        assert_eq!(path[0].id, root.id);
        assert_eq!(path[1].id, reply.id);
    }

    #[test]
    fn duplicate_sequence_is_conflict() {
        let store = TurnStore::open_in_memory().unwrap();
        let chat = new_chat();
        store.create_chat(&chat).unwrap();
        let turn = Turn::new_user(Uuid::new_v4(), chat.id, None);
        store.create_turn(&turn).unwrap();

        store.create_turn_block(&block(turn.id, 0, "hello")).unwrap();
        let err = store.create_turn_block(&block(turn.id, 0, "again")).unwrap_err();
        assert!(matches!(err, ts_domain::Error::Conflict(_)));
    }

    #[test]
    fn blocks_ordered_by_sequence() {
        let store = TurnStore::open_in_memory().unwrap();
        let chat = new_chat();
        store.create_chat(&chat).unwrap();
        let turn = Turn::new_user(Uuid::new_v4(), chat.id, None);
        store.create_turn(&turn).unwrap();

        store.create_turn_block(&block(turn.id, 1, "second")).unwrap();
        store.create_turn_block(&block(turn.id, 0, "first")).unwrap();

        let blocks = store.get_turn_blocks(turn.id).unwrap();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].text_content.as_deref(), Some("first"));
        assert_eq!(blocks[1].text_content.as_deref(), Some("second"));
    }

    #[test]
    fn update_turn_status_sets_completed_at_on_terminal() {
        let store = TurnStore::open_in_memory().unwrap();
        let chat = new_chat();
        store.create_chat(&chat).unwrap();
        let turn = Turn::new_assistant(Uuid::new_v4(), chat.id, Uuid::new_v4(), "m".into());
        // not inserting the user turn; this one stands alone for the test
        store
            .create_turn(&Turn { prev_turn_id: None, ..turn.clone() })
            .unwrap();

        store
            .update_turn_status(turn.id, TurnStatus::Complete, None)
            .unwrap();
        let fetched = store.get_turn(turn.id).unwrap().unwrap();
        assert_eq!(fetched.status, TurnStatus::Complete);
        assert!(fetched.completed_at.is_some());
    }

    #[test]
    fn update_turn_status_records_error() {
        let store = TurnStore::open_in_memory().unwrap();
        let chat = new_chat();
        store.create_chat(&chat).unwrap();
        let turn = Turn::new_user(Uuid::new_v4(), chat.id, None);
        store.create_turn(&turn).unwrap();

        store
            .update_turn_status(turn.id, TurnStatus::Error, Some("boom"))
            .unwrap();
        let fetched = store.get_turn(turn.id).unwrap().unwrap();
        assert_eq!(fetched.status, TurnStatus::Error);
        assert_eq!(fetched.error.as_deref(), Some("boom"));
    }

    #[test]
    fn siblings_share_prev_turn_id() {
        let store = TurnStore::open_in_memory().unwrap();
        let chat = new_chat();
        store.create_chat(&chat).unwrap();
        let root = Turn::new_user(Uuid::new_v4(), chat.id, None);
        store.create_turn(&root).unwrap();

        let branch_a = Turn::new_assistant(Uuid::new_v4(), chat.id, root.id, "m".into());
        let branch_b = Turn::new_assistant(Uuid::new_v4(), chat.id, root.id, "m".into());
        store.create_turn(&branch_a).unwrap();
        store.create_turn(&branch_b).unwrap();

        let siblings = store.get_siblings(branch_a.id).unwrap();
        assert_eq!(siblings.len(), 2);
    }

    #[test]
    fn sweep_marks_streaming_turns_as_error() {
        let store = TurnStore::open_in_memory().unwrap();
        let chat = new_chat();
        store.create_chat(&chat).unwrap();
        let turn = Turn::new_assistant(Uuid::new_v4(), chat.id, Uuid::new_v4(), "m".into());
        store
            .create_turn(&Turn { prev_turn_id: None, ..turn.clone() })
            .unwrap();
        assert_eq!(turn.status, TurnStatus::Streaming);

        let swept = store.sweep_abandoned_streaming_turns().unwrap();
        assert_eq!(swept, 1);
        let fetched = store.get_turn(turn.id).unwrap().unwrap();
        assert_eq!(fetched.status, TurnStatus::Error);
        assert_eq!(fetched.error.as_deref(), Some("process restarted while streaming"));
    }

    #[test]
    fn deleting_turn_cascades_to_blocks() {
        let store = TurnStore::open_in_memory().unwrap();
        let chat = new_chat();
        store.create_chat(&chat).unwrap();
        let turn = Turn::new_user(Uuid::new_v4(), chat.id, None);
        store.create_turn(&turn).unwrap();
        store.create_turn_block(&block(turn.id, 0, "hi")).unwrap();

        store
            .transaction(|conn| {
                conn.execute("DELETE FROM turns WHERE id = ?1", rusqlite::params![turn.id.to_string()])?;
                Ok(())
            })
            .unwrap();

        let blocks = store.get_turn_blocks(turn.id).unwrap();
        assert!(blocks.is_empty());
    }

    #[test]
    fn paginated_turns_batch_load_blocks() {
        let store = TurnStore::open_in_memory().unwrap();
        let chat = new_chat();
        store.create_chat(&chat).unwrap();

        let mut prev = None;
        let mut ids = Vec::new();
        for i in 0..3 {
            let turn = if i == 0 {
                Turn::new_user(Uuid::new_v4(), chat.id, None)
            } else {
                Turn::new_assistant(Uuid::new_v4(), chat.id, prev.unwrap(), "m".into())
            };
            store.create_turn(&turn).unwrap();
            store.create_turn_block(&block(turn.id, 0, "x")).unwrap();
            prev = Some(turn.id);
            ids.push(turn.id);
        }

        let page = store
            .get_paginated_turns(chat.id, None, 10, Direction::After)
            .unwrap();
        assert_eq!(page.len(), 3);
        for (turn, blocks) in &page {
            assert_eq!(blocks.len(), 1);
            assert!(ids.contains(&turn.id));
        }
    }
}
