use crate::models::{
    ConversationRow, MessageRow, ParticipantRow, PinRow, ReactionRow, SeenRow, UserRow,
};
use crate::{Database, format_timestamp};
use anyhow::Result;
use chrono::{DateTime, Utc};
use courier_types::models::{Conversation, ParticipantRole, PinnedMessage};
use rusqlite::{Connection, Row};
use uuid::Uuid;

const MESSAGE_COLUMNS: &str =
    "id, conversation_id, sender_id, content, image, edited, forwarded_from_id, created_at";

impl Database {
    // -- Users --

    pub fn create_user(
        &self,
        id: Uuid,
        username: &str,
        display_name: &str,
        password_hash: &str,
        created_at: DateTime<Utc>,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, username, display_name, password, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                (
                    id.to_string(),
                    username,
                    display_name,
                    password_hash,
                    format_timestamp(created_at),
                ),
            )?;
            Ok(())
        })
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "username", username))
    }

    pub fn get_user_by_id(&self, id: Uuid) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "id", &id.to_string()))
    }

    /// Returns false if the user does not exist. `None` fields are left as is.
    pub fn update_user_profile(
        &self,
        id: Uuid,
        display_name: Option<&str>,
        avatar: Option<&str>,
    ) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE users
                 SET display_name = COALESCE(?2, display_name),
                     avatar = COALESCE(?3, avatar)
                 WHERE id = ?1",
                rusqlite::params![id.to_string(), display_name, avatar],
            )?;
            Ok(changed > 0)
        })
    }

    // -- Conversations --

    pub fn get_conversation(&self, id: Uuid) -> Result<Option<Conversation>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT id, pair_key, created_at, last_message_at FROM conversations WHERE id = ?1",
                    [id.to_string()],
                    conversation_from_row,
                )
                .optional()?;
            row.map(|row| load_conversation(conn, row)).transpose()
        })
    }

    pub fn find_conversation_by_pair(&self, pair_key: &str) -> Result<Option<Conversation>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT id, pair_key, created_at, last_message_at FROM conversations WHERE pair_key = ?1",
                    [pair_key],
                    conversation_from_row,
                )
                .optional()?;
            row.map(|row| load_conversation(conn, row)).transpose()
        })
    }

    /// Create a two-person conversation in one transaction. Fails with a
    /// UNIQUE violation if a conversation for `pair_key` already exists.
    pub fn create_direct_conversation(
        &self,
        id: Uuid,
        pair_key: &str,
        owner_id: Uuid,
        member_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let id = id.to_string();
        let at = format_timestamp(at);

        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO conversations (id, pair_key, created_at, last_message_at) VALUES (?1, ?2, ?3, ?3)",
                (&id, pair_key, &at),
            )?;
            for (user_id, role) in [
                (owner_id, ParticipantRole::Owner),
                (member_id, ParticipantRole::Member),
            ] {
                tx.execute(
                    "INSERT INTO participants (conversation_id, user_id, role, joined_at) VALUES (?1, ?2, ?3, ?4)",
                    (&id, user_id.to_string(), role.as_str(), &at),
                )?;
            }
            tx.commit()?;
            Ok(())
        })
    }

    pub fn is_participant(&self, conversation_id: Uuid, user_id: Uuid) -> Result<bool> {
        self.with_conn(|conn| {
            let found = conn
                .query_row(
                    "SELECT 1 FROM participants WHERE conversation_id = ?1 AND user_id = ?2",
                    (conversation_id.to_string(), user_id.to_string()),
                    |_| Ok(()),
                )
                .optional()?;
            Ok(found.is_some())
        })
    }

    /// Conversations the user participates in, most recently active first.
    pub fn list_conversations_for_user(&self, user_id: Uuid) -> Result<Vec<Conversation>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT c.id, c.pair_key, c.created_at, c.last_message_at
                 FROM conversations c
                 JOIN participants p ON p.conversation_id = c.id
                 WHERE p.user_id = ?1
                 ORDER BY c.last_message_at DESC",
            )?;
            let rows = stmt
                .query_map([user_id.to_string()], conversation_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            rows.into_iter()
                .map(|row| load_conversation(conn, row))
                .collect()
        })
    }

    /// Messages in the conversation that `user_id` has not seen.
    pub fn count_unseen(&self, conversation_id: Uuid, user_id: Uuid) -> Result<u32> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM messages m
                 WHERE m.conversation_id = ?1
                   AND NOT EXISTS (
                       SELECT 1 FROM message_seen s
                       WHERE s.message_id = m.id AND s.user_id = ?2
                   )",
                (conversation_id.to_string(), user_id.to_string()),
                |row| row.get(0),
            )?;
            Ok(count as u32)
        })
    }

    // -- Messages --

    /// Insert a message, mark it seen by its sender and bump the
    /// conversation's `last_message_at`, all in one transaction.
    pub fn insert_message(&self, message: &MessageRow) -> Result<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                &format!(
                    "INSERT INTO messages ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                    MESSAGE_COLUMNS
                ),
                rusqlite::params![
                    message.id,
                    message.conversation_id,
                    message.sender_id,
                    message.content,
                    message.image,
                    message.edited,
                    message.forwarded_from_id,
                    message.created_at,
                ],
            )?;
            tx.execute(
                "INSERT OR IGNORE INTO message_seen (message_id, user_id, seen_at) VALUES (?1, ?2, ?3)",
                (&message.id, &message.sender_id, &message.created_at),
            )?;
            tx.execute(
                "UPDATE conversations SET last_message_at = ?2 WHERE id = ?1",
                (&message.conversation_id, &message.created_at),
            )?;
            tx.commit()?;
            Ok(())
        })
    }

    pub fn get_message(&self, id: Uuid) -> Result<Option<MessageRow>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    &format!("SELECT {} FROM messages WHERE id = ?1", MESSAGE_COLUMNS),
                    [id.to_string()],
                    message_from_row,
                )
                .optional()?;
            Ok(row)
        })
    }

    /// All messages of a conversation, oldest first. Ties on `created_at`
    /// break by id so the order is stable.
    pub fn get_messages(&self, conversation_id: Uuid) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM messages WHERE conversation_id = ?1 ORDER BY created_at ASC, id ASC",
                MESSAGE_COLUMNS
            ))?;
            let rows = stmt
                .query_map([conversation_id.to_string()], message_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn get_last_message(&self, conversation_id: Uuid) -> Result<Option<MessageRow>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    &format!(
                        "SELECT {} FROM messages WHERE conversation_id = ?1
                         ORDER BY created_at DESC, id DESC LIMIT 1",
                        MESSAGE_COLUMNS
                    ),
                    [conversation_id.to_string()],
                    message_from_row,
                )
                .optional()?;
            Ok(row)
        })
    }

    /// Replace content and set the edited flag. Returns false if no such message.
    pub fn update_message_content(&self, id: Uuid, content: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE messages SET content = ?2, edited = 1 WHERE id = ?1",
                (id.to_string(), content),
            )?;
            Ok(changed > 0)
        })
    }

    /// Hard delete. Seen rows, reactions and pins go with it.
    pub fn delete_message(&self, id: Uuid) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute("DELETE FROM messages WHERE id = ?1", [id.to_string()])?;
            Ok(changed > 0)
        })
    }

    /// Mark every message in the conversation as seen by `user_id`.
    /// Returns how many receipts were created.
    pub fn mark_conversation_seen(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<usize> {
        self.with_conn(|conn| {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO message_seen (message_id, user_id, seen_at)
                 SELECT id, ?2, ?3 FROM messages WHERE conversation_id = ?1",
                (
                    conversation_id.to_string(),
                    user_id.to_string(),
                    format_timestamp(at),
                ),
            )?;
            Ok(inserted)
        })
    }

    /// Batch-fetch seen receipts for a set of message IDs.
    pub fn get_seen_for_messages(&self, message_ids: &[String]) -> Result<Vec<SeenRow>> {
        if message_ids.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| {
            let sql = format!(
                "SELECT message_id, user_id, seen_at FROM message_seen WHERE message_id IN ({})
                 ORDER BY seen_at ASC",
                placeholders(message_ids.len())
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(rusqlite::params_from_iter(message_ids), |row| {
                    Ok(SeenRow {
                        message_id: row.get(0)?,
                        user_id: row.get(1)?,
                        seen_at: row.get(2)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Reactions --

    pub fn insert_reaction(
        &self,
        id: Uuid,
        message_id: Uuid,
        user_id: Uuid,
        emoji: &str,
        at: DateTime<Utc>,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO reactions (id, message_id, user_id, emoji, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                (
                    id.to_string(),
                    message_id.to_string(),
                    user_id.to_string(),
                    emoji,
                    format_timestamp(at),
                ),
            )?;
            Ok(())
        })
    }

    /// Returns true if a row was removed.
    pub fn delete_reaction(&self, message_id: Uuid, user_id: Uuid, emoji: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let removed = conn.execute(
                "DELETE FROM reactions WHERE message_id = ?1 AND user_id = ?2 AND emoji = ?3",
                (message_id.to_string(), user_id.to_string(), emoji),
            )?;
            Ok(removed > 0)
        })
    }

    /// Batch-fetch reactions for a set of message IDs.
    pub fn get_reactions_for_messages(&self, message_ids: &[String]) -> Result<Vec<ReactionRow>> {
        if message_ids.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| {
            let sql = format!(
                "SELECT id, message_id, user_id, emoji, created_at FROM reactions WHERE message_id IN ({})
                 ORDER BY created_at ASC",
                placeholders(message_ids.len())
            );

            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(rusqlite::params_from_iter(message_ids), |row| {
                    Ok(ReactionRow {
                        id: row.get(0)?,
                        message_id: row.get(1)?,
                        user_id: row.get(2)?,
                        emoji: row.get(3)?,
                        created_at: row.get(4)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    // -- Pins --

    /// Insert a pin unless the conversation already holds `limit` pins.
    /// Returns false when the limit is reached. The count and the insert run
    /// under the same lock. Fails with a UNIQUE violation if the message is
    /// already pinned.
    pub fn insert_pin(&self, pin: &PinRow, limit: usize) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let count: i64 = tx.query_row(
                "SELECT COUNT(*) FROM pinned_messages WHERE conversation_id = ?1",
                [&pin.conversation_id],
                |row| row.get(0),
            )?;
            if count as usize >= limit {
                return Ok(false);
            }
            tx.execute(
                "INSERT INTO pinned_messages (id, conversation_id, message_id, pinned_by_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                (
                    &pin.id,
                    &pin.conversation_id,
                    &pin.message_id,
                    &pin.pinned_by_id,
                    &pin.created_at,
                ),
            )?;
            tx.commit()?;
            Ok(true)
        })
    }

    /// Pins of a conversation with their messages, oldest pin first.
    pub fn list_pins(&self, conversation_id: Uuid) -> Result<Vec<PinnedMessage>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT p.id, p.conversation_id, p.message_id, p.pinned_by_id, p.created_at,
                        m.id, m.conversation_id, m.sender_id, m.content, m.image, m.edited,
                        m.forwarded_from_id, m.created_at
                 FROM pinned_messages p
                 JOIN messages m ON m.id = p.message_id
                 WHERE p.conversation_id = ?1
                 ORDER BY p.created_at ASC",
            )?;
            let rows = stmt
                .query_map([conversation_id.to_string()], |row| {
                    let pin = PinRow {
                        id: row.get(0)?,
                        conversation_id: row.get(1)?,
                        message_id: row.get(2)?,
                        pinned_by_id: row.get(3)?,
                        created_at: row.get(4)?,
                    };
                    let message = MessageRow {
                        id: row.get(5)?,
                        conversation_id: row.get(6)?,
                        sender_id: row.get(7)?,
                        content: row.get(8)?,
                        image: row.get(9)?,
                        edited: row.get(10)?,
                        forwarded_from_id: row.get(11)?,
                        created_at: row.get(12)?,
                    };
                    Ok((pin, message))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            rows.into_iter()
                .map(|(pin, message)| pin.into_pinned(message))
                .collect()
        })
    }
}

fn query_user(conn: &Connection, column: &str, value: &str) -> Result<Option<UserRow>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT id, username, display_name, avatar, password, created_at FROM users WHERE {} = ?1",
        column
    ))?;

    let row = stmt
        .query_row([value], |row| {
            Ok(UserRow {
                id: row.get(0)?,
                username: row.get(1)?,
                display_name: row.get(2)?,
                avatar: row.get(3)?,
                password: row.get(4)?,
                created_at: row.get(5)?,
            })
        })
        .optional()?;

    Ok(row)
}

fn query_participants(conn: &Connection, conversation_id: &str) -> Result<Vec<ParticipantRow>> {
    let mut stmt = conn.prepare(
        "SELECT conversation_id, user_id, role, joined_at FROM participants
         WHERE conversation_id = ?1
         ORDER BY joined_at ASC, role DESC",
    )?;
    let rows = stmt
        .query_map([conversation_id], |row| {
            Ok(ParticipantRow {
                conversation_id: row.get(0)?,
                user_id: row.get(1)?,
                role: row.get(2)?,
                joined_at: row.get(3)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn load_conversation(conn: &Connection, row: ConversationRow) -> Result<Conversation> {
    let participants = query_participants(conn, &row.id)?;
    row.into_conversation(participants)
}

fn conversation_from_row(row: &Row<'_>) -> rusqlite::Result<ConversationRow> {
    Ok(ConversationRow {
        id: row.get(0)?,
        pair_key: row.get(1)?,
        created_at: row.get(2)?,
        last_message_at: row.get(3)?,
    })
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        sender_id: row.get(2)?,
        content: row.get(3)?,
        image: row.get(4)?,
        edited: row.get(5)?,
        forwarded_from_id: row.get(6)?,
        created_at: row.get(7)?,
    })
}

fn placeholders(n: usize) -> String {
    (1..=n)
        .map(|i| format!("?{}", i))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::is_unique_violation;

    fn seed_user(db: &Database, name: &str) -> Uuid {
        let id = Uuid::new_v4();
        db.create_user(id, name, name, "hash", Utc::now()).unwrap();
        id
    }

    fn message_row(conversation_id: Uuid, sender_id: Uuid, content: &str) -> MessageRow {
        MessageRow {
            id: Uuid::new_v4().to_string(),
            conversation_id: conversation_id.to_string(),
            sender_id: sender_id.to_string(),
            content: content.to_string(),
            image: None,
            edited: false,
            forwarded_from_id: None,
            created_at: format_timestamp(Utc::now()),
        }
    }

    #[test]
    fn duplicate_pair_is_a_unique_violation() {
        let db = Database::open_in_memory().unwrap();
        let a = seed_user(&db, "alice");
        let b = seed_user(&db, "bob");

        db.create_direct_conversation(Uuid::new_v4(), "k", a, b, Utc::now())
            .unwrap();
        let err = db
            .create_direct_conversation(Uuid::new_v4(), "k", b, a, Utc::now())
            .unwrap_err();
        assert!(is_unique_violation(&err));

        let conversation = db.find_conversation_by_pair("k").unwrap().unwrap();
        assert_eq!(conversation.participants.len(), 2);
        assert_eq!(conversation.participants[0].user_id, a);
        assert_eq!(conversation.participants[0].role, ParticipantRole::Owner);
    }

    #[test]
    fn insert_message_marks_sender_seen_and_bumps_conversation() {
        let db = Database::open_in_memory().unwrap();
        let a = seed_user(&db, "alice");
        let b = seed_user(&db, "bob");
        let cid = Uuid::new_v4();
        db.create_direct_conversation(cid, "k", a, b, Utc::now()).unwrap();

        let row = message_row(cid, a, "hello");
        db.insert_message(&row).unwrap();

        assert_eq!(db.count_unseen(cid, a).unwrap(), 0);
        assert_eq!(db.count_unseen(cid, b).unwrap(), 1);

        let conversation = db.get_conversation(cid).unwrap().unwrap();
        assert_eq!(format_timestamp(conversation.last_message_at), row.created_at);

        assert_eq!(db.mark_conversation_seen(cid, b, Utc::now()).unwrap(), 1);
        assert_eq!(db.mark_conversation_seen(cid, b, Utc::now()).unwrap(), 0);
        assert_eq!(db.count_unseen(cid, b).unwrap(), 0);
    }

    #[test]
    fn delete_message_cascades_but_spares_forwarded_copies() {
        let db = Database::open_in_memory().unwrap();
        let a = seed_user(&db, "alice");
        let b = seed_user(&db, "bob");
        let cid = Uuid::new_v4();
        db.create_direct_conversation(cid, "k", a, b, Utc::now()).unwrap();

        let original = message_row(cid, a, "hello");
        db.insert_message(&original).unwrap();
        let original_id: Uuid = original.id.parse().unwrap();

        let mut copy = message_row(cid, b, "hello");
        copy.forwarded_from_id = Some(original.id.clone());
        db.insert_message(&copy).unwrap();

        db.insert_reaction(Uuid::new_v4(), original_id, b, "👍", Utc::now())
            .unwrap();
        let pinned = db
            .insert_pin(
                &PinRow {
                    id: Uuid::new_v4().to_string(),
                    conversation_id: cid.to_string(),
                    message_id: original.id.clone(),
                    pinned_by_id: b.to_string(),
                    created_at: format_timestamp(Utc::now()),
                },
                10,
            )
            .unwrap();
        assert!(pinned);
        assert_eq!(db.list_pins(cid).unwrap().len(), 1);

        assert!(db.delete_message(original_id).unwrap());

        let ids = vec![original.id.clone()];
        assert!(db.get_reactions_for_messages(&ids).unwrap().is_empty());
        assert!(db.get_seen_for_messages(&ids).unwrap().is_empty());
        assert!(db.list_pins(cid).unwrap().is_empty());

        let survivor = db.get_message(copy.id.parse().unwrap()).unwrap().unwrap();
        assert_eq!(survivor.forwarded_from_id.as_deref(), Some(original.id.as_str()));
    }

    #[test]
    fn duplicate_reaction_is_a_unique_violation() {
        let db = Database::open_in_memory().unwrap();
        let a = seed_user(&db, "alice");
        let b = seed_user(&db, "bob");
        let cid = Uuid::new_v4();
        db.create_direct_conversation(cid, "k", a, b, Utc::now()).unwrap();
        let row = message_row(cid, a, "hi");
        db.insert_message(&row).unwrap();
        let mid: Uuid = row.id.parse().unwrap();

        db.insert_reaction(Uuid::new_v4(), mid, b, "🎉", Utc::now()).unwrap();
        let err = db
            .insert_reaction(Uuid::new_v4(), mid, b, "🎉", Utc::now())
            .unwrap_err();
        assert!(is_unique_violation(&err));
        assert_eq!(db.get_reactions_for_messages(&[mid.to_string()]).unwrap().len(), 1);
        assert!(db.delete_reaction(mid, b, "🎉").unwrap());
        assert!(!db.delete_reaction(mid, b, "🎉").unwrap());
    }

    #[test]
    fn conversations_listed_by_recency() {
        let db = Database::open_in_memory().unwrap();
        let a = seed_user(&db, "alice");
        let b = seed_user(&db, "bob");
        let c = seed_user(&db, "carol");

        let first = Uuid::new_v4();
        let second = Uuid::new_v4();
        db.create_direct_conversation(first, "ab", a, b, Utc::now()).unwrap();
        db.create_direct_conversation(second, "ac", a, c, Utc::now()).unwrap();

        let mut row = message_row(first, b, "bump");
        row.created_at = format_timestamp(Utc::now() + chrono::Duration::seconds(5));
        db.insert_message(&row).unwrap();

        let listed: Vec<Uuid> = db
            .list_conversations_for_user(a)
            .unwrap()
            .into_iter()
            .map(|c| c.id)
            .collect();
        assert_eq!(listed, vec![first, second]);
        assert_eq!(db.list_conversations_for_user(c).unwrap().len(), 1);
    }

    #[test]
    fn pin_limit_is_enforced() {
        let db = Database::open_in_memory().unwrap();
        let a = seed_user(&db, "alice");
        let b = seed_user(&db, "bob");
        let cid = Uuid::new_v4();
        db.create_direct_conversation(cid, "k", a, b, Utc::now()).unwrap();

        let mut outcomes = Vec::new();
        for i in 0..3 {
            let row = message_row(cid, a, &format!("m{}", i));
            db.insert_message(&row).unwrap();
            let pin = PinRow {
                id: Uuid::new_v4().to_string(),
                conversation_id: cid.to_string(),
                message_id: row.id.clone(),
                pinned_by_id: a.to_string(),
                created_at: format_timestamp(Utc::now()),
            };
            outcomes.push(db.insert_pin(&pin, 2).unwrap());
        }

        assert_eq!(outcomes, vec![true, true, false]);
        assert_eq!(db.list_pins(cid).unwrap().len(), 2);
    }
}
