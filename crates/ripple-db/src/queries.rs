use crate::Database;
use anyhow::{Result, anyhow};
use chrono::{DateTime, Duration, Utc};
use ripple_types::Message;

impl Database {
    /// Append one message row. Never retried; the hub logs and carries on
    /// when this fails.
    pub fn insert_message(
        &self,
        channel: &str,
        username: &str,
        content: &str,
        time: DateTime<Utc>,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (channel, username, message, time) VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![channel, username, content, time.timestamp_millis()],
            )?;
            Ok(())
        })
    }

    /// All messages for `channel` no older than `window`, ascending by time
    /// (insertion order breaks ties within the same millisecond).
    pub fn recent_messages(&self, channel: &str, window: Duration) -> Result<Vec<Message>> {
        let since = (Utc::now() - window).timestamp_millis();

        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT username, message, time FROM messages
                 WHERE channel = ?1 AND time >= ?2
                 ORDER BY time ASC, id ASC",
            )?;
            let rows = stmt.query_map(rusqlite::params![channel, since], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            })?;

            let mut messages = Vec::new();
            for row in rows {
                let (username, content, millis) = row?;
                let time = DateTime::from_timestamp_millis(millis)
                    .ok_or_else(|| anyhow!("bad timestamp in messages row: {}", millis))?;
                messages.push(Message {
                    channel: channel.to_string(),
                    username,
                    content,
                    time,
                });
            }
            Ok(messages)
        })
    }

    /// Delete every message strictly older than `cutoff`, in one transaction.
    /// Rows timestamped exactly at the cutoff are retained. Returns the
    /// number of rows removed.
    pub fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let deleted = tx.execute(
                "DELETE FROM messages WHERE time < ?1",
                [cutoff.timestamp_millis()],
            )?;
            tx.commit()?;
            Ok(deleted)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(millis: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(millis).unwrap()
    }

    #[test]
    fn recent_returns_ascending_within_window() {
        let db = Database::open_in_memory().unwrap();
        let now = Utc::now();

        db.insert_message("general", "bob", "second", now - Duration::seconds(10))
            .unwrap();
        db.insert_message("general", "alice", "first", now - Duration::seconds(20))
            .unwrap();
        db.insert_message("general", "carol", "too old", now - Duration::minutes(10))
            .unwrap();
        db.insert_message("other", "dave", "wrong channel", now).unwrap();

        let messages = db.recent_messages("general", Duration::minutes(5)).unwrap();
        let contents: Vec<&str> = messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, ["first", "second"]);
        assert!(messages.windows(2).all(|w| w[0].time <= w[1].time));
    }

    #[test]
    fn history_visible_to_later_joiner() {
        // A sends "hi" at t0; B joins later and asks for a window covering t0.
        let db = Database::open_in_memory().unwrap();
        let t0 = Utc::now() - Duration::seconds(30);

        db.insert_message("general", "A", "hi", t0).unwrap();

        let messages = db.recent_messages("general", Duration::seconds(31)).unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].channel, "general");
        assert_eq!(messages[0].username, "A");
        assert_eq!(messages[0].content, "hi");
        assert_eq!(messages[0].time, at(t0.timestamp_millis()));
    }

    #[test]
    fn delete_older_than_is_a_strict_cutoff() {
        let db = Database::open_in_memory().unwrap();
        let cutoff = at(1_700_000_000_000);

        db.insert_message("x", "u", "older", at(1_699_999_999_999)).unwrap();
        db.insert_message("x", "u", "at cutoff", cutoff).unwrap();
        db.insert_message("x", "u", "newer", at(1_700_000_000_001)).unwrap();

        let deleted = db.delete_older_than(cutoff).unwrap();
        assert_eq!(deleted, 1);

        let remaining = db.recent_messages("x", Duration::days(365 * 10)).unwrap();
        let contents: Vec<&str> = remaining.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, ["at cutoff", "newer"]);
    }

    #[test]
    fn operations_fail_after_close() {
        let db = Database::open_in_memory().unwrap();
        db.close().unwrap();
        // Second close is a no-op.
        db.close().unwrap();

        let err = db
            .insert_message("general", "alice", "late", Utc::now())
            .unwrap_err();
        assert!(err.to_string().contains("closed"));
    }
}
