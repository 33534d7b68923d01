use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS messages (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            channel     TEXT NOT NULL,
            username    TEXT NOT NULL,
            message     TEXT NOT NULL,
            -- unix milliseconds; defaults to the insertion wall clock
            time        INTEGER NOT NULL
                        DEFAULT (CAST(strftime('%s', 'now') AS INTEGER) * 1000)
        );

        CREATE INDEX IF NOT EXISTS idx_messages_channel_time
            ON messages(channel, time);
        ",
    )?;

    info!("Message store migrations complete");
    Ok(())
}
