pub(crate) mod migration;

#[cfg(test)]
#[path = "sqlite_test.rs"]
mod tests;

use async_trait::async_trait;
use eyre::{Context, Result};
use tokio_rusqlite::{Connection, OpenFlags, named_params};

use crate::models::Conversation;
use crate::storage::Storage;

use migration::MIGRATION;

/// Conversations are kept as JSON documents keyed by id, the list order is
/// stored next to them.
pub struct Sqlite {
    conn: Connection,
}

impl Sqlite {
    pub async fn new(path: Option<&str>) -> Result<Self> {
        let conn = match path {
            Some(path) => Connection::open_with_flags(
                path,
                OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE,
            )
            .await
            .wrap_err(format!("opening database path: {}", path))?,
            None => Connection::open_in_memory()
                .await
                .wrap_err("opening in-memory database")?,
        };

        let ret = Self { conn };
        ret.run_migration().await.wrap_err("running migration")?;
        Ok(ret)
    }

    async fn run_migration(&self) -> Result<()> {
        self.conn
            .call(|conn| Ok(conn.execute_batch(MIGRATION)?))
            .await
            .wrap_err("executing migration")?;
        Ok(())
    }
}

#[async_trait]
impl Storage for Sqlite {
    async fn load_conversations(&self) -> Result<Vec<Conversation>> {
        let conversations = self
            .conn
            .call(|conn| {
                let mut stmt =
                    conn.prepare("SELECT id, document FROM conversations ORDER BY position")?;
                let mut rows = stmt.query([])?;

                let mut conversations = vec![];
                while let Some(row) = rows.next()? {
                    let id: String = row.get(0)?;
                    let document: String = row.get(1)?;
                    match serde_json::from_str::<Conversation>(&document) {
                        Ok(conversation) => conversations.push(conversation),
                        Err(err) => {
                            log::warn!("Skipping unreadable conversation {}: {}", id, err);
                        }
                    }
                }
                Ok(conversations)
            })
            .await
            .wrap_err("loading conversations")?;
        Ok(conversations)
    }

    async fn save_conversations(&self, conversations: Vec<Conversation>) -> Result<()> {
        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                tx.execute("DELETE FROM conversations", [])?;
                for (position, conversation) in conversations.iter().enumerate() {
                    let document = serde_json::to_string(conversation)
                        .map_err(|e| tokio_rusqlite::Error::Other(Box::new(e)))?;
                    tx.execute(
                        "INSERT INTO conversations (id, name, position, last_activity, document) VALUES (:id, :name, :position, :last_activity, :document)",
                        named_params! {
                            ":id": conversation.id,
                            ":name": conversation.name,
                            ":position": position as i64,
                            ":last_activity": conversation.last_activity_date.timestamp_millis(),
                            ":document": document,
                        },
                    )?;
                }
                tx.commit()?;
                Ok(())
            })
            .await
            .wrap_err("saving conversations")?;
        Ok(())
    }

    async fn load_selected_ids(&self) -> Result<Vec<String>> {
        let ids = self
            .conn
            .call(|conn| {
                let mut stmt =
                    conn.prepare("SELECT id FROM selected_conversations ORDER BY position")?;
                let ids = stmt
                    .query_map([], |row| row.get::<_, String>(0))?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(ids)
            })
            .await
            .wrap_err("loading selection")?;
        Ok(ids)
    }

    async fn save_selected_ids(&self, ids: Vec<String>) -> Result<()> {
        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                tx.execute("DELETE FROM selected_conversations", [])?;
                for (position, id) in ids.iter().enumerate() {
                    tx.execute(
                        "INSERT OR IGNORE INTO selected_conversations (id, position) VALUES (:id, :position)",
                        named_params! {
                            ":id": id,
                            ":position": position as i64,
                        },
                    )?;
                }
                tx.commit()?;
                Ok(())
            })
            .await
            .wrap_err("saving selection")?;
        Ok(())
    }
}
