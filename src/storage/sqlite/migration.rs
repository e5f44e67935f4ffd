pub(crate) const MIGRATION: &str = r#"
    CREATE TABLE IF NOT EXISTS conversations (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        position INTEGER NOT NULL,
        last_activity INTEGER NOT NULL,
        document TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS selected_conversations (
        id TEXT PRIMARY KEY,
        position INTEGER NOT NULL
    );
"#;
