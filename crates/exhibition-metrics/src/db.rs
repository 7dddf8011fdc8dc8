use rusqlite::{Connection, Result};

/// Initialise the declaration table and its date index.
///
/// Safe to call on every startup, uses `IF NOT EXISTS` throughout.
/// `sys_date` is stored as `YYYY-MM-DD HH:MM:SS` text so range filters compare
/// lexicographically.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS invt_head (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            ebc_code    TEXT NOT NULL,
            ebc_name    TEXT NOT NULL,
            app_status  TEXT NOT NULL,
            sys_date    TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_invt_head_sys_date
            ON invt_head(sys_date);
        CREATE INDEX IF NOT EXISTS idx_invt_head_ebc
            ON invt_head(ebc_code, sys_date);",
    )
}
