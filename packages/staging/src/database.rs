use std::path::Path;
use std::time::Duration;

use sea_orm::{ConnectOptions, Database, DatabaseConnection, DbErr};

pub async fn init_db(db_url: &str) -> Result<DatabaseConnection, DbErr> {
    ensure_sqlite_dir(db_url).await?;

    let mut opt = ConnectOptions::new(db_url.to_owned());

    // SQLite allows one writer at a time; keep the pool small there.
    let max_connections = if db_url.starts_with("sqlite:") { 5 } else { 20 };

    opt.max_connections(max_connections)
        .min_connections(1)
        .connect_timeout(Duration::from_secs(8))
        .acquire_timeout(Duration::from_secs(8))
        .sqlx_logging(false);

    let db = Database::connect(opt).await?;
    db.get_schema_registry("staging::entity::*")
        .sync(&db)
        .await?;

    Ok(db)
}

/// SQLite creates the file on `mode=rwc` but not its parent directory.
async fn ensure_sqlite_dir(db_url: &str) -> Result<(), DbErr> {
    let Some(rest) = db_url.strip_prefix("sqlite://") else {
        return Ok(());
    };
    let path = rest.split('?').next().unwrap_or_default();
    if path.is_empty() || path.starts_with(':') {
        return Ok(());
    }

    match Path::new(path).parent() {
        Some(dir) if !dir.as_os_str().is_empty() => tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| DbErr::Custom(format!("cannot create {}: {e}", dir.display()))),
        _ => Ok(()),
    }
}
