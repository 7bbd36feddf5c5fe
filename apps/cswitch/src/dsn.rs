use std::error::Error;
use std::fs::OpenOptions;
use std::path::PathBuf;

const DB_FILE_NAME: &str = "app.db";

/// Explicit DSN, else a SQLite file `app.db` in the data dir. SQLite files
/// and their parent directories are created when missing.
pub(crate) fn resolve_dsn(
    input: Option<&str>,
    data_dir: &str,
) -> Result<String, Box<dyn Error + Send + Sync>> {
    if let Some(input) = input
        && !input.trim().is_empty()
    {
        ensure_sqlite_dsn(input)?;
        return Ok(input.to_string());
    }

    let dsn = sqlite_dsn_for(&PathBuf::from(data_dir).join(DB_FILE_NAME));
    ensure_sqlite_dsn(&dsn)?;
    Ok(dsn)
}

fn sqlite_dsn_for(path: &std::path::Path) -> String {
    let db_path = path.to_string_lossy();
    if db_path.starts_with('/') {
        format!("sqlite:///{}", db_path.trim_start_matches('/'))
    } else {
        format!("sqlite://{db_path}")
    }
}

pub(crate) fn ensure_sqlite_dsn(dsn: &str) -> Result<(), Box<dyn Error + Send + Sync>> {
    let Some(mut rest) = dsn.strip_prefix("sqlite:") else {
        return Ok(());
    };
    if let Some(stripped) = rest.strip_prefix("//") {
        rest = stripped;
    }
    if rest.is_empty() || rest.starts_with(":memory:") || rest.starts_with("memory:") {
        return Ok(());
    }

    let path_part = rest.split('?').next().unwrap_or("");
    if path_part.is_empty() {
        return Ok(());
    }

    let path = PathBuf::from(path_part);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    if !path.exists() {
        OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absolute_and_relative_paths_map_to_sqlite_urls() {
        assert_eq!(
            sqlite_dsn_for(&PathBuf::from("/home/u/.code-switch/app.db")),
            "sqlite:///home/u/.code-switch/app.db"
        );
        assert_eq!(
            sqlite_dsn_for(&PathBuf::from("./data/app.db")),
            "sqlite://./data/app.db"
        );
    }

    #[test]
    fn default_dsn_creates_the_database_file() {
        let dir = std::env::temp_dir().join(format!(
            "cswitch-dsn-{}",
            std::process::id()
        ));
        let dsn = resolve_dsn(None, &dir.to_string_lossy()).unwrap();
        assert!(dsn.ends_with("app.db"));
        assert!(dir.join("app.db").exists());

        assert_eq!(resolve_dsn(Some("sqlite::memory:"), "/nowhere").unwrap(), "sqlite::memory:");
        assert_eq!(
            resolve_dsn(Some("postgres://db/cs"), "/nowhere").unwrap(),
            "postgres://db/cs"
        );
    }
}
