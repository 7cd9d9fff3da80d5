//! # Site
//!
//! One installation as the agent sees it.
//!
//! ## Layout
//! ```text
//! <root>/
//! ├── extensions/<name>/...     one directory per extension
//! ├── themes/<name>/...         one directory per theme
//! ├── uploads/...               media files, by storage-relative path
//! └── site.db                   SQLite site database
//!       ├── options             settings + activation state
//!       ├── media, media_meta   media library records
//!       ├── agent_tokens        application tokens
//!       └── <content tables>    migratable as table components
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::{debug, info};

use envsync_core::validation::validate_name;
use envsync_core::{ComponentKind, SiteStatus};

use crate::error::{AgentError, AgentResult};
use crate::AGENT_VERSION;

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("../../migrations/site");

/// File name of the site database inside the root.
pub const SITE_DB_FILE: &str = "site.db";

/// Directory holding media files inside the root.
pub const UPLOADS_DIR: &str = "uploads";

/// Option holding the JSON list of active extensions.
pub const ACTIVE_EXTENSIONS: &str = "active_extensions";

/// Option holding the active theme name.
pub const ACTIVE_THEME: &str = "active_theme";

const RESERVED_OPTIONS: [&str; 2] = [ACTIVE_EXTENSIONS, ACTIVE_THEME];

const INTERNAL_TABLES: [&str; 4] = ["options", "media", "media_meta", "agent_tokens"];

/// Tables the agent relies on itself; never exported or imported as content.
pub fn is_internal_table(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    INTERNAL_TABLES.contains(&lower.as_str())
        || lower.starts_with("sqlite_")
        || lower.starts_with("_sqlx_")
}

/// An installation: root directory plus site database.
///
/// Cloning is cheap: clones share the pool.
#[derive(Debug, Clone)]
pub struct Site {
    root: PathBuf,
    pool: SqlitePool,
}

impl Site {
    /// Opens the installation at `root`, with the database at `root/site.db`.
    pub async fn open(root: impl Into<PathBuf>) -> AgentResult<Self> {
        let root = root.into();
        let database = root.join(SITE_DB_FILE);
        Self::open_with_database(root, database).await
    }

    /// Opens the installation with a database outside the root.
    ///
    /// Creates the directory layout and the agent's own tables when missing.
    pub async fn open_with_database(
        root: impl Into<PathBuf>,
        database: impl AsRef<Path>,
    ) -> AgentResult<Self> {
        let root = root.into();
        info!(root = %root.display(), "Opening site");

        for dir in ["extensions", "themes", UPLOADS_DIR] {
            tokio::fs::create_dir_all(root.join(dir)).await?;
        }
        if let Some(parent) = database.as_ref().parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let options = SqliteConnectOptions::new()
            .filename(database.as_ref())
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .acquire_timeout(Duration::from_secs(30))
            .connect_with(options)
            .await?;

        MIGRATOR.run(&pool).await?;
        debug!("Site schema ready");

        Ok(Site { root, pool })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn uploads_dir(&self) -> PathBuf {
        self.root.join(UPLOADS_DIR)
    }

    /// Directory of one extension or theme.
    pub fn artifact_path(&self, kind: ComponentKind, name: &str) -> AgentResult<PathBuf> {
        let dir = kind.artifact_dir().ok_or_else(|| {
            AgentError::InvalidRequest(format!("{} is not an extension or theme", kind))
        })?;
        validate_name(kind.as_str(), name)?;

        let mut components = Path::new(name).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(_)), None) => Ok(self.root.join(dir).join(name)),
            _ => Err(AgentError::InvalidRequest(format!(
                "{} name '{}' must be a single directory name",
                kind, name
            ))),
        }
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    // =========================================================================
    // Artifacts
    // =========================================================================

    /// Installed extensions or themes, sorted by name.
    pub async fn list_artifacts(&self, kind: ComponentKind) -> AgentResult<Vec<String>> {
        let Some(dir) = kind.artifact_dir() else {
            return Ok(Vec::new());
        };

        let mut names = Vec::new();
        let mut entries = tokio::fs::read_dir(self.root.join(dir)).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                let name = entry.file_name().to_string_lossy().into_owned();
                if !name.starts_with('.') {
                    names.push(name);
                }
            }
        }
        names.sort();
        Ok(names)
    }

    pub async fn is_installed(&self, kind: ComponentKind, name: &str) -> AgentResult<bool> {
        let path = self.artifact_path(kind, name)?;
        Ok(tokio::fs::metadata(&path)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false))
    }

    pub async fn is_active(&self, kind: ComponentKind, name: &str) -> AgentResult<bool> {
        match kind {
            ComponentKind::Extension => Ok(self.active_extensions().await?.contains(name)),
            ComponentKind::Theme => {
                Ok(self.get_option(ACTIVE_THEME).await?.as_deref() == Some(name))
            }
            other => Err(AgentError::InvalidRequest(format!(
                "{} has no activation state",
                other
            ))),
        }
    }

    /// Activates an installed extension or theme.
    ///
    /// Extensions are added to the active set; a theme replaces the active one.
    pub async fn activate(&self, kind: ComponentKind, name: &str) -> AgentResult<()> {
        if !self.is_installed(kind, name).await? {
            return Err(AgentError::NotFound(format!("{} '{}' is not installed", kind, name)));
        }

        match kind {
            ComponentKind::Extension => {
                let mut active = self.active_extensions().await?;
                if active.insert(name.to_string()) {
                    let value = serde_json::to_string(&active)?;
                    self.set_option(ACTIVE_EXTENSIONS, &value).await?;
                }
            }
            ComponentKind::Theme => self.set_option(ACTIVE_THEME, name).await?,
            other => {
                return Err(AgentError::InvalidRequest(format!("{} cannot be activated", other)))
            }
        }

        info!(kind = %kind, name = %name, "Activated");
        Ok(())
    }

    async fn active_extensions(&self) -> AgentResult<BTreeSet<String>> {
        match self.get_option(ACTIVE_EXTENSIONS).await? {
            Some(raw) => Ok(serde_json::from_str(&raw)?),
            None => Ok(BTreeSet::new()),
        }
    }

    // =========================================================================
    // Settings
    // =========================================================================

    pub async fn get_option(&self, name: &str) -> AgentResult<Option<String>> {
        let value: Option<String> = sqlx::query_scalar("SELECT value FROM options WHERE name = ?1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(value)
    }

    pub async fn set_option(&self, name: &str, value: &str) -> AgentResult<()> {
        sqlx::query(
            "INSERT INTO options (name, value) VALUES (?1, ?2)
             ON CONFLICT (name) DO UPDATE SET value = excluded.value",
        )
        .bind(name)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Settings whose key starts with `prefix`, activation state excluded.
    pub async fn settings_with_prefix(&self, prefix: &str) -> AgentResult<BTreeMap<String, String>> {
        if prefix.is_empty() {
            return Err(AgentError::InvalidRequest("settings prefix is empty".into()));
        }

        let rows: Vec<(String, String)> = sqlx::query_as(
            "SELECT name, value FROM options
             WHERE substr(name, 1, length(?1)) = ?1
             ORDER BY name",
        )
        .bind(prefix)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .filter(|(name, _)| !RESERVED_OPTIONS.contains(&name.as_str()))
            .collect())
    }

    /// Writes settings, overwriting existing keys, in one transaction.
    pub async fn put_settings(&self, settings: &BTreeMap<String, String>) -> AgentResult<usize> {
        if let Some(reserved) = settings
            .keys()
            .find(|k| RESERVED_OPTIONS.contains(&k.as_str()))
        {
            return Err(AgentError::InvalidRequest(format!(
                "'{}' is managed through activation",
                reserved
            )));
        }

        let mut tx = self.pool.begin().await?;
        for (name, value) in settings {
            sqlx::query(
                "INSERT INTO options (name, value) VALUES (?1, ?2)
                 ON CONFLICT (name) DO UPDATE SET value = excluded.value",
            )
            .bind(name)
            .bind(value)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        Ok(settings.len())
    }

    // =========================================================================
    // Inventory
    // =========================================================================

    /// Content tables, sorted by name.
    pub async fn list_tables(&self) -> AgentResult<Vec<String>> {
        let names: Vec<String> = sqlx::query_scalar(
            "SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(names.into_iter().filter(|n| !is_internal_table(n)).collect())
    }

    pub async fn media_count(&self) -> AgentResult<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM media")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }

    /// The inventory the control application uses to populate selections.
    pub async fn status(&self) -> AgentResult<SiteStatus> {
        Ok(SiteStatus {
            extensions: self.list_artifacts(ComponentKind::Extension).await?,
            themes: self.list_artifacts(ComponentKind::Theme).await?,
            tables: self.list_tables().await?,
            media_count: self.media_count().await?,
            agent_version: AGENT_VERSION.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn site() -> (tempfile::TempDir, Site) {
        let dir = tempfile::tempdir().unwrap();
        let site = Site::open(dir.path()).await.unwrap();
        (dir, site)
    }

    #[test]
    fn test_internal_tables() {
        assert!(is_internal_table("options"));
        assert!(is_internal_table("Agent_Tokens"));
        assert!(is_internal_table("sqlite_sequence"));
        assert!(is_internal_table("_sqlx_migrations"));
        assert!(!is_internal_table("posts"));
    }

    #[tokio::test]
    async fn test_open_creates_layout() {
        let (dir, site) = site().await;
        assert!(dir.path().join("extensions").is_dir());
        assert!(dir.path().join("uploads").is_dir());
        assert!(dir.path().join(SITE_DB_FILE).is_file());

        let status = site.status().await.unwrap();
        assert!(status.tables.is_empty());
        assert_eq!(status.media_count, 0);
    }

    #[tokio::test]
    async fn test_activation() {
        let (dir, site) = site().await;
        std::fs::create_dir_all(dir.path().join("extensions/seo")).unwrap();
        std::fs::create_dir_all(dir.path().join("themes/dark")).unwrap();

        assert!(!site.is_active(ComponentKind::Extension, "seo").await.unwrap());
        site.activate(ComponentKind::Extension, "seo").await.unwrap();
        site.activate(ComponentKind::Theme, "dark").await.unwrap();

        assert!(site.is_active(ComponentKind::Extension, "seo").await.unwrap());
        assert!(site.is_active(ComponentKind::Theme, "dark").await.unwrap());

        let err = site.activate(ComponentKind::Extension, "cache").await.unwrap_err();
        assert!(matches!(err, AgentError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_settings_by_prefix() {
        let (_dir, site) = site().await;
        let mut settings = BTreeMap::new();
        settings.insert("seo_title".to_string(), "Home".to_string());
        settings.insert("seo_robots".to_string(), "index".to_string());
        settings.insert("cache_ttl".to_string(), "60".to_string());
        site.put_settings(&settings).await.unwrap();

        let seo = site.settings_with_prefix("seo").await.unwrap();
        assert_eq!(seo.len(), 2);
        assert_eq!(seo["seo_title"], "Home");

        settings.insert("seo_title".to_string(), "Start".to_string());
        site.put_settings(&settings).await.unwrap();
        assert_eq!(site.settings_with_prefix("seo_t").await.unwrap()["seo_title"], "Start");
    }

    #[tokio::test]
    async fn test_reserved_settings_rejected() {
        let (_dir, site) = site().await;
        let mut settings = BTreeMap::new();
        settings.insert(ACTIVE_THEME.to_string(), "dark".to_string());
        assert!(site.put_settings(&settings).await.is_err());
    }

    #[tokio::test]
    async fn test_inventory_lists_content_tables_only() {
        let (dir, site) = site().await;
        std::fs::create_dir_all(dir.path().join("themes/light")).unwrap();
        sqlx::query("CREATE TABLE posts (id INTEGER PRIMARY KEY, title TEXT)")
            .execute(site.pool())
            .await
            .unwrap();

        let status = site.status().await.unwrap();
        assert_eq!(status.tables, vec!["posts"]);
        assert_eq!(status.themes, vec!["light"]);
    }

    #[tokio::test]
    async fn test_artifact_path_rejects_traversal() {
        let (_dir, site) = site().await;
        assert!(site.artifact_path(ComponentKind::Extension, "../etc").is_err());
        assert!(site.artifact_path(ComponentKind::Table, "posts").is_err());
    }

    #[tokio::test]
    async fn test_artifact_path_rejects_current_dir() {
        let (_dir, site) = site().await;
        for name in [".", "...", "./"] {
            assert!(site.artifact_path(ComponentKind::Extension, name).is_err(), "{}", name);
            assert!(site.artifact_path(ComponentKind::Theme, name).is_err(), "{}", name);
        }
        let path = site.artifact_path(ComponentKind::Extension, "shop").unwrap();
        assert!(path.ends_with("extensions/shop"));
    }
}
