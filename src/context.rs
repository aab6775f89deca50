//! Context provider for task prompts.
//!
//! The engine treats context as opaque text: it loads it before planning,
//! appends a short summary after each completed task, and asks for
//! consolidation on shutdown.
//!
//! [`FileContextProvider`] keeps two markdown files in one directory:
//! - `short-term.md`: the most recent entries, oldest dropped first
//! - `long-term.md`: consolidated history, append-only

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

#[async_trait]
pub trait ContextProvider: Send + Sync {
    /// Text to prepend to prompts.
    async fn load_context(&self) -> anyhow::Result<String>;

    /// Record a short note about recent work.
    async fn update_short_term(&self, content: &str) -> anyhow::Result<()>;

    /// Fold short-term notes into long-term storage.
    async fn consolidate(&self) -> anyhow::Result<()>;
}

/// Context provider that remembers nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopContext;

#[async_trait]
impl ContextProvider for NoopContext {
    async fn load_context(&self) -> anyhow::Result<String> {
        Ok(String::new())
    }

    async fn update_short_term(&self, _content: &str) -> anyhow::Result<()> {
        Ok(())
    }

    async fn consolidate(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

const SHORT_TERM_FILE: &str = "short-term.md";
const LONG_TERM_FILE: &str = "long-term.md";
const ENTRY_SEPARATOR: &str = "\n---\n";
const DEFAULT_MAX_ENTRIES: usize = 20;
/// Characters of long-term history included in `load_context`
const LONG_TERM_TAIL_CHARS: usize = 4000;

pub struct FileContextProvider {
    dir: PathBuf,
    max_entries: usize,
    // serializes read-modify-write of the short-term file
    write_lock: Mutex<()>,
}

impl FileContextProvider {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            max_entries: DEFAULT_MAX_ENTRIES,
            write_lock: Mutex::new(()),
        }
    }

    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries.max(1);
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn short_term_path(&self) -> PathBuf {
        self.dir.join(SHORT_TERM_FILE)
    }

    fn long_term_path(&self) -> PathBuf {
        self.dir.join(LONG_TERM_FILE)
    }

    async fn read_entries(&self) -> anyhow::Result<Vec<String>> {
        let raw = read_or_empty(&self.short_term_path()).await?;
        Ok(raw
            .split(ENTRY_SEPARATOR)
            .map(|e| e.trim())
            .filter(|e| !e.is_empty())
            .map(String::from)
            .collect())
    }

    async fn write_entries(&self, entries: &[String]) -> anyhow::Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let mut body = entries.join(ENTRY_SEPARATOR);
        if !body.is_empty() {
            body.push('\n');
        }
        tokio::fs::write(self.short_term_path(), body).await?;
        Ok(())
    }
}

async fn read_or_empty(path: &Path) -> std::io::Result<String> {
    match tokio::fs::read_to_string(path).await {
        Ok(content) => Ok(content),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
        Err(e) => Err(e),
    }
}

#[async_trait]
impl ContextProvider for FileContextProvider {
    async fn load_context(&self) -> anyhow::Result<String> {
        let long_term = read_or_empty(&self.long_term_path()).await?;
        let short_term = self.read_entries().await?;

        let mut sections = Vec::new();
        if !long_term.trim().is_empty() {
            let chars: Vec<char> = long_term.trim().chars().collect();
            let start = chars.len().saturating_sub(LONG_TERM_TAIL_CHARS);
            let tail: String = chars[start..].iter().collect();
            sections.push(format!("## Long-term context\n{}", tail));
        }
        if !short_term.is_empty() {
            sections.push(format!("## Recent activity\n{}", short_term.join("\n\n")));
        }
        Ok(sections.join("\n\n"))
    }

    async fn update_short_term(&self, content: &str) -> anyhow::Result<()> {
        let content = content.trim();
        if content.is_empty() {
            return Ok(());
        }
        let _held = self.write_lock.lock().await;
        let mut entries = self.read_entries().await?;
        entries.push(format!("### {}\n{}", Utc::now().format("%Y-%m-%d %H:%M:%S UTC"), content));
        if entries.len() > self.max_entries {
            let excess = entries.len() - self.max_entries;
            entries.drain(..excess);
        }
        self.write_entries(&entries).await
    }

    async fn consolidate(&self) -> anyhow::Result<()> {
        let _held = self.write_lock.lock().await;
        let entries = self.read_entries().await?;
        if entries.is_empty() {
            return Ok(());
        }

        tokio::fs::create_dir_all(&self.dir).await?;
        let mut long_term = read_or_empty(&self.long_term_path()).await?;
        long_term.push_str(&format!(
            "\n## Session consolidated {}\n\n{}\n",
            Utc::now().format("%Y-%m-%d %H:%M:%S UTC"),
            entries.join("\n\n")
        ));
        tokio::fs::write(self.long_term_path(), long_term).await?;
        self.write_entries(&[]).await?;
        tracing::debug!(entries = entries.len(), dir = %self.dir.display(), "Consolidated short-term context");
        Ok(())
    }
}
