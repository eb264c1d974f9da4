//! Append-only JSONL chat history.
//!
//! One JSON object per newline-terminated line. Appends go through a
//! single writer lock and fsync so tail readers never observe a torn
//! line; a trailing line without `\n` is treated as unfinished and
//! ignored on read.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use cortex_domain::error::Result;
use cortex_domain::world::{ChatRole, ChatTurn};

pub struct ChatLog {
    path: PathBuf,
    /// Line-count cap; exceeded ⇒ copy-compact down to this many lines.
    max_lines: Option<usize>,
    write_lock: Mutex<()>,
}

impl ChatLog {
    pub fn new(path: impl Into<PathBuf>, max_lines: Option<usize>) -> Self {
        Self {
            path: path.into(),
            max_lines,
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one turn as a complete line, fsynced.
    pub fn append(&self, turn: &ChatTurn) -> Result<()> {
        let mut line = serde_json::to_string(turn)?;
        line.push('\n');

        let _guard = self.write_lock.lock();

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())?;
        file.sync_all()?;
        drop(file);

        if let Some(cap) = self.max_lines {
            self.compact_if_needed(cap)?;
        }
        Ok(())
    }

    /// Read the last `n` turns, optionally filtered by role.
    ///
    /// Tolerates a partial trailing line (in-flight append or crash) and
    /// skips malformed lines with a warning.
    pub fn tail(&self, n: usize, roles: Option<&[ChatRole]>) -> Result<Vec<ChatTurn>> {
        let mut turns = self.read_all()?;
        if let Some(roles) = roles {
            turns.retain(|t| roles.contains(&t.role));
        }
        let skip = turns.len().saturating_sub(n);
        Ok(turns.split_off(skip))
    }

    fn read_all(&self) -> Result<Vec<ChatTurn>> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut turns = Vec::new();
        let mut rest = raw.as_str();
        while let Some(pos) = rest.find('\n') {
            let line = &rest[..pos];
            rest = &rest[pos + 1..];
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<ChatTurn>(line) {
                Ok(turn) => turns.push(turn),
                Err(e) => {
                    tracing::warn!(path = %self.path.display(), error = %e, "skipping malformed chat line");
                }
            }
        }
        // `rest` now holds any unterminated trailing fragment; ignore it.
        Ok(turns)
    }

    /// Copy-compact: keep the newest `cap` lines, write to a new file,
    /// rename over the old one.
    fn compact_if_needed(&self, cap: usize) -> Result<()> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(_) => return Ok(()),
        };
        let complete: Vec<&str> = raw
            .split_inclusive('\n')
            .filter(|l| l.ends_with('\n'))
            .collect();
        if complete.len() <= cap {
            return Ok(());
        }

        let keep = &complete[complete.len() - cap..];
        let tmp_path = self.path.with_extension("jsonl.tmp");
        {
            let mut tmp = fs::File::create(&tmp_path)?;
            for line in keep {
                tmp.write_all(line.as_bytes())?;
            }
            tmp.sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)?;
        tracing::debug!(
            path = %self.path.display(),
            dropped = complete.len() - cap,
            "chat history compacted"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn log(dir: &TempDir, max_lines: Option<usize>) -> ChatLog {
        ChatLog::new(dir.path().join("chat_history.jsonl"), max_lines)
    }

    #[test]
    fn append_then_tail_roundtrips() {
        let dir = TempDir::new().unwrap();
        let chat = log(&dir, None);
        chat.append(&ChatTurn::now(ChatRole::Human, "hello")).unwrap();
        chat.append(&ChatTurn::now(ChatRole::Assistant, "hi there"))
            .unwrap();

        let turns = chat.tail(10, None).unwrap();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].content, "hello");
        assert_eq!(turns[1].role, ChatRole::Assistant);
    }

    #[test]
    fn tail_limits_to_newest_n() {
        let dir = TempDir::new().unwrap();
        let chat = log(&dir, None);
        for i in 0..5 {
            chat.append(&ChatTurn::now(ChatRole::Human, format!("m{i}")))
                .unwrap();
        }
        let turns = chat.tail(2, None).unwrap();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].content, "m3");
        assert_eq!(turns[1].content, "m4");
    }

    #[test]
    fn tail_filters_by_role() {
        let dir = TempDir::new().unwrap();
        let chat = log(&dir, None);
        chat.append(&ChatTurn::now(ChatRole::Human, "q")).unwrap();
        chat.append(&ChatTurn::now(ChatRole::Assistant, "a")).unwrap();
        chat.append(&ChatTurn::now(ChatRole::Human, "q2")).unwrap();

        let humans = chat.tail(10, Some(&[ChatRole::Human])).unwrap();
        assert_eq!(humans.len(), 2);
        assert!(humans.iter().all(|t| t.role == ChatRole::Human));
    }

    #[test]
    fn partial_trailing_line_is_ignored() {
        let dir = TempDir::new().unwrap();
        let chat = log(&dir, None);
        chat.append(&ChatTurn::now(ChatRole::Human, "complete"))
            .unwrap();
        // Simulate a torn append: no trailing newline.
        let mut file = fs::OpenOptions::new()
            .append(true)
            .open(chat.path())
            .unwrap();
        file.write_all(br#"{"ts":"2025-01-01T00:00:00Z","role":"human","content":"torn"#)
            .unwrap();

        let turns = chat.tail(10, None).unwrap();
        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0].content, "complete");
    }

    #[test]
    fn malformed_line_is_skipped() {
        let dir = TempDir::new().unwrap();
        let chat = log(&dir, None);
        chat.append(&ChatTurn::now(ChatRole::Human, "good")).unwrap();
        let mut file = fs::OpenOptions::new()
            .append(true)
            .open(chat.path())
            .unwrap();
        file.write_all(b"not json at all\n").unwrap();
        chat.append(&ChatTurn::now(ChatRole::Assistant, "also good"))
            .unwrap();

        let turns = chat.tail(10, None).unwrap();
        assert_eq!(turns.len(), 2);
    }

    #[test]
    fn missing_file_tails_empty() {
        let dir = TempDir::new().unwrap();
        let chat = log(&dir, None);
        assert!(chat.tail(5, None).unwrap().is_empty());
    }

    #[test]
    fn compaction_caps_line_count() {
        let dir = TempDir::new().unwrap();
        let chat = log(&dir, Some(3));
        for i in 0..6 {
            chat.append(&ChatTurn::now(ChatRole::Human, format!("m{i}")))
                .unwrap();
        }
        let turns = chat.tail(100, None).unwrap();
        assert_eq!(turns.len(), 3);
        assert_eq!(turns[0].content, "m3");
        assert_eq!(turns[2].content, "m5");
    }
}
