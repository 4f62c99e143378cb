use arena_state::LogParser;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::events::EventSink;

/// Follows a growing log file, yielding complete lines.
#[derive(Debug)]
pub struct LogTail {
    path: PathBuf,
    offset: u64,
    /// Bytes after the last newline; decoded only once the line is complete.
    partial: Vec<u8>,
}

impl LogTail {
    /// Starts at the beginning of the file so a draft already in progress is replayed.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            offset: 0,
            partial: Vec::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// New complete lines since the last poll. A missing file yields nothing; a file
    /// shorter than the current offset was truncated or rotated and is re-read.
    pub fn poll(&mut self) -> io::Result<Vec<String>> {
        let mut file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let len = file.metadata()?.len();
        if len < self.offset {
            info!("{} shrank, reading from the start", self.path.display());
            self.offset = 0;
            self.partial.clear();
        }
        if len == self.offset {
            return Ok(Vec::new());
        }

        file.seek(SeekFrom::Start(self.offset))?;
        let read = file.read_to_end(&mut self.partial)?;
        self.offset += read as u64;

        let mut lines = Vec::new();
        while let Some(pos) = self.partial.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.partial.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim_end_matches(['\n', '\r']);
            if !line.is_empty() {
                lines.push(line.to_string());
            }
        }
        Ok(lines)
    }
}

/// Poll `path` until `stop` is set, feeding every recognised line to `sink`.
pub async fn watch_log(
    path: PathBuf,
    poll_interval: Duration,
    parser: LogParser,
    sink: EventSink,
    stop: Arc<AtomicBool>,
) {
    info!("Watching {}", path.display());
    let started = Instant::now();
    let parser = Arc::new(parser);
    let mut tail = Some(LogTail::new(path));

    while !stop.load(Ordering::SeqCst) {
        let Some(mut current) = tail.take() else {
            break;
        };
        let polled = tokio::task::spawn_blocking(move || {
            let lines = current.poll();
            (current, lines)
        })
        .await;

        match polled {
            Ok((current, lines)) => {
                match lines {
                    Ok(lines) => {
                        let arrival_ms = started.elapsed().as_millis() as u64;
                        for raw in &lines {
                            match parser.parse_line(raw) {
                                Ok(Some(line)) => sink.apply_line(&line, arrival_ms),
                                Ok(None) => {}
                                Err(e) => debug!("Skipping log line: {}", e),
                            }
                        }
                    }
                    Err(e) => warn!("Failed to read {}: {}", current.path().display(), e),
                }
                tail = Some(current);
            }
            Err(e) => {
                warn!("Log poll task failed: {}", e);
                break;
            }
        }

        tokio::time::sleep(poll_interval).await;
    }
    info!("Log watch stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn append(path: &Path, text: &str) {
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .unwrap();
        file.write_all(text.as_bytes()).unwrap();
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let mut tail = LogTail::new(dir.path().join("Arena.log"));
        assert!(tail.poll().unwrap().is_empty());
        assert_eq!(tail.offset(), 0);
    }

    #[test]
    fn test_reads_existing_content_then_new_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Arena.log");
        append(&path, "first\nsecond\n");

        let mut tail = LogTail::new(&path);
        assert_eq!(tail.poll().unwrap(), vec!["first", "second"]);
        assert!(tail.poll().unwrap().is_empty());

        append(&path, "third\r\n");
        assert_eq!(tail.poll().unwrap(), vec!["third"]);
    }

    #[test]
    fn test_partial_line_buffered() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Arena.log");
        append(&path, "D 12:00:00.0 Client cho");

        let mut tail = LogTail::new(&path);
        assert!(tail.poll().unwrap().is_empty());
        append(&path, "oses: Fireball (CS2_029)\nnext");
        assert_eq!(
            tail.poll().unwrap(),
            vec!["D 12:00:00.0 Client chooses: Fireball (CS2_029)"]
        );
    }

    #[test]
    fn test_multibyte_char_split_across_reads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Arena.log");
        let line = "Client chooses: Ragnaros the Firelord ★ (EX1_298)\n".as_bytes();
        let split = line.iter().position(|b| *b >= 0x80).unwrap() + 1;
        std::fs::write(&path, &line[..split]).unwrap();

        let mut tail = LogTail::new(&path);
        assert!(tail.poll().unwrap().is_empty());
        let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&line[split..]).unwrap();
        assert_eq!(
            tail.poll().unwrap(),
            vec!["Client chooses: Ragnaros the Firelord ★ (EX1_298)"]
        );
    }

    #[test]
    fn test_truncation_rereads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Arena.log");
        append(&path, "old line one\nold line two\n");

        let mut tail = LogTail::new(&path);
        assert_eq!(tail.poll().unwrap().len(), 2);

        std::fs::write(&path, "new\n").unwrap();
        assert_eq!(tail.poll().unwrap(), vec!["new"]);
        assert_eq!(tail.offset(), 4);
    }

    #[tokio::test]
    async fn test_watch_feeds_draft_machine() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Arena.log");
        append(
            &path,
            "D 10:00:00.0000000 SetDraftMode - DRAFTING\nunrelated noise\n",
        );

        let sink = EventSink::new(arena_state::DraftMachine::default());
        let stop = Arc::new(AtomicBool::new(false));
        let handle = tokio::spawn(watch_log(
            path,
            Duration::from_millis(10),
            LogParser::new().unwrap(),
            sink.clone(),
            stop.clone(),
        ));

        let deadline = Instant::now() + Duration::from_secs(5);
        while sink.draft().state() != arena_state::DraftState::Started {
            assert!(Instant::now() < deadline, "draft never started");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        stop.store(true, Ordering::SeqCst);
        handle.await.unwrap();
    }
}
