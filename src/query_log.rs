//! Append-only query logs used for offline evaluation.
//!
//! Every text and image query is recorded with the image the user was
//! looking for and that image's rank in the full ordering. Records are
//! handed to a writer thread, so a slow or failing disk never delays or
//! fails a search; write errors are only reported through the log.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{mpsc, Mutex};
use std::thread::JoinHandle;

use crate::engine::{ItemId, SessionId};

/// Log of text queries.
pub const TEXT_LOG: &str = "log.csv";
/// Log of image (similarity) queries.
pub const IMAGE_LOG: &str = "log_similarity.csv";

pub const CSV_HEADERS: [&str; 6] = ["query", "target", "session", "rank", "activity", "timestamp"];

#[derive(Debug, thiserror::Error)]
pub enum QueryLogError {
    #[error("query log writer has stopped")]
    Closed,

    #[error("io error: {0:?}")]
    IO(#[from] std::io::Error),

    #[error("csv error: {0:?}")]
    Csv(#[from] csv::Error),
}

/// Sink for query records.
pub trait QueryLogger: Send + Sync {
    fn append_text_query(
        &self,
        query: &str,
        target: Option<ItemId>,
        session: &SessionId,
        rank: i64,
        activity: &str,
    ) -> Result<(), QueryLogError>;

    fn append_image_query(
        &self,
        item: ItemId,
        target: Option<ItemId>,
        session: &SessionId,
        rank: i64,
    ) -> Result<(), QueryLogError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryKind {
    Text,
    Image,
}

impl QueryKind {
    pub fn file_name(&self) -> &'static str {
        match self {
            QueryKind::Text => TEXT_LOG,
            QueryKind::Image => IMAGE_LOG,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueryRecord {
    pub kind: QueryKind,
    pub query: String,
    pub target: Option<ItemId>,
    pub session: String,
    pub rank: i64,
    pub activity: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl QueryRecord {
    fn fields(&self) -> [String; 6] {
        [
            self.query.clone(),
            self.target.map(|t| t.to_string()).unwrap_or_default(),
            self.session.clone(),
            self.rank.to_string(),
            self.activity.clone(),
            self.timestamp.to_rfc3339(),
        ]
    }
}

enum Command {
    Record(QueryRecord),
    Flush(mpsc::Sender<()>),
}

/// Semicolon-separated query logs in a directory.
///
/// Dropping the log, or calling [`CsvQueryLog::shutdown`], waits until every
/// queued record has been written.
pub struct CsvQueryLog {
    dir: PathBuf,
    tx: Mutex<Option<mpsc::Sender<Command>>>,
    writer: Mutex<Option<JoinHandle<()>>>,
}

impl CsvQueryLog {
    /// Start the writer thread for logs in `dir`.
    pub fn start(dir: impl AsRef<Path>) -> Result<Self, QueryLogError> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;

        let (tx, rx) = mpsc::channel();
        let writer = std::thread::Builder::new()
            .name("query-log".to_string())
            .spawn({
                let dir = dir.clone();
                move || run_writer(dir, rx)
            })?;

        Ok(Self {
            dir,
            tx: Mutex::new(Some(tx)),
            writer: Mutex::new(Some(writer)),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Block until every record sent so far is on disk.
    pub fn flush(&self) -> Result<(), QueryLogError> {
        let (ack_tx, ack_rx) = mpsc::channel();
        self.send(Command::Flush(ack_tx))?;
        ack_rx.recv().map_err(|_| QueryLogError::Closed)
    }

    /// Stop accepting records and join the writer once the queue is drained.
    ///
    /// Later appends fail with [`QueryLogError::Closed`].
    pub fn shutdown(&self) {
        if let Ok(mut tx) = self.tx.lock() {
            tx.take();
        }

        let writer = self.writer.lock().ok().and_then(|mut writer| writer.take());
        if let Some(writer) = writer {
            log::info!("waiting for query log writer to stop");
            if writer.join().is_err() {
                log::error!("query log writer panicked");
            }
        }
    }

    fn send(&self, command: Command) -> Result<(), QueryLogError> {
        let tx = self.tx.lock().map_err(|_| QueryLogError::Closed)?;
        tx.as_ref()
            .ok_or(QueryLogError::Closed)?
            .send(command)
            .map_err(|_| QueryLogError::Closed)
    }
}

impl Drop for CsvQueryLog {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl QueryLogger for CsvQueryLog {
    fn append_text_query(
        &self,
        query: &str,
        target: Option<ItemId>,
        session: &SessionId,
        rank: i64,
        activity: &str,
    ) -> Result<(), QueryLogError> {
        self.send(Command::Record(QueryRecord {
            kind: QueryKind::Text,
            query: query.to_string(),
            target,
            session: session.to_string(),
            rank,
            activity: activity.to_string(),
            timestamp: chrono::Utc::now(),
        }))
    }

    fn append_image_query(
        &self,
        item: ItemId,
        target: Option<ItemId>,
        session: &SessionId,
        rank: i64,
    ) -> Result<(), QueryLogError> {
        self.send(Command::Record(QueryRecord {
            kind: QueryKind::Image,
            query: item.to_string(),
            target,
            session: session.to_string(),
            rank,
            activity: String::new(),
            timestamp: chrono::Utc::now(),
        }))
    }
}

fn run_writer(dir: PathBuf, rx: mpsc::Receiver<Command>) {
    let mut writers: HashMap<QueryKind, csv::Writer<File>> = HashMap::new();

    while let Ok(command) = rx.recv() {
        match command {
            Command::Record(record) => {
                if let Err(err) = write_record(&dir, &mut writers, &record) {
                    log::error!("failed to write {} entry: {err}", record.kind.file_name());
                    // reopen on the next record
                    writers.remove(&record.kind);
                }
            }
            Command::Flush(ack) => {
                for writer in writers.values_mut() {
                    if let Err(err) = writer.flush() {
                        log::error!("failed to flush query log: {err}");
                    }
                }
                let _ = ack.send(());
            }
        }
    }

    log::debug!("query log writer stopped");
}

fn write_record(
    dir: &Path,
    writers: &mut HashMap<QueryKind, csv::Writer<File>>,
    record: &QueryRecord,
) -> Result<(), QueryLogError> {
    if !writers.contains_key(&record.kind) {
        let writer = open_writer(&dir.join(record.kind.file_name()))?;
        writers.insert(record.kind, writer);
    }

    let writer = writers
        .get_mut(&record.kind)
        .ok_or(QueryLogError::Closed)?;
    writer.write_record(record.fields())?;
    writer.flush()?;
    Ok(())
}

fn open_writer(path: &Path) -> Result<csv::Writer<File>, QueryLogError> {
    let is_new = std::fs::metadata(path).map(|m| m.len() == 0).unwrap_or(true);

    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let mut writer = csv::WriterBuilder::new()
        .delimiter(b';')
        .has_headers(false)
        .from_writer(file);

    if is_new {
        writer.write_record(CSV_HEADERS)?;
    }

    Ok(writer)
}

/// Logger that drops every record, for one-shot command line searches.
pub struct DiscardQueryLog;

impl QueryLogger for DiscardQueryLog {
    fn append_text_query(
        &self,
        _query: &str,
        _target: Option<ItemId>,
        _session: &SessionId,
        _rank: i64,
        _activity: &str,
    ) -> Result<(), QueryLogError> {
        Ok(())
    }

    fn append_image_query(
        &self,
        _item: ItemId,
        _target: Option<ItemId>,
        _session: &SessionId,
        _rank: i64,
    ) -> Result<(), QueryLogError> {
        Ok(())
    }
}
