//! File-backed ledger store.
//!
//! Stores records on a filesystem shared by every handler process. Each event
//! gets its own directory of generation files:
//!
//! ```text
//! <root>/<event-id>/
//!   0.json                 # first record for this event
//!   1.json                 # record created after generation 0 expired
//!   1.json.tmp.<pid>.<n>   # staging file (ignored by readers)
//! ```
//!
//! The live record is the one with the highest generation number.
//!
//! # Atomic insert
//!
//! `put_if_absent` picks the next generation (0 when the directory is empty,
//! `g + 1` when generation `g` has expired) and creates it with an exclusive
//! hard link. Every invocation that saw the same state targets the same file
//! name, so exactly one of them wins, in this process or any other.
//!
//! # Reclamation
//!
//! Expired records are never read as live, but their files stay on disk until
//! [`FileLedger::prune_expired`] removes them. Pruning waits a grace period
//! past expiry so it cannot pull a directory out from under an in-flight
//! insert that has already read the expired generation.
//!
//! The async [`LedgerStore`] methods run their filesystem work on tokio's
//! blocking pool.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, warn};

use super::{
    EventRecord, EventStatus, InsertOutcome, LedgerError, LedgerStore, Result, validate_event_id,
};
use crate::persistence::{TEMP_MARKER, create_file_exclusive, replace_file};
use crate::types::EventId;

/// A ledger rooted at a directory, typically `<ledger_root>/<table>`.
#[derive(Debug, Clone)]
pub struct FileLedger {
    root: PathBuf,
}

impl FileLedger {
    /// Opens (creating if needed) a ledger rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(FileLedger { root })
    }

    /// Returns the root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn event_dir(&self, event_id: &EventId) -> PathBuf {
        self.root.join(event_id.as_str())
    }

    /// Removes records that expired more than `grace` before `now`, along with
    /// superseded generations of every event.
    ///
    /// Returns the number of event records reclaimed.
    pub fn prune_expired(&self, now: DateTime<Utc>, grace: Duration) -> Result<usize> {
        let mut reclaimed = 0;

        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if name.starts_with('.') || !entry.file_type()?.is_dir() {
                continue;
            }

            match prune_event_dir(&entry.path(), now, grace) {
                Ok(true) => reclaimed += 1,
                Ok(false) => {}
                Err(e) => {
                    // One bad directory must not stop the sweep.
                    warn!(event_id = %name, error = %e, "Failed to prune ledger entry");
                }
            }
        }

        debug!(reclaimed, root = %self.root.display(), "Pruned ledger");
        Ok(reclaimed)
    }
}

impl LedgerStore for FileLedger {
    async fn get(&self, event_id: &EventId) -> Result<Option<EventRecord>> {
        let event_id = event_id.clone();
        self.run_blocking(move |ledger| ledger.read_live(&event_id)).await
    }

    async fn put_if_absent(&self, event_id: &EventId, ttl: Duration) -> Result<InsertOutcome> {
        let event_id = event_id.clone();
        self.run_blocking(move |ledger| ledger.insert_next_generation(&event_id, ttl)).await
    }

    async fn update_status(&self, event_id: &EventId, status: EventStatus) -> Result<()> {
        let event_id = event_id.clone();
        self.run_blocking(move |ledger| {
            ledger.rewrite_current(&event_id, |record| record.status = status)
        })
        .await
    }

    async fn reopen(&self, event_id: &EventId, ttl: Duration) -> Result<()> {
        let event_id = event_id.clone();
        self.run_blocking(move |ledger| {
            ledger.rewrite_current(&event_id, |record| {
                *record = EventRecord::in_process(record.event_id.clone(), Utc::now(), ttl);
            })
        })
        .await
    }
}

impl FileLedger {
    /// Runs filesystem work on the blocking thread pool.
    async fn run_blocking<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&FileLedger) -> Result<T> + Send + 'static,
    {
        let ledger = self.clone();
        tokio::task::spawn_blocking(move || op(&ledger))
            .await
            .map_err(|e| LedgerError::Unavailable(format!("ledger task failed: {e}")))?
    }

    fn read_live(&self, event_id: &EventId) -> Result<Option<EventRecord>> {
        validate_event_id(event_id)?;

        let Some((_, path)) = find_current_generation(&self.event_dir(event_id))? else {
            return Ok(None);
        };

        match read_record(&path) {
            Ok(record) => Ok(Some(record)),
            // Pruned between listing and reading: the record is gone.
            Err(LedgerError::Io(e)) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn insert_next_generation(&self, event_id: &EventId, ttl: Duration) -> Result<InsertOutcome> {
        validate_event_id(event_id)?;

        let dir = self.event_dir(event_id);
        fs::create_dir_all(&dir)?;

        let now = Utc::now();
        let next_generation = match find_current_generation(&dir)? {
            None => 0,
            Some((generation, path)) => match read_record(&path) {
                Ok(record) if !record.is_expired(now) => return Ok(InsertOutcome::AlreadyExists),
                Ok(_) => generation + 1,
                Err(LedgerError::Io(e)) if e.kind() == io::ErrorKind::NotFound => generation + 1,
                Err(e) => return Err(e),
            },
        };

        let record = EventRecord::in_process(event_id.clone(), now, ttl);
        let contents = serde_json::to_vec(&record)?;

        if create_file_exclusive(&generation_path(&dir, next_generation), &contents)? {
            Ok(InsertOutcome::Inserted)
        } else {
            Ok(InsertOutcome::AlreadyExists)
        }
    }

    /// Applies `edit` to the current generation's record and writes it back
    /// in place.
    fn rewrite_current(&self, event_id: &EventId, edit: impl FnOnce(&mut EventRecord)) -> Result<()> {
        validate_event_id(event_id)?;

        let Some((_, path)) = find_current_generation(&self.event_dir(event_id))? else {
            return Err(LedgerError::NotFound(event_id.clone()));
        };

        let mut record = match read_record(&path) {
            Ok(record) => record,
            Err(LedgerError::Io(e)) if e.kind() == io::ErrorKind::NotFound => {
                return Err(LedgerError::NotFound(event_id.clone()));
            }
            Err(e) => return Err(e),
        };
        edit(&mut record);

        replace_file(&path, &serde_json::to_vec(&record)?)?;
        Ok(())
    }
}

/// Returns the path of generation `generation` inside an event directory.
fn generation_path(event_dir: &Path, generation: u64) -> PathBuf {
    event_dir.join(format!("{}.json", generation))
}

/// Parses `"<gen>.json"` into its generation number.
///
/// Staging files (`<gen>.json.tmp.*`) and anything else return `None`.
fn parse_generation_filename(filename: &str) -> Option<u64> {
    if filename.contains(TEMP_MARKER) {
        return None;
    }
    filename.strip_suffix(".json")?.parse().ok()
}

/// Finds the highest generation file in an event directory.
///
/// A missing directory means the event has never been recorded.
fn find_current_generation(event_dir: &Path) -> Result<Option<(u64, PathBuf)>> {
    let read_dir = match fs::read_dir(event_dir) {
        Ok(rd) => rd,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let mut highest: Option<(u64, PathBuf)> = None;
    for entry in read_dir {
        let path = entry?.path();
        let Some(generation) = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(parse_generation_filename)
        else {
            continue;
        };

        if highest.as_ref().is_none_or(|(current, _)| generation > *current) {
            highest = Some((generation, path));
        }
    }

    Ok(highest)
}

fn read_record(path: &Path) -> Result<EventRecord> {
    let bytes = fs::read(path)?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Prunes one event directory. Returns true if the whole entry was reclaimed.
fn prune_event_dir(event_dir: &Path, now: DateTime<Utc>, grace: Duration) -> Result<bool> {
    let Some((current, current_path)) = find_current_generation(event_dir)? else {
        return Ok(false);
    };

    for entry in fs::read_dir(event_dir)? {
        let path = entry?.path();
        let superseded = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(parse_generation_filename)
            .is_some_and(|generation| generation < current);
        if superseded {
            remove_if_present(&path)?;
        }
    }

    let record = read_record(&current_path)?;
    if now < record.expires_at + grace {
        return Ok(false);
    }

    remove_if_present(&current_path)?;
    // Fails if a staging file is still present; the next sweep retries.
    if let Err(e) = fs::remove_dir(event_dir) {
        debug!(dir = %event_dir.display(), error = %e, "Left event directory in place");
    }
    Ok(true)
}

fn remove_if_present(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn ttl() -> Duration {
        Duration::seconds(300)
    }

    fn write_record(ledger: &FileLedger, generation: u64, record: &EventRecord) {
        let dir = ledger.event_dir(&record.event_id);
        fs::create_dir_all(&dir).unwrap();
        replace_file(
            &generation_path(&dir, generation),
            &serde_json::to_vec(record).unwrap(),
        )
        .unwrap();
    }

    fn expired_record(id: &str, status: EventStatus, ago: Duration) -> EventRecord {
        EventRecord {
            event_id: EventId::new(id),
            status,
            expires_at: Utc::now() - ago,
        }
    }

    #[test]
    fn parse_generation_filename_valid() {
        assert_eq!(parse_generation_filename("0.json"), Some(0));
        assert_eq!(parse_generation_filename("42.json"), Some(42));
    }

    #[test]
    fn parse_generation_filename_invalid() {
        assert_eq!(parse_generation_filename("json"), None);
        assert_eq!(parse_generation_filename("abc.json"), None);
        assert_eq!(parse_generation_filename("0.txt"), None);
        assert_eq!(parse_generation_filename("0.json.tmp.12.0"), None);
    }

    #[test]
    fn find_current_generation_missing_dir() {
        let dir = tempdir().unwrap();
        let result = find_current_generation(&dir.path().join("Ev1")).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn find_current_generation_picks_highest_and_ignores_temp() {
        let dir = tempdir().unwrap();
        for generation in 0..=2 {
            fs::write(generation_path(dir.path(), generation), "{}").unwrap();
        }
        fs::write(dir.path().join("3.json.tmp.1.0"), "{}").unwrap();

        let (generation, path) = find_current_generation(dir.path()).unwrap().unwrap();
        assert_eq!(generation, 2);
        assert_eq!(path, dir.path().join("2.json"));
    }

    #[tokio::test]
    async fn insert_then_get() {
        let dir = tempdir().unwrap();
        let ledger = FileLedger::open(dir.path()).unwrap();
        let id = EventId::new("Ev1");

        assert_eq!(ledger.get(&id).await.unwrap(), None);
        assert_eq!(
            ledger.put_if_absent(&id, ttl()).await.unwrap(),
            InsertOutcome::Inserted
        );

        let record = ledger.get(&id).await.unwrap().unwrap();
        assert_eq!(record.event_id, id);
        assert_eq!(record.status, EventStatus::InProcess);
        assert!(dir.path().join("Ev1").join("0.json").exists());
    }

    #[tokio::test]
    async fn live_record_blocks_insert() {
        let dir = tempdir().unwrap();
        let ledger = FileLedger::open(dir.path()).unwrap();
        let id = EventId::new("Ev1");

        ledger.put_if_absent(&id, ttl()).await.unwrap();
        assert_eq!(
            ledger.put_if_absent(&id, ttl()).await.unwrap(),
            InsertOutcome::AlreadyExists
        );
    }

    #[tokio::test]
    async fn expired_record_is_reclaimed_in_next_generation() {
        let dir = tempdir().unwrap();
        let ledger = FileLedger::open(dir.path()).unwrap();
        let stale = expired_record("Ev3", EventStatus::InProcess, Duration::seconds(1));
        write_record(&ledger, 0, &stale);

        assert_eq!(
            ledger.put_if_absent(&stale.event_id, ttl()).await.unwrap(),
            InsertOutcome::Inserted
        );

        let record = ledger.get(&stale.event_id).await.unwrap().unwrap();
        assert!(!record.is_expired(Utc::now()));
        assert!(dir.path().join("Ev3").join("1.json").exists());
    }

    #[tokio::test]
    async fn update_status_rewrites_current_generation() {
        let dir = tempdir().unwrap();
        let ledger = FileLedger::open(dir.path()).unwrap();
        let id = EventId::new("Ev1");
        ledger.put_if_absent(&id, ttl()).await.unwrap();
        let before = ledger.get(&id).await.unwrap().unwrap();

        ledger.update_status(&id, EventStatus::Done).await.unwrap();

        let after = ledger.get(&id).await.unwrap().unwrap();
        assert_eq!(after.status, EventStatus::Done);
        assert_eq!(after.expires_at, before.expires_at);
    }

    #[tokio::test]
    async fn reopen_refreshes_expiry_in_current_generation() {
        let dir = tempdir().unwrap();
        let ledger = FileLedger::open(dir.path()).unwrap();
        let id = EventId::new("Ev2");
        write_record(
            &ledger,
            0,
            &EventRecord {
                event_id: id.clone(),
                status: EventStatus::Failed,
                expires_at: Utc::now() + Duration::seconds(1),
            },
        );

        let before = Utc::now();
        ledger.reopen(&id, ttl()).await.unwrap();

        let record = ledger.get(&id).await.unwrap().unwrap();
        assert_eq!(record.status, EventStatus::InProcess);
        assert!(record.expires_at >= before + ttl() - Duration::seconds(1));
        assert!(!dir.path().join("Ev2").join("1.json").exists());
    }

    #[tokio::test]
    async fn reopen_on_missing_record_fails() {
        let dir = tempdir().unwrap();
        let ledger = FileLedger::open(dir.path()).unwrap();

        let result = ledger.reopen(&EventId::new("ghost"), ttl()).await;
        assert!(matches!(result, Err(LedgerError::NotFound(_))));
    }

    #[tokio::test]
    async fn update_status_on_missing_record_fails() {
        let dir = tempdir().unwrap();
        let ledger = FileLedger::open(dir.path()).unwrap();

        let result = ledger
            .update_status(&EventId::new("ghost"), EventStatus::Failed)
            .await;
        assert!(matches!(result, Err(LedgerError::NotFound(_))));
    }

    #[tokio::test]
    async fn unknown_status_on_disk_is_an_error() {
        let dir = tempdir().unwrap();
        let ledger = FileLedger::open(dir.path()).unwrap();
        let event_dir = dir.path().join("Ev9");
        fs::create_dir_all(&event_dir).unwrap();
        fs::write(
            event_dir.join("0.json"),
            r#"{"event_id":"Ev9","status":"queued","expires_at":4102444800}"#,
        )
        .unwrap();

        let id = EventId::new("Ev9");
        assert!(ledger.get(&id).await.is_err());
        // Insert fails closed rather than overwriting what it cannot read.
        assert!(ledger.put_if_absent(&id, ttl()).await.is_err());
    }

    #[tokio::test]
    async fn rejects_path_traversal() {
        let dir = tempdir().unwrap();
        let ledger = FileLedger::open(dir.path().join("table")).unwrap();

        let result = ledger.put_if_absent(&EventId::new("../escape"), ttl()).await;
        assert!(matches!(result, Err(LedgerError::InvalidEventId(_))));
        assert!(!dir.path().join("escape").exists());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn separate_handles_race_to_one_insert() {
        let dir = tempdir().unwrap();
        let root = dir.path().to_path_buf();
        let id = EventId::new("Ev4");

        let handles: Vec<_> = (0..16)
            .map(|_| {
                // A fresh handle per task, as separate processes would have.
                let ledger = FileLedger::open(&root).unwrap();
                let id = id.clone();
                tokio::spawn(async move { ledger.put_if_absent(&id, ttl()).await.unwrap() })
            })
            .collect();

        let mut inserted = 0;
        for handle in handles {
            if handle.await.unwrap() == InsertOutcome::Inserted {
                inserted += 1;
            }
        }
        assert_eq!(inserted, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn racing_reclaims_of_expired_record_have_one_winner() {
        let dir = tempdir().unwrap();
        let root = dir.path().to_path_buf();
        let seed = FileLedger::open(&root).unwrap();
        let stale = expired_record("Ev5", EventStatus::InProcess, Duration::seconds(5));
        write_record(&seed, 0, &stale);

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let ledger = FileLedger::open(&root).unwrap();
                let id = stale.event_id.clone();
                tokio::spawn(async move { ledger.put_if_absent(&id, ttl()).await.unwrap() })
            })
            .collect();

        let mut inserted = 0;
        for handle in handles {
            if handle.await.unwrap() == InsertOutcome::Inserted {
                inserted += 1;
            }
        }
        assert_eq!(inserted, 1);
    }

    #[test]
    fn prune_respects_grace_and_removes_superseded_generations() {
        let dir = tempdir().unwrap();
        let ledger = FileLedger::open(dir.path()).unwrap();
        let grace = Duration::seconds(60);

        // Expired long ago: reclaimed.
        write_record(
            &ledger,
            0,
            &expired_record("old", EventStatus::Done, Duration::hours(1)),
        );
        // Expired, but still inside the grace period: kept.
        write_record(
            &ledger,
            0,
            &expired_record("recent", EventStatus::Failed, Duration::seconds(5)),
        );
        // Live record with a stale earlier generation.
        let live = EventRecord::in_process(EventId::new("live"), Utc::now(), ttl());
        write_record(
            &ledger,
            0,
            &expired_record("live", EventStatus::InProcess, Duration::hours(1)),
        );
        write_record(&ledger, 1, &live);

        let reclaimed = ledger.prune_expired(Utc::now(), grace).unwrap();
        assert_eq!(reclaimed, 1);

        assert!(!dir.path().join("old").exists());
        assert!(dir.path().join("recent").join("0.json").exists());
        assert!(!dir.path().join("live").join("0.json").exists());
        assert!(dir.path().join("live").join("1.json").exists());
    }

    #[tokio::test]
    async fn pruned_event_is_new_again() {
        let dir = tempdir().unwrap();
        let ledger = FileLedger::open(dir.path()).unwrap();
        let stale = expired_record("Ev6", EventStatus::Done, Duration::hours(2));
        write_record(&ledger, 0, &stale);

        ledger.prune_expired(Utc::now(), Duration::minutes(1)).unwrap();

        assert_eq!(ledger.get(&stale.event_id).await.unwrap(), None);
        assert_eq!(
            ledger.put_if_absent(&stale.event_id, ttl()).await.unwrap(),
            InsertOutcome::Inserted
        );
    }
}
