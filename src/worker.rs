//! The single-writer dispatcher.
//!
//! One worker thread owns the [`Store`]; callers on any thread submit
//! requests over an unbounded crossbeam channel and block on a bounded(1)
//! reply channel created per request. FIFO channel order is execution order,
//! so replies complete in the order their requests were enqueued. Between
//! batches the worker runs one maintenance tick (at most one rehash step);
//! when the queue stays empty it backs off with a slowly growing sleep.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use tracing::{debug, error, info};

use crate::config::Config;
use crate::error::{DbError, Result};
use crate::parser::parse_command;
use crate::protocol::{Action, Reply, Request, ERR_DB_CLOSED};
use crate::store::Store;

// back-off starts after 100 ms of continuous idle, grows by an increment
// sized to reach the 1 s cap over five minutes of idling
const IDLE_THRESHOLD: Duration = Duration::from_millis(100);
const SLEEP_CAP: Duration = Duration::from_secs(1);
const SLEEP_INCREMENT: Duration = Duration::from_nanos(1_000_000_000 / (5 * 60 * 1000));

/// One queued unit of work.
struct QueueEntry {
    created_at: Instant,
    request: Request,
    reply_tx: Sender<Reply>,
}

/// A running database: the public handle over the worker thread.
///
/// `start` loads the snapshot and spawns the worker; `send` (or [`Db::command`])
/// submits work and blocks for the reply; `stop` issues a final
/// save-and-shutdown and joins the worker. Dropping a running handle stops it.
///
/// # Example
/// ```no_run
/// use memkv::{Config, Db, Reply};
///
/// # fn main() -> memkv::Result<()> {
/// let mut db = Db::start(Config::default())?;
/// assert_eq!(db.command("SET author cch137"), Reply::Bool(true));
/// assert_eq!(db.command("GET author"), Reply::Str("cch137".to_string()));
/// db.stop()?;
/// # Ok(())
/// # }
/// ```
pub struct Db {
    tx: Sender<QueueEntry>,
    worker: Option<JoinHandle<()>>,
    running: Arc<AtomicBool>,
}

impl Db {
    /// Loads the snapshot named by `config` (missing or malformed files
    /// yield an empty store) and spawns the worker thread.
    pub fn start(config: Config) -> Result<Db> {
        let store = Store::open(&config);
        let (tx, rx) = unbounded();
        let running = Arc::new(AtomicBool::new(true));
        let worker_running = Arc::clone(&running);
        let worker = thread::Builder::new()
            .name("memkv-worker".to_string())
            .spawn(move || run_worker(store, rx, worker_running))
            .map_err(|e| DbError::Worker(format!("failed to spawn worker thread: {}", e)))?;
        info!("database started");
        Ok(Db {
            tx,
            worker: Some(worker),
            running,
        })
    }

    /// true until a SHUTDOWN request has been executed
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Submits a request and blocks until its reply is ready. Once the
    /// worker has stopped, every send replies `ERR database is closed`.
    pub fn send(&self, request: Request) -> Reply {
        if !self.is_running() {
            return Reply::error(ERR_DB_CLOSED);
        }
        let (reply_tx, reply_rx) = bounded(1);
        let entry = QueueEntry {
            created_at: Instant::now(),
            request,
            reply_tx,
        };
        if self.tx.send(entry).is_err() {
            return Reply::error(ERR_DB_CLOSED);
        }
        match reply_rx.recv() {
            Ok(reply) => reply,
            // the worker exited with this entry still queued
            Err(_) => Reply::error(ERR_DB_CLOSED),
        }
    }

    /// parses a command line and sends it
    pub fn command(&self, line: &str) -> Reply {
        self.send(parse_command(line))
    }

    /// Saves and stops the worker (a no-op when already stopped), then joins
    /// the thread.
    pub fn stop(&mut self) -> Result<()> {
        if self.is_running() {
            self.send(Request::new(Action::Shutdown));
        }
        if let Some(worker) = self.worker.take() {
            worker
                .join()
                .map_err(|_| DbError::Worker("worker thread panicked".to_string()))?;
        }
        info!("database stopped");
        Ok(())
    }
}

impl Drop for Db {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            error!(error = %e, "error while stopping the database");
        }
    }
}

fn run_worker(mut store: Store, rx: Receiver<QueueEntry>, running: Arc<AtomicBool>) {
    let mut idle_since: Option<Instant> = None;
    let mut sleep_for = Duration::ZERO;

    loop {
        store.maintenance();

        // drain everything queued right now, in order
        let mut batch: Vec<QueueEntry> = rx.try_iter().collect();

        if batch.is_empty() {
            let idle_start = *idle_since.get_or_insert_with(Instant::now);
            if idle_start.elapsed() <= IDLE_THRESHOLD {
                thread::yield_now();
                continue;
            }
            if sleep_for < SLEEP_CAP {
                sleep_for += SLEEP_INCREMENT;
            }
            match rx.recv_timeout(sleep_for) {
                Ok(entry) => batch.push(entry),
                Err(RecvTimeoutError::Timeout) => continue,
                // every handle dropped without a shutdown; nothing left to do
                Err(RecvTimeoutError::Disconnected) => return,
            }
        }

        idle_since = None;
        sleep_for = Duration::ZERO;

        let mut shutdown = false;
        for entry in batch {
            let reply = store.execute(&entry.request);
            if entry.request.action == Action::Shutdown {
                shutdown = true;
                running.store(false, Ordering::Release);
            }
            debug!(
                action = ?entry.request.action,
                latency = ?entry.created_at.elapsed(),
                "request served"
            );
            // a caller that gave up waiting is not an error
            let _ = entry.reply_tx.send(reply);
        }
        if shutdown {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> (tempfile::TempDir, Db) {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = Config::new()
            .hash_seed(137)
            .persistence_filepath(dir.path().join("db.json"));
        let db = Db::start(config).expect("db starts");
        (dir, db)
    }

    #[test]
    fn commands_round_trip_through_the_worker() {
        let (_dir, db) = test_db();
        assert_eq!(db.command("SET author cch137"), Reply::Bool(true));
        assert_eq!(db.command("GET author"), Reply::Str("cch137".to_string()));
        assert_eq!(db.command("GET ghost"), Reply::Null);
    }

    #[test]
    fn replies_arrive_in_enqueue_order() {
        let (_dir, db) = test_db();
        for i in 0..100 {
            assert_eq!(db.command(&format!("RPUSH seq v{i}")), Reply::UInt(i + 1));
        }
        assert_eq!(db.command("LLEN seq"), Reply::UInt(100));
    }

    #[test]
    fn shutdown_closes_the_database() {
        let (_dir, mut db) = test_db();
        assert_eq!(db.command("SET k v"), Reply::Bool(true));
        assert_eq!(db.command("SHUTDOWN"), Reply::Bool(true));
        assert!(!db.is_running());
        assert_eq!(db.command("GET k"), Reply::error(ERR_DB_CLOSED));
        db.stop().expect("stop joins cleanly");
    }

    #[test]
    fn restart_reloads_the_shutdown_snapshot() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = Config::new()
            .hash_seed(7)
            .persistence_filepath(dir.path().join("db.json"));

        let mut db = Db::start(config.clone()).expect("db starts");
        db.command("SET author cch137");
        db.command("RPUSH l a b");
        db.stop().expect("stop");

        let db = Db::start(config).expect("db restarts");
        assert_eq!(db.command("GET author"), Reply::Str("cch137".to_string()));
        assert_eq!(db.command("LLEN l"), Reply::UInt(2));
    }

    #[test]
    fn concurrent_senders_all_get_replies() {
        let (_dir, db) = test_db();
        let db = Arc::new(db);
        let mut handles = Vec::new();
        for t in 0..4 {
            let db = Arc::clone(&db);
            handles.push(thread::spawn(move || {
                for i in 0..50 {
                    let reply = db.command(&format!("SET t{t}:k{i} v{i}"));
                    assert_eq!(reply, Reply::Bool(true));
                }
            }));
        }
        for handle in handles {
            handle.join().expect("sender thread");
        }
        let Reply::List(keys) = db.command("KEYS t*") else {
            panic!("expected a list");
        };
        assert_eq!(keys.len(), 200);
    }
}
