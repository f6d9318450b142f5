//! The storage engine: one executor per action, plus snapshot persistence.
//!
//! A `Store` is thread-confined to the worker; nothing in here locks. Every
//! executor validates its arguments, touches the dataset, and produces a
//! [`Reply`]. Contract violations (bad arity, WRONGTYPE, missing key) come
//! back as error replies; the worker never stops over them.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, ErrorKind, Write};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::Result;
use crate::list::DList;
use crate::protocol::{
    Action, Arg, Reply, Request, ERR_NO_SUCH_KEY, ERR_UNKNOWN_COMMAND, ERR_WRONGTYPE,
    ERR_WRONG_ARGS,
};
use crate::table::{Dataset, Entry, Value};
use crate::zset::{Aggregate, ZSet};

/// reply when a snapshot write fails (the underlying error is logged)
pub const ERR_SAVE_FAILED: &str = "ERR save failed";

/// The JSON document shape: strings as strings, lists as string arrays,
/// sorted sets as `{member: score}` objects (kept distinct from lists so the
/// two stay distinguishable when empty).
#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum SnapshotValue {
    Str(String),
    List(Vec<String>),
    ZSet(BTreeMap<String, f64>),
}

type Snapshot = BTreeMap<String, SnapshotValue>;

/// The dataset plus its run options; owned by the worker thread.
#[derive(Debug)]
pub struct Store {
    data: Dataset,
    seed: u32,
    persistence_filepath: PathBuf,
}

impl Store {
    /// Builds a store from `config` and loads the snapshot file if one
    /// exists. A missing or malformed snapshot yields an empty store with a
    /// warning, never an error.
    pub fn open(config: &Config) -> Store {
        let seed = config.resolved_seed();
        let mut store = Store {
            data: Dataset::new(seed),
            seed,
            persistence_filepath: config.persistence_filepath.clone(),
        };
        store.load();
        store
    }

    /// one maintenance tick: at most one rehash step
    pub fn maintenance(&mut self) {
        self.data.maintenance();
    }

    /// executes one request against the dataset
    pub fn execute(&mut self, request: &Request) -> Reply {
        let args = request.args.as_slice();
        match request.action {
            Action::Get => self.get(args),
            Action::Set => self.set(args),
            Action::Rename => self.rename(args),
            Action::Del => self.del(args),
            Action::LPush => self.push(args, true),
            Action::RPush => self.push(args, false),
            Action::LPop => self.pop(args, true),
            Action::RPop => self.pop(args, false),
            Action::LLen => self.llen(args),
            Action::LRange => self.lrange(args),
            Action::Keys => self.keys(args),
            Action::FlushAll => self.flushall(),
            Action::InfoDatasetMemory => Reply::UInt(self.data.mem_usage() as u64),
            Action::Save => match self.save() {
                Ok(()) => Reply::Bool(true),
                Err(e) => {
                    error!(error = %e, "snapshot save failed");
                    Reply::error(ERR_SAVE_FAILED)
                }
            },
            Action::Shutdown => {
                // the final save is best-effort; the worker stops either way
                if let Err(e) = self.save() {
                    error!(error = %e, "snapshot save failed during shutdown");
                }
                Reply::Bool(true)
            }
            Action::ZAdd => self.zadd(args),
            Action::ZScore => self.zscore(args),
            Action::ZCard => self.zcard(args),
            Action::ZCount => self.zcount(args),
            Action::ZRange => self.zrange(args),
            Action::ZRangeByScore => self.zrangebyscore(args),
            Action::ZRank => self.zrank(args),
            Action::ZRem => self.zrem(args),
            Action::ZRemRangeByScore => self.zremrangebyscore(args),
            Action::ZInterStore => self.zstore(args, true),
            Action::ZUnionStore => self.zstore(args, false),
            Action::UnknownCommand => Reply::error(ERR_UNKNOWN_COMMAND),
        }
    }

    // ---- string commands ----

    fn get(&self, args: &[Arg]) -> Reply {
        let Some(key) = arg_str(args, 0) else {
            return Reply::error(ERR_WRONG_ARGS);
        };
        match self.data.get(key) {
            None => Reply::Null,
            Some(Entry {
                value: Value::Str(s),
                ..
            }) => Reply::Str(s.clone()),
            Some(_) => Reply::error(ERR_WRONGTYPE),
        }
    }

    fn set(&mut self, args: &[Arg]) -> Reply {
        let (Some(key), Some(value)) = (arg_str(args, 0), arg_str(args, 1)) else {
            return Reply::error(ERR_WRONG_ARGS);
        };
        if let Some(entry) = self.data.get_mut(key) {
            // replacing drops whatever payload was there, list or zset included
            entry.value = Value::Str(value.to_string());
            return Reply::Bool(true);
        }
        self.data.add(Entry {
            key: key.to_string(),
            value: Value::Str(value.to_string()),
        });
        Reply::Bool(true)
    }

    fn rename(&mut self, args: &[Arg]) -> Reply {
        let (Some(old), Some(new)) = (arg_str(args, 0), arg_str(args, 1)) else {
            return Reply::error(ERR_WRONG_ARGS);
        };
        let Some(mut entry) = self.data.remove(old) else {
            return Reply::error(ERR_NO_SUCH_KEY);
        };
        // an existing entry under the new key is displaced
        self.data.remove(new);
        entry.key = new.to_string();
        self.data.add(entry);
        Reply::Bool(true)
    }

    fn del(&mut self, args: &[Arg]) -> Reply {
        if args.is_empty() {
            return Reply::error(ERR_WRONG_ARGS);
        }
        let mut deleted = 0u64;
        for arg in args {
            let Some(key) = arg.as_str() else {
                return Reply::error(ERR_WRONG_ARGS);
            };
            if self.data.remove(key).is_some() {
                deleted += 1;
            }
        }
        Reply::UInt(deleted)
    }

    // ---- list commands ----

    fn push(&mut self, args: &[Arg], front: bool) -> Reply {
        let Some(key) = arg_str(args, 0) else {
            return Reply::error(ERR_WRONG_ARGS);
        };
        if args.len() < 2 {
            return Reply::error(ERR_WRONG_ARGS);
        }
        let mut values = Vec::with_capacity(args.len() - 1);
        for arg in &args[1..] {
            match arg.as_str() {
                Some(s) => values.push(s.to_string()),
                None => return Reply::error(ERR_WRONG_ARGS),
            }
        }
        if self.data.get(key).is_none() {
            self.data.add(Entry {
                key: key.to_string(),
                value: Value::List(DList::new()),
            });
        }
        match self.data.get_mut(key) {
            Some(Entry {
                value: Value::List(list),
                ..
            }) => {
                for value in values {
                    if front {
                        list.push_front(value);
                    } else {
                        list.push_back(value);
                    }
                }
                Reply::UInt(list.len() as u64)
            }
            _ => Reply::error(ERR_WRONGTYPE),
        }
    }

    fn pop(&mut self, args: &[Arg], front: bool) -> Reply {
        let Some(key) = arg_str(args, 0) else {
            return Reply::error(ERR_WRONG_ARGS);
        };
        let count = match args.get(1) {
            None => 1,
            Some(arg) => match arg.to_uint() {
                Some(n) => n,
                None => return Reply::error(ERR_WRONG_ARGS),
            },
        };
        match self.data.get_mut(key) {
            None => Reply::Null,
            Some(Entry {
                value: Value::List(list),
                ..
            }) => {
                // replies carry the elements in pop order
                let mut popped = Vec::new();
                for _ in 0..count {
                    let item = if front {
                        list.pop_front()
                    } else {
                        list.pop_back()
                    };
                    match item {
                        Some(value) => popped.push(value),
                        None => break,
                    }
                }
                Reply::List(popped)
            }
            Some(_) => Reply::error(ERR_WRONGTYPE),
        }
    }

    fn llen(&self, args: &[Arg]) -> Reply {
        let Some(key) = arg_str(args, 0) else {
            return Reply::error(ERR_WRONG_ARGS);
        };
        match self.data.get(key) {
            None => Reply::UInt(0),
            Some(Entry {
                value: Value::List(list),
                ..
            }) => Reply::UInt(list.len() as u64),
            Some(_) => Reply::error(ERR_WRONGTYPE),
        }
    }

    fn lrange(&self, args: &[Arg]) -> Reply {
        let Some(key) = arg_str(args, 0) else {
            return Reply::error(ERR_WRONG_ARGS);
        };
        let start = match args.get(1) {
            None => 0,
            Some(arg) => match arg.to_uint() {
                Some(n) => n as usize,
                None => return Reply::error(ERR_WRONG_ARGS),
            },
        };
        let stop = match args.get(2).map(stop_index) {
            None => StopIndex::End,
            Some(Some(stop)) => stop,
            Some(None) => return Reply::error(ERR_WRONG_ARGS),
        };
        match self.data.get(key) {
            None => Reply::List(Vec::new()),
            Some(Entry {
                value: Value::List(list),
                ..
            }) => {
                let stop = stop.resolve(list.len());
                Reply::List(list.range(start, stop))
            }
            Some(_) => Reply::error(ERR_WRONGTYPE),
        }
    }

    fn keys(&self, args: &[Arg]) -> Reply {
        let Some(pattern) = arg_str(args, 0) else {
            return Reply::error(ERR_WRONG_ARGS);
        };
        Reply::List(self.data.keys_matching(pattern))
    }

    fn flushall(&mut self) -> Reply {
        self.data = Dataset::new(self.seed);
        Reply::Bool(true)
    }

    // ---- sorted-set commands ----

    fn zadd(&mut self, args: &[Arg]) -> Reply {
        let Some(key) = arg_str(args, 0) else {
            return Reply::error(ERR_WRONG_ARGS);
        };
        let (Some(score), Some(member)) = (
            args.get(1).and_then(Arg::to_float),
            arg_str(args, 2),
        ) else {
            return Reply::error(ERR_WRONG_ARGS);
        };
        if self.data.get(key).is_none() {
            self.data.add(Entry {
                key: key.to_string(),
                value: Value::ZSet(ZSet::new()),
            });
        }
        match self.data.get_mut(key) {
            Some(Entry {
                value: Value::ZSet(zset),
                ..
            }) => Reply::UInt(u64::from(zset.insert(member, score))),
            _ => Reply::error(ERR_WRONGTYPE),
        }
    }

    fn zscore(&self, args: &[Arg]) -> Reply {
        let (Some(key), Some(member)) = (arg_str(args, 0), arg_str(args, 1)) else {
            return Reply::error(ERR_WRONG_ARGS);
        };
        match self.zset_of(key) {
            ZSetLookup::Missing => Reply::Null,
            ZSetLookup::WrongType => Reply::error(ERR_WRONGTYPE),
            ZSetLookup::Found(zset) => match zset.score(member) {
                Some(score) => Reply::Double(score),
                None => Reply::Null,
            },
        }
    }

    fn zcard(&self, args: &[Arg]) -> Reply {
        let Some(key) = arg_str(args, 0) else {
            return Reply::error(ERR_WRONG_ARGS);
        };
        match self.zset_of(key) {
            ZSetLookup::Missing => Reply::UInt(0),
            ZSetLookup::WrongType => Reply::error(ERR_WRONGTYPE),
            ZSetLookup::Found(zset) => Reply::UInt(zset.card() as u64),
        }
    }

    fn zcount(&self, args: &[Arg]) -> Reply {
        let Some(key) = arg_str(args, 0) else {
            return Reply::error(ERR_WRONG_ARGS);
        };
        let Some((min, min_inclusive, max, max_inclusive)) = score_window(args, 1) else {
            return Reply::error(ERR_WRONG_ARGS);
        };
        match self.zset_of(key) {
            ZSetLookup::Missing => Reply::UInt(0),
            ZSetLookup::WrongType => Reply::error(ERR_WRONGTYPE),
            ZSetLookup::Found(zset) => {
                Reply::UInt(zset.count(min, min_inclusive, max, max_inclusive) as u64)
            }
        }
    }

    fn zrange(&self, args: &[Arg]) -> Reply {
        let Some(key) = arg_str(args, 0) else {
            return Reply::error(ERR_WRONG_ARGS);
        };
        let Some(start) = args.get(1).and_then(Arg::to_uint) else {
            return Reply::error(ERR_WRONG_ARGS);
        };
        let stop = match args.get(2).map(stop_index) {
            None => StopIndex::End,
            Some(Some(stop)) => stop,
            Some(None) => return Reply::error(ERR_WRONG_ARGS),
        };
        let with_scores = match args.get(3) {
            None => false,
            Some(arg) => match arg.to_bool() {
                Some(flag) => flag,
                None => return Reply::error(ERR_WRONG_ARGS),
            },
        };
        match self.zset_of(key) {
            ZSetLookup::Missing => Reply::List(Vec::new()),
            ZSetLookup::WrongType => Reply::error(ERR_WRONGTYPE),
            ZSetLookup::Found(zset) => {
                let stop = stop.resolve(zset.card());
                Reply::List(render_members(
                    zset.range_by_rank(start as usize, stop),
                    with_scores,
                ))
            }
        }
    }

    fn zrangebyscore(&self, args: &[Arg]) -> Reply {
        let Some(key) = arg_str(args, 0) else {
            return Reply::error(ERR_WRONG_ARGS);
        };
        let Some((min, min_inclusive, max, max_inclusive)) = score_window(args, 1) else {
            return Reply::error(ERR_WRONG_ARGS);
        };
        let with_scores = match args.get(5) {
            None => false,
            Some(arg) => match arg.to_bool() {
                Some(flag) => flag,
                None => return Reply::error(ERR_WRONG_ARGS),
            },
        };
        match self.zset_of(key) {
            ZSetLookup::Missing => Reply::List(Vec::new()),
            ZSetLookup::WrongType => Reply::error(ERR_WRONGTYPE),
            ZSetLookup::Found(zset) => Reply::List(render_members(
                zset.range_by_score(min, min_inclusive, max, max_inclusive),
                with_scores,
            )),
        }
    }

    fn zrank(&self, args: &[Arg]) -> Reply {
        let (Some(key), Some(member)) = (arg_str(args, 0), arg_str(args, 1)) else {
            return Reply::error(ERR_WRONG_ARGS);
        };
        let reverse = match args.get(2) {
            None => false,
            Some(arg) => match arg.to_bool() {
                Some(flag) => flag,
                None => return Reply::error(ERR_WRONG_ARGS),
            },
        };
        match self.zset_of(key) {
            ZSetLookup::Missing => Reply::Null,
            ZSetLookup::WrongType => Reply::error(ERR_WRONGTYPE),
            ZSetLookup::Found(zset) => match zset.rank(member, reverse) {
                Some(rank) => Reply::UInt(rank as u64),
                None => Reply::Null,
            },
        }
    }

    fn zrem(&mut self, args: &[Arg]) -> Reply {
        let (Some(key), Some(member)) = (arg_str(args, 0), arg_str(args, 1)) else {
            return Reply::error(ERR_WRONG_ARGS);
        };
        match self.data.get_mut(key) {
            None => Reply::UInt(0),
            Some(Entry {
                value: Value::ZSet(zset),
                ..
            }) => Reply::UInt(u64::from(zset.remove(member))),
            Some(_) => Reply::error(ERR_WRONGTYPE),
        }
    }

    fn zremrangebyscore(&mut self, args: &[Arg]) -> Reply {
        let Some(key) = arg_str(args, 0) else {
            return Reply::error(ERR_WRONG_ARGS);
        };
        let Some((min, min_inclusive, max, max_inclusive)) = score_window(args, 1) else {
            return Reply::error(ERR_WRONG_ARGS);
        };
        match self.data.get_mut(key) {
            None => Reply::UInt(0),
            Some(Entry {
                value: Value::ZSet(zset),
                ..
            }) => Reply::UInt(zset.remove_range_by_score(min, min_inclusive, max, max_inclusive)
                as u64),
            Some(_) => Reply::error(ERR_WRONGTYPE),
        }
    }

    /// `dest numkeys key… [WEIGHTS w…] [AGGREGATE SUM|MIN|MAX]`
    fn zstore(&mut self, args: &[Arg], intersect: bool) -> Reply {
        let Some(dest) = arg_str(args, 0) else {
            return Reply::error(ERR_WRONG_ARGS);
        };
        let numkeys = match args.get(1).and_then(Arg::to_uint) {
            Some(n) if n > 0 => n as usize,
            _ => return Reply::error(ERR_WRONG_ARGS),
        };
        let Some(key_args) = args.get(2..2 + numkeys) else {
            return Reply::error(ERR_WRONG_ARGS);
        };
        let mut source_keys = Vec::with_capacity(numkeys);
        for arg in key_args {
            match arg.as_str() {
                Some(key) => source_keys.push(key),
                None => return Reply::error(ERR_WRONG_ARGS),
            }
        }

        let mut rest = &args[2 + numkeys..];
        let mut weights: Option<Vec<f64>> = None;
        let mut aggregate = Aggregate::default();
        while let Some(word) = rest.first() {
            let Some(word) = word.as_str() else {
                return Reply::error(ERR_WRONG_ARGS);
            };
            match word.to_ascii_uppercase().as_str() {
                "WEIGHTS" => {
                    let Some(weight_args) = rest.get(1..1 + numkeys) else {
                        return Reply::error(ERR_WRONG_ARGS);
                    };
                    let mut parsed = Vec::with_capacity(numkeys);
                    for arg in weight_args {
                        match arg.to_float() {
                            Some(w) => parsed.push(w),
                            None => return Reply::error(ERR_WRONG_ARGS),
                        }
                    }
                    weights = Some(parsed);
                    rest = &rest[1 + numkeys..];
                }
                "AGGREGATE" => {
                    let parsed = rest
                        .get(1)
                        .and_then(Arg::as_str)
                        .and_then(|s| s.parse::<Aggregate>().ok());
                    match parsed {
                        Some(agg) => aggregate = agg,
                        None => return Reply::error(ERR_WRONG_ARGS),
                    }
                    rest = &rest[2..];
                }
                _ => return Reply::error(ERR_WRONG_ARGS),
            }
        }

        // fold first (missing sources count as empty), then store at dest
        let empty = ZSet::new();
        let mut sources: Vec<&ZSet> = Vec::with_capacity(numkeys);
        for key in &source_keys {
            match self.data.get(key) {
                None => sources.push(&empty),
                Some(Entry {
                    value: Value::ZSet(zset),
                    ..
                }) => sources.push(zset),
                Some(_) => return Reply::error(ERR_WRONGTYPE),
            }
        }
        let result = if intersect {
            ZSet::intersect(&sources, weights.as_deref(), aggregate)
        } else {
            ZSet::union(&sources, weights.as_deref(), aggregate)
        };

        let card = result.card() as u64;
        self.data.remove(dest);
        self.data.add(Entry {
            key: dest.to_string(),
            value: Value::ZSet(result),
        });
        Reply::UInt(card)
    }

    fn zset_of(&self, key: &str) -> ZSetLookup<'_> {
        match self.data.get(key) {
            None => ZSetLookup::Missing,
            Some(Entry {
                value: Value::ZSet(zset),
                ..
            }) => ZSetLookup::Found(zset),
            Some(_) => ZSetLookup::WrongType,
        }
    }

    // ---- persistence ----

    /// writes the whole dataset to the snapshot file
    pub fn save(&self) -> Result<()> {
        let mut doc: Snapshot = BTreeMap::new();
        for entry in self.data.iter() {
            let value = match &entry.value {
                Value::Str(s) => SnapshotValue::Str(s.clone()),
                Value::List(list) => {
                    SnapshotValue::List(list.iter().map(str::to_string).collect())
                }
                Value::ZSet(zset) => {
                    SnapshotValue::ZSet(zset.iter().map(|(m, s)| (m.to_string(), s)).collect())
                }
            };
            doc.insert(entry.key.clone(), value);
        }

        let file = File::create(&self.persistence_filepath)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer(&mut writer, &doc)?;
        writer.flush()?;
        info!(
            path = %self.persistence_filepath.display(),
            entries = doc.len(),
            "snapshot written"
        );
        Ok(())
    }

    fn load(&mut self) {
        let file = match File::open(&self.persistence_filepath) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(
                    path = %self.persistence_filepath.display(),
                    "no snapshot file, starting empty"
                );
                return;
            }
            Err(e) => {
                warn!(error = %e, "could not open snapshot, starting empty");
                return;
            }
        };
        let doc: Snapshot = match serde_json::from_reader(BufReader::new(file)) {
            Ok(doc) => doc,
            Err(e) => {
                warn!(error = %e, "malformed snapshot ignored, starting empty");
                return;
            }
        };
        for (key, value) in doc {
            // keep the table sized as entries stream in
            self.data.maintenance();
            let value = match value {
                SnapshotValue::Str(s) => Value::Str(s),
                SnapshotValue::List(items) => Value::List(items.into_iter().collect()),
                SnapshotValue::ZSet(pairs) => {
                    let mut zset = ZSet::new();
                    for (member, score) in pairs {
                        zset.insert(&member, score);
                    }
                    Value::ZSet(zset)
                }
            };
            self.data.add(Entry { key, value });
        }
        info!(entries = self.data.len(), "snapshot loaded");
    }
}

enum ZSetLookup<'a> {
    Missing,
    WrongType,
    Found(&'a ZSet),
}

/// a `stop` bound: an index, or `-1` meaning "last element"
#[derive(Debug, Clone, Copy)]
enum StopIndex {
    At(usize),
    End,
}

impl StopIndex {
    fn resolve(self, len: usize) -> usize {
        match self {
            StopIndex::At(stop) => stop,
            StopIndex::End => len.saturating_sub(1),
        }
    }
}

/// `-1` is the only accepted negative index
fn stop_index(arg: &Arg) -> Option<StopIndex> {
    match arg.to_int()? {
        -1 => Some(StopIndex::End),
        n if n >= 0 => Some(StopIndex::At(n as usize)),
        _ => None,
    }
}

fn arg_str(args: &[Arg], i: usize) -> Option<&str> {
    args.get(i).and_then(Arg::as_str)
}

fn score_window(args: &[Arg], i: usize) -> Option<(f64, bool, f64, bool)> {
    let min = args.get(i)?.to_float()?;
    let min_inclusive = args.get(i + 1)?.to_bool()?;
    let max = args.get(i + 2)?.to_float()?;
    let max_inclusive = args.get(i + 3)?.to_bool()?;
    Some((min, min_inclusive, max, max_inclusive))
}

fn render_members(items: Vec<(String, f64)>, with_scores: bool) -> Vec<String> {
    if !with_scores {
        return items.into_iter().map(|(m, _)| m).collect();
    }
    let mut out = Vec::with_capacity(items.len() * 2);
    for (member, score) in items {
        out.push(member);
        out.push(score.to_string());
    }
    out
}
