//! The typed request/reply protocol carried on the dispatcher queue.

use std::fmt;

/// reply when the worker is not running
pub const ERR_DB_CLOSED: &str = "ERR database is closed";
/// reply for an arity or argument-coercion failure
pub const ERR_WRONG_ARGS: &str = "ERR wrong arguments";
/// reply for an operation against a value of the wrong type
pub const ERR_WRONGTYPE: &str =
    "WRONGTYPE Operation against a key holding the wrong kind of value";
/// reply when an operation requires a key that does not exist
pub const ERR_NO_SUCH_KEY: &str = "ERR no such key";
/// reply for an unrecognised action word
pub const ERR_UNKNOWN_COMMAND: &str = "ERR unknown command";

/// Every action the worker can execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// anything the parser did not recognise
    UnknownCommand,
    /// write a snapshot
    Save,
    /// read a string value
    Get,
    /// set a string value
    Set,
    /// move an entry to a new key
    Rename,
    /// delete keys
    Del,
    /// push to the front of a list
    LPush,
    /// pop from the front of a list
    LPop,
    /// push to the back of a list
    RPush,
    /// pop from the back of a list
    RPop,
    /// list length
    LLen,
    /// slice of a list by index
    LRange,
    /// keys matching a glob pattern
    Keys,
    /// drop every entry
    FlushAll,
    /// total bytes owned by the dataset
    InfoDatasetMemory,
    /// save and stop the worker
    Shutdown,
    /// add or update a sorted-set member
    ZAdd,
    /// a member's score
    ZScore,
    /// sorted-set cardinality
    ZCard,
    /// members within a score interval
    ZCount,
    /// members by rank window
    ZRange,
    /// members by score window
    ZRangeByScore,
    /// a member's rank
    ZRank,
    /// remove a member
    ZRem,
    /// remove members within a score interval
    ZRemRangeByScore,
    /// store the weighted intersection of sorted sets
    ZInterStore,
    /// store the weighted union of sorted sets
    ZUnionStore,
}

impl Action {
    /// Resolves a command word, case-insensitively. Unrecognised words map to
    /// [`Action::UnknownCommand`] so the executor can reply rather than the
    /// parser failing.
    pub fn from_word(word: &str) -> Action {
        match word.to_ascii_uppercase().as_str() {
            "SAVE" => Action::Save,
            "GET" => Action::Get,
            "SET" => Action::Set,
            "RENAME" => Action::Rename,
            "DEL" => Action::Del,
            "LPUSH" => Action::LPush,
            "LPOP" => Action::LPop,
            "RPUSH" => Action::RPush,
            "RPOP" => Action::RPop,
            "LLEN" => Action::LLen,
            "LRANGE" => Action::LRange,
            "KEYS" => Action::Keys,
            "FLUSHALL" => Action::FlushAll,
            "INFO_DATASET_MEMORY" => Action::InfoDatasetMemory,
            "SHUTDOWN" => Action::Shutdown,
            "ZADD" => Action::ZAdd,
            "ZSCORE" => Action::ZScore,
            "ZCARD" => Action::ZCard,
            "ZCOUNT" => Action::ZCount,
            "ZRANGE" => Action::ZRange,
            "ZRANGEBYSCORE" => Action::ZRangeByScore,
            "ZRANK" => Action::ZRank,
            "ZREM" => Action::ZRem,
            "ZREMRANGEBYSCORE" => Action::ZRemRangeByScore,
            "ZINTERSTORE" => Action::ZInterStore,
            "ZUNIONSTORE" => Action::ZUnionStore,
            _ => Action::UnknownCommand,
        }
    }
}

/// One positional request argument.
#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    /// a string argument
    Str(String),
    /// an unsigned integer argument
    UInt(u64),
    /// a signed integer argument
    Int(i64),
}

impl Arg {
    /// the argument as a string slice, when it is one
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Arg::Str(s) => Some(s),
            _ => None,
        }
    }

    /// coerces to an unsigned integer, parsing string arguments
    pub fn to_uint(&self) -> Option<u64> {
        match self {
            Arg::UInt(n) => Some(*n),
            Arg::Int(n) => u64::try_from(*n).ok(),
            Arg::Str(s) => s.parse().ok(),
        }
    }

    /// coerces to a signed integer, parsing string arguments
    pub fn to_int(&self) -> Option<i64> {
        match self {
            Arg::Int(n) => Some(*n),
            Arg::UInt(n) => i64::try_from(*n).ok(),
            Arg::Str(s) => s.parse().ok(),
        }
    }

    /// coerces to a float, parsing string arguments
    pub fn to_float(&self) -> Option<f64> {
        match self {
            Arg::UInt(n) => Some(*n as f64),
            Arg::Int(n) => Some(*n as f64),
            Arg::Str(s) => s.parse().ok(),
        }
    }

    /// coerces the literal words `true` / `false`
    pub fn to_bool(&self) -> Option<bool> {
        match self.as_str()? {
            "true" => Some(true),
            "false" => Some(false),
            _ => None,
        }
    }
}

/// An action plus its ordered arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    /// what to execute
    pub action: Action,
    /// positional arguments, indexed by the executor
    pub args: Vec<Arg>,
}

impl Request {
    /// creates a request with no arguments
    pub fn new(action: Action) -> Self {
        Request {
            action,
            args: Vec::new(),
        }
    }

    /// appends a string argument
    pub fn with_str<S: Into<String>>(mut self, value: S) -> Self {
        self.args.push(Arg::Str(value.into()));
        self
    }

    /// appends an unsigned integer argument
    pub fn with_uint(mut self, value: u64) -> Self {
        self.args.push(Arg::UInt(value));
        self
    }

    /// appends a signed integer argument
    pub fn with_int(mut self, value: i64) -> Self {
        self.args.push(Arg::Int(value));
        self
    }
}

/// What an executor hands back to the caller.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// no value
    Null,
    /// a contract error; the message is one of the canonical strings
    Error(String),
    /// a string value
    Str(String),
    /// an owned list of values, detached from the store
    List(Vec<String>),
    /// an unsigned number
    UInt(u64),
    /// a signed number
    Int(i64),
    /// a score
    Double(f64),
    /// a boolean
    Bool(bool),
}

impl Reply {
    /// false exactly for error replies
    pub fn is_ok(&self) -> bool {
        !matches!(self, Reply::Error(_))
    }

    /// shorthand for an error reply from one of the canonical messages
    pub fn error(message: &str) -> Reply {
        Reply::Error(message.to_string())
    }
}

/// Pretty-printer used by the REPL frontend.
impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Null => write!(f, "(nil)"),
            Reply::Error(message) => write!(f, "(error) {}", message),
            Reply::Str(value) => write!(f, "{}", value),
            Reply::List(items) => {
                write!(f, "(list) count: {}", items.len())?;
                for (i, item) in items.iter().enumerate() {
                    write!(f, "\n  {}) {}", i + 1, item)?;
                }
                Ok(())
            }
            Reply::UInt(n) => write!(f, "(uint) {}", n),
            Reply::Int(n) => write!(f, "(int) {}", n),
            Reply::Double(x) => write!(f, "(double) {}", x),
            Reply::Bool(b) => write!(f, "(bool) {}", b),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_words_are_case_insensitive() {
        assert_eq!(Action::from_word("set"), Action::Set);
        assert_eq!(Action::from_word("Set"), Action::Set);
        assert_eq!(Action::from_word("ZRANGEBYSCORE"), Action::ZRangeByScore);
        assert_eq!(Action::from_word("nonsense"), Action::UnknownCommand);
    }

    #[test]
    fn builder_appends_in_order() {
        let request = Request::new(Action::LRange)
            .with_str("list1")
            .with_uint(0)
            .with_int(-1);
        assert_eq!(
            request.args,
            vec![
                Arg::Str("list1".to_string()),
                Arg::UInt(0),
                Arg::Int(-1),
            ]
        );
    }

    #[test]
    fn string_args_coerce_to_numbers() {
        assert_eq!(Arg::Str("42".to_string()).to_uint(), Some(42));
        assert_eq!(Arg::Str("-1".to_string()).to_uint(), None);
        assert_eq!(Arg::Str("-1".to_string()).to_int(), Some(-1));
        assert_eq!(Arg::Str("2.5".to_string()).to_float(), Some(2.5));
        assert_eq!(Arg::Str("x".to_string()).to_uint(), None);
        assert_eq!(Arg::UInt(7).to_float(), Some(7.0));
    }

    #[test]
    fn bool_coercion_is_strict() {
        assert_eq!(Arg::Str("true".to_string()).to_bool(), Some(true));
        assert_eq!(Arg::Str("false".to_string()).to_bool(), Some(false));
        assert_eq!(Arg::Str("TRUE".to_string()).to_bool(), None);
        assert_eq!(Arg::UInt(1).to_bool(), None);
    }

    #[test]
    fn only_errors_are_not_ok() {
        assert!(Reply::Null.is_ok());
        assert!(Reply::Bool(false).is_ok());
        assert!(!Reply::error(ERR_NO_SUCH_KEY).is_ok());
    }

    #[test]
    fn display_formats_match_the_repl() {
        assert_eq!(Reply::Null.to_string(), "(nil)");
        assert_eq!(
            Reply::error(ERR_UNKNOWN_COMMAND).to_string(),
            "(error) ERR unknown command"
        );
        assert_eq!(Reply::UInt(7).to_string(), "(uint) 7");
        assert_eq!(
            Reply::List(vec!["g".to_string(), "f".to_string()]).to_string(),
            "(list) count: 2\n  1) g\n  2) f"
        );
    }
}
