//! Client-visible log ring
//!
//! A fixed-capacity ring of structured entries behind the `/v1/logs` route
//! and the streaming `log` broadcast. This is the surface clients see;
//! operator diagnostics go through `tracing` as everywhere else.

use std::collections::VecDeque;
use std::str::FromStr;
use std::sync::{Mutex, RwLock};
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Default ring capacity
pub const DEFAULT_MAX_ENTRIES: usize = 1000;

/// Log severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    /// Diagnostic detail
    Debug,
    /// Normal operation
    Info,
    /// Something looks off
    Warn,
    /// An operation failed
    Error,
}

impl FromStr for Level {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            _ => Err(()),
        }
    }
}

/// Log category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    /// Request/response surface
    Http,
    /// Streaming surface
    Websocket,
    /// Reader enumeration and lifecycle
    Reader,
    /// Card operations
    Card,
    /// Process-level events
    System,
}

impl FromStr for Category {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "http" => Ok(Self::Http),
            "websocket" => Ok(Self::Websocket),
            "reader" => Ok(Self::Reader),
            "card" => Ok(Self::Card),
            "system" => Ok(Self::System),
            _ => Err(()),
        }
    }
}

/// A single log entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    /// RFC 3339 timestamp
    pub timestamp: String,
    /// Severity
    pub level: Level,
    /// Category
    pub category: Category,
    /// Message text
    pub message: String,
    /// Structured context
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Ring statistics
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Stats {
    /// Entries currently held
    pub total_entries: usize,
    /// Ring capacity
    pub max_entries: usize,
    /// Active minimum level
    pub min_level: Level,
}

type BroadcastHook = Box<dyn Fn(&LogEntry) + Send + Sync>;

/// Thread-safe bounded log ring
pub struct LogRing {
    inner: Mutex<Inner>,
    broadcast: RwLock<Option<BroadcastHook>>,
}

struct Inner {
    entries: VecDeque<LogEntry>,
    max_entries: usize,
    min_level: Level,
}

impl std::fmt::Debug for LogRing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogRing").finish_non_exhaustive()
    }
}

impl LogRing {
    /// Create a ring with the given capacity and minimum level
    pub fn new(max_entries: usize, min_level: Level) -> Self {
        let max_entries = if max_entries == 0 {
            DEFAULT_MAX_ENTRIES
        } else {
            max_entries
        };
        Self {
            inner: Mutex::new(Inner {
                entries: VecDeque::with_capacity(max_entries),
                max_entries,
                min_level,
            }),
            broadcast: RwLock::new(None),
        }
    }

    /// Install the fan-out hook; entries at info and above are forwarded.
    pub fn set_broadcast(&self, hook: BroadcastHook) {
        *self.broadcast.write().expect("broadcast hook poisoned") = Some(hook);
    }

    /// Change the minimum level; appends below it are discarded.
    pub fn set_min_level(&self, level: Level) {
        self.inner.lock().expect("log ring poisoned").min_level = level;
    }

    /// Append an entry, dropping the oldest on overflow.
    pub fn append(&self, level: Level, category: Category, message: &str, data: Option<Value>) {
        let entry = {
            let mut inner = self.inner.lock().expect("log ring poisoned");
            if level < inner.min_level {
                return;
            }
            let entry = LogEntry {
                timestamp: humantime::format_rfc3339_millis(SystemTime::now()).to_string(),
                level,
                category,
                message: message.to_string(),
                data,
            };
            if inner.entries.len() == inner.max_entries {
                inner.entries.pop_front();
            }
            inner.entries.push_back(entry.clone());
            entry
        };

        if entry.level >= Level::Info {
            if let Some(hook) = self.broadcast.read().expect("broadcast hook poisoned").as_ref() {
                hook(&entry);
            }
        }
    }

    /// Debug-level append
    pub fn debug(&self, category: Category, message: &str, data: Option<Value>) {
        self.append(Level::Debug, category, message, data);
    }

    /// Info-level append
    pub fn info(&self, category: Category, message: &str, data: Option<Value>) {
        self.append(Level::Info, category, message, data);
    }

    /// Warn-level append
    pub fn warn(&self, category: Category, message: &str, data: Option<Value>) {
        self.append(Level::Warn, category, message, data);
    }

    /// Error-level append
    pub fn error(&self, category: Category, message: &str, data: Option<Value>) {
        self.append(Level::Error, category, message, data);
    }

    /// Snapshot entries newest-first with optional filters. A zero limit
    /// returns everything.
    pub fn snapshot(
        &self,
        limit: usize,
        min_level: Option<Level>,
        category: Option<Category>,
    ) -> Vec<LogEntry> {
        let inner = self.inner.lock().expect("log ring poisoned");
        let mut result = Vec::new();
        for entry in inner.entries.iter().rev() {
            if let Some(min) = min_level {
                if entry.level < min {
                    continue;
                }
            }
            if let Some(cat) = category {
                if entry.category != cat {
                    continue;
                }
            }
            result.push(entry.clone());
            if limit > 0 && result.len() >= limit {
                break;
            }
        }
        result
    }

    /// Drop every entry
    pub fn clear(&self) {
        self.inner.lock().expect("log ring poisoned").entries.clear();
    }

    /// Current statistics
    pub fn stats(&self) -> Stats {
        let inner = self.inner.lock().expect("log ring poisoned");
        Stats {
            total_entries: inner.entries.len(),
            max_entries: inner.max_entries,
            min_level: inner.min_level,
        }
    }
}

impl Default for LogRing {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ENTRIES, Level::Debug)
    }
}
