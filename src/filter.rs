// ABOUTME: Static, case-insensitive denylist of commands the proxy refuses to forward
// ABOUTME: Covers multi-key set arithmetic, pub/sub, scripting, admin, keyspace scans, and blocking commands

use std::collections::HashSet;
use std::sync::LazyLock;

const DENYLIST: &[&str] = &[
    "CLUSTER",
    "READONLY",
    "READWRITE",
    "AUTH",
    "ECHO",
    "SELECT",
    "PFADD",
    "PFCOUNT",
    "PFMERGE",
    "KEYS",
    "MIGRATE",
    "MOVE",
    "OBJECT",
    "RANDOMKEY",
    "RENAME",
    "RENAMENX",
    "WAIT",
    "SCAN",
    "BLPOP",
    "BRPOP",
    "BRPOPLPUSH",
    "RPOPLPUSH",
    "PSUBSCRIBE",
    "PUBSUB",
    "PUBLISH",
    "PUNSUBSCRIBE",
    "SUBSCRIBE",
    "UNSUBSCRIBE",
    "EVAL",
    "EVALSHA",
    "SCRIPT",
    "BGREWRITEAOF",
    "BGSAVE",
    "CLIENT",
    "COMMAND",
    "CONFIG",
    "DBSIZE",
    "DEBUG",
    "FLUSHALL",
    "FLUSHDB",
    "INFO",
    "LASTSAVE",
    "MONITOR",
    "ROLE",
    "SAVE",
    "SHUTDOWN",
    "SLAVEOF",
    "SLOWLOG",
    "SYNC",
    "TIME",
    "SDIFF",
    "SDIFFSTORE",
    "SINTER",
    "SINTERSTORE",
    "SMOVE",
    "SUNION",
    "SUNIONSTORE",
    "ZINTERSTORE",
    "ZUNIONSTORE",
    "BITOP",
];

static DENYLIST_SET: LazyLock<HashSet<&'static str>> =
    LazyLock::new(|| DENYLIST.iter().copied().collect());

/// `cmd` should already be uppercased and trimmed by the caller; the check
/// itself is a plain set lookup.
pub fn is_denied(cmd: &str) -> bool {
    DENYLIST_SET.contains(cmd)
}
