use std::collections::BTreeMap;

use crate::info::Diagnostics;

/// section -> metric group -> values, in whitelist field order
pub type Collected = BTreeMap<String, BTreeMap<String, Vec<f64>>>;

/// Metric groups and the INFO fields collected into each of them.
pub type Whitelist = [(&'static str, &'static [&'static str])];

/// The groups follow the data sets of collectd's `redis_types.db`, so the
/// number and order of fields in a group must not change.
pub static WHITELIST: &Whitelist = &[
    ("clients", &["connected_clients", "blocked_clients"]),
    ("connected_slaves", &["connected_slaves"]),
    (
        "redis_connections",
        &["rejected_connections", "total_connections_received"],
    ),
    ("redis_keys", &["expired_keys", "evicted_keys"]),
    ("keyspace", &["keyspace_misses", "keyspace_hits"]),
    (
        "last_save",
        &[
            "rdb_last_bgsave_time_sec",
            "aof_last_rewrite_time_sec",
            "rdb_changes_since_last_save",
        ],
    ),
    (
        "redis_memory",
        &[
            "used_memory",
            "used_memory_lua",
            "used_memory_peak",
            "used_memory_rss",
            "mem_fragmentation_ratio",
        ],
    ),
    ("commands_per_sec", &["instantaneous_ops_per_sec"]),
    ("pubsub", &["pubsub_channels", "pubsub_patterns"]),
    ("uptime_in_seconds", &["uptime_in_seconds"]),
    (
        "cpu_used",
        &[
            "used_cpu_user_children",
            "used_cpu_sys",
            "used_cpu_sys_children",
            "used_cpu_user",
        ],
    ),
    ("expires", &["expires"]),
    ("total", &["keys"]),
    ("avg_ttl", &["avg_ttl"]),
    ("calls", &["calls"]),
    ("usec_per_call", &["usec_per_call"]),
];

#[derive(Debug, PartialEq, thiserror::Error)]
pub enum SelectError {
    #[error("value {value:?} of field {field} in section {section} is not a number")]
    NotNumeric {
        section: String,
        field: String,
        value: String,
    },
}

/// Keep the whitelisted fields of every section and convert them to floats.
///
/// A field found in several sections, e.g. `calls` in each
/// `Commandstats.<cmd>`, yields one list per section. Sections without any
/// whitelisted field are absent from the result.
pub fn select(diagnostics: &Diagnostics, whitelist: &Whitelist) -> Result<Collected, SelectError> {
    let mut collected = Collected::new();

    for (group, fields) in whitelist {
        for field in *fields {
            for (section, values) in diagnostics {
                let Some(value) = values.get(*field) else {
                    continue;
                };

                let value = value
                    .trim()
                    .parse::<f64>()
                    .map_err(|_err| SelectError::NotNumeric {
                        section: section.clone(),
                        field: field.to_string(),
                        value: value.clone(),
                    })?;

                collected
                    .entry(section.clone())
                    .or_default()
                    .entry(group.to_string())
                    .or_default()
                    .push(value);
            }
        }
    }

    Ok(collected)
}
