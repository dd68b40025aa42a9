use std::collections::BTreeMap;

/// Fields seen before the first `# Section` header land here.
pub const DEFAULT_SECTION: &str = "Default";

const COMPOUND_DELIMITER: char = '.';
const COMMANDSTATS_PREFIX: &str = "cmdstat_";

/// section -> field -> raw value
pub type Diagnostics = BTreeMap<String, BTreeMap<String, String>>;

/// Turn the text returned by `INFO` into a map of sections.
///
/// Plain fields are stored as `sections[current][name] = value`. Lines whose
/// value carries a comma separated list of `key=value` pairs, e.g.
///
/// ```text
/// db0:keys=10,expire=0
/// cmdstat_ping:calls=1,usec=2,usec_per_call=2.00
/// ```
///
/// get their own compound section, named `Keyspace.db0` or `Commandstats.ping`
/// (the `cmdstat_` prefix is dropped for command stats).
///
/// Malformed lines are logged and skipped, this never fails.
pub fn parse(text: &str) -> Diagnostics {
    let mut sections = Diagnostics::new();
    let mut current = DEFAULT_SECTION;

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if line.starts_with('#') {
            match line.split_whitespace().nth(1) {
                Some(name) => current = name,
                None => warn!(message = "Section header without a name", line),
            }

            continue;
        }

        let Some((name, value)) = line.split_once(':') else {
            warn!(message = "Bad format for info line", line);
            continue;
        };

        if !value.contains(',') {
            sections
                .entry(current.to_string())
                .or_default()
                .insert(name.to_string(), value.to_string());
            continue;
        }

        let name = if current.starts_with("Commandstats") {
            name.strip_prefix(COMMANDSTATS_PREFIX).unwrap_or(name)
        } else {
            name
        };
        let fields = sections
            .entry(format!("{current}{COMPOUND_DELIMITER}{name}"))
            .or_default();

        for part in value.split(',') {
            match part.rsplit_once('=') {
                Some((key, value)) => {
                    fields.insert(key.to_string(), value.to_string());
                }
                None => warn!(message = "Bad format for info sub value", part, line),
            }
        }
    }

    sections
}
