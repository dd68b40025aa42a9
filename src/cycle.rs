use std::io;

use chrono::Utc;

use crate::collector::collect;
use crate::config::Config;
use crate::dispatch::{Dispatch, Series};
use crate::selector::SelectError;

const PLUGIN: &str = "redis";

/// Outcome of one instance in a cycle.
#[derive(Debug, PartialEq)]
pub struct Report {
    pub instance: String,
    pub series: usize,
    pub error: Option<SelectError>,
}

#[derive(Debug, Default, PartialEq)]
pub struct Summary {
    pub reports: Vec<Report>,
}

impl Summary {
    /// Total number of series dispatched.
    pub fn series(&self) -> usize {
        self.reports.iter().map(|report| report.series).sum()
    }

    pub fn failed(&self) -> usize {
        self.reports
            .iter()
            .filter(|report| report.error.is_some())
            .count()
    }
}

/// `redis.<section>` or `redis.<instance>.<section>`, lower-cased.
fn plugin_name(instance: Option<&str>, section: &str) -> String {
    let name = match instance {
        Some(instance) => format!("{PLUGIN}.{instance}.{section}"),
        None => format!("{PLUGIN}.{section}"),
    };

    name.to_lowercase()
}

/// Collect every target of `config` once, one after another, and hand the
/// results to `sink`.
///
/// A failing instance never stops the others, only an error writing to the
/// sink aborts the cycle.
pub async fn run<D>(config: &Config, sink: &mut D) -> io::Result<Summary>
where
    D: Dispatch + ?Sized,
{
    let mut summary = Summary::default();

    for target in config.targets() {
        let mut report = Report {
            instance: target.label().to_string(),
            series: 0,
            error: None,
        };

        let collected = match collect(&target, config.timeout).await {
            Ok(Some(collected)) => collected,
            Ok(None) => {
                summary.reports.push(report);
                continue;
            }
            Err(err) => {
                error!(
                    message = "Collect metrics failed",
                    instance = target.label(),
                    %err
                );

                report.error = Some(err);
                summary.reports.push(report);
                continue;
            }
        };

        if collected.is_empty() {
            match target.name {
                None => error!(message = "No data received from redis"),
                Some(name) => {
                    warn!(message = "No data received from redis instance", instance = name)
                }
            }
        }

        let timestamp = Utc::now();
        for (section, groups) in collected {
            let plugin = plugin_name(target.name, &section);

            for (group, values) in groups {
                debug!(
                    message = "Dispatching values",
                    plugin = %plugin,
                    group = %group,
                    ?values
                );

                sink.dispatch(&Series {
                    plugin: plugin.clone(),
                    kind: group,
                    values,
                    timestamp,
                })?;
                report.series += 1;
            }
        }

        summary.reports.push(report);
    }

    sink.flush()?;

    Ok(summary)
}
