use std::time::Duration;

use resp::Client;

use crate::config::Target;
use crate::info;
use crate::selector::{self, Collected, SelectError, WHITELIST};

/// Run `INFO` (and `INFO commandstats` when enabled) against one instance and
/// keep the whitelisted metrics.
///
/// `None` means the instance could not be reached, which is logged here
/// already. Command failures are logged and yield less data. Only a
/// whitelisted field that is not a number fails the collection.
pub async fn collect(
    target: &Target<'_>,
    timeout: Duration,
) -> Result<Option<Collected>, SelectError> {
    let instance = target.instance;
    let mut client = Client::new(instance.endpoint.clone())
        .with_auth(instance.auth.clone())
        .with_timeout(timeout);

    if let Err(err) = client.connect().await {
        error!(
            message = "Could not connect to redis",
            instance = target.label(),
            %err
        );

        return Ok(None);
    }

    debug!(
        message = "Connected to redis",
        instance = target.label(),
        endpoint = %client.endpoint()
    );

    let mut text = String::new();

    debug!(message = "Sending 'INFO' command", instance = target.label());
    match client.send_command("info").await {
        Ok(Some(body)) => text.push_str(&body),
        Ok(None) => {}
        Err(err) => {
            error!(
                message = "Error while sending 'INFO' command",
                instance = target.label(),
                %err
            );
        }
    }

    if instance.commandstats {
        debug!(
            message = "Sending 'INFO COMMANDSTATS' command",
            instance = target.label()
        );

        match client.send_command("info commandstats").await {
            Ok(Some(body)) => {
                text.push('\n');
                text.push_str(&body);
            }
            Ok(None) => {}
            Err(err) => {
                error!(
                    message = "Error while sending 'INFO COMMANDSTATS' command",
                    instance = target.label(),
                    %err
                );
            }
        }
    }

    client.disconnect().await;

    let diagnostics = info::parse(&text);
    selector::select(&diagnostics, WHITELIST).map(Some)
}
