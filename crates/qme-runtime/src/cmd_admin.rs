//! `qme now-serving`, `qme status`, `qme reset`: one-shot authority calls.

use qme_authority::{IssuanceClient, RpcTransport};
use qme_core::{QueueScope, parse_now_serving, queue_count};
use serde_json::Value;

/// Show "now serving", or set it from free-form input first.
pub async fn now_serving<T: RpcTransport>(
    client: &IssuanceClient<T>,
    scope: &QueueScope,
    set: Option<&str>,
) -> anyhow::Result<String> {
    let value = match set {
        Some(raw) => {
            let requested = parse_now_serving(&Value::String(raw.trim().to_string()));
            client.set_now_serving(scope, requested).await?
        }
        None => client.now_serving(scope).await?,
    };
    Ok(format!("{scope}: now serving {value}"))
}

pub async fn status<T: RpcTransport>(
    client: &IssuanceClient<T>,
    scope: &QueueScope,
    json: bool,
) -> anyhow::Result<String> {
    let snapshot = client.snapshot(scope).await?;
    let lost = client.lost_count(scope).await?;
    if json {
        let mut value = serde_json::to_value(&snapshot)?;
        value["queue"] = Value::String(scope.to_string());
        value["lost"] = Value::from(lost);
        value["queued"] = Value::from(queue_count(snapshot.last_issued, snapshot.now_serving));
        return Ok(serde_json::to_string_pretty(&value)?);
    }
    let c = snapshot.counts;
    Ok(format!(
        "{scope}\n  now serving  {}\n  last issued  {}\n  queued       {}\n  \
         tickets      {} (waiting {}, checked in {}, served {}, left {})\n  lost         {lost}",
        snapshot.now_serving,
        snapshot.last_issued,
        queue_count(snapshot.last_issued, snapshot.now_serving),
        c.total,
        c.waiting,
        c.checked_in,
        c.served,
        c.left,
    ))
}

pub async fn reset<T: RpcTransport>(
    client: &IssuanceClient<T>,
    scope: &QueueScope,
) -> anyhow::Result<String> {
    client.reset(scope).await?;
    Ok(format!("{scope}: reset"))
}

// ─── Tests ───────────────────────────────────────────────────────────
