// src/core/browser/summary.rs

//! Database listing, key counts and per-key summaries.

use super::entries::key_type;
use super::types::{DatabaseItem, KeySummary, KeyType};
use crate::core::KeydeckError;
use crate::core::protocol::Cmd;
use crate::core::session::ConnectionSession;
use futures::future::try_join_all;
use std::collections::HashMap;
use tracing::debug;

const DEFAULT_DATABASES: u32 = 16;

/// Lists the databases of a server with their key counts. A cluster has a single
/// database, 0.
pub async fn list_databases(
    session: &ConnectionSession,
) -> Result<Vec<DatabaseItem>, KeydeckError> {
    if session.is_cluster() {
        return Ok(vec![DatabaseItem {
            db: 0,
            keys: db_size(session).await?,
            expires: 0,
            avg_ttl: 0,
        }]);
    }

    let count = database_count(session).await;
    let info = session
        .execute(Cmd::new("INFO").arg("keyspace"))
        .await?
        .into_text()?;
    let mut keyspace = parse_keyspace(&info);

    Ok((0..count)
        .map(|db| {
            keyspace.remove(&db).unwrap_or(DatabaseItem {
                db,
                keys: 0,
                expires: 0,
                avg_ttl: 0,
            })
        })
        .collect())
}

/// `CONFIG GET databases`, falling back to the stock default when the server
/// refuses `CONFIG`.
async fn database_count(session: &ConnectionSession) -> u32 {
    let reply = session
        .execute(Cmd::new("CONFIG").arg("GET").arg("databases"))
        .await
        .and_then(|r| r.into_bytes_vec());
    match reply {
        Ok(values) => values
            .get(1)
            .and_then(|v| std::str::from_utf8(v).ok())
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_DATABASES),
        Err(e) => {
            debug!("CONFIG GET databases failed, assuming {DEFAULT_DATABASES}: {e}");
            DEFAULT_DATABASES
        }
    }
}

/// Parses the `# Keyspace` section of `INFO`: lines like
/// `db0:keys=12,expires=1,avg_ttl=3000`.
pub fn parse_keyspace(info: &str) -> HashMap<u32, DatabaseItem> {
    let mut out = HashMap::new();
    for line in info.lines() {
        let Some((name, stats)) = line.trim().split_once(':') else {
            continue;
        };
        let Some(db) = name.strip_prefix("db").and_then(|n| n.parse::<u32>().ok()) else {
            continue;
        };
        let mut item = DatabaseItem {
            db,
            keys: 0,
            expires: 0,
            avg_ttl: 0,
        };
        for pair in stats.split(',') {
            let Some((field, value)) = pair.split_once('=') else {
                continue;
            };
            let value = value.parse().unwrap_or(0);
            match field {
                "keys" => item.keys = value,
                "expires" => item.expires = value,
                "avg_ttl" => item.avg_ttl = value,
                _ => {}
            }
        }
        out.insert(db, item);
    }
    out
}

/// Counts the keys of the selected database, summed across every master.
pub async fn db_size(session: &ConnectionSession) -> Result<i64, KeydeckError> {
    let sizes = try_join_all(session.client().masters().iter().map(|node| async move {
        session.execute_on(node, Cmd::new("DBSIZE")).await?.into_int()
    }))
    .await?;
    Ok(sizes.into_iter().sum())
}

pub async fn key_summary(
    session: &ConnectionSession,
    key: &[u8],
) -> Result<KeySummary, KeydeckError> {
    let key_type = key_type(session, key).await?;

    let ttl = session
        .execute(Cmd::new("TTL").arg_slice(key))
        .await?
        .into_int()?;

    let size = match session
        .execute_for(key, Cmd::new("MEMORY").arg("USAGE").arg_slice(key))
        .await
        .and_then(|r| r.into_int())
    {
        Ok(size) => size,
        Err(e) => {
            debug!("MEMORY USAGE unavailable: {e}");
            0
        }
    };

    let length_cmd = match key_type {
        KeyType::String => "STRLEN",
        KeyType::List => "LLEN",
        KeyType::Hash => "HLEN",
        KeyType::Set => "SCARD",
        KeyType::ZSet => "ZCARD",
        KeyType::Stream => "XLEN",
    };
    let length = session
        .execute(Cmd::new(length_cmd).arg_slice(key))
        .await?
        .into_int()?;

    Ok(KeySummary {
        key_type,
        ttl: if ttl < 0 { -1 } else { ttl },
        size,
        length,
    })
}
