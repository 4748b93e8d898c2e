// src/core/browser/entries.rs

//! Paged reading of one key's contents, dispatched on the key's type.
//!
//! Non-full reads resume from the session's entry cursor for the database, which is
//! only honoured when it was recorded for the same key and match pattern.

use super::types::{
    HashEntry, KeyDetail, KeyEntries, KeyType, ListEntry, SetEntry, StreamEntry, StreamField,
    StringValue, ZSetEntry,
};
use crate::core::KeydeckError;
use crate::core::convert::{DecodeKind, EncodedBytes, FormatKind, convert_to};
use crate::core::protocol::{Cmd, RespFrame};
use crate::core::session::{ConnectionSession, EntryPosition};
use bytes::Bytes;
use serde_json::{Map, Value};
use wildmatch::WildMatch;

/// What to read and how to present it.
#[derive(Debug, Clone, Copy)]
pub struct EntryRequest<'a> {
    pub db: u32,
    pub key: &'a [u8],
    pub pattern: &'a str,
    pub full: bool,
    pub decode: Option<DecodeKind>,
    pub format: Option<FormatKind>,
}

impl EntryRequest<'_> {
    fn match_all(&self) -> bool {
        self.pattern.is_empty() || self.pattern == "*"
    }

    fn pattern(&self) -> &str {
        if self.pattern.is_empty() { "*" } else { self.pattern }
    }

    /// The display form of `raw`, if conversion changed it.
    fn display(&self, raw: &[u8]) -> Option<String> {
        let converted = convert_to(raw, self.decode, self.format);
        (converted.value.as_bytes() != raw).then_some(converted.value)
    }
}

/// Returns the key's declared type, failing with `NotFound` for missing keys.
pub async fn key_type(session: &ConnectionSession, key: &[u8]) -> Result<KeyType, KeydeckError> {
    let reply = session
        .execute(Cmd::new("TYPE").arg_slice(key))
        .await?
        .into_text()?;
    KeyType::from_reply(&reply, &EncodedBytes::encode(key))
}

pub async fn load_entries(
    session: &ConnectionSession,
    req: &EntryRequest<'_>,
) -> Result<KeyDetail, KeydeckError> {
    let (entries, end) = match key_type(session, req.key).await? {
        KeyType::String => (load_string(session, req).await?, true),
        KeyType::List => load_list(session, req).await?,
        KeyType::Hash => {
            let (items, end) = scan_collection(session, req, "HSCAN").await?;
            let entries = pairs(items)?
                .map(|(field, value)| HashEntry {
                    field: EncodedBytes::encode(&field),
                    display_value: req.display(&value),
                    value: EncodedBytes::encode(&value),
                })
                .collect();
            (KeyEntries::Hash(entries), end)
        }
        KeyType::Set => {
            let (items, end) = scan_collection(session, req, "SSCAN").await?;
            let entries = items
                .into_iter()
                .map(|value| SetEntry {
                    display_value: req.display(&value),
                    value: EncodedBytes::encode(&value),
                })
                .collect();
            (KeyEntries::Set(entries), end)
        }
        KeyType::ZSet => {
            let (items, end) = scan_collection(session, req, "ZSCAN").await?;
            let mut entries = Vec::with_capacity(items.len() / 2);
            for (member, score) in pairs(items)? {
                entries.push(ZSetEntry {
                    display_value: req.display(&member),
                    value: EncodedBytes::encode(&member),
                    score: parse_score(&score)?,
                });
            }
            (KeyEntries::ZSet(entries), end)
        }
        KeyType::Stream => load_stream(session, req).await?,
    };

    Ok(KeyDetail {
        entries,
        match_pattern: req.pattern().to_string(),
        end,
    })
}

async fn load_string(
    session: &ConnectionSession,
    req: &EntryRequest<'_>,
) -> Result<KeyEntries, KeydeckError> {
    let raw = session
        .execute(Cmd::new("GET").arg_slice(req.key))
        .await?
        .into_opt_bytes()?
        .ok_or_else(|| {
            KeydeckError::NotFound(format!(
                "key '{}' does not exist",
                String::from_utf8_lossy(req.key)
            ))
        })?;
    let converted = convert_to(&raw, req.decode, req.format);
    Ok(KeyEntries::String(StringValue {
        value: EncodedBytes::encode(&raw),
        display_value: converted.value,
        decode: converted.decode,
        format: converted.format,
    }))
}

async fn load_list(
    session: &ConnectionSession,
    req: &EntryRequest<'_>,
) -> Result<(KeyEntries, bool), KeydeckError> {
    let to_entries = |items: Vec<Bytes>, first: u64| -> Vec<ListEntry> {
        items
            .into_iter()
            .zip(first..)
            .map(|(value, index)| ListEntry {
                index,
                display_value: req.display(&value),
                value: EncodedBytes::encode(&value),
            })
            .collect()
    };

    // A filtered list has no server-side cursor, so the whole list is read.
    if req.full || !req.match_all() {
        session.reset_entry_cursor(req.db);
        let items = lrange(session, req.key, 0, -1).await?;
        let mut entries = to_entries(items, 0);
        if !req.match_all() {
            let glob = WildMatch::new(req.pattern);
            entries.retain(|e| glob.matches(&e.value.display()));
        }
        return Ok((KeyEntries::List(entries), true));
    }

    let page_size = session.page_size() as u64;
    let position = session.entry_position(req.db, req.key, req.pattern());
    let start = position.cursor;
    let stop = (start + page_size - 1) as i64;
    let items = lrange(session, req.key, start as i64, stop).await?;

    let end = (items.len() as u64) < page_size;
    if end {
        session.reset_entry_cursor(req.db);
    } else {
        session.set_entry_position(
            req.db,
            req.key,
            req.pattern(),
            EntryPosition {
                cursor: start + page_size,
                ..Default::default()
            },
        );
    }
    Ok((KeyEntries::List(to_entries(items, start)), end))
}

async fn lrange(
    session: &ConnectionSession,
    key: &[u8],
    start: i64,
    stop: i64,
) -> Result<Vec<Bytes>, KeydeckError> {
    session
        .execute(
            Cmd::new("LRANGE")
                .arg_slice(key)
                .arg_int(start)
                .arg_int(stop),
        )
        .await?
        .into_bytes_vec()
}

/// Reads a hash, set or sorted set with its scan command. Non-full reads return one
/// server page and record its cursor; full reads loop to exhaustion and leave the
/// cached cursor alone.
async fn scan_collection(
    session: &ConnectionSession,
    req: &EntryRequest<'_>,
    command: &'static str,
) -> Result<(Vec<Bytes>, bool), KeydeckError> {
    let scan = |cursor: u64, count: usize| {
        Cmd::new(command)
            .arg_slice(req.key)
            .arg_uint(cursor)
            .arg("MATCH")
            .arg_slice(req.pattern().as_bytes())
            .arg("COUNT")
            .arg_uint(count as u64)
    };

    if req.full {
        let mut items = Vec::new();
        let mut cursor = 0;
        loop {
            let page = session
                .execute(scan(cursor, session.scan_size()))
                .await?
                .into_scan_page()?;
            items.extend(page.items);
            cursor = page.cursor;
            if cursor == 0 {
                break;
            }
        }
        return Ok((items, true));
    }

    let position = session.entry_position(req.db, req.key, req.pattern());
    let page = session
        .execute(scan(position.cursor, session.page_size()))
        .await?
        .into_scan_page()?;
    let end = page.cursor == 0;
    if end {
        session.reset_entry_cursor(req.db);
    } else {
        session.set_entry_position(
            req.db,
            req.key,
            req.pattern(),
            EntryPosition {
                cursor: page.cursor,
                ..Default::default()
            },
        );
    }
    Ok((page.items, end))
}

/// Reads a stream newest first. A resumed read starts at the last id seen and asks
/// for one extra entry, since the range includes that boundary entry again.
async fn load_stream(
    session: &ConnectionSession,
    req: &EntryRequest<'_>,
) -> Result<(KeyEntries, bool), KeydeckError> {
    if req.full {
        session.reset_entry_cursor(req.db);
        let reply = session
            .execute(Cmd::new("XREVRANGE").arg_slice(req.key).arg("+").arg("-"))
            .await?;
        return Ok((KeyEntries::Stream(stream_entries(req, reply)?), true));
    }

    let page_size = session.page_size();
    let position = session.entry_position(req.db, req.key, req.pattern());
    let resuming = !position.is_start();
    let (start, count) = if resuming {
        (position.last_stream_id.clone(), page_size + 1)
    } else {
        ("+".to_string(), page_size)
    };

    let reply = session
        .execute(
            Cmd::new("XREVRANGE")
                .arg_slice(req.key)
                .arg(start)
                .arg("-")
                .arg("COUNT")
                .arg_uint(count as u64),
        )
        .await?;
    let mut entries = stream_entries(req, reply)?;
    if resuming
        && entries
            .first()
            .is_some_and(|e| e.id == position.last_stream_id)
    {
        entries.remove(0);
    }
    entries.truncate(page_size);

    let end = entries.len() < page_size;
    match entries.last() {
        Some(last) if !end => session.set_entry_position(
            req.db,
            req.key,
            req.pattern(),
            EntryPosition {
                last_stream_id: last.id.clone(),
                ..Default::default()
            },
        ),
        _ => session.reset_entry_cursor(req.db),
    }
    Ok((KeyEntries::Stream(entries), end))
}

/// Parses an `XRANGE`-family reply: `[[id, [field, value, ...]], ...]`.
fn stream_entries(
    req: &EntryRequest<'_>,
    reply: RespFrame,
) -> Result<Vec<StreamEntry>, KeydeckError> {
    let mut entries = Vec::new();
    for item in reply.into_array()? {
        let mut parts = item.into_array()?.into_iter();
        let (Some(id), Some(fields)) = (parts.next(), parts.next()) else {
            return Err(KeydeckError::Protocol("malformed stream entry".to_string()));
        };

        let mut value = Vec::new();
        let mut display = Map::new();
        let mut converted = false;
        for (field, raw) in pairs(fields.into_bytes_vec()?)? {
            let field = EncodedBytes::encode(&field);
            let raw_value = EncodedBytes::encode(&raw);
            let shown = req.display(&raw);
            converted |= shown.is_some();
            display.insert(
                field.display(),
                Value::String(shown.unwrap_or_else(|| raw_value.display())),
            );
            value.push(StreamField {
                field,
                value: raw_value,
            });
        }

        entries.push(StreamEntry {
            id: id.into_text()?,
            value,
            display_value: converted
                .then(|| serde_json::to_string(&display))
                .transpose()?,
        });
    }
    Ok(entries)
}

fn pairs(items: Vec<Bytes>) -> Result<impl Iterator<Item = (Bytes, Bytes)>, KeydeckError> {
    if items.len() % 2 != 0 {
        return Err(KeydeckError::Protocol(
            "expected an even number of elements".to_string(),
        ));
    }
    let mut it = items.into_iter();
    Ok(std::iter::from_fn(move || Some((it.next()?, it.next()?))))
}

fn parse_score(raw: &[u8]) -> Result<f64, KeydeckError> {
    std::str::from_utf8(raw)
        .ok()
        .and_then(|s| s.parse::<f64>().ok())
        .ok_or_else(|| {
            KeydeckError::Protocol(format!(
                "invalid score '{}'",
                String::from_utf8_lossy(raw)
            ))
        })
}
