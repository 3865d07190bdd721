//! # Cursor Scans
//!
//! Purpose: Page through keys (SCAN) or the members of one collection (SSCAN,
//! HSCAN, ZSCAN) with a server cursor, either page by page or as a lazy
//! iterator.
//!
//! The server guarantees neither ordering nor uniqueness of the items it
//! returns; a full pass ends when the cursor comes back as 0.

use std::collections::VecDeque;

use bytes::Bytes;
use wirekv_common::{commands, CommandFrame, Reply, ToArg};

use crate::connection::Connection;
use crate::decode::FromReply;
use crate::error::{ClientError, ClientResult};

/// What a scan enumerates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanKind {
    /// Keys of the selected database (SCAN).
    Keys,
    /// Members of a set (SSCAN).
    Set(Bytes),
    /// Fields of a hash (HSCAN); items alternate field, value.
    Hash(Bytes),
    /// Members of a sorted set (ZSCAN); items alternate member, score.
    SortedSet(Bytes),
}

impl ScanKind {
    /// Scan over the members of the set stored at `key`.
    pub fn set(key: impl ToArg) -> Self {
        ScanKind::Set(key.to_arg())
    }

    /// Scan over the fields of the hash stored at `key`.
    pub fn hash(key: impl ToArg) -> Self {
        ScanKind::Hash(key.to_arg())
    }

    /// Scan over the members of the sorted set stored at `key`.
    pub fn sorted_set(key: impl ToArg) -> Self {
        ScanKind::SortedSet(key.to_arg())
    }

    fn frame(&self, cursor: u64, options: &ScanOptions) -> CommandFrame {
        let mut frame = match self {
            ScanKind::Keys => CommandFrame::new(commands::SCAN),
            ScanKind::Set(key) => CommandFrame::new(commands::SSCAN).arg(key),
            ScanKind::Hash(key) => CommandFrame::new(commands::HSCAN).arg(key),
            ScanKind::SortedSet(key) => CommandFrame::new(commands::ZSCAN).arg(key),
        };
        frame.push(cursor);
        if let Some(pattern) = &options.pattern {
            frame.push(commands::MATCH);
            frame.push(pattern);
        }
        if let Some(count) = options.count {
            frame.push(commands::COUNT);
            frame.push(count);
        }
        frame
    }
}

/// MATCH and COUNT modifiers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanOptions {
    /// Glob pattern the server filters items with.
    pub pattern: Option<Bytes>,
    /// Page-size hint.
    pub count: Option<u32>,
}

impl ScanOptions {
    pub fn with_pattern(mut self, pattern: impl ToArg) -> Self {
        self.pattern = Some(pattern.to_arg());
        self
    }

    pub fn with_count(mut self, count: u32) -> Self {
        self.count = Some(count);
        self
    }
}

/// One page of a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanPage {
    /// Cursor for the next page; 0 when the pass is complete.
    pub cursor: u64,
    pub items: Vec<Bytes>,
}

impl FromReply for ScanPage {
    fn from_reply(reply: Reply) -> ClientResult<Self> {
        let parts = match reply {
            Reply::Array(Some(parts)) => parts,
            other => return Err(ClientError::unexpected("scan page", &other)),
        };
        let [cursor, items]: [Reply; 2] = parts.try_into().map_err(|parts: Vec<Reply>| {
            ClientError::UnexpectedReply {
                expected: "two-element scan page",
                actual: format!("array of {}", parts.len()),
            }
        })?;
        Ok(ScanPage {
            cursor: u64::from_reply(cursor)?,
            items: Vec::<Bytes>::from_reply(items)?,
        })
    }
}

impl Connection {
    /// Fetches the page that starts at `cursor`.
    pub fn scan_page(
        &mut self,
        kind: &ScanKind,
        cursor: u64,
        options: &ScanOptions,
    ) -> ClientResult<ScanPage> {
        if let Some(version) = self.server_version() {
            if !version.supports_scan() {
                return Err(ClientError::InvalidState(format!(
                    "server {} does not support cursor scans",
                    version
                )));
            }
        }
        self.query(&kind.frame(cursor, options))
    }

    /// Lazy iterator over every item of a full scan pass.
    pub fn scan_iter(&mut self, kind: ScanKind, options: ScanOptions) -> ScanIter<'_> {
        ScanIter {
            conn: self,
            kind,
            options,
            cursor: 0,
            buffered: VecDeque::new(),
            done: false,
        }
    }
}

/// Iterator that fetches pages on demand until the cursor returns to 0.
///
/// An error ends the iteration after it is yielded; `cursor()` still holds the
/// position of the page that failed, so a new iterator can resume there.
pub struct ScanIter<'c> {
    conn: &'c mut Connection,
    kind: ScanKind,
    options: ScanOptions,
    cursor: u64,
    buffered: VecDeque<Bytes>,
    done: bool,
}

impl<'c> ScanIter<'c> {
    /// Starts from `cursor` instead of the beginning.
    pub fn starting_at(mut self, cursor: u64) -> Self {
        self.cursor = cursor;
        self
    }

    /// Cursor of the next page to fetch.
    pub fn cursor(&self) -> u64 {
        self.cursor
    }
}

impl Iterator for ScanIter<'_> {
    type Item = ClientResult<Bytes>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(item) = self.buffered.pop_front() {
                return Some(Ok(item));
            }
            if self.done {
                return None;
            }
            match self.conn.scan_page(&self.kind, self.cursor, &self.options) {
                Ok(page) => {
                    self.cursor = page.cursor;
                    self.done = page.cursor == 0;
                    self.buffered.extend(page.items);
                }
                Err(err) => {
                    self.done = true;
                    return Some(Err(err));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bulk(data: &str) -> Reply {
        Reply::Bulk(Some(Bytes::copy_from_slice(data.as_bytes())))
    }

    #[test]
    fn frames_carry_cursor_and_modifiers() {
        let options = ScanOptions::default().with_pattern("user:*").with_count(100);
        let frame = ScanKind::hash("h").frame(17, &options);
        let args: Vec<&[u8]> = frame.args().iter().map(|arg| arg.as_ref()).collect();
        assert_eq!(
            args,
            vec![
                &b"HSCAN"[..],
                &b"h"[..],
                &b"17"[..],
                &b"MATCH"[..],
                &b"user:*"[..],
                &b"COUNT"[..],
                &b"100"[..],
            ]
        );

        let frame = ScanKind::Keys.frame(0, &ScanOptions::default());
        assert_eq!(frame.argc(), 2);
    }

    #[test]
    fn page_decodes_cursor_and_items() {
        let reply = Reply::Array(Some(vec![
            bulk("42"),
            Reply::Array(Some(vec![bulk("a"), bulk("b")])),
        ]));
        let page = ScanPage::from_reply(reply).unwrap();
        assert_eq!(page.cursor, 42);
        assert_eq!(page.items, vec![Bytes::from_static(b"a"), Bytes::from_static(b"b")]);
    }

    #[test]
    fn malformed_pages_are_rejected() {
        let reply = Reply::Array(Some(vec![bulk("0")]));
        assert!(matches!(
            ScanPage::from_reply(reply),
            Err(ClientError::UnexpectedReply { .. })
        ));
        assert!(ScanPage::from_reply(Reply::Integer(0)).is_err());
    }
}
