use crate::constants::{page_info, pagination as args};
use crate::error::{DocGraphError, DocGraphResult};
use crate::value::JsonMap;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

/// Cursor for the row at `offset`: base64 of `connection:<offset>`
pub fn offset_to_cursor(offset: u64) -> String {
    STANDARD.encode(format!("{}{offset}", args::CURSOR_PREFIX))
}

/// Inverse of [`offset_to_cursor`]; `None` for anything it did not produce
pub fn cursor_to_offset(cursor: &str) -> Option<i64> {
    let bytes = STANDARD.decode(cursor).ok()?;
    let decoded = String::from_utf8(bytes).ok()?;
    decoded.strip_prefix(args::CURSOR_PREFIX)?.parse::<i64>().ok()
}

/// Decodes `cursor`, falling back to `default` when it is absent, malformed
/// or outside `[0, length)`.
pub fn get_offset_with_default(cursor: Option<&str>, length: u64, default: i64) -> i64 {
    let cursor = match cursor {
        Some(x) => x,
        None => return default,
    };
    match cursor_to_offset(cursor) {
        Some(offset) if offset >= 0 && (offset as u64) < length => offset,
        _ => {
            debug!(cursor, length, "ignoring out of range cursor");
            default
        }
    }
}

/// Relay paging arguments, validated
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Pagination {
    pub first: Option<u64>,
    pub last: Option<u64>,
    pub after: Option<String>,
    pub before: Option<String>,
}

fn positive(name: &str, value: Option<i64>) -> DocGraphResult<Option<u64>> {
    match value {
        None => Ok(None),
        Some(x) if x > 0 => Ok(Some(x as u64)),
        Some(x) => Err(DocGraphError::argument(format!(
            "`{name}` must be greater than 0, got {x}"
        ))),
    }
}

impl Pagination {
    pub fn new(
        first: Option<i64>,
        last: Option<i64>,
        after: Option<String>,
        before: Option<String>,
    ) -> DocGraphResult<Self> {
        Ok(Self {
            first: positive(args::FIRST, first)?,
            last: positive(args::LAST, last)?,
            after,
            before,
        })
    }

    /// Computes the rows to fetch out of a result set of `length` rows.
    /// `max_rows` caps the limit, and supplies one when paging is unbounded.
    pub fn window(&self, length: u64, max_rows: Option<u64>) -> PageWindow {
        let (skip, limit) = if let Some(first) = self.first {
            let after = get_offset_with_default(self.after.as_deref(), length, -1);
            ((after + 1) as u64, Some(first))
        } else if let Some(last) = self.last {
            let before = get_offset_with_default(self.before.as_deref(), length, length as i64);
            let skip = (before - last as i64).max(0);
            (skip as u64, Some((before - skip) as u64))
        } else {
            (0, None)
        };

        let limit = match (limit, max_rows) {
            (Some(x), Some(cap)) => Some(x.min(cap)),
            (None, cap) => cap,
            (limit, None) => limit,
        };
        PageWindow { skip, limit }
    }

    pub fn page_info(&self, window: &PageWindow, returned: usize, length: u64) -> PageInfo {
        let has_previous_page = self.last.is_some() && window.skip != 0;
        let has_next_page = self.first.is_some() && window.skip + (returned as u64) < length;
        let (start_cursor, end_cursor) = match returned {
            0 => (None, None),
            n => (
                Some(offset_to_cursor(window.skip)),
                Some(offset_to_cursor(window.skip + n as u64 - 1)),
            ),
        };
        PageInfo {
            has_previous_page,
            has_next_page,
            start_cursor,
            end_cursor,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PageWindow {
    pub skip: u64,
    pub limit: Option<u64>,
}

impl PageWindow {
    /// Applies the window to an already ordered list
    pub fn slice<'a, T>(&self, items: &'a [T]) -> &'a [T] {
        let start = (self.skip as usize).min(items.len());
        let end = match self.limit {
            Some(limit) => start.saturating_add(limit as usize).min(items.len()),
            None => items.len(),
        };
        &items[start..end]
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    pub has_previous_page: bool,
    pub has_next_page: bool,
    pub start_cursor: Option<String>,
    pub end_cursor: Option<String>,
}

impl PageInfo {
    pub fn to_value(&self) -> Value {
        let cursor = |x: &Option<String>| x.clone().map_or(Value::Null, Value::String);
        let mut map = JsonMap::new();
        map.insert(page_info::HAS_PREVIOUS_PAGE.to_string(), Value::Bool(self.has_previous_page));
        map.insert(page_info::HAS_NEXT_PAGE.to_string(), Value::Bool(self.has_next_page));
        map.insert(page_info::START_CURSOR.to_string(), cursor(&self.start_cursor));
        map.insert(page_info::END_CURSOR.to_string(), cursor(&self.end_cursor));
        Value::Object(map)
    }
}
