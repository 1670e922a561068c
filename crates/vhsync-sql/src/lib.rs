//! Identifier handling for generated SQL.
//!
//! Postgres cannot bind identifiers as statement parameters, so every table,
//! column, trigger or function name that ends up inside DDL text goes through
//! [`SafeIdent`] first: the name is checked against a strict allow-list and
//! then rendered double-quoted.

use std::fmt;

/// Longest identifier Postgres keeps without truncation (NAMEDATALEN - 1).
pub const PG_IDENT_MAX: usize = 63;

/// Why a name was rejected as an SQL identifier.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdentError {
    #[error("identifier is empty")]
    Empty,

    #[error("identifier `{0}` is longer than {PG_IDENT_MAX} bytes")]
    TooLong(String),

    #[error("identifier `{0}` must start with a letter or underscore")]
    BadStart(String),

    #[error("identifier `{name}` contains disallowed character {ch:?}")]
    BadChar { name: String, ch: char },
}

/// Check `name` against the identifier allow-list.
///
/// Accepted: `[A-Za-z_][A-Za-z0-9_$]*`, at most [`PG_IDENT_MAX`] bytes.
///
/// ```
/// use vhsync_sql::validate_ident;
/// assert!(validate_ident("customers").is_ok());
/// assert!(validate_ident("order_items_2024").is_ok());
/// assert!(validate_ident("users; DROP TABLE x").is_err());
/// assert!(validate_ident("1st").is_err());
/// ```
pub fn validate_ident(name: &str) -> Result<&str, IdentError> {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return Err(IdentError::Empty);
    };
    if name.len() > PG_IDENT_MAX {
        return Err(IdentError::TooLong(name.to_string()));
    }
    if !(first.is_ascii_alphabetic() || first == '_') {
        return Err(IdentError::BadStart(name.to_string()));
    }
    if let Some(ch) = chars.find(|c| !(c.is_ascii_alphanumeric() || *c == '_' || *c == '$')) {
        return Err(IdentError::BadChar {
            name: name.to_string(),
            ch,
        });
    }
    Ok(name)
}

/// An identifier that passed [`validate_ident`].
///
/// Display writes it double-quoted, ready to splice into SQL.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SafeIdent(String);

impl SafeIdent {
    pub fn new(name: impl Into<String>) -> Result<Self, IdentError> {
        let name = name.into();
        validate_ident(&name)?;
        Ok(Self(name))
    }

    /// The raw, unquoted name.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The quoted form, e.g. `"customers"`.
    pub fn quoted(&self) -> String {
        quote_ident(&self.0)
    }
}

impl fmt::Display for SafeIdent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&Ident(&self.0), f)
    }
}

impl AsRef<str> for SafeIdent {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A PostgreSQL string literal wrapper.
///
/// Display writes the value escaped and quoted with single quotes.
///
/// ```
/// use vhsync_sql::Lit;
/// assert_eq!(format!("{}", Lit("foo")), "'foo'");
/// assert_eq!(format!("{}", Lit("it's")), "'it''s'");
/// ```
pub struct Lit<T: AsRef<str>>(pub T);

impl<T: AsRef<str>> fmt::Display for Lit<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "'")?;
        for c in self.0.as_ref().chars() {
            if c == '\'' {
                write!(f, "''")?;
            } else {
                write!(f, "{}", c)?;
            }
        }
        write!(f, "'")
    }
}

/// A PostgreSQL identifier wrapper.
///
/// Display writes the value escaped and quoted with double quotes.
///
/// ```
/// use vhsync_sql::Ident;
/// assert_eq!(format!("{}", Ident("user")), "\"user\"");
/// assert_eq!(format!("{}", Ident("bla\"h")), "\"bla\"\"h\"");
/// ```
pub struct Ident<T: AsRef<str>>(pub T);

impl<T: AsRef<str>> fmt::Display for Ident<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"")?;
        for c in self.0.as_ref().chars() {
            if c == '"' {
                write!(f, "\"\"")?;
            } else {
                write!(f, "{}", c)?;
            }
        }
        write!(f, "\"")
    }
}

/// Quote a PostgreSQL identifier, doubling any embedded quotes.
pub fn quote_ident(name: &str) -> String {
    format!("{}", Ident(name))
}

/// Schema-qualified, quoted table reference: `"schema"."table"`.
pub fn qualified(schema: &SafeIdent, table: &SafeIdent) -> String {
    format!("{}.{}", schema, table)
}

/// The name prefix that marks tables owned by the engine itself.
///
/// Tables whose names start with the prefix hold configuration and audit
/// data; they are never treated as user tables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservedPrefix(String);

impl ReservedPrefix {
    /// The prefix used when nothing else is configured.
    pub const DEFAULT: &'static str = "vh_";

    pub fn new(prefix: impl Into<String>) -> Result<Self, IdentError> {
        let prefix = prefix.into();
        validate_ident(&prefix)?;
        Ok(Self(prefix))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether `name` belongs to the engine's own storage.
    pub fn matches(&self, name: &str) -> bool {
        name.starts_with(&self.0)
    }

    /// Name of an engine-owned object, e.g. `table("tables")` → `vh_tables`.
    pub fn table(&self, suffix: &str) -> Result<SafeIdent, IdentError> {
        SafeIdent::new(format!("{}{}", self.0, suffix))
    }
}

impl Default for ReservedPrefix {
    fn default() -> Self {
        Self(Self::DEFAULT.to_string())
    }
}

impl fmt::Display for ReservedPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Name of the per-table audit trigger.
///
/// `{prefix}audit_{table}` when that fits in [`PG_IDENT_MAX`]; otherwise the
/// table part is truncated and a stable hash of the full table name appended,
/// so two long table names never collide on the same trigger.
pub fn audit_trigger_name(prefix: &ReservedPrefix, table: &str) -> String {
    let head = format!("{}audit_", prefix.as_str());
    let plain = format!("{}{}", head, table);
    if plain.len() <= PG_IDENT_MAX {
        return plain;
    }

    let hex = blake3::hash(table.as_bytes()).to_hex().to_string();
    let suffix = &hex[..12];
    let max_table_len = PG_IDENT_MAX.saturating_sub(head.len() + 1 + suffix.len());

    let mut len = max_table_len.min(table.len());
    while len > 0 && !table.is_char_boundary(len) {
        len -= 1;
    }
    format!("{}{}_{}", head, &table[..len], suffix)
}

/// Stable 64-bit key for `pg_advisory_xact_lock`, derived from `name`.
pub fn advisory_lock_key(name: &str) -> i64 {
    let hash = blake3::hash(name.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&hash.as_bytes()[..8]);
    i64::from_le_bytes(bytes)
}
