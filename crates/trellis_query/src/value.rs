//! The data model shared by queries, parameters and the graph store.
//!
//! Values are EDN-shaped: scalars, keywords, symbols, identities and the
//! two collection kinds. Maps are ordered so two maps holding the same
//! entries compare equal regardless of insertion order, and any value
//! (including an [`Ident`]) can be used as a map key.

use core::fmt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

/// An ordered map of values, the shape of every entity and tree node.
pub type Map = BTreeMap<Value, Value>;

/// A keyword atom such as `:name` or `:person/name`.
///
/// The leading colon is not part of the stored name.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Keyword(Arc<str>);

impl Keyword {
    /// Create a keyword from its name (without the leading colon).
    #[inline]
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(Arc::from(name.as_ref()))
    }

    /// The keyword's name without the leading colon.
    #[inline]
    pub fn name(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Keyword {
    #[inline]
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl fmt::Debug for Keyword {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, ":{}", self.0)
    }
}

impl fmt::Display for Keyword {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, ":{}", self.0)
    }
}

/// A symbol atom: mutation names, parameter placeholders (`?q`), the
/// recursion marker (`...`) and the link marker (`_`).
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Symbol(Arc<str>);

impl Symbol {
    /// Name of the symbol that marks an ident as a link.
    pub const LINK: &'static str = "_";
    /// Name of the unbounded recursion marker.
    pub const RECURSION: &'static str = "...";

    #[inline]
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(Arc::from(name.as_ref()))
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.0
    }

    /// The `_` symbol used as the id of a link ident.
    #[inline]
    pub fn link() -> Self {
        Self::new(Self::LINK)
    }

    #[inline]
    pub fn is_link(&self) -> bool {
        &*self.0 == Self::LINK
    }

    /// Parameter name bound by this symbol if it is a placeholder.
    ///
    /// `?q` binds the parameter `:q`; a lone `?` binds nothing.
    pub fn placeholder(&self) -> Option<Keyword> {
        self.0
            .strip_prefix('?')
            .filter(|rest| !rest.is_empty())
            .map(Keyword::new)
    }
}

impl From<&str> for Symbol {
    #[inline]
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl fmt::Debug for Symbol {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.0)
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.0)
    }
}

/// A locally minted placeholder id, replaced by a permanent id once the
/// remote authority answers.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TempId(Uuid);

impl TempId {
    #[inline]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    #[inline]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    #[inline]
    pub const fn uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for TempId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TempId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "#tempid \"{}\"", self.0)
    }
}

impl fmt::Display for TempId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "#tempid \"{}\"", self.0)
    }
}

/// An identity reference: the `(table, id)` pair naming one entity.
///
/// An ident whose id is the `_` symbol is a *link* and names the root
/// property `table` instead of a table entry.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Ident {
    pub table: Keyword,
    pub id: Box<Value>,
}

impl Ident {
    #[inline]
    pub fn new(table: impl Into<Keyword>, id: impl Into<Value>) -> Self {
        Self {
            table: table.into(),
            id: Box::new(id.into()),
        }
    }

    /// A link to the root property `key`.
    #[inline]
    pub fn link(key: impl Into<Keyword>) -> Self {
        Self::new(key, Value::Symbol(Symbol::link()))
    }

    #[inline]
    pub fn is_link(&self) -> bool {
        matches!(&*self.id, Value::Symbol(symbol) if symbol.is_link())
    }
}

impl fmt::Debug for Ident {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "[{} {}]", self.table, self.id)
    }
}

impl fmt::Display for Ident {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "[{} {}]", self.table, self.id)
    }
}

/// An EDN-shaped value.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Value {
    #[default]
    Nil,
    Bool(bool),
    Int(i64),
    Str(String),
    Keyword(Keyword),
    Symbol(Symbol),
    TempId(TempId),
    Ident(Ident),
    Seq(Vec<Value>),
    Map(Map),
}

impl Value {
    /// Shorthand for a keyword value.
    #[inline]
    pub fn keyword(name: &str) -> Self {
        Self::Keyword(Keyword::new(name))
    }

    #[inline]
    pub const fn is_nil(&self) -> bool {
        matches!(self, Self::Nil)
    }

    #[inline]
    pub const fn as_map(&self) -> Option<&Map> {
        match self {
            Self::Map(map) => Some(map),
            _ => None,
        }
    }

    #[inline]
    pub fn as_map_mut(&mut self) -> Option<&mut Map> {
        match self {
            Self::Map(map) => Some(map),
            _ => None,
        }
    }

    #[inline]
    pub fn as_seq(&self) -> Option<&[Self]> {
        match self {
            Self::Seq(items) => Some(items),
            _ => None,
        }
    }

    #[inline]
    pub const fn as_ident(&self) -> Option<&Ident> {
        match self {
            Self::Ident(ident) => Some(ident),
            _ => None,
        }
    }

    #[inline]
    pub const fn as_keyword(&self) -> Option<&Keyword> {
        match self {
            Self::Keyword(keyword) => Some(keyword),
            _ => None,
        }
    }

    #[inline]
    pub const fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(number) => Some(*number),
            _ => None,
        }
    }

    #[inline]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(text) => Some(text),
            _ => None,
        }
    }

    /// Look up a keyword-keyed entry when this value is a map.
    pub fn get(&self, key: &str) -> Option<&Self> {
        self.as_map()?.get(&Self::keyword(key))
    }
}

impl From<bool> for Value {
    fn from(flag: bool) -> Self {
        Self::Bool(flag)
    }
}

impl From<i64> for Value {
    fn from(number: i64) -> Self {
        Self::Int(number)
    }
}

impl From<i32> for Value {
    fn from(number: i32) -> Self {
        Self::Int(i64::from(number))
    }
}

impl From<&str> for Value {
    fn from(text: &str) -> Self {
        Self::Str(text.to_owned())
    }
}

impl From<String> for Value {
    fn from(text: String) -> Self {
        Self::Str(text)
    }
}

impl From<Keyword> for Value {
    fn from(keyword: Keyword) -> Self {
        Self::Keyword(keyword)
    }
}

impl From<Symbol> for Value {
    fn from(symbol: Symbol) -> Self {
        Self::Symbol(symbol)
    }
}

impl From<TempId> for Value {
    fn from(tempid: TempId) -> Self {
        Self::TempId(tempid)
    }
}

impl From<Ident> for Value {
    fn from(ident: Ident) -> Self {
        Self::Ident(ident)
    }
}

impl From<Vec<Self>> for Value {
    fn from(items: Vec<Self>) -> Self {
        Self::Seq(items)
    }
}

impl From<Map> for Value {
    fn from(map: Map) -> Self {
        Self::Map(map)
    }
}

/// Write `text` as an EDN string literal.
pub(crate) fn write_string(formatter: &mut fmt::Formatter<'_>, text: &str) -> fmt::Result {
    formatter.write_str("\"")?;
    for character in text.chars() {
        match character {
            '"' => formatter.write_str("\\\"")?,
            '\\' => formatter.write_str("\\\\")?,
            '\n' => formatter.write_str("\\n")?,
            other => write!(formatter, "{other}")?,
        }
    }
    formatter.write_str("\"")
}

/// Write `items` separated by single spaces.
pub(crate) fn write_spaced<T: fmt::Display>(
    formatter: &mut fmt::Formatter<'_>,
    items: impl IntoIterator<Item = T>,
) -> fmt::Result {
    for (index, item) in items.into_iter().enumerate() {
        if index > 0 {
            formatter.write_str(" ")?;
        }
        write!(formatter, "{item}")?;
    }
    Ok(())
}

/// Write the entries of a map as `{k v k v}`.
pub(crate) fn write_map<K: fmt::Display, V: fmt::Display>(
    formatter: &mut fmt::Formatter<'_>,
    entries: impl IntoIterator<Item = (K, V)>,
) -> fmt::Result {
    formatter.write_str("{")?;
    for (index, (key, value)) in entries.into_iter().enumerate() {
        if index > 0 {
            formatter.write_str(" ")?;
        }
        write!(formatter, "{key} {value}")?;
    }
    formatter.write_str("}")
}

impl fmt::Display for Value {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nil => formatter.write_str("nil"),
            Self::Bool(flag) => write!(formatter, "{flag}"),
            Self::Int(number) => write!(formatter, "{number}"),
            Self::Str(text) => write_string(formatter, text),
            Self::Keyword(keyword) => write!(formatter, "{keyword}"),
            Self::Symbol(symbol) => write!(formatter, "{symbol}"),
            Self::TempId(tempid) => write!(formatter, "{tempid}"),
            Self::Ident(ident) => write!(formatter, "{ident}"),
            Self::Seq(items) => {
                formatter.write_str("[")?;
                write_spaced(formatter, items)?;
                formatter.write_str("]")
            }
            Self::Map(map) => write_map(formatter, map),
        }
    }
}
