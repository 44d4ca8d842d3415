//! Column type descriptors.
//!
//! The server describes every column with a textual type such as
//! `Array(LowCardinality(Nullable(String)))`. `ColumnType::parse` turns that
//! into an immutable tree; `Display` renders the canonical name back.

use crate::error::{ChError, ChResult};
use std::fmt;

/// Default `max_types` of `Dynamic`.
pub const DEFAULT_DYNAMIC_MAX_TYPES: usize = 32;

/// Upper bound on `Dynamic(max_types=N)`.
const MAX_DYNAMIC_TYPES: usize = 254;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntervalKind {
    Nanosecond,
    Microsecond,
    Millisecond,
    Second,
    Minute,
    Hour,
    Day,
    Week,
    Month,
    Quarter,
    Year,
}

impl IntervalKind {
    fn from_suffix(s: &str) -> Option<Self> {
        Some(match s {
            "Nanosecond" => IntervalKind::Nanosecond,
            "Microsecond" => IntervalKind::Microsecond,
            "Millisecond" => IntervalKind::Millisecond,
            "Second" => IntervalKind::Second,
            "Minute" => IntervalKind::Minute,
            "Hour" => IntervalKind::Hour,
            "Day" => IntervalKind::Day,
            "Week" => IntervalKind::Week,
            "Month" => IntervalKind::Month,
            "Quarter" => IntervalKind::Quarter,
            "Year" => IntervalKind::Year,
            _ => return None,
        })
    }
}

/// Geo aliases over nested arrays of `Float64` pairs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GeoKind {
    Point,
    Ring,
    LineString,
    MultiLineString,
    Polygon,
    MultiPolygon,
}

impl GeoKind {
    /// Structural type the alias stands for.
    pub fn storage(self) -> ColumnType {
        let point = ColumnType::Tuple(vec![
            TupleField::unnamed(ColumnType::Float64),
            TupleField::unnamed(ColumnType::Float64),
        ]);
        let array = |t: ColumnType| ColumnType::Array(Box::new(t));
        match self {
            GeoKind::Point => point,
            GeoKind::Ring | GeoKind::LineString => array(point),
            GeoKind::MultiLineString | GeoKind::Polygon => array(array(point)),
            GeoKind::MultiPolygon => array(array(array(point))),
        }
    }

    fn name(self) -> &'static str {
        match self {
            GeoKind::Point => "Point",
            GeoKind::Ring => "Ring",
            GeoKind::LineString => "LineString",
            GeoKind::MultiLineString => "MultiLineString",
            GeoKind::Polygon => "Polygon",
            GeoKind::MultiPolygon => "MultiPolygon",
        }
    }
}

/// One element of a `Tuple`, optionally named.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TupleField {
    pub name: Option<String>,
    pub ty: ColumnType,
}

impl TupleField {
    pub fn unnamed(ty: ColumnType) -> Self {
        Self { name: None, ty }
    }

    pub fn named(name: impl Into<String>, ty: ColumnType) -> Self {
        Self {
            name: Some(name.into()),
            ty,
        }
    }
}

/// Parsed column type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ColumnType {
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    UInt128,
    UInt256,
    Int8,
    Int16,
    Int32,
    Int64,
    Int128,
    Int256,
    Float32,
    Float64,
    BFloat16,
    Bool,
    String,
    FixedString(usize),
    Uuid,
    IPv4,
    IPv6,
    Date,
    Date32,
    DateTime(Option<String>),
    DateTime64(u8, Option<String>),
    Decimal { precision: u8, scale: u8 },
    Enum8(Vec<(String, i8)>),
    Enum16(Vec<(String, i16)>),
    Nothing,
    Interval(IntervalKind),
    Nullable(Box<ColumnType>),
    Array(Box<ColumnType>),
    Map(Box<ColumnType>, Box<ColumnType>),
    Tuple(Vec<TupleField>),
    Nested(Vec<(String, ColumnType)>),
    LowCardinality(Box<ColumnType>),
    /// Alternatives, kept sorted by type name.
    Variant(Vec<ColumnType>),
    Dynamic { max_types: usize },
    Geo(GeoKind),
    SimpleAggregateFunction(String, Box<ColumnType>),
}

impl ColumnType {
    pub fn parse(input: &str) -> ChResult<ColumnType> {
        let mut parser = TypeParser { input, pos: 0 };
        let ty = parser.parse_type()?;
        parser.skip_ws();
        if parser.pos != input.len() {
            return Err(ChError::type_parse(
                &input[parser.pos..],
                "unexpected trailing input",
            ));
        }
        Ok(ty)
    }

    pub fn nullable(inner: ColumnType) -> ColumnType {
        ColumnType::Nullable(Box::new(inner))
    }

    pub fn array(inner: ColumnType) -> ColumnType {
        ColumnType::Array(Box::new(inner))
    }

    pub fn low_cardinality(inner: ColumnType) -> ColumnType {
        ColumnType::LowCardinality(Box::new(inner))
    }

    pub fn map(key: ColumnType, value: ColumnType) -> ColumnType {
        ColumnType::Map(Box::new(key), Box::new(value))
    }

    /// Build a `Variant`, sorting the alternatives the way the server does.
    pub fn variant(mut types: Vec<ColumnType>) -> ColumnType {
        types.sort_by_key(|t| t.to_string());
        types.dedup();
        ColumnType::Variant(types)
    }

    pub fn is_nullable(&self) -> bool {
        matches!(self, ColumnType::Nullable(_))
    }

    /// Resolve aliases (`Nested`, geo, `SimpleAggregateFunction`, `Interval*`)
    /// to the type whose wire format they share.
    pub fn storage(&self) -> ColumnType {
        match self {
            ColumnType::Geo(kind) => kind.storage(),
            ColumnType::Nested(fields) => ColumnType::array(ColumnType::Tuple(
                fields
                    .iter()
                    .map(|(name, ty)| TupleField::named(name.clone(), ty.clone()))
                    .collect(),
            )),
            ColumnType::SimpleAggregateFunction(_, inner) => inner.storage(),
            ColumnType::Interval(_) => ColumnType::Int64,
            other => other.clone(),
        }
    }
}

impl std::str::FromStr for ColumnType {
    type Err = ChError;

    fn from_str(s: &str) -> ChResult<Self> {
        ColumnType::parse(s)
    }
}

fn write_quoted(f: &mut fmt::Formatter<'_>, s: &str) -> fmt::Result {
    f.write_str("'")?;
    for c in s.chars() {
        match c {
            '\'' => f.write_str("\\'")?,
            '\\' => f.write_str("\\\\")?,
            c => write!(f, "{}", c)?,
        }
    }
    f.write_str("'")
}

fn write_list<T>(
    f: &mut fmt::Formatter<'_>,
    items: &[T],
    mut each: impl FnMut(&mut fmt::Formatter<'_>, &T) -> fmt::Result,
) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        each(f, item)?;
    }
    Ok(())
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnType::UInt8 => f.write_str("UInt8"),
            ColumnType::UInt16 => f.write_str("UInt16"),
            ColumnType::UInt32 => f.write_str("UInt32"),
            ColumnType::UInt64 => f.write_str("UInt64"),
            ColumnType::UInt128 => f.write_str("UInt128"),
            ColumnType::UInt256 => f.write_str("UInt256"),
            ColumnType::Int8 => f.write_str("Int8"),
            ColumnType::Int16 => f.write_str("Int16"),
            ColumnType::Int32 => f.write_str("Int32"),
            ColumnType::Int64 => f.write_str("Int64"),
            ColumnType::Int128 => f.write_str("Int128"),
            ColumnType::Int256 => f.write_str("Int256"),
            ColumnType::Float32 => f.write_str("Float32"),
            ColumnType::Float64 => f.write_str("Float64"),
            ColumnType::BFloat16 => f.write_str("BFloat16"),
            ColumnType::Bool => f.write_str("Bool"),
            ColumnType::String => f.write_str("String"),
            ColumnType::FixedString(n) => write!(f, "FixedString({})", n),
            ColumnType::Uuid => f.write_str("UUID"),
            ColumnType::IPv4 => f.write_str("IPv4"),
            ColumnType::IPv6 => f.write_str("IPv6"),
            ColumnType::Date => f.write_str("Date"),
            ColumnType::Date32 => f.write_str("Date32"),
            ColumnType::DateTime(None) => f.write_str("DateTime"),
            ColumnType::DateTime(Some(tz)) => {
                f.write_str("DateTime(")?;
                write_quoted(f, tz)?;
                f.write_str(")")
            }
            ColumnType::DateTime64(p, None) => write!(f, "DateTime64({})", p),
            ColumnType::DateTime64(p, Some(tz)) => {
                write!(f, "DateTime64({}, ", p)?;
                write_quoted(f, tz)?;
                f.write_str(")")
            }
            ColumnType::Decimal { precision, scale } => {
                write!(f, "Decimal({}, {})", precision, scale)
            }
            ColumnType::Enum8(items) => {
                f.write_str("Enum8(")?;
                write_list(f, items, |f, (name, code)| {
                    write_quoted(f, name)?;
                    write!(f, " = {}", code)
                })?;
                f.write_str(")")
            }
            ColumnType::Enum16(items) => {
                f.write_str("Enum16(")?;
                write_list(f, items, |f, (name, code)| {
                    write_quoted(f, name)?;
                    write!(f, " = {}", code)
                })?;
                f.write_str(")")
            }
            ColumnType::Nothing => f.write_str("Nothing"),
            ColumnType::Interval(kind) => write!(f, "Interval{:?}", kind),
            ColumnType::Nullable(t) => write!(f, "Nullable({})", t),
            ColumnType::Array(t) => write!(f, "Array({})", t),
            ColumnType::Map(k, v) => write!(f, "Map({}, {})", k, v),
            ColumnType::Tuple(fields) => {
                f.write_str("Tuple(")?;
                write_list(f, fields, |f, field| match &field.name {
                    Some(name) => write!(f, "{} {}", name, field.ty),
                    None => write!(f, "{}", field.ty),
                })?;
                f.write_str(")")
            }
            ColumnType::Nested(fields) => {
                f.write_str("Nested(")?;
                write_list(f, fields, |f, (name, ty)| write!(f, "{} {}", name, ty))?;
                f.write_str(")")
            }
            ColumnType::LowCardinality(t) => write!(f, "LowCardinality({})", t),
            ColumnType::Variant(types) => {
                f.write_str("Variant(")?;
                write_list(f, types, |f, t| write!(f, "{}", t))?;
                f.write_str(")")
            }
            ColumnType::Dynamic { max_types } if *max_types == DEFAULT_DYNAMIC_MAX_TYPES => {
                f.write_str("Dynamic")
            }
            ColumnType::Dynamic { max_types } => write!(f, "Dynamic(max_types={})", max_types),
            ColumnType::Geo(kind) => f.write_str(kind.name()),
            ColumnType::SimpleAggregateFunction(func, t) => {
                write!(f, "SimpleAggregateFunction({}, {})", func, t)
            }
        }
    }
}

struct TypeParser<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> TypeParser<'a> {
    fn rest(&self) -> &'a str {
        &self.input[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn skip_ws(&mut self) {
        let trimmed = self.rest().trim_start();
        self.pos = self.input.len() - trimmed.len();
    }

    fn eat(&mut self, c: char) -> bool {
        self.skip_ws();
        if self.peek() == Some(c) {
            self.pos += c.len_utf8();
            true
        } else {
            false
        }
    }

    fn fail<T>(&self, start: usize, reason: &str) -> ChResult<T> {
        let end = self.input.len().min(self.pos.max(start + 1));
        let fragment = self.input.get(start..end).unwrap_or(&self.input[start..]);
        Err(ChError::type_parse(fragment, reason))
    }

    fn expect(&mut self, c: char, start: usize) -> ChResult<()> {
        if self.eat(c) {
            Ok(())
        } else if self.peek().is_none() {
            self.fail(start, "unexpected end of input")
        } else {
            self.fail(start, &format!("expected '{}'", c))
        }
    }

    fn ident(&mut self) -> ChResult<&'a str> {
        self.skip_ws();
        let start = self.pos;
        let len = self
            .rest()
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .unwrap_or(self.rest().len());
        if len == 0 {
            return if self.peek().is_none() {
                self.fail(start, "unexpected end of input")
            } else {
                self.fail(start, "expected a type name")
            };
        }
        self.pos += len;
        Ok(&self.input[start..self.pos])
    }

    /// Element name inside `Tuple`/`Nested`, possibly backquoted.
    fn field_name(&mut self) -> ChResult<String> {
        self.skip_ws();
        if self.peek() == Some('`') {
            let start = self.pos;
            self.pos += 1;
            let mut name = String::new();
            loop {
                match self.peek() {
                    None => return self.fail(start, "unterminated quoted name"),
                    Some('`') => {
                        self.pos += 1;
                        return Ok(name);
                    }
                    Some(c) => {
                        name.push(c);
                        self.pos += c.len_utf8();
                    }
                }
            }
        }
        Ok(self.ident()?.to_string())
    }

    fn number(&mut self, start: usize) -> ChResult<i64> {
        self.skip_ws();
        let begin = self.pos;
        let mut len = 0;
        for (i, c) in self.rest().char_indices() {
            if c.is_ascii_digit() || (i == 0 && c == '-') {
                len = i + 1;
            } else {
                break;
            }
        }
        self.pos += len;
        self.input[begin..self.pos]
            .parse::<i64>()
            .or_else(|_| self.fail(start, "expected a number"))
    }

    fn quoted(&mut self, start: usize) -> ChResult<String> {
        self.skip_ws();
        if self.peek() != Some('\'') {
            return self.fail(start, "expected a quoted string");
        }
        self.pos += 1;
        let mut out = String::new();
        loop {
            match self.peek() {
                None => return self.fail(start, "unterminated string literal"),
                Some('\'') => {
                    self.pos += 1;
                    return Ok(out);
                }
                Some('\\') => {
                    self.pos += 1;
                    match self.peek() {
                        Some(c) => {
                            out.push(c);
                            self.pos += c.len_utf8();
                        }
                        None => return self.fail(start, "unterminated string literal"),
                    }
                }
                Some(c) => {
                    out.push(c);
                    self.pos += c.len_utf8();
                }
            }
        }
    }

    fn single_arg(&mut self, start: usize) -> ChResult<ColumnType> {
        self.expect('(', start)?;
        let inner = self.parse_type()?;
        self.expect(')', start)?;
        Ok(inner)
    }

    fn type_list(&mut self, start: usize) -> ChResult<Vec<ColumnType>> {
        self.expect('(', start)?;
        let mut types = Vec::new();
        loop {
            types.push(self.parse_type()?);
            if self.eat(')') {
                return Ok(types);
            }
            self.expect(',', start)?;
        }
    }

    fn bounded(&self, start: usize, value: i64, max: i64, what: &str) -> ChResult<i64> {
        if value < 0 || value > max {
            return self.fail(start, &format!("{} {} is out of range 0..={}", what, value, max));
        }
        Ok(value)
    }

    fn enum_items(&mut self, start: usize, min: i64, max: i64) -> ChResult<Vec<(String, i64)>> {
        self.expect('(', start)?;
        let mut items = Vec::new();
        loop {
            let name = self.quoted(start)?;
            self.expect('=', start)?;
            let code = self.number(start)?;
            if code < min || code > max {
                return self.fail(start, &format!("enum value {} is out of range", code));
            }
            items.push((name, code));
            if self.eat(')') {
                return Ok(items);
            }
            self.expect(',', start)?;
        }
    }

    fn tuple_fields(&mut self, start: usize) -> ChResult<Vec<TupleField>> {
        self.expect('(', start)?;
        let mut fields = Vec::new();
        if self.eat(')') {
            return Ok(fields);
        }
        loop {
            fields.push(self.tuple_field()?);
            if self.eat(')') {
                return Ok(fields);
            }
            self.expect(',', start)?;
        }
    }

    /// `name Type` or `Type`: a bare identifier followed by another type
    /// token is a field name.
    fn tuple_field(&mut self) -> ChResult<TupleField> {
        self.skip_ws();
        let save = self.pos;
        if self.peek() == Some('`') {
            let name = self.field_name()?;
            return Ok(TupleField::named(name, self.parse_type()?));
        }
        if let Ok(name) = self.ident() {
            let after_name = self.pos;
            self.skip_ws();
            let spaced = self.pos > after_name;
            if spaced
                && self
                    .peek()
                    .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
            {
                return Ok(TupleField::named(name, self.parse_type()?));
            }
        }
        self.pos = save;
        Ok(TupleField::unnamed(self.parse_type()?))
    }

    fn parse_type(&mut self) -> ChResult<ColumnType> {
        self.skip_ws();
        let start = self.pos;
        let name = self.ident()?;

        let simple = match name {
            "UInt8" => Some(ColumnType::UInt8),
            "UInt16" => Some(ColumnType::UInt16),
            "UInt32" => Some(ColumnType::UInt32),
            "UInt64" => Some(ColumnType::UInt64),
            "UInt128" => Some(ColumnType::UInt128),
            "UInt256" => Some(ColumnType::UInt256),
            "Int8" => Some(ColumnType::Int8),
            "Int16" => Some(ColumnType::Int16),
            "Int32" => Some(ColumnType::Int32),
            "Int64" => Some(ColumnType::Int64),
            "Int128" => Some(ColumnType::Int128),
            "Int256" => Some(ColumnType::Int256),
            "Float32" => Some(ColumnType::Float32),
            "Float64" => Some(ColumnType::Float64),
            "BFloat16" => Some(ColumnType::BFloat16),
            "Bool" | "Boolean" => Some(ColumnType::Bool),
            "String" => Some(ColumnType::String),
            "UUID" => Some(ColumnType::Uuid),
            "IPv4" => Some(ColumnType::IPv4),
            "IPv6" => Some(ColumnType::IPv6),
            "Date" => Some(ColumnType::Date),
            "Date32" => Some(ColumnType::Date32),
            "Nothing" => Some(ColumnType::Nothing),
            "Point" => Some(ColumnType::Geo(GeoKind::Point)),
            "Ring" => Some(ColumnType::Geo(GeoKind::Ring)),
            "LineString" => Some(ColumnType::Geo(GeoKind::LineString)),
            "MultiLineString" => Some(ColumnType::Geo(GeoKind::MultiLineString)),
            "Polygon" => Some(ColumnType::Geo(GeoKind::Polygon)),
            "MultiPolygon" => Some(ColumnType::Geo(GeoKind::MultiPolygon)),
            _ => None,
        };
        if let Some(ty) = simple {
            self.skip_ws();
            if self.peek() == Some('(') {
                return self.fail(start, &format!("{} takes no arguments", name));
            }
            return Ok(ty);
        }

        if let Some(kind) = name.strip_prefix("Interval").and_then(IntervalKind::from_suffix) {
            return Ok(ColumnType::Interval(kind));
        }

        match name {
            "Nullable" => Ok(ColumnType::nullable(self.single_arg(start)?)),
            "Array" => Ok(ColumnType::array(self.single_arg(start)?)),
            "LowCardinality" => Ok(ColumnType::low_cardinality(self.single_arg(start)?)),
            "FixedString" => {
                self.expect('(', start)?;
                let n = self.number(start)?;
                self.expect(')', start)?;
                if n <= 0 {
                    return self.fail(start, "FixedString length must be positive");
                }
                Ok(ColumnType::FixedString(n as usize))
            }
            "DateTime" => {
                if !self.eat('(') {
                    return Ok(ColumnType::DateTime(None));
                }
                let tz = self.quoted(start)?;
                self.expect(')', start)?;
                Ok(ColumnType::DateTime(Some(tz)))
            }
            "DateTime64" => {
                self.expect('(', start)?;
                let precision = self.number(start)?;
                let precision = self.bounded(start, precision, 9, "precision")? as u8;
                let tz = if self.eat(',') {
                    Some(self.quoted(start)?)
                } else {
                    None
                };
                self.expect(')', start)?;
                Ok(ColumnType::DateTime64(precision, tz))
            }
            "Decimal" => {
                self.expect('(', start)?;
                let precision = self.number(start)?;
                let precision = self.bounded(start, precision, 76, "precision")?;
                let scale = if self.eat(',') { self.number(start)? } else { 0 };
                self.expect(')', start)?;
                if precision == 0 {
                    return self.fail(start, "precision must be positive");
                }
                let scale = self.bounded(start, scale, precision, "scale")?;
                Ok(ColumnType::Decimal {
                    precision: precision as u8,
                    scale: scale as u8,
                })
            }
            "Decimal32" | "Decimal64" | "Decimal128" | "Decimal256" => {
                let precision = match name {
                    "Decimal32" => 9,
                    "Decimal64" => 18,
                    "Decimal128" => 38,
                    _ => 76,
                };
                self.expect('(', start)?;
                let scale = self.number(start)?;
                let scale = self.bounded(start, scale, precision, "scale")?;
                self.expect(')', start)?;
                Ok(ColumnType::Decimal {
                    precision: precision as u8,
                    scale: scale as u8,
                })
            }
            "Enum8" => {
                let items = self.enum_items(start, i8::MIN as i64, i8::MAX as i64)?;
                Ok(ColumnType::Enum8(
                    items.into_iter().map(|(n, c)| (n, c as i8)).collect(),
                ))
            }
            "Enum16" => {
                let items = self.enum_items(start, i16::MIN as i64, i16::MAX as i64)?;
                Ok(ColumnType::Enum16(
                    items.into_iter().map(|(n, c)| (n, c as i16)).collect(),
                ))
            }
            "Map" => {
                self.expect('(', start)?;
                let key = self.parse_type()?;
                self.expect(',', start)?;
                let value = self.parse_type()?;
                self.expect(')', start)?;
                Ok(ColumnType::map(key, value))
            }
            "Tuple" => Ok(ColumnType::Tuple(self.tuple_fields(start)?)),
            "Nested" => {
                self.expect('(', start)?;
                let mut fields = Vec::new();
                loop {
                    let field = self.field_name()?;
                    fields.push((field, self.parse_type()?));
                    if self.eat(')') {
                        break;
                    }
                    self.expect(',', start)?;
                }
                Ok(ColumnType::Nested(fields))
            }
            "Variant" => Ok(ColumnType::variant(self.type_list(start)?)),
            "Dynamic" => {
                if !self.eat('(') {
                    return Ok(ColumnType::Dynamic {
                        max_types: DEFAULT_DYNAMIC_MAX_TYPES,
                    });
                }
                let key = self.ident()?;
                if key != "max_types" {
                    return self.fail(start, "expected max_types");
                }
                self.expect('=', start)?;
                let n = self.number(start)?;
                let n = self.bounded(start, n, MAX_DYNAMIC_TYPES as i64, "max_types")?;
                self.expect(')', start)?;
                Ok(ColumnType::Dynamic {
                    max_types: n as usize,
                })
            }
            "SimpleAggregateFunction" => {
                self.expect('(', start)?;
                self.skip_ws();
                let func_start = self.pos;
                let mut depth = 0usize;
                while let Some(c) = self.peek() {
                    match c {
                        '(' => depth += 1,
                        ')' if depth > 0 => depth -= 1,
                        ',' if depth == 0 => break,
                        ')' => break,
                        _ => {}
                    }
                    self.pos += c.len_utf8();
                }
                let func = self.input[func_start..self.pos].trim().to_string();
                if func.is_empty() {
                    return self.fail(start, "expected an aggregate function name");
                }
                self.expect(',', start)?;
                let inner = self.parse_type()?;
                self.expect(')', start)?;
                Ok(ColumnType::SimpleAggregateFunction(func, Box::new(inner)))
            }
            "JSON" | "Object" | "AggregateFunction" | "Time" | "Time64" => {
                self.fail(start, &format!("type {} is not supported", name))
            }
            _ => self.fail(start, "unknown type"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(s: &str) {
        let ty = ColumnType::parse(s).unwrap();
        assert_eq!(ty.to_string(), s);
        assert_eq!(ColumnType::parse(&ty.to_string()).unwrap(), ty);
    }

    #[test]
    fn test_display_round_trips() {
        for s in [
            "UInt8",
            "Int256",
            "BFloat16",
            "FixedString(16)",
            "DateTime('Europe/Berlin')",
            "DateTime64(3)",
            "DateTime64(9, 'UTC')",
            "Decimal(18, 4)",
            "Enum8('a' = 1, 'it\\'s' = -2)",
            "Array(Nullable(String))",
            "Map(String, Array(UInt64))",
            "Tuple(UInt8, String)",
            "Tuple(id UInt64, name LowCardinality(String))",
            "LowCardinality(Nullable(String))",
            "Variant(String, UInt64)",
            "Dynamic",
            "Dynamic(max_types=2)",
            "Nested(a UInt8, b String)",
            "SimpleAggregateFunction(sum, UInt64)",
            "IntervalSecond",
            "MultiPolygon",
        ] {
            round_trip(s);
        }
    }

    #[test]
    fn test_aliases() {
        assert_eq!(ColumnType::parse("Boolean").unwrap(), ColumnType::Bool);
        assert_eq!(
            ColumnType::parse("Decimal32(2)").unwrap(),
            ColumnType::Decimal {
                precision: 9,
                scale: 2
            }
        );
        assert_eq!(
            ColumnType::parse("Point").unwrap().storage().to_string(),
            "Tuple(Float64, Float64)"
        );
        assert_eq!(
            ColumnType::parse("Polygon").unwrap().storage().to_string(),
            "Array(Array(Tuple(Float64, Float64)))"
        );
        assert_eq!(
            ColumnType::parse("Nested(a UInt8)").unwrap().storage().to_string(),
            "Array(Tuple(a UInt8))"
        );
        assert_eq!(
            ColumnType::parse("IntervalDay").unwrap().storage(),
            ColumnType::Int64
        );
    }

    #[test]
    fn test_variant_sorted() {
        let ty = ColumnType::parse("Variant(UInt64, String, Array(UInt8))").unwrap();
        assert_eq!(ty.to_string(), "Variant(Array(UInt8), String, UInt64)");
    }

    #[test]
    fn test_whitespace_tolerated() {
        let ty = ColumnType::parse(" Map( String ,  Nullable( Int32 ) ) ").unwrap();
        assert_eq!(ty.to_string(), "Map(String, Nullable(Int32))");
    }

    #[test]
    fn test_malformed_names_fragment() {
        match ColumnType::parse("Array(Strng)") {
            Err(ChError::TypeParse { fragment, reason }) => {
                assert_eq!(fragment, "Strng");
                assert_eq!(reason, "unknown type");
            }
            other => panic!("unexpected {:?}", other),
        }

        match ColumnType::parse("Array(") {
            Err(ChError::TypeParse { reason, .. }) => {
                assert_eq!(reason, "unexpected end of input")
            }
            other => panic!("unexpected {:?}", other),
        }

        assert!(ColumnType::parse("UInt8(3)").is_err());
        assert!(ColumnType::parse("FixedString(0)").is_err());
        assert!(ColumnType::parse("Decimal(10, 11)").is_err());
        assert!(ColumnType::parse("Enum8('a' = 300)").is_err());
        assert!(ColumnType::parse("String String").is_err());
        assert!(ColumnType::parse("JSON").is_err());
    }
}
