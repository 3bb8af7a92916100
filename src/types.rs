//! Column type descriptors and the `T(args)` grammar parser.
//!
//! The server names column types as text (`Array(Nullable(String))`,
//! `Enum8('a' = 1)`, `DateTime64(3, 'UTC')`); this module parses those
//! descriptors into a closed [`TypeDesc`] enum that drives codec
//! dispatch. Geo aliases are expanded to their wire-equivalent
//! structural types during parsing.

use nom::{
    character::complete::{char, digit1, multispace0},
    combinator::opt,
    error::{Error as NomError, ErrorKind},
    IResult,
};

use crate::error::{Error, Result};

/// A parsed column type descriptor.
#[derive(Debug, Clone, PartialEq)]
pub enum TypeDesc {
    Bool,
    Int8,
    Int16,
    Int32,
    Int64,
    Int128,
    Int256,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    UInt128,
    UInt256,
    Float32,
    Float64,
    String,
    FixedString(usize),
    Date,
    Date32,
    /// Optional timezone name from the type parameter.
    DateTime(Option<std::string::String>),
    /// Tick scale (0..=9) and optional timezone name.
    DateTime64(u8, Option<std::string::String>),
    Decimal {
        precision: u8,
        scale: u8,
    },
    Uuid,
    Ipv4,
    Ipv6,
    Enum8(Vec<(std::string::String, i8)>),
    Enum16(Vec<(std::string::String, i16)>),
    Array(Box<TypeDesc>),
    Tuple(Vec<TypeDesc>),
    Nullable(Box<TypeDesc>),
    Map(Box<TypeDesc>, Box<TypeDesc>),
    LowCardinality(Box<TypeDesc>),
    /// Structure-of-arrays; wire-equivalent to `Array(Tuple(...))`.
    Nested(Vec<(std::string::String, TypeDesc)>),
    /// The aggregate function name is kept for display only; on the wire
    /// the column is identical to its inner type.
    SimpleAggregateFunction(std::string::String, Box<TypeDesc>),
    Json,
    Nothing,
}

impl TypeDesc {
    /// Parse a full type descriptor; the whole input must be consumed.
    pub fn parse(spec: &str) -> Result<TypeDesc> {
        match parse_type(spec) {
            Ok((rest, ty)) if rest.trim().is_empty() => Ok(ty),
            _ => Err(Error::UnknownType(spec.to_owned())),
        }
    }

    /// Width chosen by precision for the Decimal backing integer, in bytes.
    pub fn decimal_width(precision: u8) -> usize {
        match precision {
            0..=9 => 4,
            10..=18 => 8,
            19..=38 => 16,
            _ => 32,
        }
    }
}

fn fail(input: &str) -> nom::Err<NomError<&str>> {
    nom::Err::Error(NomError::new(input, ErrorKind::Tag))
}

/// Parse an identifier (type or field name).
fn identifier(input: &str) -> IResult<&str, &str> {
    let end = input
        .char_indices()
        .find(|(_, c)| !c.is_alphanumeric() && *c != '_')
        .map(|(i, _)| i)
        .unwrap_or(input.len());
    if end == 0 {
        return Err(fail(input));
    }
    Ok((&input[end..], &input[..end]))
}

/// Parse an unsigned decimal integer argument.
fn integer(input: &str) -> IResult<&str, u64> {
    let (input, _) = multispace0(input)?;
    let (rest, digits) = digit1(input)?;
    let value = digits.parse().map_err(|_| fail(input))?;
    Ok((rest, value))
}

/// Parse a signed decimal integer argument (Enum values).
fn signed_integer(input: &str) -> IResult<&str, i64> {
    let (input, _) = multispace0(input)?;
    let (input, sign) = opt(char('-'))(input)?;
    let (rest, digits) = digit1(input)?;
    let value: i64 = digits.parse().map_err(|_| fail(input))?;
    Ok((rest, if sign.is_some() { -value } else { value }))
}

/// Parse a single-quoted string with `\'`, `\\` and doubled-quote escapes.
fn quoted(input: &str) -> IResult<&str, String> {
    let (input, _) = multispace0(input)?;
    let (input, _) = char('\'')(input)?;
    let mut out = String::new();
    let mut chars = input.char_indices();
    while let Some((i, c)) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some((_, esc)) => out.push(esc),
                None => return Err(fail(input)),
            },
            '\'' => {
                let rest = &input[i + 1..];
                // Doubled quote is an escaped quote.
                if rest.starts_with('\'') {
                    out.push('\'');
                    chars.next();
                } else {
                    return Ok((rest, out));
                }
            }
            _ => out.push(c),
        }
    }
    Err(fail(input))
}

fn open_paren(input: &str) -> IResult<&str, ()> {
    let (input, _) = multispace0(input)?;
    let (input, _) = char('(')(input)?;
    Ok((input, ()))
}

fn close_paren(input: &str) -> IResult<&str, ()> {
    let (input, _) = multispace0(input)?;
    let (input, _) = char(')')(input)?;
    Ok((input, ()))
}

fn comma(input: &str) -> IResult<&str, ()> {
    let (input, _) = multispace0(input)?;
    let (input, _) = char(',')(input)?;
    Ok((input, ()))
}

/// Parse one element of a Tuple: either a bare type or `name Type`.
fn tuple_element(input: &str) -> IResult<&str, TypeDesc> {
    if let Ok(res) = parse_type(input) {
        return Ok(res);
    }
    // Named tuple element: skip the name, keep the type.
    let (input, _) = multispace0(input)?;
    let (input, _) = identifier(input)?;
    parse_type(input)
}

/// Parse one Nested field: `name Type`.
fn nested_field(input: &str) -> IResult<&str, (String, TypeDesc)> {
    let (input, _) = multispace0(input)?;
    let (input, name) = identifier(input)?;
    let (input, ty) = parse_type(input)?;
    Ok((input, (name.to_owned(), ty)))
}

fn separated<'a, T>(
    mut item: impl FnMut(&'a str) -> IResult<&'a str, T>,
    input: &'a str,
) -> IResult<&'a str, Vec<T>> {
    let (mut input, first) = item(input)?;
    let mut out = vec![first];
    while let Ok((rest, ())) = comma(input) {
        let (rest, next) = item(rest)?;
        out.push(next);
        input = rest;
    }
    Ok((input, out))
}

/// Recursive descent over the `T(args)` grammar.
pub fn parse_type(input: &str) -> IResult<&str, TypeDesc> {
    let (input, _) = multispace0(input)?;
    let (input, name) = identifier(input)?;
    match name {
        "Bool" => Ok((input, TypeDesc::Bool)),
        "Int8" => Ok((input, TypeDesc::Int8)),
        "Int16" => Ok((input, TypeDesc::Int16)),
        "Int32" => Ok((input, TypeDesc::Int32)),
        "Int64" => Ok((input, TypeDesc::Int64)),
        "Int128" => Ok((input, TypeDesc::Int128)),
        "Int256" => Ok((input, TypeDesc::Int256)),
        "UInt8" => Ok((input, TypeDesc::UInt8)),
        "UInt16" => Ok((input, TypeDesc::UInt16)),
        "UInt32" => Ok((input, TypeDesc::UInt32)),
        "UInt64" => Ok((input, TypeDesc::UInt64)),
        "UInt128" => Ok((input, TypeDesc::UInt128)),
        "UInt256" => Ok((input, TypeDesc::UInt256)),
        "Float32" => Ok((input, TypeDesc::Float32)),
        "Float64" => Ok((input, TypeDesc::Float64)),
        "String" => Ok((input, TypeDesc::String)),
        "Date" => Ok((input, TypeDesc::Date)),
        "Date32" => Ok((input, TypeDesc::Date32)),
        "UUID" => Ok((input, TypeDesc::Uuid)),
        "IPv4" => Ok((input, TypeDesc::Ipv4)),
        "IPv6" => Ok((input, TypeDesc::Ipv6)),
        "JSON" => Ok((input, TypeDesc::Json)),
        "Nothing" => Ok((input, TypeDesc::Nothing)),
        // Geo aliases expand to their structural wire types.
        "Point" => Ok((input, geo_point())),
        "Ring" => Ok((input, TypeDesc::Array(Box::new(geo_point())))),
        "Polygon" => Ok((input, geo_polygon())),
        "MultiPolygon" => Ok((input, TypeDesc::Array(Box::new(geo_polygon())))),
        "FixedString" => {
            let (input, ()) = open_paren(input)?;
            let (input, n) = integer(input)?;
            let (input, ()) = close_paren(input)?;
            Ok((input, TypeDesc::FixedString(n as usize)))
        }
        "DateTime" => {
            if let Ok((input, ())) = open_paren(input) {
                let (input, tz) = quoted(input)?;
                let (input, ()) = close_paren(input)?;
                Ok((input, TypeDesc::DateTime(Some(tz))))
            } else {
                Ok((input, TypeDesc::DateTime(None)))
            }
        }
        "DateTime64" => {
            let (input, ()) = open_paren(input)?;
            let (input, scale) = integer(input)?;
            let (input, tz) = match comma(input) {
                Ok((rest, ())) => {
                    let (rest, tz) = quoted(rest)?;
                    (rest, Some(tz))
                }
                Err(_) => (input, None),
            };
            let (input, ()) = close_paren(input)?;
            Ok((input, TypeDesc::DateTime64(scale as u8, tz)))
        }
        "Decimal" => {
            let (input, ()) = open_paren(input)?;
            let (input, precision) = integer(input)?;
            let (input, ()) = comma(input)?;
            let (input, scale) = integer(input)?;
            let (input, ()) = close_paren(input)?;
            Ok((
                input,
                TypeDesc::Decimal {
                    precision: precision as u8,
                    scale: scale as u8,
                },
            ))
        }
        "Decimal32" | "Decimal64" | "Decimal128" | "Decimal256" => {
            let precision = match name {
                "Decimal32" => 9,
                "Decimal64" => 18,
                "Decimal128" => 38,
                _ => 76,
            };
            let (input, ()) = open_paren(input)?;
            let (input, scale) = integer(input)?;
            let (input, ()) = close_paren(input)?;
            Ok((
                input,
                TypeDesc::Decimal {
                    precision,
                    scale: scale as u8,
                },
            ))
        }
        "Enum8" | "Enum16" => {
            let (input, ()) = open_paren(input)?;
            let (input, pairs) = separated(
                |i| {
                    let (i, label) = quoted(i)?;
                    let (i, _) = multispace0(i)?;
                    let (i, _) = char('=')(i)?;
                    let (i, value) = signed_integer(i)?;
                    Ok((i, (label, value)))
                },
                input,
            )?;
            let (input, ()) = close_paren(input)?;
            if name == "Enum8" {
                let pairs = pairs.into_iter().map(|(l, v)| (l, v as i8)).collect();
                Ok((input, TypeDesc::Enum8(pairs)))
            } else {
                let pairs = pairs.into_iter().map(|(l, v)| (l, v as i16)).collect();
                Ok((input, TypeDesc::Enum16(pairs)))
            }
        }
        "Array" => {
            let (input, ()) = open_paren(input)?;
            let (input, inner) = parse_type(input)?;
            let (input, ()) = close_paren(input)?;
            Ok((input, TypeDesc::Array(Box::new(inner))))
        }
        "Nullable" => {
            let (input, ()) = open_paren(input)?;
            let (input, inner) = parse_type(input)?;
            let (input, ()) = close_paren(input)?;
            Ok((input, TypeDesc::Nullable(Box::new(inner))))
        }
        "LowCardinality" => {
            let (input, ()) = open_paren(input)?;
            let (input, inner) = parse_type(input)?;
            let (input, ()) = close_paren(input)?;
            Ok((input, TypeDesc::LowCardinality(Box::new(inner))))
        }
        "Map" => {
            let (input, ()) = open_paren(input)?;
            let (input, key) = parse_type(input)?;
            let (input, ()) = comma(input)?;
            let (input, value) = parse_type(input)?;
            let (input, ()) = close_paren(input)?;
            Ok((input, TypeDesc::Map(Box::new(key), Box::new(value))))
        }
        "Tuple" => {
            let (input, ()) = open_paren(input)?;
            let (input, elements) = separated(tuple_element, input)?;
            let (input, ()) = close_paren(input)?;
            Ok((input, TypeDesc::Tuple(elements)))
        }
        "Nested" => {
            let (input, ()) = open_paren(input)?;
            let (input, fields) = separated(nested_field, input)?;
            let (input, ()) = close_paren(input)?;
            Ok((input, TypeDesc::Nested(fields)))
        }
        "SimpleAggregateFunction" => {
            let (input, ()) = open_paren(input)?;
            let (input, _) = multispace0(input)?;
            let (input, func) = identifier(input)?;
            let (input, ()) = comma(input)?;
            let (input, inner) = parse_type(input)?;
            let (input, ()) = close_paren(input)?;
            Ok((
                input,
                TypeDesc::SimpleAggregateFunction(func.to_owned(), Box::new(inner)),
            ))
        }
        "Object" => {
            let (input, ()) = open_paren(input)?;
            let (input, kind) = quoted(input)?;
            let (input, ()) = close_paren(input)?;
            if kind.eq_ignore_ascii_case("json") {
                Ok((input, TypeDesc::Json))
            } else {
                Err(fail(input))
            }
        }
        _ => Err(fail(input)),
    }
}

fn geo_point() -> TypeDesc {
    TypeDesc::Tuple(vec![TypeDesc::Float64, TypeDesc::Float64])
}

fn geo_polygon() -> TypeDesc {
    TypeDesc::Array(Box::new(TypeDesc::Array(Box::new(geo_point()))))
}
