//! Argument materialization: turns the flat (type token, string literal)
//! rows of a configuration into typed call arguments.
//!
//! Type tokens use the Java spelling the original test plans carry
//! (`int`, `java.lang.String`, `java.util.List`, `int[]`, ...). Encoding is
//! pure and deterministic so recorded invocations replay identically.

use serde_json::Value;

use crate::config::MethodArgument;
use crate::error::CodecError;

/// An argument value ready to hand to a transport. Opaque to the dispatcher.
pub type ArgValue = Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TypeKind {
    Bool,
    Int,
    Float,
    Str,
    List,
    Map,
}

fn kind_of(token: &str) -> Option<TypeKind> {
    if token.len() > 2 && token.ends_with("[]") {
        return Some(TypeKind::List);
    }
    match token {
        "boolean" | "java.lang.Boolean" => Some(TypeKind::Bool),
        "byte" | "short" | "int" | "long" | "java.lang.Byte" | "java.lang.Short"
        | "java.lang.Integer" | "java.lang.Long" => Some(TypeKind::Int),
        "float" | "double" | "java.lang.Float" | "java.lang.Double" => Some(TypeKind::Float),
        "String" | "java.lang.String" => Some(TypeKind::Str),
        "java.util.List" | "java.util.ArrayList" => Some(TypeKind::List),
        "java.util.Map" | "java.util.HashMap" => Some(TypeKind::Map),
        _ => None,
    }
}

/// Whether `token` names a type this codec can materialize.
pub fn is_known_type(token: &str) -> bool {
    kind_of(token.trim()).is_some()
}

/// Materializes every (type, literal) row, in order. Fails before any network
/// attempt; a failure here is never retried.
pub fn encode(args: &[MethodArgument]) -> Result<Vec<ArgValue>, CodecError> {
    args.iter()
        .map(|arg| encode_one(&arg.param_type, &arg.param_value))
        .collect()
}

pub fn encode_one(token: &str, literal: &str) -> Result<ArgValue, CodecError> {
    let token = token.trim();
    let kind = kind_of(token).ok_or_else(|| CodecError::UnknownType(token.to_owned()))?;
    let parse_failure = || CodecError::ParseFailure {
        type_token: token.to_owned(),
        literal: literal.to_owned(),
    };

    match kind {
        TypeKind::Bool => literal
            .trim()
            .parse::<bool>()
            .map(Value::Bool)
            .map_err(|_| parse_failure()),
        TypeKind::Int => literal
            .trim()
            .parse::<i64>()
            .map(Value::from)
            .map_err(|_| parse_failure()),
        TypeKind::Float => literal
            .trim()
            .parse::<f64>()
            .map(Value::from)
            .map_err(|_| parse_failure()),
        TypeKind::Str => Ok(Value::String(literal.to_owned())),
        TypeKind::List => match serde_json::from_str::<Value>(literal) {
            Ok(v) if v.is_array() => Ok(v),
            _ => Err(parse_failure()),
        },
        TypeKind::Map => match serde_json::from_str::<Value>(literal) {
            Ok(v) if v.is_object() => Ok(v),
            _ => Err(parse_failure()),
        },
    }
}

/// Renders a materialized value back to its literal form, the inverse of
/// [`encode_one`] for every supported type.
pub fn decode(token: &str, value: &ArgValue) -> Result<String, CodecError> {
    let token = token.trim();
    let kind = kind_of(token).ok_or_else(|| CodecError::UnknownType(token.to_owned()))?;
    let mismatch = || CodecError::ParseFailure {
        type_token: token.to_owned(),
        literal: value.to_string(),
    };

    match kind {
        TypeKind::Bool if value.is_boolean() => Ok(value.to_string()),
        TypeKind::Int if value.is_i64() => Ok(value.to_string()),
        TypeKind::Float if value.is_number() => Ok(value.to_string()),
        TypeKind::Str => value.as_str().map(str::to_owned).ok_or_else(mismatch),
        TypeKind::List if value.is_array() => Ok(value.to_string()),
        TypeKind::Map if value.is_object() => Ok(value.to_string()),
        _ => Err(mismatch()),
    }
}
