// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Opaque Header Maps
//!
//! `Headers` is the key-value map carried unchanged through publish and consume, and
//! the same shape is used for free-form declaration arguments (`Arguments`). Values are
//! never inspected by this crate; they are only translated to and from AMQP field tables.
//!
//! `Headers` also implements the OpenTelemetry `Injector` and `Extractor` traits, so an
//! external tracer can propagate its context through the map.

use lapin::types::{AMQPValue, ByteArray, FieldArray, FieldTable, LongString, ShortString};
use opentelemetry::{
    global,
    propagation::{Extractor, Injector},
    Context,
};
use serde::Deserialize;
use std::collections::{btree_map, BTreeMap};
use tracing::error;

/// A single header or argument value.
///
/// Values read from the broker map onto the widest variant of their family, so an
/// incoming field does not keep its exact AMQP type:
/// - every integer width becomes `Int` and is sent back as a signed 64-bit integer
/// - `Float` and decimal values become `Float`, sent back as a double
/// - short strings become `String`, sent back as a long string
/// - long strings that are not valid UTF-8 become `Bytes`, sent back as a byte array
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(from = "serde_json::Value")]
pub enum HeaderValue {
    Void,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Bytes(Vec<u8>),
    Timestamp(u64),
    Array(Vec<HeaderValue>),
    Table(Headers),
}

/// Opaque string-keyed map passed through publish and consume.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(transparent)]
pub struct Headers(BTreeMap<String, HeaderValue>);

/// Declaration arguments share the header representation.
pub type Arguments = Headers;

impl Headers {
    pub fn new() -> Self {
        Headers::default()
    }

    /// Inserts a value, returning `self` for chaining.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<HeaderValue>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<HeaderValue>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&HeaderValue> {
        self.0.get(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<HeaderValue> {
        self.0.remove(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, HeaderValue> {
        self.0.iter()
    }

    /// Copies every entry of `other` into this map, overriding existing keys.
    pub fn extend(&mut self, other: &Headers) {
        for (key, value) in other.iter() {
            self.0.insert(key.clone(), value.clone());
        }
    }

    /// Injects `ctx` through the globally registered text map propagator.
    pub fn inject_context(&mut self, ctx: &Context) {
        global::get_text_map_propagator(|propagator| propagator.inject_context(ctx, &mut *self));
    }

    /// Extracts a context through the globally registered text map propagator.
    pub fn extract_context(&self) -> Context {
        global::get_text_map_propagator(|propagator| propagator.extract(self))
    }
}

impl Injector for Headers {
    fn set(&mut self, key: &str, value: String) {
        self.0
            .insert(key.to_lowercase(), HeaderValue::String(value));
    }
}

impl Extractor for Headers {
    fn get(&self, key: &str) -> Option<&str> {
        match self.0.get(key) {
            Some(HeaderValue::String(value)) => Some(value.as_str()),
            Some(HeaderValue::Bytes(value)) => std::str::from_utf8(value)
                .map_err(|e| error!("Error decoding header value {:?}", e))
                .ok(),
            _ => None,
        }
    }

    fn keys(&self) -> Vec<&str> {
        self.0.keys().map(|key| key.as_str()).collect()
    }
}

impl From<&str> for HeaderValue {
    fn from(value: &str) -> Self {
        HeaderValue::String(value.to_owned())
    }
}

impl From<String> for HeaderValue {
    fn from(value: String) -> Self {
        HeaderValue::String(value)
    }
}

impl From<bool> for HeaderValue {
    fn from(value: bool) -> Self {
        HeaderValue::Bool(value)
    }
}

impl From<i32> for HeaderValue {
    fn from(value: i32) -> Self {
        HeaderValue::Int(value.into())
    }
}

impl From<i64> for HeaderValue {
    fn from(value: i64) -> Self {
        HeaderValue::Int(value)
    }
}

impl From<u32> for HeaderValue {
    fn from(value: u32) -> Self {
        HeaderValue::Int(value.into())
    }
}

impl From<f64> for HeaderValue {
    fn from(value: f64) -> Self {
        HeaderValue::Float(value)
    }
}

impl From<Vec<u8>> for HeaderValue {
    fn from(value: Vec<u8>) -> Self {
        HeaderValue::Bytes(value)
    }
}

impl From<Headers> for HeaderValue {
    fn from(value: Headers) -> Self {
        HeaderValue::Table(value)
    }
}

impl From<serde_json::Value> for HeaderValue {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => HeaderValue::Void,
            serde_json::Value::Bool(b) => HeaderValue::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    HeaderValue::Int(i)
                } else {
                    HeaderValue::Float(n.as_f64().unwrap_or_default())
                }
            }
            serde_json::Value::String(s) => HeaderValue::String(s),
            serde_json::Value::Array(items) => {
                HeaderValue::Array(items.into_iter().map(HeaderValue::from).collect())
            }
            serde_json::Value::Object(map) => HeaderValue::Table(Headers(
                map.into_iter()
                    .map(|(k, v)| (k, HeaderValue::from(v)))
                    .collect(),
            )),
        }
    }
}

impl From<&HeaderValue> for AMQPValue {
    fn from(value: &HeaderValue) -> Self {
        match value {
            HeaderValue::Void => AMQPValue::Void,
            HeaderValue::Bool(b) => AMQPValue::Boolean(*b),
            HeaderValue::Int(i) => AMQPValue::LongLongInt(*i),
            HeaderValue::Float(f) => AMQPValue::Double(*f),
            HeaderValue::String(s) => AMQPValue::LongString(LongString::from(s.clone())),
            HeaderValue::Bytes(b) => AMQPValue::ByteArray(ByteArray::from(b.clone())),
            HeaderValue::Timestamp(t) => AMQPValue::Timestamp(*t),
            HeaderValue::Array(items) => AMQPValue::FieldArray(FieldArray::from(
                items.iter().map(AMQPValue::from).collect::<Vec<_>>(),
            )),
            HeaderValue::Table(table) => AMQPValue::FieldTable(FieldTable::from(table)),
        }
    }
}

impl From<&AMQPValue> for HeaderValue {
    fn from(value: &AMQPValue) -> Self {
        #[allow(unreachable_patterns)]
        match value {
            AMQPValue::Boolean(b) => HeaderValue::Bool(*b),
            AMQPValue::ShortShortInt(v) => HeaderValue::Int((*v).into()),
            AMQPValue::ShortShortUInt(v) => HeaderValue::Int((*v).into()),
            AMQPValue::ShortInt(v) => HeaderValue::Int((*v).into()),
            AMQPValue::ShortUInt(v) => HeaderValue::Int((*v).into()),
            AMQPValue::LongInt(v) => HeaderValue::Int((*v).into()),
            AMQPValue::LongUInt(v) => HeaderValue::Int((*v).into()),
            AMQPValue::LongLongInt(v) => HeaderValue::Int(*v),
            AMQPValue::Float(v) => HeaderValue::Float((*v).into()),
            AMQPValue::Double(v) => HeaderValue::Float(*v),
            AMQPValue::DecimalValue(d) => {
                HeaderValue::Float(f64::from(d.value) / 10f64.powi(i32::from(d.scale)))
            }
            AMQPValue::ShortString(s) => HeaderValue::String(s.as_str().to_owned()),
            AMQPValue::LongString(s) => match std::str::from_utf8(s.as_bytes()) {
                Ok(text) => HeaderValue::String(text.to_owned()),
                Err(_) => HeaderValue::Bytes(s.as_bytes().to_vec()),
            },
            AMQPValue::FieldArray(items) => {
                HeaderValue::Array(items.as_slice().iter().map(HeaderValue::from).collect())
            }
            AMQPValue::Timestamp(t) => HeaderValue::Timestamp(*t),
            AMQPValue::FieldTable(table) => HeaderValue::Table(Headers::from(table)),
            AMQPValue::ByteArray(b) => HeaderValue::Bytes(b.as_slice().to_vec()),
            AMQPValue::Void => HeaderValue::Void,
            _ => HeaderValue::Void,
        }
    }
}

impl From<&Headers> for FieldTable {
    fn from(headers: &Headers) -> Self {
        let btree: BTreeMap<ShortString, AMQPValue> = headers
            .iter()
            .map(|(key, value)| (ShortString::from(key.clone()), AMQPValue::from(value)))
            .collect();

        FieldTable::from(btree)
    }
}

impl From<&FieldTable> for Headers {
    fn from(table: &FieldTable) -> Self {
        Headers(
            table
                .inner()
                .iter()
                .map(|(key, value)| (key.as_str().to_owned(), HeaderValue::from(value)))
                .collect(),
        )
    }
}
