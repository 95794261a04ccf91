//! Codec boundary: decoded field maps and array sets.
//!
//! Raw bytes are turned into one of two shapes by an external codec. A
//! [`FieldMap`] is a flat key→value mapping (BUFR style, per-level keys are
//! written `#<level>#<name>`). An [`ArraySet`] holds named multi-dimensional
//! arrays indexed by station record (netCDF style).
//!
//! Each codec reports its own "missing" sentinels. Accessors on both types
//! return `Option` so nothing downstream compares against sentinel constants.

use std::collections::HashMap;
use std::io::Read;

use flate2::read::GzDecoder;
use serde_json::Value;

use crate::error::{IngestionError, Result};

/// Missing-value sentinels declared by a field codec.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sentinels {
    pub missing_int: i64,
    pub missing_float: f64,
}

impl Sentinels {
    /// ecCodes conventions (`CODES_MISSING_LONG`, `CODES_MISSING_DOUBLE`).
    pub const ECCODES: Sentinels = Sentinels {
        missing_int: 2_147_483_647,
        missing_float: -1e100,
    };
}

impl Default for Sentinels {
    fn default() -> Self {
        Self::ECCODES
    }
}

/// A single decoded value.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Int(i64),
    Float(f64),
    Text(String),
}

/// Flat key→value map produced by a field codec.
#[derive(Debug, Clone, Default)]
pub struct FieldMap {
    values: HashMap<String, FieldValue>,
    sentinels: Sentinels,
}

impl FieldMap {
    pub fn new(sentinels: Sentinels) -> Self {
        Self {
            values: HashMap::new(),
            sentinels,
        }
    }

    /// Key of a per-level field.
    pub fn level_key(level: usize, name: &str) -> String {
        format!("#{level}#{name}")
    }

    pub fn insert(&mut self, key: impl Into<String>, value: FieldValue) {
        self.values.insert(key.into(), value);
    }

    /// Builder-style insert, mostly for tests and codecs.
    pub fn with(mut self, key: impl Into<String>, value: FieldValue) -> Self {
        self.insert(key, value);
        self
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Integer value, `None` if absent, sentinel or non-integral.
    pub fn get_int(&self, key: &str) -> Option<i64> {
        match self.values.get(key)? {
            FieldValue::Int(v) if *v != self.sentinels.missing_int => Some(*v),
            FieldValue::Float(v)
                if v.is_finite() && *v != self.sentinels.missing_float && v.fract() == 0.0 =>
            {
                Some(*v as i64)
            }
            _ => None,
        }
    }

    /// Floating-point value, `None` if absent, sentinel or non-finite.
    pub fn get_float(&self, key: &str) -> Option<f64> {
        match self.values.get(key)? {
            FieldValue::Float(v) if v.is_finite() && *v != self.sentinels.missing_float => {
                Some(*v)
            }
            FieldValue::Int(v) if *v != self.sentinels.missing_int => Some(*v as f64),
            _ => None,
        }
    }

    /// Text value, trimmed; `None` if absent or blank.
    pub fn get_text(&self, key: &str) -> Option<String> {
        match self.values.get(key)? {
            FieldValue::Text(s) => {
                let trimmed = s.trim();
                (!trimmed.is_empty()).then(|| trimmed.to_string())
            }
            FieldValue::Int(v) if *v != self.sentinels.missing_int => Some(v.to_string()),
            _ => None,
        }
    }
}

/// One named array in row-major order.
#[derive(Debug, Clone, PartialEq)]
pub struct Array {
    pub shape: Vec<usize>,
    pub data: Vec<f64>,
}

impl Array {
    pub fn new(shape: Vec<usize>, data: Vec<f64>) -> Self {
        Self { shape, data }
    }

    /// A one-dimensional array.
    pub fn vector(data: Vec<f64>) -> Self {
        Self {
            shape: vec![data.len()],
            data,
        }
    }

    /// A two-dimensional array built from equal-length rows.
    pub fn matrix(rows: Vec<Vec<f64>>) -> Self {
        let cols = rows.first().map(Vec::len).unwrap_or(0);
        let shape = vec![rows.len(), cols];
        Self {
            shape,
            data: rows.into_iter().flatten().collect(),
        }
    }

    fn offset(&self, index: &[usize]) -> Option<usize> {
        if index.len() != self.shape.len() {
            return None;
        }
        let mut offset = 0;
        for (i, dim) in index.iter().zip(&self.shape) {
            if i >= dim {
                return None;
            }
            offset = offset * dim + i;
        }
        Some(offset)
    }
}

/// Named arrays produced by an array codec.
#[derive(Debug, Clone)]
pub struct ArraySet {
    variables: HashMap<String, Array>,
    fill_value: f64,
}

impl Default for ArraySet {
    fn default() -> Self {
        Self::new(f64::NAN)
    }
}

impl ArraySet {
    pub fn new(fill_value: f64) -> Self {
        Self {
            variables: HashMap::new(),
            fill_value,
        }
    }

    pub fn insert(&mut self, name: impl Into<String>, array: Array) {
        self.variables.insert(name.into(), array);
    }

    pub fn with(mut self, name: impl Into<String>, array: Array) -> Self {
        self.insert(name, array);
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.variables.contains_key(name)
    }

    /// Length of a variable's first dimension.
    pub fn records(&self, name: &str) -> Option<usize> {
        self.variables.get(name)?.shape.first().copied()
    }

    /// Length of a variable's second dimension.
    pub fn levels(&self, name: &str) -> Option<usize> {
        self.variables.get(name)?.shape.get(1).copied()
    }

    /// Value at `index`, `None` for absent, out-of-range, fill or NaN.
    pub fn value(&self, name: &str, index: &[usize]) -> Option<f64> {
        let array = self.variables.get(name)?;
        let v = *array.data.get(array.offset(index)?)?;
        (v.is_finite() && v != self.fill_value).then_some(v)
    }
}

/// Codec producing a flat field map (BUFR-like formats).
pub trait FieldCodec: Send + Sync {
    fn decode(&self, raw: &[u8]) -> Result<FieldMap>;
}

/// Codec producing named arrays (netCDF-like formats).
pub trait ArrayCodec: Send + Sync {
    fn decode(&self, raw: &[u8]) -> Result<ArraySet>;
}

/// Gunzip if the payload starts with the gzip magic.
fn maybe_gunzip(raw: &[u8]) -> Result<Vec<u8>> {
    if raw.starts_with(&[0x1f, 0x8b]) {
        let mut out = Vec::new();
        GzDecoder::new(raw)
            .read_to_end(&mut out)
            .map_err(|e| IngestionError::UnreadableSource(format!("gzip: {e}")))?;
        Ok(out)
    } else {
        Ok(raw.to_vec())
    }
}

/// Reads a flat JSON object written by an external BUFR dumper.
///
/// Integers become [`FieldValue::Int`], other numbers [`FieldValue::Float`],
/// strings [`FieldValue::Text`]; `null` entries are dropped. Arrays keep
/// their first element (replication factors are reported as arrays).
#[derive(Debug, Clone, Default)]
pub struct JsonFieldCodec {
    pub sentinels: Sentinels,
}

impl JsonFieldCodec {
    fn to_field(value: &Value) -> Option<FieldValue> {
        match value {
            Value::Number(n) => match n.as_i64() {
                Some(i) => Some(FieldValue::Int(i)),
                None => n.as_f64().map(FieldValue::Float),
            },
            Value::String(s) => Some(FieldValue::Text(s.clone())),
            Value::Array(items) => items.first().and_then(Self::to_field),
            _ => None,
        }
    }
}

impl FieldCodec for JsonFieldCodec {
    fn decode(&self, raw: &[u8]) -> Result<FieldMap> {
        let raw = maybe_gunzip(raw)?;
        let value: Value = serde_json::from_slice(&raw)
            .map_err(|e| IngestionError::UnreadableSource(format!("field map: {e}")))?;
        let Value::Object(object) = value else {
            return Err(IngestionError::UnreadableSource(
                "field map is not a JSON object".to_string(),
            ));
        };

        let mut fields = FieldMap::new(self.sentinels);
        for (key, value) in &object {
            if let Some(field) = Self::to_field(value) {
                fields.insert(key.clone(), field);
            }
        }
        Ok(fields)
    }
}

/// Reads a JSON document of nested arrays written by an external netCDF dumper.
///
/// Expected layout: `{"fill_value": 99999.0, "variables": {"prMan": [[...], ...]}}`.
/// `null` elements map to NaN and therefore read back as missing.
#[derive(Debug, Clone, Default)]
pub struct JsonArrayCodec;

impl JsonArrayCodec {
    fn flatten(value: &Value, depth: usize, shape: &mut Vec<usize>, data: &mut Vec<f64>) -> Result<()> {
        match value {
            Value::Array(items) => {
                if shape.len() == depth {
                    shape.push(items.len());
                } else if shape[depth] != items.len() {
                    return Err(IngestionError::UnreadableSource(
                        "ragged array".to_string(),
                    ));
                }
                for item in items {
                    Self::flatten(item, depth + 1, shape, data)?;
                }
                Ok(())
            }
            Value::Number(n) => {
                data.push(n.as_f64().unwrap_or(f64::NAN));
                Ok(())
            }
            Value::Null => {
                data.push(f64::NAN);
                Ok(())
            }
            other => Err(IngestionError::UnreadableSource(format!(
                "unexpected array element {other}"
            ))),
        }
    }
}

impl ArrayCodec for JsonArrayCodec {
    fn decode(&self, raw: &[u8]) -> Result<ArraySet> {
        let raw = maybe_gunzip(raw)?;
        let value: Value = serde_json::from_slice(&raw)
            .map_err(|e| IngestionError::UnreadableSource(format!("array set: {e}")))?;

        let fill_value = value
            .get("fill_value")
            .and_then(Value::as_f64)
            .unwrap_or(f64::NAN);
        let Some(Value::Object(variables)) = value.get("variables") else {
            return Err(IngestionError::UnreadableSource(
                "array set has no variables".to_string(),
            ));
        };

        let mut set = ArraySet::new(fill_value);
        for (name, value) in variables {
            let mut shape = Vec::new();
            let mut data = Vec::new();
            Self::flatten(value, 0, &mut shape, &mut data)?;
            if shape.is_empty() {
                shape.push(data.len());
            }
            set.insert(name.clone(), Array::new(shape, data));
        }
        Ok(set)
    }
}
