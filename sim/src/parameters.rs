use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use toml::{Table, Value};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum Error {
    #[error("Error deserializing parameters")]
    Deserialize(#[from] toml::de::Error),

    #[error("Parameter toml does not have the right structure (error in '{0}')")]
    BadToml(String),

    #[error("Element '{path}' not found")]
    NotFound { path: String },

    #[error("Cannot cast parameter '{path}' to {dtype}")]
    BadCast { path: String, dtype: &'static str },

    #[error("Parameter '{path}' has {found} elements, expected {expected}")]
    BadLength {
        path: String,
        expected: usize,
        found: usize,
    },

    #[error("Element '{path}' is not a parameter")]
    NotAParameter { path: String },

    #[error("Element '{path}' is not a map")]
    NotAMap { path: String },
}

/// A typed leaf, written in toml as `{ val = ..., type = "..." }`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum ParameterValue {
    #[serde(rename = "bool")]
    Bool { val: bool },
    #[serde(rename = "int")]
    Int { val: i64 },
    #[serde(rename = "float")]
    Float { val: f64 },
    #[serde(rename = "str")]
    String { val: String },
    #[serde(rename = "float[]")]
    FloatArray { val: Vec<f64> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    path: String,
    value: ParameterValue,
}

impl Parameter {
    pub fn path(&self) -> &str {
        &self.path
    }

    fn bad_cast(&self, dtype: &'static str) -> Error {
        Error::BadCast {
            path: self.path.clone(),
            dtype,
        }
    }

    pub fn value_bool(&self) -> Result<bool, Error> {
        match self.value {
            ParameterValue::Bool { val } => Ok(val),
            _ => Err(self.bad_cast("bool")),
        }
    }

    pub fn value_int(&self) -> Result<i64, Error> {
        match self.value {
            ParameterValue::Int { val } => Ok(val),
            _ => Err(self.bad_cast("int")),
        }
    }

    pub fn value_float(&self) -> Result<f64, Error> {
        match self.value {
            ParameterValue::Float { val } => Ok(val),
            _ => Err(self.bad_cast("float")),
        }
    }

    pub fn value_string(&self) -> Result<&str, Error> {
        match &self.value {
            ParameterValue::String { val } => Ok(val),
            _ => Err(self.bad_cast("str")),
        }
    }

    pub fn value_float_arr(&self) -> Result<&[f64], Error> {
        match &self.value {
            ParameterValue::FloatArray { val } => Ok(val),
            _ => Err(self.bad_cast("float[]")),
        }
    }

    /// A `float[]` parameter that must hold exactly `N` elements.
    pub fn value_float_fixed<const N: usize>(&self) -> Result<[f64; N], Error> {
        let arr = self.value_float_arr()?;
        arr.try_into().map_err(|_| Error::BadLength {
            path: self.path.clone(),
            expected: N,
            found: arr.len(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ParameterMap {
    path: String,
    map: BTreeMap<String, ParameterTree>,
}

impl ParameterMap {
    /// Looks up a dot separated path relative to this map.
    pub fn get(&self, rel_path: &str) -> Result<&ParameterTree, Error> {
        let not_found = || Error::NotFound {
            path: append_path(&self.path, rel_path),
        };

        let mut node = self;
        let mut parts = rel_path.split('.').peekable();
        while let Some(part) = parts.next() {
            let elem = node.map.get(part).ok_or_else(not_found)?;
            if parts.peek().is_none() {
                return Ok(elem);
            }
            match elem {
                ParameterTree::Node(map) => node = map,
                ParameterTree::Leaf(_) => return Err(not_found()),
            }
        }

        Err(not_found())
    }

    pub fn get_param(&self, rel_path: &str) -> Result<&Parameter, Error> {
        self.get(rel_path)?.as_param()
    }

    pub fn get_map(&self, rel_path: &str) -> Result<&ParameterMap, Error> {
        self.get(rel_path)?.as_map()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ParameterTree {
    Node(ParameterMap),
    Leaf(Parameter),
}

impl ParameterTree {
    fn as_param(&self) -> Result<&Parameter, Error> {
        match self {
            Self::Leaf(p) => Ok(p),
            Self::Node(m) => Err(Error::NotAParameter {
                path: m.path.clone(),
            }),
        }
    }

    fn as_map(&self) -> Result<&ParameterMap, Error> {
        match self {
            Self::Node(m) => Ok(m),
            Self::Leaf(p) => Err(Error::NotAMap {
                path: p.path.clone(),
            }),
        }
    }
}

pub fn parse_string(toml_str: &str) -> Result<ParameterMap, Error> {
    let table = toml::from_str::<Table>(toml_str)?;

    parse_table(table, "")
}

fn parse_table(table: Table, root: &str) -> Result<ParameterMap, Error> {
    let mut map = BTreeMap::new();

    for (key, val) in table {
        let path = append_path(root, &key);
        let Value::Table(inner) = val else {
            return Err(Error::BadToml(root.to_string()));
        };

        // A table carrying a "type" key is a leaf, anything else is a subtree.
        let tree = if inner.contains_key("type") {
            let value = Value::Table(inner)
                .try_into::<ParameterValue>()
                .map_err(|_| Error::BadToml(path.clone()))?;
            ParameterTree::Leaf(Parameter { path, value })
        } else {
            ParameterTree::Node(parse_table(inner, &path)?)
        };
        map.insert(key, tree);
    }

    Ok(ParameterMap {
        path: root.to_string(),
        map,
    })
}

fn append_path(root: &str, key: &str) -> String {
    format!("{root}.{key}")
}
