//! Entity kind metadata and the generic mirror row.
//!
//! The core never interprets business fields; it only needs each kind's table
//! name, column types, and whether rows carry an optimistic-concurrency version.

use std::fmt;

use rusqlite::types::{Value as SqlValue, ValueRef};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

use crate::error::{Error, Result};

/// Storage type of a mirrored column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Integer,
    Real,
    Text,
    /// Arrays/objects kept as serialized JSON text
    Json,
}

impl ColumnType {
    /// `SQLite` column affinity
    pub const fn sql_type(self) -> &'static str {
        match self {
            Self::Integer => "INTEGER",
            Self::Real => "REAL",
            Self::Text | Self::Json => "TEXT",
        }
    }
}

/// A domain column of an entity kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Column {
    pub name: &'static str,
    pub ty: ColumnType,
    /// Must be present and non-null when a row is created
    pub required: bool,
}

const fn col(name: &'static str, ty: ColumnType) -> Column {
    Column {
        name,
        ty,
        required: false,
    }
}

const fn req(name: &'static str, ty: ColumnType) -> Column {
    Column {
        name,
        ty,
        required: true,
    }
}

impl Column {
    /// Convert a JSON value into the value bound for this column.
    pub fn to_sql(&self, value: &Value) -> Result<SqlValue> {
        let mismatch = || {
            Error::InvalidInput(format!(
                "column '{}' expects {}, got {value}",
                self.name,
                self.ty.sql_type()
            ))
        };

        match (self.ty, value) {
            (_, Value::Null) => Ok(SqlValue::Null),
            (ColumnType::Integer, Value::Number(number)) => {
                number.as_i64().map(SqlValue::Integer).ok_or_else(mismatch)
            }
            (ColumnType::Integer, Value::Bool(flag)) => Ok(SqlValue::Integer(i64::from(*flag))),
            (ColumnType::Integer, Value::String(text)) => text
                .trim()
                .parse::<i64>()
                .map(SqlValue::Integer)
                .map_err(|_| mismatch()),
            (ColumnType::Real, Value::Number(number)) => {
                number.as_f64().map(SqlValue::Real).ok_or_else(mismatch)
            }
            (ColumnType::Real, Value::String(text)) => text
                .trim()
                .parse::<f64>()
                .map(SqlValue::Real)
                .map_err(|_| mismatch()),
            (ColumnType::Text | ColumnType::Json, Value::String(text)) => {
                Ok(SqlValue::Text(text.clone()))
            }
            (ColumnType::Text, Value::Number(_) | Value::Bool(_)) => {
                Ok(SqlValue::Text(value.to_string()))
            }
            (ColumnType::Json, other) => Ok(SqlValue::Text(serde_json::to_string(other)?)),
            _ => Err(mismatch()),
        }
    }

    /// Fit a server value into this column without rejecting the row.
    ///
    /// Text columns keep incompatible values as their JSON text; whole floats
    /// narrow to integers. Returns `None` when the value cannot be stored.
    #[allow(clippy::cast_possible_truncation)]
    pub fn coerce_server_value(&self, value: &Value) -> Option<Value> {
        if self.to_sql(value).is_ok() {
            return Some(value.clone());
        }
        match (self.ty, value) {
            (ColumnType::Text, other) => Some(Value::String(other.to_string())),
            (ColumnType::Integer, Value::Number(number)) => number
                .as_f64()
                .filter(|float| float.fract() == 0.0 && float.abs() < 9.0e15)
                .map(|float| Value::from(float as i64)),
            _ => None,
        }
    }

    /// Convert a stored value back into JSON.
    pub fn from_sql(&self, value: ValueRef<'_>) -> Value {
        match value {
            ValueRef::Null => Value::Null,
            ValueRef::Integer(number) => Value::from(number),
            ValueRef::Real(number) => Number::from_f64(number).map_or(Value::Null, Value::Number),
            ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
                let text = String::from_utf8_lossy(bytes).into_owned();
                if self.ty == ColumnType::Json {
                    serde_json::from_str(&text).unwrap_or(Value::String(text))
                } else {
                    Value::String(text)
                }
            }
        }
    }
}

/// Metadata describing one mirrored entity collection
#[derive(Debug, PartialEq, Eq)]
pub struct EntityKind {
    /// Local table name, also the REST path segment (`/{table}`)
    pub table: &'static str,
    /// Key holding the collection in list responses
    pub list_key: &'static str,
    /// Domain columns, excluding `id` and `version`
    pub columns: &'static [Column],
    /// Whether rows carry an optimistic-concurrency `version`
    pub versioned: bool,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table)
    }
}

use ColumnType::{Integer, Json, Real, Text};

pub static CLIENTS: EntityKind = EntityKind {
    table: "clients",
    list_key: "clients",
    columns: &[
        req("business_name", Text),
        col("tax_id", Text),
        col("email", Text),
        col("brand_file_id", Integer),
        col("phone", Text),
        col("address", Text),
        col("tariff_id", Integer),
        col("created_at", Text),
        col("updated_at", Text),
    ],
    versioned: true,
};

pub static STATUSES: EntityKind = EntityKind {
    table: "statuses",
    list_key: "statuses",
    columns: &[
        col("label", Text),
        col("value", Text),
        col("background_color", Text),
        col("order_index", Integer),
        col("created_at", Text),
        col("updated_at", Text),
    ],
    versioned: true,
};

pub static JOBS: EntityKind = EntityKind {
    table: "jobs",
    list_key: "jobs",
    columns: &[
        col("client_id", Integer),
        col("description", Text),
        col("job_date", Text),
        col("start_time", Text),
        col("end_time", Text),
        col("type_of_work", Text),
        col("status_id", Integer),
        col("folder_id", Integer),
        col("product_service_id", Integer),
        col("multiplicative_value", Real),
        col("tariff_id", Integer),
        col("manual_amount", Real),
        col("attached_files", Json),
        col("participants", Json),
    ],
    versioned: false,
};

pub static TARIFFS: EntityKind = EntityKind {
    table: "tariffs",
    list_key: "tariffs",
    columns: &[
        req("name", Text),
        req("amount", Real),
        col("last_update", Text),
    ],
    versioned: false,
};

pub static CASH_BOXES: EntityKind = EntityKind {
    table: "cash_boxes",
    list_key: "cash_boxes",
    columns: &[col("name", Text), col("image_file_id", Integer)],
    versioned: false,
};

pub static CATEGORIES: EntityKind = EntityKind {
    table: "categories",
    list_key: "categories",
    columns: &[
        col("parent_id", Integer),
        req("name", Text),
        req("type", Text),
    ],
    versioned: false,
};

pub static FOLDERS: EntityKind = EntityKind {
    table: "folders",
    list_key: "folders",
    columns: &[
        col("name", Text),
        col("parent_id", Integer),
        col("folder_image_file_id", Text),
        col("client_id", Integer),
        col("user_id", Integer),
    ],
    versioned: false,
};

pub static PROVIDERS: EntityKind = EntityKind {
    table: "providers",
    list_key: "providers",
    columns: &[
        req("business_name", Text),
        col("tax_id", Text),
        col("email", Text),
        col("brand_file_id", Integer),
        col("phone", Text),
        col("address", Text),
    ],
    versioned: false,
};

pub static PAYMENTS: EntityKind = EntityKind {
    table: "payments",
    list_key: "payments",
    columns: &[
        col("payment_date", Text),
        col("paid_with_account", Text),
        col("creditor_type", Text),
        col("creditor_client_id", Integer),
        col("creditor_provider_id", Integer),
        col("creditor_other", Text),
        col("description", Text),
        col("attached_files", Json),
        col("category_id", Integer),
        col("price", Real),
        col("charge_client", Integer),
        col("client_id", Integer),
    ],
    versioned: false,
};

pub static RECEIPTS: EntityKind = EntityKind {
    table: "receipts",
    list_key: "receipts",
    columns: &[
        col("receipt_date", Text),
        col("payer_type", Text),
        col("payer_client_id", Integer),
        col("payer_provider_id", Integer),
        col("payer_other", Text),
        col("paid_in_account", Text),
        col("description", Text),
        col("attached_files", Json),
        col("category_id", Integer),
        col("price", Real),
        col("pay_provider", Integer),
        col("provider_id", Integer),
    ],
    versioned: false,
};

/// Every built-in entity kind, in pull order
pub static ALL_KINDS: &[&EntityKind] = &[
    &CLIENTS,
    &STATUSES,
    &JOBS,
    &TARIFFS,
    &CASH_BOXES,
    &CATEGORIES,
    &FOLDERS,
    &PROVIDERS,
    &PAYMENTS,
    &RECEIPTS,
];

impl EntityKind {
    /// Resolve a built-in kind by table name
    pub fn lookup(table: &str) -> Result<&'static Self> {
        let table = table.trim();
        ALL_KINDS
            .iter()
            .copied()
            .find(|kind| kind.table.eq_ignore_ascii_case(table))
            .ok_or_else(|| Error::InvalidInput(format!("unknown entity kind '{table}'")))
    }

    /// Find a domain column by name
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|column| column.name == name)
    }

    /// Check that every field is a declared column with a compatible value.
    pub fn validate_fields(&self, fields: &Map<String, Value>) -> Result<()> {
        for (name, value) in fields {
            let column = self.column(name).ok_or_else(|| {
                Error::InvalidInput(format!("'{}' has no column '{name}'", self.table))
            })?;
            column.to_sql(value)?;
        }
        Ok(())
    }

    /// Check a full row for creation: declared fields plus required columns.
    pub fn validate_new_row(&self, fields: &Map<String, Value>) -> Result<()> {
        self.validate_fields(fields)?;
        for column in self.columns.iter().filter(|column| column.required) {
            if fields.get(column.name).is_none_or(Value::is_null) {
                return Err(Error::InvalidInput(format!(
                    "'{}' requires column '{}'",
                    self.table, column.name
                )));
            }
        }
        Ok(())
    }
}

/// One mirrored entity row.
///
/// Serializes flat, e.g. `{"id": 1, "label": "Open", "version": 2}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MirrorRow {
    /// Server id, or a negative temporary id for rows not yet created remotely
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    /// Domain fields keyed by column name
    #[serde(flatten)]
    pub fields: Map<String, Value>,
    /// Optimistic-concurrency version (versioned kinds only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<i64>,
}

impl MirrorRow {
    /// Create an empty row without an id
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty row with the given id
    pub fn with_id(id: i64) -> Self {
        Self {
            id: Some(id),
            ..Self::default()
        }
    }

    /// Builder: set a field
    #[must_use]
    pub fn field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Builder: set the version
    #[must_use]
    pub const fn version(mut self, version: i64) -> Self {
        self.version = Some(version);
        self
    }

    /// Read a field
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Parse a row from a server list item.
    ///
    /// Keeps only declared columns, coercing values that do not fit their
    /// column type. Versioned kinds default to version 1 when the server omits it.
    pub fn from_server(kind: &EntityKind, value: &Value) -> Result<Self> {
        let object = value.as_object().ok_or_else(|| {
            Error::InvalidInput(format!("{kind} list item is not an object: {value}"))
        })?;

        let id = object
            .get("id")
            .and_then(json_i64)
            .ok_or_else(|| Error::InvalidInput(format!("{kind} list item has no id: {value}")))?;

        let mut fields = Map::new();
        for column in kind.columns {
            let Some(value) = object.get(column.name) else {
                continue;
            };
            match column.coerce_server_value(value) {
                Some(stored) => {
                    if &stored != value {
                        tracing::debug!("Coerced {kind}.{} of row {id} to {stored}", column.name);
                    }
                    fields.insert(column.name.to_string(), stored);
                }
                None => {
                    tracing::warn!(
                        "Dropped {kind}.{} of row {id}: {value} does not fit {}",
                        column.name,
                        column.ty.sql_type()
                    );
                }
            }
        }

        let version = if kind.versioned {
            Some(object.get("version").and_then(json_i64).unwrap_or(1))
        } else {
            None
        };

        Ok(Self {
            id: Some(id),
            fields,
            version,
        })
    }
}

/// Read an integer from a JSON number or numeric string
pub fn json_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(number) => number.as_i64(),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}
