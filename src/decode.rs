//! Conversion of SQLite values to JSON

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use indexmap::IndexMap;
use serde_json::Value as JsonValue;
use sqlx::sqlite::{SqliteRow, SqliteValueRef};
use sqlx::{Column, Decode, Row, Sqlite, TypeInfo, ValueRef};

use crate::Error;

/// One result row keyed by column name, in select-list order.
pub type JsonRow = IndexMap<String, JsonValue>;

/// Decodes every column of `row`.
pub(crate) fn row_to_json(row: &SqliteRow) -> Result<JsonRow, Error> {
   let mut value = IndexMap::with_capacity(row.columns().len());
   for (i, column) in row.columns().iter().enumerate() {
      let raw = row.try_get_raw(i)?;
      value.insert(column.name().to_string(), to_json(raw)?);
   }
   Ok(value)
}

/// Maps a single value by its storage class. BLOBs become base64 text.
pub(crate) fn to_json(value: SqliteValueRef<'_>) -> Result<JsonValue, Error> {
   if value.is_null() {
      return Ok(JsonValue::Null);
   }

   let type_name = value.type_info().name().to_string();
   let json = match type_name.as_str() {
      "INTEGER" | "BOOLEAN" => JsonValue::from(decode::<i64>(value)?),
      "REAL" | "NUMERIC" => {
         let real = decode::<f64>(value)?;
         serde_json::Number::from_f64(real)
            .map(JsonValue::Number)
            .unwrap_or(JsonValue::Null)
      }
      "TEXT" | "DATE" | "TIME" | "DATETIME" => JsonValue::String(decode::<String>(value)?),
      "BLOB" => JsonValue::String(STANDARD.encode(decode::<Vec<u8>>(value)?)),
      _ => return Err(Error::UnsupportedDatatype(type_name)),
   };

   Ok(json)
}

fn decode<'r, T: Decode<'r, Sqlite>>(value: SqliteValueRef<'r>) -> Result<T, Error> {
   T::decode(value).map_err(|e| Error::Sqlx(sqlx::Error::Decode(e)))
}
