//! Bind parameters accepted by the pool's execution primitives

use sqlx::Arguments;
use sqlx::sqlite::SqliteArguments;

/// A single positional bind value, mirroring SQLite's storage classes.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlParam {
   Null,
   Integer(i64),
   Real(f64),
   Text(String),
   Blob(Vec<u8>),
}

impl From<i64> for SqlParam {
   fn from(value: i64) -> Self {
      SqlParam::Integer(value)
   }
}

impl From<i32> for SqlParam {
   fn from(value: i32) -> Self {
      SqlParam::Integer(value.into())
   }
}

impl From<u32> for SqlParam {
   fn from(value: u32) -> Self {
      SqlParam::Integer(value.into())
   }
}

impl From<bool> for SqlParam {
   fn from(value: bool) -> Self {
      SqlParam::Integer(value.into())
   }
}

impl From<f64> for SqlParam {
   fn from(value: f64) -> Self {
      SqlParam::Real(value)
   }
}

impl From<String> for SqlParam {
   fn from(value: String) -> Self {
      SqlParam::Text(value)
   }
}

impl From<&str> for SqlParam {
   fn from(value: &str) -> Self {
      SqlParam::Text(value.to_owned())
   }
}

impl From<Vec<u8>> for SqlParam {
   fn from(value: Vec<u8>) -> Self {
      SqlParam::Blob(value)
   }
}

impl<T: Into<SqlParam>> From<Option<T>> for SqlParam {
   fn from(value: Option<T>) -> Self {
      value.map_or(SqlParam::Null, Into::into)
   }
}

/// Builds driver arguments from positional parameters.
pub(crate) fn to_arguments(params: &[SqlParam]) -> Result<SqliteArguments<'static>, sqlx::Error> {
   let mut args = SqliteArguments::default();

   for param in params {
      let added = match param {
         SqlParam::Null => args.add(None::<i64>),
         SqlParam::Integer(v) => args.add(*v),
         SqlParam::Real(v) => args.add(*v),
         SqlParam::Text(v) => args.add(v.clone()),
         SqlParam::Blob(v) => args.add(v.clone()),
      };
      added.map_err(sqlx::Error::Encode)?;
   }

   Ok(args)
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn conversions_pick_the_storage_class() {
      assert_eq!(SqlParam::from(7_i32), SqlParam::Integer(7));
      assert_eq!(SqlParam::from(true), SqlParam::Integer(1));
      assert_eq!(SqlParam::from("night shift"), SqlParam::Text("night shift".into()));
      assert_eq!(SqlParam::from(None::<i64>), SqlParam::Null);
      assert_eq!(SqlParam::from(Some(2.5)), SqlParam::Real(2.5));
   }

   #[test]
   fn every_param_becomes_an_argument() {
      let args = to_arguments(&[
         SqlParam::Null,
         SqlParam::Integer(1),
         SqlParam::Real(1.5),
         SqlParam::Text("a".into()),
         SqlParam::Blob(vec![0xde, 0xad]),
      ])
      .unwrap();

      assert_eq!(args.len(), 5);
   }
}
