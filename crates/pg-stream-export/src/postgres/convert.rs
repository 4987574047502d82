//! Conversions between config parameters, PostgreSQL types and records.

use tokio_postgres::types::{ToSql, Type};
use tokio_postgres::Row;

use crate::config::QueryParam;
use crate::core::{Record, Value};
use crate::error::{ExportError, Result};

/// A parameter ready to bind.
pub type BoundParam = Box<dyn ToSql + Sync + Send>;

/// Coerce positional parameters to the types the prepared statement expects.
///
/// Config values are loosely typed (YAML `1000000` is just an integer), while
/// the server infers a concrete type per placeholder. Binding an `i64` to an
/// `int4` placeholder fails, so each value is converted to the declared type.
pub fn bind_params(params: &[QueryParam], types: &[Type]) -> Result<Vec<BoundParam>> {
    if params.len() != types.len() {
        return Err(ExportError::source_failed(format!(
            "query expects {} parameter(s), {} given",
            types.len(),
            params.len()
        )));
    }

    params
        .iter()
        .zip(types)
        .enumerate()
        .map(|(idx, (param, ty))| coerce(param, ty, idx + 1))
        .collect()
}

fn coerce(param: &QueryParam, ty: &Type, position: usize) -> Result<BoundParam> {
    let mismatch = || {
        ExportError::source_failed(format!(
            "parameter ${} = {:?} cannot be bound as {}",
            position, param, ty
        ))
    };

    let bound: BoundParam = match *ty {
        Type::BOOL => Box::new(match param {
            QueryParam::Null => None,
            QueryParam::Bool(v) => Some(*v),
            QueryParam::Text(s) => Some(s.parse::<bool>().map_err(|_| mismatch())?),
            _ => return Err(mismatch()),
        }),
        Type::INT2 => Box::new(match param {
            QueryParam::Null => None,
            QueryParam::Int(v) => Some(i16::try_from(*v).map_err(|_| mismatch())?),
            QueryParam::Text(s) => Some(s.parse::<i16>().map_err(|_| mismatch())?),
            _ => return Err(mismatch()),
        }),
        Type::INT4 => Box::new(match param {
            QueryParam::Null => None,
            QueryParam::Int(v) => Some(i32::try_from(*v).map_err(|_| mismatch())?),
            QueryParam::Text(s) => Some(s.parse::<i32>().map_err(|_| mismatch())?),
            _ => return Err(mismatch()),
        }),
        Type::INT8 => Box::new(match param {
            QueryParam::Null => None,
            QueryParam::Int(v) => Some(*v),
            QueryParam::Text(s) => Some(s.parse::<i64>().map_err(|_| mismatch())?),
            _ => return Err(mismatch()),
        }),
        Type::FLOAT4 => Box::new(match param {
            QueryParam::Null => None,
            QueryParam::Int(v) => Some(*v as f32),
            QueryParam::Float(v) => Some(*v as f32),
            QueryParam::Text(s) => Some(s.parse::<f32>().map_err(|_| mismatch())?),
            _ => return Err(mismatch()),
        }),
        Type::FLOAT8 => Box::new(match param {
            QueryParam::Null => None,
            QueryParam::Int(v) => Some(*v as f64),
            QueryParam::Float(v) => Some(*v),
            QueryParam::Text(s) => Some(s.parse::<f64>().map_err(|_| mismatch())?),
            _ => return Err(mismatch()),
        }),
        Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME | Type::UNKNOWN => {
            Box::new(match param {
                QueryParam::Null => None,
                QueryParam::Bool(v) => Some(v.to_string()),
                QueryParam::Int(v) => Some(v.to_string()),
                QueryParam::Float(v) => Some(v.to_string()),
                QueryParam::Text(s) => Some(s.clone()),
            })
        }
        _ => {
            return Err(ExportError::source_failed(format!(
                "parameter ${} has unsupported type {}; cast the placeholder (e.g. ${}::text)",
                position, ty, position
            )))
        }
    };

    Ok(bound)
}

/// Convert a fetched row into a record, keeping column order.
pub fn row_to_record(row: &Row) -> Result<Record> {
    let mut fields = Vec::with_capacity(row.len());
    for (idx, column) in row.columns().iter().enumerate() {
        let value = column_value(row, idx, column.type_()).map_err(|e| {
            ExportError::source_failed(format!(
                "cannot read column '{}' ({}): {}",
                column.name(),
                column.type_(),
                e
            ))
        })?;
        fields.push((column.name().to_string(), value));
    }
    Ok(Record::from_fields(fields))
}

fn column_value(
    row: &Row,
    idx: usize,
    ty: &Type,
) -> std::result::Result<Value, tokio_postgres::Error> {
    let value = match *ty {
        Type::BOOL => row.try_get::<_, Option<bool>>(idx)?.map(Value::Bool),
        Type::INT2 => row
            .try_get::<_, Option<i16>>(idx)?
            .map(|v| Value::Int(v.into())),
        Type::INT4 => row
            .try_get::<_, Option<i32>>(idx)?
            .map(|v| Value::Int(v.into())),
        Type::INT8 => row.try_get::<_, Option<i64>>(idx)?.map(Value::Int),
        Type::OID => row
            .try_get::<_, Option<u32>>(idx)?
            .map(|v| Value::Int(v.into())),
        Type::FLOAT4 => row
            .try_get::<_, Option<f32>>(idx)?
            .map(|v| Value::Float(v.into())),
        Type::FLOAT8 => row.try_get::<_, Option<f64>>(idx)?.map(Value::Float),
        Type::TIMESTAMP => row
            .try_get::<_, Option<chrono::NaiveDateTime>>(idx)?
            .map(|v| Value::Text(v.to_string())),
        Type::TIMESTAMPTZ => row
            .try_get::<_, Option<chrono::DateTime<chrono::Utc>>>(idx)?
            .map(|v| Value::Text(v.to_rfc3339())),
        Type::DATE => row
            .try_get::<_, Option<chrono::NaiveDate>>(idx)?
            .map(|v| Value::Text(v.to_string())),
        _ => row.try_get::<_, Option<String>>(idx)?.map(Value::Text),
    };
    Ok(value.unwrap_or(Value::Null))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_param_count_mismatch() {
        let err = bind_params(&[QueryParam::Int(1)], &[]).unwrap_err();
        assert!(err.to_string().contains("expects 0 parameter(s), 1 given"));
    }

    #[test]
    fn test_int_coerces_to_declared_width() {
        let bound = bind_params(
            &[QueryParam::Int(1_000_000), QueryParam::Int(5), QueryParam::Int(7)],
            &[Type::INT4, Type::INT8, Type::FLOAT8],
        )
        .unwrap();
        assert_eq!(bound.len(), 3);
    }

    #[test]
    fn test_int_out_of_range_for_int2() {
        let err = bind_params(&[QueryParam::Int(70_000)], &[Type::INT2]).unwrap_err();
        assert!(err.to_string().contains("cannot be bound as int2"));
    }

    #[test]
    fn test_text_parses_into_numeric_types() {
        assert!(bind_params(&[QueryParam::Text("42".into())], &[Type::INT4]).is_ok());
        assert!(bind_params(&[QueryParam::Text("forty".into())], &[Type::INT4]).is_err());
        assert!(bind_params(&[QueryParam::Text("true".into())], &[Type::BOOL]).is_ok());
    }

    #[test]
    fn test_null_binds_to_any_supported_type() {
        for ty in [Type::BOOL, Type::INT4, Type::FLOAT8, Type::TEXT] {
            assert!(bind_params(&[QueryParam::Null], &[ty]).is_ok());
        }
    }

    #[test]
    fn test_float_rejected_for_integer_placeholder() {
        assert!(bind_params(&[QueryParam::Float(1.5)], &[Type::INT8]).is_err());
    }

    #[test]
    fn test_unsupported_placeholder_type() {
        let err = bind_params(&[QueryParam::Int(1)], &[Type::JSONB]).unwrap_err();
        assert!(err.to_string().contains("unsupported type"));
    }
}
