// 👤 Customer Entity - the typed unified record that gets persisted
// Required/optional-ness and types are enforced here, before any SQL runs

use crate::table::{parse_bool, RowView};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Why a unified row does not fit the entity
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FieldError {
    #[error("required field '{0}' is missing")]
    Missing(String),

    #[error("field '{field}' expected {expected}, got {found}")]
    WrongType {
        field: String,
        expected: &'static str,
        found: String,
    },
}

impl FieldError {
    /// The offending field
    pub fn field(&self) -> &str {
        match self {
            FieldError::Missing(field) => field,
            FieldError::WrongType { field, .. } => field,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Customer {
    pub first_name: String,
    pub last_name: String,
    /// UNIQUE in storage. Two real people with the same name collide here.
    pub full_name: String,
    pub age: i64,
    pub sex: Option<String>,
    pub vehicle_make: String,
    pub vehicle_model: String,
    pub vehicle_year: i64,
    pub vehicle_type: Option<String>,
    pub retired: bool,
    pub dependants: i64,
    pub marital_status: String,
    pub salary: i64,
    pub pension: i64,
    pub company: String,
    pub commute_distance: Option<f64>,
    pub address_postcode: String,
    pub iban: String,
    pub credit_card_number: i64,
    pub credit_card_security_code: i64,
    pub credit_card_start_date: String,
    pub credit_card_end_date: String,
    pub address_main: Option<String>,
    pub address_city: Option<String>,
    pub debt: f64,
}

impl Customer {
    /// Map one unified row onto the entity
    pub fn from_row(row: &RowView<'_>) -> Result<Customer, FieldError> {
        let fields = Fields { row };

        Ok(Customer {
            first_name: fields.required_text("first_name")?,
            last_name: fields.required_text("last_name")?,
            full_name: fields.required_text("full_name")?,
            age: fields.required_int("age")?,
            sex: fields.optional_text("sex")?,
            vehicle_make: fields.required_text("vehicle_make")?,
            vehicle_model: fields.required_text("vehicle_model")?,
            vehicle_year: fields.required_int("vehicle_year")?,
            vehicle_type: fields.optional_text("vehicle_type")?,
            retired: fields.required_bool("retired")?,
            dependants: fields.required_int("dependants")?,
            marital_status: fields.required_text("marital_status")?,
            salary: fields.required_int("salary")?,
            pension: fields.required_int("pension")?,
            company: fields.required_text("company")?,
            commute_distance: fields.optional_float("commute_distance")?,
            address_postcode: fields.required_text("address_postcode")?,
            iban: fields.required_text("iban")?,
            credit_card_number: fields.required_int("credit_card_number")?,
            credit_card_security_code: fields.required_int("credit_card_security_code")?,
            credit_card_start_date: fields.required_text("credit_card_start_date")?,
            credit_card_end_date: fields.required_text("credit_card_end_date")?,
            address_main: fields.optional_text("address_main")?,
            address_city: fields.optional_text("address_city")?,
            debt: fields.required_float("debt")?,
        })
    }
}

// ============================================================================
// FIELD ACCESS
// ============================================================================

struct Fields<'r, 'a> {
    row: &'r RowView<'a>,
}

impl<'r, 'a> Fields<'r, 'a> {
    fn present(&self, field: &str) -> Option<&'a Value> {
        self.row.get(field).filter(|v| !v.is_null())
    }

    fn required(&self, field: &str) -> Result<&'a Value, FieldError> {
        self.present(field)
            .ok_or_else(|| FieldError::Missing(field.to_string()))
    }

    fn required_text(&self, field: &str) -> Result<String, FieldError> {
        to_text(field, self.required(field)?)
    }

    fn optional_text(&self, field: &str) -> Result<Option<String>, FieldError> {
        self.present(field).map(|v| to_text(field, v)).transpose()
    }

    fn required_int(&self, field: &str) -> Result<i64, FieldError> {
        to_int(field, self.required(field)?)
    }

    fn required_float(&self, field: &str) -> Result<f64, FieldError> {
        to_float(field, self.required(field)?)
    }

    fn optional_float(&self, field: &str) -> Result<Option<f64>, FieldError> {
        self.present(field).map(|v| to_float(field, v)).transpose()
    }

    fn required_bool(&self, field: &str) -> Result<bool, FieldError> {
        let value = self.required(field)?;
        match value {
            Value::Bool(b) => Ok(*b),
            Value::String(s) => parse_bool(s.trim())
                .ok_or_else(|| type_error(field, "boolean", value)),
            Value::Number(n) => match n.as_i64() {
                Some(0) => Ok(false),
                Some(1) => Ok(true),
                _ => Err(type_error(field, "boolean", value)),
            },
            _ => Err(type_error(field, "boolean", value)),
        }
    }
}

fn type_error(field: &str, expected: &'static str, value: &Value) -> FieldError {
    FieldError::WrongType {
        field: field.to_string(),
        expected,
        found: value.to_string(),
    }
}

/// Text columns sometimes hold digit-only values (postcodes, models)
fn to_text(field: &str, value: &Value) -> Result<String, FieldError> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        _ => Err(type_error(field, "text", value)),
    }
}

fn to_int(field: &str, value: &Value) -> Result<i64, FieldError> {
    match value {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                return Ok(i);
            }
            match n.as_f64() {
                Some(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => Ok(f as i64),
                _ => Err(type_error(field, "integer", value)),
            }
        }
        Value::String(s) => s
            .trim()
            .parse::<i64>()
            .map_err(|_| type_error(field, "integer", value)),
        _ => Err(type_error(field, "integer", value)),
    }
}

fn to_float(field: &str, value: &Value) -> Result<f64, FieldError> {
    match value {
        Value::Number(n) => n.as_f64().ok_or_else(|| type_error(field, "number", value)),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| type_error(field, "number", value)),
        _ => Err(type_error(field, "number", value)),
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::table::Table;
    use serde_json::json;

    /// A complete unified row for one customer
    pub(crate) fn unified_row(first: &str, last: &str, iban: &str, card: i64, code: i64) -> Vec<(String, Value)> {
        vec![
            ("first_name", json!(first)),
            ("last_name", json!(last)),
            ("full_name", json!(format!("{} {}", first, last))),
            ("age", json!(40)),
            ("sex", json!("F")),
            ("vehicle_make", json!("Ford")),
            ("vehicle_model", json!("Focus")),
            ("vehicle_year", json!(2015)),
            ("vehicle_type", Value::Null),
            ("retired", json!(false)),
            ("dependants", json!(0.0)),
            ("marital_status", json!("single")),
            ("salary", json!(45000)),
            ("pension", json!(0)),
            ("company", json!("Unknown")),
            ("commute_distance", json!(12.5)),
            ("address_postcode", json!("M1 2AB")),
            ("iban", json!(iban)),
            ("credit_card_number", json!(card)),
            ("credit_card_security_code", json!(code)),
            ("credit_card_start_date", json!("08/19")),
            ("credit_card_end_date", json!("08/24")),
            ("address_main", json!("1 High Street")),
            ("address_city", json!("Manchester")),
            ("debt", json!(0)),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
    }

    pub(crate) fn table_of(rows: Vec<Vec<(String, Value)>>) -> Table {
        let columns = rows[0].iter().map(|(k, _)| k.clone()).collect();
        let values = rows
            .into_iter()
            .map(|r| r.into_iter().map(|(_, v)| v).collect())
            .collect();
        Table::from_rows("csv+xml+json", columns, values)
    }

    #[test]
    fn test_from_row_maps_types() {
        let table = table_of(vec![unified_row("Jane", "Doe", "GB01", 4000111122223333, 123)]);
        let customer = Customer::from_row(&table.row(0).unwrap()).unwrap();

        assert_eq!(customer.full_name, "Jane Doe");
        assert_eq!(customer.dependants, 0);
        assert_eq!(customer.vehicle_type, None);
        assert_eq!(customer.commute_distance, Some(12.5));
        assert_eq!(customer.debt, 0.0);
        assert!(!customer.retired);
    }

    #[test]
    fn test_missing_required_field_is_rejected() {
        let mut row = unified_row("Jane", "Doe", "GB01", 1, 2);
        row.retain(|(k, _)| k != "iban");
        let table = table_of(vec![row]);

        let err = Customer::from_row(&table.row(0).unwrap()).unwrap_err();
        assert_eq!(err, FieldError::Missing("iban".to_string()));
    }

    #[test]
    fn test_wrong_type_is_rejected() {
        let mut row = unified_row("Jane", "Doe", "GB01", 1, 2);
        for (k, v) in row.iter_mut() {
            if k == "salary" {
                *v = json!("lots");
            }
        }
        let table = table_of(vec![row]);

        let err = Customer::from_row(&table.row(0).unwrap()).unwrap_err();
        assert_eq!(err.field(), "salary");
        assert!(matches!(err, FieldError::WrongType { expected: "integer", .. }));
    }

    #[test]
    fn test_numeric_postcode_rendered_as_text() {
        let mut row = unified_row("Jane", "Doe", "GB01", 1, 2);
        for (k, v) in row.iter_mut() {
            if k == "address_postcode" {
                *v = json!(10115);
            }
        }
        let table = table_of(vec![row]);

        let customer = Customer::from_row(&table.row(0).unwrap()).unwrap();
        assert_eq!(customer.address_postcode, "10115");
    }
}
