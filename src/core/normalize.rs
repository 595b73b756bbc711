//! Field-name normalization and schema coercion of source elements.

use crate::domain::model::{EvType, RecordRejection, RegistrationRecord, YearBounds};
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::OnceLock;

/// 來源欄位別名 → 標準欄位名稱
const FIELD_ALIASES: [(&str, &str); 2] = [
    ("electric_vehicle_type", "ev_type"),
    ("dol_vehicle_id", "source_id"),
];

fn separator_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"[^a-z0-9]+").expect("static regex is valid"))
}

/// `Model Year` → `model_year`, `:@computed_region` → `computed_region`.
pub fn normalize_field_name(name: &str) -> String {
    let lowered = name.trim().to_lowercase();
    separator_pattern()
        .replace_all(&lowered, "_")
        .trim_matches('_')
        .to_string()
}

/// Flattens nested objects (joining keys with `_`) and normalizes every key.
///
/// Arrays are kept as values. When two source keys normalize to the same name
/// the first one wins.
pub fn flatten_object(object: Map<String, Value>) -> HashMap<String, Value> {
    let mut fields = HashMap::new();
    flatten_into(&mut fields, None, object);

    for (alias, canonical) in FIELD_ALIASES {
        if !fields.contains_key(canonical) {
            if let Some(value) = fields.remove(alias) {
                fields.insert(canonical.to_string(), value);
            }
        }
    }

    fields
}

fn flatten_into(fields: &mut HashMap<String, Value>, prefix: Option<&str>, object: Map<String, Value>) {
    for (key, value) in object {
        let normalized = normalize_field_name(&key);
        let name = match prefix {
            Some(prefix) if !normalized.is_empty() => format!("{}_{}", prefix, normalized),
            Some(prefix) => prefix.to_string(),
            None => normalized,
        };
        if name.is_empty() {
            continue;
        }

        match value {
            Value::Object(nested) => flatten_into(fields, Some(&name), nested),
            other => {
                fields.entry(name).or_insert(other);
            }
        }
    }
}

type FieldResult<T> = std::result::Result<T, (String, String)>;

fn missing(field: &str) -> (String, String) {
    (field.to_string(), "missing or empty".to_string())
}

fn required_string(fields: &HashMap<String, Value>, field: &str) -> FieldResult<String> {
    optional_string(fields, field)?.ok_or_else(|| missing(field))
}

fn optional_string(fields: &HashMap<String, Value>, field: &str) -> FieldResult<Option<String>> {
    match fields.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => {
            let trimmed = s.trim();
            Ok((!trimmed.is_empty()).then(|| trimmed.to_string()))
        }
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err((
            field.to_string(),
            format!("expected a string, got {}", json_type(other)),
        )),
    }
}

fn optional_integer(fields: &HashMap<String, Value>, field: &str) -> FieldResult<Option<i64>> {
    let invalid = |raw: &str| (field.to_string(), format!("'{}' is not an integer", raw));

    match fields.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => {
            if let Some(i) = n.as_i64() {
                Ok(Some(i))
            } else {
                match n.as_f64() {
                    Some(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => Ok(Some(f as i64)),
                    _ => Err(invalid(&n.to_string())),
                }
            }
        }
        Some(Value::String(s)) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                return Ok(None);
            }
            if let Ok(i) = trimmed.parse::<i64>() {
                return Ok(Some(i));
            }
            match trimmed.parse::<f64>() {
                Ok(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => Ok(Some(f as i64)),
                _ => Err(invalid(trimmed)),
            }
        }
        Some(other) => Err((
            field.to_string(),
            format!("expected an integer, got {}", json_type(other)),
        )),
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Coerces one flattened element into a typed record.
pub fn coerce_record(
    fields: &HashMap<String, Value>,
    bounds: &YearBounds,
) -> std::result::Result<RegistrationRecord, (String, String)> {
    let make = required_string(fields, "make")?;
    let model = required_string(fields, "model")?;

    let model_year = optional_integer(fields, "model_year")?.ok_or_else(|| missing("model_year"))?;
    let model_year = i32::try_from(model_year)
        .ok()
        .filter(|year| bounds.contains(*year))
        .ok_or_else(|| {
            (
                "model_year".to_string(),
                format!("{} is outside {}..={}", model_year, bounds.min, bounds.max),
            )
        })?;

    let raw_type = required_string(fields, "ev_type")?;
    let ev_type = EvType::parse(&raw_type).ok_or_else(|| {
        (
            "ev_type".to_string(),
            format!("unknown EV type '{}'", raw_type),
        )
    })?;

    let electric_range = optional_integer(fields, "electric_range")?.unwrap_or(0);
    if electric_range < 0 {
        return Err((
            "electric_range".to_string(),
            format!("{} is negative", electric_range),
        ));
    }
    let electric_range = i32::try_from(electric_range).map_err(|_| {
        (
            "electric_range".to_string(),
            format!("{} is out of range", electric_range),
        )
    })?;

    let city = required_string(fields, "city")?;
    let state = required_string(fields, "state")?;
    if state.len() != 2 || !state.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err((
            "state".to_string(),
            format!("'{}' is not a two-letter state code", state),
        ));
    }

    Ok(RegistrationRecord {
        source_id: optional_string(fields, "source_id")?,
        make,
        model,
        model_year,
        ev_type,
        electric_range,
        city,
        state: state.to_ascii_uppercase(),
    })
}

/// Decodes a row that was already validated on its way into the warehouse.
///
/// Only `make`, `model_year` and `ev_type` are required. Missing text columns
/// become empty strings and a missing range becomes 0.
pub fn coerce_stored_record(
    fields: &HashMap<String, Value>,
) -> std::result::Result<RegistrationRecord, (String, String)> {
    let make = required_string(fields, "make")?;
    let model_year = optional_integer(fields, "model_year")?.ok_or_else(|| missing("model_year"))?;
    let model_year = i32::try_from(model_year).map_err(|_| {
        (
            "model_year".to_string(),
            format!("{} is out of range", model_year),
        )
    })?;

    let raw_type = required_string(fields, "ev_type")?;
    let ev_type = EvType::parse(&raw_type).ok_or_else(|| {
        (
            "ev_type".to_string(),
            format!("unknown EV type '{}'", raw_type),
        )
    })?;

    let electric_range = optional_integer(fields, "electric_range")?.unwrap_or(0);
    let electric_range = i32::try_from(electric_range).map_err(|_| {
        (
            "electric_range".to_string(),
            format!("{} is out of range", electric_range),
        )
    })?;

    Ok(RegistrationRecord {
        source_id: optional_string(fields, "source_id")?,
        make,
        model: optional_string(fields, "model")?.unwrap_or_default(),
        model_year,
        ev_type,
        electric_range,
        city: optional_string(fields, "city")?.unwrap_or_default(),
        state: optional_string(fields, "state")?.unwrap_or_default(),
    })
}

/// 將來源陣列轉為已驗證紀錄與被拒絕清單，兩者皆保留原本順序
pub fn normalize_items(
    items: Vec<Value>,
    bounds: &YearBounds,
) -> (Vec<RegistrationRecord>, Vec<RecordRejection>) {
    let mut records = Vec::with_capacity(items.len());
    let mut rejections = Vec::new();

    for (index, item) in items.into_iter().enumerate() {
        let object = match item {
            Value::Object(object) => object,
            other => {
                rejections.push(RecordRejection {
                    index,
                    field: "<record>".to_string(),
                    reason: format!("expected an object, got {}", json_type(&other)),
                });
                continue;
            }
        };

        let fields = flatten_object(object);
        match coerce_record(&fields, bounds) {
            Ok(record) => records.push(record),
            Err((field, reason)) => rejections.push(RecordRejection {
                index,
                field,
                reason,
            }),
        }
    }

    (records, rejections)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn bounds() -> YearBounds {
        YearBounds {
            min: 1990,
            max: 2027,
        }
    }

    fn fields(value: Value) -> HashMap<String, Value> {
        match value {
            Value::Object(object) => flatten_object(object),
            _ => panic!("test input must be an object"),
        }
    }

    #[test]
    fn test_normalize_field_name() {
        assert_eq!(normalize_field_name("Model Year"), "model_year");
        assert_eq!(normalize_field_name("  Electric Range "), "electric_range");
        assert_eq!(normalize_field_name(":@computed_region_x"), "computed_region_x");
        assert_eq!(normalize_field_name("VIN (1-10)"), "vin_1_10");
        assert_eq!(normalize_field_name("state"), "state");
    }

    #[test]
    fn test_flatten_nested_objects() {
        let flattened = fields(json!({
            "Make": "TESLA",
            "geocoded_column": {"type": "Point", "coordinates": [-122.3, 47.6]}
        }));

        assert_eq!(flattened.get("make"), Some(&json!("TESLA")));
        assert_eq!(flattened.get("geocoded_column_type"), Some(&json!("Point")));
        assert_eq!(
            flattened.get("geocoded_column_coordinates"),
            Some(&json!([-122.3, 47.6]))
        );
    }

    #[test]
    fn test_coerce_socrata_style_record() {
        let record = coerce_record(
            &fields(json!({
                "dol_vehicle_id": "474834806",
                "make": "TESLA",
                "model": "MODEL 3",
                "model_year": "2022",
                "electric_vehicle_type": "Battery Electric Vehicle (BEV)",
                "electric_range": "0",
                "city": "Seattle",
                "state": "wa"
            })),
            &bounds(),
        )
        .unwrap();

        assert_eq!(record.source_id.as_deref(), Some("474834806"));
        assert_eq!(record.model_year, 2022);
        assert_eq!(record.ev_type, EvType::BatteryElectric);
        assert_eq!(record.electric_range, 0);
        assert_eq!(record.state, "WA");
    }

    #[test]
    fn test_missing_range_means_not_reported() {
        let record = coerce_record(
            &fields(json!({
                "make": "FORD", "model": "ESCAPE", "model_year": 2021,
                "ev_type": "PHEV", "city": "Tacoma", "state": "WA"
            })),
            &bounds(),
        )
        .unwrap();
        assert_eq!(record.electric_range, 0);
        assert_eq!(record.source_id, None);
    }

    #[test]
    fn test_rejections_name_the_failing_field() {
        let cases = [
            (json!({"model": "LEAF", "model_year": 2020, "ev_type": "BEV", "city": "A", "state": "WA"}), "make"),
            (json!({"make": "NISSAN", "model": "LEAF", "model_year": "twenty", "ev_type": "BEV", "city": "A", "state": "WA"}), "model_year"),
            (json!({"make": "NISSAN", "model": "LEAF", "model_year": 1975, "ev_type": "BEV", "city": "A", "state": "WA"}), "model_year"),
            (json!({"make": "NISSAN", "model": "LEAF", "model_year": 2020, "ev_type": "FCEV", "city": "A", "state": "WA"}), "ev_type"),
            (json!({"make": "NISSAN", "model": "LEAF", "model_year": 2020, "ev_type": "BEV", "electric_range": -5, "city": "A", "state": "WA"}), "electric_range"),
            (json!({"make": "NISSAN", "model": "LEAF", "model_year": 2020, "ev_type": "BEV", "city": "A", "state": "Washington"}), "state"),
        ];

        for (input, expected_field) in cases {
            let (field, _) = coerce_record(&fields(input), &bounds()).unwrap_err();
            assert_eq!(field, expected_field);
        }
    }

    #[test]
    fn test_normalize_items_keeps_order_and_indexes() {
        let items = vec![
            json!({"make": "TESLA", "model": "MODEL Y", "model_year": "2023", "ev_type": "BEV", "electric_range": "0", "city": "Bothell", "state": "WA"}),
            json!("not an object"),
            json!({"make": "KIA", "model": "NIRO", "model_year": "2019", "ev_type": "PHEV", "electric_range": "26", "city": "Yakima", "state": "WA"}),
            json!({"make": "", "model": "X", "model_year": "2019", "ev_type": "PHEV", "city": "Yakima", "state": "WA"}),
        ];

        let (records, rejections) = normalize_items(items, &bounds());

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].make, "TESLA");
        assert_eq!(records[1].make, "KIA");
        assert_eq!(rejections.len(), 2);
        assert_eq!(rejections[0].index, 1);
        assert_eq!(rejections[0].field, "<record>");
        assert_eq!(rejections[1].index, 3);
        assert_eq!(rejections[1].field, "make");
    }

    #[test]
    fn test_stored_record_tolerates_sparse_columns() {
        let record = coerce_stored_record(&fields(json!({
            "make": "KIA",
            "model_year": 2023,
            "ev_type": "BEV",
            "state": "Washington"
        })))
        .unwrap();

        assert_eq!(record.electric_range, 0);
        assert_eq!(record.city, "");
        assert_eq!(record.state, "Washington");

        let err = coerce_stored_record(&fields(json!({"make": "KIA", "ev_type": "BEV"}))).unwrap_err();
        assert_eq!(err.0, "model_year");
    }
}
