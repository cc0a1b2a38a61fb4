// CSV telemetry source - header-mapped rows into raw telemetry records
use crate::domain::error::AnalyticsError;
use crate::domain::telemetry::{RawTelemetryRow, RawValue};

const REQUIRED_COLUMNS: [&str; 4] = ["timestamp", "voltage", "current", "temperature"];

#[derive(Debug, Default)]
struct ColumnMap {
    timestamp: Option<usize>,
    voltage: Option<usize>,
    current: Option<usize>,
    temperature: Option<usize>,
    soc: Option<usize>,
    capacity: Option<usize>,
}

impl ColumnMap {
    fn from_headers(headers: &csv::StringRecord) -> Result<Self, AnalyticsError> {
        let mut map = Self::default();
        for (index, name) in headers.iter().enumerate() {
            let slot = match name.trim().to_ascii_lowercase().as_str() {
                "timestamp" => &mut map.timestamp,
                "voltage" => &mut map.voltage,
                "current" => &mut map.current,
                "temperature" => &mut map.temperature,
                "soc" | "soc_reported" => &mut map.soc,
                "capacity" | "capacity_ah" => &mut map.capacity,
                _ => continue,
            };
            slot.get_or_insert(index);
        }

        let present = [map.timestamp, map.voltage, map.current, map.temperature];
        if let Some((name, _)) = REQUIRED_COLUMNS
            .iter()
            .zip(present)
            .find(|(_, index)| index.is_none())
        {
            return Err(AnalyticsError::validation(
                0,
                format!("missing required column '{}'", name),
            ));
        }
        Ok(map)
    }

    fn row(&self, record: &csv::StringRecord) -> RawTelemetryRow {
        let cell = |index: Option<usize>| {
            index
                .and_then(|i| record.get(i))
                .filter(|value| !value.is_empty())
                .map(RawValue::from)
        };
        RawTelemetryRow {
            timestamp: cell(self.timestamp),
            voltage: cell(self.voltage),
            current: cell(self.current),
            temperature: cell(self.temperature),
            soc_reported: cell(self.soc),
            capacity_ah: cell(self.capacity),
        }
    }
}

/// Parse CSV text with a header line. Values stay untyped; the normalizer
/// validates them. Row numbers in errors count data rows from zero.
pub fn parse_csv(text: &str) -> Result<Vec<RawTelemetryRow>, AnalyticsError> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(text.as_bytes());

    let headers = reader
        .headers()
        .map_err(|e| AnalyticsError::validation(0, format!("unreadable header: {}", e)))?
        .clone();
    let columns = ColumnMap::from_headers(&headers)?;

    let mut rows = Vec::new();
    for (row, record) in reader.records().enumerate() {
        let record = record.map_err(|e| AnalyticsError::validation(row, e.to_string()))?;
        rows.push(columns.row(&record));
    }
    tracing::debug!("Parsed {} CSV rows", rows.len());
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_with_optional_columns() {
        let text = "timestamp,voltage,current,temperature,soc\n\
                    2024-01-01 00:00:00,48.1,10.5,25.0,80\n\
                    2024-01-01 00:01:00, 48.0 ,10.4,25.1,\n";
        let rows = parse_csv(text).unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].timestamp, Some(RawValue::from("2024-01-01 00:00:00")));
        assert_eq!(rows[0].soc_reported, Some(RawValue::from("80")));
        assert_eq!(rows[1].voltage, Some(RawValue::from("48.0")));
        assert_eq!(rows[1].soc_reported, None);
        assert_eq!(rows[1].capacity_ah, None);
    }

    #[test]
    fn test_headers_are_case_insensitive_and_reorderable() {
        let text = "Temperature,Current,Voltage,Timestamp,Capacity\n25,1,48,0,95\n";
        let rows = parse_csv(text).unwrap();
        assert_eq!(rows[0].voltage, Some(RawValue::from("48")));
        assert_eq!(rows[0].capacity_ah, Some(RawValue::from("95")));
    }

    #[test]
    fn test_missing_required_column() {
        let err = parse_csv("timestamp,voltage,current\n0,48,1\n").unwrap_err();
        assert_eq!(err.category(), "validation");
        assert!(err.to_string().contains("temperature"));
    }

    #[test]
    fn test_short_rows_leave_fields_missing() {
        let rows = parse_csv("timestamp,voltage,current,temperature\n0,48\n").unwrap();
        assert_eq!(rows[0].current, None);
    }
}
