//! Core domain model for the water telemetry pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const CRATE_NAME: &str = "aqua-core";

/// Default share of each group that is preloaded as historical data.
pub const DEFAULT_PRELOAD_RATIO: f64 = 0.8;

/// Raised when a raw value cannot become a valid record. Validation happens
/// once at the ingestion boundary; components downstream of the normalizer
/// trust the records they receive.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("unknown parameter name: {0:?}")]
    UnknownParameter(String),
    #[error("unknown location name: {0:?}")]
    UnknownLocation(String),
    #[error("non-finite value {value} for parameter {parameter}")]
    NonFiniteValue { parameter: Parameter, value: f64 },
    #[error("invalid totalizer {totalizer} for location {location}")]
    InvalidTotalizer { location: Location, totalizer: f64 },
}

/// Water-quality parameters, named exactly as the `water_quality.parameter_name`
/// column stores them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Parameter {
    #[serde(rename = "HUMIDITY")]
    Humidity,
    #[serde(rename = "ETP (TDS)")]
    EtpTds,
    #[serde(rename = "ETP (pH)")]
    EtpPh,
    #[serde(rename = "STP (TDS)")]
    StpTds,
    #[serde(rename = "STP (TSS)")]
    StpTss,
    #[serde(rename = "STP (BOD)")]
    StpBod,
    #[serde(rename = "STP (pH)")]
    StpPh,
    #[serde(rename = "STP (COD)")]
    StpCod,
}

impl Parameter {
    pub const ALL: [Parameter; 8] = [
        Parameter::Humidity,
        Parameter::EtpTds,
        Parameter::EtpPh,
        Parameter::StpTds,
        Parameter::StpTss,
        Parameter::StpBod,
        Parameter::StpPh,
        Parameter::StpCod,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Parameter::Humidity => "HUMIDITY",
            Parameter::EtpTds => "ETP (TDS)",
            Parameter::EtpPh => "ETP (pH)",
            Parameter::StpTds => "STP (TDS)",
            Parameter::StpTss => "STP (TSS)",
            Parameter::StpBod => "STP (BOD)",
            Parameter::StpPh => "STP (pH)",
            Parameter::StpCod => "STP (COD)",
        }
    }

    /// Resolve a canonical name. Alias folding (spacing, numbering) happens in
    /// the normalizer; this only accepts exact schema names.
    pub fn from_name(name: &str) -> Result<Self, ValidationError> {
        Parameter::ALL
            .iter()
            .copied()
            .find(|p| p.as_str() == name)
            .ok_or_else(|| ValidationError::UnknownParameter(name.to_string()))
    }

    /// Reference bounds for this parameter, constant and seeded once.
    pub fn safe_range(&self) -> (f64, f64) {
        match self {
            Parameter::Humidity => (30.0, 70.0),
            Parameter::EtpTds => (100.0, 1000.0),
            Parameter::EtpPh => (6.5, 9.0),
            Parameter::StpTds => (100.0, 1000.0),
            Parameter::StpTss => (1000.0, 3000.0),
            Parameter::StpBod => (0.0, 5.0),
            Parameter::StpPh => (6.5, 9.0),
            Parameter::StpCod => (1000.0, 3000.0),
        }
    }
}

impl std::fmt::Display for Parameter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Intake sources, named exactly as the `flow_rate.location_name` column
/// stores them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Location {
    #[serde(rename = "Corporation Water")]
    CorporationWater,
    #[serde(rename = "Ground Water Source 1")]
    GroundWaterSource1,
    #[serde(rename = "Ground Water Source 2")]
    GroundWaterSource2,
    #[serde(rename = "Industrial Process")]
    IndustrialProcess,
    #[serde(rename = "Tanker Water Supply")]
    TankerWaterSupply,
}

impl Location {
    pub const ALL: [Location; 5] = [
        Location::CorporationWater,
        Location::GroundWaterSource1,
        Location::GroundWaterSource2,
        Location::IndustrialProcess,
        Location::TankerWaterSupply,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Location::CorporationWater => "Corporation Water",
            Location::GroundWaterSource1 => "Ground Water Source 1",
            Location::GroundWaterSource2 => "Ground Water Source 2",
            Location::IndustrialProcess => "Industrial Process",
            Location::TankerWaterSupply => "Tanker Water Supply",
        }
    }

    pub fn from_name(name: &str) -> Result<Self, ValidationError> {
        Location::ALL
            .iter()
            .copied()
            .find(|l| l.as_str() == name)
            .ok_or_else(|| ValidationError::UnknownLocation(name.to_string()))
    }
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One water-quality reading. Identity for duplicate detection is
/// `(timestamp, parameter)`; `safe_min`/`safe_max` ride along so downstream
/// consumers can flag excursions without a lookup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityRecord {
    pub timestamp: DateTime<Utc>,
    pub parameter_name: Parameter,
    pub value: f64,
    pub safe_min: f64,
    pub safe_max: f64,
}

impl QualityRecord {
    pub fn new(
        timestamp: DateTime<Utc>,
        parameter_name: Parameter,
        value: f64,
    ) -> Result<Self, ValidationError> {
        if !value.is_finite() {
            return Err(ValidationError::NonFiniteValue {
                parameter: parameter_name,
                value,
            });
        }
        let (safe_min, safe_max) = parameter_name.safe_range();
        Ok(Self {
            timestamp,
            parameter_name,
            value,
            safe_min,
            safe_max,
        })
    }

    pub fn identity(&self) -> (DateTime<Utc>, Parameter) {
        (self.timestamp, self.parameter_name)
    }

    pub fn in_safe_range(&self) -> bool {
        self.value >= self.safe_min && self.value <= self.safe_max
    }
}

/// One totalizer reading from an intake source. Identity is
/// `(timestamp, location)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowRecord {
    pub timestamp: DateTime<Utc>,
    pub location_name: Location,
    pub totalizer: f64,
}

impl FlowRecord {
    pub fn new(
        timestamp: DateTime<Utc>,
        location_name: Location,
        totalizer: f64,
    ) -> Result<Self, ValidationError> {
        if !totalizer.is_finite() || totalizer < 0.0 {
            return Err(ValidationError::InvalidTotalizer {
                location: location_name,
                totalizer,
            });
        }
        Ok(Self {
            timestamp,
            location_name,
            totalizer,
        })
    }

    pub fn identity(&self) -> (DateTime<Utc>, Location) {
        (self.timestamp, self.location_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 14, 8, 30, 0).single().unwrap()
    }

    #[test]
    fn parameter_names_round_trip() {
        for p in Parameter::ALL {
            assert_eq!(Parameter::from_name(p.as_str()).unwrap(), p);
        }
    }

    #[test]
    fn location_names_round_trip() {
        for l in Location::ALL {
            assert_eq!(Location::from_name(l.as_str()).unwrap(), l);
        }
    }

    #[test]
    fn unknown_names_are_rejected() {
        assert_eq!(
            Parameter::from_name("TURBIDITY"),
            Err(ValidationError::UnknownParameter("TURBIDITY".to_string()))
        );
        assert_eq!(
            Location::from_name("Unknown Source"),
            Err(ValidationError::UnknownLocation("Unknown Source".to_string()))
        );
    }

    #[test]
    fn quality_record_carries_seeded_safe_range() {
        let record = QualityRecord::new(ts(), Parameter::StpBod, 3.2).unwrap();
        assert_eq!(record.safe_min, 0.0);
        assert_eq!(record.safe_max, 5.0);
        assert!(record.in_safe_range());

        let high = QualityRecord::new(ts(), Parameter::StpBod, 7.5).unwrap();
        assert!(!high.in_safe_range());
    }

    #[test]
    fn non_finite_values_are_rejected() {
        assert!(QualityRecord::new(ts(), Parameter::Humidity, f64::NAN).is_err());
        assert!(QualityRecord::new(ts(), Parameter::Humidity, f64::INFINITY).is_err());
    }

    #[test]
    fn negative_totalizer_is_rejected() {
        assert!(FlowRecord::new(ts(), Location::CorporationWater, -1.0).is_err());
        assert!(FlowRecord::new(ts(), Location::CorporationWater, 0.0).is_ok());
    }

    #[test]
    fn serde_uses_schema_names() {
        let record = QualityRecord::new(ts(), Parameter::EtpTds, 512.0).unwrap();
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["parameter_name"], "ETP (TDS)");

        let flow = FlowRecord::new(ts(), Location::TankerWaterSupply, 1200.5).unwrap();
        let json = serde_json::to_value(&flow).unwrap();
        assert_eq!(json["location_name"], "Tanker Water Supply");
    }
}
