//! Shortcut filters applied through the grid's `set_filter`.

#![forbid(unsafe_code)]

use std::str::FromStr;

use crate::query::{FilterPredicate, NumberOp, TextOp};
use crate::Collection;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum PresetError {
    #[error("not a finite number: {0}")]
    NotFinite(String),
    #[error("empty range: {min} > {max}")]
    EmptyRange { min: f64, max: f64 },
    #[error("missing value")]
    Empty,
    #[error("preset {preset} does not apply to {collection}")]
    NotApplicable { preset: &'static str, collection: Collection },
    #[error("unknown preset: {0} (expect fuel>N, type=T, power=MIN..MAX, x=N, y=N)")]
    Unknown(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum FilterPreset {
    FuelConsumptionAbove(f64),
    VehicleType(String),
    EnginePowerBetween { min: f64, max: f64 },
    CoordinateX(f64),
    CoordinateY(f64),
}

impl FilterPreset {
    pub fn name(&self) -> &'static str {
        match self {
            FilterPreset::FuelConsumptionAbove(_) => "fuel",
            FilterPreset::VehicleType(_) => "type",
            FilterPreset::EnginePowerBetween { .. } => "power",
            FilterPreset::CoordinateX(_) => "x",
            FilterPreset::CoordinateY(_) => "y",
        }
    }

    /// Resolve to the `(colId, predicate)` pair for a collection.
    pub fn build(&self, collection: Collection) -> Result<(String, FilterPredicate), PresetError> {
        let not_applicable = || PresetError::NotApplicable { preset: self.name(), collection };
        match (self, collection) {
            (FilterPreset::FuelConsumptionAbove(v), Collection::Vehicle) => {
                Ok(("fuelConsumption".into(), FilterPredicate::number(NumberOp::GreaterThan, finite(*v)?)))
            }
            (FilterPreset::VehicleType(t), Collection::Vehicle) => {
                let t = t.trim();
                if t.is_empty() {
                    return Err(PresetError::Empty);
                }
                Ok(("type".into(), FilterPredicate::text(TextOp::Equals, t)))
            }
            (FilterPreset::EnginePowerBetween { min, max }, Collection::Vehicle) => {
                let (min, max) = (finite(*min)?, finite(*max)?);
                if min > max {
                    return Err(PresetError::EmptyRange { min, max });
                }
                Ok(("enginePower".into(), FilterPredicate::number_range(min, max)))
            }
            (FilterPreset::CoordinateX(v), Collection::Vehicle) => {
                Ok(("coordinates.x".into(), FilterPredicate::number(NumberOp::Equals, finite(*v)?)))
            }
            (FilterPreset::CoordinateY(v), Collection::Vehicle) => {
                Ok(("coordinates.y".into(), FilterPredicate::number(NumberOp::Equals, finite(*v)?)))
            }
            (FilterPreset::CoordinateX(v), Collection::Coordinates) => {
                Ok(("x".into(), FilterPredicate::number(NumberOp::Equals, finite(*v)?)))
            }
            (FilterPreset::CoordinateY(v), Collection::Coordinates) => {
                Ok(("y".into(), FilterPredicate::number(NumberOp::Equals, finite(*v)?)))
            }
            _ => Err(not_applicable()),
        }
    }
}

fn finite(v: f64) -> Result<f64, PresetError> {
    if v.is_finite() { Ok(v) } else { Err(PresetError::NotFinite(v.to_string())) }
}

fn parse_num(s: &str) -> Result<f64, PresetError> {
    let s = s.trim();
    if s.is_empty() {
        return Err(PresetError::Empty);
    }
    s.parse::<f64>().map_err(|_| PresetError::NotFinite(s.to_string())).and_then(finite)
}

/// `fuel>1.5`, `type=CAR`, `power=100..200`, `x=5`, `y=-3`.
impl FromStr for FilterPreset {
    type Err = PresetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some(v) = s.strip_prefix("fuel>") {
            return Ok(FilterPreset::FuelConsumptionAbove(parse_num(v)?));
        }
        let Some((key, val)) = s.split_once('=') else { return Err(PresetError::Unknown(s.to_string())) };
        match key.trim() {
            "type" => Ok(FilterPreset::VehicleType(val.trim().to_string())),
            "power" => {
                let (lo, hi) = val.split_once("..").ok_or(PresetError::Empty)?;
                Ok(FilterPreset::EnginePowerBetween { min: parse_num(lo)?, max: parse_num(hi)? })
            }
            "x" => Ok(FilterPreset::CoordinateX(parse_num(val)?)),
            "y" => Ok(FilterPreset::CoordinateY(parse_num(val)?)),
            _ => Err(PresetError::Unknown(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coordinate_preset_targets_nested_column_on_vehicles() {
        let p: FilterPreset = "x=5".parse().unwrap();
        let (col, _) = p.build(Collection::Vehicle).unwrap();
        assert_eq!(col, "coordinates.x");
        let (col, _) = p.build(Collection::Coordinates).unwrap();
        assert_eq!(col, "x");
        assert!(matches!(p.build(Collection::Person), Err(PresetError::NotApplicable { .. })));
    }

    #[test]
    fn engine_range_rejects_inverted_bounds() {
        let p: FilterPreset = "power=200..100".parse().unwrap();
        assert_eq!(p.build(Collection::Vehicle), Err(PresetError::EmptyRange { min: 200.0, max: 100.0 }));
        assert!("fuel>abc".parse::<FilterPreset>().is_err());
        assert!("type=  ".parse::<FilterPreset>().unwrap().build(Collection::Vehicle).is_err());
    }
}
