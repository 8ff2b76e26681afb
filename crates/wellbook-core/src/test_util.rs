use chrono::NaiveDate;

use crate::upsert::{EntityId, ProductionReading, WellCategory};

/// A day in March 2025.
pub(crate) fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 3, d).expect("valid day of march")
}

/// Identity for a `well_<n>` name, whatever its number.
pub(crate) fn well(name: &str) -> EntityId {
    WellCategory {
        prefix: "well_".to_string(),
        min: 0,
        max: u32::MAX,
    }
    .parse(name)
    .expect("well_<n> name")
}

/// Production reading without status or RPM.
pub(crate) fn production(oil: Option<f64>, water: Option<f64>, gas: Option<f64>) -> ProductionReading {
    ProductionReading {
        oil,
        water,
        gas,
        ..ProductionReading::default()
    }
}
