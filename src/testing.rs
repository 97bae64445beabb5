//! Shared test projects.
use crate::store::{Args, Calculation, Project, Scope, Verification};
use crate::value::{Record, Value, ValueKind};

pub const SOLAR_CONSTANT: f64 = 1361.0;

/// Power feeds Thermal: panel heat drives the spacecraft temperature.
pub fn satellite() -> Project {
    let power = Scope::new("Power")
        .unwrap()
        .model(Record::new().with("solar_panel_area", 10.0).with("solar_panel_efficiency", 0.2))
        .calculation(
            Calculation::new("calculate_solar_panel", |a: &Args| {
                let area = a.number("area")?;
                let efficiency = a.number("efficiency")?;
                Ok(Record::new()
                    .with("power_generated", area * SOLAR_CONSTANT * efficiency)
                    .with("heat_generated", area * SOLAR_CONSTANT * (1.0 - efficiency))
                    .into())
            })
            .param("area", "$.solar_panel_area")
            .param("efficiency", "$.solar_panel_efficiency")
            .output(ValueKind::Record),
        );

    let thermal = Scope::new("Thermal")
        .unwrap()
        .import("Power")
        .model(Record::new().with("thermal_coefficient", 0.01))
        .calculation(
            Calculation::new("calculate_temperature", |a: &Args| {
                let temperature = a.number("heat")? * a.number("coefficient")?;
                Ok(Record::new().with("temperature", temperature).into())
            })
            .param("heat", "Power::@calculate_solar_panel.heat_generated")
            .param("coefficient", "$.thermal_coefficient")
            .output(ValueKind::Record),
        )
        .verification(
            Verification::new("temperature_within_limits", |a: &Args| {
                Ok(Value::Bool(a.number("temperature")? < 150.0))
            })
            .param("temperature", "@calculate_temperature.temperature"),
        );

    Project::new("satellite").with_scope(power).with_scope(thermal)
}
