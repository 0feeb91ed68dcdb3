//! Extraction schemas per scenario.
//!
//! Each scenario declares the fields the finalized call record should
//! carry. Required fields that extraction cannot fill are recorded as
//! null rather than failing the record. Terminal fields lock once set
//! (see `session::TERMINAL_FIELDS`).

use crate::session::{Scenario, TERMINAL_FIELDS};

/// One field of a scenario's extraction schema.
#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub name: &'static str,
    pub required: bool,
    /// Human-readable hint handed to the extraction collaborator.
    pub description: &'static str,
}

impl FieldSpec {
    pub fn is_terminal(&self) -> bool {
        TERMINAL_FIELDS.contains(&self.name)
    }
}

const CHECK_IN_SCHEMA: &[FieldSpec] = &[
    FieldSpec {
        name: "call_outcome",
        required: true,
        description: "\"In-Transit Update\" or \"Arrival Confirmation\"",
    },
    FieldSpec {
        name: "driver_status",
        required: true,
        description: "One of \"Driving\", \"Delayed\", \"Arrived\", \"Unloading\"",
    },
    FieldSpec {
        name: "current_location",
        required: false,
        description: "Driver's current location, e.g. \"I-10 near Indio, CA\"",
    },
    FieldSpec {
        name: "eta",
        required: false,
        description: "Estimated time of arrival, e.g. \"Tomorrow, 8:00 AM\"",
    },
    FieldSpec {
        name: "delay_reason",
        required: false,
        description: "\"Heavy Traffic\", \"Weather\", \"Mechanical\", \"None\" or \"Other\"",
    },
    FieldSpec {
        name: "unloading_status",
        required: false,
        description: "Unloading status if arrived, e.g. \"In Door 42\"",
    },
    FieldSpec {
        name: "pod_reminder_acknowledged",
        required: true,
        description: "Whether the driver acknowledged the POD reminder",
    },
];

const EMERGENCY_SCHEMA: &[FieldSpec] = &[
    FieldSpec {
        name: "call_outcome",
        required: true,
        description: "Always \"Emergency Escalation\"",
    },
    FieldSpec {
        name: "emergency_type",
        required: true,
        description: "One of \"Accident\", \"Breakdown\", \"Medical\", \"Other\"",
    },
    FieldSpec {
        name: "safety_status",
        required: true,
        description: "Driver's safety status, e.g. \"Driver confirmed safe\"",
    },
    FieldSpec {
        name: "injury_status",
        required: true,
        description: "Injury status, e.g. \"No injuries reported\"",
    },
    FieldSpec {
        name: "emergency_location",
        required: true,
        description: "Exact emergency location, e.g. \"I-15 North, Mile Marker 123\"",
    },
    FieldSpec {
        name: "load_secure",
        required: true,
        description: "Whether the load is secure",
    },
    FieldSpec {
        name: "escalation_status",
        required: true,
        description: "Always \"Connected to Human Dispatcher\"",
    },
];

const DELIVERY_SCHEMA: &[FieldSpec] = &[
    FieldSpec {
        name: "call_outcome",
        required: true,
        description: "\"Delivery Confirmed\" or \"Delivery Issues\"",
    },
    FieldSpec {
        name: "delivery_time",
        required: false,
        description: "When delivery was completed",
    },
    FieldSpec {
        name: "pod_received",
        required: true,
        description: "Whether the POD was received",
    },
    FieldSpec {
        name: "pod_number",
        required: false,
        description: "POD reference number, if provided",
    },
    FieldSpec {
        name: "delivery_issues",
        required: false,
        description: "Any issues during delivery",
    },
];

/// Schema for the given scenario. `Custom` calls fall back to the
/// check-in schema.
pub fn schema_for(scenario: Scenario) -> &'static [FieldSpec] {
    match scenario {
        Scenario::CheckIn | Scenario::Custom => CHECK_IN_SCHEMA,
        Scenario::Emergency => EMERGENCY_SCHEMA,
        Scenario::Delivery => DELIVERY_SCHEMA,
    }
}

/// Renders the schema as a prompt-friendly JSON sketch for the
/// extraction collaborator.
pub fn schema_description(scenario: Scenario) -> String {
    let mut lines = vec!["{".to_string()];
    for field in schema_for(scenario) {
        let nullable = if field.required { "" } else { " or null" };
        lines.push(format!(
            "  \"{}\"{}: {}",
            field.name, nullable, field.description
        ));
    }
    lines.push("}".to_string());
    lines.join("\n")
}
