//! Typed view over `funnel` records (the sales Kanban).

use serde::Serialize;
use serde_json::Value;
use utoipa::ToSchema;

use super::document::Record;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
pub enum DealStatus {
    Interessados,
    Agendados,
    #[serde(rename = "Em Tratamento")]
    EmTratamento,
    Finalizados,
}

impl DealStatus {
    pub const ALL: [DealStatus; 4] = [
        DealStatus::Interessados,
        DealStatus::Agendados,
        DealStatus::EmTratamento,
        DealStatus::Finalizados,
    ];

    pub const LABELS: [&'static str; 4] =
        ["Interessados", "Agendados", "Em Tratamento", "Finalizados"];

    pub fn label(self) -> &'static str {
        match self {
            DealStatus::Interessados => "Interessados",
            DealStatus::Agendados => "Agendados",
            DealStatus::EmTratamento => "Em Tratamento",
            DealStatus::Finalizados => "Finalizados",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|status| status.label() == label)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Deal {
    pub id: String,
    pub patient_name: String,
    pub value: f64,
    pub status: DealStatus,
}

impl Deal {
    pub fn from_record(record: &Record) -> Option<Self> {
        let status = record.status.as_label().and_then(DealStatus::from_label)?;
        Some(Self {
            id: record.id.clone(),
            patient_name: record.str_field("patientName").unwrap_or_default().to_string(),
            value: record.field("value").map(deal_value).unwrap_or(0.0),
            status,
        })
    }
}

/// Deal values arrive from forms as numbers or numeric strings; anything else counts as zero.
fn deal_value(value: &Value) -> f64 {
    match value {
        Value::Number(number) => number.as_f64().unwrap_or(0.0),
        Value::String(text) => text.trim().parse().unwrap_or(0.0),
        _ => 0.0,
    }
}
