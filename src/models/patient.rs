//! Typed view over `patients` records.

use serde::Serialize;
use utoipa::ToSchema;

use super::document::Record;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
pub enum PatientStatus {
    Lead,
    Agendado,
    #[serde(rename = "Em Tratamento")]
    EmTratamento,
    Finalizado,
}

impl PatientStatus {
    pub const ALL: [PatientStatus; 4] = [
        PatientStatus::Lead,
        PatientStatus::Agendado,
        PatientStatus::EmTratamento,
        PatientStatus::Finalizado,
    ];

    pub const LABELS: [&'static str; 4] = ["Lead", "Agendado", "Em Tratamento", "Finalizado"];

    pub fn label(self) -> &'static str {
        match self {
            PatientStatus::Lead => "Lead",
            PatientStatus::Agendado => "Agendado",
            PatientStatus::EmTratamento => "Em Tratamento",
            PatientStatus::Finalizado => "Finalizado",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|status| status.label() == label)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Patient {
    pub id: String,
    pub name: String,
    pub email: String,
    pub phone: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpf: Option<String>,
    pub status: PatientStatus,
}

impl Patient {
    /// `None` when the record does not carry a patient status.
    pub fn from_record(record: &Record) -> Option<Self> {
        let status = record.status.as_label().and_then(PatientStatus::from_label)?;
        let text = |key: &str| record.str_field(key).unwrap_or_default().to_string();
        Some(Self {
            id: record.id.clone(),
            name: text("name"),
            email: text("email"),
            phone: text("phone"),
            cpf: record.str_field("cpf").map(str::to_string),
            status,
        })
    }
}
