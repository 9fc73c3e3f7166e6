//! # Dashboard Handlers
//!
//! Overview counts for the clinic home screen, either once or as a live stream that
//! follows the patients and funnel collections, and the tenant's integration details.

use axum::{
    extract::State,
    http::{HeaderMap, header::HOST},
    response::{
        Json,
        sse::{Event, KeepAlive, Sse},
    },
};
use futures::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::debug;
use utoipa::ToSchema;

use super::streams::KEEP_ALIVE_INTERVAL;
use crate::auth::AuthenticatedTenant;
use crate::error::ApiError;
use crate::models::{Collection, Deal, DealStatus, Patient, PatientStatus, Record, TenantId};
use crate::relay::{LiveRelay, Subscription};
use crate::server::AppState;
use crate::store::{Snapshot, SnapshotQuery};

pub const SUMMARY_EVENT: &str = "summary";

/// Origin advertised to local development setups.
pub const LOCAL_WEBHOOK_ORIGIN: &str = "http://localhost:3001";

/// Headline numbers shown on the dashboard
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DashboardSummary {
    pub total_patients: usize,
    /// Patients with status `Agendado`
    pub scheduled_patients: usize,
    pub total_deals: usize,
    /// Deals with status `Finalizados`
    pub finished_deals: usize,
    /// Sum of every deal value
    pub total_revenue: f64,
    /// Rounded percentage of finished deals, 0 without deals
    pub conversion_rate: u32,
}

impl DashboardSummary {
    pub fn compute(patients: &[Patient], deals: &[Deal]) -> Self {
        let scheduled_patients = patients
            .iter()
            .filter(|patient| patient.status == PatientStatus::Agendado)
            .count();
        let finished_deals = deals
            .iter()
            .filter(|deal| deal.status == DealStatus::Finalizados)
            .count();
        let total_revenue = deals.iter().map(|deal| deal.value).sum();
        let conversion_rate = if deals.is_empty() {
            0
        } else {
            ((finished_deals as f64 / deals.len() as f64) * 100.0).round() as u32
        };

        Self {
            total_patients: patients.len(),
            scheduled_patients,
            total_deals: deals.len(),
            finished_deals,
            total_revenue,
            conversion_rate,
        }
    }

    /// Same counts straight from stored records; records that are not valid patients or
    /// deals are skipped.
    pub fn from_records(patients: &[Record], deals: &[Record]) -> Self {
        let patients: Vec<Patient> = patients.iter().filter_map(Patient::from_record).collect();
        let deals: Vec<Deal> = deals.iter().filter_map(Deal::from_record).collect();
        Self::compute(&patients, &deals)
    }
}

/// Recomputes the summary from live snapshots of a tenant's patients and funnel.
pub struct SummaryFeed {
    patients: Subscription,
    deals: Subscription,
    patient_snapshots: UnboundedReceiver<Snapshot>,
    deal_snapshots: UnboundedReceiver<Snapshot>,
    latest_patients: Option<Vec<Record>>,
    latest_deals: Option<Vec<Record>>,
    last_sent: Option<DashboardSummary>,
}

impl SummaryFeed {
    pub fn subscribe(relay: &LiveRelay, tenant: &TenantId) -> Self {
        let (patients, patient_snapshots) = relay.subscribe_channel(
            tenant.collection(Collection::Patients),
            SnapshotQuery::newest_first(),
        );
        let (deals, deal_snapshots) = relay.subscribe_channel(
            tenant.collection(Collection::Funnel),
            SnapshotQuery::newest_first(),
        );
        Self {
            patients,
            deals,
            patient_snapshots,
            deal_snapshots,
            latest_patients: None,
            latest_deals: None,
            last_sent: None,
        }
    }

    /// Next changed summary. The first one waits for both collections; `None` once either
    /// subscription has ended.
    pub async fn next(&mut self) -> Option<DashboardSummary> {
        loop {
            tokio::select! {
                snapshot = self.patient_snapshots.recv() => {
                    self.latest_patients = Some(snapshot?.records);
                }
                snapshot = self.deal_snapshots.recv() => {
                    self.latest_deals = Some(snapshot?.records);
                }
            }

            let (Some(patients), Some(deals)) = (&self.latest_patients, &self.latest_deals) else {
                continue;
            };
            let summary = DashboardSummary::from_records(patients, deals);
            if self.last_sent.as_ref() != Some(&summary) {
                self.last_sent = Some(summary.clone());
                return Some(summary);
            }
        }
    }

    pub fn subscription_ids(&self) -> (u64, u64) {
        (self.patients.id(), self.deals.id())
    }
}

/// Where external systems should send the tenant's webhooks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct IntegrationInfo {
    #[schema(example = "https://clinic.example.com/webhook/clinic123")]
    pub webhook_url: String,
}

/// Dashboard summary for the authenticated clinic
#[utoipa::path(
    get,
    path = "/dashboard/summary",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Dashboard counts", body = DashboardSummary),
        (status = 401, description = "Unauthorized", body = ApiError),
        (status = 503, description = "Store unavailable", body = ApiError)
    ),
    tag = "dashboard"
)]
pub async fn summary(
    State(state): State<AppState>,
    tenant: AuthenticatedTenant,
) -> Result<Json<DashboardSummary>, ApiError> {
    let query = SnapshotQuery::newest_first();
    let patients = state
        .store
        .query(&tenant.collection(Collection::Patients), &query)
        .await?;
    let deals = state
        .store
        .query(&tenant.collection(Collection::Funnel), &query)
        .await?;

    Ok(Json(DashboardSummary::from_records(&patients, &deals)))
}

/// Live dashboard summary as `text/event-stream`
#[utoipa::path(
    get,
    path = "/dashboard/summary/stream",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Stream of `summary` events carrying DashboardSummary", content_type = "text/event-stream", body = String),
        (status = 401, description = "Unauthorized", body = ApiError)
    ),
    tag = "dashboard"
)]
pub async fn stream_summary(
    State(state): State<AppState>,
    tenant: AuthenticatedTenant,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    let feed = SummaryFeed::subscribe(&state.relay, tenant.tenant());
    let (patients_id, deals_id) = feed.subscription_ids();
    debug!(patients_id, deals_id, "Summary stream opened");

    let events = stream::unfold(feed, |mut feed| async move {
        let summary = feed.next().await?;
        let event = Event::default().event(SUMMARY_EVENT).json_data(&summary);
        Some((event, feed))
    });
    Sse::new(events).keep_alive(KeepAlive::new().interval(KEEP_ALIVE_INTERVAL))
}

/// Webhook URL for the authenticated clinic
#[utoipa::path(
    get,
    path = "/integration",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Integration details", body = IntegrationInfo),
        (status = 401, description = "Unauthorized", body = ApiError)
    ),
    tag = "dashboard"
)]
pub async fn integration(
    State(state): State<AppState>,
    tenant: AuthenticatedTenant,
    headers: HeaderMap,
) -> Json<IntegrationInfo> {
    let origin = if state.config.is_local() {
        LOCAL_WEBHOOK_ORIGIN.to_string()
    } else {
        request_origin(&headers).unwrap_or_else(|| format!("http://{}", state.config.api_bind_addr))
    };

    Json(IntegrationInfo {
        webhook_url: format!("{}/webhook/{}", origin.trim_end_matches('/'), tenant.tenant()),
    })
}

/// Origin the client used to reach this server, honouring reverse-proxy headers.
fn request_origin(headers: &HeaderMap) -> Option<String> {
    let host = first_value(headers, "x-forwarded-host")
        .or_else(|| first_value(headers, HOST.as_str()))?;
    let scheme = first_value(headers, "x-forwarded-proto").unwrap_or("http");
    Some(format!("{scheme}://{host}"))
}

/// First entry of a possibly comma-separated header.
fn first_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}
