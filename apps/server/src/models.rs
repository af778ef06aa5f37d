use serde::{Deserialize, Serialize};

// ── Database models ──

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Employee {
    pub id: i64,
    pub display_name: String,
    pub bio: String,
    pub is_active: bool,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Service {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub created_at: String,
}

/// One employee's offering of a service. Price and duration live here,
/// not on the service itself.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct EmployeeService {
    pub id: i64,
    pub employee_id: i64,
    pub service_id: i64,
    pub service_name: String,
    pub price: i64,
    pub duration_minutes: i64,
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct DayOff {
    pub id: i64,
    pub employee_id: i64,
    pub date_off: String,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Client {
    pub id: i64,
    pub full_name: String,
    pub phone: String,
    pub email: Option<String>,
    pub notes: Option<String>,
    pub telegram_chat_id: Option<i64>,
    pub telegram_username: Option<String>,
    pub preferred_channel: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct MessageTemplate {
    pub id: i64,
    pub name: String,
    pub trigger_condition: String,
    pub channel: String,
    pub subject: Option<String>,
    pub body: String,
    pub is_active: bool,
}

/// An occupied [start, end) range for one employee, as local-time
/// 'YYYY-MM-DD HH:MM:SS' strings.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct BusyInterval {
    pub start_at: String,
    pub end_at: String,
}

/// Joined appointment view used by staff listings and the notification
/// worker (client + employee + service resolved by name).
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct AppointmentDetail {
    pub id: i64,
    pub client_id: i64,
    pub client_name: String,
    pub employee_name: String,
    pub service_name: String,
    pub scheduled_at: String,
    pub duration_minutes: i64,
    pub price: i64,
    pub status: String,
    pub admin_notes: Option<String>,
    pub employee_notes: Option<String>,
}

// ── API request/response types ──

#[derive(Debug, Deserialize)]
pub struct AvailableTimesQuery {
    pub employee_id: i64,
    pub employee_service_id: i64,
    pub date: String,
}

#[derive(Debug, Serialize)]
pub struct AvailableTimesResponse {
    pub times: Vec<String>,
    /// True when the busy-interval source failed and the full slot grid is
    /// shown unfiltered. The UI should offer a retry, not block booking.
    pub degraded: bool,
}

#[derive(Debug, Deserialize)]
pub struct CreateAppointmentRequest {
    pub employee_id: i64,
    pub employee_service_id: i64,
    pub date: String,
    pub time: String,
    pub client_name: String,
    pub client_phone: String,
    #[serde(default)]
    pub client_email: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CreateAppointmentResponse {
    pub appointment_id: i64,
    pub status: String,
}

/// Admin-side booking for an existing client. Staff bookings start
/// confirmed and send no confirmation message.
#[derive(Debug, Deserialize)]
pub struct CreateStaffAppointmentRequest {
    pub client_id: i64,
    pub employee_id: i64,
    pub employee_service_id: i64,
    pub date: String,
    pub time: String,
}

#[derive(Debug, Deserialize)]
pub struct ClientsQuery {
    /// Matches against name or phone.
    pub q: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateServiceRequest {
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateEmployeeRequest {
    pub display_name: String,
    pub bio: Option<String>,
    pub api_key: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateEmployeeRequest {
    pub display_name: Option<String>,
    pub bio: Option<String>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct UpsertOfferingRequest {
    pub service_id: i64,
    pub price: i64,
    pub duration_minutes: i64,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct CreateDayOffRequest {
    pub employee_id: i64,
    pub date_off: String,
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateTemplateRequest {
    pub name: String,
    pub trigger_condition: String,
    pub channel: String,
    pub subject: Option<String>,
    pub body: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateTemplateRequest {
    pub name: Option<String>,
    pub subject: Option<String>,
    pub body: Option<String>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateClientNotesRequest {
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AppointmentsQuery {
    pub date: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateNotesRequest {
    pub admin_notes: Option<String>,
    pub employee_notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SendNotificationRequest {
    pub client_id: i64,
    pub message: String,
    pub force_channel: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub ok: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}
