use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttendanceStatus {
    pub today: String,
    pub checked_in_today: bool,
    pub streak_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttendanceCheckIn {
    #[serde(flatten)]
    pub status: AttendanceStatus,
    pub already_checked_in: bool,
}
