//! Data models for LovelyBridge API entities.
//!
//! - `LoginRequest`, `LoginResponse`, `RegisterRequest`: account access
//! - `Profile`, `Gender`: profile setup
//! - `CoupleRequest`, `CoupleStatus`: couple pairing
//! - `AttendanceStatus`: daily check-in streaks
//! - `Memory`, `MemoryQuery`: shared memory notes

pub mod account;
pub mod attendance;
pub mod couple;
pub mod memory;
pub mod profile;

pub use account::{
    LoginRequest, LoginResponse, PasswordChangeRequest, PasswordChangeResponse,
    PasswordVerifyResponse, RegisterRequest, RegisterResponse,
};
pub use attendance::{AttendanceCheckIn, AttendanceStatus};
pub use couple::{CoupleRequest, CoupleRequestStatus, CoupleStatus};
pub use memory::{Memory, MemoryOrdering, MemoryQuery, MemoryUpdate, NewMemory};
pub use profile::{Gender, Profile, ProfileUpdate};
