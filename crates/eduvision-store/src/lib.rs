//! eduvision-store — SQLite persistence for users and attendance.
//!
//! [`UserRepository`] is also the production [`eduvision_core::AttendanceService`].

pub mod report;
pub mod repository;
mod service;

pub use report::{daily_counts, GroupAttendance, StudentAttendance};
pub use repository::{NewUser, StoreError, User, UserRepository};
