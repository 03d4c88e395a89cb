use crate::repository::{StoreError, UserRepository};
use chrono::{DateTime, Utc};
use eduvision_core::{AttendanceError, AttendanceService, IdentityDirectory, UserId};

impl From<StoreError> for AttendanceError {
    fn from(e: StoreError) -> Self {
        AttendanceError::Storage(Box::new(e))
    }
}

impl AttendanceService for UserRepository {
    fn mark_attended(&self, user_id: UserId, at: DateTime<Utc>) -> Result<(), AttendanceError> {
        if self.record_attendance(user_id, at)? {
            Ok(())
        } else {
            Err(AttendanceError::UnknownIdentity(user_id))
        }
    }

    fn last_attendance_time(&self, user_id: UserId) -> Result<Option<DateTime<Utc>>, AttendanceError> {
        Ok(self.last_attendance(user_id)?)
    }
}

impl IdentityDirectory for UserRepository {
    fn display_name(&self, user_id: UserId) -> Result<Option<String>, AttendanceError> {
        Ok(self.find_by_id(user_id)?.map(|u| u.display_name()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::NewUser;
    use chrono::TimeZone;

    #[test]
    fn test_mark_attended_unknown_identity() {
        let repo = UserRepository::open_in_memory().unwrap();
        let at = Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap();
        let err = repo.mark_attended(42, at).unwrap_err();
        assert!(matches!(err, AttendanceError::UnknownIdentity(42)));
    }

    #[test]
    fn test_service_and_directory() {
        let repo = UserRepository::open_in_memory().unwrap();
        let u = repo
            .create(NewUser {
                name: "Ivan".into(),
                surname: "Petrov".into(),
                group: "IVT-21".into(),
                ..NewUser::default()
            })
            .unwrap();
        let at = Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap();

        assert_eq!(repo.last_attendance_time(u.id).unwrap(), None);
        repo.mark_attended(u.id, at).unwrap();
        assert_eq!(repo.last_attendance_time(u.id).unwrap(), Some(at));

        assert_eq!(repo.display_name(u.id).unwrap().as_deref(), Some("Ivan Petrov IVT-21"));
        assert_eq!(repo.display_name(u.id + 1).unwrap(), None);
    }
}
