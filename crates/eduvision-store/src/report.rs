//! Attendance reports for a group or a single student. Calendar days are
//! taken in the caller's time zone.

use crate::repository::{StoreError, User, UserRepository};
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// Visits per calendar day.
pub fn daily_counts<Tz: TimeZone>(visits: &[DateTime<Utc>], tz: &Tz) -> BTreeMap<NaiveDate, usize> {
    let mut days = BTreeMap::new();
    for visit in visits {
        *days.entry(visit.with_timezone(tz).date_naive()).or_insert(0) += 1;
    }
    days
}

#[derive(Debug, Clone, Serialize)]
pub struct StudentAttendance {
    pub user: User,
    pub visits: Vec<DateTime<Utc>>,
    pub per_day: BTreeMap<NaiveDate, usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GroupAttendance {
    pub group: String,
    /// Distinct students present on each day.
    pub present_per_day: BTreeMap<NaiveDate, usize>,
    pub students: Vec<StudentAttendance>,
}

impl UserRepository {
    pub fn student_attendance<Tz: TimeZone>(
        &self,
        name: &str,
        surname: &str,
        tz: &Tz,
    ) -> Result<Option<StudentAttendance>, StoreError> {
        let Some(user) = self.find_by_full_name(name, surname)? else {
            return Ok(None);
        };
        self.report_for(user, tz).map(Some)
    }

    pub fn group_attendance<Tz: TimeZone>(&self, group: &str, tz: &Tz) -> Result<GroupAttendance, StoreError> {
        let students = self
            .all_by_group(group)?
            .into_iter()
            .map(|user| self.report_for(user, tz))
            .collect::<Result<Vec<_>, _>>()?;

        let mut present: BTreeMap<NaiveDate, BTreeSet<i64>> = BTreeMap::new();
        for student in &students {
            for day in student.per_day.keys() {
                present.entry(*day).or_default().insert(student.user.id);
            }
        }

        Ok(GroupAttendance {
            group: group.to_string(),
            present_per_day: present.into_iter().map(|(d, ids)| (d, ids.len())).collect(),
            students,
        })
    }

    fn report_for<Tz: TimeZone>(&self, user: User, tz: &Tz) -> Result<StudentAttendance, StoreError> {
        let visits = self.attendance_for(user.id)?;
        let per_day = daily_counts(&visits, tz);
        Ok(StudentAttendance { user, visits, per_day })
    }
}
