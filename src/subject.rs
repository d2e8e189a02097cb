//! Employee records and the reference entities they point at

use chrono::{DateTime, TimeZone, Utc};
use std::fmt;

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct TimeStamp<T: TimeZone>(DateTime<T>);

impl PartialOrd for TimeStamp<Utc> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimeStamp<Utc> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.cmp(&other.0)
    }
}

impl TimeStamp<Utc> {
    pub fn new() -> Self {
        Self(Utc::now())
    }
    pub fn new_with(year: i32, month: u32, day: u32, hour: u32, min: u32, sec: u32) -> Self {
        Utc.with_ymd_and_hms(year, month, day, hour, min, sec)
            .unwrap()
            .into()
    }
    pub fn to_datetime_utc(&self) -> DateTime<Utc> {
        self.0
    }
}

impl Default for TimeStamp<Utc> {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TimeStamp<Utc> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}

impl<T: TimeZone> From<DateTime<T>> for TimeStamp<T> {
    fn from(value: DateTime<T>) -> Self {
        TimeStamp(value)
    }
}

impl<C> minicbor::Encode<C> for TimeStamp<Utc> {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        if let Some(nsec) = self.0.timestamp_nanos_opt() {
            return e.i64(nsec)?.ok();
        }

        Err(minicbor::encode::Error::message(
            "failed to encode timestamp. timestamp_nanos_opt returned None",
        ))
    }
}

impl<'b, C> minicbor::Decode<'b, C> for TimeStamp<Utc> {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        let nsecs = d.i64()?;

        Ok(TimeStamp(DateTime::from_timestamp_nanos(nsecs)))
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmploymentStatus {
    #[n(0)]
    Active,
    #[n(1)]
    OnLeave,
    #[n(2)]
    Suspended,
    #[n(3)]
    Terminated,
}

impl fmt::Display for EmploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            EmploymentStatus::Active => "active",
            EmploymentStatus::OnLeave => "on_leave",
            EmploymentStatus::Suspended => "suspended",
            EmploymentStatus::Terminated => "terminated",
        };
        f.write_str(label)
    }
}

/// The kinds of reference entity a snapshot resolves display names from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefKind {
    Company,
    Department,
    Position,
    Grade,
}

impl RefKind {
    pub fn key_prefix(self) -> &'static str {
        match self {
            RefKind::Company => "co",
            RefKind::Department => "dept",
            RefKind::Position => "pos",
            RefKind::Grade => "grade",
        }
    }
}

impl fmt::Display for RefKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RefKind::Company => "company",
            RefKind::Department => "department",
            RefKind::Position => "position",
            RefKind::Grade => "grade",
        };
        f.write_str(label)
    }
}

/// A reference entity reduced to what the workflow needs: its id and the
/// display name that gets denormalized into snapshots.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct NamedRef {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub name: String,
}

impl NamedRef {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// The subject record targeted by change requests. Owned by the external
/// CRUD layer; the workflow only ever mutates it through an applied request.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct EmployeeRecord {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub name: String,
    #[n(2)]
    pub company_id: String,
    #[n(3)]
    pub department_id: String,
    #[n(4)]
    pub position_id: String,
    #[n(5)]
    pub grade_id: Option<String>,
    #[n(6)]
    pub salary: u64,
    #[n(7)]
    pub status: EmploymentStatus,
}

impl EmployeeRecord {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        company_id: impl Into<String>,
        department_id: impl Into<String>,
        position_id: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            company_id: company_id.into(),
            department_id: department_id.into(),
            position_id: position_id.into(),
            grade_id: None,
            salary: 0,
            status: EmploymentStatus::Active,
        }
    }
    pub fn set_grade(mut self, grade_id: impl Into<String>) -> Self {
        self.grade_id = Some(grade_id.into());
        self
    }
    pub fn set_salary(mut self, salary: u64) -> Self {
        self.salary = salary;
        self
    }
    pub fn set_status(mut self, status: EmploymentStatus) -> Self {
        self.status = status;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_encoding() {
        let original = TimeStamp::new();

        let encoding = minicbor::to_vec(&original).unwrap();
        let decode: TimeStamp<Utc> = minicbor::decode(&encoding).unwrap();

        assert_eq!(original, decode);
    }

    #[test]
    fn employee_encoding() {
        let original = EmployeeRecord::new("emp_1", "Sari", "co_1", "dept_1", "pos_1")
            .set_grade("grade_3")
            .set_salary(10_000_000);

        let encoding = minicbor::to_vec(&original).unwrap();
        let decode: EmployeeRecord = minicbor::decode(&encoding).unwrap();

        assert_eq!(original, decode);
    }
}
