use crate::core::{CycleId, EnrollmentState, Result, TrusteeId, UserId, Verdict, VigilError};
use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

lazy_static! {
    static ref EMAIL: Regex =
        Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("email pattern is valid");
}

/// Lowercases and trims a contact address, rejecting anything that is not
/// shaped like an email.
pub fn normalize_contact(contact: &str) -> Result<String> {
    let normalized = contact.trim().to_ascii_lowercase();
    if EMAIL.is_match(&normalized) {
        Ok(normalized)
    } else {
        Err(VigilError::Validation(format!(
            "'{}' is not a valid contact email",
            contact.trim()
        )))
    }
}

/// A response recorded against one verification cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleResponse {
    pub cycle_id: CycleId,
    pub verdict: Verdict,
    pub recorded_at: DateTime<Utc>,
}

/// A designated trustee of one owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrusteeRelationship {
    trustee_id: TrusteeId,
    owner_user_id: UserId,
    contact: String,
    relation_label: String,
    enrollment_state: EnrollmentState,
    response: Option<CycleResponse>,
    invited_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TrusteeRelationship {
    pub(crate) fn invited(
        owner_user_id: UserId,
        contact: String,
        relation_label: String,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            trustee_id: TrusteeId::new(),
            owner_user_id,
            contact,
            relation_label,
            enrollment_state: EnrollmentState::Invited,
            response: None,
            invited_at: now,
            updated_at: now,
        }
    }

    pub fn trustee_id(&self) -> TrusteeId {
        self.trustee_id
    }

    pub fn owner_user_id(&self) -> &UserId {
        &self.owner_user_id
    }

    pub fn contact(&self) -> &str {
        &self.contact
    }

    pub fn relation_label(&self) -> &str {
        &self.relation_label
    }

    pub fn enrollment_state(&self) -> EnrollmentState {
        self.enrollment_state
    }

    #[inline]
    pub fn is_accepted(&self) -> bool {
        self.enrollment_state == EnrollmentState::Accepted
    }

    /// Last recorded response, whatever cycle it belongs to.
    pub fn last_response(&self) -> Option<&CycleResponse> {
        self.response.as_ref()
    }

    /// The verdict recorded for `cycle_id`; responses to other cycles are
    /// inert and read as `None`.
    pub fn response_for(&self, cycle_id: CycleId) -> Option<Verdict> {
        self.response
            .as_ref()
            .filter(|r| r.cycle_id == cycle_id)
            .map(|r| r.verdict)
    }

    pub fn invited_at(&self) -> DateTime<Utc> {
        self.invited_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub(crate) fn set_relation_label(&mut self, label: String, now: DateTime<Utc>) {
        self.relation_label = label;
        self.updated_at = now;
    }

    /// Back to INVITED after a decline or removal. Any old response is
    /// dropped with it.
    pub(crate) fn reinvite(&mut self, now: DateTime<Utc>) {
        self.enrollment_state = EnrollmentState::Invited;
        self.response = None;
        self.invited_at = now;
        self.updated_at = now;
    }

    pub(crate) fn set_enrollment(&mut self, state: EnrollmentState, now: DateTime<Utc>) {
        self.enrollment_state = state;
        self.updated_at = now;
    }

    /// Overwrites any earlier response; there is one slot per trustee.
    pub(crate) fn set_response(&mut self, cycle_id: CycleId, verdict: Verdict, now: DateTime<Utc>) {
        self.response = Some(CycleResponse {
            cycle_id,
            verdict,
            recorded_at: now,
        });
        self.updated_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contacts_are_normalized() {
        assert_eq!(
            normalize_contact("  Alice@Example.COM ").unwrap(),
            "alice@example.com"
        );
        assert!(matches!(
            normalize_contact("not an email"),
            Err(VigilError::Validation(_))
        ));
        assert!(normalize_contact("a@b").is_err());
    }

    #[test]
    fn responses_are_scoped_to_their_cycle() {
        let now = Utc::now();
        let mut trustee = TrusteeRelationship::invited(
            UserId::from("owner"),
            "t@example.com".into(),
            "sibling".into(),
            now,
        );
        let c1 = CycleId::new();
        let c2 = CycleId::new();

        trustee.set_response(c1, Verdict::ConfirmedIncapacitated, now);
        assert_eq!(trustee.response_for(c1), Some(Verdict::ConfirmedIncapacitated));
        assert_eq!(trustee.response_for(c2), None);

        trustee.set_response(c1, Verdict::Vetoed, now);
        assert_eq!(trustee.response_for(c1), Some(Verdict::Vetoed));
    }
}
