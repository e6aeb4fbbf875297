//! The lead record and its wire encoding.

use serde::Serialize;

use crate::error::SubmissionError;
use crate::form::{Field, FormState};

/// Content type sent with form-urlencoded lead bodies.
pub const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded;charset=UTF-8";

/// One prospect's contact details, built fresh for each submit.
///
/// Serializes in key order `name`, `email`, `phone`, `ip`. Absent values are
/// sent as empty strings; no key is ever omitted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LeadRecord {
    pub name: String,
    pub email: String,
    pub phone: String,
    #[serde(rename = "ip")]
    pub client_address: String,
}

impl LeadRecord {
    /// Snapshot the form plus whatever client address is known right now.
    #[must_use]
    pub fn from_form(form: &FormState, client_address: Option<&str>) -> Self {
        Self {
            name: form.get(Field::Name).to_owned(),
            email: form.get(Field::Email).to_owned(),
            phone: form.get(Field::Phone).to_owned(),
            client_address: client_address.unwrap_or_default().to_owned(),
        }
    }

    /// Key/value pairs in wire order.
    #[must_use]
    pub fn pairs(&self) -> [(&'static str, &str); 4] {
        [
            ("name", self.name.as_str()),
            ("email", self.email.as_str()),
            ("phone", self.phone.as_str()),
            ("ip", self.client_address.as_str()),
        ]
    }
}

/// An encoded lead, ready to hand to a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeadPayload {
    record: LeadRecord,
    body: String,
}

impl LeadPayload {
    /// Form-urlencode `record`.
    ///
    /// # Errors
    ///
    /// Returns [`SubmissionError::Encode`] if serialization fails.
    pub fn encode(record: LeadRecord) -> Result<Self, SubmissionError> {
        let body = serde_urlencoded::to_string(&record)?;
        Ok(Self { record, body })
    }

    /// The `application/x-www-form-urlencoded` body.
    #[must_use]
    pub fn body(&self) -> &str {
        &self.body
    }

    /// Build a `multipart/form-data` body with one text part per key.
    #[must_use]
    pub fn to_multipart(&self) -> reqwest::multipart::Form {
        self.record
            .pairs()
            .into_iter()
            .fold(reqwest::multipart::Form::new(), |form, (key, value)| {
                form.text(key, value.to_owned())
            })
    }
}
