//! Form field state and the readiness gate.

use std::fmt;
use std::str::FromStr;

/// An editable lead field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Name,
    Email,
    Phone,
}

impl Field {
    /// All fields in form order.
    pub const ALL: [Self; 3] = [Self::Name, Self::Email, Self::Phone];

    /// The form input name, also used as the payload key.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Name => "name",
            Self::Email => "email",
            Self::Phone => "phone",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Field {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "name" => Ok(Self::Name),
            "email" => Ok(Self::Email),
            "phone" => Ok(Self::Phone),
            other => Err(format!("unknown form field '{other}'")),
        }
    }
}

/// Current values of the form inputs.
///
/// Starts all-empty; each edit replaces exactly one field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormState {
    name: String,
    email: String,
    phone: String,
}

impl FormState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value of `field`.
    #[must_use]
    pub fn get(&self, field: Field) -> &str {
        match field {
            Field::Name => &self.name,
            Field::Email => &self.email,
            Field::Phone => &self.phone,
        }
    }

    /// Replace the value of `field`.
    pub fn set(&mut self, field: Field, value: impl Into<String>) {
        let slot = match field {
            Field::Name => &mut self.name,
            Field::Email => &mut self.email,
            Field::Phone => &mut self.phone,
        };
        *slot = value.into();
    }

    /// Reset every field to empty.
    pub fn clear(&mut self) {
        self.name.clear();
        self.email.clear();
        self.phone.clear();
    }

    /// Whether every field is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        Field::ALL.iter().all(|&f| self.get(f).is_empty())
    }
}

/// Decides whether submit is enabled for a given [`FormState`].
///
/// `name` and `email` are always required. `phone` is optional unless the
/// gate is built with [`ReadinessGate::requiring_phone`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadinessGate {
    require_phone: bool,
}

impl ReadinessGate {
    /// The standard gate: `name` and `email` must be non-empty.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A gate that also requires `phone`.
    #[must_use]
    pub fn requiring_phone() -> Self {
        Self {
            require_phone: true,
        }
    }

    /// Fields that must be non-empty for submit to be enabled.
    pub fn required_fields(self) -> impl Iterator<Item = Field> {
        Field::ALL
            .into_iter()
            .filter(move |&f| f != Field::Phone || self.require_phone)
    }

    /// Whether `state` may be submitted.
    #[must_use]
    pub fn is_open(self, state: &FormState) -> bool {
        self.required_fields().all(|f| !state.get(f).is_empty())
    }
}
