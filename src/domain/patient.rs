use std::fmt;

/// A registered patient, keyed by identity document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Patient {
    pub document: String,
    pub first_name: String,
    pub last_name: String,
    pub age: u8,
    pub email: String,
    pub gender: String,
    pub city: String,
    pub country: String,
}

/// Pipe-joined fields, in registration order.
impl fmt::Display for Patient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}|{}|{}|{}|{}|{}|{}|{}",
            self.document,
            self.first_name,
            self.last_name,
            self.age,
            self.email,
            self.gender,
            self.city,
            self.country
        )
    }
}
