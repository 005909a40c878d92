use uuid::Uuid;

use crate::utils::sanitize::clean_name;
use super::ValidationError;

#[derive(Clone, Debug)]
pub struct Author {
    id: Uuid,
    name: String,
    wanted: bool
}

impl AsRef<Author> for Author {
    fn as_ref(&self) -> &Author {
        self
    }
}

impl PartialEq for Author {
    fn eq(&self, other: &Self) -> bool {
        self.name() == other.name()
    }
}

impl Eq for Author {}

impl Author {

    pub fn new<S>(id: Uuid, name: S) -> Result<Self, ValidationError>
    where S: Into<String>
    {
        let clean = clean_name(&name.into());
        if clean.is_empty() { return Err(ValidationError::NameIsEmptyString); }

        Ok(
            Self { id, name: clean, wanted: false }
        )
    }

    pub fn from_storage(id: Uuid, name: String, wanted: bool) -> Self {
        Self { id, name, wanted }
    }

    pub fn id(&self) -> &Uuid {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn wanted(&self) -> bool {
        self.wanted
    }

    pub fn set_wanted(&mut self, wanted: bool) {
        self.wanted = wanted;
    }
}
