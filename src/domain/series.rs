use uuid::Uuid;

use crate::utils::sanitize::clean_name;
use super::ValidationError;

#[derive(Clone, Debug)]
pub struct Series {
    id: Uuid,
    name: String,
    author_id: Option<Uuid>,
    wanted: bool
}

impl AsRef<Series> for Series {
    fn as_ref(&self) -> &Series {
        self
    }
}

impl PartialEq for Series {
    fn eq(&self, other: &Self) -> bool {
        self.name() == other.name() && self.author_id() == other.author_id()
    }
}

impl Eq for Series {}

impl Series {

    pub fn new<S>(id: Uuid, name: S, author_id: Option<Uuid>) -> Result<Self, ValidationError>
    where S: Into<String>
    {
        let clean = clean_name(&name.into());
        if clean.is_empty() { return Err(ValidationError::NameIsEmptyString); }

        Ok(
            Self { id, name: clean, author_id, wanted: false }
        )
    }

    pub fn from_storage(id: Uuid, name: String, author_id: Option<Uuid>, wanted: bool) -> Self {
        Self { id, name, author_id, wanted }
    }

    pub fn id(&self) -> &Uuid {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn author_id(&self) -> Option<&Uuid> {
        self.author_id.as_ref()
    }

    pub fn wanted(&self) -> bool {
        self.wanted
    }

    pub fn set_wanted(&mut self, wanted: bool) {
        self.wanted = wanted;
    }
}
