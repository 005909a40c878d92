/// External metadata enrichment seam. Providers (Open Library, Google
/// Books, ...) and the aggregator that composes them live outside this
/// crate; the importer only ever sees this interface.

#[derive(Debug, thiserror::Error)]
pub enum MetadataError {
    #[error("Provider '{provider}' request failed: {message}")]
    RequestFailed { provider: String, message: String },

    #[error("Provider '{provider}' returned an unparsable response: {message}")]
    MalformedResponse { provider: String, message: String }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct BookMetadata {
    pub title: String,
    pub authors: Vec<String>,
    pub narrator: Option<String>,
    pub series: Option<String>,
    pub series_number: Option<f64>,
    pub year: Option<u32>,
    pub isbn: Option<String>,
    pub description: Option<String>
}

pub trait MetadataProvider: Send + Sync {
    fn name(&self) -> &str;

    fn search_by_title(&self, title: &str) -> Result<Vec<BookMetadata>, MetadataError>;

    fn search_by_author_and_title(&self, author: &str, title: &str) -> Result<Vec<BookMetadata>, MetadataError>;

    fn search_by_isbn(&self, isbn: &str) -> Result<Vec<BookMetadata>, MetadataError>;
}
