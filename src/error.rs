use thiserror::Error;

/// Errors that abort processing of a single upload.
///
/// Cell-level numeric problems never show up here: the coercer turns them
/// into zeros.
#[derive(Error, Debug)]
pub enum ReportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unsupported file type: {0}")]
    UnsupportedFormat(String),

    #[error("Could not decode text with any of: {}", tried.join(", "))]
    Decode { tried: Vec<String> },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Failed to read workbook: {0}")]
    Workbook(String),

    #[error("The uploaded file contains no rows")]
    Empty,

    #[error("Header row not found. Scanned rows: {}", scanned.join(" | "))]
    HeaderNotFound { scanned: Vec<String> },

    #[error("Header row {row} is outside the table ({rows} rows)")]
    HeaderOutOfRange { row: usize, rows: usize },

    #[error("No required columns found. Detected columns: {}", detected.join(", "))]
    NoMappableColumns { detected: Vec<String> },

    #[error("Failed to write workbook: {0}")]
    Xlsx(#[from] rust_xlsxwriter::XlsxError),
}

impl ReportError {
    /// Whether the failure comes from the uploaded data rather than the
    /// server itself.
    pub fn is_user_error(&self) -> bool {
        !matches!(self, ReportError::Io(_) | ReportError::Xlsx(_))
    }
}

pub type Result<T> = std::result::Result<T, ReportError>;

/// Reasons a sign-in attempt or an authenticated request is refused.
#[derive(Error, Debug, PartialEq)]
pub enum AuthError {
    #[error("Sign-in was refused by the provider: {0}")]
    Provider(String),

    #[error("Sign-in request expired, please try again")]
    StateMismatch,

    #[error("Sign-in response had no authorization code")]
    MissingCode,

    #[error("Token exchange failed: {0}")]
    Exchange(String),

    #[error("Could not read the account profile: {0}")]
    Profile(String),

    #[error("The account has no e-mail address")]
    NoEmail,

    #[error("E-mail address {0} is not verified")]
    Unverified(String),

    #[error("{0} is not allowed to use this service")]
    Forbidden(String),

    #[error("Not signed in")]
    Unauthenticated,
}

/// Startup configuration problems.
#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("Missing required environment variable {0}")]
    Missing(&'static str),

    #[error("Invalid value for {name}: {value}")]
    Invalid { name: &'static str, value: String },
}
