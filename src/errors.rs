use thiserror::Error;

#[derive(Debug, Error)]
pub enum RowGraphError {
    #[error("schema error: {0}")]
    SchemaError(String),
    #[error("template error: {0}")]
    TemplateError(String),
    #[error("binding error: {0}")]
    BindingError(String),
    #[error("store error: {0}")]
    StoreError(String),
    #[error("reassembly error: {0}")]
    ReassemblyError(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("interchange error: {0}")]
    InterchangeError(String),
}

impl RowGraphError {
    pub fn schema<T: Into<String>>(msg: T) -> Self {
        RowGraphError::SchemaError(msg.into())
    }

    pub fn template<T: Into<String>>(msg: T) -> Self {
        RowGraphError::TemplateError(msg.into())
    }

    pub fn binding<T: Into<String>>(msg: T) -> Self {
        RowGraphError::BindingError(msg.into())
    }

    pub fn store<T: Into<String>>(msg: T) -> Self {
        RowGraphError::StoreError(msg.into())
    }

    pub fn reassembly<T: Into<String>>(msg: T) -> Self {
        RowGraphError::ReassemblyError(msg.into())
    }

    pub fn invalid_input<T: Into<String>>(msg: T) -> Self {
        RowGraphError::InvalidInput(msg.into())
    }

    pub fn not_found<T: Into<String>>(msg: T) -> Self {
        RowGraphError::NotFound(msg.into())
    }

    pub fn interchange<T: Into<String>>(msg: T) -> Self {
        RowGraphError::InterchangeError(msg.into())
    }
}
