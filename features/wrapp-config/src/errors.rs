/// Errors when trying to aquire a config
#[derive(thiserror::Error, Debug, Clone)]
pub enum GetConfigError {
    /// A config of that name exists, but holds another type
    #[error("Config '{name}' is a '{actual_type}', not a '{required_type}'")]
    WrongType {
        name: String,
        required_type: &'static str,
        actual_type: &'static str,
    },
}

/// Errors when trying to register a config
#[derive(thiserror::Error, Debug, Clone)]
pub enum RegisterConfigError {
    /// A config of that name is already registered
    #[error("Config '{0}' is already registered")]
    AlreadyRegistered(String),
}
