#[non_exhaustive]
#[derive(Debug)]
pub enum Error {
    /// Got an invalid parameter value in a function
    InvalidParameter(String),
    /// Error while serializing/deserializing data
    Json(serde_json::Error),
    /// Errors coming from metatensor
    Metatensor(metatensor::Error),
    /// Error coming from the external spherical expansion calculator
    Calculator(String),
    /// Gradients were requested with respect to something we can not
    /// differentiate against
    UnsupportedGradient(String),
    /// Gradients were requested, but the calculator did not produce them
    MissingGradients(String),
    /// Some internal invariant was broken, this is a bug
    Internal(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::InvalidParameter(e) => write!(f, "invalid parameter: {}", e),
            Error::Json(e) => write!(f, "json error: {}", e),
            Error::Metatensor(e) => write!(f, "metatensor error: {}", e),
            Error::Calculator(e) => write!(f, "calculator error: {}", e),
            Error::UnsupportedGradient(e) => write!(f, "unsupported gradient: {}", e),
            Error::MissingGradients(e) => write!(f, "missing gradients: {}", e),
            Error::Internal(e) => write!(f, "internal error: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::InvalidParameter(_) |
            Error::Calculator(_) |
            Error::UnsupportedGradient(_) |
            Error::MissingGradients(_) |
            Error::Internal(_) => None,
            Error::Json(e) => Some(e),
            Error::Metatensor(e) => Some(e),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(error: serde_json::Error) -> Error {
        Error::Json(error)
    }
}

impl From<metatensor::Error> for Error {
    fn from(error: metatensor::Error) -> Error {
        Error::Metatensor(error)
    }
}

impl From<ndarray::ShapeError> for Error {
    fn from(error: ndarray::ShapeError) -> Error {
        Error::Internal(format!("invalid array shape: {}", error))
    }
}
