/// Failures which prevent a reconstruction from being set up or persisted.
///
/// Numerical trouble inside the iterations (flat root brackets, cost
/// increases, cancellation) is reported through values, not through this type.
#[derive(Debug)]
pub enum MbirError {
    /// Array extents disagree with the declared dimensions
    ShapeMismatch { what: &'static str, expected: Vec<usize>, found: Vec<usize> },
    InvalidGeometry(String),
    InvalidConfig(String),
    /// Measured values outside their physical range
    InvalidData(String),
    /// Requested buffer size overflows `usize`
    Allocation { what: &'static str },
    Io(std::io::Error),
    Config(toml::de::Error),
}

pub type Result<T> = std::result::Result<T, MbirError>;

impl std::fmt::Display for MbirError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use MbirError::*;
        match self {
            ShapeMismatch { what, expected, found } =>
                write!(f, "{what}: expected shape {expected:?}, found {found:?}"),
            InvalidGeometry(msg) => write!(f, "invalid geometry: {msg}"),
            InvalidConfig  (msg) => write!(f, "invalid configuration: {msg}"),
            InvalidData    (msg) => write!(f, "invalid data: {msg}"),
            Allocation { what }  => write!(f, "cannot allocate {what}: size overflows"),
            Io    (e) => write!(f, "I/O error: {e}"),
            Config(e) => write!(f, "cannot parse configuration: {e}"),
        }
    }
}

impl std::error::Error for MbirError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            MbirError::Io    (e) => Some(e),
            MbirError::Config(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for MbirError {
    fn from(e: std::io::Error) -> Self { Self::Io(e) }
}

impl From<toml::de::Error> for MbirError {
    fn from(e: toml::de::Error) -> Self { Self::Config(e) }
}

/// Product of extents, or `Allocation` error on overflow
pub fn checked_volume(what: &'static str, dims: &[usize]) -> Result<usize> {
    dims.iter()
        .try_fold(1_usize, |acc, &n| acc.checked_mul(n))
        .ok_or(MbirError::Allocation { what })
}
