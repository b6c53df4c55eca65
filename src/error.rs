use std::fmt;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug)]
pub enum AppError {
    Message(String),
    IOError(std::io::Error),
    Chain(String, Box<Self>),
    List(AppErrorList),
    AddrParseError(std::net::AddrParseError),
    Json(serde_json::Error),
}

impl AppError {
    pub fn msg<S>(msg: S) -> Self
    where
        S: Into<String>,
    {
        Self::Message(msg.into())
    }

    pub fn wrap<S>(msg: S, chained: Self) -> Self
    where
        S: Into<String>,
    {
        Self::Chain(msg.into(), Box::new(chained))
    }
}

pub trait AppWrap<T, E> {
    /// Wrap the error value with additional context.
    fn wrap<C>(self, context: C) -> AppResult<T>
    where
        C: Into<String>,
        E: Into<AppError>;
}

impl<T, E> AppWrap<T, E> for Result<T, E>
where
    E: Into<AppError>,
{
    fn wrap<C>(self, msg: C) -> AppResult<T>
    where
        C: Into<String>,
        E: Into<AppError>,
    {
        // Not using map_err to save 2 useless frames off the captured backtrace
        // in ext_context.
        match self {
            Ok(ok) => Ok(ok),
            Err(error) => Err(AppError::wrap(msg, error.into())),
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Message(s) => write!(f, "{s}"),
            Self::Chain(s, e) => write!(f, "{s}: {e}"),
            Self::IOError(e) => write!(f, "IO error: {e}"),
            Self::AddrParseError(e) => write!(f, "parse address: {e}"),
            Self::Json(e) => write!(f, "bad json: {e}"),
            Self::List(list) => {
                // some extra code to only add \n when it contains multiple errors
                let mut iter = list.0.iter();
                if let Some(first) = iter.next() {
                    write!(f, "{first}")?;
                }
                for err in iter {
                    write!(f, "\n{err}")?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for AppError {}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::IOError(err)
    }
}

impl From<nix::Error> for AppError {
    fn from(err: nix::Error) -> Self {
        Self::IOError(err.into())
    }
}

impl From<std::net::AddrParseError> for AppError {
    fn from(err: std::net::AddrParseError) -> Self {
        Self::AddrParseError(err)
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err)
    }
}

#[derive(Debug)]
pub struct AppErrorList(Vec<AppError>);

impl AppErrorList {
    pub fn new() -> Self {
        Self(vec![])
    }

    pub fn push(&mut self, err: AppError) {
        self.0.push(err)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

// we do not need it but clippy wants it
impl Default for AppErrorList {
    fn default() -> Self {
        Self::new()
    }
}
