//! Connection descriptor source

use crate::error::DbResult;

/// Produces the connection descriptor (DSN) handed to a backend.
///
/// Failures should be reported as [`DbError::Connector`](crate::DbError::Connector).
pub trait Connector: Send + Sync {
    fn dsn(&self) -> DbResult<String>;
}

impl Connector for String {
    fn dsn(&self) -> DbResult<String> {
        Ok(self.clone())
    }
}

impl<'a> Connector for &'a str {
    fn dsn(&self) -> DbResult<String> {
        Ok((*self).to_string())
    }
}

impl<T: Connector + ?Sized> Connector for Box<T> {
    fn dsn(&self) -> DbResult<String> {
        (**self).dsn()
    }
}

impl<T: Connector + ?Sized> Connector for std::sync::Arc<T> {
    fn dsn(&self) -> DbResult<String> {
        (**self).dsn()
    }
}
