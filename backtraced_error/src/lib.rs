use std::backtrace::Backtrace;
use std::error::Error;

/// Renders an error followed by every error in its `source()` chain.
pub fn error_chain_to_pretty_formatted<E>(error: &E) -> String
where
    E: Error + ?Sized,
{
    let mut err = format!("{}", error);
    let mut source = error.source();
    while let Some(inner_err) = source {
        err.push_str(&format!("\nCaused by: \n{}", inner_err));
        source = inner_err.source();
    }
    err
}

#[derive(Debug, thiserror::Error)]
#[error("SqlxError Context: {context}\n{backtrace}")]
pub struct SqlxError {
    #[source]
    pub source: sqlx::Error,
    pub context: String,
    pub backtrace: OptionBacktracePrettyPrinter,
}

impl SqlxError {
    pub fn from_sqlx_error<S: Into<String>>(source: sqlx::Error, context: S) -> Self {
        Self {
            source,
            context: context.into(),
            backtrace: OptionBacktracePrettyPrinter::capture(),
        }
    }
}

#[derive(Debug)]
pub struct OptionBacktracePrettyPrinter(pub Option<Backtrace>);

impl OptionBacktracePrettyPrinter {
    pub fn capture() -> Self {
        Self::from(Backtrace::capture())
    }
}

impl From<Backtrace> for OptionBacktracePrettyPrinter {
    fn from(value: Backtrace) -> Self {
        Self(Some(value))
    }
}

impl std::fmt::Display for OptionBacktracePrettyPrinter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.0.as_ref() {
            Some(child) => write!(f, "{}", child),
            None => write!(f, "No backtrace"),
        }
    }
}
