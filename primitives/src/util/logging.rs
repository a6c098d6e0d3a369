use slog::{o, Drain, Logger};

pub use slog_async::Async;
pub use slog_term::{CompactFormat, TermDecorator};

/// Creates the root [`Logger`] of an application.
///
/// Records are formatted compactly on the terminal and written from a background thread,
/// every record carries the `service` key with the given `prefix`.
pub fn new_logger(prefix: &str) -> Logger {
    let decorator = TermDecorator::new().build();
    let drain = CompactFormat::new(decorator).build().fuse();
    let drain = Async::new(drain).build().fuse();

    Logger::root(drain, o!("service" => prefix.to_owned()))
}
