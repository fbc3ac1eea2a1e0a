// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Logger construction.

Grounded on `pyoxidizer::logging`'s `logger_from_env`/`LoggerContext` shape,
swapped from a bespoke `println!`-based drain to `slog-term`'s
terminal-decorated compact format over `slog-async`, matching how the rest
of the pack builds a root logger for a CLI entry point.
*/

use {slog::Drain, std::str::FromStr};

/// Build a root logger writing compact, terminal-colored records to stderr.
///
/// `min_level` filters records below that severity before they ever reach
/// the async channel.
pub fn logger_with_level(min_level: slog::Level) -> slog::Logger {
    let decorator = slog_term::TermDecorator::new().stderr().build();
    let drain = slog_term::CompactFormat::new(decorator).build().fuse();
    let drain = slog::LevelFilter::new(drain, min_level).fuse();
    let drain = slog_async::Async::new(drain).build().fuse();

    slog::Logger::root(drain, slog::o!())
}

/// Construct a logger from the `BOLT_LOG` environment variable
/// (`trace`/`debug`/`info`/`warning`/`error`/`critical`), defaulting to
/// `info` when unset or unrecognized.
pub fn logger_from_env() -> slog::Logger {
    let level = std::env::var("BOLT_LOG")
        .ok()
        .and_then(|v| slog::Level::from_str(&v).ok())
        .unwrap_or(slog::Level::Info);

    logger_with_level(level)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_a_logger_without_panicking() {
        let logger = logger_with_level(slog::Level::Warning);
        slog::info!(logger, "constructed ok");
    }
}
