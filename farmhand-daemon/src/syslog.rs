//! Parser for the syslog lines the daemon's services send to the relay.
//!
//! Wire format: `<PRIORITY>HOSTNAME MESSAGE`, where HOSTNAME carries the
//! sending service's name rather than a machine name.

use thiserror::Error;

/// Numeric levels, on the scale the daemon's logging uses.
pub const LEVEL_NOTSET: u8 = 0;
pub const LEVEL_DEBUG: u8 = 10;
pub const LEVEL_INFO: u8 = 20;
pub const LEVEL_WARNING: u8 = 30;
pub const LEVEL_ERROR: u8 = 40;
pub const LEVEL_CRITICAL: u8 = 50;

/// One parsed datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub level: u8,
    pub service: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("line does not start with '<'")]
    MissingPriority,

    #[error("priority is not closed with '>'")]
    UnterminatedPriority,

    #[error("priority '{0}' is not an unsigned integer")]
    InvalidPriority(String),

    #[error("missing hostname after priority")]
    MissingHostname,
}

/// Map a syslog priority to a numeric level.
///
/// Senders always use the same facility, so subtracting 8 leaves the severity.
pub fn map_priority_to_level(priority: u32) -> u8 {
    match i64::from(priority) - 8 {
        7 => LEVEL_DEBUG,
        6 => LEVEL_INFO,
        4 => LEVEL_WARNING,
        3 => LEVEL_ERROR,
        2 => LEVEL_CRITICAL,
        _ => LEVEL_NOTSET,
    }
}

/// Display name for a numeric level.
pub fn level_name(level: u8) -> &'static str {
    match level {
        LEVEL_DEBUG => "DEBUG",
        LEVEL_INFO => "INFO",
        LEVEL_WARNING => "WARNING",
        LEVEL_ERROR => "ERROR",
        LEVEL_CRITICAL => "CRITICAL",
        _ => "NOTSET",
    }
}

/// Tracing level a numeric level is emitted at. `tracing` has no critical
/// level, so critical records go out as errors.
pub fn tracing_level(level: u8) -> tracing::Level {
    match level {
        LEVEL_DEBUG => tracing::Level::DEBUG,
        LEVEL_INFO => tracing::Level::INFO,
        LEVEL_WARNING => tracing::Level::WARN,
        LEVEL_ERROR | LEVEL_CRITICAL => tracing::Level::ERROR,
        _ => tracing::Level::TRACE,
    }
}

fn is_hostname_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.')
}

/// Parse one line.
pub fn parse(line: &str) -> Result<LogRecord, ParseError> {
    let rest = line
        .trim_start()
        .strip_prefix('<')
        .ok_or(ParseError::MissingPriority)?;
    let (priority, rest) = rest
        .split_once('>')
        .ok_or(ParseError::UnterminatedPriority)?;
    let priority = priority.trim();
    if priority.is_empty() || !priority.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ParseError::InvalidPriority(priority.to_string()));
    }
    // All digits, so only overflow can fail; such a priority maps to no level.
    let level = priority
        .parse::<u32>()
        .map_or(LEVEL_NOTSET, map_priority_to_level);

    let rest = rest.trim_start();
    let host_len = rest
        .find(|c: char| !is_hostname_char(c))
        .unwrap_or(rest.len());
    if host_len == 0 {
        return Err(ParseError::MissingHostname);
    }
    let (service, rest) = rest.split_at(host_len);

    let message = rest.trim_start_matches([' ', '\t']);
    let message = message.split(['\n', '\r']).next().unwrap_or_default();
    let message = message.trim_end_matches('\0');

    Ok(LogRecord {
        level,
        service: service.to_string(),
        message: message.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_every_known_severity() {
        let expected = [
            (15, LEVEL_DEBUG),
            (14, LEVEL_INFO),
            (13, LEVEL_NOTSET),
            (12, LEVEL_WARNING),
            (11, LEVEL_ERROR),
            (10, LEVEL_CRITICAL),
            (9, LEVEL_NOTSET),
            (8, LEVEL_NOTSET),
            (16, LEVEL_NOTSET),
            (0, LEVEL_NOTSET),
        ];
        for (priority, level) in expected {
            assert_eq!(map_priority_to_level(priority), level, "priority {priority}");
        }
    }

    #[test]
    fn parses_example_line() {
        let record = parse("<14>harvester-1 disk 92% full").expect("parse");
        assert_eq!(
            record,
            LogRecord {
                level: 20,
                service: "harvester-1".to_string(),
                message: "disk 92% full".to_string(),
            }
        );
    }

    #[test]
    fn strips_trailing_nul_bytes() {
        let record = parse("<11>chia_farmer lost connection\0\0").expect("parse");
        assert_eq!(record.message, "lost connection");
        assert_eq!(record.level, LEVEL_ERROR);
    }

    #[test]
    fn hostname_stops_at_first_foreign_char() {
        let record = parse("<12>chia.wallet:  sync stalled").expect("parse");
        assert_eq!(record.service, "chia.wallet");
        assert_eq!(record.message, ":  sync stalled");
    }

    #[test]
    fn empty_message_is_allowed() {
        let record = parse("<14>chia_harvester").expect("parse");
        assert_eq!(record.message, "");
    }

    #[test]
    fn rejects_malformed_lines() {
        assert_eq!(parse("14>host msg"), Err(ParseError::MissingPriority));
        assert_eq!(parse("<14 host msg"), Err(ParseError::UnterminatedPriority));
        assert_eq!(
            parse("<x1>host msg"),
            Err(ParseError::InvalidPriority("x1".to_string()))
        );
        assert_eq!(
            parse("<-1>host msg"),
            Err(ParseError::InvalidPriority("-1".to_string()))
        );
        assert_eq!(parse("<>host msg"), Err(ParseError::InvalidPriority(String::new())));
        assert_eq!(parse("<14> :msg"), Err(ParseError::MissingHostname));
        assert_eq!(parse("<14>"), Err(ParseError::MissingHostname));
    }

    #[test]
    fn oversized_priority_is_notset() {
        let record = parse("<4294967296>chia_farmer hello").expect("parse");
        assert_eq!(record.level, LEVEL_NOTSET);
        assert_eq!(record.service, "chia_farmer");
        assert_eq!(record.message, "hello");
        assert_eq!(
            parse("<99999999999999999999999>host msg").map(|r| r.level),
            Ok(LEVEL_NOTSET)
        );
    }

    #[test]
    fn level_helpers_agree() {
        assert_eq!(level_name(LEVEL_CRITICAL), "CRITICAL");
        assert_eq!(tracing_level(LEVEL_CRITICAL), tracing::Level::ERROR);
        assert_eq!(tracing_level(LEVEL_NOTSET), tracing::Level::TRACE);
        assert_eq!(level_name(7), "NOTSET");
    }
}
