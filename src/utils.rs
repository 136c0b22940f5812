use std::str::FromStr;
use tokio::time::Duration;

/// Parses a duration string such as "30s", "2m", "1m30s", "500ms" or "1d".
///
/// Supported units:
/// - `ms` for milliseconds
/// - `s` for seconds
/// - `m` for minutes
/// - `h` for hours
/// - `d` for days
///
/// Components may be chained ("1h30m"); each one needs its own unit.
pub fn parse_duration_string(s: &str) -> Result<Duration, String> {
    let s = s.trim();

    if s.is_empty() {
        return Err("Duration string cannot be empty".to_string());
    }

    let mut total = Duration::ZERO;
    let mut rest = s;

    while !rest.is_empty() {
        let digits_end = rest
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(rest.len());
        let value_str = &rest[..digits_end];

        let value = match u64::from_str(value_str) {
            Ok(v) => v,
            Err(_) => {
                return Err(format!(
                    "Invalid numeric value in duration: '{}'",
                    s
                ))
            }
        };

        rest = &rest[digits_end..];
        let unit_end = rest
            .find(|c: char| c.is_ascii_digit())
            .unwrap_or(rest.len());
        let unit = &rest[..unit_end];
        rest = &rest[unit_end..];

        let component = match unit {
            "ms" => Some(Duration::from_millis(value)),
            "s" => Some(Duration::from_secs(value)),
            "m" => value.checked_mul(60).map(Duration::from_secs),
            "h" => value.checked_mul(60 * 60).map(Duration::from_secs),
            "d" => value.checked_mul(24 * 60 * 60).map(Duration::from_secs),
            "" => {
                return Err(format!(
                    "Missing duration unit in '{}'. Use 'ms', 's', 'm', 'h', or 'd'.",
                    s
                ))
            }
            other => {
                return Err(format!(
                    "Unknown duration unit: '{}'. Use 'ms', 's', 'm', 'h', or 'd'.",
                    other
                ))
            }
        };
        total = component
            .and_then(|c| total.checked_add(c))
            .ok_or_else(|| format!("Duration '{}' is too large", s))?;
    }

    Ok(total)
}

/// Parses a boolean flag the way environment variables are usually written.
pub fn parse_bool_flag(s: &str) -> Option<bool> {
    match s.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parses a comma-separated header string with support for escaped commas.
///
/// Use `\,` to include a literal comma in a header value.
/// Example: "Accept-Language:en-US,Accept:text/html\,application/xhtml+xml"
pub fn parse_headers_with_escapes(headers_str: &str) -> Vec<String> {
    let mut headers = Vec::new();
    let mut current_header = String::new();
    let mut chars = headers_str.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '\\' if chars.peek() == Some(&',') => {
                current_header.push(',');
                chars.next();
            }
            ',' => {
                if !current_header.trim().is_empty() {
                    headers.push(current_header.clone());
                }
                current_header.clear();
            }
            _ => current_header.push(ch),
        }
    }

    if !current_header.trim().is_empty() {
        headers.push(current_header);
    }

    headers
}

#[cfg(test)]
mod tests {
    use super::*;

    mod duration {
        use super::*;

        #[test]
        fn parse_seconds() {
            assert_eq!(
                parse_duration_string("30s").unwrap(),
                Duration::from_secs(30)
            );
        }

        #[test]
        fn parse_minutes() {
            assert_eq!(
                parse_duration_string("2m").unwrap(),
                Duration::from_secs(120)
            );
        }

        #[test]
        fn parse_millis() {
            assert_eq!(
                parse_duration_string("250ms").unwrap(),
                Duration::from_millis(250)
            );
        }

        #[test]
        fn parse_compound() {
            assert_eq!(
                parse_duration_string("1m30s").unwrap(),
                Duration::from_secs(90)
            );
            assert_eq!(
                parse_duration_string("1h0m5s").unwrap(),
                Duration::from_secs(3605)
            );
        }

        #[test]
        fn parse_days() {
            assert_eq!(
                parse_duration_string("1d").unwrap(),
                Duration::from_secs(86400)
            );
        }

        #[test]
        fn trims_whitespace() {
            assert_eq!(
                parse_duration_string("  10m  ").unwrap(),
                Duration::from_secs(600)
            );
        }

        #[test]
        fn empty_string_errors() {
            let err = parse_duration_string("   ").unwrap_err();
            assert!(err.contains("empty"), "error was: {}", err);
        }

        #[test]
        fn no_suffix_errors() {
            let err = parse_duration_string("10").unwrap_err();
            assert!(err.contains("Missing duration unit"), "error was: {}", err);
        }

        #[test]
        fn unknown_suffix_errors() {
            let err = parse_duration_string("10x").unwrap_err();
            assert!(err.contains("Unknown duration unit"), "error was: {}", err);
        }

        #[test]
        fn no_number_errors() {
            let err = parse_duration_string("m").unwrap_err();
            assert!(err.contains("Invalid numeric"), "error was: {}", err);
        }

        #[test]
        fn negative_number_errors() {
            let err = parse_duration_string("-5m").unwrap_err();
            assert!(err.contains("Invalid numeric"), "error was: {}", err);
        }

        #[test]
        fn oversized_values_error() {
            let err = parse_duration_string("999999999999999999d").unwrap_err();
            assert!(err.contains("too large"), "error was: {}", err);
            assert!(parse_duration_string("18446744073709551615s1s").is_err());
            assert!(parse_duration_string("18446744073709551615ms").is_ok());
        }

        #[test]
        fn fractional_number_errors() {
            assert!(parse_duration_string("1.5m").is_err());
        }
    }

    #[test]
    fn bool_flags() {
        assert_eq!(parse_bool_flag("TRUE"), Some(true));
        assert_eq!(parse_bool_flag(" 1 "), Some(true));
        assert_eq!(parse_bool_flag("off"), Some(false));
        assert_eq!(parse_bool_flag("maybe"), None);
    }

    #[test]
    fn headers_with_escaped_comma() {
        let result = parse_headers_with_escapes("Accept:text/html\\,application/xml,X-Test:1");
        assert_eq!(result, vec!["Accept:text/html,application/xml", "X-Test:1"]);
    }

    #[test]
    fn headers_skip_empty_segments() {
        let result = parse_headers_with_escapes("  A:1  ,  ,B:2,");
        assert_eq!(result.len(), 2);
        assert_eq!(result[0], "  A:1  ");
        assert_eq!(result[1], "B:2");
    }

    #[test]
    fn headers_backslash_not_before_comma() {
        let result = parse_headers_with_escapes("Path:C:\\Users,Host:example.com");
        assert_eq!(result[0], "Path:C:\\Users");
    }
}
