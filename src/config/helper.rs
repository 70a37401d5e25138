use anyhow::{Result, anyhow};
use std::time::Duration;

/// Parse duration string (e.g., "200ms", "30s", "5m", "2h") into Duration
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return Err(anyhow!("Empty duration string"));
    }

    // "ms" has to be checked before "s" and "m"
    let (num_str, unit) = if let Some(stripped) = s.strip_suffix("ms") {
        (stripped, "ms")
    } else if let Some(stripped) = s.strip_suffix('s') {
        (stripped, "s")
    } else if let Some(stripped) = s.strip_suffix('m') {
        (stripped, "m")
    } else if let Some(stripped) = s.strip_suffix('h') {
        (stripped, "h")
    } else {
        return Err(anyhow!(
            "Duration must end with 'ms', 's', 'm', or 'h': {}",
            s
        ));
    };

    let num: u64 = num_str
        .parse()
        .map_err(|_| anyhow!("Invalid number in duration: {}", num_str))?;

    let too_large = || anyhow!("Duration too large: {}", s);
    let duration = match unit {
        "ms" => Duration::from_millis(num),
        "s" => Duration::from_secs(num),
        "m" => Duration::from_secs(num.checked_mul(60).ok_or_else(too_large)?),
        "h" => Duration::from_secs(num.checked_mul(3600).ok_or_else(too_large)?),
        _ => unreachable!(),
    };

    Ok(duration)
}

/// Parse an optional duration field, falling back to `default` when absent.
pub fn parse_duration_or(value: &Option<String>, default: Duration) -> Result<Duration> {
    match value {
        Some(s) => parse_duration(s),
        None => Ok(default),
    }
}

/// Resolve capture group references in a template string
pub fn resolve_capture_groups(template: &str, captured_groups: &[String]) -> String {
    let mut result = template.to_string();
    for (i, group) in captured_groups.iter().enumerate() {
        let placeholder = format!("${{{}}}", i + 1);
        result = result.replace(&placeholder, group);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("200ms").unwrap(), Duration::from_millis(200));
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("2h").unwrap(), Duration::from_secs(7200));
        assert_eq!(parse_duration(" 1s ").unwrap(), Duration::from_secs(1));

        assert!(parse_duration("").is_err());
        assert!(parse_duration("30").is_err());
        assert!(parse_duration("abc").is_err());
        assert!(parse_duration("30x").is_err());
        assert!(parse_duration("ms").is_err());
    }

    #[test]
    fn test_parse_duration_overflow_is_error() {
        let err = parse_duration("99999999999999999h").unwrap_err();
        assert!(err.to_string().contains("Duration too large"));
        assert!(parse_duration("999999999999999999m").is_err());
        assert_eq!(
            parse_duration("5124095576030431h").unwrap(),
            Duration::from_secs(5124095576030431 * 3600)
        );
    }

    #[test]
    fn test_parse_duration_or_default() {
        let default = Duration::from_secs(5);
        assert_eq!(parse_duration_or(&None, default).unwrap(), default);
        assert_eq!(
            parse_duration_or(&Some("1m".to_string()), default).unwrap(),
            Duration::from_secs(60)
        );
        assert!(parse_duration_or(&Some("soon".to_string()), default).is_err());
    }

    #[test]
    fn test_resolve_capture_groups_multiple() {
        let groups = vec!["file1.txt".to_string(), "/tmp/file2.txt".to_string()];
        let result = resolve_capture_groups("cp ${1} ${2}", &groups);
        assert_eq!(result, "cp file1.txt /tmp/file2.txt");
    }

    #[test]
    fn test_resolve_capture_groups_no_placeholder() {
        let groups = vec!["world".to_string()];
        assert_eq!(resolve_capture_groups("echo hello", &groups), "echo hello");
    }
}
