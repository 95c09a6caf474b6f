use chrono::DateTime;
use getset::Getters;
use std::fmt::{Display, Formatter};
use std::sync::OnceLock;

static UNKNOWN: &str = "unknown";
static BUILD_TIME_FORMAT: &str = "%a %b %e %H:%M:%S %Y";
static BUILD_INFO: OnceLock<BuildInfo> = OnceLock::new();

/// Version metadata baked in at compile time through `DBACKER_*` environment variables.
#[derive(Clone, Debug, Getters, PartialEq, Eq)]
#[getset(get = "pub")]
pub struct BuildInfo {
    version: String,
    commit: String,
    build_time: String,
    build_number: String,
    report: String,
}

fn or_unknown(value: Option<&str>) -> String {
    value
        .filter(|v| !v.is_empty())
        .unwrap_or(UNKNOWN)
        .to_string()
}

fn format_build_time(unix_secs: Option<&str>) -> String {
    unix_secs
        .and_then(|s| s.trim().parse::<i64>().ok())
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .map(|dt| dt.format(BUILD_TIME_FORMAT).to_string())
        .unwrap_or_else(|| UNKNOWN.to_string())
}

impl BuildInfo {
    pub fn new(
        version: Option<&str>,
        commit: Option<&str>,
        build_time: Option<&str>,
        build_number: Option<&str>,
    ) -> Self {
        let version = or_unknown(version);
        let commit = or_unknown(commit);
        let build_time = format_build_time(build_time);
        let build_number = or_unknown(build_number);
        let report = format!(
            "{version}\nGit commit:   {commit}\nBuilt:        {build_time}\nCompilation:  {build_number}"
        );
        Self {
            version,
            commit,
            build_time,
            build_number,
            report,
        }
    }

    pub fn get() -> &'static BuildInfo {
        BUILD_INFO.get_or_init(|| {
            BuildInfo::new(
                option_env!("CARGO_PKG_VERSION"),
                option_env!("DBACKER_COMMIT"),
                option_env!("DBACKER_BUILD_TIME"),
                option_env!("DBACKER_BUILD_NUMBER"),
            )
        })
    }
}

impl Display for BuildInfo {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "version: {}, commit: {}, built: {}, compilation: {}",
            self.version, self.commit, self.build_time, self.build_number
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_values_are_unknown() {
        let info = BuildInfo::new(Some("2.0.0"), None, None, Some(""));
        assert_eq!(info.version(), "2.0.0");
        assert_eq!(info.commit(), "unknown");
        assert_eq!(info.build_time(), "unknown");
        assert_eq!(info.build_number(), "unknown");
    }

    #[test]
    fn test_build_time_from_unix_seconds() {
        let info = BuildInfo::new(Some("2.0.0"), Some("abc123"), Some("1700000000"), Some("42"));
        assert_eq!(info.build_time(), "Tue Nov 14 22:13:20 2023");
        assert_eq!(
            info.to_string(),
            "version: 2.0.0, commit: abc123, built: Tue Nov 14 22:13:20 2023, compilation: 42"
        );
        assert!(info.report().contains("Git commit:   abc123"));

        let garbage = BuildInfo::new(None, None, Some("yesterday"), None);
        assert_eq!(garbage.build_time(), "unknown");
    }

    #[test]
    fn test_get_is_stable() {
        assert_eq!(BuildInfo::get().version(), env!("CARGO_PKG_VERSION"));
        assert!(std::ptr::eq(BuildInfo::get(), BuildInfo::get()));
    }
}
