//! Version information served on both API surfaces

use serde::Serialize;

/// Version payload
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionInfo {
    /// Crate version
    pub version: &'static str,
    /// Build timestamp, when stamped by the build
    pub build_time: &'static str,
    /// Git commit, when stamped by the build
    pub git_commit: &'static str,
}

/// The running agent's version info
pub fn version_info() -> VersionInfo {
    VersionInfo {
        version: env!("CARGO_PKG_VERSION"),
        build_time: option_env!("NFC_AGENT_BUILD_TIME").unwrap_or("unknown"),
        git_commit: option_env!("NFC_AGENT_GIT_COMMIT").unwrap_or("unknown"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_matches_crate() {
        let info = version_info();
        assert_eq!(info.version, env!("CARGO_PKG_VERSION"));
        let json = serde_json::to_value(&info).unwrap();
        assert!(json.get("version").is_some());
        assert!(json.get("buildTime").is_some());
        assert!(json.get("gitCommit").is_some());
    }
}
