//! Supported database engines.

use crate::error::HarnessError;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// A database engine the harness can provision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// MySQL 8
    MySql,
    /// OceanBase Community Edition (MySQL mode)
    OceanBase,
}

impl BackendKind {
    /// Human-readable engine name, used in logs and error context.
    pub fn display_name(&self) -> &'static str {
        match self {
            BackendKind::MySql => "MySQL",
            BackendKind::OceanBase => "OceanBase",
        }
    }

    /// Driver used to talk to the engine. OceanBase speaks the MySQL protocol.
    pub fn driver_id(&self) -> &'static str {
        match self {
            BackendKind::MySql | BackendKind::OceanBase => "mysql",
        }
    }

    /// Container image used unless overridden by settings.
    pub fn default_image(&self) -> &'static str {
        match self {
            BackendKind::MySql => "mysql:8.0",
            BackendKind::OceanBase => "oceanbase/oceanbase-ce:4.3.5-lts",
        }
    }

    /// Port the engine listens on inside the container.
    pub fn container_port(&self) -> u16 {
        match self {
            BackendKind::MySql => 3306,
            BackendKind::OceanBase => 2881,
        }
    }

    /// How long the provider may take to bring the container up.
    pub fn startup_timeout(&self) -> Duration {
        match self {
            BackendKind::MySql => Duration::from_secs(120),
            BackendKind::OceanBase => Duration::from_secs(5 * 60),
        }
    }

    /// All supported engines.
    pub fn all() -> &'static [BackendKind] {
        &[BackendKind::MySql, BackendKind::OceanBase]
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

impl FromStr for BackendKind {
    type Err = HarnessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BackendKind::all()
            .iter()
            .copied()
            .find(|kind| kind.display_name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| HarnessError::UnsupportedBackend(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity() {
        assert_eq!(BackendKind::MySql.display_name(), "MySQL");
        assert_eq!(BackendKind::OceanBase.display_name(), "OceanBase");
        assert_eq!(BackendKind::MySql.default_image(), "mysql:8.0");
        assert_eq!(
            BackendKind::OceanBase.default_image(),
            "oceanbase/oceanbase-ce:4.3.5-lts"
        );
        assert_eq!(BackendKind::OceanBase.driver_id(), "mysql");
    }

    #[test]
    fn test_ports() {
        assert_eq!(BackendKind::MySql.container_port(), 3306);
        assert_eq!(BackendKind::OceanBase.container_port(), 2881);
    }

    #[test]
    fn test_parse() {
        assert_eq!("mysql".parse::<BackendKind>().unwrap(), BackendKind::MySql);
        assert_eq!(" OCEANBASE ".parse::<BackendKind>().unwrap(), BackendKind::OceanBase);

        let err = "postgres".parse::<BackendKind>().unwrap_err();
        assert!(matches!(err, HarnessError::UnsupportedBackend(name) if name == "postgres"));
    }
}
