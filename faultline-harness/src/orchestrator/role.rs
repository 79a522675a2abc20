//! Role definitions and the context handed to each worker.

use std::fmt;

use faultline_core::tracing_setup::CliLogLevel;
use faultline_core::transport::SocketConfig;

/// Body of a role, run once inside its own worker process.
pub type RoleBody = Box<dyn FnOnce(&RoleContext) -> anyhow::Result<()>>;

/// One side of a scenario, run in an isolated worker.
pub struct Role {
    name: String,
    body: RoleBody,
}

impl Role {
    /// Creates a role from a name used in diagnostics and its body.
    pub fn new(
        name: impl Into<String>,
        body: impl FnOnce(&RoleContext) -> anyhow::Result<()> + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            body: Box::new(body),
        }
    }

    /// Returns the role's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn into_parts(self) -> (String, RoleBody) {
        (self.name, self.body)
    }
}

impl fmt::Debug for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Role").field("name", &self.name).finish()
    }
}

/// Settings re-delivered explicitly to every worker at spawn time.
///
/// Workers are separate processes, so nothing configured in the driver at
/// runtime reaches them unless it travels through here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WorkerSettings {
    /// Console log level inside the worker
    pub log_level: CliLogLevel,
    /// Whether unfinished transport operations are tolerated
    pub suppress_not_implemented: bool,
}

impl WorkerSettings {
    /// Applies the worker-level overrides to a socket configuration.
    pub fn apply(&self, config: SocketConfig) -> SocketConfig {
        SocketConfig {
            suppress_not_implemented: config.suppress_not_implemented
                || self.suppress_not_implemented,
            ..config
        }
    }
}

/// Identity and settings of the worker a role body runs in.
#[derive(Debug, Clone)]
pub struct RoleContext {
    /// Position of the role in the job, also its barrier party index
    pub index: usize,
    /// Role name
    pub name: String,
    /// Settings delivered at spawn time
    pub settings: WorkerSettings,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_enable_suppression() {
        let settings = WorkerSettings {
            suppress_not_implemented: true,
            ..WorkerSettings::default()
        };
        let config = settings.apply(SocketConfig::with_window(3));

        assert!(config.suppress_not_implemented);
        assert_eq!(config.window, 3);
    }

    #[test]
    fn test_default_settings_keep_config() {
        let config = SocketConfig::with_window(7);
        assert_eq!(WorkerSettings::default().apply(config), config);
    }

    #[test]
    fn test_role_body_receives_context() {
        let role = Role::new("client", |ctx: &RoleContext| {
            anyhow::ensure!(ctx.index == 1, "wrong index {}", ctx.index);
            Ok(())
        });
        assert_eq!(role.name(), "client");

        let (name, body) = role.into_parts();
        let ctx = RoleContext {
            index: 1,
            name,
            settings: WorkerSettings::default(),
        };
        body(&ctx).unwrap();
    }
}
