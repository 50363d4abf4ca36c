//! Liveness and configuration probes shared by the machine backends

use fleetops_engine::resource::attrs;
use fleetops_engine::{CheckResult, ResourceHandle, ResourceState, Target, Transport};

/// Symlink switched by the default activation command
pub const CURRENT_LINK: &str = "/var/lib/fleetops/current";

/// Probe a machine that is expected to run and compare its active
/// configuration with the last one fleetops activated
pub async fn probe_machine(
    transport: &dyn Transport,
    target: &Target,
    handle: &ResourceHandle,
) -> CheckResult {
    let mut result = CheckResult {
        state: handle.state(),
        exists: true,
        ..Default::default()
    };

    match transport
        .run_command(target, &format!("readlink {CURRENT_LINK} || true"))
        .await
    {
        Ok(output) if output.success() => {
            result.is_reachable = Some(true);
            if matches!(
                result.state,
                ResourceState::Unreachable | ResourceState::Starting | ResourceState::Unknown
            ) {
                result.state = ResourceState::Up;
            }
            let live = output.stdout.trim();
            if let Some(expected) = handle.get_str(attrs::CURRENT_CONFIG)
                && live != expected
            {
                result.is_outdated = true;
                result
                    .messages
                    .push(format!("active configuration is '{live}', expected '{expected}'"));
            }
        }
        Ok(output) => {
            result.is_reachable = Some(true);
            result.state = ResourceState::Unknown;
            result
                .messages
                .push(format!("probe exited with code {}", output.exit_code));
        }
        Err(e) => {
            tracing::debug!(machine = %target.machine, error = %e, "Probe failed");
            result.is_reachable = Some(false);
            result.state = ResourceState::Unreachable;
            result.messages.push(e.to_string());
        }
    }

    result
}
