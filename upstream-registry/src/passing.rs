//! Selection of health checks that represent instances eligible for traffic

use crate::types::{
    HealthCheck, NODE_MAINTENANCE_CHECK, SERF_HEALTH_CHECK, SERVICE_MAINTENANCE_PREFIX,
    STATUS_CRITICAL,
};
use tracing::info;

/// Filter `checks` down to instance checks with an accepted status whose
/// node agent is alive and neither node nor instance is in maintenance.
///
/// A node can report several checks for one instance; any disqualifying
/// check on that node excludes the record.
pub fn passing_services(checks: &[HealthCheck], status: &[String]) -> Vec<HealthCheck> {
    let mut passing = Vec::new();

    for svc in checks {
        if !is_instance_check(svc) {
            continue;
        }
        if !status.iter().any(|s| *s == svc.status) {
            continue;
        }

        let mut excluded = false;
        for c in checks.iter().filter(|c| c.node == svc.node) {
            if c.check_id == SERF_HEALTH_CHECK && c.status == STATUS_CRITICAL {
                info!(
                    service_id = %svc.service_id,
                    node = %svc.node,
                    output = %c.output,
                    "skipping service since agent on node is down"
                );
                excluded = true;
            } else if c.check_id == NODE_MAINTENANCE_CHECK {
                info!(
                    service_id = %svc.service_id,
                    node = %svc.node,
                    output = %c.output,
                    "skipping service since node is in maintenance mode"
                );
                excluded = true;
            } else if c.status == STATUS_CRITICAL
                && c.check_id.strip_prefix(SERVICE_MAINTENANCE_PREFIX) == Some(svc.service_id.as_str())
            {
                info!(
                    service_id = %svc.service_id,
                    output = %c.output,
                    "skipping service since it is in maintenance mode"
                );
                excluded = true;
            }

            if excluded {
                break;
            }
        }

        if !excluded {
            passing.push(svc.clone());
        }
    }

    passing
}

/// Whether a record belongs to a service instance rather than to the node,
/// the agent, or another instance's maintenance state.
fn is_instance_check(check: &HealthCheck) -> bool {
    if check.service_id.is_empty()
        || check.check_id == SERF_HEALTH_CHECK
        || check.check_id == NODE_MAINTENANCE_CHECK
    {
        return false;
    }
    match check.check_id.strip_prefix(SERVICE_MAINTENANCE_PREFIX) {
        Some(target) => target == check.service_id,
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn ids(checks: &[HealthCheck]) -> Vec<&str> {
        checks.iter().map(|c| c.service_id.as_str()).collect()
    }

    #[test]
    fn test_passing_and_critical_instances() {
        let checks = vec![
            HealthCheck::service("n1", "api", "A", "passing"),
            HealthCheck::service("n2", "api", "B", "critical"),
        ];

        let passing = passing_services(&checks, &status(&["passing"]));
        assert_eq!(ids(&passing), vec!["A"]);
    }

    #[test]
    fn test_accepted_status_set() {
        let checks = vec![
            HealthCheck::service("n1", "api", "A", "passing"),
            HealthCheck::service("n2", "api", "B", "warning"),
            HealthCheck::service("n3", "api", "C", "critical"),
        ];

        let passing = passing_services(&checks, &status(&["passing", "warning"]));
        assert_eq!(ids(&passing), vec!["A", "B"]);
    }

    #[test]
    fn test_node_level_checks_are_not_instances() {
        let checks = vec![
            HealthCheck::node("n1", SERF_HEALTH_CHECK, "passing"),
            HealthCheck::service("n1", "api", "A", "passing"),
        ];

        let passing = passing_services(&checks, &status(&["passing"]));
        assert_eq!(ids(&passing), vec!["A"]);
    }

    #[test]
    fn test_dead_agent_excludes_node() {
        let checks = vec![
            HealthCheck::service("n1", "api", "A", "passing"),
            HealthCheck::node("n1", SERF_HEALTH_CHECK, "critical").with_output("Agent not live"),
            HealthCheck::service("n2", "api", "B", "passing"),
            HealthCheck::node("n2", SERF_HEALTH_CHECK, "passing"),
        ];

        let passing = passing_services(&checks, &status(&["passing"]));
        assert_eq!(ids(&passing), vec!["B"]);
    }

    #[test]
    fn test_node_maintenance_excludes_node() {
        let checks = vec![
            HealthCheck::node("n1", NODE_MAINTENANCE_CHECK, "critical"),
            HealthCheck::service("n1", "api", "A", "passing"),
            HealthCheck::service("n1", "api", "A2", "passing"),
            HealthCheck::service("n2", "api", "B", "passing"),
        ];

        let passing = passing_services(&checks, &status(&["passing"]));
        assert_eq!(ids(&passing), vec!["B"]);
    }

    #[test]
    fn test_service_maintenance_excludes_only_that_instance() {
        let mut maintenance = HealthCheck::service("n1", "api", "A", "critical");
        maintenance.check_id = format!("{}A", SERVICE_MAINTENANCE_PREFIX);

        let checks = vec![
            HealthCheck::service("n1", "api", "A", "passing"),
            maintenance,
            HealthCheck::service("n1", "api", "A2", "passing"),
        ];

        // Even when critical counts as accepted, the maintenance record
        // itself never passes as an instance.
        let passing = passing_services(&checks, &status(&["passing", "critical"]));
        assert_eq!(ids(&passing), vec!["A2"]);
    }

    #[test]
    fn test_maintenance_for_another_service_is_ignored() {
        let mut foreign = HealthCheck::service("n1", "api", "A", "passing");
        foreign.check_id = format!("{}B", SERVICE_MAINTENANCE_PREFIX);

        let checks = vec![HealthCheck::service("n1", "api", "A", "passing"), foreign];

        let passing = passing_services(&checks, &status(&["passing"]));
        assert_eq!(passing.len(), 1);
        assert_eq!(passing[0].check_id, "service:A");
    }

    #[test]
    fn test_exclusion_is_order_independent() {
        let mut checks = vec![
            HealthCheck::service("n1", "api", "A", "passing"),
            HealthCheck::node("n1", SERF_HEALTH_CHECK, "critical"),
            HealthCheck::service("n2", "api", "B", "passing"),
            HealthCheck::node("n2", NODE_MAINTENANCE_CHECK, "critical"),
            HealthCheck::service("n3", "api", "C", "passing"),
        ];

        let forward = passing_services(&checks, &status(&["passing"]));
        checks.reverse();
        let backward = passing_services(&checks, &status(&["passing"]));

        assert_eq!(ids(&forward), vec!["C"]);
        assert_eq!(ids(&backward), vec!["C"]);
    }

    #[test]
    fn test_empty_input() {
        assert!(passing_services(&[], &status(&["passing"])).is_empty());
    }
}
