//! Change detection between consecutive poll results

use crate::types::{Cluster, Endpoint, HealthCheck, tags_equal};

/// Field-by-field identity of two check records. `output` is diagnostic
/// text and never part of the comparison.
fn same_check(a: &HealthCheck, b: &HealthCheck) -> bool {
    a.node == b.node
        && a.check_id == b.check_id
        && a.name == b.name
        && a.status == b.status
        && a.service_id == b.service_id
        && a.service_name == b.service_name
        && tags_equal(&a.service_tags, &b.service_tags)
}

/// Set equality of two check lists, independent of order.
pub fn checks_equal(old: &[HealthCheck], new: &[HealthCheck]) -> bool {
    let contained = |h1: &[HealthCheck], h2: &[HealthCheck]| {
        h1.iter().all(|h| h2.iter().any(|j| same_check(h, j)))
    };
    contained(old, new) && contained(new, old)
}

fn sorted_endpoints(cluster: &Cluster) -> Vec<&Endpoint> {
    let mut endpoints: Vec<&Endpoint> = cluster.endpoints.iter().collect();
    endpoints.sort_by(|a, b| a.id.cmp(&b.id));
    endpoints
}

/// Whether `new` differs from the previously emitted `last`.
///
/// Clusters compare position by position; endpoints within a cluster are
/// compared after sorting by id.
pub fn clusters_changed(new: &[Cluster], last: &[Cluster]) -> bool {
    if new.len() != last.len() {
        return true;
    }
    new.iter().zip(last).any(|(c1, c2)| {
        c1.name != c2.name || sorted_endpoints(c1) != sorted_endpoints(c2)
    })
}
