use crate::crd::{EdgeApplicationStatus, ManifestStatus, ResourceIdentifier};
use crate::template::ResourceInfo;

/// Workload status listing exactly the produced objects.
///
/// Entries for objects still produced keep their condition, new objects
/// start out `Processing`, and every ordinal that failed to decode gets a
/// placeholder entry. A decoded template that expands to nothing gets no
/// entry at all. The result is ordered by (ordinal, name).
pub fn status_skeleton(
    current: Option<&EdgeApplicationStatus>,
    produced: &[ResourceInfo],
    failed_ordinals: &[usize],
) -> EdgeApplicationStatus {
    let identifiers: Vec<ResourceIdentifier> = produced.iter().map(ResourceInfo::identifier).collect();

    let mut entries: Vec<ManifestStatus> = Vec::new();
    for entry in current.map(|s| s.workload_status.as_slice()).unwrap_or_default() {
        let keep = if entry.identifier.is_placeholder() {
            failed_ordinals.contains(&entry.identifier.ordinal)
        } else {
            identifiers.contains(&entry.identifier)
        };
        if keep && !entries.iter().any(|e| e.identifier == entry.identifier) {
            entries.push(entry.clone());
        }
    }

    for identifier in identifiers {
        if !entries.iter().any(|e| e.identifier == identifier) {
            entries.push(ManifestStatus::processing(identifier));
        }
    }

    for &ordinal in failed_ordinals {
        let placeholder = ResourceIdentifier::placeholder(ordinal);
        if !entries.iter().any(|e| e.identifier == placeholder) {
            entries.push(ManifestStatus::processing(placeholder));
        }
    }

    let mut status = EdgeApplicationStatus {
        workload_status: entries,
    };
    status.sort_entries();
    status
}
