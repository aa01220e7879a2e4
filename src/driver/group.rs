//! Origin grouping of input URIs

use crate::url::{Origin, RequestUri};

/// Input URIs that share one connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OriginGroup {
    pub origin: Origin,
    pub uris: Vec<RequestUri>,
}

/// Groups raw input URIs by origin
///
/// Groups keep the order in which their origin first appears, and URIs keep
/// their input order within a group. Unparseable URIs are logged and skipped.
pub fn group_by_origin<S: AsRef<str>>(raw: &[S]) -> Vec<OriginGroup> {
    let mut groups: Vec<OriginGroup> = Vec::new();

    for input in raw {
        let input = input.as_ref();
        let uri = match RequestUri::parse(input) {
            Ok(uri) => uri,
            Err(e) => {
                tracing::warn!("Skipping {}: {}", input, e);
                continue;
            }
        };

        let origin = uri.origin();
        match groups.iter_mut().find(|g| g.origin == origin) {
            Some(group) => group.uris.push(uri),
            None => groups.push(OriginGroup {
                origin,
                uris: vec![uri],
            }),
        }
    }

    groups
}
