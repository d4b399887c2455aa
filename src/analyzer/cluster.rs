//! Greedy skeleton clustering

use crate::analyzer::model::ContentKind;
use crate::analyzer::skeleton::{similarity, Skeleton};

/// A group of structurally similar snapshots
#[derive(Debug, Clone, PartialEq)]
pub struct Cluster {
    pub kind: ContentKind,
    /// Skeleton of the first member; later members are compared against it
    pub skeleton: Skeleton,
    /// Indices into the input slice, ascending
    pub members: Vec<usize>,
}

/// Clusters skeletons in input order
///
/// Each item joins the existing cluster it is most similar to, provided the
/// similarity reaches `threshold`; ties go to the earliest cluster. Otherwise it
/// opens a new cluster. Callers pass items in canonical order so that the result
/// does not depend on the order in which snapshots were collected.
pub fn cluster(items: &[(ContentKind, Skeleton)], threshold: f64) -> Vec<Cluster> {
    let mut clusters: Vec<Cluster> = Vec::new();

    for (index, (kind, skeleton)) in items.iter().enumerate() {
        let mut best: Option<(usize, f64)> = None;
        for (i, candidate) in clusters.iter().enumerate() {
            let score = similarity(*kind, skeleton, candidate.kind, &candidate.skeleton);
            if score < threshold {
                continue;
            }
            if best.map(|(_, b)| score > b).unwrap_or(true) {
                best = Some((i, score));
            }
        }

        match best {
            Some((i, _)) => clusters[i].members.push(index),
            None => clusters.push(Cluster {
                kind: *kind,
                skeleton: skeleton.clone(),
                members: vec![index],
            }),
        }
    }

    clusters
}
