//! Ownership of all local maps and the inter-map transform graph.

use std::collections::{HashMap, VecDeque};

use log::{debug, info};

use crate::config::SceneConfig;
use crate::core::image::ImageSize;
use crate::core::pose::Pose;

use super::local_map::LocalMap;
use super::relation::{MapRelation, RelationConstraint};

/// Owns every [`LocalMap`] and the edge-labelled graph of rigid
/// transforms between them. All other components hold map indices only.
#[derive(Debug)]
pub struct SceneManager {
    maps: Vec<LocalMap>,
    relations: HashMap<(usize, usize), MapRelation>,
    scene_config: SceneConfig,
    tracked_size: ImageSize,
}

impl SceneManager {
    /// Create a manager with no maps yet.
    pub fn new(scene_config: SceneConfig, tracked_size: ImageSize) -> Self {
        Self {
            maps: Vec::new(),
            relations: HashMap::new(),
            scene_config,
            tracked_size,
        }
    }

    /// Allocate a new local map and return its index.
    pub fn new_scene(&mut self) -> usize {
        let idx = self.maps.len();
        self.maps.push(LocalMap::new(&self.scene_config, self.tracked_size));
        debug!("created local map {idx}");
        idx
    }

    /// Number of local maps.
    #[inline]
    pub fn num_scenes(&self) -> usize {
        self.maps.len()
    }

    /// Borrow a map.
    #[inline]
    pub fn get(&self, idx: usize) -> &LocalMap {
        &self.maps[idx]
    }

    /// Mutably borrow a map.
    #[inline]
    pub fn get_mut(&mut self, idx: usize) -> &mut LocalMap {
        &mut self.maps[idx]
    }

    /// Scene parameters shared by every map.
    pub fn scene_config(&self) -> &SceneConfig {
        &self.scene_config
    }

    /// Tracked-image size maps are created with.
    pub fn tracked_size(&self) -> ImageSize {
        self.tracked_size
    }

    /// Number of committed relations.
    pub fn num_relations(&self) -> usize {
        self.relations.len()
    }

    /// The accumulated relation between two maps, if any observations
    /// exist. Keys are stored with `from < to`; the mean is oriented on
    /// demand.
    pub fn relation(&self, from: usize, to: usize) -> Option<&MapRelation> {
        self.relations.get(&Self::key(from, to))
    }

    /// Commit an exactly-known transform between two maps.
    pub fn set_relation(&mut self, from: usize, to: usize, transform: &Pose, weight: usize) {
        let (key, oriented) = Self::orient(from, to, transform);
        info!("committing relation {} -> {}", key.0, key.1);
        self.relations
            .insert(key, MapRelation::from_exact(&oriented, weight));
    }

    /// Merge an accumulated candidate relation into the graph.
    pub fn commit_relation(&mut self, from: usize, to: usize, relation: MapRelation) {
        let Some(mean) = relation.mean() else {
            return;
        };
        let (key, oriented) = Self::orient(from, to, &mean);
        info!(
            "committing relation {} -> {} ({} inliers)",
            key.0,
            key.1,
            relation.inliers()
        );
        self.relations
            .insert(key, MapRelation::from_exact(&oriented, relation.inliers()));
    }

    /// Rigid transform mapping `from`-map coordinates into `to`-map
    /// coordinates.
    ///
    /// Identity when the maps coincide; a direct edge when one exists;
    /// otherwise the composition along a breadth-first path through the
    /// graph. Disconnected pairs also yield identity, leaving the caller
    /// to treat the maps as coincident until a link is found.
    pub fn find_transform(&self, from: usize, to: usize) -> Pose {
        if from == to {
            return Pose::identity();
        }
        if let Some(direct) = self.edge(from, to) {
            return direct;
        }

        // Breadth-first over the relation graph, composing edges.
        let mut queue = VecDeque::new();
        let mut reached: HashMap<usize, Pose> = HashMap::new();
        queue.push_back(from);
        reached.insert(from, Pose::identity());

        while let Some(current) = queue.pop_front() {
            let so_far = reached[&current];
            for &(a, b) in self.relations.keys() {
                let next = if a == current {
                    b
                } else if b == current {
                    a
                } else {
                    continue;
                };
                if reached.contains_key(&next) {
                    continue;
                }
                let Some(step) = self.edge(current, next) else {
                    continue;
                };
                let composed = step * so_far;
                if next == to {
                    return composed;
                }
                reached.insert(next, composed);
                queue.push_back(next);
            }
        }

        Pose::identity()
    }

    /// Snapshot of every committed constraint, for the optimizer.
    pub fn constraints(&self) -> Vec<RelationConstraint> {
        self.relations
            .iter()
            .filter_map(|(&(from, to), relation)| {
                relation.mean().map(|transform| RelationConstraint {
                    from,
                    to,
                    transform,
                    weight: relation.inliers(),
                })
            })
            .collect()
    }

    /// Ingest solved per-map global poses, rewriting each committed
    /// relation from the new estimates.
    pub fn apply_estimates(&mut self, estimates: &[(usize, Pose)]) {
        let poses: HashMap<usize, Pose> = estimates.iter().copied().collect();
        for (&(from, to), relation) in self.relations.iter_mut() {
            let (Some(p_from), Some(p_to)) = (poses.get(&from), poses.get(&to)) else {
                continue;
            };
            // Global pose P maps map coordinates into the global frame,
            // so from->to composes as P_to^-1 * P_from.
            relation.reset_to(&(p_to.inverse() * p_from));
        }
    }

    fn key(a: usize, b: usize) -> (usize, usize) {
        if a < b { (a, b) } else { (b, a) }
    }

    fn orient(from: usize, to: usize, transform: &Pose) -> ((usize, usize), Pose) {
        if from < to {
            ((from, to), *transform)
        } else {
            ((to, from), transform.inverse())
        }
    }

    /// Direct edge transform `from -> to`, if committed.
    fn edge(&self, from: usize, to: usize) -> Option<Pose> {
        let relation = self.relations.get(&Self::key(from, to))?;
        let mean = relation.mean()?;
        if from < to {
            Some(mean)
        } else {
            Some(mean.inverse())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::pose;
    use approx::assert_relative_eq;
    use nalgebra::{Translation3, UnitQuaternion, Vector3};

    fn manager() -> SceneManager {
        SceneManager::new(SceneConfig::default(), ImageSize::new(32, 32))
    }

    fn shift(x: f32, y: f32, yaw: f32) -> Pose {
        Pose::from_parts(
            Translation3::new(x, y, 0.0),
            UnitQuaternion::from_scaled_axis(Vector3::z() * yaw),
        )
    }

    #[test]
    fn test_new_scene_indices_are_dense() {
        let mut mgr = manager();
        assert_eq!(mgr.new_scene(), 0);
        assert_eq!(mgr.new_scene(), 1);
        assert_eq!(mgr.num_scenes(), 2);
    }

    #[test]
    fn test_find_transform_identity_cases() {
        let mut mgr = manager();
        mgr.new_scene();
        mgr.new_scene();

        assert_eq!(mgr.find_transform(0, 0), Pose::identity());
        // Disconnected maps read as coincident.
        assert_eq!(mgr.find_transform(0, 1), Pose::identity());
    }

    #[test]
    fn test_direct_edge_and_inverse() {
        let mut mgr = manager();
        mgr.new_scene();
        mgr.new_scene();

        let t = shift(1.0, 0.5, 0.3);
        mgr.set_relation(0, 1, &t, 5);

        let forward = mgr.find_transform(0, 1);
        let backward = mgr.find_transform(1, 0);
        let roundtrip = backward * forward;

        assert!(pose::translation_between(&forward, &t) < 1e-4);
        assert!(pose::translation_between(&roundtrip, &Pose::identity()) < 1e-4);
        assert!(pose::rotation_between(&roundtrip, &Pose::identity()) < 1e-4);
    }

    #[test]
    fn test_transform_composes_across_path() {
        let mut mgr = manager();
        mgr.new_scene();
        mgr.new_scene();
        mgr.new_scene();

        let t01 = shift(1.0, 0.0, 0.0);
        let t12 = shift(0.0, 2.0, 0.0);
        mgr.set_relation(0, 1, &t01, 5);
        mgr.set_relation(1, 2, &t12, 5);

        let t02 = mgr.find_transform(0, 2);
        let expected = t12 * t01;
        assert_relative_eq!(
            t02.translation.vector,
            expected.translation.vector,
            epsilon = 1e-4
        );
    }

    #[test]
    fn test_constraints_snapshot() {
        let mut mgr = manager();
        mgr.new_scene();
        mgr.new_scene();
        mgr.set_relation(0, 1, &shift(1.0, 0.0, 0.0), 7);

        let constraints = mgr.constraints();
        assert_eq!(constraints.len(), 1);
        assert_eq!(constraints[0].weight, 7);
        assert_eq!((constraints[0].from, constraints[0].to), (0, 1));
    }

    #[test]
    fn test_apply_estimates_rewrites_edges() {
        let mut mgr = manager();
        mgr.new_scene();
        mgr.new_scene();
        mgr.set_relation(0, 1, &shift(1.0, 0.0, 0.0), 5);

        // Solved global poses: map 0 at origin, map 1 shifted by -2x.
        let estimates = vec![(0, Pose::identity()), (1, shift(-2.0, 0.0, 0.0))];
        mgr.apply_estimates(&estimates);

        let t01 = mgr.find_transform(0, 1);
        assert_relative_eq!(t01.translation.vector.x, 2.0, epsilon = 1e-4);
    }
}
