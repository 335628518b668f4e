//! Accumulated rigid constraints between local maps.
//!
//! A relation between two maps is estimated from repeated observations:
//! every frame in which a candidate map and the primary both track well
//! yields one sample of their relative transform. The estimate is a
//! reweighted average: starting from the plain mean, a few rounds of
//! inlier reselection pull it onto the dominant cluster, so early bad
//! samples cannot poison the constraint.

use nalgebra::{Quaternion, Translation3, UnitQuaternion, Vector3, Vector4};
use serde::{Deserialize, Serialize};

use crate::core::pose::{self, Pose};

/// Translation agreement threshold for inlier samples, meters.
const INLIER_TRANSLATION: f32 = 0.2;

/// Rotation agreement threshold for inlier samples, radians (~10 deg).
const INLIER_ROTATION: f32 = 0.175;

/// Reweighting rounds when estimating.
const REESTIMATE_ROUNDS: usize = 4;

/// One confirmed inter-map constraint, as handed to the graph solver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationConstraint {
    /// Source map index.
    pub from: usize,
    /// Target map index.
    pub to: usize,
    /// Transform mapping `from`-map coordinates into `to`-map coordinates.
    pub transform: Pose,
    /// Confirmed inlier count backing the transform.
    pub weight: usize,
}

/// Accumulated estimate of the rigid transform between a pair of maps.
#[derive(Debug, Clone, Default)]
pub struct MapRelation {
    samples: Vec<Pose>,
}

impl MapRelation {
    /// An empty relation with no observations.
    pub fn new() -> Self {
        Self::default()
    }

    /// A relation seeded from an exactly-known transform (e.g. a new map
    /// spawned at the current camera pose), pre-weighted so it survives
    /// candidate retirement checks.
    pub fn from_exact(transform: &Pose, weight: usize) -> Self {
        Self {
            samples: vec![*transform; weight.max(1)],
        }
    }

    /// Feed one observed transform sample.
    pub fn add_sample(&mut self, sample: &Pose) {
        self.samples.push(*sample);
    }

    /// The current estimate and its inlier count, once any samples
    /// exist.
    pub fn estimate(&self) -> Option<(Pose, usize)> {
        if self.samples.is_empty() {
            return None;
        }

        let mut current = Self::average(&self.samples);
        for _ in 0..REESTIMATE_ROUNDS {
            let inliers: Vec<Pose> = self
                .samples
                .iter()
                .filter(|s| Self::agrees(&current, s))
                .copied()
                .collect();
            if inliers.is_empty() {
                break;
            }
            current = Self::average(&inliers);
        }

        let inlier_count = self
            .samples
            .iter()
            .filter(|s| Self::agrees(&current, s))
            .count();
        Some((current, inlier_count))
    }

    /// The current mean transform.
    pub fn mean(&self) -> Option<Pose> {
        self.estimate().map(|(pose, _)| pose)
    }

    /// Samples agreeing with the current estimate.
    pub fn inliers(&self) -> usize {
        self.estimate().map_or(0, |(_, count)| count)
    }

    /// Samples rejected by the current estimate.
    pub fn outliers(&self) -> usize {
        self.attempts() - self.inliers()
    }

    /// Total samples offered.
    #[inline]
    pub fn attempts(&self) -> usize {
        self.samples.len()
    }

    /// Fraction of offered samples the estimate rejects.
    pub fn outlier_ratio(&self) -> f32 {
        if self.samples.is_empty() {
            0.0
        } else {
            self.outliers() as f32 / self.attempts() as f32
        }
    }

    /// Replace the estimate with a solved transform, keeping the inlier
    /// weight. Used when ingesting optimizer output.
    pub fn reset_to(&mut self, transform: &Pose) {
        let weight = self.inliers().max(1);
        self.samples = vec![*transform; weight];
    }

    fn agrees(estimate: &Pose, sample: &Pose) -> bool {
        pose::translation_between(estimate, sample) < INLIER_TRANSLATION
            && pose::rotation_between(estimate, sample) < INLIER_ROTATION
    }

    fn average(poses: &[Pose]) -> Pose {
        let n = poses.len() as f32;
        let mut translation_sum = Vector3::zeros();
        let mut quaternion_sum = Vector4::zeros();
        let reference = poses[0].rotation;
        for p in poses {
            translation_sum += p.translation.vector;
            quaternion_sum += pose::align_quaternion(&p.rotation, &reference).coords;
        }
        Pose::from_parts(
            Translation3::from(translation_sum / n),
            UnitQuaternion::from_quaternion(Quaternion::from_vector(quaternion_sum / n)),
        )
    }
}
