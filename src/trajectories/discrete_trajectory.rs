//! Fork-tree store of time-ordered samples.
//!
//! One [`DiscreteTrajectory`] owns every branch of one fork tree. Branches
//! are addressed by [`BranchId`] handles that stay valid for the lifetime of
//! the tree; the root branch is [`DiscreteTrajectory::root`]. Queries
//! interpolate with a cubic Hermite polynomial fitted to the two samples
//! bracketing the query time, so position **and** velocity are continuous
//! across samples.
//!
//! Memory is bounded by [`DiscreteTrajectory::downsample`], which drops raw
//! interior samples that interpolation of the retained neighbours reproduces
//! within a fitting tolerance, and by [`DiscreteTrajectory::forget_before`],
//! which trims the root prefix without ever crossing a live fork point.

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::degrees_of_freedom::DegreesOfFreedom;
use crate::orrery_errors::OrreryError;
use crate::time::Instant;

/// Current snapshot layout version.
const SNAPSHOT_VERSION: u32 = 1;

/// Longest run of raw samples a single downsampling window may replace.
const DOWNSAMPLING_WINDOW: usize = 16;

/// Stable handle to one branch of a fork tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BranchId(pub(crate) usize);

/// One (instant, state) point of a branch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub time: Instant,
    pub degrees_of_freedom: DegreesOfFreedom,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Branch {
    /// Owning ancestor and the fork time in its timeline; `None` for the
    /// root. The fork-time sample belongs to the parent.
    parent: Option<(usize, Instant)>,
    samples: Vec<Sample>,
    #[serde(skip)]
    children: SmallVec<[usize; 2]>,
    alive: bool,
    /// Leading samples already covered by a downsampling pass; the next
    /// pass re-anchors at the last of them and fits the appended tail only.
    #[serde(default)]
    fitted: usize,
}

/// A fork tree of time-ordered samples for one body.
#[derive(Debug, Clone)]
pub struct DiscreteTrajectory {
    branches: Vec<Branch>,
}

impl Default for DiscreteTrajectory {
    fn default() -> Self {
        Self::new()
    }
}

impl DiscreteTrajectory {
    pub fn new() -> Self {
        Self {
            branches: vec![Branch {
                parent: None,
                samples: Vec::new(),
                children: SmallVec::new(),
                alive: true,
                fitted: 0,
            }],
        }
    }

    pub fn root(&self) -> BranchId {
        BranchId(0)
    }

    fn branch(&self, id: BranchId) -> Result<&Branch, OrreryError> {
        match self.branches.get(id.0) {
            Some(branch) if branch.alive => Ok(branch),
            _ => Err(OrreryError::BranchNotFound(id.0)),
        }
    }

    /// The chain of ancestors of `id`, root first, including `id` itself.
    /// Each entry carries the index one past the last sample of that branch
    /// visible from `id` (the fork-point sample is visible).
    fn lineage(&self, id: BranchId) -> Result<Vec<(usize, usize)>, OrreryError> {
        self.branch(id)?;
        let mut chain: Vec<(usize, usize)> = Vec::new();
        let mut current = id.0;
        let mut upper: Option<Instant> = None;
        loop {
            let branch = &self.branches[current];
            let end = match upper {
                None => branch.samples.len(),
                Some(fork_time) => branch
                    .samples
                    .partition_point(|s| s.time <= fork_time),
            };
            chain.push((current, end));
            match branch.parent {
                Some((parent, fork_time)) => {
                    upper = Some(fork_time);
                    current = parent;
                }
                None => break,
            }
        }
        chain.reverse();
        Ok(chain)
    }

    /// Visible sample slices of `id`, root prefix first. Slices are
    /// contiguous in time and non-empty.
    fn segments(&self, id: BranchId) -> Result<Vec<&[Sample]>, OrreryError> {
        let chain = self.lineage(id)?;
        Ok(chain
            .into_iter()
            .map(|(index, end)| &self.branches[index].samples[..end])
            .filter(|slice| !slice.is_empty())
            .collect())
    }

    /// Earliest retained instant visible from `id`.
    pub fn t_min(&self, id: BranchId) -> Result<Option<Instant>, OrreryError> {
        Ok(self.segments(id)?.first().map(|s| s[0].time))
    }

    /// Latest computed instant visible from `id`.
    pub fn t_max(&self, id: BranchId) -> Result<Option<Instant>, OrreryError> {
        Ok(self.segments(id)?.last().map(|s| s[s.len() - 1].time))
    }

    /// Last sample visible from `id`.
    pub fn last(&self, id: BranchId) -> Result<Option<Sample>, OrreryError> {
        Ok(self.segments(id)?.last().map(|s| s[s.len() - 1]))
    }

    /// Number of samples visible from `id` (ancestor prefix included).
    pub fn len(&self, id: BranchId) -> Result<usize, OrreryError> {
        Ok(self.segments(id)?.iter().map(|s| s.len()).sum())
    }

    pub fn is_empty(&self, id: BranchId) -> Result<bool, OrreryError> {
        Ok(self.len(id)? == 0)
    }

    /// Extends branch `id` by one sample.
    ///
    /// Return
    /// ----------
    /// * `Err(OrreryError::OutOfOrderAppend)` unless `time` is strictly
    ///   greater than the branch's last visible time.
    pub fn append(
        &mut self,
        id: BranchId,
        time: Instant,
        degrees_of_freedom: DegreesOfFreedom,
    ) -> Result<(), OrreryError> {
        if let Some(last) = self.last(id)? {
            if time <= last.time {
                return Err(OrreryError::OutOfOrderAppend {
                    last: last.time,
                    appended: time,
                });
            }
        }
        self.branches[id.0].samples.push(Sample {
            time,
            degrees_of_freedom,
        });
        Ok(())
    }

    /// Creates a new branch sharing the ancestor prefix of `id` up to
    /// `at_time`, which must be an exact retained sample time visible from
    /// `id`. O(1) in the number of samples; nothing is copied.
    pub fn fork(&mut self, id: BranchId, at_time: Instant) -> Result<BranchId, OrreryError> {
        self.branch(id)?;
        // Find the branch owning the sample at `at_time`.
        let mut current = id.0;
        let owner = loop {
            let branch = &self.branches[current];
            match branch.parent {
                Some((parent, fork_time)) if at_time <= fork_time => current = parent,
                _ => break current,
            }
        };
        let samples = &self.branches[owner].samples;
        let position = samples.partition_point(|s| s.time < at_time);
        if position >= samples.len() || samples[position].time != at_time {
            return Err(OrreryError::ForkTimeNotInTrajectory(at_time));
        }
        let child = self.branches.len();
        self.branches.push(Branch {
            parent: Some((owner, at_time)),
            samples: Vec::new(),
            children: SmallVec::new(),
            alive: true,
            fitted: 0,
        });
        self.branches[owner].children.push(child);
        Ok(BranchId(child))
    }

    /// Deletes a leaf branch, e.g. an invalidated prediction.
    pub fn delete_fork(&mut self, id: BranchId) -> Result<(), OrreryError> {
        let branch = self.branch(id)?;
        let Some((parent, _)) = branch.parent else {
            return Err(OrreryError::BranchNotFound(id.0));
        };
        if branch.children.iter().any(|&c| self.branches[c].alive) {
            return Err(OrreryError::BranchHasForks(id.0));
        }
        self.branches[parent].children.retain(|c| *c != id.0);
        self.branches[id.0].alive = false;
        self.branches[id.0].samples.clear();
        self.branches[id.0].fitted = 0;
        Ok(())
    }

    /// Earliest fork time of a live child of the root, if any. Forgetting
    /// may not cross it.
    fn earliest_root_fork(&self) -> Option<Instant> {
        self.branches[0]
            .children
            .iter()
            .filter(|&&c| self.branches[c].alive)
            .filter_map(|&c| self.branches[c].parent.map(|(_, t)| t))
            .min_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
    }

    /// Removes root-prefix samples strictly before `time`, clamped so that
    /// no live fork point is crossed and the root never becomes empty. A
    /// no-op is not an error.
    ///
    /// Return
    /// ----------
    /// * The instant the prefix was actually trimmed to.
    pub fn forget_before(&mut self, time: Instant) -> Instant {
        let mut bound = time;
        if let Some(fork) = self.earliest_root_fork() {
            if fork < bound {
                bound = fork;
            }
        }
        let root = &mut self.branches[0];
        if let Some(last) = root.samples.last() {
            if last.time < bound {
                bound = last.time;
            }
        }
        let cut = root.samples.partition_point(|s| s.time < bound);
        root.samples.drain(..cut);
        root.fitted = root.fitted.saturating_sub(cut);
        bound
    }

    /// Evaluates position and velocity at `time` on branch `id`, using a
    /// cubic Hermite interpolant over the bracketing samples.
    ///
    /// Return
    /// ----------
    /// * `Err(OrreryError::TimeOutOfRange)` if `time` lies outside
    ///   `[t_min, t_max]`; `Err(OrreryError::EmptyTrajectory)` if the branch
    ///   has no samples at all.
    pub fn evaluate_degrees_of_freedom(
        &self,
        id: BranchId,
        time: Instant,
    ) -> Result<DegreesOfFreedom, OrreryError> {
        let segments = self.segments(id)?;
        let (first, last) = match (segments.first(), segments.last()) {
            (Some(f), Some(l)) => (f[0], l[l.len() - 1]),
            _ => return Err(OrreryError::EmptyTrajectory),
        };
        if time < first.time || time > last.time {
            return Err(OrreryError::TimeOutOfRange {
                t: time,
                t_min: first.time,
                t_max: last.time,
            });
        }

        // Locate the bracketing pair across segment boundaries.
        let mut below = first;
        let mut above = last;
        for segment in &segments {
            let begin = segment[0];
            let end = segment[segment.len() - 1];
            if time > end.time {
                below = end;
                continue;
            }
            if time < begin.time {
                above = begin;
                break;
            }
            let position = segment.partition_point(|s| s.time < time);
            if segment[position].time == time {
                return Ok(segment[position].degrees_of_freedom);
            }
            below = segment[position - 1];
            above = segment[position];
            break;
        }
        Ok(hermite_evaluate(&below, &above, time))
    }

    pub fn evaluate_position(
        &self,
        id: BranchId,
        time: Instant,
    ) -> Result<Vector3<f64>, OrreryError> {
        Ok(self.evaluate_degrees_of_freedom(id, time)?.position)
    }

    /// Lazy iteration over every sample visible from `id`, ancestor prefix
    /// included. The iterator is finite and a fresh one can be created at
    /// any time to restart.
    pub fn iter(&self, id: BranchId) -> Result<TrajectoryIterator<'_>, OrreryError> {
        Ok(TrajectoryIterator {
            segments: self.segments(id)?,
            segment: 0,
            index: 0,
        })
    }

    /// Like [`iter`](Self::iter), starting at the first sample with
    /// `time >= from`.
    pub fn iter_from(
        &self,
        id: BranchId,
        from: Instant,
    ) -> Result<TrajectoryIterator<'_>, OrreryError> {
        let segments = self.segments(id)?;
        let mut segment = 0;
        let mut index = 0;
        for (i, slice) in segments.iter().enumerate() {
            if slice[slice.len() - 1].time < from {
                continue;
            }
            segment = i;
            index = slice.partition_point(|s| s.time < from);
            break;
        }
        if segments
            .last()
            .is_some_and(|s| s[s.len() - 1].time < from)
        {
            segment = segments.len();
        }
        Ok(TrajectoryIterator {
            segments,
            segment,
            index,
        })
    }

    /// Times of the fork points of live children of `id`, in `id`'s own
    /// timeline. These samples may never be dropped by downsampling.
    fn pinned_times(&self, id: BranchId) -> Vec<Instant> {
        self.branches[id.0]
            .children
            .iter()
            .filter(|&&c| self.branches[c].alive)
            .filter_map(|&c| self.branches[c].parent.map(|(_, t)| t))
            .collect()
    }

    /// Replaces dense raw samples of branch `id` by a sparser subset whose
    /// Hermite interpolant deviates from the dropped samples by at most
    /// `fitting_tolerance` in position. First and last samples and live fork
    /// points are always retained.
    ///
    /// This is the mechanism keeping multi-century integrations
    /// memory-bounded; the tolerance bounds the extra error introduced in
    /// later queries.
    pub fn downsample(
        &mut self,
        id: BranchId,
        fitting_tolerance: f64,
    ) -> Result<usize, OrreryError> {
        self.branch(id)?;
        let pinned = self.pinned_times(id);
        let samples = &self.branches[id.0].samples;
        // Samples before the watermark already survived a pass; re-anchor at
        // the last of them and fit the appended tail only, so repeated calls
        // cost time proportional to what was appended since the previous one.
        let start = self.branches[id.0]
            .fitted
            .min(samples.len())
            .saturating_sub(1);
        if samples.len() - start < 3 {
            // Too short a tail to thin; leave the watermark so the samples
            // accumulate for a later pass.
            return Ok(0);
        }
        let is_pinned = |s: &Sample| pinned.iter().any(|&t| t == s.time);

        let mut kept: Vec<usize> = vec![start];
        let mut anchor = start;
        while anchor < samples.len() - 1 {
            let mut best = anchor + 1;
            let mut candidate = anchor + 2;
            while candidate < samples.len() && candidate - anchor <= DOWNSAMPLING_WINDOW {
                // A pinned sample inside the window would be dropped.
                if samples[anchor + 1..candidate].iter().any(is_pinned) {
                    break;
                }
                let fits = (anchor + 1..candidate).all(|k| {
                    let interpolated = hermite_evaluate(
                        &samples[anchor],
                        &samples[candidate],
                        samples[k].time,
                    );
                    (interpolated.position - samples[k].degrees_of_freedom.position).norm()
                        <= fitting_tolerance
                });
                if !fits {
                    break;
                }
                best = candidate;
                candidate += 1;
            }
            kept.push(best);
            anchor = best;
        }

        let removed = (samples.len() - start) - kept.len();
        if removed > 0 {
            let samples = &mut self.branches[id.0].samples;
            let mut write = start;
            for &k in &kept {
                samples[write] = samples[k];
                write += 1;
            }
            samples.truncate(write);
        }
        self.branches[id.0].fitted = self.branches[id.0].samples.len();
        Ok(removed)
    }

    /// Versioned, fully reconstructable snapshot of all retained state.
    pub fn snapshot(&self) -> TrajectorySnapshot {
        TrajectorySnapshot {
            version: SNAPSHOT_VERSION,
            branches: self.branches.clone(),
        }
    }

    /// Rebuilds a trajectory from a [`snapshot`](Self::snapshot).
    pub fn from_snapshot(snapshot: TrajectorySnapshot) -> Result<Self, OrreryError> {
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(OrreryError::UnsupportedSnapshotVersion(snapshot.version));
        }
        let mut branches = snapshot.branches;
        // Child lists are derived state and are not serialized.
        let links: Vec<(usize, usize)> = branches
            .iter()
            .enumerate()
            .filter(|(_, b)| b.alive)
            .filter_map(|(i, b)| b.parent.map(|(p, _)| (p, i)))
            .collect();
        for branch in &mut branches {
            branch.children.clear();
        }
        for (parent, child) in links {
            branches[parent].children.push(child);
        }
        Ok(Self { branches })
    }
}

/// Serialized form of a [`DiscreteTrajectory`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrajectorySnapshot {
    version: u32,
    branches: Vec<Branch>,
}

/// Lazy, branch-aware iterator over a finite sample sequence.
pub struct TrajectoryIterator<'a> {
    segments: Vec<&'a [Sample]>,
    segment: usize,
    index: usize,
}

impl<'a> Iterator for TrajectoryIterator<'a> {
    type Item = &'a Sample;

    fn next(&mut self) -> Option<Self::Item> {
        while self.segment < self.segments.len() {
            let slice = self.segments[self.segment];
            if self.index < slice.len() {
                let sample = &slice[self.index];
                self.index += 1;
                return Some(sample);
            }
            self.segment += 1;
            self.index = 0;
        }
        None
    }
}

/// Cubic Hermite interpolation between two bracketing samples.
fn hermite_evaluate(below: &Sample, above: &Sample, time: Instant) -> DegreesOfFreedom {
    let h = (above.time - below.time).to_seconds();
    let tau = (time - below.time).to_seconds() / h;
    let tau2 = tau * tau;
    let tau3 = tau2 * tau;

    let h00 = 2.0 * tau3 - 3.0 * tau2 + 1.0;
    let h10 = tau3 - 2.0 * tau2 + tau;
    let h01 = -2.0 * tau3 + 3.0 * tau2;
    let h11 = tau3 - tau2;

    let q0 = below.degrees_of_freedom.position;
    let v0 = below.degrees_of_freedom.velocity;
    let q1 = above.degrees_of_freedom.position;
    let v1 = above.degrees_of_freedom.velocity;

    let position = h00 * q0 + (h10 * h) * v0 + h01 * q1 + (h11 * h) * v1;

    let d00 = (6.0 * tau2 - 6.0 * tau) / h;
    let d10 = 3.0 * tau2 - 4.0 * tau + 1.0;
    let d01 = (6.0 * tau - 6.0 * tau2) / h;
    let d11 = 3.0 * tau2 - 2.0 * tau;
    let velocity = d00 * q0 + d10 * v0 + d01 * q1 + d11 * v1;

    DegreesOfFreedom { position, velocity }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::instant_from_j2000_seconds;
    use approx::assert_relative_eq;

    fn dof(px: f64, vx: f64) -> DegreesOfFreedom {
        DegreesOfFreedom::new(Vector3::new(px, 0.0, 0.0), Vector3::new(vx, 0.0, 0.0))
    }

    fn t(seconds: f64) -> Instant {
        instant_from_j2000_seconds(seconds)
    }

    /// A trajectory sampling x(t) = t², v(t) = 2t at integer seconds.
    fn parabola(n: usize) -> DiscreteTrajectory {
        let mut trajectory = DiscreteTrajectory::new();
        let root = trajectory.root();
        for i in 0..n {
            let s = i as f64;
            trajectory.append(root, t(s), dof(s * s, 2.0 * s)).unwrap();
        }
        trajectory
    }

    #[test]
    fn append_requires_increasing_times() {
        let mut trajectory = parabola(3);
        let root = trajectory.root();
        let result = trajectory.append(root, t(2.0), dof(0.0, 0.0));
        assert!(matches!(result, Err(OrreryError::OutOfOrderAppend { .. })));
        let result = trajectory.append(root, t(1.5), dof(0.0, 0.0));
        assert!(matches!(result, Err(OrreryError::OutOfOrderAppend { .. })));
        trajectory.append(root, t(3.0), dof(9.0, 6.0)).unwrap();
    }

    #[test]
    fn hermite_reproduces_cubics_exactly() {
        // x(t) = t² is a cubic, so the interpolant is exact between samples.
        let trajectory = parabola(5);
        let root = trajectory.root();
        for s in [0.5, 1.25, 2.75, 3.9] {
            let dof = trajectory.evaluate_degrees_of_freedom(root, t(s)).unwrap();
            assert_relative_eq!(dof.position.x, s * s, epsilon = 1.0e-9);
            assert_relative_eq!(dof.velocity.x, 2.0 * s, epsilon = 1.0e-9);
        }
        // Exact sample times return the sample itself.
        let dof = trajectory.evaluate_degrees_of_freedom(root, t(2.0)).unwrap();
        assert_eq!(dof.position.x, 4.0);
    }

    #[test]
    fn evaluation_outside_bounds_is_an_argument_error() {
        let trajectory = parabola(3);
        let root = trajectory.root();
        assert!(matches!(
            trajectory.evaluate_position(root, t(-0.1)),
            Err(OrreryError::TimeOutOfRange { .. })
        ));
        assert!(matches!(
            trajectory.evaluate_position(root, t(2.1)),
            Err(OrreryError::TimeOutOfRange { .. })
        ));
    }

    #[test]
    fn forking_is_non_destructive() {
        let mut trajectory = parabola(5);
        let root = trajectory.root();
        let before: Vec<f64> = [0.5, 1.5, 2.5]
            .iter()
            .map(|&s| trajectory.evaluate_position(root, t(s)).unwrap().x)
            .collect();

        let fork = trajectory.fork(root, t(2.0)).unwrap();
        trajectory.append(fork, t(2.5), dof(100.0, 0.0)).unwrap();
        trajectory.append(fork, t(3.5), dof(200.0, 0.0)).unwrap();

        // Parent queries at times ≤ fork point are unchanged.
        let after: Vec<f64> = [0.5, 1.5, 2.5]
            .iter()
            .map(|&s| trajectory.evaluate_position(root, t(s)).unwrap().x)
            .collect();
        assert_eq!(before, after);

        // The fork sees the shared prefix and its own samples.
        assert_eq!(trajectory.t_min(fork).unwrap(), Some(t(0.0)));
        assert_eq!(trajectory.t_max(fork).unwrap(), Some(t(3.5)));
        let prefix_value = trajectory.evaluate_position(fork, t(1.0)).unwrap().x;
        assert_eq!(prefix_value, 1.0);
    }

    #[test]
    fn fork_requires_an_exact_sample_time() {
        let mut trajectory = parabola(3);
        let root = trajectory.root();
        assert!(matches!(
            trajectory.fork(root, t(0.5)),
            Err(OrreryError::ForkTimeNotInTrajectory(_))
        ));
    }

    #[test]
    fn fork_of_fork_shares_the_whole_prefix() {
        let mut trajectory = parabola(4);
        let root = trajectory.root();
        let child = trajectory.fork(root, t(2.0)).unwrap();
        trajectory.append(child, t(3.0), dof(50.0, 1.0)).unwrap();
        trajectory.append(child, t(4.0), dof(60.0, 1.0)).unwrap();
        let grandchild = trajectory.fork(child, t(3.0)).unwrap();
        trajectory.append(grandchild, t(5.0), dof(70.0, 0.0)).unwrap();

        let times: Vec<f64> = trajectory
            .iter(grandchild)
            .unwrap()
            .map(|s| (s.time - t(0.0)).to_seconds())
            .collect();
        assert_eq!(times, vec![0.0, 1.0, 2.0, 3.0, 5.0]);

        // Forking a grandchild at a root-owned time attaches to the root.
        let sibling = trajectory.fork(grandchild, t(1.0)).unwrap();
        assert_eq!(trajectory.t_max(sibling).unwrap(), Some(t(1.0)));
    }

    #[test]
    fn forgetting_stops_at_live_fork_points() {
        let mut trajectory = parabola(6);
        let root = trajectory.root();
        let fork = trajectory.fork(root, t(2.0)).unwrap();

        let applied = trajectory.forget_before(t(4.0));
        assert_eq!(applied, t(2.0));
        assert_eq!(trajectory.t_min(root).unwrap(), Some(t(2.0)));
        // The fork still evaluates across its whole (clamped) range.
        assert!(trajectory.evaluate_position(fork, t(2.0)).is_ok());

        // Once the fork dies, forgetting may proceed.
        trajectory.delete_fork(fork).unwrap();
        let applied = trajectory.forget_before(t(4.0));
        assert_eq!(applied, t(4.0));
        assert_eq!(trajectory.t_min(root).unwrap(), Some(t(4.0)));
    }

    #[test]
    fn forgetting_never_empties_the_root() {
        let mut trajectory = parabola(3);
        let applied = trajectory.forget_before(t(100.0));
        assert_eq!(applied, t(2.0));
        assert_eq!(trajectory.len(trajectory.root()).unwrap(), 1);
        // A no-op forget is not an error.
        let applied = trajectory.forget_before(t(0.0));
        assert_eq!(applied, t(0.0));
    }

    #[test]
    fn iteration_is_lazy_and_restartable() {
        let trajectory = parabola(4);
        let root = trajectory.root();
        let mut iterator = trajectory.iter(root).unwrap();
        assert_eq!(iterator.next().unwrap().time, t(0.0));
        assert_eq!(iterator.next().unwrap().time, t(1.0));
        drop(iterator);

        let restarted: Vec<_> = trajectory
            .iter_from(root, t(1.5))
            .unwrap()
            .map(|s| s.time)
            .collect();
        assert_eq!(restarted, vec![t(2.0), t(3.0)]);
        assert_eq!(trajectory.iter_from(root, t(9.0)).unwrap().count(), 0);
    }

    #[test]
    fn downsampling_respects_tolerance_and_pins() {
        // A straight line is reproduced exactly, so everything but the
        // endpoints and the pinned fork point may go.
        let mut trajectory = DiscreteTrajectory::new();
        let root = trajectory.root();
        for i in 0..12 {
            let s = i as f64;
            trajectory.append(root, t(s), dof(3.0 * s, 3.0)).unwrap();
        }
        let fork = trajectory.fork(root, t(5.0)).unwrap();

        let removed = trajectory.downsample(root, 1.0e-6).unwrap();
        assert!(removed > 0);
        let times: Vec<Instant> = trajectory.iter(root).unwrap().map(|s| s.time).collect();
        assert!(times.contains(&t(0.0)));
        assert!(times.contains(&t(5.0)), "fork point must survive");
        assert!(times.contains(&t(11.0)));

        // Interpolation through the thinned samples stays within tolerance.
        for s in [0.5, 3.25, 7.5, 10.9] {
            let x = trajectory.evaluate_position(root, t(s)).unwrap().x;
            assert_relative_eq!(x, 3.0 * s, epsilon = 1.0e-6);
        }
        assert!(trajectory.evaluate_position(fork, t(5.0)).is_ok());
    }

    #[test]
    fn downsampling_keeps_curved_segments_accurate() {
        let mut trajectory = DiscreteTrajectory::new();
        let root = trajectory.root();
        // x(t) = sin t sampled densely.
        let n = 400;
        for i in 0..n {
            let s = i as f64 * 0.05;
            trajectory
                .append(
                    root,
                    t(s),
                    DegreesOfFreedom::new(
                        Vector3::new(s.sin(), 0.0, 0.0),
                        Vector3::new(s.cos(), 0.0, 0.0),
                    ),
                )
                .unwrap();
        }
        let tolerance = 1.0e-6;
        let removed = trajectory.downsample(root, tolerance).unwrap();
        assert!(removed > 100, "dense sine should thin considerably");
        for i in 0..(n - 1) * 4 {
            let s = i as f64 * 0.0125;
            let x = trajectory.evaluate_position(root, t(s)).unwrap().x;
            // Retained-point interpolation error is bounded by the fitting
            // tolerance plus the intrinsic Hermite error of the wider gaps.
            assert!((x - s.sin()).abs() < 5.0 * tolerance, "at {s}: {x}");
        }
    }

    #[test]
    fn downsampling_only_refits_the_appended_tail() {
        let mut trajectory = DiscreteTrajectory::new();
        let root = trajectory.root();
        for i in 0..12 {
            let s = i as f64;
            trajectory.append(root, t(s), dof(3.0 * s, 3.0)).unwrap();
        }
        assert!(trajectory.downsample(root, 1.0e-6).unwrap() > 0);
        let prefix: Vec<Instant> = trajectory.iter(root).unwrap().map(|s| s.time).collect();

        // Growing the branch and thinning again must not disturb the
        // already-fitted prefix, only the new tail.
        for i in 12..24 {
            let s = i as f64;
            trajectory.append(root, t(s), dof(3.0 * s, 3.0)).unwrap();
        }
        assert!(trajectory.downsample(root, 1.0e-6).unwrap() > 0);
        let times: Vec<Instant> = trajectory.iter(root).unwrap().map(|s| s.time).collect();
        assert!(times.starts_with(&prefix));
        assert_eq!(times.last(), Some(&t(23.0)));

        for s in [0.5, 10.0, 17.5, 22.9] {
            let x = trajectory.evaluate_position(root, t(s)).unwrap().x;
            assert_relative_eq!(x, 3.0 * s, epsilon = 1.0e-6);
        }
    }

    #[test]
    fn a_deleted_fork_can_be_recreated() {
        let mut trajectory = parabola(5);
        let root = trajectory.root();
        let fork = trajectory.fork(root, t(2.0)).unwrap();

        trajectory.delete_fork(fork).unwrap();
        assert!(matches!(
            trajectory.delete_fork(fork),
            Err(OrreryError::BranchNotFound(_))
        ));
        assert!(trajectory.append(fork, t(3.0), dof(0.0, 0.0)).is_err());

        // The parent's child list no longer holds the dead fork, so a fresh
        // fork at the same time works and evaluates independently.
        let again = trajectory.fork(root, t(2.0)).unwrap();
        trajectory.append(again, t(2.5), dof(42.0, 0.0)).unwrap();
        assert_eq!(trajectory.t_max(again).unwrap(), Some(t(2.5)));
    }

    #[test]
    fn snapshot_round_trip() {
        let mut trajectory = parabola(5);
        let root = trajectory.root();
        let fork = trajectory.fork(root, t(2.0)).unwrap();
        trajectory.append(fork, t(2.5), dof(42.0, 0.0)).unwrap();

        let encoded = serde_json::to_string(&trajectory.snapshot()).unwrap();
        let decoded: TrajectorySnapshot = serde_json::from_str(&encoded).unwrap();
        let rebuilt = DiscreteTrajectory::from_snapshot(decoded).unwrap();

        assert_eq!(rebuilt.len(root).unwrap(), 5);
        assert_eq!(rebuilt.t_max(fork).unwrap(), Some(t(2.5)));
        // Fork pinning survives the round trip.
        let applied = rebuilt.clone().forget_before(t(4.0));
        assert_eq!(applied, t(2.0));
    }
}
