use crate::checkpoint::bundle::SnapshotRef;
use crate::error::Result;
use crate::surface::reconstruct::{LossSurface, SurfaceReconstructor, TrajectoryPoint};

/// One animation frame: the path walked so far over a fixed surface.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// 0-based frame number.
    pub index: usize,
    pub total: usize,
    /// Every projected point up to and including this frame's epoch.
    pub path: Vec<TrajectoryPoint>,
}

impl Frame {
    /// The point this frame highlights.
    pub fn current(&self) -> Option<&TrajectoryPoint> {
        self.path.last()
    }

    pub fn epoch(&self) -> Option<usize> {
        self.current().map(|p| p.epoch)
    }
}

/// A replay of the recorded trajectory over a reconstructed surface.
///
/// Frames are produced lazily: each snapshot is read from disk only when its
/// frame is requested, and [`frames`](Self::frames) can be called any number
/// of times, always yielding the same sequence.
#[derive(Debug)]
pub struct Animation<'a> {
    reconstructor: &'a SurfaceReconstructor,
    surface: &'a LossSurface,
    snapshots: Vec<SnapshotRef>,
}

impl<'a> Animation<'a> {
    /// `snapshots` are replayed in epoch order regardless of input order.
    pub fn new(
        reconstructor: &'a SurfaceReconstructor,
        surface: &'a LossSurface,
        snapshots: impl IntoIterator<Item = SnapshotRef>,
    ) -> Animation<'a> {
        let mut snapshots: Vec<SnapshotRef> = snapshots.into_iter().collect();
        snapshots.sort();
        Animation { reconstructor, surface, snapshots }
    }

    pub fn surface(&self) -> &LossSurface {
        self.surface
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    /// A fresh iterator over every frame, starting from the first.
    pub fn frames(&self) -> Frames<'_> {
        Frames { animation: self, next: 0, path: Vec::new() }
    }

    /// Loads every snapshot and projects the whole path at once.
    pub fn trajectory(&self) -> Result<Vec<TrajectoryPoint>> {
        self.reconstructor.project_trajectory(self.snapshots.iter().map(SnapshotRef::load))
    }
}

/// Iterator returned by [`Animation::frames`].
#[derive(Debug)]
pub struct Frames<'a> {
    animation: &'a Animation<'a>,
    next: usize,
    path: Vec<TrajectoryPoint>,
}

impl Iterator for Frames<'_> {
    type Item = Result<Frame>;

    fn next(&mut self) -> Option<Self::Item> {
        let snapshot_ref = self.animation.snapshots.get(self.next)?;
        let point = match snapshot_ref.load().and_then(|s| self.animation.reconstructor.project(&s)) {
            Ok(p) => p,
            Err(e) => {
                // Stop after reporting the first failure.
                self.next = self.animation.snapshots.len();
                return Some(Err(e));
            }
        };
        self.path.push(point);
        let frame = Frame { index: self.next, total: self.animation.snapshots.len(), path: self.path.clone() };
        self.next += 1;
        Some(Ok(frame))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.animation.snapshots.len() - self.next;
        (0, Some(remaining))
    }
}
