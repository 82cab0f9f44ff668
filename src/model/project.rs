//! [`Project`]: the arena owning every entity.

use serde::{Deserialize, Serialize};

use super::entities::{Constraint, ImagePoint, Line, LineDirection, VanishingLine, Viewpoint, WorldPoint};
use super::ids::{ConstraintId, ImagePointId, LineId, VanishingLineId, ViewpointId, WorldPointId};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Project {
    pub world_points: Vec<WorldPoint>,
    pub viewpoints: Vec<Viewpoint>,
    pub image_points: Vec<ImagePoint>,
    pub lines: Vec<Line>,
    pub vanishing_lines: Vec<VanishingLine>,
    pub constraints: Vec<Constraint>,
}

impl Project {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_world_point(&mut self, p: WorldPoint) -> WorldPointId {
        self.world_points.push(p);
        WorldPointId(self.world_points.len() - 1)
    }

    pub fn add_viewpoint(&mut self, v: Viewpoint) -> ViewpointId {
        self.viewpoints.push(v);
        ViewpointId(self.viewpoints.len() - 1)
    }

    /// Adds an image point, maintaining the referential-closure invariant
    /// by registering it on its owning viewpoint.
    pub fn add_image_point(&mut self, p: ImagePoint) -> ImagePointId {
        let viewpoint = p.viewpoint;
        self.image_points.push(p);
        let id = ImagePointId(self.image_points.len() - 1);
        self.viewpoints[viewpoint.index()].image_points.push(id);
        id
    }

    pub fn add_line(&mut self, l: Line) -> LineId {
        self.lines.push(l);
        LineId(self.lines.len() - 1)
    }

    pub fn add_vanishing_line(&mut self, vl: VanishingLine) -> VanishingLineId {
        let viewpoint = vl.viewpoint;
        self.vanishing_lines.push(vl);
        let id = VanishingLineId(self.vanishing_lines.len() - 1);
        self.viewpoints[viewpoint.index()].vanishing_lines.push(id);
        id
    }

    pub fn add_constraint(&mut self, c: Constraint) -> ConstraintId {
        self.constraints.push(c);
        ConstraintId(self.constraints.len() - 1)
    }

    pub fn world_point(&self, id: WorldPointId) -> &WorldPoint {
        &self.world_points[id.index()]
    }

    pub fn world_point_mut(&mut self, id: WorldPointId) -> &mut WorldPoint {
        &mut self.world_points[id.index()]
    }

    pub fn viewpoint(&self, id: ViewpointId) -> &Viewpoint {
        &self.viewpoints[id.index()]
    }

    pub fn viewpoint_mut(&mut self, id: ViewpointId) -> &mut Viewpoint {
        &mut self.viewpoints[id.index()]
    }

    pub fn enabled_viewpoint_ids(&self) -> Vec<ViewpointId> {
        (0..self.viewpoints.len())
            .map(ViewpointId)
            .filter(|id| self.viewpoint(*id).enabled_in_solve)
            .collect()
    }

    /// The authoritative image point observing `world_point` in `viewpoint`.
    pub fn authoritative_image_point(
        &self,
        viewpoint: ViewpointId,
        world_point: WorldPointId,
    ) -> Option<ImagePointId> {
        self.viewpoint(viewpoint)
            .image_points
            .iter()
            .copied()
            .find(|&id| self.image_points[id.index()].world_point == world_point)
    }

    /// All (viewpoint, image_point) pairs observing `world_point`, in
    /// viewpoint order, deduplicated per viewpoint.
    pub fn observations_of(&self, world_point: WorldPointId) -> Vec<(ViewpointId, ImagePointId)> {
        let mut out = Vec::new();
        for vp_id in 0..self.viewpoints.len() {
            let vp_id = ViewpointId(vp_id);
            if let Some(ip) = self.authoritative_image_point(vp_id, world_point) {
                out.push((vp_id, ip));
            }
        }
        out
    }

    /// Fills `inferred_xyz` on every world point from axis-aligned,
    /// fixed-length lines via the branching algorithm,
    /// keeping the first surviving branch's coordinate choices. Returns the
    /// number of branches explored for diagnostic purposes.
    pub fn propagate_inferences(&mut self) -> usize {
        let branches = crate::init::branching::enumerate_branches(self);
        let count = branches.len();
        if let Some(best) = branches.into_iter().next() {
            for (id, coords) in best.coords {
                self.world_point_mut(id).inferred_xyz = coords;
            }
        }
        count
    }

    /// Lines with a non-free direction and both endpoints present.
    pub fn directional_lines(&self) -> impl Iterator<Item = &Line> {
        self.lines.iter().filter(|l| l.direction != LineDirection::Free)
    }
}
