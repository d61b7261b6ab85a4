//! Bounding Volume Hierarchy over a flat primitive array.
//!
//! Construction uses a binned Surface Area Heuristic (SAH). The finished
//! tree is stored depth-first: an internal node's left child sits right
//! after it, and its `left_first` field holds the right child index. A leaf
//! covers the contiguous primitive range `[left_first, left_first + count)`.
//!
//! [`Bvh::build`] reorders the primitive slice in place so that every leaf's
//! primitives are contiguous. Indices into the slice are only meaningful in
//! post-build order; use stable ids (such as [`Triangle::id`]) to identify
//! primitives across builds.

use std::ops::Range;
use std::time::Instant;

use log::debug;
use rtcore_math::{Aabb, Point3};

use crate::config::{BvhConfig, MAX_BINS};
use crate::error::{AccelError, Result};
use crate::intersection::Intersection;
use crate::packet::{packet_intersects_aabb, RayPacket4, PACKET_WIDTH};
use crate::ray::Ray;
use crate::stats::{NoStats, StatsSink};
use crate::triangle::{Triangle, ALL_LAYERS};

/// Traversal stack capacity. Overflowing it is a bug in the tree.
pub const TRAVERSAL_STACK_SIZE: usize = 64;

/// Nodes at this depth become leaves regardless of size, which keeps every
/// traversal stack within [`TRAVERSAL_STACK_SIZE`].
const MAX_BUILD_DEPTH: u32 = 60;

/// Axes whose centroid spread is below this are not binned.
const FLAT_CENTROID_EXTENT: f32 = 1e-6;

/// Something a BVH can be built over.
pub trait Primitive {
    /// Bounding box of the primitive.
    fn bounds(&self) -> Aabb;
    /// Representative point used for binning.
    fn centroid(&self) -> Point3;
    /// Layer bits, OR-ed into each node's subtree mask.
    fn layers(&self) -> u32;
}

/// A node in the flattened tree.
///
/// `count == 0` marks an internal node; `left_first` is then the right child
/// index (the left child is the next node). Otherwise the node is a leaf and
/// `left_first` is the index of its first primitive.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BvhNode {
    /// Bounds of everything below this node.
    pub bounds: Aabb,
    /// Right child index (internal) or first primitive index (leaf).
    pub left_first: u32,
    /// Primitive count; zero for internal nodes.
    pub count: u32,
    /// OR of the layer bits of every primitive below this node.
    pub subtree_layer_mask: u32,
}

/// Decoded view of a [`BvhNode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// Internal node; the left child is the next node in the array.
    Internal {
        /// Index of the right child.
        right: usize,
    },
    /// Leaf node over a primitive range.
    Leaf {
        /// First primitive index.
        first: usize,
        /// Number of primitives.
        count: usize,
    },
}

impl BvhNode {
    fn leaf(first: usize, count: usize) -> Self {
        Self {
            bounds: Aabb::empty(),
            left_first: first as u32,
            count: count as u32,
            subtree_layer_mask: 0,
        }
    }

    /// True for leaf nodes.
    #[inline]
    pub fn is_leaf(&self) -> bool {
        self.count > 0
    }

    /// Decode the dual-purpose `left_first` field.
    #[inline]
    pub fn kind(&self) -> NodeKind {
        if self.is_leaf() {
            NodeKind::Leaf {
                first: self.left_first as usize,
                count: self.count as usize,
            }
        } else {
            NodeKind::Internal {
                right: self.left_first as usize,
            }
        }
    }

    fn primitive_range(&self) -> Range<usize> {
        let first = self.left_first as usize;
        first..first + self.count as usize
    }
}

/// Bounding volume hierarchy.
///
/// The tree does not own its primitives; every query and refit takes the
/// same slice that was passed to [`Bvh::build`].
#[derive(Debug, Clone, Default)]
pub struct Bvh {
    nodes: Vec<BvhNode>,
    prim_count: usize,
    depth: u32,
    built: bool,
    config: BvhConfig,
}

impl Bvh {
    /// An unbuilt tree. Queries on it miss.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build over `prims` with default settings.
    ///
    /// **Reorders `prims` in place.** After the build, leaf ranges index the
    /// reordered slice. Building over an empty slice leaves the tree unbuilt.
    pub fn build<P: Primitive>(&mut self, prims: &mut [P]) {
        self.build_with_config(prims, BvhConfig::default());
    }

    /// Build over `prims` with explicit settings. Reorders `prims` in place.
    ///
    /// # Panics
    ///
    /// Panics if `config` fails [`BvhConfig::validate`].
    pub fn build_with_config<P: Primitive>(&mut self, prims: &mut [P], config: BvhConfig) {
        if let Err(err) = config.validate() {
            panic!("BVH build: {err}");
        }
        self.clear();
        self.config = config;
        if prims.is_empty() {
            return;
        }
        assert!(
            prims.len() < (u32::MAX / 2) as usize,
            "BVH build: {} primitives overflow 32-bit node indices",
            prims.len()
        );

        let start = Instant::now();
        let (nodes, depth) = Builder::new(prims, &self.config).run();
        self.nodes = nodes;
        self.depth = depth;
        self.prim_count = prims.len();

        self.reorder_dfs();
        self.update_bounds_and_masks(prims);
        self.nodes.shrink_to_fit();
        self.built = true;

        debug!(
            "built BVH: {} primitives, {} nodes, depth {} in {:?}",
            self.prim_count,
            self.nodes.len(),
            self.depth,
            start.elapsed()
        );
        #[cfg(feature = "slow-checks")]
        self.assert_valid(prims);
    }

    /// Recompute every node's bounds and layer mask from the current
    /// primitives without changing the topology. O(N).
    ///
    /// Use when primitives moved but each still belongs in its leaf. A no-op
    /// on an unbuilt tree.
    ///
    /// # Panics
    ///
    /// Panics if `prims` has a different length than at build time.
    pub fn refit<P: Primitive>(&mut self, prims: &[P]) {
        if !self.built {
            return;
        }
        assert_eq!(
            prims.len(),
            self.prim_count,
            "BVH refit: primitive count changed since build"
        );
        self.update_bounds_and_masks(prims);
        #[cfg(feature = "slow-checks")]
        self.assert_valid(prims);
    }

    /// Drop the tree and return to the unbuilt state.
    pub fn clear(&mut self) {
        self.nodes.clear();
        self.prim_count = 0;
        self.depth = 0;
        self.built = false;
    }

    /// True once a non-empty build completed.
    pub fn is_built(&self) -> bool {
        self.built
    }

    /// Flattened node array in depth-first order.
    pub fn nodes(&self) -> &[BvhNode] {
        &self.nodes
    }

    /// Number of nodes.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Deepest level reached by the builder (root is 0).
    pub fn depth(&self) -> u32 {
        self.depth
    }

    /// Number of primitives the tree was built over.
    pub fn primitive_count(&self) -> usize {
        self.prim_count
    }

    /// Bounds of the root node, if built.
    pub fn root_bounds(&self) -> Option<Aabb> {
        if self.built {
            self.nodes.first().map(|n| n.bounds)
        } else {
            None
        }
    }

    /// Settings of the last build.
    pub fn config(&self) -> &BvhConfig {
        &self.config
    }

    // ---- Triangle queries ----

    /// Closest hit of `ray` against `tris` on any layer.
    pub fn cast_ray(&self, ray: &Ray, tris: &[Triangle]) -> Intersection {
        self.cast_ray_with(ray, tris, ALL_LAYERS, &mut NoStats)
    }

    /// Closest hit among triangles whose layers intersect `query_mask`.
    pub fn cast_ray_masked(&self, ray: &Ray, tris: &[Triangle], query_mask: u32) -> Intersection {
        self.cast_ray_with(ray, tris, query_mask, &mut NoStats)
    }

    /// Closest hit, recording traversal counters into `stats`.
    pub fn cast_ray_with<S: StatsSink>(
        &self,
        ray: &Ray,
        tris: &[Triangle],
        query_mask: u32,
        stats: &mut S,
    ) -> Intersection {
        let mut closest = Intersection::default();
        if !self.built {
            return closest;
        }
        self.check_query(ray, tris);
        stats.ray_cast(1);

        self.walk_nearest(ray, query_mask, &mut closest, stats, |range, closest, stats| {
            for tri in &tris[range] {
                if tri.layers & query_mask == 0 {
                    continue;
                }
                stats.tri_test();
                tri.intersect(ray, closest);
            }
        });

        if closest.hit() {
            stats.hit();
        }
        closest
    }

    /// True if `ray` hits any triangle on any layer.
    pub fn any_hit(&self, ray: &Ray, tris: &[Triangle]) -> bool {
        self.any_hit_with(ray, tris, ALL_LAYERS, &mut NoStats)
    }

    /// True if `ray` hits any triangle whose layers intersect `query_mask`.
    pub fn any_hit_masked(&self, ray: &Ray, tris: &[Triangle], query_mask: u32) -> bool {
        self.any_hit_with(ray, tris, query_mask, &mut NoStats)
    }

    /// Any-hit query, recording traversal counters into `stats`.
    pub fn any_hit_with<S: StatsSink>(
        &self,
        ray: &Ray,
        tris: &[Triangle],
        query_mask: u32,
        stats: &mut S,
    ) -> bool {
        if !self.built {
            return false;
        }
        self.check_query(ray, tris);
        stats.ray_cast(1);

        self.walk_any(ray, query_mask, stats, |range, stats| {
            let mut scratch = Intersection::default();
            for tri in &tris[range] {
                if tri.layers & query_mask == 0 {
                    continue;
                }
                stats.tri_test();
                if tri.intersect(ray, &mut scratch) {
                    stats.hit();
                    return true;
                }
            }
            false
        })
    }

    /// Trace up to four rays together, sharing each node's box test.
    ///
    /// `results[..rays.len()]` is reset to the miss sentinel and then filled
    /// with each ray's closest hit. Slots past `rays.len()` are untouched.
    ///
    /// # Panics
    ///
    /// Panics if `rays` is empty, longer than four, or longer than `results`.
    pub fn cast_ray_packet4_with<S: StatsSink>(
        &self,
        rays: &[Ray],
        tris: &[Triangle],
        query_mask: u32,
        results: &mut [Intersection],
        stats: &mut S,
    ) {
        let n = rays.len();
        assert!(
            (1..=PACKET_WIDTH).contains(&n),
            "packet traversal takes 1 to 4 rays, got {n}"
        );
        assert!(results.len() >= n, "packet traversal needs {n} result slots");
        for result in &mut results[..n] {
            result.set_miss();
        }
        if !self.built {
            return;
        }
        assert_eq!(tris.len(), self.prim_count, "triangle slice does not match BVH");
        stats.ray_cast(n as u64);

        let mut packet = RayPacket4::new(rays);
        let mut stack = TraversalStack::<u32>::new();
        stack.push(0);

        while let Some(idx) = stack.pop() {
            let idx = idx as usize;
            let node = &self.nodes[idx];
            let lanes = packet_intersects_aabb(&packet, &node.bounds);
            if lanes == 0 {
                continue;
            }
            stats.node_visited();

            match node.kind() {
                NodeKind::Leaf { first, count } => {
                    for lane in 0..n {
                        if lanes & (1 << lane) == 0 {
                            continue;
                        }
                        for tri in &tris[first..first + count] {
                            if tri.layers & query_mask == 0 {
                                continue;
                            }
                            stats.tri_test();
                            if tri.intersect(&rays[lane], &mut results[lane]) {
                                packet.update_best_t(lane, results[lane].t);
                            }
                        }
                    }
                }
                NodeKind::Internal { right } => {
                    stack.push(right as u32);
                    stack.push((idx + 1) as u32);
                }
            }
        }

        for result in &results[..n] {
            if result.hit() {
                stats.hit();
            }
        }
    }

    // ---- Generic traversal ----

    /// Front-to-back nearest-hit walk.
    ///
    /// `visit_leaf` is called with each candidate leaf's primitive range and
    /// must only ever decrease `closest.t`. Subtrees entered beyond
    /// `closest.t` or with no layer bit in `query_mask` are skipped.
    pub(crate) fn walk_nearest<S, F>(
        &self,
        ray: &Ray,
        query_mask: u32,
        closest: &mut Intersection,
        stats: &mut S,
        mut visit_leaf: F,
    ) where
        S: StatsSink,
        F: FnMut(Range<usize>, &mut Intersection, &mut S),
    {
        if !self.built {
            return;
        }
        let Some((root_t, _)) = ray.intersect_aabb(&self.nodes[0].bounds) else {
            return;
        };

        let mut stack = TraversalStack::<(u32, f32)>::new();
        stack.push((0, root_t));

        while let Some((idx, entry_t)) = stack.pop() {
            if entry_t > closest.t {
                continue;
            }
            stats.node_visited();

            let idx = idx as usize;
            let node = &self.nodes[idx];
            match node.kind() {
                NodeKind::Leaf { .. } => visit_leaf(node.primitive_range(), closest, stats),
                NodeKind::Internal { right } => {
                    let left = idx + 1;
                    let t_left = self
                        .child_entry(left, ray, query_mask)
                        .filter(|&t| t <= closest.t);
                    let t_right = self
                        .child_entry(right, ray, query_mask)
                        .filter(|&t| t <= closest.t);

                    // Far child first so the near one pops first.
                    match (t_left, t_right) {
                        (Some(tl), Some(tr)) if tl < tr => {
                            stack.push((right as u32, tr));
                            stack.push((left as u32, tl));
                        }
                        (Some(tl), Some(tr)) => {
                            stack.push((left as u32, tl));
                            stack.push((right as u32, tr));
                        }
                        (Some(tl), None) => stack.push((left as u32, tl)),
                        (None, Some(tr)) => stack.push((right as u32, tr)),
                        (None, None) => {}
                    }
                }
            }
        }
    }

    /// Occlusion walk; stops as soon as `visit_leaf` returns true.
    pub(crate) fn walk_any<S, F>(
        &self,
        ray: &Ray,
        query_mask: u32,
        stats: &mut S,
        mut visit_leaf: F,
    ) -> bool
    where
        S: StatsSink,
        F: FnMut(Range<usize>, &mut S) -> bool,
    {
        if !self.built || ray.intersect_aabb(&self.nodes[0].bounds).is_none() {
            return false;
        }

        let mut stack = TraversalStack::<u32>::new();
        stack.push(0);

        while let Some(idx) = stack.pop() {
            let idx = idx as usize;
            let node = &self.nodes[idx];
            stats.node_visited();

            match ray.intersect_aabb(&node.bounds) {
                Some((t_entry, _)) if t_entry <= ray.t_max => {}
                _ => continue,
            }

            match node.kind() {
                NodeKind::Leaf { .. } => {
                    if visit_leaf(node.primitive_range(), stats) {
                        return true;
                    }
                }
                NodeKind::Internal { right } => {
                    if self.nodes[right].subtree_layer_mask & query_mask != 0 {
                        stack.push(right as u32);
                    }
                    if self.nodes[idx + 1].subtree_layer_mask & query_mask != 0 {
                        stack.push((idx + 1) as u32);
                    }
                }
            }
        }
        false
    }

    #[inline]
    fn child_entry(&self, child: usize, ray: &Ray, query_mask: u32) -> Option<f32> {
        let node = &self.nodes[child];
        if node.subtree_layer_mask & query_mask == 0 {
            return None;
        }
        ray.intersect_aabb(&node.bounds).map(|(t_entry, _)| t_entry)
    }

    #[inline]
    fn check_query(&self, ray: &Ray, tris: &[Triangle]) {
        debug_assert!(ray.is_valid(), "invalid ray: {ray:?}");
        assert_eq!(tris.len(), self.prim_count, "triangle slice does not match BVH");
    }

    // ---- Post-build passes ----

    /// Relayout nodes in depth-first order so the left child of node `i` is
    /// node `i + 1` and `left_first` holds the right child.
    fn reorder_dfs(&mut self) {
        let count = self.nodes.len();
        if count < 3 {
            return;
        }

        let mut ordered = Vec::with_capacity(count);
        let mut remap = vec![u32::MAX; count];
        let mut stack = Vec::with_capacity(2 * self.depth as usize + 4);
        stack.push(0usize);

        while let Some(old) = stack.pop() {
            remap[old] = ordered.len() as u32;
            let node = self.nodes[old];
            ordered.push(node);
            if !node.is_leaf() {
                // Builder layout: children are the pair (left_first, left_first + 1).
                let old_left = node.left_first as usize;
                stack.push(old_left + 1);
                stack.push(old_left);
            }
        }
        assert_eq!(ordered.len(), count, "DFS reorder visited the wrong number of nodes");

        for (i, node) in ordered.iter_mut().enumerate() {
            if node.is_leaf() {
                continue;
            }
            let old_left = node.left_first as usize;
            assert_eq!(
                remap[old_left] as usize,
                i + 1,
                "DFS reorder: left child of node {i} is not adjacent"
            );
            node.left_first = remap[old_left + 1];
        }

        self.nodes = ordered;
    }

    /// Bottom-up pass: leaf bounds and masks from primitives, internal
    /// bounds and masks from children. Children always follow their parent,
    /// so a reverse sweep sees them first.
    fn update_bounds_and_masks<P: Primitive>(&mut self, prims: &[P]) {
        let pad = self.config.degenerate_pad;
        for i in (0..self.nodes.len()).rev() {
            let (bounds, mask) = match self.nodes[i].kind() {
                NodeKind::Leaf { first, count } => {
                    let mut bounds = Aabb::empty();
                    let mut mask = 0;
                    for prim in &prims[first..first + count] {
                        bounds.merge(&prim.bounds());
                        mask |= prim.layers();
                    }
                    bounds.pad_degenerate(pad);
                    (bounds, mask)
                }
                NodeKind::Internal { right } => {
                    let (left, right) = (&self.nodes[i + 1], &self.nodes[right]);
                    (
                        left.bounds.union(&right.bounds),
                        left.subtree_layer_mask | right.subtree_layer_mask,
                    )
                }
            };
            let node = &mut self.nodes[i];
            node.bounds = bounds;
            node.subtree_layer_mask = mask;
        }
    }

    // ---- Validation ----

    /// Check every structural invariant of the tree against `prims`.
    ///
    /// Verifies the depth-first layout, that leaf ranges partition the
    /// primitive slice, that every node's bounds contain its children (or
    /// primitives), and that subtree layer masks are exact. An unbuilt tree
    /// is trivially valid.
    pub fn validate<P: Primitive>(&self, prims: &[P]) -> Result<()> {
        if !self.built {
            return Ok(());
        }
        let broken = |node: usize, reason: String| AccelError::BrokenInvariant { node, reason };

        if prims.len() != self.prim_count {
            return Err(broken(
                0,
                format!(
                    "built over {} primitives, validated against {}",
                    self.prim_count,
                    prims.len()
                ),
            ));
        }

        let node_count = self.nodes.len();
        let mut subtree_size = vec![0usize; node_count];
        let mut covered = vec![false; prims.len()];

        for i in (0..node_count).rev() {
            let node = &self.nodes[i];
            match node.kind() {
                NodeKind::Leaf { first, count } => {
                    if first + count > prims.len() {
                        return Err(broken(i, format!("leaf range {first}+{count} out of bounds")));
                    }
                    let mut mask = 0;
                    for (k, prim) in prims.iter().enumerate().skip(first).take(count) {
                        if std::mem::replace(&mut covered[k], true) {
                            return Err(broken(i, format!("primitive {k} is in two leaves")));
                        }
                        if !node.bounds.contains_aabb(&prim.bounds(), 0.0) {
                            return Err(broken(i, format!("leaf bounds do not contain primitive {k}")));
                        }
                        mask |= prim.layers();
                    }
                    if mask != node.subtree_layer_mask {
                        return Err(broken(i, "leaf layer mask is stale".into()));
                    }
                    subtree_size[i] = 1;
                }
                NodeKind::Internal { right } => {
                    let left = i + 1;
                    if right <= left || right >= node_count {
                        return Err(broken(i, format!("right child {right} out of order")));
                    }
                    if right != left + subtree_size[left] {
                        return Err(broken(i, "left subtree is not contiguous".into()));
                    }
                    for child in [left, right] {
                        if !node.bounds.contains_aabb(&self.nodes[child].bounds, 0.0) {
                            return Err(broken(i, format!("bounds do not contain child {child}")));
                        }
                    }
                    let mask =
                        self.nodes[left].subtree_layer_mask | self.nodes[right].subtree_layer_mask;
                    if mask != node.subtree_layer_mask {
                        return Err(broken(i, "subtree layer mask is stale".into()));
                    }
                    subtree_size[i] = 1 + subtree_size[left] + subtree_size[right];
                }
            }
        }

        if subtree_size[0] != node_count {
            return Err(broken(0, "nodes unreachable from the root".into()));
        }
        if let Some(k) = covered.iter().position(|c| !c) {
            return Err(broken(0, format!("primitive {k} is in no leaf")));
        }
        Ok(())
    }

    #[cfg(feature = "slow-checks")]
    fn assert_valid<P: Primitive>(&self, prims: &[P]) {
        if let Err(err) = self.validate(prims) {
            panic!("{err}");
        }
    }
}

/// Fixed-capacity LIFO used by every traversal.
struct TraversalStack<T> {
    entries: [T; TRAVERSAL_STACK_SIZE],
    len: usize,
}

impl<T: Copy + Default> TraversalStack<T> {
    fn new() -> Self {
        Self {
            entries: [T::default(); TRAVERSAL_STACK_SIZE],
            len: 0,
        }
    }

    #[inline]
    fn push(&mut self, entry: T) {
        assert!(self.len < TRAVERSAL_STACK_SIZE, "BVH traversal stack overflow");
        self.entries[self.len] = entry;
        self.len += 1;
    }

    #[inline]
    fn pop(&mut self) -> Option<T> {
        if self.len == 0 {
            return None;
        }
        self.len -= 1;
        Some(self.entries[self.len])
    }
}

// ---- Builder ----

#[derive(Debug, Clone, Copy, Default)]
struct Bin {
    bounds: Aabb,
    count: u32,
}

#[derive(Debug, Clone, Copy)]
struct Split {
    axis: usize,
    pos: f32,
    cost: f32,
}

/// Top-down SAH builder. Borrows the primitive slice for the duration of one
/// build and permutes it together with its cached bounds and centroids.
struct Builder<'a, P> {
    prims: &'a mut [P],
    bounds: Vec<Aabb>,
    centroids: Vec<Point3>,
    nodes: Vec<BvhNode>,
    config: &'a BvhConfig,
    depth: u32,
}

impl<'a, P: Primitive> Builder<'a, P> {
    fn new(prims: &'a mut [P], config: &'a BvhConfig) -> Self {
        let bounds = prims.iter().map(Primitive::bounds).collect();
        let centroids = prims.iter().map(Primitive::centroid).collect();
        let nodes = Vec::with_capacity(2 * prims.len());
        Self {
            prims,
            bounds,
            centroids,
            nodes,
            config,
            depth: 0,
        }
    }

    fn run(mut self) -> (Vec<BvhNode>, u32) {
        let mut root = BvhNode::leaf(0, self.prims.len());
        root.bounds = self.range_bounds(root.primitive_range());
        self.nodes.push(root);
        self.subdivide(0, 0);
        (self.nodes, self.depth)
    }

    fn range_bounds(&self, range: Range<usize>) -> Aabb {
        let mut bounds = Aabb::empty();
        for b in &self.bounds[range] {
            bounds.merge(b);
        }
        bounds.pad_degenerate(self.config.degenerate_pad);
        bounds
    }

    fn swap(&mut self, a: usize, b: usize) {
        self.prims.swap(a, b);
        self.bounds.swap(a, b);
        self.centroids.swap(a, b);
    }

    fn subdivide(&mut self, idx: usize, depth: u32) {
        self.depth = self.depth.max(depth);
        let node = self.nodes[idx];
        if node.count <= self.config.max_leaf_size || depth >= MAX_BUILD_DEPTH {
            return;
        }

        let Some(split) = self.find_best_split(&node) else {
            return;
        };
        if split.cost >= node.count as f32 {
            return;
        }

        // Lomuto partition: centroids strictly below the plane go left.
        let range = node.primitive_range();
        let (first, last) = (range.start, range.end);
        let mut mid = first;
        for i in range {
            if self.centroids[i][split.axis] < split.pos {
                self.swap(i, mid);
                mid += 1;
            }
        }
        if mid == first || mid == last {
            mid = first + node.count as usize / 2;
        }

        let left_idx = self.nodes.len();
        assert!(
            left_idx + 2 <= 2 * self.prims.len(),
            "BVH node pool exhausted"
        );
        let mut left = BvhNode::leaf(first, mid - first);
        left.bounds = self.range_bounds(first..mid);
        let mut right = BvhNode::leaf(mid, last - mid);
        right.bounds = self.range_bounds(mid..last);
        self.nodes.push(left);
        self.nodes.push(right);

        self.nodes[idx].left_first = left_idx as u32;
        self.nodes[idx].count = 0;

        self.subdivide(left_idx, depth + 1);
        self.subdivide(left_idx + 1, depth + 1);
    }

    fn find_best_split(&self, node: &BvhNode) -> Option<Split> {
        let range = node.primitive_range();
        let parent_area = node.bounds.surface_area();
        if parent_area <= 0.0 {
            return None;
        }
        let inv_parent_area = 1.0 / parent_area;
        let bin_count = self.config.bin_count;

        let centroid_bounds = Aabb::from_points(&self.centroids[range.clone()]);
        let mut best: Option<Split> = None;

        for axis in 0..3 {
            let axis_min = centroid_bounds.min[axis];
            let extent = centroid_bounds.max[axis] - axis_min;
            if extent < FLAT_CENTROID_EXTENT {
                continue;
            }

            let mut bins = [Bin::default(); MAX_BINS];
            let scale = bin_count as f32 / extent;
            for i in range.clone() {
                let b = (((self.centroids[i][axis] - axis_min) * scale) as usize).min(bin_count - 1);
                bins[b].bounds.merge(&self.bounds[i]);
                bins[b].count += 1;
            }

            // Cumulative sweeps; entry i describes the plane after bin i.
            let mut left_area = [0.0f32; MAX_BINS];
            let mut left_count = [0u32; MAX_BINS];
            let mut right_area = [0.0f32; MAX_BINS];
            let mut right_count = [0u32; MAX_BINS];

            let mut running = Aabb::empty();
            let mut n = 0;
            for i in 0..bin_count - 1 {
                running.merge(&bins[i].bounds);
                n += bins[i].count;
                left_area[i] = running.surface_area();
                left_count[i] = n;
            }
            let mut running = Aabb::empty();
            let mut n = 0;
            for i in (1..bin_count).rev() {
                running.merge(&bins[i].bounds);
                n += bins[i].count;
                right_area[i - 1] = running.surface_area();
                right_count[i - 1] = n;
            }

            for i in 0..bin_count - 1 {
                if left_count[i] == 0 || right_count[i] == 0 {
                    continue;
                }
                let cost = self.config.traversal_cost
                    + (left_area[i] * left_count[i] as f32 + right_area[i] * right_count[i] as f32)
                        * inv_parent_area;
                if best.map_or(true, |b| cost < b.cost) {
                    best = Some(Split {
                        axis,
                        pos: axis_min + (i + 1) as f32 * extent / bin_count as f32,
                        cost,
                    });
                }
            }
        }
        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::brute;
    use crate::stats::RayStats;
    use approx::assert_relative_eq;
    use rtcore_math::Vec3;

    /// `n x n` grid of unit quads (two triangles each) in the z = 0 plane.
    fn grid(n: usize) -> Vec<Triangle> {
        let mut tris = Vec::new();
        for y in 0..n {
            for x in 0..n {
                let (fx, fy) = (x as f32, y as f32);
                let id = 2 * (y * n + x) as u32;
                let layer = 1 << (x % 4);
                tris.push(Triangle::with_layers(
                    Point3::new(fx, fy, 0.0),
                    Point3::new(fx + 1.0, fy, 0.0),
                    Point3::new(fx, fy + 1.0, 0.0),
                    id,
                    layer,
                ));
                tris.push(Triangle::with_layers(
                    Point3::new(fx + 1.0, fy, 0.0),
                    Point3::new(fx + 1.0, fy + 1.0, 0.0),
                    Point3::new(fx, fy + 1.0, 0.0),
                    id + 1,
                    layer,
                ));
            }
        }
        tris
    }

    fn down(x: f32, y: f32) -> Ray {
        Ray::new(Point3::new(x, y, 10.0), Vec3::new(0.0, 0.0, -1.0))
    }

    #[test]
    fn test_empty_build_is_unbuilt() {
        let mut bvh = Bvh::new();
        let mut tris: Vec<Triangle> = Vec::new();
        bvh.build(&mut tris);
        assert!(!bvh.is_built());
        assert_eq!(bvh.node_count(), 0);
        assert!(bvh.root_bounds().is_none());
        assert!(!bvh.cast_ray(&down(0.0, 0.0), &tris).hit());
        assert!(!bvh.any_hit(&down(0.0, 0.0), &tris));
    }

    #[test]
    fn test_single_triangle_is_one_leaf() {
        let mut tris = vec![Triangle::new(
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(0.0, 1.0, 0.0),
            9,
        )];
        let mut bvh = Bvh::new();
        bvh.build(&mut tris);
        assert!(bvh.is_built());
        assert_eq!(bvh.node_count(), 1);
        assert_eq!(bvh.nodes()[0].kind(), NodeKind::Leaf { first: 0, count: 1 });

        // The flat z axis is padded.
        let root = bvh.root_bounds().unwrap();
        assert!(root.max.z > root.min.z);

        let hit = bvh.cast_ray(&down(0.25, 0.25), &tris);
        assert!(hit.hit());
        assert_relative_eq!(hit.t, 10.0);
        assert_relative_eq!(hit.normal, Vec3::new(0.0, 0.0, 1.0));
        assert_eq!(hit.prim_id, 9);
        let away = Ray::new(Point3::new(0.25, 0.25, 10.0), Vec3::new(0.0, 0.0, 1.0));
        assert!(!bvh.cast_ray(&away, &tris).hit());
    }

    #[test]
    fn test_dfs_layout_and_leaf_contiguity() {
        let mut tris = grid(16);
        let mut bvh = Bvh::new();
        bvh.build(&mut tris);
        assert!(bvh.node_count() > 1);
        assert!(bvh.node_count() < 2 * tris.len());
        bvh.validate(&tris).unwrap();

        let mut seen = vec![false; tris.len()];
        for node in bvh.nodes() {
            if let NodeKind::Leaf { first, count } = node.kind() {
                for s in &mut seen[first..first + count] {
                    assert!(!*s);
                    *s = true;
                }
            }
        }
        assert!(seen.iter().all(|&s| s));
    }

    #[test]
    fn test_build_reorders_but_keeps_ids() {
        let mut tris = grid(8);
        let mut before: Vec<u32> = tris.iter().map(|t| t.id).collect();
        let mut bvh = Bvh::new();
        bvh.build(&mut tris);
        let mut after: Vec<u32> = tris.iter().map(|t| t.id).collect();
        before.sort_unstable();
        after.sort_unstable();
        assert_eq!(before, after);
    }

    #[test]
    fn test_matches_brute_force_on_grid() {
        let mut tris = grid(12);
        let mut bvh = Bvh::new();
        bvh.build(&mut tris);
        for i in 0..50 {
            let x = 0.013 + (i as f32 * 0.731) % 11.9;
            let y = 0.027 + (i as f32 * 1.377) % 11.9;
            let ray = down(x, y);
            let fast = bvh.cast_ray(&ray, &tris);
            let slow = brute::cast_ray(&ray, &tris);
            assert_eq!(fast.hit(), slow.hit());
            assert_eq!(fast.prim_id, slow.prim_id);
            assert_relative_eq!(fast.t, slow.t);
            assert_eq!(bvh.any_hit(&ray, &tris), fast.hit());
        }
    }

    #[test]
    fn test_refit_is_idempotent_and_matches_build() {
        let mut tris = grid(10);
        let mut bvh = Bvh::new();
        bvh.build(&mut tris);
        let built = bvh.nodes().to_vec();
        bvh.refit(&tris);
        assert_eq!(bvh.nodes(), &built[..]);
        bvh.refit(&tris);
        assert_eq!(bvh.nodes(), &built[..]);
    }

    #[test]
    fn test_refit_follows_translation() {
        let mut tris = grid(6);
        let mut bvh = Bvh::new();
        bvh.build(&mut tris);
        let before = bvh.cast_ray(&down(2.3, 4.6), &tris);

        let offset = Vec3::new(5.0, -3.0, 2.0);
        for tri in &mut tris {
            let [a, b, c] = tri.vertices();
            tri.set_vertices(a + offset, b + offset, c + offset);
        }
        bvh.refit(&tris);
        bvh.validate(&tris).unwrap();

        let after = bvh.cast_ray(&down(2.3 + offset.x, 4.6 + offset.y), &tris);
        assert!(after.hit());
        assert_eq!(after.prim_id, before.prim_id);
        assert_relative_eq!(after.t, before.t - offset.z, epsilon = 1e-5);
    }

    #[test]
    fn test_layer_mask_culls_hits() {
        let mut tris = grid(8);
        let mut bvh = Bvh::new();
        bvh.build(&mut tris);
        // Column x = 1 carries layer bit 1 << 1.
        let ray = down(1.5, 3.5);
        assert!(bvh.cast_ray(&ray, &tris).hit());
        let masked = bvh.cast_ray_masked(&ray, &tris, 1 << 1);
        assert!(masked.hit());
        assert_eq!(masked.hit_layers, 1 << 1);
        assert!(!bvh.cast_ray_masked(&ray, &tris, 1 << 2).hit());
        assert!(!bvh.any_hit_masked(&ray, &tris, 1 << 2));
        assert!(!bvh.cast_ray_masked(&ray, &tris, 1 << 20).hit());
        assert_eq!(bvh.nodes()[0].subtree_layer_mask, 0b1111);
    }

    #[test]
    fn test_stats_count_work() {
        let mut tris = grid(16);
        let mut bvh = Bvh::new();
        bvh.build(&mut tris);
        let mut stats = RayStats::default();
        let hit = bvh.cast_ray_with(&down(3.2, 7.9), &tris, ALL_LAYERS, &mut stats);
        assert!(hit.hit());
        assert_eq!(stats.rays_cast, 1);
        assert_eq!(stats.hits, 1);
        assert!(stats.bvh_nodes_visited >= 1);
        assert!(stats.tri_tests >= 1);
        assert!((stats.tri_tests as usize) < tris.len());
    }

    #[test]
    fn test_packet_matches_single_rays() {
        let mut tris = grid(8);
        let mut bvh = Bvh::new();
        bvh.build(&mut tris);
        let rays = [down(0.4, 0.5), down(7.8, 0.1), down(20.0, 20.0), down(3.3, 4.4)];
        let mut results = [Intersection::default(); 4];
        let mut stats = RayStats::default();
        bvh.cast_ray_packet4_with(&rays, &tris, ALL_LAYERS, &mut results, &mut stats);
        for (ray, result) in rays.iter().zip(&results) {
            let single = bvh.cast_ray(ray, &tris);
            assert_eq!(single.hit(), result.hit());
            assert_eq!(single.prim_id, result.prim_id);
            assert_eq!(single.t, result.t);
        }
        assert_eq!(stats.rays_cast, 4);
        assert_eq!(stats.hits, 3);

        // Partial packet leaves the remaining slots alone.
        let mut results = [Intersection { t: 1.0, prim_id: 77, ..Default::default() }; 4];
        bvh.cast_ray_packet4_with(&rays[..2], &tris, ALL_LAYERS, &mut results, &mut NoStats);
        assert!(results[0].hit() && results[1].hit());
        assert_eq!(results[2].prim_id, 77);
    }

    #[test]
    fn test_validate_detects_stale_bounds() {
        let mut tris = grid(4);
        let mut bvh = Bvh::new();
        bvh.build(&mut tris);
        let [a, b, c] = tris[0].vertices();
        let lift = Vec3::new(0.0, 0.0, 50.0);
        tris[0].set_vertices(a + lift, b + lift, c + lift);
        assert!(matches!(
            bvh.validate(&tris),
            Err(AccelError::BrokenInvariant { .. })
        ));
        bvh.refit(&tris);
        bvh.validate(&tris).unwrap();
    }

    #[test]
    fn test_custom_config() {
        let mut tris = grid(8);
        let mut bvh = Bvh::new();
        let config = BvhConfig {
            max_leaf_size: 1,
            bin_count: 4,
            ..Default::default()
        };
        bvh.build_with_config(&mut tris, config);
        bvh.validate(&tris).unwrap();
        assert!(bvh.depth() > 0);
    }

    #[test]
    #[should_panic(expected = "bin_count")]
    fn test_invalid_config_panics() {
        let mut tris = grid(2);
        let config = BvhConfig {
            bin_count: 0,
            ..Default::default()
        };
        Bvh::new().build_with_config(&mut tris, config);
    }

    #[test]
    fn test_identical_centroids_terminate() {
        // Every centroid coincides, so no axis can be binned.
        let mut tris: Vec<Triangle> = (0..20)
            .map(|i| {
                Triangle::new(
                    Point3::new(-1.0, -1.0, 0.0),
                    Point3::new(1.0, -1.0, 0.0),
                    Point3::new(0.0, 2.0, 0.0),
                    i,
                )
            })
            .collect();
        let mut bvh = Bvh::new();
        bvh.build(&mut tris);
        bvh.validate(&tris).unwrap();
        assert_eq!(bvh.node_count(), 1);
        assert!(bvh.cast_ray(&down(0.0, 0.0), &tris).prim_id < 20);
    }
}
